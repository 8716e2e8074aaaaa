//! SourceAdapter (C7): the uniform lifecycle every source implements.
//! A capability set, not an inheritance hierarchy — adapters embed
//! [`BaseAdapter`] for the shared download/extract/init behavior and
//! override only the steps that are actually source-specific.

use std::path::{Path, PathBuf};

use crate::archive::{ArchiveSink, SqliteArchive};
use crate::config::Config;
use crate::errors::Error;
use crate::model::DatasetDescriptor;
use crate::{cache, fetcher};

/// Uniform lifecycle `download → extract → init_sink → to_archive`
/// every source implements.
pub trait SourceAdapter {
    fn descriptor(&self) -> DatasetDescriptor;

    /// Obtains raw bytes for this source. The default behavior is
    /// shared by every adapter; override only to change URL resolution.
    fn download(&self, cfg: &Config) -> Result<PathBuf, Error> {
        let descriptor = self.descriptor();
        fetcher::obtain(cfg, descriptor.url.as_deref().unwrap_or(""), cfg.file.as_deref())
    }

    /// Decompresses/relocates `path` into `cfg.extract_dir`. The
    /// default dispatches by sniffing the file type; adapters with
    /// post-extract transforms (WorldPlants' CSV concatenation, IOC's
    /// header strip) override this and call the default first.
    fn extract(&self, cfg: &Config, path: &Path) -> Result<(), Error> {
        fetcher::extract_into(path, &cfg.extract_dir)
    }

    /// Empties the output directory and opens a fresh archive.
    fn init_sink(&self, cfg: &Config) -> Result<SqliteArchive, Error> {
        cache::reset_output(cfg)?;
        SqliteArchive::create(&cfg.sfga_dir)
    }

    /// The source-specific conversion: reads from `cfg.extract_dir`
    /// and writes rows into `sink`.
    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error>;
}

/// Shared download/extract/init behavior every adapter embeds, mirroring
/// the project's base-convertor composition pattern: concrete adapters
/// hold a `base: BaseAdapter` field and call through to it for anything
/// that isn't source-specific, instead of re-deriving it.
#[derive(Debug, Clone)]
pub struct BaseAdapter {
    pub descriptor: DatasetDescriptor,
}

impl BaseAdapter {
    pub fn new(descriptor: DatasetDescriptor) -> Self {
        Self { descriptor }
    }
}
