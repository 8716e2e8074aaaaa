//! Path layout and per-run knobs (C1).
//!
//! Mirrors the project's usual approach to on-disk layout: resolve a
//! platform cache directory once at startup, lay fixed subdirectories
//! under it, and thread the resolved [`Config`] through the pipeline
//! instead of re-deriving paths ad hoc.

use std::path::{Path, PathBuf};

use crate::errors::Error;

/// How malformed rows are handled by adapters that stream delimited text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum Delimiter {
    #[default]
    Comma,
    Tab,
    Pipe,
}

impl Delimiter {
    pub fn byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
            Delimiter::Pipe => b'|',
        }
    }
}

/// Resolved paths and per-run options a pipeline run carries through
/// every adapter call.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub download_dir: PathBuf,
    pub extract_dir: PathBuf,
    pub sfga_dir: PathBuf,
    pub log_path: PathBuf,

    pub verbose: bool,
    pub skip_download: bool,
    pub zip_output: bool,
    pub no_quotes: bool,
    pub wrong_fields_num: crate::errors::WrongFieldsPolicy,
    pub issued_date: Option<String>,
    pub data_version: Option<String>,
    pub delimiter: Delimiter,
    pub code: Option<String>,
    pub schema: Option<PathBuf>,
    pub file: Option<String>,
    pub world_plants_set: WorldPlantsSet,
    pub batch_size: usize,
}

/// Which WorldPlants file set to convert. Resolved op question 9(d):
/// this is a flag, not an interactive prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum WorldPlantsSet {
    #[default]
    Ferns,
    Plants,
}

impl Config {
    /// Resolves cache/data directories the way the rest of the project
    /// resolves on-disk layout: an XDG-style user cache dir, with a
    /// fallback to the system temp dir when none is reported.
    pub fn new() -> Result<Self, Error> {
        let cache_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sfborg")
            .join("harvester");

        let data_root = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("harvester");

        Ok(Config {
            download_dir: cache_root.join("download"),
            extract_dir: cache_root.join("extract"),
            sfga_dir: cache_root.join("sfga"),
            cache_dir: cache_root,
            log_path: data_root.join("logs").join("harvester.logs"),
            verbose: false,
            skip_download: false,
            zip_output: false,
            no_quotes: false,
            wrong_fields_num: crate::errors::WrongFieldsPolicy::default(),
            issued_date: None,
            data_version: None,
            delimiter: Delimiter::default(),
            code: None,
            schema: None,
            file: None,
            world_plants_set: WorldPlantsSet::default(),
            batch_size: 50_000,
        })
    }

    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        self.download_dir = dir.join("download");
        self.extract_dir = dir.join("extract");
        self.sfga_dir = dir.join("sfga");
        self.cache_dir = dir;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_bytes_match_their_names() {
        assert_eq!(Delimiter::Comma.byte(), b',');
        assert_eq!(Delimiter::Tab.byte(), b'\t');
        assert_eq!(Delimiter::Pipe.byte(), b'|');
    }

    #[test]
    fn config_lays_out_subdirs_under_cache_dir() {
        let cfg = Config::new().unwrap().with_cache_dir("/tmp/harvester-test");
        assert_eq!(cfg.download_dir, Path::new("/tmp/harvester-test/download"));
        assert_eq!(cfg.extract_dir, Path::new("/tmp/harvester-test/extract"));
        assert_eq!(cfg.sfga_dir, Path::new("/tmp/harvester-test/sfga"));
    }
}
