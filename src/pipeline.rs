//! Pipeline (C9): orchestrates the C7 lifecycle for a single
//! invocation. Steps run strictly sequentially; any failure aborts the
//! remaining steps and leaves the cache intact for inspection.

use std::path::Path;

use tracing::info;

use crate::archive::ArchiveSink;
use crate::cache;
use crate::config::Config;
use crate::errors::Error;
use crate::registry::Registry;

pub struct Pipeline {
    registry: Registry,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { registry: Registry::new() }
    }

    /// Runs the full conversion for `label_or_id`, writing the
    /// resulting archive to `output_path`.
    pub fn run(&self, cfg: &Config, label_or_id: &str, output_path: &Path) -> Result<(), Error> {
        let label = self.registry.resolve(label_or_id)?;
        info!(label, "resolved source");

        let adapter = self.registry.build(&label, cfg)?;

        if !cfg.skip_download {
            cache::reset_cache(cfg)?;
            let downloaded = adapter.download(cfg)?;
            info!(path = %downloaded.display(), "download/local source ready");
            adapter.extract(cfg, &downloaded)?;
        } else {
            info!("skip-download set, reusing existing extract directory");
        }

        let mut sink = adapter.init_sink(cfg)?;
        adapter.to_archive(cfg, &mut sink)?;

        sink.export(output_path, cfg.zip_output)?;
        sink.close()?;

        info!(output = %output_path.display(), "pipeline run complete");
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
