//! Cache directory lifecycle (C2): create/empty the download, extract
//! and output directories that every adapter assumes exist.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::config::Config;
use crate::errors::Error;

/// Tri-state read purely to make tests and log messages legible; the
/// only operation that matters is [`reset_cache`] / [`empty_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Absent,
    Empty,
    NotEmpty,
}

pub fn dir_state(dir: &Path) -> std::io::Result<DirState> {
    match fs::read_dir(dir) {
        Ok(mut entries) => {
            if entries.next().is_none() {
                Ok(DirState::Empty)
            } else {
                Ok(DirState::NotEmpty)
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DirState::Absent),
        Err(e) => Err(e),
    }
}

/// Removes everything under `dir` but keeps the directory itself,
/// creating it first if absent.
pub fn empty_dir(dir: &Path) -> Result<(), Error> {
    match dir_state(dir)? {
        DirState::Absent => fs::create_dir_all(dir)?,
        DirState::Empty => {}
        DirState::NotEmpty => {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
        }
    }
    Ok(())
}

/// Ensures the download/extract/sfga directories exist and are empty,
/// ready for a fresh run. `skip_download` callers should not call this
/// on the download dir — they want the previous contents intact.
pub fn reset_cache(cfg: &Config) -> Result<(), Error> {
    info!(cache_dir = %cfg.cache_dir.display(), "resetting cache directories");
    if !cfg.skip_download {
        empty_dir(&cfg.download_dir)?;
    } else {
        fs::create_dir_all(&cfg.download_dir)?;
    }
    empty_dir(&cfg.extract_dir)?;
    fs::create_dir_all(&cfg.sfga_dir)?;
    Ok(())
}

/// Empties just the output (sfga) directory, run right before a fresh
/// archive is created by `init_sink`.
pub fn reset_output(cfg: &Config) -> Result<(), Error> {
    empty_dir(&cfg.sfga_dir)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn absent_dir_reports_absent() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(dir_state(&missing).unwrap(), DirState::Absent);
    }

    #[test]
    fn empty_dir_creates_then_empties() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("work");
        empty_dir(&target).unwrap();
        assert_eq!(dir_state(&target).unwrap(), DirState::Empty);

        fs::write(target.join("leftover.txt"), b"stale").unwrap();
        assert_eq!(dir_state(&target).unwrap(), DirState::NotEmpty);

        empty_dir(&target).unwrap();
        assert_eq!(dir_state(&target).unwrap(), DirState::Empty);
    }

    #[test]
    fn reset_cache_creates_all_subdirs() {
        let dir = tempdir().unwrap();
        let cfg = Config::new().unwrap().with_cache_dir(dir.path());
        reset_cache(&cfg).unwrap();
        assert_eq!(dir_state(&cfg.download_dir).unwrap(), DirState::Empty);
        assert_eq!(dir_state(&cfg.extract_dir).unwrap(), DirState::Empty);
        assert!(cfg.sfga_dir.is_dir());
    }
}
