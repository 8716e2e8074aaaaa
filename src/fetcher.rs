//! HTTP download, local-file passthrough, and archive-format sniffing
//! (C3). This is the one place that talks to the network; adapters
//! only ever see a path on disk afterward.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tracing::info;
use xz2::read::XzDecoder;

use crate::config::Config;
use crate::errors::Error;

/// Recognized archive/file kinds an adapter's `extract` step might see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    TarBz2,
    TarXz,
    Tar,
    Bz2,
    PlainText,
    PlainXml,
}

/// Obtains the raw bytes for a dataset: either the user-supplied file
/// (local path or URL), or the descriptor's own URL, or the existing
/// cache if `skip_download` is set. Fails with [`Error::MissingSource`]
/// if none of those are available.
pub fn obtain(cfg: &Config, descriptor_url: &str, file_override: Option<&str>) -> Result<PathBuf, Error> {
    if cfg.skip_download {
        if let Some(path) = newest_entry(&cfg.download_dir)? {
            info!(path = %path.display(), "skip-download: reusing cached file");
            return Ok(path);
        }
    }

    let source = file_override.or_else(|| {
        if descriptor_url.is_empty() {
            None
        } else {
            Some(descriptor_url)
        }
    });

    let source = source.ok_or(Error::MissingSource)?;

    if is_url(source) {
        download(cfg, source)
    } else {
        let path = PathBuf::from(source);
        if !path.exists() {
            return Err(Error::DownloadFailed(format!("local file not found: {source}")));
        }
        Ok(path)
    }
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn newest_entry(dir: &Path) -> Result<Option<PathBuf>, Error> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
        if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            best = Some((modified, entry.path()));
        }
    }
    Ok(best.map(|(_, p)| p))
}

fn download(cfg: &Config, url: &str) -> Result<PathBuf, Error> {
    info!(url, "downloading");
    std::fs::create_dir_all(&cfg.download_dir)?;

    let file_name = url.rsplit('/').next().unwrap_or("download.bin");
    let dest = cfg.download_dir.join(file_name);

    let resp = ureq::get(url).call()?;
    let mut reader = resp.into_reader();
    let mut out = File::create(&dest)?;
    io::copy(&mut reader, &mut out)?;

    info!(path = %dest.display(), "download complete");
    Ok(dest)
}

/// Sniffs `path` by extension/magic bytes and returns the detected
/// archive kind.
pub fn sniff(path: &Path) -> Result<ArchiveKind, Error> {
    let lower = path.to_string_lossy().to_lowercase();
    if lower.ends_with(".zip") {
        return Ok(ArchiveKind::Zip);
    }
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        return Ok(ArchiveKind::TarGz);
    }
    if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
        return Ok(ArchiveKind::TarBz2);
    }
    if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
        return Ok(ArchiveKind::TarXz);
    }
    if lower.ends_with(".tar") {
        return Ok(ArchiveKind::Tar);
    }
    if lower.ends_with(".bz2") {
        return Ok(ArchiveKind::Bz2);
    }
    if lower.ends_with(".xml") {
        return Ok(ArchiveKind::PlainXml);
    }
    if lower.ends_with(".txt") || lower.ends_with(".csv") || lower.ends_with(".tsv") {
        return Ok(ArchiveKind::PlainText);
    }

    // Fall back to magic bytes for extensionless downloads.
    let mut f = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 6];
    let n = f.read(&mut magic).unwrap_or(0);
    if n >= 2 && &magic[..2] == b"PK" {
        return Ok(ArchiveKind::Zip);
    }
    if n >= 2 && magic[0] == 0x1f && magic[1] == 0x8b {
        return Ok(ArchiveKind::TarGz);
    }
    if n >= 3 && &magic[..3] == b"BZh" {
        return Ok(ArchiveKind::Bz2);
    }
    if n >= 6 && magic == [0xfd, b'7', b'z', b'X', b'Z', 0x00] {
        return Ok(ArchiveKind::TarXz);
    }

    Err(Error::UnknownFormat(path.display().to_string()))
}

/// Extracts a whole archive into `extract_dir`, dispatching on
/// [`sniff`]. Plain text/XML files are copied verbatim, matching the
/// project's own "extract is sometimes just a copy" convention for
/// sources that ship already-decompressed.
pub fn extract_into(path: &Path, extract_dir: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(extract_dir)?;

    match sniff(path)? {
        ArchiveKind::Zip => {
            let file = File::open(path)?;
            let mut archive = zip::ZipArchive::new(file)?;
            archive.extract(extract_dir)?;
        }
        ArchiveKind::TarGz => {
            let file = File::open(path)?;
            let decoder = GzDecoder::new(file);
            tar::Archive::new(decoder).unpack(extract_dir)?;
        }
        ArchiveKind::TarBz2 => {
            let file = File::open(path)?;
            let decoder = BzDecoder::new(file);
            tar::Archive::new(decoder).unpack(extract_dir)?;
        }
        ArchiveKind::TarXz => {
            let file = File::open(path)?;
            let decoder = XzDecoder::new(file);
            tar::Archive::new(decoder).unpack(extract_dir)?;
        }
        ArchiveKind::Tar => {
            let file = File::open(path)?;
            tar::Archive::new(file).unpack(extract_dir)?;
        }
        ArchiveKind::Bz2 => {
            let file = File::open(path)?;
            let mut decoder = BzDecoder::new(file);
            let stem = path.file_stem().unwrap_or_default();
            let mut out = File::create(extract_dir.join(stem))?;
            io::copy(&mut decoder, &mut out)?;
        }
        ArchiveKind::PlainText | ArchiveKind::PlainXml => {
            let dest = extract_dir.join(path.file_name().unwrap_or_default());
            std::fs::copy(path, dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn sniffs_by_extension() {
        let dir = tempdir().unwrap();
        let xml = dir.path().join("dump.xml");
        std::fs::write(&xml, b"<mediawiki></mediawiki>").unwrap();
        assert_eq!(sniff(&xml).unwrap(), ArchiveKind::PlainXml);

        let txt = dir.path().join("data.tsv");
        std::fs::write(&txt, b"a\tb\n").unwrap();
        assert_eq!(sniff(&txt).unwrap(), ArchiveKind::PlainText);
    }

    #[test]
    fn unknown_extension_with_no_magic_bytes_is_an_error() {
        let dir = tempdir().unwrap();
        let weird = dir.path().join("mystery.bin");
        std::fs::write(&weird, b"not an archive").unwrap();
        assert!(sniff(&weird).is_err());
    }

    #[test]
    fn extract_copies_plain_xml_verbatim() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("dump.xml");
        std::fs::write(&src, b"<mediawiki></mediawiki>").unwrap();

        let out = dir.path().join("extract");
        extract_into(&src, &out).unwrap();
        assert!(out.join("dump.xml").is_file());
    }
}
