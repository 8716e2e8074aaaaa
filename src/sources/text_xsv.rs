//! Plain name-list / delimited-file adapter (C19). Covers the two
//! simplest possible sources: a bare UTF-8 file of one scientific name
//! per line, or a delimited file with a `scientificName`-like column.
//! Both produce flat `Name` rows — no hierarchy, no synonymy — just a
//! parsed name per input line, deduplicated by its `verbatim_id`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::config::Config;
use crate::errors::Error;
use crate::model::{DatasetDescriptor, Meta, NameUsage, ParsedName};
use crate::names::{NameParser, RuleBasedNameParser};

const NAME_COLUMNS: &[&str] = &["scientificname", "scientific_name", "name", "canonicalname"];
const ID_COLUMNS: &[&str] = &["taxonid", "id"];

pub struct TextXsv {
    base: BaseAdapter,
}

impl TextXsv {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("text", "Name list / CSV, TSV, PSV files")
            .with_notes(
                "Imports a UTF8-encoded file with one scientific name per line, or a \
                 CSV/TSV/PSV file with a scientificName-like column. Provide the file with \
                 --file.",
            )
            .manual();
        Self { base: BaseAdapter::new(descriptor) }
    }

    /// The adapter accepts exactly one staged file; pick the first
    /// regular file the extract step placed in `extract_dir`.
    fn find_source_file(extract_dir: &Path) -> Result<PathBuf, Error> {
        for entry in std::fs::read_dir(extract_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                return Ok(entry.path());
            }
        }
        Err(Error::UnknownFormat("no staged file found in extract directory".into()))
    }

    fn import_meta(sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let meta = Meta {
            key: "text".into(),
            title: "Name list / delimited import".into(),
            description: Some(
                "A flat list of scientific names, or a delimited file with a scientificName \
                 column, staged locally and parsed one row at a time."
                    .into(),
            ),
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }

    fn usage_from_parsed(verbatim: &str, parsed: &ParsedName, alternative_id: Option<String>) -> NameUsage {
        let id = ParsedName::verbatim_id(verbatim);
        let mut usage = NameUsage::new(id);
        usage.alternative_id = alternative_id;
        usage.scientific_name = parsed.canonical_full.clone();
        usage.scientific_name_string = verbatim.to_string();
        usage.authorship = parsed.authorship.clone();
        usage.uninomial = parsed.uninomial.clone();
        usage.genus = parsed.genus.clone();
        usage.subgenus = parsed.subgenus.clone();
        usage.species = parsed.species.clone();
        usage.infraspecies = parsed.infraspecies.clone();
        usage.rank = parsed.rank;
        usage
    }

    /// One scientific name per line. The first line is always treated
    /// as a header and skipped, matching the upstream importer.
    fn import_plain_list(path: &Path, batch_size: usize, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let parser = RuleBasedNameParser;
        let body = std::fs::read_to_string(path)?;
        let mut lines = body.lines();
        lines.next();

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut batch = Vec::with_capacity(batch_size);
        let mut count = 0usize;

        for line in lines {
            let name = line.trim();
            if name.is_empty() {
                continue;
            }
            let id = ParsedName::verbatim_id(name);
            if !seen.insert(id) {
                continue;
            }

            let parsed = parser.parse_name(name);
            batch.push(Self::usage_from_parsed(name, &parsed, None));
            count += 1;
            if batch.len() >= batch_size {
                sink.insert_name_usages(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            sink.insert_name_usages(&batch)?;
        }

        info!(count, "plain name list imported");
        Ok(())
    }

    /// A delimited file with a `scientificName`-like column, read with
    /// the user's chosen delimiter and quoting mode.
    fn import_xsv(path: &Path, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let parser = RuleBasedNameParser;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(cfg.delimiter.byte())
            .quoting(!cfg.no_quotes)
            .flexible(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let name_col = headers
            .iter()
            .position(|h| NAME_COLUMNS.contains(&h.to_lowercase().as_str()))
            .ok_or_else(|| Error::ParseFailed("no scientificName-like column found".into()))?;
        let id_col = headers.iter().position(|h| ID_COLUMNS.contains(&h.to_lowercase().as_str()));

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut batch = Vec::with_capacity(cfg.batch_size);
        let mut count = 0usize;
        let mut rejected = 0usize;

        for record in reader.records() {
            let record = record?;
            let Some(name) = record.get(name_col).map(str::trim).filter(|s| !s.is_empty()) else {
                rejected += 1;
                continue;
            };

            let id = ParsedName::verbatim_id(name);
            if !seen.insert(id) {
                continue;
            }

            let alternative_id = id_col.and_then(|c| record.get(c)).map(str::to_string).filter(|s| !s.is_empty());
            let parsed = parser.parse_name(name);
            batch.push(Self::usage_from_parsed(name, &parsed, alternative_id));
            count += 1;
            if batch.len() >= cfg.batch_size {
                sink.insert_name_usages(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            sink.insert_name_usages(&batch)?;
        }

        info!(count, rejected, "delimited name list imported");
        Ok(())
    }
}

/// A file "looks delimited" when its first line contains the
/// configured delimiter byte; a bare name list never does.
fn looks_delimited(first_line: &str, delimiter: u8) -> bool {
    first_line.as_bytes().contains(&delimiter)
}

impl SourceAdapter for TextXsv {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        Self::import_meta(sink)?;

        let path = Self::find_source_file(&cfg.extract_dir)?;
        let first_line = std::fs::read_to_string(&path)?.lines().next().unwrap_or_default().to_string();

        if looks_delimited(&first_line, cfg.delimiter.byte()) {
            Self::import_xsv(&path, cfg, sink)?;
        } else {
            Self::import_plain_list(&path, cfg.batch_size, sink)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_delimited_header() {
        assert!(looks_delimited("taxonID,scientificName", b','));
        assert!(!looks_delimited("Canis lupus", b','));
    }

    #[test]
    fn usage_from_parsed_keeps_the_raw_line_as_the_name_string() {
        let parser = RuleBasedNameParser;
        let parsed = parser.parse_name("Canis lupus L., 1758");
        let usage = TextXsv::usage_from_parsed("Canis lupus L., 1758", &parsed, None);
        assert_eq!(usage.scientific_name_string, "Canis lupus L., 1758");
        assert_eq!(usage.genus.as_deref(), Some("Canis"));
    }
}
