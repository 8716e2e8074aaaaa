//! ITIS adapter (C10). ITIS ships as a zipped SQLite database; this
//! module finds it in the extract directory, opens it read-only, and
//! joins its tables into the unified row types.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::config::Config;
use crate::errors::Error;
use crate::model::{
    BasionymInferenceOptions, DatasetDescriptor, Distribution, Meta, NameStatus, NameUsage, Reference,
    TaxonomicRank, TaxonomicStatus, Vernacular, ID_NAMESPACE,
};
use crate::names::builder::code_from_kingdom_id;

const EXTINCT_TSN_URL: &str =
    "https://raw.githubusercontent.com/CatalogueOfLife/data-itis/master/raw/extinct.tsv";

pub struct Itis {
    base: BaseAdapter,
}

impl Itis {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("itis", "Integrated Taxonomic Information System")
            .with_url("https://itis.gov/downloads/itisSqlite.zip");
        Self { base: BaseAdapter::new(descriptor) }
    }

    /// Walks the extract directory looking for the `.sqlite` file the
    /// zip unpacked, mirroring `findSQLiteDB`'s directory walk.
    fn find_sqlite_db(extract_dir: &Path) -> Result<PathBuf, Error> {
        fn walk(dir: &Path) -> std::io::Result<Option<PathBuf>> {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    if let Some(found) = walk(&path)? {
                        return Ok(Some(found));
                    }
                } else if path.extension().and_then(|e| e.to_str()) == Some("sqlite") {
                    return Ok(Some(path));
                }
            }
            Ok(None)
        }
        walk(extract_dir)?.ok_or_else(|| Error::UnknownFormat("no .sqlite file found in ITIS archive".into()))
    }

    fn fetch_extinct_tsns() -> std::collections::HashSet<String> {
        match ureq::get(EXTINCT_TSN_URL).call() {
            Ok(resp) => match resp.into_string() {
                Ok(body) => body.lines().skip(1).map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect(),
                Err(e) => {
                    warn!(error = %e, "could not read extinct-TSN response body, continuing without it");
                    Default::default()
                }
            },
            Err(e) => {
                warn!(error = %e, "extinct-TSN fetch failed, continuing without it");
                Default::default()
            }
        }
    }

    fn import_meta(conn: &Connection, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let version: Option<String> =
            conn.query_row("SELECT version FROM version LIMIT 1", [], |r| r.get(0)).ok();

        let meta = Meta {
            key: "itis".into(),
            title: "Integrated Taxonomic Information System".into(),
            description: Some(
                "ITIS is a partnership of federal agencies and other organizations providing an \
                 authoritative taxonomic information system for biota of interest to North America."
                    .into(),
            ),
            url: Some("https://itis.gov".into()),
            version,
            issued: cfg.issued_date.clone(),
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }

    fn import_references(conn: &Connection, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let mut stmt = conn.prepare(
            "SELECT publication_id, reference_author, title, publication_date, publisher, isbn \
             FROM publications",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let author: Option<String> = row.get(1)?;
            let title: Option<String> = row.get(2)?;
            let date: Option<String> = row.get(3)?;
            let publisher: Option<String> = row.get(4)?;
            let isbn: Option<String> = row.get(5)?;
            Ok((id, author, title, date, publisher, isbn))
        })?;

        let mut refs = Vec::new();
        for row in rows {
            let (id, author, title, date, publisher, isbn) = row?;
            let issued = date.as_deref().map(extract_year);
            refs.push(Reference {
                id: Uuid::new_v5(&ID_NAMESPACE, format!("itis-ref-{id}").as_bytes()),
                author,
                title,
                issued,
                publisher,
                isbn,
                ..Default::default()
            });
        }
        sink.insert_references(&refs)
    }

    fn import_name_usages(
        conn: &Connection,
        extinct_tsns: &std::collections::HashSet<String>,
        sink: &mut dyn ArchiveSink,
    ) -> Result<(), Error> {
        let mut stmt = conn.prepare(
            "SELECT tu.tsn, h.parent_tsn, tu.complete_name, tu.unit_name1, tu.unit_name2, \
             tu.unit_name3, tu.unit_name4, tu.kingdom_id, tut.rank_id, tut.rank_name, \
             tal.taxon_author \
             FROM taxonomic_units tu \
             JOIN hierarchy h ON h.tsn = tu.tsn \
             JOIN taxon_unit_types tut ON tut.rank_id = tu.rank_id AND tut.kingdom_id = tu.kingdom_id \
             LEFT JOIN taxon_authors_lkp tal ON tal.taxon_author_id = tu.taxon_author_id \
             WHERE tu.name_usage IN ('valid', 'accepted') \
             AND (tu.unaccept_reason IS NULL OR tu.unaccept_reason = '')",
        )?;

        let rows = stmt.query_map([], |row| {
            let tsn: i64 = row.get(0)?;
            let parent_tsn: i64 = row.get(1)?;
            let complete_name: String = row.get(2)?;
            let unit1: Option<String> = row.get(3)?;
            let unit2: Option<String> = row.get(4)?;
            let unit3: Option<String> = row.get(5)?;
            let unit4: Option<String> = row.get(6)?;
            let kingdom_id: i64 = row.get(7)?;
            let rank_id: i64 = row.get(8)?;
            let rank_name: String = row.get(9)?;
            let author: Option<String> = row.get(10)?;
            Ok((tsn, parent_tsn, complete_name, unit1, unit2, unit3, unit4, kingdom_id, rank_id, rank_name, author))
        })?;

        let mut usages = Vec::new();
        for row in rows {
            let (tsn, parent_tsn, complete_name, unit1, unit2, unit3, unit4, kingdom_id, rank_id, rank_name, author) =
                row?;

            let id = Uuid::new_v5(&ID_NAMESPACE, format!("itis-{tsn}").as_bytes());
            let mut usage = NameUsage::new(id);
            usage.scientific_name = complete_name.clone();
            usage.authorship = author;
            usage.code = code_from_kingdom_id(kingdom_id);
            usage.link = Some(format!(
                "https://www.itis.gov/servlet/SingleRpt/SingleRpt?search_topic=TSN&search_value={tsn}"
            ));
            usage.extinct = extinct_tsns.contains(&tsn.to_string());
            usage.rank = Some(parse_rank_name(&rank_name));

            if parent_tsn > 0 && parent_tsn != tsn {
                usage.parent_id = Some(Uuid::new_v5(&ID_NAMESPACE, format!("itis-{parent_tsn}").as_bytes()));
            }

            if rank_id < 220 {
                usage.uninomial = Some(complete_name.clone());
            } else {
                usage.genus = unit1;
                if let Some(u2) = &unit2 {
                    if u2.starts_with('(') {
                        usage.subgenus = Some(u2.trim_matches(|c| c == '(' || c == ')').to_string());
                    } else {
                        usage.species = Some(u2.clone());
                    }
                }
                usage.infraspecies = unit3.or(unit4);
            }

            usage.sync_scientific_name_string();
            usages.push(usage);
        }

        info!(count = usages.len(), "ITIS accepted name usages collected");
        sink.insert_name_usages(&usages)
    }

    fn import_synonyms(conn: &Connection, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let mut stmt = conn.prepare(
            "SELECT tu.tsn, sl.tsn_accepted, tu.complete_name, tu.kingdom_id, tu.unaccept_reason \
             FROM taxonomic_units tu \
             JOIN synonym_links sl ON sl.tsn = tu.tsn \
             WHERE tu.unaccept_reason NOT IN ('unavailable, database artifact', 'database artifact') \
             OR tu.unaccept_reason IS NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            let tsn: i64 = row.get(0)?;
            let accepted_tsn: i64 = row.get(1)?;
            let name: String = row.get(2)?;
            let kingdom_id: i64 = row.get(3)?;
            let reason: Option<String> = row.get(4)?;
            Ok((tsn, accepted_tsn, name, kingdom_id, reason))
        })?;

        let mut usages = Vec::new();
        for row in rows {
            let (tsn, accepted_tsn, name, kingdom_id, reason) = row?;
            let id = Uuid::new_v5(&ID_NAMESPACE, format!("itis-{tsn}").as_bytes());
            let mut usage = NameUsage::new(id);
            usage.scientific_name = name;
            usage.taxonomic_status = TaxonomicStatus::Synonym;
            usage.parent_id = Some(Uuid::new_v5(&ID_NAMESPACE, format!("itis-{accepted_tsn}").as_bytes()));
            usage.code = code_from_kingdom_id(kingdom_id);
            usage.name_status = map_name_status(kingdom_id, reason.as_deref());
            usage.sync_scientific_name_string();
            usages.push(usage);
        }
        sink.insert_name_usages(&usages)
    }

    fn import_vernaculars(conn: &Connection, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let mut stmt = conn.prepare(
            "SELECT tu.tsn, v.vernacular_name, v.language \
             FROM vernaculars v \
             JOIN taxonomic_units tu ON tu.tsn = v.tsn \
             WHERE tu.name_usage IN ('valid', 'accepted')",
        )?;
        let rows = stmt.query_map([], |row| {
            let tsn: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let language: Option<String> = row.get(2)?;
            Ok((tsn, name, language))
        })?;

        let mut vernaculars = Vec::new();
        for row in rows {
            let (tsn, name, language) = row?;
            vernaculars.push(Vernacular {
                taxon_id: Uuid::new_v5(&ID_NAMESPACE, format!("itis-{tsn}").as_bytes()),
                name,
                language: normalize_language(language.as_deref().unwrap_or("")),
                ..Default::default()
            });
        }
        sink.insert_vernaculars(&vernaculars)
    }

    fn import_distributions(conn: &Connection, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let mut stmt = conn.prepare(
            "SELECT tu.tsn, g.geographic_value \
             FROM geographic_div g \
             JOIN taxonomic_units tu ON tu.tsn = g.tsn \
             WHERE tu.name_usage IN ('valid', 'accepted')",
        )?;
        let rows = stmt.query_map([], |row| {
            let tsn: i64 = row.get(0)?;
            let area: String = row.get(1)?;
            Ok((tsn, area))
        })?;

        let mut distributions = Vec::new();
        for row in rows {
            let (tsn, area) = row?;
            distributions.push(Distribution {
                taxon_id: Uuid::new_v5(&ID_NAMESPACE, format!("itis-{tsn}").as_bytes()),
                area,
                gazetteer: "text".into(),
            });
        }
        sink.insert_distributions(&distributions)
    }
}

impl SourceAdapter for Itis {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let db_path = Self::find_sqlite_db(&cfg.extract_dir)?;
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA temp_store = MEMORY")?;

        Self::import_meta(&conn, cfg, sink)?;

        let extinct_tsns = Self::fetch_extinct_tsns();

        Self::import_references(&conn, sink)?;
        Self::import_name_usages(&conn, &extinct_tsns, sink)?;
        Self::import_synonyms(&conn, sink)?;
        Self::import_vernaculars(&conn, sink)?;
        Self::import_distributions(&conn, sink)?;

        sink.infer_basionyms(BasionymInferenceOptions {
            skip_if_relations_exist: true,
            create_original_combinations: true,
        })?;

        Ok(())
    }
}

/// Tries a fixed list of date layouts, falling back to the first four
/// characters as a bare year.
fn extract_year(date: &str) -> String {
    for len in [10, 4] {
        if date.len() >= len {
            let candidate = &date[..len];
            if candidate.len() == 4 && candidate.chars().all(|c| c.is_ascii_digit()) {
                return candidate.to_string();
            }
        }
    }
    date.chars().take(4).collect()
}

fn parse_rank_name(rank_name: &str) -> TaxonomicRank {
    match rank_name.to_lowercase().as_str() {
        "kingdom" => TaxonomicRank::Kingdom,
        "subkingdom" => TaxonomicRank::Subkingdom,
        "phylum" | "division" => TaxonomicRank::Phylum,
        "subphylum" | "subdivision" => TaxonomicRank::Subphylum,
        "class" => TaxonomicRank::Class,
        "subclass" => TaxonomicRank::Subclass,
        "order" => TaxonomicRank::Order,
        "suborder" => TaxonomicRank::Suborder,
        "family" => TaxonomicRank::Family,
        "subfamily" => TaxonomicRank::Subfamily,
        "genus" => TaxonomicRank::Genus,
        "subgenus" => TaxonomicRank::Subgenus,
        "species" => TaxonomicRank::Species,
        "subspecies" => TaxonomicRank::Subspecies,
        "variety" => TaxonomicRank::Variety,
        _ => TaxonomicRank::Unranked,
    }
}

/// Maps ITIS's `(kingdom_group, unaccept_reason)` pair onto the shared
/// `NameStatus` vocabulary, per the fixed per-kingdom-group table.
fn map_name_status(kingdom_id: i64, reason: Option<&str>) -> NameStatus {
    let reason = match reason {
        Some(r) if !r.is_empty() => r.to_lowercase(),
        _ => return NameStatus::Unknown,
    };

    let zoological = matches!(kingdom_id, 2 | 5);
    let botanical = matches!(kingdom_id, 3 | 4 | 6);

    if zoological {
        return if reason.contains("junior") {
            NameStatus::Unacceptable
        } else if reason.contains("nomen dubium") {
            NameStatus::Doubtful
        } else if reason.contains("nomen nudum") {
            NameStatus::NotEstablished
        } else {
            NameStatus::Unknown
        };
    }

    if botanical {
        return if reason.contains("illegitimate") || reason.contains("rejected") {
            NameStatus::Rejected
        } else if reason.contains("invalid") {
            NameStatus::NotEstablished
        } else {
            NameStatus::Unknown
        };
    }

    NameStatus::Unknown
}

/// ISO 639-3 normalization for the small set of languages ITIS uses.
fn normalize_language(language: &str) -> String {
    match language {
        "English" => "eng",
        "Spanish" => "spa",
        "French" => "fra",
        "Portuguese" => "por",
        "Italian" => "ita",
        "German" => "deu",
        "Hawaiian" => "haw",
        "unspecified" => "",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_year_handles_iso_date() {
        assert_eq!(extract_year("2004-05-12"), "2004");
    }

    #[test]
    fn extract_year_falls_back_to_first_four_chars() {
        assert_eq!(extract_year("2004"), "2004");
    }

    #[test]
    fn normalizes_known_languages() {
        assert_eq!(normalize_language("English"), "eng");
        assert_eq!(normalize_language("unspecified"), "");
    }

    #[test]
    fn maps_zoological_unaccept_reasons() {
        assert_eq!(map_name_status(2, Some("junior synonym")), NameStatus::Unacceptable);
        assert_eq!(map_name_status(2, Some("nomen dubium")), NameStatus::Doubtful);
    }
}
