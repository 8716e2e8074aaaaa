//! ArchiveSink collaborator (C5). The unified-archive writer is an
//! external library in production; this is a working reference
//! implementation — a SQLite-backed sink with the schema tables the
//! external interface contract names (`metadata`, `name_usage`,
//! `reference`, `vernacular`, `distribution`, `type_material`) — so
//! adapters have somewhere real to write rows and the crate's own
//! tests can assert against them.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::errors::Error;
use crate::model::{
    BasionymInferenceOptions, Distribution, Meta, NameUsage, NomenclaturalCode, Reference, TypeMaterial, Vernacular,
};

/// Methods every adapter's `to_archive` step calls. Batched inserts are
/// atomic per batch (each `insert_*` call runs inside its own
/// transaction).
pub trait ArchiveSink {
    fn insert_meta(&mut self, meta: &Meta) -> Result<(), Error>;
    fn insert_references(&mut self, refs: &[Reference]) -> Result<(), Error>;
    fn insert_name_usages(&mut self, usages: &[NameUsage]) -> Result<(), Error>;
    fn insert_vernaculars(&mut self, vernaculars: &[Vernacular]) -> Result<(), Error>;
    fn insert_distributions(&mut self, distributions: &[Distribution]) -> Result<(), Error>;
    fn insert_type_materials(&mut self, materials: &[TypeMaterial]) -> Result<(), Error>;
    fn infer_basionyms(&mut self, opts: BasionymInferenceOptions) -> Result<(), Error>;
    fn export(&mut self, output_path: &Path, zip: bool) -> Result<(), Error>;
    fn close(self) -> Result<(), Error>;
}

/// SQLite-backed archive. One file per run, created fresh by
/// [`SqliteArchive::create`] and populated through the trait methods
/// above.
pub struct SqliteArchive {
    conn: Connection,
    db_path: PathBuf,
}

const SCHEMA: &str = "
CREATE TABLE metadata (
    key TEXT, title TEXT, alias TEXT, description TEXT, doi TEXT,
    issued TEXT, version TEXT, geographic_scope TEXT, taxonomic_scope TEXT,
    confidence TEXT, completeness TEXT, license TEXT, url TEXT, logo TEXT,
    citation TEXT, contact TEXT, creators TEXT, contributors TEXT, keywords TEXT
);
CREATE TABLE name_usage (
    col__id TEXT PRIMARY KEY, col__parent_id TEXT, col__alternative_id TEXT,
    col__basionym_id TEXT, col__reference_id TEXT,
    col__scientific_name TEXT, col__scientific_name_string TEXT, col__authorship TEXT,
    gn__uninomial TEXT, gn__genus TEXT, gn__subgenus TEXT, gn__species TEXT,
    gn__infraspecies TEXT, gn__cultivar_epithet TEXT,
    col__taxonomic_status TEXT, col__name_status TEXT,
    col__kingdom TEXT, col__phylum TEXT, col__class TEXT, col__subclass TEXT,
    col__order TEXT, col__superfamily TEXT, col__family TEXT, col__subfamily TEXT,
    col__tribe TEXT, col__subtribe TEXT, col__section TEXT,
    gn__rank TEXT, col__extinct INTEGER, col__code TEXT, col__link TEXT,
    col__modified TEXT, col__scrutinizer TEXT, col__temporal_range_start TEXT,
    col__temporal_range_end TEXT, col__name_phrase TEXT, col__remarks TEXT,
    col__published_in_page TEXT, col__published_in_year INTEGER
);
CREATE TABLE reference (
    col__id TEXT PRIMARY KEY, col__type TEXT, col__author TEXT, col__title TEXT,
    col__container_title TEXT, col__volume TEXT, col__issue TEXT, col__page TEXT,
    col__issued TEXT, col__doi TEXT, col__isbn TEXT, col__publisher TEXT,
    col__citation TEXT, col__remarks TEXT
);
CREATE TABLE vernacular (
    col__taxon_id TEXT, col__name TEXT, col__language TEXT, col__country TEXT, col__remarks TEXT
);
CREATE TABLE distribution (
    col__taxon_id TEXT, col__area TEXT, col__gazetteer TEXT
);
CREATE TABLE type_material (
    col__id TEXT, col__name_id TEXT, col__reference_id TEXT,
    col__latitude REAL, col__longitude REAL, col__collector TEXT,
    col__date TEXT, col__institution_code TEXT
);
";

impl SqliteArchive {
    /// Empties `dir` and opens a fresh `archive.sqlite` inside it,
    /// conforming to the schema above.
    pub fn create(dir: &Path) -> Result<Self, Error> {
        crate::cache::empty_dir(dir)?;
        let db_path = dir.join("archive.sqlite");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, db_path })
    }

    fn uuid_or_empty(id: Option<Uuid>) -> String {
        id.map(|u| u.to_string()).unwrap_or_default()
    }
}

impl ArchiveSink for SqliteArchive {
    fn insert_meta(&mut self, meta: &Meta) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO metadata (key, title, alias, description, doi, issued, version, \
             geographic_scope, taxonomic_scope, confidence, completeness, license, url, logo, \
             citation, contact, creators, contributors, keywords) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                meta.key,
                meta.title,
                meta.alias,
                meta.description,
                meta.doi,
                meta.issued,
                meta.version,
                meta.geographic_scope,
                meta.taxonomic_scope,
                meta.confidence,
                meta.completeness,
                meta.license,
                meta.url,
                meta.logo,
                meta.citation,
                meta.contact,
                meta.creators.join("|"),
                meta.contributors.join("|"),
                meta.keywords.join("|"),
            ],
        )?;
        Ok(())
    }

    fn insert_references(&mut self, refs: &[Reference]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO reference (col__id, col__type, col__author, col__title, \
                 col__container_title, col__volume, col__issue, col__page, col__issued, \
                 col__doi, col__isbn, col__publisher, col__citation, col__remarks) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            )?;
            for r in refs {
                stmt.execute(params![
                    r.id.to_string(),
                    r.ref_type,
                    r.author,
                    r.title,
                    r.container_title,
                    r.volume,
                    r.issue,
                    r.page,
                    r.issued,
                    r.doi,
                    r.isbn,
                    r.publisher,
                    r.citation,
                    r.remarks,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_name_usages(&mut self, usages: &[NameUsage]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO name_usage (col__id, col__parent_id, col__alternative_id, \
                 col__basionym_id, col__reference_id, col__scientific_name, \
                 col__scientific_name_string, col__authorship, gn__uninomial, gn__genus, \
                 gn__subgenus, gn__species, gn__infraspecies, gn__cultivar_epithet, \
                 col__taxonomic_status, col__name_status, col__kingdom, col__phylum, col__class, \
                 col__subclass, col__order, col__superfamily, col__family, col__subfamily, \
                 col__tribe, col__subtribe, col__section, gn__rank, col__extinct, col__code, \
                 col__link, col__modified, col__scrutinizer, col__temporal_range_start, \
                 col__temporal_range_end, col__name_phrase, col__remarks, \
                 col__published_in_page, col__published_in_year) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,\
                 ?21,?22,?23,?24,?25,?26,?27,?28,?29,?30,?31,?32,?33,?34,?35,?36,?37,?38)",
            )?;
            for u in usages {
                stmt.execute(params![
                    u.id.to_string(),
                    Self::uuid_or_empty(u.parent_id),
                    u.alternative_id,
                    u.basionym_id.map(|i| i.to_string()),
                    u.reference_id.map(|i| i.to_string()),
                    u.scientific_name,
                    u.scientific_name_string,
                    u.authorship,
                    u.uninomial,
                    u.genus,
                    u.subgenus,
                    u.species,
                    u.infraspecies,
                    u.cultivar_epithet,
                    format!("{:?}", u.taxonomic_status),
                    format!("{:?}", u.name_status),
                    u.kingdom,
                    u.phylum,
                    u.class,
                    u.subclass,
                    u.order,
                    u.superfamily,
                    u.family,
                    u.subfamily,
                    u.tribe,
                    u.subtribe,
                    u.section,
                    u.rank.map(|r| r.to_string()),
                    u.extinct,
                    u.code.to_string(),
                    u.link,
                    u.modified.map(|d| d.to_rfc3339()),
                    u.scrutinizer,
                    u.temporal_range_start,
                    u.temporal_range_end,
                    u.name_phrase,
                    u.remarks,
                    u.published_in_page,
                    u.published_in_year,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_vernaculars(&mut self, vernaculars: &[Vernacular]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO vernacular (col__taxon_id, col__name, col__language, col__country, \
                 col__remarks) VALUES (?1,?2,?3,?4,?5)",
            )?;
            for v in vernaculars {
                stmt.execute(params![v.taxon_id.to_string(), v.name, v.language, v.country, v.remarks])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_distributions(&mut self, distributions: &[Distribution]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO distribution (col__taxon_id, col__area, col__gazetteer) VALUES (?1,?2,?3)")?;
            for d in distributions {
                stmt.execute(params![d.taxon_id.to_string(), d.area, d.gazetteer])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_type_materials(&mut self, materials: &[TypeMaterial]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO type_material (col__id, col__name_id, col__reference_id, \
                 col__latitude, col__longitude, col__collector, col__date, col__institution_code) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?;
            for m in materials {
                stmt.execute(params![
                    m.id.to_string(),
                    m.name_id.to_string(),
                    m.reference_id.map(|i| i.to_string()),
                    m.latitude,
                    m.longitude,
                    m.collector,
                    m.date,
                    m.institution_code,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Links species-group synonyms/accepted names that share a
    /// `canonical_stemmed + original_authorship` basionym key back to
    /// their original combination, per the WorldPlants/ITIS basionym
    /// inference described in the conversion notes. Rows whose key
    /// collides with another row's are left unlinked.
    fn infer_basionyms(&mut self, opts: BasionymInferenceOptions) -> Result<(), Error> {
        if !opts.create_original_combinations {
            return Ok(());
        }

        let mut stmt = self.conn.prepare(
            "SELECT col__id, col__scientific_name, col__authorship, col__basionym_id FROM name_usage",
        )?;
        let rows: Vec<(String, String, Option<String>, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        use std::collections::HashMap;
        let mut lookup: HashMap<String, String> = HashMap::new();
        let mut blacklist: std::collections::HashSet<String> = Default::default();

        for (id, name, authorship, _) in &rows {
            let is_combination = authorship.as_deref().map(|a| a.starts_with('(')).unwrap_or(false);
            if is_combination {
                continue;
            }
            let key = format!("{name}_{}", authorship.clone().unwrap_or_default());
            if blacklist.contains(&key) {
                continue;
            }
            if let Some(existing) = lookup.get(&key) {
                if existing != id {
                    blacklist.insert(key.clone());
                    lookup.remove(&key);
                    continue;
                }
            }
            lookup.insert(key, id.clone());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE name_usage SET col__basionym_id = ?1 WHERE col__id = ?2")?;
            for (id, name, authorship, basionym_id) in &rows {
                if opts.skip_if_relations_exist && basionym_id.as_deref().map(|s| !s.is_empty()).unwrap_or(false) {
                    continue;
                }
                let is_combination = authorship.as_deref().map(|a| a.starts_with('(')).unwrap_or(false);
                if !is_combination {
                    continue;
                }
                let key = format!("{name}_{}", authorship.clone().unwrap_or_default());
                if let Some(basionym) = lookup.get(&key) {
                    if basionym != id {
                        stmt.execute(params![basionym, id])?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn export(&mut self, output_path: &Path, zip: bool) -> Result<(), Error> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if zip {
            let file = std::fs::File::create(output_path)?;
            let mut writer = zip::ZipWriter::new(file);
            let options =
                zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            writer.start_file("archive.sqlite", options)?;
            let bytes = std::fs::read(&self.db_path)?;
            std::io::Write::write_all(&mut writer, &bytes)?;
            writer.finish()?;
        } else {
            std::fs::copy(&self.db_path, output_path)?;
        }

        info!(output = %output_path.display(), zip, "archive exported");
        Ok(())
    }

    fn close(self) -> Result<(), Error> {
        drop(self.conn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use uuid::Uuid;

    use super::*;
    use crate::model::NameUsage;

    #[test]
    fn create_lays_out_the_schema() {
        let dir = tempdir().unwrap();
        let mut archive = SqliteArchive::create(dir.path()).unwrap();
        let meta = Meta {
            key: "1".into(),
            title: "Test Dataset".into(),
            ..Default::default()
        };
        archive.insert_meta(&meta).unwrap();

        let mut usage = NameUsage::new(Uuid::new_v4());
        usage.scientific_name = "Canis lupus".into();
        usage.sync_scientific_name_string();
        archive.insert_name_usages(&[usage]).unwrap();

        let count: i64 = archive.conn.query_row("SELECT COUNT(*) FROM name_usage", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn export_wraps_in_zip_when_requested() {
        let dir = tempdir().unwrap();
        let mut archive = SqliteArchive::create(dir.path()).unwrap();
        let out = dir.path().join("out.zip");
        archive.export(&out, true).unwrap();
        assert!(out.is_file());
    }
}
