//! GRIN Taxonomy adapter (C15). The upstream export is a folder of
//! tab-delimited `.txt` files, one per relational table with no
//! foreign-key typing at all. Rather than hand-roll joins over parsed
//! lines, every `.txt` is loaded into a scratch SQLite database first
//! and the adapter then runs ordinary SQL joins against it, the same
//! shape ITIS's conversion gets for free from an upstream SQLite file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::config::Config;
use crate::errors::Error;
use crate::model::{
    DatasetDescriptor, Meta, NameStatus, NameUsage, NomenclaturalCode, Reference, TaxonomicStatus, Vernacular,
    ID_NAMESPACE,
};

const NULL_SENTINEL: &str = "\\N";

pub struct Grin {
    base: BaseAdapter,
}

impl Grin {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("grin", "GRIN Plant Taxonomy")
            .with_url("https://uofi.box.com/shared/static/xob0fp0hw26hhz5lwdo421wspw9x8qbq.zip")
            .with_notes(
                "Create a zip file from \
                 https://npgsweb.ars-grin.gov/gringlobal/uploads/documents/taxonomy_data.cab \
                 and upload it somewhere stable, then point --file at it.",
            )
            .manual();
        Self { base: BaseAdapter::new(descriptor) }
    }

    fn txt_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Loads one tab-delimited `.txt` file into a freshly created table
    /// named after the file (sans extension), with every column typed
    /// `TEXT`. The whole load runs inside a single transaction — the
    /// resolved reading of open question 9(a): no statement executes
    /// outside the transaction that begins the table's population.
    fn load_table(conn: &mut Connection, path: &Path) -> Result<usize, Error> {
        let table = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::UnknownFormat(path.display().to_string()))?
            .to_string();

        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();
        let header_line = lines.next().transpose()?.unwrap_or_default();
        let headers: Vec<String> = header_line.split('\t').map(|h| h.trim().to_string()).collect();

        let quoted: Vec<String> = headers.iter().map(|h| format!("\"{h}\"")).collect();
        let create = format!("CREATE TABLE \"{table}\" ({})", quoted.iter().map(|c| format!("{c} TEXT")).collect::<Vec<_>>().join(", "));

        let tx = conn.transaction()?;
        tx.execute(&create, [])?;

        let placeholders = vec!["?"; headers.len()].join(", ");
        let insert = format!("INSERT INTO \"{table}\" ({}) VALUES ({placeholders})", quoted.join(", "));

        // Producer/consumer: a reader thread streams split rows over a
        // bounded channel; this thread (the consumer) holds the only
        // reference to the connection and executes the prepared
        // statement, so the reader never outpaces it by more than one
        // buffered row.
        let (tx_chan, rx_chan) = mpsc::sync_channel::<Vec<String>>(256);
        let field_count = headers.len();
        let reader_handle = thread::spawn(move || -> Result<usize, std::io::Error> {
            let mut rows = 0usize;
            for line in lines {
                let line = line?;
                let fields: Vec<String> = line.split('\t').map(|s| s.to_string()).collect();
                rows += 1;
                if tx_chan.send(fields).is_err() {
                    break;
                }
            }
            Ok(rows)
        });

        let mut count = 0usize;
        {
            let mut stmt = tx.prepare(&insert)?;
            for mut row in rx_chan {
                row.resize(field_count, String::new());
                let values: Vec<String> =
                    row.into_iter().map(|v| if v == NULL_SENTINEL { String::new() } else { v }).collect();
                let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
                stmt.execute(params.as_slice())?;
                count += 1;
            }
        }

        reader_handle.join().map_err(|_| Error::ParseFailed(format!("reader thread for {table} panicked")))??;
        tx.commit()?;

        info!(table, rows = count, "GRIN table loaded");
        Ok(count)
    }

    fn build_scratch_db(extract_dir: &Path) -> Result<Connection, Error> {
        let db_path = extract_dir.join("grin.sqlite");
        if db_path.exists() {
            std::fs::remove_file(&db_path)?;
        }
        let mut conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA temp_store = MEMORY; PRAGMA journal_mode = WAL;")?;

        for path in Self::txt_files(extract_dir)? {
            Self::load_table(&mut conn, &path)?;
        }
        Ok(conn)
    }

    fn import_meta(cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let meta = Meta {
            key: "grin".into(),
            title: "GRIN Plant Taxonomy".into(),
            alias: Some("GRIN".into()),
            description: Some(
                "The Germplasm Resources Information Network taxonomy for plants, maintained \
                 by the USDA Agricultural Research Service."
                    .into(),
            ),
            url: Some("https://npgsweb.ars-grin.gov/gringlobal/taxon/taxonomysearch".into()),
            issued: cfg.issued_date.clone(),
            taxonomic_scope: Some("Plantae".into()),
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }

    /// `basionyms[current_taxonomy_species_id] = taxonomy_species_id`
    /// for every row flagged `synonym_code = 'B'`, mirroring the
    /// upstream lookup built before the main name-usage query runs.
    fn basionyms(conn: &Connection) -> Result<HashMap<String, String>, Error> {
        let mut stmt = conn.prepare(
            "SELECT taxonomy_species_id, current_taxonomy_species_id FROM taxonomy_species WHERE synonym_code = 'B'",
        )?;
        let mut map = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (basionym_id, current_id) = row?;
            map.insert(current_id, basionym_id);
        }
        Ok(map)
    }

    fn import_name_usages(conn: &Connection, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let basionyms = Self::basionyms(conn)?;

        let mut stmt = conn.prepare(
            "SELECT s.taxonomy_species_id, s.current_taxonomy_species_id, s.name, s.name_authority, \
             s.synonym_code, s.protologue, s.protologue_virtual_path, s.modified_date, \
             f.suprafamily_rank_code, f.suprafamily_rank_name, f.family_name, \
             f.subfamily_name, f.tribe_name, f.subtribe_name, \
             g.genus_name, g.subgenus_name, g.section_name \
             FROM taxonomy_species s \
             JOIN taxonomy_genus g ON g.taxonomy_genus_id = s.taxonomy_genus_id \
             JOIN taxonomy_family f ON f.taxonomy_family_id = g.taxonomy_family_id",
        )?;

        let mut usages = Vec::new();
        let mut refs: HashMap<String, Uuid> = HashMap::new();
        let progress = crate::progress::spinner("assembling GRIN name usages");

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, String>(12)?,
                row.get::<_, String>(13)?,
                row.get::<_, String>(14)?,
                row.get::<_, String>(15)?,
                row.get::<_, String>(16)?,
            ))
        })?;

        for row in rows {
            let (
                id,
                accepted_id,
                name,
                authority,
                synonym_code,
                protologue,
                protologue_url,
                modified,
                suprafamily_type,
                mut suprafamily,
                family,
                subfamily,
                tribe,
                subtribe,
                genus,
                subgenus,
                section,
            ) = row?;

            let (taxonomic_status, name_status) = grin_status(&id, &accepted_id, &synonym_code);

            let order = if suprafamily_type == "ORDER" {
                let taken = suprafamily.clone();
                suprafamily = String::new();
                non_empty(taken)
            } else {
                None
            };

            let reference_id = non_empty(protologue.clone()).map(|citation| {
                *refs.entry(citation.clone()).or_insert_with(|| Uuid::new_v5(&ID_NAMESPACE, citation.as_bytes()))
            });

            let link = protologue_url.starts_with("http").then_some(protologue_url).filter(|s| !s.is_empty());

            let node_id = Uuid::new_v5(&ID_NAMESPACE, format!("grin-{id}").as_bytes());
            let mut usage = NameUsage::new(node_id);
            usage.scientific_name = name.clone();
            usage.authorship = non_empty(authority);
            usage.sync_scientific_name_string();
            usage.parent_id = (id != accepted_id)
                .then(|| Uuid::new_v5(&ID_NAMESPACE, format!("grin-{accepted_id}").as_bytes()));
            usage.basionym_id = basionyms
                .get(&id)
                .map(|basionym_id| Uuid::new_v5(&ID_NAMESPACE, format!("grin-{basionym_id}").as_bytes()));
            usage.taxonomic_status = taxonomic_status;
            usage.name_status = name_status;
            usage.code = NomenclaturalCode::Botanical;
            usage.reference_id = reference_id;
            usage.order = order;
            usage.superfamily = non_empty(suprafamily);
            usage.family = non_empty(family);
            usage.subfamily = non_empty(subfamily);
            usage.tribe = non_empty(tribe);
            usage.subtribe = non_empty(subtribe);
            usage.genus = non_empty(genus);
            usage.subgenus = non_empty(subgenus);
            usage.section = non_empty(section);
            usage.link = link;
            usage.modified = chrono::DateTime::parse_from_rfc3339(&modified)
                .map(|d| d.with_timezone(&chrono::Utc))
                .ok();

            progress.inc(1);
            usages.push(usage);
        }
        progress.finish();

        info!(count = usages.len(), "GRIN name usages assembled");
        sink.insert_name_usages(&usages)?;

        let references: Vec<Reference> = refs
            .into_iter()
            .map(|(citation, id)| Reference { id, citation: Some(citation), ..Default::default() })
            .collect();
        sink.insert_references(&references)
    }

    fn import_vernaculars(conn: &Connection, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let mut stmt = conn.prepare(
            "SELECT name, language_description, taxonomy_species_id FROM taxonomy_common_name \
             WHERE taxonomy_species_id != ''",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut vernaculars = Vec::new();
        for row in rows {
            let (name, lang, taxon_id) = row?;
            let (language, country) = split_language(&lang);
            vernaculars.push(Vernacular {
                taxon_id: Uuid::new_v5(&ID_NAMESPACE, format!("grin-{taxon_id}").as_bytes()),
                name,
                language,
                country,
                remarks: non_empty(lang),
            });
        }
        sink.insert_vernaculars(&vernaculars)
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn grin_status(id: &str, accepted_id: &str, synonym_code: &str) -> (TaxonomicStatus, NameStatus) {
    if id == accepted_id {
        return (TaxonomicStatus::Accepted, NameStatus::Established);
    }
    match synonym_code {
        "Invalid" => (TaxonomicStatus::Synonym, NameStatus::Unacceptable),
        _ => (TaxonomicStatus::Synonym, NameStatus::Unknown),
    }
}

/// GRIN packs an optional parenthesized country after the language
/// name, e.g. `"Spanish (Mexico)"`. Neither half is normalized against
/// an ISO table upstream, so this passes the bare words through.
fn split_language(lang: &str) -> (String, Option<String>) {
    match lang.split_once('(') {
        Some((language, rest)) => {
            let country = rest.trim_end_matches(')').trim();
            (language.trim().to_string(), non_empty(country.to_string()))
        }
        None => (lang.trim().to_string(), None),
    }
}

impl SourceAdapter for Grin {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        info!("Importing GRIN data into a scratch SQLite database");
        let conn = Self::build_scratch_db(&cfg.extract_dir)?;

        Self::import_meta(cfg, sink)?;
        Self::import_name_usages(&conn, sink)?;
        Self::import_vernaculars(&conn, sink)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_accepted_only_when_self_referencing() {
        assert_eq!(grin_status("1", "1", "").0, TaxonomicStatus::Accepted);
        assert_eq!(grin_status("2", "1", "Invalid"), (TaxonomicStatus::Synonym, NameStatus::Unacceptable));
    }

    #[test]
    fn split_language_extracts_parenthesized_country() {
        assert_eq!(split_language("Spanish (Mexico)"), ("Spanish".to_string(), Some("Mexico".to_string())));
        assert_eq!(split_language("English"), ("English".to_string(), None));
    }

    #[test]
    fn load_table_creates_and_populates_from_a_tab_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy_species.txt");
        std::fs::write(&path, "taxonomy_species_id\tname\n1\tCanis lupus\n2\t\\N\n").unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        let count = Grin::load_table(&mut conn, &path).unwrap();
        assert_eq!(count, 2);

        let empty: String =
            conn.query_row("SELECT name FROM taxonomy_species WHERE taxonomy_species_id = '2'", [], |r| r.get(0)).unwrap();
        assert_eq!(empty, "");
    }
}
