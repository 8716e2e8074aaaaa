//! NCBI Taxonomy adapter (C17). Reads the `names.dmp`/`nodes.dmp`
//! pair out of the taxdump archive: names are collected first into a
//! per-taxon name-class map, then nodes are walked to assemble each
//! accepted usage together with its vernacular names and synonyms.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use tracing::info;
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::config::Config;
use crate::errors::Error;
use crate::model::{DatasetDescriptor, Meta, NameUsage, TaxonomicRank, TaxonomicStatus, Vernacular, ID_NAMESPACE};
use crate::names::{NameParser, RuleBasedNameParser};

const VERN_CLASSES: &[&str] = &["common name", "genbank common name"];
const NAME_CLASSES: &[&str] = &["valid", "authority"];

pub struct Ncbi {
    base: BaseAdapter,
}

struct Synonym {
    name: String,
}

struct Datum {
    taxon_id: String,
    parent_id: String,
    canonical: String,
    name_str: String,
    rank: String,
    vern_names: Vec<String>,
    synonyms: Vec<Synonym>,
}

impl Ncbi {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("ncbi", "National Center for Biotechnology Information")
            .with_url("https://ftp.ncbi.nlm.nih.gov/pub/taxonomy/taxdump.tar.gz");
        Self { base: BaseAdapter::new(descriptor) }
    }

    /// Parses `names.dmp` into `taxon_id -> name_class -> name`, folding
    /// `scientific name` into the `valid` class the rest of the adapter
    /// keys off.
    ///
    /// A reader thread splits each line and sends it over a bounded
    /// channel; this thread (the consumer) folds rows into the map.
    /// The channel's backpressure means the reader never gets more
    /// than one buffered row ahead, the same producer/consumer shape
    /// GRIN's table loader uses for its own dump files.
    fn collect_names(path: &Path) -> Result<HashMap<String, HashMap<String, String>>, Error> {
        let file = File::open(path)?;
        let (tx, rx) = mpsc::sync_channel::<(String, String, String)>(256);

        let reader_handle = thread::spawn(move || -> Result<(), Error> {
            for line in BufReader::new(file).lines() {
                let line = line?;
                let line = line.trim_end_matches("\t|");
                let fields: Vec<&str> = line.split("\t|\t").collect();
                if fields.len() != 4 {
                    return Err(Error::ParseFailed(format!(
                        "wrong number of names.dmp fields: {}: {line}",
                        fields.len()
                    )));
                }
                let id = fields[0].to_string();
                let name = fields[1].to_string();
                let mut class = fields[3].to_string();
                if class == "scientific name" {
                    class = "valid".to_string();
                }
                if tx.send((id, name, class)).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut names: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (id, name, class) in rx {
            names.entry(id).or_default().insert(class, name);
        }

        reader_handle.join().map_err(|_| Error::ParseFailed("names.dmp reader thread panicked".into()))??;
        Ok(names)
    }

    /// Walks `nodes.dmp`, keeping only taxa that have a `valid` name
    /// and collapsing the root's self-parent loop the way the dump
    /// represents taxon 1. Same reader-thread/bounded-channel split as
    /// [`Ncbi::collect_names`]; the consumer here does the heavier
    /// work of joining against the name-class map, which is exactly
    /// the kind of imbalance bounded backpressure is meant to absorb.
    fn collect_nodes(path: &Path, names: &HashMap<String, HashMap<String, String>>) -> Result<Vec<Datum>, Error> {
        let file = File::open(path)?;
        let (tx, rx) = mpsc::sync_channel::<(String, String, String)>(256);

        let reader_handle = thread::spawn(move || -> Result<(), Error> {
            for line in BufReader::new(file).lines() {
                let line = line?;
                let line = line.trim_end_matches("\t|");
                let fields: Vec<&str> = line.split("\t|\t").collect();
                if fields.len() != 13 {
                    return Err(Error::ParseFailed(format!(
                        "wrong number of nodes.dmp fields: {}: {line}",
                        fields.len()
                    )));
                }
                let id = fields[0].to_string();
                let parent_id = fields[1].to_string();
                let rank = fields[2].to_string();
                if tx.send((id, parent_id, rank)).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut data = Vec::new();
        for (id, mut parent_id, mut rank) in rx {
            if id == "1" {
                continue;
            }
            if rank == "no rank" {
                rank = String::new();
            }
            if parent_id == "1" {
                parent_id = id.clone();
            }

            let Some(classes) = names.get(&id) else { continue };
            let Some(canonical) = classes.get("valid") else { continue };

            let mut vern_names = Vec::new();
            let mut synonyms = Vec::new();
            for (class, name) in classes {
                if NAME_CLASSES.contains(&class.as_str()) {
                    continue;
                }
                if VERN_CLASSES.contains(&class.as_str()) {
                    vern_names.push(name.clone());
                } else if class == "synonym" {
                    synonyms.push(Synonym { name: name.clone() });
                }
            }

            let name_str = classes.get("authority").cloned().unwrap_or_else(|| canonical.clone());

            data.push(Datum {
                taxon_id: id,
                parent_id,
                canonical: canonical.clone(),
                name_str,
                rank,
                vern_names,
                synonyms,
            });
        }

        reader_handle.join().map_err(|_| Error::ParseFailed("nodes.dmp reader thread panicked".into()))??;
        Ok(data)
    }

    fn import_meta(sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let meta = Meta {
            key: "ncbi".into(),
            title: "National Center for Biotechnology Information".into(),
            alias: Some("NCBI".into()),
            description: Some(
                "The National Center for Biotechnology Information advances science and health \
                 by providing access to biomedical and genomic information."
                    .into(),
            ),
            url: Some("https://www.ncbi.nlm.nih.gov/".into()),
            license: Some("CC0".into()),
            taxonomic_scope: Some("All life".into()),
            keywords: vec!["taxonomy".into(), "biodiversity".into(), "species".into(), "nomenclature".into()],
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }

    fn import_name_usages(data: &[Datum], sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let parser = RuleBasedNameParser;
        let mut usages = Vec::new();
        let mut verns = Vec::new();
        let mut rejected = 0usize;
        let mut rejected_syn = 0usize;

        for d in data {
            let taxon_uuid = Uuid::new_v5(&ID_NAMESPACE, format!("ncbi-{}", d.taxon_id).as_bytes());
            let parsed = parser.parse_name(&d.canonical);
            if !matches!(parsed.parse_quality, 1 | 2 | 3) && !parsed.virus {
                rejected += 1;
                continue;
            }

            let mut usage = NameUsage::new(taxon_uuid);
            usage.scientific_name = d.canonical.clone();
            usage.scientific_name_string = d.name_str.clone();
            usage.rank = Some(parse_rank(&d.rank));
            usage.taxonomic_status = TaxonomicStatus::Accepted;
            if d.parent_id != d.taxon_id {
                usage.parent_id = Some(Uuid::new_v5(&ID_NAMESPACE, format!("ncbi-{}", d.parent_id).as_bytes()));
            }
            usages.push(usage);

            for v in &d.vern_names {
                verns.push(Vernacular { taxon_id: taxon_uuid, name: v.clone(), language: "eng".into(), ..Default::default() });
            }

            for syn in &d.synonyms {
                let parsed = parser.parse_name(&syn.name);
                if !matches!(parsed.parse_quality, 1 | 2 | 3) && !parsed.virus {
                    rejected_syn += 1;
                    continue;
                }
                let mut syn_usage = NameUsage::new(Uuid::new_v5(&ID_NAMESPACE, format!("ncbi-syn-{}", syn.name).as_bytes()));
                syn_usage.scientific_name = syn.name.clone();
                syn_usage.sync_scientific_name_string();
                syn_usage.taxonomic_status = TaxonomicStatus::Synonym;
                syn_usage.parent_id = Some(taxon_uuid);
                usages.push(syn_usage);
            }
        }

        info!(imported = usages.len(), rejected, rejected_syn, "NCBI name usages parsed");
        sink.insert_name_usages(&usages)?;
        sink.insert_vernaculars(&verns)?;
        Ok(())
    }
}

/// Best-effort mapping of the free-text `nodes.dmp` rank column onto
/// the shared rank vocabulary. Unrecognized and blank ("no rank")
/// values fall back to `Unranked`.
fn parse_rank(rank: &str) -> TaxonomicRank {
    match rank {
        "superkingdom" => TaxonomicRank::Kingdom,
        "kingdom" => TaxonomicRank::Kingdom,
        "subkingdom" => TaxonomicRank::Subkingdom,
        "phylum" => TaxonomicRank::Phylum,
        "subphylum" => TaxonomicRank::Subphylum,
        "superclass" => TaxonomicRank::Superclass,
        "class" => TaxonomicRank::Class,
        "subclass" => TaxonomicRank::Subclass,
        "superorder" => TaxonomicRank::Superorder,
        "order" => TaxonomicRank::Order,
        "suborder" => TaxonomicRank::Suborder,
        "superfamily" => TaxonomicRank::Superfamily,
        "family" => TaxonomicRank::Family,
        "subfamily" => TaxonomicRank::Subfamily,
        "tribe" => TaxonomicRank::Tribe,
        "subtribe" => TaxonomicRank::Subtribe,
        "genus" => TaxonomicRank::Genus,
        "subgenus" => TaxonomicRank::Subgenus,
        "species group" | "species" => TaxonomicRank::Species,
        "subspecies" => TaxonomicRank::Subspecies,
        "varietas" => TaxonomicRank::Variety,
        "forma" => TaxonomicRank::Form,
        _ => TaxonomicRank::Unranked,
    }
}

impl SourceAdapter for Ncbi {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        Self::import_meta(sink)?;

        let names = Self::collect_names(&cfg.extract_dir.join("names.dmp"))?;
        let data = Self::collect_nodes(&cfg.extract_dir.join("nodes.dmp"), &names)?;

        Self::import_name_usages(&data, sink)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_ranks() {
        assert_eq!(parse_rank("genus"), TaxonomicRank::Genus);
        assert_eq!(parse_rank("no rank"), TaxonomicRank::Unranked);
    }

    #[test]
    fn rejects_only_outside_the_accepted_quality_band() {
        let parser = RuleBasedNameParser;
        assert!(matches!(parser.parse_name("Canis lupus").parse_quality, 1 | 2 | 3));
        assert_eq!(parser.parse_name("   ").parse_quality, 0);
    }

    #[test]
    fn collect_names_folds_scientific_name_into_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.dmp");
        std::fs::write(&path, "9606\t|\tHomo sapiens\t|\t\t|\tscientific name\t|\n").unwrap();
        let names = Ncbi::collect_names(&path).unwrap();
        assert_eq!(names["9606"]["valid"], "Homo sapiens");
    }

    #[test]
    fn collect_nodes_skips_taxa_without_a_valid_name() {
        let dir = tempfile::tempdir().unwrap();
        let names_path = dir.path().join("names.dmp");
        std::fs::write(&names_path, "2\t|\tBacteria\t|\t\t|\tscientific name\t|\n").unwrap();
        let names = Ncbi::collect_names(&names_path).unwrap();

        let nodes_path = dir.path().join("nodes.dmp");
        std::fs::write(
            &nodes_path,
            "2\t|\t1\t|\tsuperkingdom\t|\t\t|\t0\t|\t0\t|\t11\t|\t0\t|\t0\t|\t0\t|\t0\t|\t0\t|\t\t|\n\
             3\t|\t2\t|\tgenus\t|\t\t|\t0\t|\t0\t|\t11\t|\t0\t|\t0\t|\t0\t|\t0\t|\t0\t|\t\t|\n",
        )
        .unwrap();
        let data = Ncbi::collect_nodes(&nodes_path, &names).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].taxon_id, "2");
    }
}
