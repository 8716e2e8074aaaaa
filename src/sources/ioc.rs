//! IOC World Bird List adapter (C18). The upstream export is a TSV
//! with three metadata lines glued on top of a sectioned hierarchy: a
//! row only fills in the ranks that changed since the previous row, so
//! the importer carries a rank-path accumulator forward and clears
//! anything deeper than the rank that just changed.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::config::Config;
use crate::errors::Error;
use crate::fetcher;
use crate::model::{DatasetDescriptor, Meta, NameUsage, NomenclaturalCode, TaxonomicRank, Vernacular, ID_NAMESPACE};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Preamble {
    citation: Option<String>,
    version: Option<String>,
    doi: Option<String>,
}

const RANKS: &[&str] =
    &["Class", "Infraclass", "Parvclass", "Order", "Family (Scientific)", "Genus", "Species (Scientific)", "Subspecies"];

pub struct Ioc {
    base: BaseAdapter,
}

impl Ioc {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("ioc", "IOC World Bird List")
            .with_url("https://uofi.box.com/shared/static/x9f7o161l81my22by0k8ov2kgfmuuunu.tsv")
            .with_notes(
                "Create the tsv file from the current master list at \
                 https://www.worldbirdnames.org/new/ioc-lists/master-list-2/, upload it \
                 somewhere stable, and point the url at it.",
            )
            .manual();
        Self { base: BaseAdapter::new(descriptor) }
    }

    /// Splits the title/citation preamble off the downloaded export,
    /// writing the remaining header-and-data tsv to `data.tsv` and the
    /// parsed citation metadata to `ioc_meta.json`, both inside
    /// `extract_dir`, so `to_archive` can read them back without
    /// re-touching the raw download.
    fn split_preamble(path: &Path, extract_dir: &Path) -> Result<(), Error> {
        let body = std::fs::read_to_string(path)?;
        let mut lines = body.lines();
        let _title = lines.next();
        let citation_line = lines.next().unwrap_or("");

        let re = Regex::new(r"\s+(.*)IOC World Bird List\s\(([^)]+)\)\. ?Doi\s(.*)\.\s*").expect("static regex is valid");
        let preamble = match re.captures(citation_line) {
            Some(caps) => Preamble {
                citation: caps.get(1).map(|m| m.as_str().trim().to_string()),
                version: caps.get(2).map(|m| m.as_str().to_string()),
                doi: caps.get(3).map(|m| m.as_str().to_string()),
            },
            None => Preamble::default(),
        };

        std::fs::write(extract_dir.join("data.tsv"), lines.collect::<Vec<_>>().join("\n"))?;
        std::fs::write(extract_dir.join("ioc_meta.json"), serde_json::to_string(&preamble)?)?;
        Ok(())
    }

    fn import_meta(cfg: &Config, preamble: Preamble, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let meta = Meta {
            key: "ioc".into(),
            title: "IOC World Bird List".into(),
            description: Some(
                "The IOC World Bird List is an open access resource of the international \
                 community of ornithologists. Our primary goal is to facilitate worldwide \
                 communication in ornithology and conservation based on an up-to-date \
                 evolutionary classification of world birds and a set of English names that \
                 follow explicit guidelines for spelling and construction."
                    .into(),
            ),
            url: Some("https://www.worldbirdnames.org".into()),
            issued: cfg.issued_date.clone(),
            citation: preamble.citation,
            version: preamble.version,
            doi: preamble.doi,
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }

    fn import_name_usages(data_path: &Path, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').flexible(true).from_path(data_path)?;
        let headers = reader.headers()?.clone();

        let mut path: HashMap<String, String> = HashMap::new();
        let mut rank = "Class".to_string();

        let mut usages = Vec::new();
        let mut verns = Vec::new();
        let mut count = 0usize;

        for record in reader.records() {
            let record = record?;
            let row: HashMap<String, String> =
                headers.iter().zip(record.iter()).map(|(h, v)| (h.to_string(), v.to_string())).collect();

            for &r in RANKS {
                if let Some(v) = row.get(r).filter(|v| !v.is_empty()) {
                    rank = r.to_string();
                    path.insert(r.to_string(), v.clone());
                    break;
                }
            }
            clear_deeper_ranks(&mut path, &rank);

            count += 1;
            let id = Uuid::new_v5(&ID_NAMESPACE, format!("ioc-{count}").as_bytes());

            let Some(usage) = build_usage(id, &rank, &path, row.get("Authority").map(String::as_str).unwrap_or("")) else {
                continue;
            };

            if let Some(eng) = row.get("Species (English)").filter(|v| !v.is_empty()) {
                verns.push(Vernacular { taxon_id: id, name: eng.clone(), language: "eng".into(), ..Default::default() });
            }

            usages.push(usage);
        }

        info!(count = usages.len(), "IOC name usages assembled");
        sink.insert_name_usages(&usages)?;
        sink.insert_vernaculars(&verns)?;
        Ok(())
    }
}

fn clear_deeper_ranks(path: &mut HashMap<String, String>, rank: &str) {
    let mut found = false;
    for &r in RANKS {
        if r == rank {
            found = true;
            continue;
        }
        if found {
            path.remove(r);
        }
    }
}

fn title_case_word(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn scientific_name(rank: &str, path: &HashMap<String, String>) -> String {
    if path.get("Genus").map(|s| s.is_empty()).unwrap_or(true) {
        for &r in &["Family (Scientific)", "Order", "Parvclass", "Infraclass", "Class"] {
            if let Some(v) = path.get(r).filter(|v| !v.is_empty()) {
                return title_case_word(v);
            }
        }
        return String::new();
    }
    let parts = [path.get("Genus"), path.get("Species (Scientific)"), path.get("Subspecies")];
    parts.into_iter().flatten().filter(|s| !s.is_empty()).cloned().collect::<Vec<_>>().join(" ")
}

fn rank_of(raw_rank: &str) -> TaxonomicRank {
    match raw_rank {
        "Species (Scientific)" => TaxonomicRank::Species,
        "Family (Scientific)" => TaxonomicRank::Family,
        "Order" => TaxonomicRank::Order,
        "Infraclass" => TaxonomicRank::Subclass,
        "Genus" => TaxonomicRank::Genus,
        "Subspecies" => TaxonomicRank::Subspecies,
        _ => TaxonomicRank::Unranked,
    }
}

fn build_usage(id: Uuid, rank: &str, path: &HashMap<String, String>, authority: &str) -> Option<NameUsage> {
    let name = scientific_name(rank, path);
    if name.is_empty() {
        return None;
    }

    let mut usage = NameUsage::new(id);
    usage.scientific_name = name.clone();
    usage.authorship = (!authority.is_empty()).then(|| authority.trim().to_string());
    usage.genus = path.get("Genus").filter(|s| !s.is_empty()).map(|s| title_case_word(s));
    usage.species = path.get("Species (Scientific)").cloned().filter(|s| !s.is_empty());
    usage.infraspecies = path.get("Subspecies").cloned().filter(|s| !s.is_empty());
    usage.family = path.get("Family (Scientific)").filter(|s| !s.is_empty()).map(|s| title_case_word(s));
    usage.order = path.get("Order").filter(|s| !s.is_empty()).map(|s| title_case_word(s));
    usage.subclass = path.get("Infraclass").filter(|s| !s.is_empty()).map(|s| title_case_word(s));
    usage.class = Some("Aves".into());
    usage.phylum = Some("Chordata".into());
    usage.kingdom = Some("Animalia".into());
    usage.code = NomenclaturalCode::Zoological;
    usage.extinct = name.contains('†');
    if usage.genus.is_none() {
        usage.uninomial = Some(name.clone());
    }
    usage.sync_scientific_name_string();
    usage.scientific_name_string = usage.scientific_name_string.replace('†', "").trim().to_string();
    usage.rank = Some(rank_of(rank));

    Some(usage)
}

impl SourceAdapter for Ioc {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn extract(&self, cfg: &Config, path: &Path) -> Result<(), Error> {
        fetcher::extract_into(path, &cfg.extract_dir)?;
        let raw_name = path.file_name().unwrap_or_default();
        Self::split_preamble(&cfg.extract_dir.join(raw_name), &cfg.extract_dir)
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let preamble_json = std::fs::read_to_string(cfg.extract_dir.join("ioc_meta.json"))?;
        let preamble: Preamble = serde_json::from_str(&preamble_json)?;

        Self::import_meta(cfg, preamble, sink)?;
        Self::import_name_usages(&cfg.extract_dir.join("data.tsv"), sink)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_genus_level_scientific_name() {
        let mut path = HashMap::new();
        path.insert("Genus".to_string(), "Struthio".to_string());
        path.insert("Species (Scientific)".to_string(), "camelus".to_string());
        assert_eq!(scientific_name("Species (Scientific)", &path), "Struthio camelus");
    }

    #[test]
    fn falls_back_to_higher_rank_when_genus_is_absent() {
        let mut path = HashMap::new();
        path.insert("Order".to_string(), "struthioniformes".to_string());
        assert_eq!(scientific_name("Order", &path), "Struthioniformes");
    }

    #[test]
    fn clear_deeper_ranks_drops_everything_past_the_matched_rank() {
        let mut path = HashMap::new();
        path.insert("Order".to_string(), "Struthioniformes".to_string());
        path.insert("Family (Scientific)".to_string(), "Struthionidae".to_string());
        path.insert("Genus".to_string(), "Struthio".to_string());
        clear_deeper_ranks(&mut path, "Order");
        assert!(!path.contains_key("Family (Scientific)"));
        assert!(!path.contains_key("Genus"));
    }
}
