//! Paleobiology Database adapter (C16). Pulls three flat files off the
//! PBDB REST API (taxon list, reference list, specimen list) instead of
//! a single archive download, and joins them the way the other HTTP-API
//! sources (ION, GRIN) join their own flat exports.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::config::Config;
use crate::errors::Error;
use crate::model::{
    BasionymInferenceOptions, DatasetDescriptor, Meta, NameUsage, Reference, TaxonomicRank,
    TaxonomicStatus, TypeMaterial, Vernacular, ID_NAMESPACE,
};

const API_BASE: &str = "https://paleobiodb.org/data1.2";

pub struct PaleoDb {
    base: BaseAdapter,
}

impl PaleoDb {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("paleodb", "Paleobiology Database").with_url(API_BASE);
        Self { base: BaseAdapter::new(descriptor) }
    }

    fn taxa_url() -> String {
        format!(
            "{API_BASE}/taxa/list.csv?all_taxa=true&show=attr,app,common,parent,immparent,\
             classext,ecospace,ttaph,img,ref,refattr,ent,entname,crmod"
        )
    }

    fn refs_url() -> String {
        format!("{API_BASE}/references/list.json?all_records=true")
    }

    fn specs_url() -> String {
        format!("{API_BASE}/specs/list.csv?all_records=true")
    }

    fn fetch(url: &str) -> Result<String, Error> {
        ureq::get(url)
            .call()
            .map_err(|e| Error::DownloadFailed(format!("{url}: {e}")))?
            .into_string()
            .map_err(|e| Error::DownloadFailed(format!("{url}: {e}")))
    }

    fn import_meta(cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let meta = Meta {
            key: "paleodb".into(),
            title: "The Paleobiology Database".into(),
            alias: Some("Paleobiodb".into()),
            description: Some(
                "The Paleobiology Database is an online, non-governmental, non-profit public \
                 resource for paleontological data. It is organized and operated by a \
                 multi-disciplinary, multi-institutional, international group of \
                 paleobiological researchers."
                    .into(),
            ),
            url: Some("https://paleobiodb.org".into()),
            issued: cfg.issued_date.clone(),
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }

    /// Reads `taxon.csv`, returning the taxon ids used by type materials
    /// (`specimen_no -> [taxon_id]`) so [`Self::import_type_materials`]
    /// can join without a second pass over the taxon list.
    fn import_name_usages(
        extract_dir: &Path,
        batch_size: usize,
        sink: &mut dyn ArchiveSink,
    ) -> Result<HashMap<String, Vec<Uuid>>, Error> {
        let mut reader = csv::Reader::from_path(extract_dir.join("taxon.csv"))?;
        let mut types: HashMap<String, Vec<Uuid>> = HashMap::new();

        let mut usages = Vec::with_capacity(batch_size);
        let mut verns = Vec::new();

        let flush = |usages: &mut Vec<NameUsage>, verns: &mut Vec<Vernacular>, sink: &mut dyn ArchiveSink| -> Result<(), Error> {
            if !usages.is_empty() {
                sink.insert_name_usages(usages)?;
                usages.clear();
            }
            if !verns.is_empty() {
                sink.insert_vernaculars(verns)?;
                verns.clear();
            }
            Ok(())
        };

        for record in reader.deserialize() {
            let row: TaxonRow = record?;

            let id = Uuid::new_v5(&ID_NAMESPACE, format!("paleodb-{}", row.orig_no).as_bytes());

            let mut status = TaxonomicStatus::Accepted;
            let mut parent_no = row.parent_no.clone();
            if row.accepted_no != row.orig_no {
                parent_no = row.accepted_no.clone();
                status = TaxonomicStatus::Synonym;
            }
            let parent_id = (!parent_no.is_empty() && parent_no != "0")
                .then(|| Uuid::new_v5(&ID_NAMESPACE, format!("paleodb-{parent_no}").as_bytes()));

            let mut usage = NameUsage::new(id);
            usage.parent_id = parent_id;
            usage.alternative_id = Some(row.taxon_no.clone());
            usage.scientific_name = row.taxon_name.clone();
            usage.authorship = non_empty(row.taxon_attr.clone());
            usage.sync_scientific_name_string();
            usage.rank = Some(parse_rank(&row.accepted_rank));
            usage.taxonomic_status = status;
            usage.name_phrase = non_empty(row.difference.clone());
            usage.reference_id =
                non_empty(row.reference_no.clone()).map(|r| Uuid::new_v5(&ID_NAMESPACE, format!("paleodb-ref-{r}").as_bytes()));
            usage.temporal_range_start = non_empty(row.early_interval.clone());
            usage.temporal_range_end = non_empty(row.late_interval.clone());
            usage.genus = non_empty(row.genus.clone());
            usage.family = non_empty(row.family.clone());
            usage.order = non_empty(row.order.clone());
            usage.class = non_empty(row.class.clone());
            usage.phylum = non_empty(row.phylum.clone());
            usage.extinct = row.is_extant.as_deref() == Some("extinct");

            if let Some(vern) = non_empty(row.common_name.clone()) {
                if usage.taxonomic_status != TaxonomicStatus::Synonym {
                    verns.push(Vernacular { taxon_id: id, name: vern, language: "eng".into(), ..Default::default() });
                }
            }

            if let Some(spec) = non_empty(row.type_specimen.clone()) {
                for specimen_no in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
                    types.entry(specimen_no.to_string()).or_default().push(id);
                }
            }

            usages.push(usage);
            if usages.len() >= batch_size {
                flush(&mut usages, &mut verns, sink)?;
            }
        }
        flush(&mut usages, &mut verns, sink)?;

        Ok(types)
    }

    fn import_references(extract_dir: &Path, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let body = std::fs::read_to_string(extract_dir.join("ref.json"))?;
        let parsed: RefsResponse = serde_json::from_str(&body)?;

        let refs: Vec<Reference> = parsed
            .records
            .into_iter()
            .map(|r| {
                let authors = r
                    .author
                    .iter()
                    .map(|a| format!("{} {}", a.firstname, a.lastname).trim().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let citation = [authors.clone(), format!("({})", r.year), format!("{}.", r.title)]
                    .into_iter()
                    .filter(|s| !s.is_empty() && *s != "().")
                    .collect::<Vec<_>>()
                    .join(" ");
                Reference {
                    id: Uuid::new_v5(&ID_NAMESPACE, format!("paleodb-ref-{}", r.id).as_bytes()),
                    ref_type: non_empty(r.kind),
                    author: non_empty(authors),
                    title: non_empty(r.title),
                    volume: non_empty(r.volume),
                    issue: non_empty(r.number),
                    page: non_empty(r.pages),
                    issued: non_empty(r.year),
                    isbn: non_empty(r.isbn),
                    publisher: non_empty(r.publisher),
                    doi: r.identifier.filter(|i| i.kind == "doi").map(|i| i.id),
                    citation: non_empty(citation),
                    ..Default::default()
                }
            })
            .collect();

        sink.insert_references(&refs)
    }

    fn import_type_materials(
        extract_dir: &Path,
        types: &HashMap<String, Vec<Uuid>>,
        sink: &mut dyn ArchiveSink,
    ) -> Result<(), Error> {
        let mut reader = csv::Reader::from_path(extract_dir.join("spec.csv"))?;
        let mut materials = Vec::new();

        for record in reader.deserialize() {
            let row: SpecRow = record?;
            let Some(taxon_ids) = types.get(&row.specimen_no) else { continue };

            for &taxon_id in taxon_ids {
                materials.push(TypeMaterial {
                    id: Uuid::new_v5(&ID_NAMESPACE, format!("paleodb-spec-{}-{taxon_id}", row.specimen_no).as_bytes()),
                    name_id: taxon_id,
                    reference_id: non_empty(row.reference_no.clone())
                        .map(|r| Uuid::new_v5(&ID_NAMESPACE, format!("paleodb-ref-{r}").as_bytes())),
                    latitude: row.lat,
                    longitude: row.lng,
                    collector: non_empty(row.collectors.clone()),
                    date: non_empty(row.collection_dates.clone()),
                    institution_code: non_empty(row.museum.clone()),
                });
            }
        }

        sink.insert_type_materials(&materials)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Maps PBDB's `accepted_rank` onto the shared rank vocabulary. PBDB's
/// CSV export reports ranks as lowercase words; the API's JSON mode uses
/// the numeric codes in the comment below instead, which this also
/// accepts so a `--file` import of a JSON-derived CSV still resolves.
///
/// "subspecies" 2, "species" 3, "subgenus" 4, "genus" 5, "subtribe" 6,
/// "tribe" 7, "subfamily" 8, "family" 9, "superfamily" 10, "infraorder"
/// 11, "suborder" 12, "order" 13, "superorder" 14, "infraclass" 15,
/// "subclass" 16, "class" 17, "superclass" 18, "subphylum" 19, "phylum"
/// 20, "superphylum" 21, "subkingdom" 22, "kingdom" 23
fn parse_rank(rank: &str) -> TaxonomicRank {
    match rank {
        "2" | "subspecies" => TaxonomicRank::Subspecies,
        "3" | "species" => TaxonomicRank::Species,
        "4" | "subgenus" => TaxonomicRank::Subgenus,
        "5" | "genus" => TaxonomicRank::Genus,
        "6" | "subtribe" => TaxonomicRank::Subtribe,
        "7" | "tribe" => TaxonomicRank::Tribe,
        "8" | "subfamily" => TaxonomicRank::Subfamily,
        "9" | "family" => TaxonomicRank::Family,
        "10" | "superfamily" => TaxonomicRank::Superfamily,
        "12" | "suborder" => TaxonomicRank::Suborder,
        "13" | "order" => TaxonomicRank::Order,
        "16" | "subclass" => TaxonomicRank::Subclass,
        "17" | "class" => TaxonomicRank::Class,
        "19" | "subphylum" => TaxonomicRank::Subphylum,
        "20" | "phylum" => TaxonomicRank::Phylum,
        "22" | "subkingdom" => TaxonomicRank::Subkingdom,
        "23" | "kingdom" => TaxonomicRank::Kingdom,
        _ => TaxonomicRank::Unranked,
    }
}

impl SourceAdapter for PaleoDb {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn download(&self, cfg: &Config) -> Result<PathBuf, Error> {
        std::fs::create_dir_all(&cfg.download_dir)?;
        let body = Self::fetch(&Self::taxa_url())?;
        let path = cfg.download_dir.join("taxon.csv");
        std::fs::write(&path, body)?;
        Ok(path)
    }

    fn extract(&self, cfg: &Config, path: &Path) -> Result<(), Error> {
        std::fs::create_dir_all(&cfg.extract_dir)?;
        std::fs::copy(path, cfg.extract_dir.join("taxon.csv"))?;

        let refs = Self::fetch(&Self::refs_url())?;
        std::fs::write(cfg.extract_dir.join("ref.json"), refs)?;

        let specs = Self::fetch(&Self::specs_url())?;
        std::fs::write(cfg.extract_dir.join("spec.csv"), specs)?;

        Ok(())
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        info!("Importing Meta");
        Self::import_meta(cfg, sink)?;

        info!("Importing Name Usages");
        let types = Self::import_name_usages(&cfg.extract_dir, cfg.batch_size, sink)?;

        info!("Importing References");
        Self::import_references(&cfg.extract_dir, sink)?;

        info!("Importing Type Materials");
        Self::import_type_materials(&cfg.extract_dir, &types, sink)?;

        sink.infer_basionyms(BasionymInferenceOptions {
            skip_if_relations_exist: true,
            create_original_combinations: false,
        })?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TaxonRow {
    orig_no: String,
    #[serde(default)]
    taxon_no: String,
    #[serde(default)]
    parent_no: String,
    #[serde(default)]
    accepted_no: String,
    taxon_name: String,
    #[serde(default)]
    taxon_attr: String,
    #[serde(default)]
    accepted_rank: String,
    #[serde(default)]
    difference: String,
    #[serde(default)]
    common_name: String,
    #[serde(default)]
    reference_no: String,
    #[serde(default)]
    early_interval: String,
    #[serde(default)]
    late_interval: String,
    #[serde(default)]
    genus: String,
    #[serde(default)]
    family: String,
    #[serde(default)]
    order: String,
    #[serde(default)]
    class: String,
    #[serde(default)]
    phylum: String,
    #[serde(default)]
    is_extant: Option<String>,
    #[serde(default)]
    type_specimen: String,
}

#[derive(Debug, Deserialize)]
struct SpecRow {
    #[serde(default)]
    specimen_no: String,
    #[serde(default)]
    reference_no: String,
    #[serde(default)]
    lng: Option<f64>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    collectors: String,
    #[serde(default)]
    collection_dates: String,
    #[serde(default)]
    museum: String,
}

#[derive(Debug, Deserialize)]
struct RefAuthor {
    #[serde(default)]
    firstname: String,
    #[serde(default)]
    lastname: String,
}

#[derive(Debug, Deserialize)]
struct RefIdentifier {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct RefRecord {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    year: String,
    #[serde(default)]
    author: Vec<RefAuthor>,
    #[serde(default)]
    volume: String,
    #[serde(default)]
    number: String,
    #[serde(default)]
    pages: String,
    #[serde(default)]
    isbn: String,
    #[serde(default)]
    publisher: String,
    identifier: Option<RefIdentifier>,
}

#[derive(Debug, Deserialize)]
struct RefsResponse {
    #[serde(default)]
    records: Vec<RefRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_numeric_and_word_ranks() {
        assert_eq!(parse_rank("5"), TaxonomicRank::Genus);
        assert_eq!(parse_rank("genus"), TaxonomicRank::Genus);
        assert_eq!(parse_rank("mystery"), TaxonomicRank::Unranked);
    }

    #[test]
    fn non_empty_maps_blank_strings_to_none() {
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("x".into()), Some("x".into()));
    }
}
