//! The unified data model written to every archive, regardless of source.
//!
//! Every adapter converges on these types before handing rows to the
//! [`crate::archive::ArchiveSink`]. Keeping the model in one place means the
//! invariants in the project's design notes (no orphan parents, synonyms
//! always point at an accepted row, deterministic identifiers) only need to
//! be checked against a single shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stable short id for a source, e.g. `"itis"`, `"wikispecies"`.
pub type Label = String;

/// Immutable metadata describing a single importable source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub label: Label,
    pub name: String,
    pub url: Option<String>,
    /// When true the user must stage a local file with `--file` since the
    /// source cannot be fetched automatically (login walls, manual exports).
    pub manual_steps: bool,
    pub notes: Option<String>,
}

impl DatasetDescriptor {
    pub fn new(label: &str, name: &str) -> Self {
        Self {
            label: label.to_string(),
            name: name.to_string(),
            url: None,
            manual_steps: false,
            notes: None,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn manual(mut self) -> Self {
        self.manual_steps = true;
        self
    }
}


/// Nomenclatural code governing a name's formation and priority rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NomenclaturalCode {
    Botanical,
    Zoological,
    Bacterial,
    Unknown,
}

impl Default for NomenclaturalCode {
    fn default() -> Self {
        NomenclaturalCode::Unknown
    }
}

impl std::fmt::Display for NomenclaturalCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NomenclaturalCode::Botanical => "ICN",
            NomenclaturalCode::Zoological => "ICZN",
            NomenclaturalCode::Bacterial => "ICNB",
            NomenclaturalCode::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomicStatus {
    Accepted,
    ProvisionallyAccepted,
    Synonym,
    AmbiguousSynonym,
    Misapplied,
}

impl TaxonomicStatus {
    pub fn is_synonym(&self) -> bool {
        matches!(
            self,
            TaxonomicStatus::Synonym | TaxonomicStatus::AmbiguousSynonym | TaxonomicStatus::Misapplied
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameStatus {
    Established,
    NotEstablished,
    Acceptable,
    Unacceptable,
    Manuscript,
    Doubtful,
    Rejected,
    Unknown,
}

impl Default for NameStatus {
    fn default() -> Self {
        NameStatus::Unknown
    }
}

/// Taxonomic rank. Ordered from coarsest to finest via [`TaxonomicRank::level`]
/// so that adapters building a hierarchy from an ordered file (ITIS's
/// `hierarchy` table, WorldPlants' rank-stack) can compare ranks positionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomicRank {
    Domain,
    Kingdom,
    Subkingdom,
    Phylum,
    Subphylum,
    Superclass,
    Class,
    Subclass,
    Superorder,
    Order,
    Suborder,
    Superfamily,
    Family,
    Subfamily,
    Supertribe,
    Tribe,
    Subtribe,
    Genus,
    Subgenus,
    Section,
    Subsection,
    Series,
    Species,
    Subspecies,
    Variety,
    Subvariety,
    Form,
    Subform,
    Cultivar,
    Unranked,
}

impl TaxonomicRank {
    /// Lower level == coarser rank. Used by the rank-stack algorithms to
    /// decide when to pop ancestors.
    pub fn level(&self) -> u8 {
        use TaxonomicRank::*;
        match self {
            Domain => 0,
            Kingdom => 1,
            Subkingdom => 2,
            Phylum => 3,
            Subphylum => 4,
            Superclass => 5,
            Class => 6,
            Subclass => 7,
            Superorder => 8,
            Order => 9,
            Suborder => 10,
            Superfamily => 11,
            Family => 12,
            Subfamily => 13,
            Supertribe => 14,
            Tribe => 15,
            Subtribe => 16,
            Genus => 17,
            Subgenus => 18,
            Section => 19,
            Subsection => 20,
            Series => 21,
            Species => 22,
            Subspecies => 23,
            Variety => 24,
            Subvariety => 25,
            Form => 26,
            Subform => 27,
            Cultivar => 28,
            Unranked => 255,
        }
    }

    pub fn is_species_or_below(&self) -> bool {
        self.level() >= TaxonomicRank::Species.level() && *self != TaxonomicRank::Unranked
    }

    pub fn is_infraspecific(&self) -> bool {
        self.level() > TaxonomicRank::Species.level() && *self != TaxonomicRank::Unranked
    }
}

impl std::fmt::Display for TaxonomicRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}


/// Result of parsing a verbatim scientific-name string, produced by the
/// [`crate::names::NameParser`] collaborator and the Wikispecies-specific
/// PEG parser ([`crate::sources::wikispecies::parser`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedName {
    pub canonical_simple: String,
    pub canonical_full: String,
    pub canonical_stemmed: String,

    pub authorship: Option<String>,
    pub combination_authorship: Option<String>,
    pub original_authorship: Option<String>,

    pub uninomial: Option<String>,
    pub genus: Option<String>,
    pub subgenus: Option<String>,
    pub species: Option<String>,
    pub infraspecies: Option<String>,
    pub cultivar_epithet: Option<String>,

    pub rank: Option<TaxonomicRank>,
    pub cardinality: u8,
    pub notho: Option<String>,
    pub virus: bool,
    pub hybrid: bool,
    pub surrogate: bool,

    pub parse_quality: u8,
}

/// Namespace UUID all deterministic identifiers in this crate derive from.
/// Distinct adapters further salt this with a stable label so that two
/// sources never collide even given the same verbatim string.
pub const ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x7b, 0x21, 0x3a, 0x9e, 0x5b, 0x0c, 0x4f, 0x2e, 0x9a, 0x61, 0x3d, 0x8e, 0x1a, 0x77, 0x42, 0xc5,
]);

impl ParsedName {
    /// UUID-v5 of the verbatim string under the fixed namespace, used as a
    /// stable per-string identifier independent of any particular adapter.
    pub fn verbatim_id(verbatim: &str) -> Uuid {
        Uuid::new_v5(&ID_NAMESPACE, verbatim.as_bytes())
    }

    pub fn is_unparseable(&self) -> bool {
        self.parse_quality == 0
    }
}


/// The central row type: "name N applied under classification C with status S".
#[derive(Debug, Clone, Default)]
pub struct NameUsage {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub alternative_id: Option<String>,
    pub basionym_id: Option<Uuid>,
    pub reference_id: Option<Uuid>,

    pub scientific_name: String,
    pub scientific_name_string: String,
    pub authorship: Option<String>,

    pub uninomial: Option<String>,
    pub genus: Option<String>,
    pub subgenus: Option<String>,
    pub species: Option<String>,
    pub infraspecies: Option<String>,
    pub cultivar_epithet: Option<String>,

    pub taxonomic_status: TaxonomicStatus,
    pub name_status: NameStatus,

    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub class: Option<String>,
    pub subclass: Option<String>,
    pub order: Option<String>,
    pub superfamily: Option<String>,
    pub family: Option<String>,
    pub subfamily: Option<String>,
    pub tribe: Option<String>,
    pub subtribe: Option<String>,
    pub section: Option<String>,

    pub rank: Option<TaxonomicRank>,

    pub extinct: bool,
    pub code: NomenclaturalCode,
    pub link: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub scrutinizer: Option<String>,
    pub temporal_range_start: Option<String>,
    pub temporal_range_end: Option<String>,
    pub name_phrase: Option<String>,
    pub remarks: Option<String>,
    pub published_in_page: Option<String>,
    pub published_in_year: Option<i32>,
}

impl NameUsage {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            taxonomic_status: TaxonomicStatus::Accepted,
            name_status: NameStatus::Unknown,
            code: NomenclaturalCode::Unknown,
            ..Default::default()
        }
    }

    /// `scientific_name_string` must equal `trim(scientific_name + " " + authorship)`
    /// whenever both are non-empty (invariant from the design notes' testable
    /// properties). Call this after setting both fields.
    pub fn sync_scientific_name_string(&mut self) {
        self.scientific_name_string = match &self.authorship {
            Some(authorship) if !authorship.is_empty() => {
                format!("{} {}", self.scientific_name, authorship).trim().to_string()
            }
            _ => self.scientific_name.clone(),
        };
    }
}


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reference {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub ref_type: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub container_title: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub page: Option<String>,
    pub issued: Option<String>,
    pub doi: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub citation: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vernacular {
    pub taxon_id: Uuid,
    pub name: String,
    /// ISO 639-3 code, empty when unknown.
    pub language: String,
    pub country: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Distribution {
    pub taxon_id: Uuid,
    pub area: String,
    pub gazetteer: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeMaterial {
    pub id: Uuid,
    pub name_id: Uuid,
    pub reference_id: Option<Uuid>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub collector: Option<String>,
    pub date: Option<String>,
    pub institution_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    pub key: String,
    pub title: String,
    pub alias: Option<String>,
    pub description: Option<String>,
    pub doi: Option<String>,
    pub issued: Option<String>,
    pub version: Option<String>,
    pub geographic_scope: Option<String>,
    pub taxonomic_scope: Option<String>,
    pub confidence: Option<String>,
    pub completeness: Option<String>,
    pub license: Option<String>,
    pub url: Option<String>,
    pub logo: Option<String>,
    pub citation: Option<String>,
    pub contact: Option<String>,
    #[serde(default)]
    pub creators: Vec<String>,
    #[serde(default)]
    pub contributors: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Options for [`crate::archive::ArchiveSink::infer_basionyms`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BasionymInferenceOptions {
    pub skip_if_relations_exist: bool,
    pub create_original_combinations: bool,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scientific_name_string_combines_name_and_authorship() {
        let mut usage = NameUsage::new(Uuid::nil());
        usage.scientific_name = "Canis lupus".to_string();
        usage.authorship = Some("L., 1758".to_string());
        usage.sync_scientific_name_string();
        assert_eq!(usage.scientific_name_string, "Canis lupus L., 1758");
    }

    #[test]
    fn scientific_name_string_without_authorship_is_just_the_name() {
        let mut usage = NameUsage::new(Uuid::nil());
        usage.scientific_name = "Canis lupus".to_string();
        usage.sync_scientific_name_string();
        assert_eq!(usage.scientific_name_string, "Canis lupus");
    }

    #[test]
    fn verbatim_id_is_deterministic() {
        let a = ParsedName::verbatim_id("Canis lupus L., 1758");
        let b = ParsedName::verbatim_id("Canis lupus L., 1758");
        assert_eq!(a, b);
    }

    #[test]
    fn rank_levels_increase_from_kingdom_to_subspecies() {
        assert!(TaxonomicRank::Kingdom.level() < TaxonomicRank::Genus.level());
        assert!(TaxonomicRank::Genus.level() < TaxonomicRank::Species.level());
        assert!(TaxonomicRank::Species.level() < TaxonomicRank::Subspecies.level());
    }
}
