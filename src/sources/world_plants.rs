//! WorldPlants adapter (C13). The upstream export is a pipe-delimited,
//! already-sorted-by-ancestor flat file: a taxon always appears after
//! every one of its ancestors, so the converter reconstructs the
//! hierarchy with a single pass and a rank stack instead of a second
//! lookup pass like ITIS's `hierarchy` join.
//!
//! WorldPlants ships two parallel checklists (ferns and seed plants)
//! under the same layout; `--world-plants-set` picks which one this
//! run converts (resolved design-notes open question: a flag, never an
//! interactive prompt).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::cache;
use crate::config::{Config, WorldPlantsSet};
use crate::errors::Error;
use crate::fetcher;
use crate::model::{
    DatasetDescriptor, Distribution, Meta, NameStatus, NameUsage, NomenclaturalCode, ParsedName, Reference,
    TaxonomicRank, TaxonomicStatus, Vernacular, ID_NAMESPACE,
};
use crate::names::{NameParser, RuleBasedNameParser};

pub struct WorldPlants {
    base: BaseAdapter,
}

impl WorldPlants {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("world-plants", "World Ferns / World Seed Plants")
            .with_url("http://www.worldplants.de/")
            .with_notes(
                "Provide a zip (or a directory) containing ferns.csv and the numbered plants.csv \
                 parts (1.csv, 2.csv, ...) with --file. Use --world-plants-set to choose which \
                 checklist (ferns or plants) this run converts.",
            )
            .manual();
        Self { base: BaseAdapter::new(descriptor) }
    }

    fn prepare_source_dir(cfg: &Config, path: &Path) -> Result<PathBuf, Error> {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        let staging = cfg.download_dir.join("world-plants-src");
        cache::empty_dir(&staging)?;
        fetcher::extract_into(path, &staging)?;
        Ok(staging)
    }

    fn validate_input_dir(dir: &Path) -> Result<(), Error> {
        if !dir.join("ferns.csv").is_file() {
            return Err(Error::UnknownFormat("world-plants input is missing ferns.csv".into()));
        }
        if find_numbered_files(dir)?.is_empty() {
            return Err(Error::UnknownFormat("world-plants input has no numbered N.csv files".into()));
        }
        Ok(())
    }

    fn prepare_ferns(source_dir: &Path, extract_dir: &Path) -> Result<(), Error> {
        std::fs::copy(source_dir.join("ferns.csv"), extract_dir.join("ferns.csv"))?;
        Ok(())
    }

    /// Concatenates the numbered parts in numeric order, keeping the
    /// header only from the first file.
    fn prepare_plants(source_dir: &Path, extract_dir: &Path) -> Result<(), Error> {
        let mut numbered = find_numbered_files(source_dir)?;
        numbered.sort_by_key(|(n, _)| *n);

        let mut out = String::new();
        for (i, (_, path)) in numbered.iter().enumerate() {
            let content = std::fs::read_to_string(path)?;
            if i == 0 {
                out.push_str(&content);
            } else {
                match content.find('\n') {
                    Some(idx) => out.push_str(&content[idx + 1..]),
                    None => {}
                }
            }
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        std::fs::write(extract_dir.join("plants.csv"), out)?;
        info!(parts = numbered.len(), "concatenated numbered plants.csv parts");
        Ok(())
    }

    fn import_meta(cfg: &Config, set: WorldPlantsSet, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let (key, title) = match set {
            WorldPlantsSet::Ferns => ("world-ferns", "World Ferns and Lycophytes"),
            WorldPlantsSet::Plants => ("world-plants", "World Seed Plants"),
        };
        let meta = Meta {
            key: key.into(),
            title: title.into(),
            description: Some(
                "A checklist of the ferns and lycophytes, or seed plants, of the world, \
                 maintained by Michael Hassler."
                    .into(),
            ),
            url: Some("http://www.worldplants.de/".into()),
            issued: cfg.issued_date.clone(),
            version: cfg.data_version.clone(),
            license: Some("CC-BY".into()),
            taxonomic_scope: Some("Plantae".into()),
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }
}

impl SourceAdapter for WorldPlants {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn extract(&self, cfg: &Config, path: &Path) -> Result<(), Error> {
        let source_dir = Self::prepare_source_dir(cfg, path)?;
        Self::validate_input_dir(&source_dir)?;
        std::fs::create_dir_all(&cfg.extract_dir)?;
        Self::prepare_ferns(&source_dir, &cfg.extract_dir)?;
        Self::prepare_plants(&source_dir, &cfg.extract_dir)?;
        Ok(())
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        Self::import_meta(cfg, cfg.world_plants_set, sink)?;

        let csv_name = match cfg.world_plants_set {
            WorldPlantsSet::Ferns => "ferns.csv",
            WorldPlantsSet::Plants => "plants.csv",
        };
        let csv_path = cfg.extract_dir.join(csv_name);

        let parser = RuleBasedNameParser;
        let (nodes, node_map) = build_hierarchy(&csv_path, &parser)?;
        info!(nodes = nodes.len(), "world-plants hierarchy built");

        let persistent_ids = generate_persistent_ids(&nodes, &node_map);

        let mut references: HashMap<String, Citation> = HashMap::new();
        let mut usages: Vec<NameUsage> = Vec::new();
        let mut distributions = Vec::new();
        let mut vernaculars = Vec::new();
        let mut basionyms: BasionymLookup = HashMap::new();
        let mut blacklist: HashSet<String> = HashSet::new();

        for (i, node) in nodes.iter().enumerate() {
            if (i + 1) % 1000 == 0 {
                info!(count = i + 1, total = nodes.len(), "world-plants nodes processed");
            }

            let Some(&persistent_id) = persistent_ids.get(&node.id) else { continue };

            let accepted = create_accepted_name_usage(node, persistent_id, &persistent_ids, &mut references);
            usages.push(accepted);

            if !node.verbatim_synonyms.is_empty() {
                let synonym_usages = process_synonyms(
                    &parser,
                    node,
                    persistent_id,
                    &mut references,
                    &mut basionyms,
                    &mut blacklist,
                );
                usages.extend(synonym_usages);
            }

            if !node.verbatim_distribution.is_empty() {
                distributions.push(Distribution {
                    taxon_id: persistent_id,
                    area: node.verbatim_distribution.trim().to_string(),
                    gazetteer: "text".into(),
                });
            }

            if !node.verbatim_vernacular_name.is_empty() {
                for name in node.verbatim_vernacular_name.split(',') {
                    let name = name.trim();
                    if !name.is_empty() {
                        vernaculars.push(Vernacular { taxon_id: persistent_id, name: name.to_string(), ..Default::default() });
                    }
                }
            }
        }

        link_basionyms(&parser, &mut usages, &basionyms);

        let mut seen_ids = HashSet::new();
        usages.retain(|u| seen_ids.insert(u.id));

        let refs: Vec<Reference> = references
            .into_values()
            .map(|c| Reference {
                id: c.id,
                author: if c.author.is_empty() { None } else { Some(c.author) },
                issued: if c.year.is_empty() { None } else { Some(c.year) },
                title: if c.title.is_empty() { None } else { Some(c.title) },
                citation: if c.citation.is_empty() { None } else { Some(c.citation) },
                ..Default::default()
            })
            .collect();

        info!(
            name_usages = usages.len(),
            references = refs.len(),
            distributions = distributions.len(),
            vernaculars = vernaculars.len(),
            "world-plants records assembled"
        );

        sink.insert_references(&refs)?;
        sink.insert_name_usages(&usages)?;
        sink.insert_distributions(&distributions)?;
        sink.insert_vernaculars(&vernaculars)?;

        Ok(())
    }
}

// --- hierarchy node and rank helpers -----------------------------------

#[derive(Debug, Clone)]
struct HNode {
    id: String,
    parent_id: String,
    verbatim_name: String,
    verbatim_citation: String,
    verbatim_distribution: String,
    verbatim_remarks: String,
    verbatim_synonyms: String,
    verbatim_vernacular_name: String,
    rank: TaxonomicRank,
    parsed: ParsedName,
    name_status: NameStatus,
    name_phrase: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Citation {
    id: Uuid,
    author: String,
    year: String,
    title: String,
    citation: String,
}

type BasionymLookup = HashMap<String, Uuid>;

fn csv_rank(token: &str) -> TaxonomicRank {
    match token.to_uppercase().as_str() {
        "K" | "KINGDOM" => TaxonomicRank::Kingdom,
        "C" | "CLASS" => TaxonomicRank::Class,
        "O" | "ORDER" => TaxonomicRank::Order,
        "_SO_" | "SUBORDER" => TaxonomicRank::Suborder,
        "F" | "FAMILY" => TaxonomicRank::Family,
        "SF" | "SUBFAMILY" => TaxonomicRank::Subfamily,
        "T" | "TRIBE" => TaxonomicRank::Tribe,
        "ST" | "SUBTRIBE" => TaxonomicRank::Subtribe,
        "G" | "GENUS" => TaxonomicRank::Genus,
        "_SG_" | "_SG2_" | "SUBGENUS" => TaxonomicRank::Subgenus,
        "S" | "SPECIES" => TaxonomicRank::Species,
        "SS" | "_SSP_" | "SUBSPECIES" => TaxonomicRank::Subspecies,
        "V" | "VARIETY" => TaxonomicRank::Variety,
        "_SV_" | "SUBVARIETY" => TaxonomicRank::Subvariety,
        "FM" | "_FM2_" | "FORM" => TaxonomicRank::Form,
        "_SF_2" | "SUBFORM" => TaxonomicRank::Subform,
        _ => TaxonomicRank::Unranked,
    }
}

/// The stack's notion of rank ordering, distinct from the crate-wide
/// [`TaxonomicRank::level`]: only the ranks this file actually carries
/// (Order..Unranked) are ordered; anything coarser (Kingdom, Class)
/// sorts as 0, coarser than everything, matching the upstream table.
fn rank_level(rank: TaxonomicRank) -> u8 {
    match rank {
        TaxonomicRank::Order => 1,
        TaxonomicRank::Suborder => 2,
        TaxonomicRank::Family => 3,
        TaxonomicRank::Subfamily => 4,
        TaxonomicRank::Tribe => 5,
        TaxonomicRank::Subtribe => 6,
        TaxonomicRank::Genus => 7,
        TaxonomicRank::Subgenus => 8,
        TaxonomicRank::Section => 9,
        TaxonomicRank::Species => 10,
        TaxonomicRank::Subspecies => 11,
        TaxonomicRank::Variety => 12,
        TaxonomicRank::Form => 13,
        TaxonomicRank::Subvariety => 14,
        TaxonomicRank::Subform => 15,
        TaxonomicRank::Unranked => 16,
        _ => 0,
    }
}

fn rank_group(rank: TaxonomicRank) -> &'static str {
    match rank {
        TaxonomicRank::Species
        | TaxonomicRank::Subspecies
        | TaxonomicRank::Variety
        | TaxonomicRank::Form
        | TaxonomicRank::Subvariety
        | TaxonomicRank::Subform => "species",
        TaxonomicRank::Genus | TaxonomicRank::Subgenus | TaxonomicRank::Section => "genus",
        _ => "higher",
    }
}

const RANK_SUFFIXES: &[(&str, TaxonomicRank)] = &[
    ("mycetidae", TaxonomicRank::Subclass),
    ("mycotina", TaxonomicRank::Subphylum),
    ("phycidae", TaxonomicRank::Subclass),
    ("mycetes", TaxonomicRank::Class),
    ("phyceae", TaxonomicRank::Class),
    ("phytina", TaxonomicRank::Subphylum),
    ("mycota", TaxonomicRank::Phylum),
    ("opsida", TaxonomicRank::Class),
    ("oideae", TaxonomicRank::Subfamily),
    ("phyta", TaxonomicRank::Phylum),
    ("aceae", TaxonomicRank::Family),
    ("oidea", TaxonomicRank::Superfamily),
    ("ineae", TaxonomicRank::Suborder),
    ("idae", TaxonomicRank::Subclass),
    ("inae", TaxonomicRank::Subtribe),
    ("anae", TaxonomicRank::Superorder),
    ("ales", TaxonomicRank::Order),
    ("ana", TaxonomicRank::Superorder),
    ("eae", TaxonomicRank::Tribe),
];

fn rank_by_suffix(name: &str) -> Option<TaxonomicRank> {
    RANK_SUFFIXES.iter().find(|(suffix, _)| name.ends_with(suffix)).map(|(_, rank)| *rank)
}

fn synonym_rank(parsed: &ParsedName, accepted_rank: TaxonomicRank) -> TaxonomicRank {
    let result = match rank_group(accepted_rank) {
        "species" => {
            if parsed.infraspecies.is_none() {
                Some(TaxonomicRank::Species)
            } else {
                // the rule-based parser doesn't carry the raw rank marker
                // through, so default to subspecies like the upstream
                // fallback for unrecognized infraspecific markers.
                Some(TaxonomicRank::Subspecies)
            }
        }
        "genus" => Some(if parsed.subgenus.is_some() { TaxonomicRank::Subgenus } else { TaxonomicRank::Genus }),
        _ => rank_by_suffix(&parsed.canonical_full),
    };
    result.unwrap_or(accepted_rank)
}

/// Validates the accepted name string itself, mirroring the upstream
/// skip-list for placeholder and clade-only rows.
fn validate_name(name: &str) -> Result<(), Error> {
    let lower = name.to_lowercase();
    const SKIP: &[&str] = &[
        "incertae sedis",
        "undescribed",
        "nov. ined.",
        "taxonomic position unknown",
        "undescribed clade",
        "probably to excluded from celastraceae",
    ];
    if SKIP.contains(&lower.as_str()) || lower.ends_with(" clade") || lower.ends_with(" subgroup") {
        return Err(Error::ParseFailed(format!("illegal name \"{name}\"")));
    }
    Ok(())
}

fn combination_authorship_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_insert_with(|| Regex::new(r"^\(([^()]+)\)\s*(.*)$").expect("static regex is valid"))
}

/// A parsed name plus the manuscript-status side channel the canonical
/// [`ParsedName`] has no room for.
struct WpParse {
    parsed: ParsedName,
    status: NameStatus,
    phrase: Option<String>,
}

/// Parses a verbatim name/citation pair the way every WorldPlants row
/// is parsed: the shared rule-based parser for canonical components,
/// then a WorldPlants-specific split of the authorship tail into
/// original-vs-combination halves (needed for basionym linking).
fn parse_wp_name(parser: &RuleBasedNameParser, name: &str, citation: &str) -> Result<WpParse, Error> {
    let mut working = name.to_string();
    let mut status = NameStatus::Unknown;
    let mut phrase = None;

    if working.contains("comb. ined.") || citation.contains("comb. ined.") {
        status = NameStatus::Manuscript;
        phrase = Some("comb. ined.".to_string());
        working = working.replace("comb. ined.", "");
    } else if working.contains("ined.") || citation.contains("ined.") {
        status = NameStatus::Manuscript;
        phrase = Some("ined.".to_string());
        working = working.replace("ined.", "");
    }

    let mut parsed = parser.parse_name(working.trim());
    if parsed.is_unparseable() {
        return Err(Error::ParseFailed(format!("failed to parse name: {name}")));
    }
    if parsed.cardinality > 3 {
        return Err(Error::ParseFailed(format!("illegal name (no quadrinomials) \"{name}\"")));
    }

    if let Some(authorship) = parsed.authorship.clone() {
        if let Some(caps) = combination_authorship_re().captures(&authorship) {
            let original = caps[1].trim().to_string();
            let combination = caps[2].trim().to_string();
            parsed.original_authorship = Some(original.clone());
            if !combination.is_empty() {
                parsed.combination_authorship = Some(combination.clone());
                parsed.authorship = Some(format!("({original}) {combination}"));
            } else {
                parsed.authorship = Some(format!("({original})"));
            }
        } else {
            parsed.original_authorship = Some(authorship);
        }
    }

    Ok(WpParse { parsed, status, phrase })
}

fn is_autonym(node: &HNode) -> bool {
    let species = node.parsed.species.as_deref().unwrap_or("").replace("× ", "");
    let infra = node.parsed.infraspecies.as_deref().unwrap_or("").replace("× ", "");
    !species.is_empty() && species == infra
}

/// Synthesizes the missing species-rank parent of an autonym row,
/// moving the original authorship from the infraspecific child onto
/// the synthesized parent (a trinomial autonym carries no authorship
/// of its own).
fn species_from_autonym(parser: &RuleBasedNameParser, child: &mut HNode) -> Result<HNode, Error> {
    let autonym = format!("{} {}", child.parsed.genus.as_deref().unwrap_or(""), child.parsed.species.as_deref().unwrap_or(""));
    let WpParse { parsed, status, phrase } = parse_wp_name(parser, &autonym, "")?;

    let authorship = child.parsed.authorship.take();
    child.parsed.original_authorship = None;

    Ok(HNode {
        id: Uuid::new_v4().to_string(),
        parent_id: String::new(),
        verbatim_name: autonym,
        verbatim_citation: String::new(),
        verbatim_distribution: String::new(),
        verbatim_remarks: String::new(),
        verbatim_synonyms: String::new(),
        verbatim_vernacular_name: String::new(),
        rank: TaxonomicRank::Species,
        parsed: ParsedName { authorship, ..parsed },
        name_status: status,
        name_phrase: phrase,
    })
}

fn get_parent_id(stack: &[HNode], child_rank: TaxonomicRank) -> String {
    for node in stack.iter().rev() {
        if rank_level(node.rank) < rank_level(child_rank) {
            return node.id.clone();
        }
    }
    String::new()
}

/// Climbs the temp-id parent chain collecting verbatim names from leaf
/// to root, joins them, and hashes the join into a stable UUID-v5 so
/// the same ancestor path always produces the same persistent id.
fn get_persistent_id(node: &HNode, node_map: &HashMap<String, HNode>) -> Uuid {
    let mut parents = vec![node.verbatim_name.clone()];
    let mut current = node.clone();
    loop {
        let Some(parent) = node_map.get(&current.parent_id) else { break };
        parents.insert(0, parent.verbatim_name.clone());
        if parent.parent_id.is_empty() {
            break;
        }
        current = parent.clone();
    }
    Uuid::new_v5(&ID_NAMESPACE, parents.join("_").as_bytes())
}

fn find_numbered_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>, Error> {
    let re = Regex::new(r"^(\d+)\.csv$").expect("static regex is valid");
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(caps) = re.captures(name) {
                if let Ok(n) = caps[1].parse::<u64>() {
                    found.push((n, entry.path()));
                }
            }
        }
    }
    Ok(found)
}

fn get_node(line: &str, parser: &RuleBasedNameParser) -> Result<HNode, Error> {
    let row: Vec<&str> = line.split('|').collect();
    if row.len() < 9 {
        return Err(Error::ParseFailed("invalid CSV row: not enough fields".into()));
    }

    let rank = csv_rank(row[0].trim());
    let accepted = row[2].trim();
    let citation = row[3].trim();
    let vernacular = row[4].trim();
    let distribution = row[5].trim();
    let synonyms = row[6].trim();
    let remarks = row[8].trim();

    validate_name(accepted)?;
    let WpParse { parsed, status, phrase } = parse_wp_name(parser, accepted, citation)?;

    Ok(HNode {
        id: Uuid::new_v4().to_string(),
        parent_id: String::new(),
        verbatim_name: accepted.to_string(),
        verbatim_citation: citation.to_string(),
        verbatim_distribution: distribution.to_string(),
        verbatim_remarks: remarks.to_string(),
        verbatim_synonyms: synonyms.to_string(),
        verbatim_vernacular_name: vernacular.to_string(),
        rank,
        parsed,
        name_status: status,
        name_phrase: phrase,
    })
}

fn process_node_by_rank(mut node: HNode, nodes: &[HNode], stack: &mut Vec<HNode>) -> Option<HNode> {
    match node.rank {
        TaxonomicRank::Order => {
            stack.push(node);
            None
        }
        TaxonomicRank::Species => {
            if stack.last().map(|n| n.rank) == Some(TaxonomicRank::Species) {
                stack.pop();
            }
            node.parent_id = get_parent_id(stack, node.rank);
            Some(node)
        }
        TaxonomicRank::Subspecies | TaxonomicRank::Variety | TaxonomicRank::Form => {
            let Some(last) = nodes.last() else {
                node.parent_id = get_parent_id(stack, node.rank);
                return Some(node);
            };

            if last.rank == TaxonomicRank::Species
                && node.parsed.canonical_simple.starts_with(&last.parsed.canonical_simple)
            {
                stack.push(last.clone());
                node.parent_id = get_parent_id(stack, node.rank);
                return Some(node);
            }

            if is_autonym(&node) {
                // caller handles autonym synthesis (needs the fallible parser path)
                return Some(node);
            }

            node.parent_id = get_parent_id(stack, node.rank);
            Some(node)
        }
        TaxonomicRank::Unranked => None,
        _ if !nodes.is_empty() && rank_level(node.rank) < rank_level(nodes.last().unwrap().rank) => {
            while let Some(top) = stack.last() {
                if rank_level(node.rank) <= rank_level(top.rank) {
                    stack.pop();
                } else {
                    break;
                }
            }
            node.parent_id = get_parent_id(stack, node.rank);
            stack.push(node.clone());
            Some(node)
        }
        _ => {
            node.parent_id = get_parent_id(stack, node.rank);
            stack.push(node.clone());
            Some(node)
        }
    }
}

fn build_hierarchy(csv_path: &Path, parser: &RuleBasedNameParser) -> Result<(Vec<HNode>, HashMap<String, HNode>), Error> {
    let body = std::fs::read_to_string(csv_path)?;
    let mut lines = body.lines();
    lines.next(); // header

    let mut nodes: Vec<HNode> = Vec::new();
    let mut node_map: HashMap<String, HNode> = HashMap::new();
    let mut stack: Vec<HNode> = Vec::with_capacity(30);

    for (line_num, line) in lines.enumerate() {
        let line = html_unescape(line);
        let node = match get_node(&line, parser) {
            Ok(n) => n,
            Err(e) => {
                debug!(line = line_num + 2, error = %e, "skipping world-plants row");
                continue;
            }
        };

        let is_infraspecific =
            matches!(node.rank, TaxonomicRank::Subspecies | TaxonomicRank::Variety | TaxonomicRank::Form);

        let processed = if is_infraspecific && is_autonym(&node) && !looks_like_species_child(&node, &nodes) {
            let mut child = node;
            match species_from_autonym(parser, &mut child) {
                Ok(mut parent) => {
                    parent.parent_id = get_parent_id(&stack, TaxonomicRank::Species);
                    stack.push(parent.clone());
                    child.parent_id = get_parent_id(&stack, child.rank);
                    nodes.push(parent.clone());
                    node_map.insert(parent.id.clone(), parent);
                    Some(child)
                }
                Err(e) => {
                    warn!(error = %e, "failed to synthesize autonym parent");
                    None
                }
            }
        } else {
            process_node_by_rank(node, &nodes, &mut stack)
        };

        if let Some(n) = processed {
            node_map.insert(n.id.clone(), n.clone());
            nodes.push(n);
        }

        if (line_num + 1) % 1000 == 0 {
            info!(count = line_num + 1, "world-plants rows processed");
        }
    }

    Ok((nodes, node_map))
}

fn looks_like_species_child(node: &HNode, nodes: &[HNode]) -> bool {
    nodes.last().map(|last| {
        last.rank == TaxonomicRank::Species && node.parsed.canonical_simple.starts_with(&last.parsed.canonical_simple)
    }).unwrap_or(false)
}

fn html_unescape(line: &str) -> String {
    line.replace("&amp;", "&").replace("&lt;", "<").replace("&gt;", ">").replace("&quot;", "\"").replace("&#39;", "'")
}

fn generate_persistent_ids(nodes: &[HNode], node_map: &HashMap<String, HNode>) -> HashMap<String, Uuid> {
    let mut persistent_ids: HashMap<String, Uuid> = HashMap::new();
    let mut unique: HashSet<Uuid> = HashSet::new();

    for node in nodes {
        if !persistent_ids.contains_key(&node.id) {
            let id = get_persistent_id(node, node_map);
            if unique.contains(&id) {
                warn!(name = %node.verbatim_name, %id, "duplicate persistent id, skipping node");
                continue;
            }
            unique.insert(id);
            persistent_ids.insert(node.id.clone(), id);
        }

        if !node.parent_id.is_empty() && !persistent_ids.contains_key(&node.parent_id) {
            if let Some(parent) = node_map.get(&node.parent_id) {
                persistent_ids.insert(node.parent_id.clone(), get_persistent_id(parent, node_map));
            }
        }
    }

    persistent_ids
}

/// Only years in 1700-2099 are accepted; everything else (blank,
/// ranges, approximations) is dropped rather than guessed at.
fn clean_year(year: &str) -> Option<i32> {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_insert_with(|| Regex::new(r"^(17|18|19|20)\d{2}$").expect("static regex is valid"));
    re.find(year).and_then(|m| m.as_str().parse().ok())
}

fn add_reference(references: &mut HashMap<String, Citation>, verbatim_citation: &str, parsed: &ParsedName) -> (Option<Uuid>, Option<String>, String) {
    if verbatim_citation.is_empty() {
        return (None, None, String::new());
    }

    let (mut page, mut year) = (String::new(), String::new());
    if let Some((_, rest)) = verbatim_citation.split_once(':') {
        if let Some((p, y)) = rest.split_once('(') {
            page = p.trim().to_string();
            year = y.trim_end_matches(')').trim().to_string();
        } else {
            page = rest.trim().to_string();
        }
    }

    let ref_authorship = parsed.combination_authorship.clone().or_else(|| parsed.authorship.clone()).unwrap_or_default();

    let citation = match (ref_authorship.is_empty(), year.is_empty()) {
        (false, false) => format!("{ref_authorship}. ({year}). {verbatim_citation}"),
        (false, true) => format!("{ref_authorship}. {verbatim_citation}"),
        (true, false) => format!("({year}). {verbatim_citation}"),
        (true, true) => verbatim_citation.to_string(),
    }
    .replace("..", ".");

    let id = Uuid::new_v5(&ID_NAMESPACE, citation.as_bytes());
    references.entry(id.to_string()).or_insert_with(|| Citation {
        id,
        author: ref_authorship,
        year: year.clone(),
        title: verbatim_citation.to_string(),
        citation,
    });

    (Some(id), if page.is_empty() { None } else { Some(page) }, year)
}

fn create_accepted_name_usage(
    node: &HNode,
    persistent_id: Uuid,
    persistent_ids: &HashMap<String, Uuid>,
    references: &mut HashMap<String, Citation>,
) -> NameUsage {
    let parent_id = if node.parent_id.is_empty() { None } else { persistent_ids.get(&node.parent_id).copied() };
    let (reference_id, page, year) = add_reference(references, &node.verbatim_citation, &node.parsed);

    let species_group = matches!(
        node.rank,
        TaxonomicRank::Species | TaxonomicRank::Subspecies | TaxonomicRank::Variety | TaxonomicRank::Form
    );
    let link = species_group
        .then(|| format!("http://www.worldplants.de/?deeplink={}", node.parsed.canonical_full.replace(' ', "-")));

    let mut usage = NameUsage::new(persistent_id);
    usage.parent_id = parent_id;
    usage.scientific_name = node.parsed.canonical_full.clone();
    usage.rank = Some(node.rank);
    usage.uninomial = node.parsed.uninomial.clone();
    usage.genus = node.parsed.genus.clone();
    usage.subgenus = node.parsed.subgenus.clone();
    usage.species = node.parsed.species.clone();
    usage.infraspecies = node.parsed.infraspecies.clone();
    usage.taxonomic_status = TaxonomicStatus::Accepted;
    usage.name_status = node.name_status;
    usage.name_phrase = node.name_phrase.clone();
    usage.authorship = node.parsed.authorship.clone();
    usage.reference_id = reference_id;
    usage.published_in_page = page;
    usage.published_in_year = clean_year(&year);
    usage.code = NomenclaturalCode::Botanical;
    usage.link = link;
    usage.remarks = if node.verbatim_remarks.is_empty() { None } else { Some(node.verbatim_remarks.clone()) };
    usage.sync_scientific_name_string();
    usage
}

const OBSOLETE_RANK_TOKENS: &[&str] =
    &["¿", " unranked ", " proles ", " nothossp. ", " convar. ", " agamosp. ", " race ", " nothovar. ", " nvar. ", " nothof. ", " microgen. "];

fn should_skip_synonym(syn: &str) -> bool {
    syn.is_empty() || OBSOLETE_RANK_TOKENS.iter().any(|t| syn.contains(t))
}

fn parse_synonym_string(syn: &str) -> (String, String) {
    if let Some((name, rest)) = syn.split_once('[') {
        (name.trim().to_string(), rest.replace(']', "").trim().to_string())
    } else {
        (syn.trim().to_string(), String::new())
    }
}

fn fix_hybrid_notation(name: &str) -> String {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_insert_with(|| Regex::new(r"^x([A-Z][a-z].*)").expect("static regex is valid"));
    match re.captures(name) {
        Some(caps) => format!("× {}", &caps[1]),
        None => name.to_string(),
    }
}

fn is_valid_synonym(parsed: &ParsedName) -> bool {
    parsed.cardinality <= 3 && parsed.parse_quality > 0 && parsed.parse_quality <= 2
}

fn basionym_key(parsed: &ParsedName) -> String {
    format!("{}_{}", parsed.canonical_stemmed, parsed.original_authorship.clone().unwrap_or_default())
}

fn update_basionym_lookup(id: Uuid, parsed: &ParsedName, lookup: &mut BasionymLookup, blacklist: &mut HashSet<String>) {
    if parsed.combination_authorship.is_some() {
        return;
    }
    let key = basionym_key(parsed);
    if blacklist.contains(&key) {
        return;
    }
    if let Some(existing) = lookup.get(&key) {
        if *existing != id {
            blacklist.insert(key.clone());
            lookup.remove(&key);
            return;
        }
    }
    lookup.insert(key, id);
}

fn process_synonyms(
    parser: &RuleBasedNameParser,
    node: &HNode,
    accepted_id: Uuid,
    references: &mut HashMap<String, Citation>,
    basionyms: &mut BasionymLookup,
    blacklist: &mut HashSet<String>,
) -> Vec<NameUsage> {
    let mut usages = Vec::new();
    let mut seen = HashSet::new();

    for syn_string in node.verbatim_synonyms.split('=') {
        if should_skip_synonym(syn_string) {
            continue;
        }

        let (syn_name, syn_ref) = parse_synonym_string(syn_string);
        let syn_name = fix_hybrid_notation(&syn_name);

        let WpParse { parsed, status, phrase } = match parse_wp_name(parser, &syn_name, &syn_ref) {
            Ok(p) => p,
            Err(e) => {
                debug!(name = %syn_name, error = %e, "failed to parse world-plants synonym");
                continue;
            }
        };
        if !is_valid_synonym(&parsed) {
            continue;
        }

        let id_string = format!(
            "{accepted_id}_{}_{}",
            parsed.canonical_full,
            parsed.authorship.clone().unwrap_or_default().replace(' ', "-")
        );
        let id = Uuid::new_v5(&ID_NAMESPACE, id_string.as_bytes());
        if !seen.insert(id) {
            continue;
        }

        let (reference_id, page, year) = add_reference(references, &syn_ref, &parsed);

        let mut usage = NameUsage::new(id);
        usage.parent_id = Some(accepted_id);
        usage.scientific_name = parsed.canonical_full.clone();
        usage.rank = Some(synonym_rank(&parsed, node.rank));
        usage.uninomial = parsed.uninomial.clone();
        usage.genus = parsed.genus.clone();
        usage.subgenus = parsed.subgenus.clone();
        usage.species = parsed.species.clone();
        usage.infraspecies = parsed.infraspecies.clone();
        usage.taxonomic_status = TaxonomicStatus::Synonym;
        usage.name_status = status;
        usage.name_phrase = phrase;
        usage.authorship = parsed.authorship.clone();
        usage.reference_id = reference_id;
        usage.published_in_page = page;
        usage.published_in_year = clean_year(&year);
        usage.code = NomenclaturalCode::Botanical;
        usage.remarks = if node.verbatim_remarks.is_empty() { None } else { Some(node.verbatim_remarks.clone()) };
        usage.sync_scientific_name_string();

        update_basionym_lookup(id, &parsed, basionyms, blacklist);
        usages.push(usage);
    }

    usages
}

/// Re-parses every species-group usage's `scientific_name + authorship`
/// to recompute its basionym key and link it to the unique candidate,
/// if any, in the lookup table built while processing synonyms.
fn link_basionyms(parser: &RuleBasedNameParser, usages: &mut [NameUsage], lookup: &BasionymLookup) {
    for usage in usages.iter_mut() {
        let species_group = matches!(
            usage.rank,
            Some(TaxonomicRank::Species | TaxonomicRank::Subspecies | TaxonomicRank::Variety | TaxonomicRank::Form)
        );
        if !species_group {
            continue;
        }

        let full = format!("{} {}", usage.scientific_name, usage.authorship.clone().unwrap_or_default());
        let Ok(WpParse { parsed, .. }) = parse_wp_name(parser, &full, "") else { continue };
        let key = basionym_key(&parsed);

        if let Some(&basionym_id) = lookup.get(&key) {
            if basionym_id != usage.id {
                usage.basionym_id = Some(basionym_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_level_orders_order_before_species() {
        assert!(rank_level(TaxonomicRank::Order) < rank_level(TaxonomicRank::Species));
        assert!(rank_level(TaxonomicRank::Species) < rank_level(TaxonomicRank::Subspecies));
    }

    #[test]
    fn csv_rank_maps_known_tokens() {
        assert_eq!(csv_rank("G"), TaxonomicRank::Genus);
        assert_eq!(csv_rank("S"), TaxonomicRank::Species);
        assert_eq!(csv_rank("???"), TaxonomicRank::Unranked);
    }

    #[test]
    fn rank_by_suffix_recognizes_family_and_order_endings() {
        assert_eq!(rank_by_suffix("Rosaceae"), Some(TaxonomicRank::Family));
        assert_eq!(rank_by_suffix("Rosales"), Some(TaxonomicRank::Order));
        assert_eq!(rank_by_suffix("Rosa"), None);
    }

    #[test]
    fn fix_hybrid_notation_inserts_space_and_marker() {
        assert_eq!(fix_hybrid_notation("xFestulolium"), "× Festulolium");
        assert_eq!(fix_hybrid_notation("Festuca rubra"), "Festuca rubra");
    }

    #[test]
    fn clean_year_rejects_out_of_range_years() {
        assert_eq!(clean_year("1899"), Some(1899));
        assert_eq!(clean_year("1699"), None);
        assert_eq!(clean_year("not a year"), None);
    }

    #[test]
    fn should_skip_synonym_matches_obsolete_rank_tokens() {
        assert!(should_skip_synonym("Foo bar nothovar. baz"));
        assert!(!should_skip_synonym("Foo bar (L.) Mill."));
    }

    #[test]
    fn basionym_key_combines_stemmed_epithet_and_original_authorship() {
        let parsed = ParsedName {
            canonical_stemmed: "vulgar".into(),
            original_authorship: Some("L.".into()),
            ..Default::default()
        };
        assert_eq!(basionym_key(&parsed), "vulgar_L.");
    }

    #[test]
    fn autonym_synthesizes_species_parent_with_reassigned_authorship() {
        let parser = RuleBasedNameParser;
        let row = ["SS", "1", "Abies alba subsp. alba (L.) Mill.", "", "", "", "", "", ""].join("|");
        let mut child = get_node(&row, &parser).unwrap();
        assert!(is_autonym(&child));

        let parent = species_from_autonym(&parser, &mut child).unwrap();
        assert_eq!(parent.rank, TaxonomicRank::Species);
        assert_eq!(parent.parsed.genus.as_deref(), Some("Abies"));
        assert_eq!(parent.parsed.species.as_deref(), Some("alba"));
        assert_eq!(parent.parsed.authorship.as_deref(), Some("(L.) Mill."));
        assert!(child.parsed.authorship.is_none());
    }

    #[test]
    fn find_numbered_files_sorts_numerically_not_lexically() {
        let dir = tempfile::tempdir().unwrap();
        for n in [1, 2, 10] {
            std::fs::write(dir.path().join(format!("{n}.csv")), "rank|n|name\n").unwrap();
        }
        let mut found = find_numbered_files(dir.path()).unwrap();
        found.sort_by_key(|(n, _)| *n);
        let names: Vec<u64> = found.into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![1, 2, 10]);
    }
}
