//! Wikispecies adapter (C11): streams a MediaWiki XML dump page by
//! page, classifies each page as a redirect / template / taxon page,
//! and reconstructs a hierarchy and synonymy out of wikitext templates
//! that were never meant to be machine-read.

pub mod parser;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use rayon::prelude::*;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::config::Config;
use crate::errors::Error;
use crate::model::{
    DatasetDescriptor, Meta, NameStatus, NameUsage, NomenclaturalCode, Reference, TaxonomicStatus, Vernacular,
    ID_NAMESPACE,
};
use crate::names::{NameParser, RuleBasedNameParser};

const NAMESPACE_BLACKLIST: &[&str] = &[
    "Type:",
    "Catalog:",
    "WS:",
    "Topic:",
    "Module:",
    "Help:",
    "Wikispecies:",
    "MediaWiki:",
    "Translations:",
    "Category:",
    "Template:",
];

pub struct WikiSpecies {
    base: BaseAdapter,
}

/// Counts kept across the whole run and reported once the conversion
/// finishes, per the design notes' observability requirement.
#[derive(Debug, Default)]
struct Stats {
    pages_seen: usize,
    redirects: usize,
    templates: usize,
    taxon_pages: usize,
    extraction_failures: usize,
    missing_parents: usize,
    missing_redirect_targets: usize,
}

struct RawPage {
    title: String,
    text: String,
    redirect_attr: Option<String>,
}

struct TaxonPage {
    id: Uuid,
    parsed: parser::WsParsed,
    parent_template: Option<String>,
    vernaculars: Vec<(String, String)>,
    synonyms: Vec<String>,
}

impl WikiSpecies {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("wikispecies", "Wikispecies")
            .with_url("https://dumps.wikimedia.org/specieswiki/latest/specieswiki-latest-pages-articles.xml.bz2")
            .with_notes("Expects an extracted (not bz2-compressed) pages-articles XML dump staged with --file.");
        Self { base: BaseAdapter::new(descriptor) }
    }

    fn find_dump(extract_dir: &Path) -> Result<PathBuf, Error> {
        for entry in std::fs::read_dir(extract_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("xml") {
                return Ok(path);
            }
        }
        Err(Error::UnknownFormat("no .xml dump found in extract directory".into()))
    }

    fn import_meta(cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let meta = Meta {
            key: "wikispecies".into(),
            title: "Wikispecies".into(),
            description: Some("A free, open content taxonomic database, part of the Wikimedia Foundation.".into()),
            url: Some("https://species.wikimedia.org".into()),
            issued: cfg.issued_date.clone(),
            version: cfg.data_version.clone(),
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }

    /// Pass 1: streams the dump once, classifying every page and
    /// folding it into `redirects` / `template_ids` / `taxon_ids` /
    /// `taxon_pages` without ever holding the whole dump in memory.
    fn pass_one(path: &Path) -> Result<PassOneResult, Error> {
        let mut result = PassOneResult::default();
        stream_pages(path, |page| {
            result.stats.pages_seen += 1;

            if let Some(target) = redirect_target(&page) {
                result.redirects.insert(page.title.clone(), target);
                result.stats.redirects += 1;
                return Ok(());
            }

            if page.title.starts_with("Template:") {
                let name = page.title.trim_start_matches("Template:").to_string();
                result
                    .template_ids
                    .insert(name, Uuid::new_v5(&ID_NAMESPACE, format!("wikispecies-{}", page.title).as_bytes()));
                result.stats.templates += 1;
                return Ok(());
            }

            if NAMESPACE_BLACKLIST.iter().any(|prefix| page.title.starts_with(prefix)) {
                return Ok(());
            }

            let sections = split_sections(&page.text);
            let has_name = sections.keys().any(|h| h.eq_ignore_ascii_case("{{int:name}}"));
            let has_taxonavigation = sections.keys().any(|h| h.eq_ignore_ascii_case("{{int:taxonavigation}}"));
            if !(has_name && has_taxonavigation) {
                return Ok(());
            }

            match extract_taxon_page(&page, &sections) {
                Some(taxon) => {
                    result.taxon_ids.insert(page.title.clone(), taxon.id);
                    result.stats.taxon_pages += 1;
                    result.taxon_pages.push(taxon);
                }
                None => result.stats.extraction_failures += 1,
            }
            Ok(())
        })?;
        Ok(result)
    }

    fn to_name_usage(taxon: &TaxonPage, parent_id: Option<Uuid>, reference_id: Option<Uuid>) -> NameUsage {
        let mut usage = NameUsage::new(taxon.id);
        usage.scientific_name = taxon.parsed.canonical.clone();
        usage.authorship = taxon.parsed.authorship.clone();
        usage.sync_scientific_name_string();
        usage.parent_id = parent_id;
        usage.extinct = taxon.parsed.extinct;
        usage.taxonomic_status = TaxonomicStatus::Accepted;
        usage.name_status = NameStatus::Established;
        usage.code = NomenclaturalCode::Unknown;
        usage.reference_id = reference_id;
        usage
    }
}

#[derive(Default)]
struct PassOneResult {
    redirects: HashMap<String, String>,
    template_ids: HashMap<String, Uuid>,
    taxon_ids: HashMap<String, Uuid>,
    taxon_pages: Vec<TaxonPage>,
    stats: Stats,
}

impl SourceAdapter for WikiSpecies {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let dump = Self::find_dump(&cfg.extract_dir)?;
        let PassOneResult { redirects, template_ids, taxon_ids, taxon_pages, mut stats } = Self::pass_one(&dump)?;

        // Pass 2: resolve each redirect against the taxon pages found
        // in pass 1. Redirect-derived synonyms win over synonym-section
        // ones on conflict, so they're folded in first.
        let mut synonym_targets: HashMap<String, Uuid> = HashMap::new();
        for (from, to) in &redirects {
            match taxon_ids.get(to) {
                Some(&accepted_id) => {
                    synonym_targets.insert(from.clone(), accepted_id);
                }
                None => stats.missing_redirect_targets += 1,
            }
        }
        for taxon in &taxon_pages {
            for synonym in &taxon.synonyms {
                synonym_targets.entry(synonym.clone()).or_insert(taxon.id);
            }
        }

        // Pass 3: emit accepted usages (resolving each one's parent
        // template against real taxon pages before bare templates) and
        // then every synonym collected above.
        let mut usages = Vec::with_capacity(taxon_pages.len() + synonym_targets.len());
        let mut vernaculars = Vec::new();
        let mut references: HashMap<String, Uuid> = HashMap::new();

        for taxon in &taxon_pages {
            let parent_id = match &taxon.parent_template {
                Some(template) => {
                    let resolved = taxon_ids.get(template).or_else(|| template_ids.get(template)).copied();
                    if resolved.is_none() {
                        stats.missing_parents += 1;
                    }
                    resolved
                }
                None => None,
            };

            let reference_id = taxon.parsed.reference.as_ref().map(|citation| {
                *references.entry(citation.clone()).or_insert_with(|| Uuid::new_v5(&ID_NAMESPACE, citation.as_bytes()))
            });

            usages.push(Self::to_name_usage(taxon, parent_id, reference_id));

            for (lang, name) in &taxon.vernaculars {
                vernaculars.push(Vernacular {
                    taxon_id: taxon.id,
                    name: name.clone(),
                    language: lang.clone(),
                    country: None,
                    remarks: None,
                });
            }
        }

        // Parsing each synonym string is independent of every other one,
        // so this runs across the rayon global pool instead of inline —
        // the same parallel-map shape the teacher reaches for on its own
        // embarrassingly-parallel batches.
        let synonym_usages: Vec<NameUsage> = synonym_targets
            .par_iter()
            .map(|(synonym, accepted_id)| {
                let parsed = parser::parse(synonym);
                let id = Uuid::new_v5(&ID_NAMESPACE, format!("wikispecies-synonym-{synonym}").as_bytes());
                let mut usage = NameUsage::new(id);
                usage.scientific_name = if parsed.canonical.is_empty() { synonym.clone() } else { parsed.canonical };
                usage.authorship = parsed.authorship;
                usage.sync_scientific_name_string();
                usage.parent_id = Some(*accepted_id);
                usage.taxonomic_status = TaxonomicStatus::Synonym;
                usage.name_status = NameStatus::Unknown;
                usage
            })
            .collect();
        usages.extend(synonym_usages);

        Self::import_meta(cfg, sink)?;
        info!(count = usages.len(), "Wikispecies name usages assembled");
        sink.insert_name_usages(&usages)?;
        sink.insert_vernaculars(&vernaculars)?;

        let refs: Vec<Reference> =
            references.into_iter().map(|(citation, id)| Reference { id, citation: Some(citation), ..Default::default() }).collect();
        sink.insert_references(&refs)?;

        let attempts = stats.taxon_pages + stats.extraction_failures;
        let failure_rate = if attempts > 0 { stats.extraction_failures as f64 / attempts as f64 } else { 0.0 };
        info!(
            pages_seen = stats.pages_seen,
            redirects = stats.redirects,
            templates = stats.templates,
            taxon_pages = stats.taxon_pages,
            extraction_failures = stats.extraction_failures,
            missing_parents = stats.missing_parents,
            missing_redirect_targets = stats.missing_redirect_targets,
            "Wikispecies import complete"
        );
        if failure_rate > 0.1 {
            warn!(failure_rate, "more than 10% of candidate taxon pages failed extraction");
        }

        Ok(())
    }
}

/// Streams `path` line by line, batching lines between `<page>` and
/// `</page>` markers and invoking `on_page` for each completed block —
/// the dump itself is never held in memory, only one page at a time.
fn stream_pages<F>(path: &Path, mut on_page: F) -> Result<(), Error>
where
    F: FnMut(RawPage) -> Result<(), Error>,
{
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut buffer = String::new();
    let mut in_page = false;

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();

        if !in_page {
            if trimmed.starts_with("<page>") {
                in_page = true;
                buffer.clear();
                buffer.push_str(&line);
                buffer.push('\n');
            }
            continue;
        }

        buffer.push_str(&line);
        buffer.push('\n');
        if trimmed.starts_with("</page>") {
            in_page = false;
            on_page(parse_page_block(&buffer))?;
        }
    }
    Ok(())
}

fn parse_page_block(block: &str) -> RawPage {
    let mut reader = Reader::from_str(block);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut title = String::new();
    let mut text = String::new();
    let mut redirect_attr = None;
    let mut current: Option<Vec<u8>> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => current = Some(e.name().as_ref().to_vec()),
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"redirect" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"title" {
                            redirect_attr = Some(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let decoded = e.unescape().map(|c| c.into_owned()).unwrap_or_default();
                match current.as_deref() {
                    Some(b"title") => title.push_str(&decoded),
                    Some(b"text") => text.push_str(&decoded),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    RawPage { title, text, redirect_attr }
}

fn redirect_target(page: &RawPage) -> Option<String> {
    if let Some(target) = &page.redirect_attr {
        return Some(target.clone());
    }
    let text = page.text.trim_start();
    if text.to_ascii_uppercase().starts_with("#REDIRECT") {
        let start = text.find("[[")? + 2;
        let end = text[start..].find("]]")?;
        let inner = &text[start..start + end];
        return Some(inner.split('|').next().unwrap_or(inner).trim().to_string());
    }
    None
}

/// Splits page wikitext into `==Header==` sections keyed by the
/// (untouched-case) header text, body trimmed.
fn split_sections(text: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    let mut header = String::new();
    let mut body = String::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.len() > 4 && trimmed.starts_with("==") && trimmed.ends_with("==") {
            if !header.is_empty() {
                sections.insert(std::mem::take(&mut header), body.trim().to_string());
            }
            header = trimmed.trim_matches('=').trim().to_string();
            body.clear();
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    if !header.is_empty() {
        sections.insert(header, body.trim().to_string());
    }
    sections
}

fn section(sections: &HashMap<String, String>, matches: impl Fn(&str) -> bool) -> Option<String> {
    sections.iter().find(|(header, _)| matches(header.to_ascii_lowercase().as_str())).map(|(_, body)| body.clone())
}

fn parent_template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_insert_with(|| Regex::new(r"\{\{([^|}]+)").expect("static regex is valid"))
}

fn vernacular_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_insert_with(|| Regex::new(r"^\|\s*([A-Za-z-]{1,4})\s*=\s*(.+)$").expect("static regex is valid"))
}

fn extract_taxon_page(page: &RawPage, sections: &HashMap<String, String>) -> Option<TaxonPage> {
    let name_body = section(sections, |h| h == "{{int:name}}")?;
    let name_line = name_body
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !(l.starts_with("{{") && l.ends_with("}}")))?;

    let mut parsed = parser::parse(name_line);
    if parsed.quality == 0 {
        let cleaned = strip_wiki_markup(name_line);
        let fallback = RuleBasedNameParser.parse_name(&cleaned);
        if fallback.parse_quality == 0 || fallback.parse_quality > 2 {
            return None;
        }
        parsed = parser::WsParsed {
            canonical: fallback.canonical_simple,
            authorship: fallback.authorship,
            reference: None,
            tail: None,
            extinct: fallback.surrogate,
            quality: fallback.parse_quality,
        };
    }

    let taxonavigation_body = section(sections, |h| h == "{{int:taxonavigation}}").unwrap_or_default();
    let parent_template = parent_template_re().captures_iter(&taxonavigation_body).find_map(|caps| {
        let content = caps.get(1)?.as_str().trim();
        let skip = content.starts_with("int:") || content.starts_with("Image") || content.starts_with("DISPLAYTITLE");
        (!skip).then(|| content.split('|').next().unwrap_or(content).trim().to_string())
    });

    let mut vernaculars = Vec::new();
    if let Some(body) = section(sections, |h| h.contains("vernacular")) {
        for line in body.lines() {
            if let Some(caps) = vernacular_line_re().captures(line.trim()) {
                let lang = caps[1].to_string();
                let name = caps[2].trim().to_string();
                if !name.is_empty() {
                    vernaculars.push((lang, name));
                }
            }
        }
    }

    let mut synonyms = Vec::new();
    if let Some(body) = section(sections, |h| h.contains("synonym")) {
        for line in body.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('*') {
                let cleaned = strip_wiki_markup(trimmed.trim_start_matches('*').trim());
                if !cleaned.is_empty() {
                    synonyms.push(cleaned);
                }
            }
        }
    }

    let id = Uuid::new_v5(&ID_NAMESPACE, format!("wikispecies-{}", page.title).as_bytes());
    Some(TaxonPage { id, parsed, parent_template, vernaculars, synonyms })
}

fn strip_wiki_markup(s: &str) -> String {
    s.replace("'''", "").replace("''", "").replace("[[", "").replace("]]", "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_sections_by_double_equals_headers() {
        let text = "=={{int:name}}==\n''Canis lupus''\n=={{int:taxonavigation}}==\n{{Canis}}\n";
        let sections = split_sections(text);
        assert_eq!(sections.get("{{int:name}}").map(String::as_str), Some("''Canis lupus''"));
        assert_eq!(sections.get("{{int:taxonavigation}}").map(String::as_str), Some("{{Canis}}"));
    }

    #[test]
    fn redirect_target_reads_wikitext_marker() {
        let page = RawPage { title: "Canis lupus familiaris".into(), text: "#REDIRECT [[Canis lupus|dog]]".into(), redirect_attr: None };
        assert_eq!(redirect_target(&page).as_deref(), Some("Canis lupus"));
    }

    #[test]
    fn redirect_target_reads_xml_attribute() {
        let page = RawPage { title: "Foo".into(), text: String::new(), redirect_attr: Some("Bar".into()) };
        assert_eq!(redirect_target(&page).as_deref(), Some("Bar"));
    }

    #[test]
    fn extract_taxon_page_requires_name_and_taxonavigation() {
        let page = RawPage {
            title: "Canis lupus".into(),
            text: "=={{int:name}}==\n''Canis lupus'' {{a|Linnaeus|L.}}, 1758\n=={{int:taxonavigation}}==\n{{Canis}}\n"
                .into(),
            redirect_attr: None,
        };
        let sections = split_sections(&page.text);
        let taxon = extract_taxon_page(&page, &sections).unwrap();
        assert_eq!(taxon.parsed.canonical, "Canis lupus");
        assert_eq!(taxon.parent_template.as_deref(), Some("Canis"));
    }

    #[test]
    fn vernacular_lines_require_a_short_lang_code() {
        let body = "{{VN\n|en=Grey wolf\n|fr=Loup gris\n}}";
        let mut found = Vec::new();
        for line in body.lines() {
            if let Some(caps) = vernacular_line_re().captures(line.trim()) {
                found.push((caps[1].to_string(), caps[2].to_string()));
            }
        }
        assert_eq!(found, vec![("en".to_string(), "Grey wolf".to_string()), ("fr".to_string(), "Loup gris".to_string())]);
    }
}
