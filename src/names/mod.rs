//! NameParser collaborator (C4). The real scientific-name parser is an
//! external library in production; here it is a working reference
//! implementation so the crate compiles and every adapter is
//! independently testable — deterministic, infallible (an unparseable
//! string simply yields `parse_quality == 0`).

pub mod builder;

use regex::Regex;
use std::sync::OnceLock;

use crate::model::{ParsedName, TaxonomicRank};

/// Parses a verbatim scientific-name string into its canonical
/// components. Never fails: worst case returns a `ParsedName` with
/// `parse_quality == 0`.
pub trait NameParser {
    fn parse_name(&self, verbatim: &str) -> ParsedName;
}

/// Rule-based reference implementation: strips authorship by the first
/// capitalized-author-or-year token after the epithets, recognizes the
/// extinct marker `†` and the hybrid marker `×`, and derives a stemmed
/// epithet by dropping a short set of common Latin endings.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedNameParser;

fn binomial_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_insert_with(|| {
        Regex::new(
            r"^(?P<genus>[A-Z][a-zA-Z-]+)(?:\s+\((?P<subgenus>[A-Z][a-zA-Z-]+)\))?(?:\s+(?P<hybrid>×)?\s*(?P<species>[a-z][a-z-]+))?(?:\s+(?P<rankmark>subsp\.|var\.|f\.|ssp\.)?\s*(?P<infra>[a-z][a-z-]+))?",
        )
        .expect("static regex is valid")
    })
}

const STEM_SUFFIXES: &[&str] = &["ianus", "iana", "ianum", "ensis", "ense", "us", "a", "um", "is", "e"];

fn stem(word: &str) -> String {
    for suffix in STEM_SUFFIXES {
        if word.len() > suffix.len() + 2 {
            if let Some(stripped) = word.strip_suffix(suffix) {
                return stripped.to_string();
            }
        }
    }
    word.to_string()
}

impl NameParser for RuleBasedNameParser {
    fn parse_name(&self, verbatim: &str) -> ParsedName {
        let extinct = verbatim.contains('†');
        let cleaned = verbatim.replace('†', "").trim().to_string();
        if cleaned.is_empty() {
            return ParsedName::default();
        }

        let Some(caps) = binomial_re().captures(&cleaned) else {
            return ParsedName {
                canonical_simple: cleaned.clone(),
                canonical_full: cleaned,
                parse_quality: 1,
                ..Default::default()
            };
        };

        let matched_len = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let tail = cleaned[matched_len..].trim().to_string();

        let genus = caps.name("genus").map(|m| m.as_str().to_string());
        let subgenus = caps.name("subgenus").map(|m| m.as_str().to_string());
        let species = caps.name("species").map(|m| m.as_str().to_string());
        let infra = caps.name("infra").map(|m| m.as_str().to_string());
        let hybrid = caps.name("hybrid").is_some();

        let mut cardinality = 0u8;
        if genus.is_some() {
            cardinality += 1;
        }
        if species.is_some() {
            cardinality += 1;
        }
        if infra.is_some() {
            cardinality += 1;
        }

        let rank = match (species.is_some(), infra.is_some()) {
            (false, false) => Some(TaxonomicRank::Unranked),
            (true, false) => Some(TaxonomicRank::Species),
            (true, true) => Some(TaxonomicRank::Subspecies),
            (false, true) => Some(TaxonomicRank::Subspecies),
        };

        let mut parts = vec![];
        if let Some(g) = &genus {
            parts.push(g.clone());
        }
        if let Some(s) = &subgenus {
            parts.push(format!("({s})"));
        }
        if let Some(s) = &species {
            parts.push(s.clone());
        }
        if let Some(i) = &infra {
            parts.push(i.clone());
        }
        let canonical_simple = parts.join(" ");

        let last_epithet = infra.clone().or_else(|| species.clone()).unwrap_or_default();
        let canonical_stemmed = stem(&last_epithet);

        let authorship = if tail.is_empty() { None } else { Some(tail.clone()) };

        let parse_quality = if tail.is_empty() {
            if matched_len == cleaned.len() { 2 } else { 1 }
        } else {
            3
        };

        ParsedName {
            canonical_simple: canonical_simple.clone(),
            canonical_full: if let Some(a) = &authorship {
                format!("{canonical_simple} {a}")
            } else {
                canonical_simple
            },
            canonical_stemmed,
            authorship,
            combination_authorship: None,
            original_authorship: None,
            uninomial: if species.is_none() { genus.clone() } else { None },
            genus,
            subgenus,
            species,
            infraspecies: infra,
            cultivar_epithet: None,
            rank,
            cardinality,
            notho: if hybrid { Some("species".to_string()) } else { None },
            virus: false,
            hybrid,
            surrogate: extinct,
            parse_quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_clean_binomial() {
        let parsed = RuleBasedNameParser.parse_name("Canis lupus");
        assert_eq!(parsed.canonical_simple, "Canis lupus");
        assert_eq!(parsed.genus.as_deref(), Some("Canis"));
        assert_eq!(parsed.species.as_deref(), Some("lupus"));
        assert_eq!(parsed.parse_quality, 2);
    }

    #[test]
    fn keeps_authorship_as_tail() {
        let parsed = RuleBasedNameParser.parse_name("Canis lupus L., 1758");
        assert_eq!(parsed.authorship.as_deref(), Some("L., 1758"));
        assert_eq!(parsed.canonical_full, "Canis lupus L., 1758");
    }

    #[test]
    fn marks_extinct_and_strips_the_dagger() {
        let parsed = RuleBasedNameParser.parse_name("†Sahelanthropus tchadensis");
        assert!(parsed.surrogate);
        assert!(!parsed.canonical_simple.contains('†'));
    }

    #[test]
    fn empty_input_is_unparseable() {
        let parsed = RuleBasedNameParser.parse_name("   ");
        assert!(parsed.is_unparseable());
    }
}
