//! NameUsageBuilder (C6): the merge policy shared by every adapter for
//! filling a [`NameUsage`] in progress from a [`ParsedName`] result.
//! Original verbatim data always wins — parsed fields only ever fill
//! gaps, never overwrite something the source already gave us.

use crate::model::{NameUsage, NomenclaturalCode, ParsedName};

/// Fills empty component fields on `usage` from `parsed` without
/// overwriting fields the adapter already populated from verbatim
/// source data.
pub fn merge_parsed(usage: &mut NameUsage, parsed: &ParsedName) {
    if usage.scientific_name.is_empty() {
        usage.scientific_name = parsed.canonical_simple.clone();
    }
    if usage.authorship.is_none() {
        usage.authorship = parsed.authorship.clone();
    }
    if usage.genus.is_none() {
        usage.genus = parsed.genus.clone();
    }
    if usage.subgenus.is_none() {
        usage.subgenus = parsed.subgenus.clone();
    }
    if usage.species.is_none() {
        usage.species = parsed.species.clone();
    }
    if usage.infraspecies.is_none() {
        usage.infraspecies = parsed.infraspecies.clone();
    }
    if usage.uninomial.is_none() {
        usage.uninomial = parsed.uninomial.clone();
    }
    if usage.cultivar_epithet.is_none() {
        usage.cultivar_epithet = parsed.cultivar_epithet.clone();
    }
    if usage.rank.is_none() {
        usage.rank = parsed.rank;
    }
    if usage.scientific_name_string.is_empty() {
        usage.sync_scientific_name_string();
    }
}

/// Maps a kingdom identifier (ITIS-style `kingdom_id`, 1-indexed) to a
/// nomenclatural code, per the fixed table in the project's ITIS
/// conversion notes: bacteria {1,7}, zoological {2,5}, botanical
/// {3,4,6}, anything else unknown.
pub fn code_from_kingdom_id(kingdom_id: i64) -> NomenclaturalCode {
    match kingdom_id {
        1 | 7 => NomenclaturalCode::Bacterial,
        2 | 5 => NomenclaturalCode::Zoological,
        3 | 4 | 6 => NomenclaturalCode::Botanical,
        _ => NomenclaturalCode::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn fills_empty_fields_without_overwriting_verbatim() {
        let mut usage = NameUsage::new(Uuid::nil());
        usage.genus = Some("Canis".to_string());

        let parsed = ParsedName {
            genus: Some("WrongGenus".to_string()),
            species: Some("lupus".to_string()),
            canonical_simple: "Canis lupus".to_string(),
            ..Default::default()
        };

        merge_parsed(&mut usage, &parsed);

        assert_eq!(usage.genus.as_deref(), Some("Canis"));
        assert_eq!(usage.species.as_deref(), Some("lupus"));
        assert_eq!(usage.scientific_name, "Canis lupus");
    }

    #[test]
    fn kingdom_code_table_matches_itis_groups() {
        assert_eq!(code_from_kingdom_id(2), NomenclaturalCode::Zoological);
        assert_eq!(code_from_kingdom_id(4), NomenclaturalCode::Botanical);
        assert_eq!(code_from_kingdom_id(1), NomenclaturalCode::Bacterial);
        assert_eq!(code_from_kingdom_id(99), NomenclaturalCode::Unknown);
    }
}
