//! Registry (C8): label → adapter factory map, mirroring the project's
//! `GetDataSets` construction — a process-local literal map built once,
//! with list/select operations layered on top.

use std::collections::BTreeMap;

use crate::adapter::SourceAdapter;
use crate::config::Config;
use crate::errors::Error;
use crate::model::Label;
use crate::sources;

type Factory = fn(&Config) -> Box<dyn SourceAdapter>;

/// Holds every known source keyed by its stable label. `BTreeMap`
/// keeps iteration lexicographically sorted for free, which is exactly
/// the ordering `list` and ordinal resolution need.
pub struct Registry {
    factories: BTreeMap<Label, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        let mut factories: BTreeMap<Label, Factory> = BTreeMap::new();
        factories.insert("itis".into(), |cfg| Box::new(sources::itis::Itis::new(cfg.clone())));
        factories.insert("wikispecies".into(), |cfg| Box::new(sources::wikispecies::WikiSpecies::new(cfg.clone())));
        factories.insert("world-plants".into(), |cfg| Box::new(sources::world_plants::WorldPlants::new(cfg.clone())));
        factories.insert("ion".into(), |cfg| Box::new(sources::ion::Ion::new(cfg.clone())));
        factories.insert("grin".into(), |cfg| Box::new(sources::grin::Grin::new(cfg.clone())));
        factories.insert("paleodb".into(), |cfg| Box::new(sources::paleodb::PaleoDb::new(cfg.clone())));
        factories.insert("ncbi".into(), |cfg| Box::new(sources::ncbi::Ncbi::new(cfg.clone())));
        factories.insert("ioc".into(), |cfg| Box::new(sources::ioc::Ioc::new(cfg.clone())));
        factories.insert("text".into(), |cfg| Box::new(sources::text_xsv::TextXsv::new(cfg.clone())));
        Self { factories }
    }

    /// Labels sorted lexicographically, the order `list` prints and
    /// ordinal resolution indexes into.
    pub fn labels(&self) -> Vec<Label> {
        self.factories.keys().cloned().collect()
    }

    /// Resolves either the exact label or a 1-based positional index
    /// into the sorted label list.
    pub fn resolve(&self, label_or_id: &str) -> Result<Label, Error> {
        if let Ok(index) = label_or_id.parse::<usize>() {
            let labels = self.labels();
            if index >= 1 && index <= labels.len() {
                return Ok(labels[index - 1].clone());
            }
            return Err(Error::UnknownLabel(label_or_id.to_string()));
        }

        if self.factories.contains_key(label_or_id) {
            Ok(label_or_id.to_string())
        } else {
            Err(Error::UnknownLabel(label_or_id.to_string()))
        }
    }

    pub fn build(&self, label: &str, cfg: &Config) -> Result<Box<dyn SourceAdapter>, Error> {
        let factory = self.factories.get(label).ok_or_else(|| Error::UnknownLabel(label.to_string()))?;
        Ok(factory(cfg))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_lexicographically_sorted() {
        let registry = Registry::new();
        let labels = registry.labels();
        let mut sorted = labels.clone();
        sorted.sort();
        assert_eq!(labels, sorted);
    }

    #[test]
    fn resolves_by_exact_label_or_ordinal() {
        let registry = Registry::new();
        let labels = registry.labels();
        assert_eq!(registry.resolve(&labels[0]).unwrap(), labels[0]);
        assert_eq!(registry.resolve("1").unwrap(), labels[0]);
    }

    #[test]
    fn unknown_label_is_an_error() {
        let registry = Registry::new();
        assert!(registry.resolve("not-a-real-source").is_err());
        assert!(registry.resolve("0").is_err());
        assert!(registry.resolve(&(registry.labels().len() + 1).to_string()).is_err());
    }
}
