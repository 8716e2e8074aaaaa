//! Index to Organism Names adapter (C14). ION ships a single flat TSV
//! with no hierarchy at all: one row in, one accepted `Name` usage out.

use std::path::Path;

use tracing::info;
use uuid::Uuid;

use crate::adapter::{BaseAdapter, SourceAdapter};
use crate::archive::ArchiveSink;
use crate::config::Config;
use crate::errors::Error;
use crate::model::{DatasetDescriptor, Meta, NameUsage, ID_NAMESPACE};

pub struct Ion {
    base: BaseAdapter,
}

impl Ion {
    pub fn new(_cfg: Config) -> Self {
        let descriptor = DatasetDescriptor::new("ion", "Index to Organism Names")
            .with_url("https://www.organismnames.com/download/ion.zip")
            .with_notes("ION ships `ion.tsv` inside a zip; no hierarchy is reconstructed.");
        Self { base: BaseAdapter::new(descriptor) }
    }

    fn import_meta(cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let meta = Meta {
            key: "ion".into(),
            title: "Index to Organism Names".into(),
            alias: Some("ION".into()),
            description: Some(
                "ION is a database of scientific names for all organisms, gathered from the \
                 Thomson Reuters/Zoological Record and other nomenclators."
                    .into(),
            ),
            url: Some("https://www.organismnames.com".into()),
            issued: cfg.issued_date.clone(),
            version: cfg.data_version.clone(),
            ..Default::default()
        };
        sink.insert_meta(&meta)
    }

    fn import_name_usages(path: &Path, batch_size: usize, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').has_headers(true).flexible(true).from_path(path)?;

        let mut batch = Vec::with_capacity(batch_size);
        let mut count = 0usize;

        for record in reader.records() {
            let record = record?;
            let id_field = record.get(0).unwrap_or_default().trim();
            let name = record.get(1).unwrap_or_default().trim();
            let authorship = record.get(2).unwrap_or_default().trim();

            if name.is_empty() {
                continue;
            }

            let id = Uuid::new_v5(&ID_NAMESPACE, format!("ion-{id_field}").as_bytes());
            let mut usage = NameUsage::new(id);
            usage.scientific_name = name.to_string();
            usage.authorship = (!authorship.is_empty()).then(|| authorship.to_string());
            usage.scientific_name_string = format!("{name} {authorship}").trim().to_string();
            usage.alternative_id = (!id_field.is_empty()).then(|| id_field.to_string());

            batch.push(usage);
            count += 1;
            if batch.len() >= batch_size {
                sink.insert_name_usages(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            sink.insert_name_usages(&batch)?;
        }

        info!(count, "ION name usages imported");
        Ok(())
    }
}

impl SourceAdapter for Ion {
    fn descriptor(&self) -> DatasetDescriptor {
        self.base.descriptor.clone()
    }

    fn to_archive(&self, cfg: &Config, sink: &mut dyn ArchiveSink) -> Result<(), Error> {
        Self::import_meta(cfg, sink)?;
        Self::import_name_usages(&cfg.extract_dir.join("ion.tsv"), cfg.batch_size, sink)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_a_handful_of_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ion.tsv");
        std::fs::write(&path, "id\tname\tauthorship\n1\tCanis lupus\tL., 1758\n2\tFelis catus\tL., 1758\n").unwrap();

        struct Collector(Vec<NameUsage>);
        impl ArchiveSink for Collector {
            fn insert_meta(&mut self, _: &crate::model::Meta) -> Result<(), Error> {
                Ok(())
            }
            fn insert_references(&mut self, _: &[crate::model::Reference]) -> Result<(), Error> {
                Ok(())
            }
            fn insert_name_usages(&mut self, usages: &[NameUsage]) -> Result<(), Error> {
                self.0.extend_from_slice(usages);
                Ok(())
            }
            fn insert_vernaculars(&mut self, _: &[crate::model::Vernacular]) -> Result<(), Error> {
                Ok(())
            }
            fn insert_distributions(&mut self, _: &[crate::model::Distribution]) -> Result<(), Error> {
                Ok(())
            }
            fn insert_type_materials(&mut self, _: &[crate::model::TypeMaterial]) -> Result<(), Error> {
                Ok(())
            }
            fn infer_basionyms(&mut self, _: crate::model::BasionymInferenceOptions) -> Result<(), Error> {
                Ok(())
            }
            fn export(&mut self, _: &Path, _: bool) -> Result<(), Error> {
                Ok(())
            }
            fn close(self) -> Result<(), Error> {
                Ok(())
            }
        }

        let mut collector = Collector(Vec::new());
        Ion::import_name_usages(&path, 50, &mut collector).unwrap();
        assert_eq!(collector.0.len(), 2);
        assert_eq!(collector.0[0].scientific_name_string, "Canis lupus L., 1758");
    }
}
