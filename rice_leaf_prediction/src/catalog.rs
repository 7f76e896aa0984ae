use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, io, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse catalog file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseRecord {
    pub name: String,
    pub description: String,
    pub prevention: String,
    pub treatment: String,
}

/// Remediation text per disease, keyed by lowercased name.
#[derive(Debug, Clone, Default)]
pub struct DiseaseCatalog {
    records: HashMap<String, DiseaseRecord>,
}

impl DiseaseCatalog {
    /// When two records share a name the first one wins.
    pub fn new(records: Vec<DiseaseRecord>) -> Self {
        let mut by_name = HashMap::with_capacity(records.len());
        for record in records {
            by_name.entry(record.name.to_lowercase()).or_insert(record);
        }
        Self { records: by_name }
    }

    pub fn from_json(data: &str) -> Result<Self, CatalogError> {
        let records: Vec<DiseaseRecord> = serde_json::from_str(data)?;
        Ok(Self::new(records))
    }

    pub fn from_file(filepath: &Path) -> Result<Self, CatalogError> {
        let data = fs::read_to_string(filepath)?;
        Self::from_json(&data)
    }

    pub fn lookup(&self, display_name: &str) -> Option<&DiseaseRecord> {
        self.records.get(&display_name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"[
        {"name": "Healthy", "description": "ok", "prevention": "water", "treatment": "none"},
        {"name": "Blas Daun", "description": "fungus", "prevention": "spacing", "treatment": "fungicide"},
        {"name": "healthy", "description": "duplicate", "prevention": "-", "treatment": "-"}
    ]"#;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = DiseaseCatalog::from_json(CATALOG).unwrap();

        let lower = catalog.lookup("healthy").unwrap();
        let mixed = catalog.lookup("Healthy").unwrap();
        let upper = catalog.lookup("HEALTHY").unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(mixed, upper);
        assert_eq!(upper.description, "ok");
        assert_eq!(catalog.lookup("blas daun").unwrap().treatment, "fungicide");
    }

    #[test]
    fn test_lookup_missing() {
        let catalog = DiseaseCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.lookup("New Disease").is_none());
        assert!(catalog.lookup("Healthy ").is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let catalog = DiseaseCatalog::from_file(file.path()).unwrap();
        assert!(!catalog.is_empty());
    }

    #[test]
    fn test_shipped_assets_cover_every_label() {
        let assets = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets");
        let catalog = DiseaseCatalog::from_file(&assets.join("diseases.json")).unwrap();
        let mapper = crate::labels::LabelMapper::from_file(&assets.join("labels.txt")).unwrap();

        assert_eq!(mapper.num_classes(), 6);
        for index in 0..mapper.num_classes() {
            let display_name = mapper.to_display_name(mapper.class_label(index).unwrap());
            assert!(
                catalog.lookup(&display_name).is_some(),
                "no catalog record for {}",
                display_name
            );
        }
    }

    #[test]
    fn test_record_missing_field_is_rejected() {
        let data = r#"[{"name": "Healthy", "description": "ok"}]"#;
        assert!(matches!(
            DiseaseCatalog::from_json(data),
            Err(CatalogError::Parse(_))
        ));
    }
}
