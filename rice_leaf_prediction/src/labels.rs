use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Labels file {0} contains no labels")]
    Empty(String),
}

/// Curated display names for the classes of the deployed model.
const CURATED_NAMES: [(&str, &str); 6] = [
    ("bacterial_leaf_blight", "Hawar Daun Bakteri"),
    ("brown_spot", "Bercak Coklat"),
    ("healthy", "Daun Sehat"),
    ("leaf_blast", "Blas Daun"),
    ("narrow_brown_spot", "Bercak Daun Coklat Sempit"),
    ("sheath_blight", "Hawar Pelepah Daun"),
];

/// Reads the newline-delimited class list. Line order is the model's output order.
pub fn load_labels(filepath: &Path) -> Result<Vec<String>, LabelsError> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.trim();
        if label.is_empty() {
            continue;
        }
        labels.push(label.to_string());
    }

    if labels.is_empty() {
        return Err(LabelsError::Empty(filepath.display().to_string()));
    }

    Ok(labels)
}

/// Maps model class identifiers to the names shown to users.
#[derive(Debug, Clone)]
pub struct LabelMapper {
    class_labels: Vec<String>,
    display_names: HashMap<String, String>,
}

impl LabelMapper {
    pub fn new(class_labels: Vec<String>) -> Self {
        let display_names = CURATED_NAMES
            .iter()
            .map(|(label, name)| (label.to_string(), name.to_string()))
            .collect();

        Self {
            class_labels,
            display_names,
        }
    }

    pub fn from_file(filepath: &Path) -> Result<Self, LabelsError> {
        Ok(Self::new(load_labels(filepath)?))
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    pub fn class_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    pub fn to_display_name(&self, class_label: &str) -> String {
        match self.display_names.get(class_label) {
            Some(name) => name.clone(),
            None => fallback_display_name(class_label),
        }
    }
}

/// Underscores become spaces, then every word is title-cased.
pub fn fallback_display_name(class_label: &str) -> String {
    title_case(&class_label.replace('_', " "))
}

fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut previous_is_letter = false;

    for c in text.chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                result.extend(c.to_lowercase());
            } else {
                result.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            result.push(c);
            previous_is_letter = false;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mapper() -> LabelMapper {
        LabelMapper::new(
            CURATED_NAMES
                .iter()
                .map(|(label, _)| label.to_string())
                .collect(),
        )
    }

    #[test]
    fn test_curated_names() {
        let mapper = mapper();
        assert_eq!(
            mapper.to_display_name("bacterial_leaf_blight"),
            "Hawar Daun Bakteri"
        );
        assert_eq!(mapper.to_display_name("brown_spot"), "Bercak Coklat");
        assert_eq!(mapper.to_display_name("healthy"), "Daun Sehat");
        assert_eq!(mapper.to_display_name("leaf_blast"), "Blas Daun");
        assert_eq!(
            mapper.to_display_name("narrow_brown_spot"),
            "Bercak Daun Coklat Sempit"
        );
        assert_eq!(mapper.to_display_name("sheath_blight"), "Hawar Pelepah Daun");
    }

    #[test]
    fn test_fallback_for_unmapped_label() {
        let mapper = mapper();
        assert_eq!(mapper.to_display_name("new_disease"), "New Disease");
        assert_eq!(mapper.to_display_name("LEAF_smut"), "Leaf Smut");
        assert_eq!(mapper.to_display_name("tungro2_virus"), "Tungro2 Virus");
        assert_eq!(mapper.to_display_name(""), "");
    }

    #[test]
    fn test_fallback_is_idempotent() {
        for label in ["new_disease", "false_smut", "x__y", "already Title", "näive_case"] {
            let once = fallback_display_name(label);
            assert_eq!(fallback_display_name(&once), once);
        }
    }

    #[test]
    fn test_load_labels_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bacterial_leaf_blight\n brown_spot \n\nhealthy\n").unwrap();

        let labels = load_labels(file.path()).unwrap();
        assert_eq!(labels, vec!["bacterial_leaf_blight", "brown_spot", "healthy"]);

        let mapper = LabelMapper::new(labels);
        assert_eq!(mapper.num_classes(), 3);
        assert_eq!(mapper.class_label(1), Some("brown_spot"));
        assert_eq!(mapper.class_label(3), None);
    }

    #[test]
    fn test_load_empty_labels_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            load_labels(file.path()),
            Err(LabelsError::Empty(_))
        ));
    }
}
