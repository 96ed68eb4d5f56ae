//! Disease taxonomy
//!
//! Flattens the nested `{category: {disease_name: pattern}}` source into an
//! ordered list of compiled entries. Loaded once and shared read-only.

use std::collections::HashSet;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use dmx_core::{DmxError, Result};

/// Category returned when no taxonomy pattern matches
pub const OTHER_CATEGORY: &str = "Other";

/// One recognized disease with its matching pattern
#[derive(Debug, Clone)]
pub struct DiseaseEntry {
    pub name: String,
    pub category: String,
    pub pattern: String,
    regex: Regex,
}

impl DiseaseEntry {
    /// Compile a case-insensitive entry
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let pattern = pattern.into();
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| DmxError::InvalidPattern {
                name: name.clone(),
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            name,
            category: category.into(),
            pattern,
            regex,
        })
    }

    /// Whether the pattern matches anywhere in `text`
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// The catalog of recognized diseases, in source order
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    entries: Vec<DiseaseEntry>,
}

impl Taxonomy {
    /// Build from already compiled entries, rejecting duplicate names
    pub fn from_entries(entries: Vec<DiseaseEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(DmxError::TaxonomyLoad(format!(
                    "duplicate disease name {:?}",
                    entry.name
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Load a taxonomy JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DmxError::io(path, e))?;
        let taxonomy = Self::from_json_str(&content)?;
        tracing::info!(
            "Loaded {} disease entries from {}",
            taxonomy.len(),
            path.display()
        );
        Ok(taxonomy)
    }

    /// Parse taxonomy JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| DmxError::TaxonomyLoad(format!("invalid JSON: {e}")))?;
        Self::from_value(&value)
    }

    /// Flatten a two-level `{category: {name: pattern}}` mapping
    pub fn from_value(value: &Value) -> Result<Self> {
        let categories = value.as_object().ok_or_else(|| {
            DmxError::TaxonomyLoad("top level must be a category mapping".to_string())
        })?;

        let mut entries = Vec::new();
        for (category, diseases) in categories {
            let diseases = diseases.as_object().ok_or_else(|| {
                DmxError::TaxonomyLoad(format!(
                    "category {category:?} must map disease names to patterns"
                ))
            })?;

            for (name, pattern) in diseases {
                let pattern = pattern.as_str().ok_or_else(|| {
                    DmxError::TaxonomyLoad(format!(
                        "pattern for {name:?} in {category:?} must be a string"
                    ))
                })?;
                entries.push(DiseaseEntry::new(name, category, pattern)?);
            }
        }

        Self::from_entries(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DiseaseEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiseaseEntry> {
        self.entries.iter()
    }

    /// Look up an entry by its exact canonical name
    pub fn get(&self, name: &str) -> Option<&DiseaseEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Category of the first entry whose pattern matches the lowercased name.
    ///
    /// This is a linear re-scan of every pattern. Callers resolving many
    /// names should go through [`crate::CategoryResolver`], which consults a
    /// canonical-name index first.
    pub fn category_of(&self, disease_name: &str) -> &str {
        let lowered = disease_name.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.is_match(&lowered))
            .map(|e| e.category.as_str())
            .unwrap_or(OTHER_CATEGORY)
    }
}
