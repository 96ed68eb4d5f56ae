//! Category resolution
//!
//! Maps mentions back to taxonomy categories for downstream grouping.

use std::collections::HashMap;
use std::sync::Arc;

use dmx_core::Mention;

use crate::taxonomy::Taxonomy;

/// Number of categories named in a cluster label
const CLUSTER_LABEL_CATEGORIES: usize = 3;

/// Label for a cluster with no diseases to vote
pub const UNKNOWN_CLUSTER: &str = "Unknown Cluster";

/// Shared category lookup over a loaded taxonomy
#[derive(Debug, Clone)]
pub struct CategoryResolver {
    taxonomy: Arc<Taxonomy>,
    /// Lowercased canonical name -> category
    index: HashMap<String, String>,
}

impl CategoryResolver {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        let index = taxonomy
            .iter()
            .map(|e| (e.name.to_lowercase(), e.category.clone()))
            .collect();
        Self { taxonomy, index }
    }

    /// Category by pattern re-scan; "Other" if nothing matches
    pub fn category_of(&self, disease_name: &str) -> &str {
        self.taxonomy.category_of(disease_name)
    }

    /// Category for a name: canonical index first, then pattern re-scan
    pub fn lookup(&self, disease_name: &str) -> &str {
        self.index
            .get(&disease_name.trim().to_lowercase())
            .map(String::as_str)
            .unwrap_or_else(|| self.category_of(disease_name))
    }

    /// Category for a mention, preferring the one it was tagged with
    pub fn resolve<'a>(&'a self, mention: &'a Mention) -> &'a str {
        match mention.category.as_deref() {
            Some(category) => category,
            None => self.lookup(&mention.disease),
        }
    }

    /// Name a group of diseases after its most common categories, e.g.
    /// "Autoimmune-Oncology Medications". Unmatched names vote as "Other".
    pub fn cluster_label<'a, I>(&self, diseases: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for disease in diseases {
            let category = self.lookup(disease);
            if category.is_empty() {
                continue;
            }
            match counts.iter_mut().find(|(c, _)| *c == category) {
                Some((_, n)) => *n += 1,
                None => counts.push((category, 1)),
            }
        }

        if counts.is_empty() {
            return UNKNOWN_CLUSTER.to_string();
        }

        // Stable sort keeps first-appearance order among equal counts
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let top: Vec<&str> = counts
            .iter()
            .take(CLUSTER_LABEL_CATEGORIES)
            .map(|(c, _)| *c)
            .collect();
        format!("{} Medications", top.join("-"))
    }
}
