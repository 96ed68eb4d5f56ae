//! Mention matchers
//!
//! Three independent strategies over normalized label text, each tagging
//! its mentions with the method that found them:
//! - [`RegexMatcher`]: taxonomy patterns, confidence 1.0
//! - [`FuzzyMatcher`]: partial-ratio similarity against disease names
//! - [`NerMatcher`]: clinical entity recognizer, category left unknown

use std::sync::Arc;

use dmx_core::{MatchMethod, Mention, Result};

use crate::fuzzy::partial_ratio;
use crate::taxonomy::Taxonomy;
use crate::{EntityRecognizer, MentionMatcher};

/// Default fuzzy acceptance threshold (0-100)
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 90;

/// NER labels accepted as clinical disorders
const DISORDER_LABELS: &[&str] = &["problem", "disorder", "diagnosis"];

// ============================================================================
// Regex
// ============================================================================

/// Emits one mention per taxonomy entry whose pattern matches the text
pub struct RegexMatcher {
    taxonomy: Arc<Taxonomy>,
}

impl RegexMatcher {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self { taxonomy }
    }
}

impl MentionMatcher for RegexMatcher {
    fn method(&self) -> MatchMethod {
        MatchMethod::Regex
    }

    fn find_mentions(&self, text: &str) -> Result<Vec<Mention>> {
        Ok(self
            .taxonomy
            .iter()
            .filter(|entry| entry.is_match(text))
            .map(|entry| {
                Mention::new(
                    &entry.name,
                    MatchMethod::Regex,
                    1.0,
                    Some(entry.category.clone()),
                )
            })
            .collect())
    }
}

// ============================================================================
// Fuzzy
// ============================================================================

/// Emits a mention when a disease name approximately appears in the text
pub struct FuzzyMatcher {
    taxonomy: Arc<Taxonomy>,
    threshold: u8,
}

impl FuzzyMatcher {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            taxonomy,
            threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    /// Set the acceptance threshold (capped at 100)
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold.min(100);
        self
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }
}

impl MentionMatcher for FuzzyMatcher {
    fn method(&self) -> MatchMethod {
        MatchMethod::Fuzzy
    }

    fn find_mentions(&self, text: &str) -> Result<Vec<Mention>> {
        let lowered = text.to_lowercase();
        let mut mentions = Vec::new();

        for entry in self.taxonomy.iter() {
            let score = partial_ratio(&entry.name, &lowered);
            if score >= self.threshold {
                mentions.push(Mention::new(
                    &entry.name,
                    MatchMethod::Fuzzy,
                    f64::from(score) / 100.0,
                    Some(entry.category.clone()),
                ));
            }
        }

        Ok(mentions)
    }
}

// ============================================================================
// NER
// ============================================================================

/// Emits mentions for recognized entities that look like disorders
pub struct NerMatcher {
    recognizer: Arc<dyn EntityRecognizer>,
}

impl NerMatcher {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>) -> Self {
        Self { recognizer }
    }
}

impl MentionMatcher for NerMatcher {
    fn method(&self) -> MatchMethod {
        MatchMethod::Ner
    }

    fn find_mentions(&self, text: &str) -> Result<Vec<Mention>> {
        let entities = self.recognizer.recognize(text)?;

        Ok(entities
            .into_iter()
            .filter(|e| {
                let label = e.label.to_lowercase();
                e.text.to_lowercase().contains("disease") || DISORDER_LABELS.contains(&label.as_str())
            })
            .filter(|e| !e.text.trim().is_empty())
            .map(|e| Mention::new(e.text.trim(), MatchMethod::Ner, 1.0, None))
            .collect())
    }
}
