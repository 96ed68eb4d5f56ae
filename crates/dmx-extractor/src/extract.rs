//! Per-record mention extraction
//!
//! Runs every enabled matcher over each configured label field, skipping
//! blacklisted sections, and merges the results with [`dedupe`].

use std::sync::Arc;

use serde_json::{Map, Value};

use dmx_core::{ExtractionConfig, ExtractionResult, Mention, Result};

use crate::dedup::dedupe;
use crate::matchers::{FuzzyMatcher, NerMatcher, RegexMatcher};
use crate::ner::ClinicalNer;
use crate::normalize::{flatten, SectionFilter};
use crate::taxonomy::Taxonomy;
use crate::{EntityRecognizer, MentionMatcher};

/// Combines matchers and the section filter for one taxonomy
pub struct MentionExtractor {
    taxonomy: Arc<Taxonomy>,
    matchers: Vec<Box<dyn MentionMatcher>>,
    filter: SectionFilter,
    fields: Vec<String>,
}

impl MentionExtractor {
    /// Regex matching only, no section filter, no fields
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            matchers: vec![Box::new(RegexMatcher::new(taxonomy.clone()))],
            taxonomy,
            filter: SectionFilter::default(),
            fields: Vec::new(),
        }
    }

    /// Build the extractor described by the configuration, using the
    /// built-in clinical recognizer for NER
    pub fn from_config(taxonomy: Arc<Taxonomy>, config: &ExtractionConfig) -> Result<Self> {
        let mut extractor = Self::new(taxonomy)
            .with_section_blacklist(&config.section_blacklist)
            .with_fields(config.essential_fields.clone());

        if config.enable_fuzzy {
            extractor = extractor.with_fuzzy(config.fuzzy_threshold);
        }
        if config.enable_ner {
            extractor = extractor.with_recognizer(Arc::new(ClinicalNer::new()?));
        }
        Ok(extractor)
    }

    /// Enable fuzzy matching at the given threshold (0-100)
    pub fn with_fuzzy(mut self, threshold: u8) -> Self {
        self.matchers.push(Box::new(
            FuzzyMatcher::new(self.taxonomy.clone()).with_threshold(threshold),
        ));
        self
    }

    /// Enable NER matching backed by `recognizer`
    pub fn with_recognizer(mut self, recognizer: Arc<dyn EntityRecognizer>) -> Self {
        self.matchers.push(Box::new(NerMatcher::new(recognizer)));
        self
    }

    /// Add a custom matcher
    pub fn with_matcher(mut self, matcher: Box<dyn MentionMatcher>) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn with_section_blacklist<S: AsRef<str>>(mut self, phrases: &[S]) -> Self {
        self.filter = SectionFilter::new(phrases);
        self
    }

    /// Label fields scanned by [`Self::extract_from_label`]
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    /// Run all matchers over already normalized text.
    ///
    /// A failing matcher is logged and skipped so the others still
    /// contribute.
    pub fn extract_from_text(&self, text: &str) -> Vec<Mention> {
        let mut mentions = Vec::new();
        for matcher in &self.matchers {
            match matcher.find_mentions(text) {
                Ok(found) => mentions.extend(found),
                Err(e) => tracing::warn!("{} matcher failed: {}", matcher.method(), e),
            }
        }
        mentions
    }

    /// Extract from one raw field value, unless it is empty or blacklisted
    pub fn extract_from_field(&self, value: &Value) -> ExtractionResult {
        let text = flatten(value);
        if text.trim().is_empty() {
            return Vec::new();
        }

        if let Some(phrase) = self.filter.matched_phrase(&text) {
            tracing::debug!("Skipping field containing {:?}", phrase);
            return Vec::new();
        }

        dedupe(self.extract_from_text(&text))
    }

    /// Extract across all configured fields, merged into one result
    pub fn extract_from_label(&self, label_data: &Map<String, Value>) -> ExtractionResult {
        let mentions = self
            .fields
            .iter()
            .filter_map(|field| label_data.get(field))
            .flat_map(|value| self.extract_from_field(value));

        dedupe(mentions)
    }
}
