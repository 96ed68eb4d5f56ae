//! DMX Extractor - Disease mention extraction pipeline
//!
//! Finds disease concepts in drug-label sections with three matchers
//! (regex, fuzzy, clinical NER), deduplicates them per record and drives
//! checkpointed batch runs over JSONL label dumps.

use dmx_core::{MatchMethod, Mention, Result};

/// Entity span produced by a named-entity recognizer
#[derive(Debug, Clone)]
pub struct RecognizedEntity {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
}

/// Trait for named-entity recognizers
pub trait EntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Result<Vec<RecognizedEntity>>;
}

/// Trait for strategies that find disease mentions in normalized text
pub trait MentionMatcher: Send + Sync {
    fn method(&self) -> MatchMethod;
    fn find_mentions(&self, text: &str) -> Result<Vec<Mention>>;
}

pub mod checkpoint;
pub mod dedup;
pub mod driver;
pub mod extract;
pub mod fuzzy;
pub mod matchers;
pub mod ner;
pub mod normalize;
pub mod pairs;
pub mod resolver;
pub mod taxonomy;

pub use checkpoint::{CheckpointStore, JsonlSink, MemorySink, OutputSink};
pub use dedup::dedupe;
pub use driver::{read_jsonl, BatchDriver, BatchStats, DriverState, RunSummary};
pub use extract::MentionExtractor;
pub use matchers::{FuzzyMatcher, NerMatcher, RegexMatcher};
pub use ner::ClinicalNer;
pub use normalize::{flatten, SectionFilter};
pub use pairs::{association_pairs, drug_name, DrugDiseasePair};
pub use resolver::CategoryResolver;
pub use taxonomy::{DiseaseEntry, Taxonomy};
