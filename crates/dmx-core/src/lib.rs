//! DMX Core - Domain models, errors, and configuration
//!
//! This crate defines the shared abstractions used by the extraction
//! pipeline:
//! - Disease mention model (method tag, confidence, category)
//! - Checkpoint record for resumable batch runs
//! - Common error types
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, ConfigError, ExtractionConfig, LoggingConfig, OutputConfig, PathsConfig,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for DMX operations
#[derive(Error, Debug)]
pub enum DmxError {
    #[error("Failed to load disease taxonomy: {0}")]
    TaxonomyLoad(String),

    #[error("Invalid pattern for disease {name:?} ({pattern:?}): {message}")]
    InvalidPattern {
        name: String,
        pattern: String,
        message: String,
    },

    #[error("Malformed input {path}:{line}: {message}")]
    Input {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Entity recognizer failed: {0}")]
    Recognizer(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DmxError {
    /// Wrap an IO error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DmxError>;

// ============================================================================
// Mentions
// ============================================================================

/// Strategy that produced a mention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    /// Taxonomy pattern matched the text
    Regex,
    /// Partial-ratio similarity cleared the threshold
    Fuzzy,
    /// Named-entity recognizer tagged a clinical disorder
    Ner,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Fuzzy => "fuzzy",
            Self::Ner => "ner",
        }
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MatchMethod {
    type Err = DmxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "regex" => Ok(Self::Regex),
            "fuzzy" => Ok(Self::Fuzzy),
            "ner" => Ok(Self::Ner),
            other => Err(DmxError::Other(anyhow::anyhow!(
                "unknown match method: {other}"
            ))),
        }
    }
}

/// A single detected occurrence of a disease concept in label text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    /// Canonical taxonomy name, or the surface text for NER mentions
    pub disease: String,

    /// Detection strategy
    pub method: MatchMethod,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// Taxonomy category, unknown for NER mentions
    pub category: Option<String>,
}

impl Mention {
    /// Create a new mention, clamping confidence into [0, 1]
    pub fn new(
        disease: impl Into<String>,
        method: MatchMethod,
        confidence: f64,
        category: Option<String>,
    ) -> Self {
        Self {
            disease: disease.into(),
            method,
            confidence: confidence.clamp(0.0, 1.0),
            category,
        }
    }

    /// Identity used for deduplication: (lowercased, trimmed name, method)
    pub fn dedup_key(&self) -> (String, MatchMethod) {
        (self.disease.trim().to_lowercase(), self.method)
    }
}

/// Deduplicated mentions found in one label record
pub type ExtractionResult = Vec<Mention>;

// ============================================================================
// Checkpoint
// ============================================================================

/// Persisted progress marker for resumable batch processing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Number of input records already committed to the output
    pub last_offset: usize,
}

impl Checkpoint {
    pub fn new(last_offset: usize) -> Self {
        Self { last_offset }
    }

    /// Move the offset forward; never moves backwards
    pub fn advance_to(&mut self, offset: usize) {
        self.last_offset = self.last_offset.max(offset);
    }
}

// ============================================================================
// Tests
// ============================================================================
