//! DMX Configuration Management
//!
//! Handles configuration from TOML files and environment variables
//! with defaults matching the openFDA label extraction layout.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Matching and batching behaviour
    pub extraction: ExtractionConfig,

    /// Input, output and checkpoint locations
    pub paths: PathsConfig,

    /// Output record assembly
    pub output: OutputConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError { path, message },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    /// Merge with environment variables. Every variable that is set wins
    /// over the current value, even when it equals the default.
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var("DMX_BATCH_SIZE") {
            self.extraction.batch_size = parse_env("DMX_BATCH_SIZE", value)?;
        }
        if let Ok(value) = std::env::var("DMX_FUZZY_THRESHOLD") {
            self.extraction.fuzzy_threshold = parse_env("DMX_FUZZY_THRESHOLD", value)?;
        }
        if let Ok(value) = std::env::var("DMX_THROTTLE_MS") {
            self.extraction.throttle_ms = parse_env("DMX_THROTTLE_MS", value)?;
        }
        if let Ok(path) = std::env::var("DMX_CHECKPOINT_PATH") {
            self.paths.checkpoint = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("DMX_OUTPUT_PATH") {
            self.paths.output = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("DMX_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extraction.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "extraction.batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        if self.extraction.fuzzy_threshold > 100 {
            return Err(ConfigError::InvalidValue {
                key: "extraction.fuzzy_threshold".to_string(),
                value: self.extraction.fuzzy_threshold.to_string(),
            });
        }
        if self.output.join_key.is_empty() {
            return Err(ConfigError::MissingRequired("output.join_key".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Matching and batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Records per checkpointed batch
    pub batch_size: usize,

    /// Minimum partial-ratio score (0-100) for a fuzzy mention
    pub fuzzy_threshold: u8,

    /// Label fields scanned for mentions
    pub essential_fields: Vec<String>,

    /// Phrases that exclude a whole field from extraction
    pub section_blacklist: Vec<String>,

    /// Delay between records in milliseconds (0 disables)
    pub throttle_ms: u64,

    /// Run the fuzzy matcher
    pub enable_fuzzy: bool,

    /// Run the NER matcher
    pub enable_ner: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            fuzzy_threshold: 90,
            essential_fields: vec!["indications_and_usage".to_string()],
            section_blacklist: [
                "limitations of use",
                "warnings",
                "precautions",
                "not recommended",
                "contraindicated",
                "use in specific populations",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            throttle_ms: 50,
            enable_fuzzy: true,
            enable_ner: true,
        }
    }
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Nested category -> name -> pattern JSON
    pub disease_patterns: PathBuf,

    /// Label records (JSONL)
    pub label_input: PathBuf,

    /// Enrichment records keyed by the join key (JSONL)
    pub enrichment_input: Option<PathBuf>,

    /// Checkpoint file
    pub checkpoint: PathBuf,

    /// Output records (JSONL, appended)
    pub output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            disease_patterns: PathBuf::from("data/disease_patterns.json"),
            label_input: PathBuf::from("data/label_extracted.jsonl"),
            enrichment_input: Some(PathBuf::from("data/ndc_extracted.jsonl")),
            checkpoint: PathBuf::from("data/label_checkpoint.json"),
            output: PathBuf::from("data/label_extracted_with_diseases.jsonl"),
        }
    }
}

/// Output record assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Label identifier copied into every output record
    pub id_key: String,

    /// Field shared by label and enrichment records
    pub join_key: String,

    /// Member of a label record holding its sections
    pub label_data_key: String,

    /// Leading key order of output records
    pub field_order: Vec<String>,

    /// Uppercase identifier and enrichment strings
    pub uppercase_values: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            id_key: "spl_id".to_string(),
            join_key: "product_ndc".to_string(),
            label_data_key: "label_data".to_string(),
            field_order: [
                "spl_id",
                "product_ndc",
                "brand_name",
                "generic_name",
                "disease_mentions",
                "route",
                "dosage_form",
                "labeler_name",
                "product_type",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            uppercase_values: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
