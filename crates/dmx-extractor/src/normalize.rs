//! Text normalization
//!
//! Label sections arrive as strings, lists of strings, or nested objects.
//! [`flatten`] collapses any of these into one searchable string and
//! [`SectionFilter`] decides whether a field is cautionary context that
//! must not feed extraction.

use serde_json::Value;

/// Join nested text into a single space-separated string.
///
/// Arrays and object values are visited in order; object keys are dropped.
/// Non-text leaves (null, numbers, booleans) contribute an empty string.
pub fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(flatten).collect::<Vec<_>>().join(" "),
        Value::Object(map) => map.values().map(flatten).collect::<Vec<_>>().join(" "),
        Value::Null | Value::Bool(_) | Value::Number(_) => String::new(),
    }
}

/// Case-insensitive substring check against blacklist phrases
pub fn is_excluded<S: AsRef<str>>(text: &str, blacklist_phrases: &[S]) -> bool {
    let lowered = text.to_lowercase();
    blacklist_phrases
        .iter()
        .map(|p| p.as_ref().trim().to_lowercase())
        .any(|p| !p.is_empty() && lowered.contains(&p))
}

/// Pre-lowercased section blacklist
#[derive(Debug, Clone, Default)]
pub struct SectionFilter {
    phrases: Vec<String>,
}

impl SectionFilter {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// First blacklist phrase contained in `text`, if any
    pub fn matched_phrase(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.phrases
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
    }

    pub fn is_excluded(&self, text: &str) -> bool {
        self.matched_phrase(text).is_some()
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}
