//! Drug–disease association pairs
//!
//! Turns annotated output records into the edges consumed by the graph
//! builder: one pair per (drug, disease).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dmx_core::{MatchMethod, Mention};

/// Fields tried, in order, for a drug's display name
pub const DRUG_NAME_FIELDS: &[&str] = &["generic_name", "brand_name", "substance_name"];

/// Name used when no drug name field is present
pub const UNKNOWN_DRUG: &str = "[Unknown]";

/// One drug–disease edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugDiseasePair {
    pub drug: String,
    pub disease: String,
    pub category: Option<String>,
    pub method: MatchMethod,
    pub confidence: f64,
}

/// First string of a string-or-array value
fn first_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

/// Read `field` from the record, falling back to its `openfda` block
pub fn get_field<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(first_text)
        .or_else(|| record.get("openfda")?.get(field).and_then(first_text))
}

/// Display name of the drug in a label or output record
pub fn drug_name(record: &Value) -> &str {
    DRUG_NAME_FIELDS
        .iter()
        .find_map(|field| get_field(record, field))
        .unwrap_or(UNKNOWN_DRUG)
}

/// Pairs for one output record, keeping the most confident mention per
/// (drug, lowercased disease). Mentions below `min_confidence` are ignored.
pub fn association_pairs(record: &Value, min_confidence: f64) -> Vec<DrugDiseasePair> {
    let mentions: Vec<Mention> = match record.get("disease_mentions") {
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::warn!("Unreadable disease_mentions: {}", e);
            Vec::new()
        }),
        None => Vec::new(),
    };

    let drug = drug_name(record);
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut pairs: Vec<DrugDiseasePair> = Vec::new();

    for mention in mentions {
        if mention.confidence < min_confidence {
            continue;
        }
        let key = mention.disease.trim().to_lowercase();
        let pair = DrugDiseasePair {
            drug: drug.to_string(),
            disease: mention.disease,
            category: mention.category,
            method: mention.method,
            confidence: mention.confidence,
        };

        match slots.get(&key) {
            Some(&idx) if pair.confidence > pairs[idx].confidence => pairs[idx] = pair,
            Some(_) => {}
            None => {
                slots.insert(key, pairs.len());
                pairs.push(pair);
            }
        }
    }

    pairs
}
