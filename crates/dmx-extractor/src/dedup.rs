//! Mention deduplication
//!
//! Used both per field and across all fields of a record.

use std::collections::HashMap;

use dmx_core::Mention;

/// Keep one mention per (lowercased disease, method).
///
/// The survivor is the mention with strictly greatest confidence; on ties
/// the first one seen wins. Output order follows the first appearance of
/// each key.
pub fn dedupe(mentions: impl IntoIterator<Item = Mention>) -> Vec<Mention> {
    let mut slots: HashMap<_, usize> = HashMap::new();
    let mut result: Vec<Mention> = Vec::new();

    for mention in mentions {
        match slots.get(&mention.dedup_key()) {
            Some(&idx) => {
                if mention.confidence > result[idx].confidence {
                    result[idx] = mention;
                }
            }
            None => {
                slots.insert(mention.dedup_key(), result.len());
                result.push(mention);
            }
        }
    }

    result
}
