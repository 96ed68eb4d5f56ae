//! Clinical Named Entity Recognition (NER) module
//!
//! Rule-based recognizer for drug-label prose:
//! - Morphology rules: disorder suffixes (-itis, -osis, -emia, ...)
//! - Head-noun rules: "... disease", "... syndrome", "... infection"
//! - Dictionary: common diagnoses and their aliases
//! - Treatment phrases, tagged so they can be filtered downstream
//!
//! Overlapping spans are resolved by keeping the earliest, most confident one.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::{EntityRecognizer, RecognizedEntity};
use dmx_core::{DmxError, Result};

// ============================================================================
// Clinical Labels
// ============================================================================

/// Labels emitted by the clinical recognizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalLabel {
    /// Named disease or condition with disorder morphology
    Disorder,
    /// Condition phrase built around a head noun
    Problem,
    /// Known diagnosis from the dictionary
    Diagnosis,
    /// Therapy or treatment phrase
    Treatment,
}

impl ClinicalLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disorder => "DISORDER",
            Self::Problem => "PROBLEM",
            Self::Diagnosis => "DIAGNOSIS",
            Self::Treatment => "TREATMENT",
        }
    }
}

impl std::fmt::Display for ClinicalLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Rule-based clinical NER
// ============================================================================

/// Words stripped from the front of head-noun spans
const LEADING_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "associated", "at", "be", "by", "caused", "children",
    "due", "for", "from", "has", "have", "in", "indicated", "is", "its", "management", "of",
    "on", "or", "patients", "relief", "symptoms", "that", "the", "their", "this", "to",
    "treat", "treating", "treatment", "used", "with", "who", "adults",
];

const DISORDER_MODIFIERS: &str = "acute|chronic|severe|mild|moderate|rheumatoid|psoriatic|atopic|allergic|bacterial|viral|fungal|primary|secondary|juvenile|idiopathic|ulcerative|seasonal|perennial|essential";

const DISORDER_SUFFIXES: &str = "itis|osis|emia|aemia|oma|pathy|algia|plegia|penia|trophy|iasis";

const HEAD_NOUNS: &str = "disease|diseases|disorder|disorders|syndrome|infection|infections|deficiency|failure|insufficiency|cancer|carcinoma|tumor|tumors|tumour|tumours";

/// A compiled recognition rule
#[derive(Debug, Clone)]
struct Rule {
    regex: Regex,
    label: ClinicalLabel,
    confidence: f32,
    trim_leading: bool,
}

/// Rule-based clinical recognizer
#[derive(Debug, Clone)]
pub struct ClinicalNer {
    rules: Vec<Rule>,
}

impl ClinicalNer {
    /// Create a recognizer with the default clinical rules and dictionary
    pub fn new() -> Result<Self> {
        let mut ner = Self { rules: Vec::new() };
        ner.init_patterns()?;
        ner.init_dictionary()?;
        Ok(ner)
    }

    fn init_patterns(&mut self) -> Result<()> {
        self.add_pattern(
            &format!(
                r"\b(?:(?:{DISORDER_MODIFIERS})\s+)*[a-z][a-z-]*(?:{DISORDER_SUFFIXES})\b"
            ),
            ClinicalLabel::Disorder,
            0.85,
            false,
        )?;
        self.add_pattern(
            &format!(r"\b(?:[a-z][a-z0-9'-]*\s+){{1,3}}(?:{HEAD_NOUNS})\b"),
            ClinicalLabel::Problem,
            0.8,
            true,
        )?;
        self.add_pattern(
            r"\b[a-z][a-z-]*\s+(?:therapy|therapies|chemotherapy)\b",
            ClinicalLabel::Treatment,
            0.7,
            false,
        )?;
        Ok(())
    }

    fn init_dictionary(&mut self) -> Result<()> {
        self.add_term("hypertension", &["high blood pressure"])?;
        self.add_term("diabetes mellitus", &["diabetes", "t2dm", "t1dm"])?;
        self.add_term("asthma", &["bronchial asthma"])?;
        self.add_term("epilepsy", &["seizures", "seizure disorder"])?;
        self.add_term("migraine", &["migraine headache"])?;
        self.add_term("depression", &["major depressive disorder"])?;
        self.add_term("schizophrenia", &[])?;
        self.add_term("obesity", &[])?;
        self.add_term("angina", &["angina pectoris"])?;
        self.add_term("gout", &[])?;
        self.add_term("glaucoma", &[])?;
        self.add_term("pneumonia", &[])?;
        self.add_term("influenza", &["flu"])?;
        self.add_term("hiv", &["human immunodeficiency virus"])?;
        self.add_term("copd", &["chronic obstructive pulmonary disease"])?;
        self.add_term("acne", &["acne vulgaris"])?;
        self.add_term("eczema", &[])?;
        self.add_term("insomnia", &[])?;
        Ok(())
    }

    /// Add a case-insensitive regex rule
    fn add_pattern(
        &mut self,
        pattern: &str,
        label: ClinicalLabel,
        confidence: f32,
        trim_leading: bool,
    ) -> Result<()> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| DmxError::Recognizer(format!("bad rule {pattern:?}: {e}")))?;
        self.rules.push(Rule {
            regex,
            label,
            confidence,
            trim_leading,
        });
        Ok(())
    }

    /// Add a dictionary term; the main term scores above its aliases
    fn add_term(&mut self, term: &str, aliases: &[&str]) -> Result<()> {
        self.add_pattern(
            &format!(r"\b{}\b", regex::escape(term)),
            ClinicalLabel::Diagnosis,
            0.95,
            false,
        )?;
        for alias in aliases {
            self.add_pattern(
                &format!(r"\b{}\b", regex::escape(alias)),
                ClinicalLabel::Diagnosis,
                0.9,
                false,
            )?;
        }
        Ok(())
    }

    fn extract_by_rules(&self, text: &str) -> Vec<RecognizedEntity> {
        let mut entities = Vec::new();

        for rule in &self.rules {
            for mat in rule.regex.find_iter(text) {
                let (start, end) = if rule.trim_leading {
                    match trim_leading_stopwords(text, mat.start(), mat.end()) {
                        Some(span) => span,
                        None => continue,
                    }
                } else {
                    (mat.start(), mat.end())
                };

                entities.push(RecognizedEntity {
                    text: text[start..end].to_string(),
                    label: rule.label.to_string(),
                    start,
                    end,
                    confidence: rule.confidence,
                });
            }
        }

        entities
    }

    /// Remove overlapping entities, keeping the earliest and most confident
    fn deduplicate(&self, mut entities: Vec<RecognizedEntity>) -> Vec<RecognizedEntity> {
        entities.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(b.end.cmp(&a.end))
        });

        let mut result = Vec::new();
        let mut covered_until = 0usize;

        for entity in entities {
            if result.is_empty() || entity.start >= covered_until {
                covered_until = entity.end;
                result.push(entity);
            }
        }

        result
    }
}

/// Drop leading function words from a head-noun span. A span reduced to
/// the bare head noun carries no condition and is discarded.
fn trim_leading_stopwords(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let span = &text[start..end];
    let mut offset = 0;

    for word in span.split_whitespace() {
        let lowered = word.to_lowercase();
        if !LEADING_STOPWORDS.contains(&lowered.as_str()) {
            break;
        }
        let word_pos = span[offset..].find(word)? + offset;
        offset = word_pos + word.len();
    }

    let rest = &span[offset..];
    let trimmed_start = start + offset + (rest.len() - rest.trim_start().len());
    if text[trimmed_start..end].split_whitespace().count() < 2 {
        return None;
    }
    Some((trimmed_start, end))
}

impl EntityRecognizer for ClinicalNer {
    fn recognize(&self, text: &str) -> Result<Vec<RecognizedEntity>> {
        let entities = self.extract_by_rules(text);
        Ok(self.deduplicate(entities))
    }
}

// ============================================================================
// Tests
// ============================================================================
