//! Batch extraction driver
//!
//! Walks the label records in checkpointed batches:
//!
//! ```text
//! Idle -> LoadingInputs -> ProcessingBatch -> Checkpointing -+-> Done
//!                               ^                            |
//!                               +----------------------------+
//! ```
//!
//! Each batch's output is written to the sink before the checkpoint
//! advances, so a crash re-processes at most the in-flight batch
//! (at-least-once delivery). One driver per checkpoint/output pair.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use dmx_core::{AppConfig, Checkpoint, DmxError, ExtractionResult, OutputConfig, Result};

use crate::checkpoint::{CheckpointStore, JsonlSink, OutputSink};
use crate::extract::MentionExtractor;
use crate::taxonomy::Taxonomy;

/// Output member holding the extracted mentions
pub const MENTIONS_FIELD: &str = "disease_mentions";

// ============================================================================
// State
// ============================================================================

/// Lifecycle of a driver run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    LoadingInputs,
    ProcessingBatch,
    Checkpointing,
    Done,
    Failed,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::LoadingInputs => write!(f, "loading_inputs"),
            Self::ProcessingBatch => write!(f, "processing_batch"),
            Self::Checkpointing => write!(f, "checkpointing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Offset the run resumed from
    pub start_offset: usize,
    /// Offset persisted at the end of the run
    pub end_offset: usize,
    pub batches: usize,
    pub records_processed: usize,
    /// Records that carried no label data
    pub records_without_label: usize,
    pub mentions_emitted: usize,
}

/// Counters for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub records: usize,
    pub records_without_label: usize,
    pub mentions: usize,
}

// ============================================================================
// Input loading
// ============================================================================

/// Read a JSONL file of objects. Blank lines are ignored; lines that are
/// not UTF-8 or do not parse to an object are skipped with a warning. IO
/// failures are fatal.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<Map<String, Value>>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| DmxError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| DmxError::io(path, e))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        match parse_line(&buf) {
            Ok(Some(map)) => records.push(map),
            Ok(None) => {}
            Err(message) => {
                let err = DmxError::Input {
                    path: path.to_path_buf(),
                    line: line_no,
                    message,
                };
                tracing::warn!("Skipping record: {}", err);
            }
        }
    }

    Ok(records)
}

/// One raw JSONL line: `None` for blank lines
fn parse_line(raw: &[u8]) -> std::result::Result<Option<Map<String, Value>>, String> {
    let line = std::str::from_utf8(raw).map_err(|e| format!("invalid UTF-8: {e}"))?;
    if line.trim().is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// String form of a join-key value: a string, the first string of an
/// array, or a number
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(key_string),
        _ => None,
    }
}

/// Index enrichment records by join key, dropping the key from the
/// stored fields. Later records win on duplicate keys.
pub fn index_enrichment(
    records: Vec<Map<String, Value>>,
    join_key: &str,
) -> HashMap<String, Map<String, Value>> {
    let mut index = HashMap::new();
    for mut record in records {
        let Some(key) = record.get(join_key).and_then(key_string) else {
            continue;
        };
        record.remove(join_key);
        index.insert(key, record);
    }
    index
}

// ============================================================================
// Record assembly
// ============================================================================

fn uppercase_values(value: &mut Value) {
    match value {
        Value::String(s) => *s = s.to_uppercase(),
        Value::Array(items) => items.iter_mut().for_each(uppercase_values),
        Value::Object(map) => map.values_mut().for_each(uppercase_values),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Put `order` keys first, then the rest in their existing order
fn reorder_fields(mut record: Map<String, Value>, order: &[String]) -> Map<String, Value> {
    let mut ordered = Map::new();
    for key in order {
        if let Some(value) = record.remove(key) {
            ordered.insert(key.clone(), value);
        }
    }
    ordered.extend(record);
    ordered
}

// ============================================================================
// Driver
// ============================================================================

/// Checkpointed, resumable extraction over in-memory label records
pub struct BatchDriver<S: OutputSink> {
    extractor: MentionExtractor,
    output: OutputConfig,
    batch_size: usize,
    throttle: Duration,
    labels: Vec<Map<String, Value>>,
    enrichment: HashMap<String, Map<String, Value>>,
    store: CheckpointStore,
    checkpoint: Checkpoint,
    sink: S,
    state: DriverState,
    run_id: Uuid,
}

impl BatchDriver<JsonlSink> {
    /// Load the taxonomy, inputs and checkpoint named by `config`.
    ///
    /// Any load failure is fatal; there is no default taxonomy.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        tracing::debug!("Driver state: {} -> {}", DriverState::Idle, DriverState::LoadingInputs);

        let loaded = Self::load_inputs(config);
        if let Err(e) = &loaded {
            tracing::error!("Driver state: {} ({})", DriverState::Failed, e);
        }
        let (extractor, labels, enrichment) = loaded?;

        let driver = BatchDriver::new(
            extractor,
            config.output.clone(),
            labels,
            enrichment,
            CheckpointStore::new(&config.paths.checkpoint),
            JsonlSink::new(&config.paths.output),
        )?
        .with_batch_size(config.extraction.batch_size)
        .with_throttle(Duration::from_millis(config.extraction.throttle_ms));

        Ok(driver)
    }

    #[allow(clippy::type_complexity)]
    fn load_inputs(
        config: &AppConfig,
    ) -> Result<(
        MentionExtractor,
        Vec<Map<String, Value>>,
        HashMap<String, Map<String, Value>>,
    )> {
        let taxonomy = Arc::new(Taxonomy::load(&config.paths.disease_patterns)?);
        let extractor = MentionExtractor::from_config(taxonomy, &config.extraction)?;

        if config.extraction.essential_fields.is_empty() {
            tracing::warn!("No essential fields configured; every record will have no mentions");
        }

        let labels = read_jsonl(&config.paths.label_input)?;
        tracing::info!(
            "Loaded {} label records from {}",
            labels.len(),
            config.paths.label_input.display()
        );

        let enrichment = match &config.paths.enrichment_input {
            Some(path) => {
                let index = index_enrichment(read_jsonl(path)?, &config.output.join_key);
                tracing::info!("Indexed {} enrichment records from {}", index.len(), path.display());
                index
            }
            None => HashMap::new(),
        };

        Ok((extractor, labels, enrichment))
    }
}

impl<S: OutputSink> BatchDriver<S> {
    /// Build a driver over preloaded inputs, resuming from the stored checkpoint
    pub fn new(
        extractor: MentionExtractor,
        output: OutputConfig,
        labels: Vec<Map<String, Value>>,
        enrichment: HashMap<String, Map<String, Value>>,
        store: CheckpointStore,
        sink: S,
    ) -> Result<Self> {
        let checkpoint = store.load()?;
        Ok(Self {
            extractor,
            output,
            batch_size: 100,
            throttle: Duration::ZERO,
            labels,
            enrichment,
            store,
            checkpoint,
            sink,
            state: DriverState::LoadingInputs,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Delay inserted after every record
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of label records
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn transition(&mut self, next: DriverState) {
        tracing::debug!("Driver state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Label sections of a record: the `label_data_key` member when the
    /// record has one, otherwise the record itself
    fn label_data<'a>(&self, record: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
        match record.get(&self.output.label_data_key) {
            Some(Value::Object(data)) if !data.is_empty() => Some(data),
            Some(_) => None,
            None => Some(record),
        }
    }

    /// Combine identifiers, mentions and enrichment into one output record
    fn assemble(&self, record: &Map<String, Value>, mentions: &ExtractionResult) -> Value {
        let id_key = &self.output.id_key;
        let join_key = &self.output.join_key;

        let prepare = |value: Option<&Value>| {
            let mut value = value.cloned().unwrap_or(Value::Null);
            if self.output.uppercase_values {
                uppercase_values(&mut value);
            }
            value
        };

        let mut fields = Map::new();
        fields.insert(id_key.clone(), prepare(record.get(id_key)));
        fields.insert(join_key.clone(), prepare(record.get(join_key)));

        let mentions = serde_json::to_value(mentions).unwrap_or_else(|e| {
            tracing::warn!("Could not serialize mentions: {}", e);
            Value::Array(Vec::new())
        });
        fields.insert(MENTIONS_FIELD.to_string(), mentions);

        if let Some(enrichment) = record
            .get(join_key)
            .and_then(key_string)
            .and_then(|key| self.enrichment.get(&key))
        {
            for (key, value) in enrichment {
                if !fields.contains_key(key) {
                    fields.insert(key.clone(), prepare(Some(value)));
                }
            }
        }

        Value::Object(reorder_fields(fields, &self.output.field_order))
    }

    /// Extract and assemble records `[start, start + batch_size)`.
    ///
    /// Pure apart from throttling; nothing is written or checkpointed.
    pub fn process_batch(&self, start: usize) -> (Vec<Value>, BatchStats) {
        let end = (start + self.batch_size).min(self.labels.len());
        let mut stats = BatchStats::default();
        let mut output = Vec::with_capacity(end.saturating_sub(start));

        for record in self.labels.get(start..end).unwrap_or_default() {
            let mentions = match self.label_data(record) {
                Some(data) => self.extractor.extract_from_label(data),
                None => {
                    stats.records_without_label += 1;
                    tracing::debug!(
                        "Record {:?} has no label data",
                        record.get(&self.output.id_key)
                    );
                    Vec::new()
                }
            };

            stats.records += 1;
            stats.mentions += mentions.len();
            output.push(self.assemble(record, &mentions));

            if !self.throttle.is_zero() {
                std::thread::sleep(self.throttle);
            }
        }

        (output, stats)
    }

    /// Process, write and checkpoint the next batch.
    ///
    /// Returns `None` once every record has been committed.
    pub fn step(&mut self) -> Result<Option<BatchStats>> {
        let total = self.labels.len();
        let start = self.checkpoint.last_offset;
        if start >= total {
            self.transition(DriverState::Done);
            return Ok(None);
        }

        self.transition(DriverState::ProcessingBatch);
        let (records, stats) = self.process_batch(start);
        if let Err(e) = self.sink.write_batch(&records) {
            self.transition(DriverState::Failed);
            return Err(e);
        }

        self.transition(DriverState::Checkpointing);
        let end = (start + self.batch_size).min(total);
        let mut next = self.checkpoint;
        next.advance_to(end);
        if let Err(e) = self.store.save(&next) {
            self.transition(DriverState::Failed);
            return Err(e);
        }
        self.checkpoint = next;

        tracing::info!("Processed entries {} to {} of {}", start, end, total);
        Ok(Some(stats))
    }

    /// Run batches until every record is committed
    pub fn run(&mut self) -> Result<RunSummary> {
        let span = tracing::info_span!("extraction_run", run_id = %self.run_id);
        let _guard = span.enter();

        let started_at = Utc::now();
        let start_offset = self.checkpoint.last_offset;
        if start_offset > self.labels.len() {
            tracing::warn!(
                "Checkpoint offset {} is beyond the {} input records",
                start_offset,
                self.labels.len()
            );
        } else if start_offset > 0 {
            tracing::info!("Resuming from offset {}", start_offset);
        }

        let mut summary = RunSummary {
            run_id: self.run_id,
            started_at,
            finished_at: started_at,
            start_offset,
            end_offset: start_offset,
            batches: 0,
            records_processed: 0,
            records_without_label: 0,
            mentions_emitted: 0,
        };

        while let Some(stats) = self.step()? {
            summary.batches += 1;
            summary.records_processed += stats.records;
            summary.records_without_label += stats.records_without_label;
            summary.mentions_emitted += stats.mentions;
        }

        summary.end_offset = self.checkpoint.last_offset;
        summary.finished_at = Utc::now();
        tracing::info!(
            "Extraction complete: {} records in {} batches, {} mentions",
            summary.records_processed,
            summary.batches,
            summary.mentions_emitted
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemorySink;
    use serde_json::json;

    fn extractor() -> MentionExtractor {
        let taxonomy = Taxonomy::from_value(&json!({
            "Autoimmune": {"RHEUMATOID ARTHRITIS": "rheumatoid arthritis"}
        }))
        .unwrap();
        MentionExtractor::new(Arc::new(taxonomy))
            .with_fields(vec!["indications_and_usage".to_string()])
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn driver(
        labels: Vec<Map<String, Value>>,
        enrichment: HashMap<String, Map<String, Value>>,
        dir: &Path,
    ) -> BatchDriver<MemorySink> {
        BatchDriver::new(
            extractor(),
            OutputConfig::default(),
            labels,
            enrichment,
            CheckpointStore::new(dir.join("checkpoint.json")),
            MemorySink::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_assembles_ordered_record() {
        let dir = tempfile::tempdir().unwrap();
        let labels = vec![object(json!({
            "spl_id": "abc-1",
            "product_ndc": "0001-0001",
            "label_data": {"indications_and_usage": ["Used to treat rheumatoid arthritis."]}
        }))];
        let enrichment = index_enrichment(
            vec![object(json!({
                "labeler_name": "Acme",
                "product_ndc": "0001-0001",
                "brand_name": "Reliev",
                "route": ["oral"]
            }))],
            "product_ndc",
        );

        let mut driver = driver(labels, enrichment, dir.path());
        let summary = driver.run().unwrap();
        assert_eq!(summary.records_processed, 1);
        assert_eq!(driver.state(), DriverState::Done);

        let record = &driver.sink().records[0];
        let keys: Vec<&str> = record.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["spl_id", "product_ndc", "brand_name", "disease_mentions", "route", "labeler_name"]
        );
        assert_eq!(record["spl_id"], "ABC-1");
        assert_eq!(record["route"], json!(["ORAL"]));
        assert_eq!(
            record["disease_mentions"],
            json!([{
                "disease": "RHEUMATOID ARTHRITIS",
                "method": "regex",
                "confidence": 1.0,
                "category": "Autoimmune"
            }])
        );
    }

    #[test]
    fn test_missing_enrichment_and_label_data() {
        let dir = tempfile::tempdir().unwrap();
        let labels = vec![
            object(json!({"spl_id": "a", "product_ndc": "9", "label_data": {}})),
            object(json!({"spl_id": "b", "indications_and_usage": "rheumatoid arthritis"})),
        ];

        let mut driver = driver(labels, HashMap::new(), dir.path());
        let summary = driver.run().unwrap();

        assert_eq!(summary.records_without_label, 1);
        assert_eq!(summary.mentions_emitted, 1);
        let records = &driver.sink().records;
        assert_eq!(records[0]["disease_mentions"], json!([]));
        assert!(records[1]["product_ndc"].is_null());
    }

    #[test]
    fn test_batches_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let labels = (0..7)
            .map(|i| object(json!({"spl_id": i.to_string(), "label_data": {}})))
            .collect();

        let mut driver = driver(labels, HashMap::new(), dir.path()).with_batch_size(3);
        let summary = driver.run().unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.end_offset, 7);
        assert_eq!(driver.sink().records.len(), 7);
        let stored = CheckpointStore::new(dir.path().join("checkpoint.json")).load().unwrap();
        assert_eq!(stored.last_offset, 7);
    }

    #[test]
    fn test_empty_input_is_done_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = driver(Vec::new(), HashMap::new(), dir.path());
        let summary = driver.run().unwrap();
        assert_eq!(summary.batches, 0);
        assert_eq!(driver.state(), DriverState::Done);
    }

    struct FailingSink;

    impl OutputSink for FailingSink {
        fn write_batch(&mut self, _records: &[Value]) -> Result<()> {
            Err(DmxError::io(
                "out.jsonl",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        }
    }

    #[test]
    fn test_sink_failure_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let labels = vec![object(json!({"spl_id": "a"}))];

        let mut driver = BatchDriver::new(
            extractor(),
            OutputConfig::default(),
            labels,
            HashMap::new(),
            store.clone(),
            FailingSink,
        )
        .unwrap();

        assert!(driver.run().is_err());
        assert_eq!(driver.state(), DriverState::Failed);
        assert_eq!(store.load().unwrap().last_offset, 0);
    }

    #[test]
    fn test_key_string_forms() {
        assert_eq!(key_string(&json!("0001")), Some("0001".to_string()));
        assert_eq!(key_string(&json!(["x", "y"])), Some("x".to_string()));
        assert_eq!(key_string(&json!(42)), Some("42".to_string()));
        assert_eq!(key_string(&json!(null)), None);
    }

    #[test]
    fn test_read_jsonl_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.jsonl");
        std::fs::write(&path, "{\"spl_id\": \"a\"}\nnot json\n\n[1, 2]\n{\"spl_id\": \"b\"}\n")
            .unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["spl_id"], "b");

        assert!(matches!(
            read_jsonl(dir.path().join("missing.jsonl")),
            Err(DmxError::Io { .. })
        ));
    }

    #[test]
    fn test_read_jsonl_skips_invalid_utf8_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.jsonl");
        let mut body = b"{\"spl_id\": \"a\"}\n".to_vec();
        body.extend_from_slice(b"{\"spl_id\": \"\xff\xfe\"}\n");
        body.extend_from_slice(b"{\"spl_id\": \"c\"}\r\n");
        std::fs::write(&path, body).unwrap();

        let records = read_jsonl(&path).unwrap();
        let ids: Vec<Option<&str>> = records.iter().map(|r| r["spl_id"].as_str()).collect();
        assert_eq!(ids, vec![Some("a"), Some("c")]);
    }
}
