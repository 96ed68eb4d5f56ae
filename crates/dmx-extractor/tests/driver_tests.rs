//! Batch driver integration tests
//!
//! Every test runs against files in a fresh temporary directory.

use std::path::Path;

use dmx_core::{AppConfig, DmxError, MatchMethod};
use dmx_extractor::{read_jsonl, BatchDriver, CheckpointStore, DriverState, JsonlSink, OutputSink};
use serde_json::{json, Value};

const TAXONOMY: &str = r#"{
    "Autoimmune": {"RHEUMATOID ARTHRITIS": "rheumatoid arthritis", "PSORIASIS": "psoriasis"},
    "Cardiovascular": {"HYPERTENSION": "hypertension"}
}"#;

/// Config pointing every path into `dir`, with throttling disabled
fn config_in(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.extraction.throttle_ms = 0;
    config.paths.disease_patterns = dir.join("patterns.json");
    config.paths.label_input = dir.join("labels.jsonl");
    config.paths.enrichment_input = None;
    config.paths.checkpoint = dir.join("state/checkpoint.json");
    config.paths.output = dir.join("out/annotated.jsonl");
    config
}

fn write_jsonl(path: &Path, records: &[Value]) {
    let body: String = records.iter().map(|r| format!("{r}\n")).collect();
    std::fs::write(path, body).unwrap();
}

fn label(id: usize, text: &str) -> Value {
    json!({
        "spl_id": format!("spl-{id}"),
        "product_ndc": format!("ndc-{id}"),
        "label_data": {"indications_and_usage": [text]}
    })
}

fn output_lines(config: &AppConfig) -> Vec<Value> {
    std::fs::read_to_string(&config.paths.output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn test_single_record_regex_mention() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::write(&config.paths.disease_patterns, TAXONOMY).unwrap();
    write_jsonl(
        &config.paths.label_input,
        &[label(1, "Used to treat rheumatoid arthritis.")],
    );

    let mut driver = BatchDriver::from_config(&config).unwrap();
    let summary = driver.run().unwrap();
    assert_eq!(summary.records_processed, 1);
    assert_eq!(summary.end_offset, 1);
    assert_eq!(driver.state(), DriverState::Done);

    let lines = output_lines(&config);
    assert_eq!(lines.len(), 1);
    let mentions = lines[0]["disease_mentions"].as_array().unwrap();
    assert!(mentions.contains(&json!({
        "disease": "RHEUMATOID ARTHRITIS",
        "method": "regex",
        "confidence": 1.0,
        "category": "Autoimmune"
    })));
    assert!(mentions
        .iter()
        .all(|m| m["disease"] != "HYPERTENSION" && m["disease"] != "PSORIASIS"));
}

#[test]
fn test_enrichment_join_order_and_case() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.extraction.enable_fuzzy = false;
    config.extraction.enable_ner = false;
    let enrichment_path = dir.path().join("products.jsonl");
    config.paths.enrichment_input = Some(enrichment_path.clone());

    std::fs::write(&config.paths.disease_patterns, TAXONOMY).unwrap();
    write_jsonl(
        &config.paths.label_input,
        &[label(1, "For hypertension."), label(2, "For psoriasis.")],
    );
    write_jsonl(
        &enrichment_path,
        &[json!({
            "product_type": "Human Prescription Drug",
            "product_ndc": "ndc-1",
            "brand_name": "Lowpress",
            "marketing_category": "nda"
        })],
    );

    BatchDriver::from_config(&config).unwrap().run().unwrap();
    let lines = output_lines(&config);

    let keys: Vec<&str> = lines[0].as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec![
            "spl_id",
            "product_ndc",
            "brand_name",
            "disease_mentions",
            "product_type",
            "marketing_category"
        ]
    );
    assert_eq!(lines[0]["spl_id"], "SPL-1");
    assert_eq!(lines[0]["brand_name"], "LOWPRESS");
    assert_eq!(lines[0]["disease_mentions"][0]["category"], "Cardiovascular");

    // no enrichment record for ndc-2
    assert!(lines[1].get("brand_name").is_none());
    assert_eq!(lines[1]["disease_mentions"][0]["disease"], "PSORIASIS");
}

#[test]
fn test_blacklisted_field_yields_no_mentions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.extraction.section_blacklist = vec!["contraindicated".to_string()];
    std::fs::write(&config.paths.disease_patterns, TAXONOMY).unwrap();
    write_jsonl(
        &config.paths.label_input,
        &[label(1, "Contraindicated in patients with hypertension.")],
    );

    let summary = BatchDriver::from_config(&config).unwrap().run().unwrap();
    assert_eq!(summary.mentions_emitted, 0);
    assert_eq!(output_lines(&config)[0]["disease_mentions"], json!([]));
}

// =============================================================================
// Resumption
// =============================================================================

#[test]
fn test_resume_after_crash_before_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.extraction.batch_size = 100;
    std::fs::write(&config.paths.disease_patterns, TAXONOMY).unwrap();
    let labels: Vec<Value> = (0..250).map(|i| label(i, "Treats psoriasis.")).collect();
    write_jsonl(&config.paths.label_input, &labels);

    // First run writes batch [0, 100) and dies before the checkpoint save
    {
        let driver = BatchDriver::from_config(&config).unwrap();
        let (records, stats) = driver.process_batch(0);
        assert_eq!(stats.records, 100);
        JsonlSink::new(&config.paths.output)
            .write_batch(&records)
            .unwrap();
    }
    let store = CheckpointStore::new(&config.paths.checkpoint);
    assert_eq!(store.load().unwrap().last_offset, 0);

    let mut driver = BatchDriver::from_config(&config).unwrap();
    let summary = driver.run().unwrap();
    assert_eq!(summary.start_offset, 0);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.records_processed, 250);
    assert_eq!(store.load().unwrap().last_offset, 250);

    let lines = output_lines(&config);
    assert_eq!(lines.len(), 350);
    // the replayed batch is identical to the first attempt
    assert_eq!(lines[0], lines[100]);
    assert_eq!(lines[349]["spl_id"], "SPL-249");
}

#[test]
fn test_completed_run_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.extraction.batch_size = 2;
    std::fs::write(&config.paths.disease_patterns, TAXONOMY).unwrap();
    let labels: Vec<Value> = (0..5).map(|i| label(i, "hypertension")).collect();
    write_jsonl(&config.paths.label_input, &labels);

    let first = BatchDriver::from_config(&config).unwrap().run().unwrap();
    assert_eq!(first.batches, 3);

    let second = BatchDriver::from_config(&config).unwrap().run().unwrap();
    assert_eq!(second.start_offset, 5);
    assert_eq!(second.batches, 0);
    assert_eq!(output_lines(&config).len(), 5);

    CheckpointStore::new(&config.paths.checkpoint).reset().unwrap();
    let third = BatchDriver::from_config(&config).unwrap().run().unwrap();
    assert_eq!(third.records_processed, 5);
    assert_eq!(output_lines(&config).len(), 10);
}

// =============================================================================
// Input handling
// =============================================================================

#[test]
fn test_malformed_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::write(&config.paths.disease_patterns, TAXONOMY).unwrap();
    std::fs::write(
        &config.paths.label_input,
        format!("{}\n{{broken\n\"a string\"\n{}\n", label(1, "x"), label(2, "y")),
    )
    .unwrap();

    assert_eq!(read_jsonl(&config.paths.label_input).unwrap().len(), 2);
    let summary = BatchDriver::from_config(&config).unwrap().run().unwrap();
    assert_eq!(summary.records_processed, 2);
}

#[test]
fn test_non_utf8_line_does_not_abort_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::write(&config.paths.disease_patterns, TAXONOMY).unwrap();

    let mut body = format!("{}\n", label(1, "psoriasis")).into_bytes();
    body.extend_from_slice(b"{\"spl_id\": \"\xff\xfe\"}\n");
    body.extend_from_slice(format!("{}\n", label(3, "hypertension")).as_bytes());
    std::fs::write(&config.paths.label_input, body).unwrap();

    let summary = BatchDriver::from_config(&config).unwrap().run().unwrap();
    assert_eq!(summary.records_processed, 2);

    let lines = output_lines(&config);
    assert_eq!(lines[0]["spl_id"], "SPL-1");
    assert_eq!(lines[1]["spl_id"], "SPL-3");
}

#[test]
fn test_bad_taxonomy_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    write_jsonl(&config.paths.label_input, &[label(1, "x")]);

    std::fs::write(&config.paths.disease_patterns, r#"{"Autoimmune": ["psoriasis"]}"#).unwrap();
    assert!(matches!(
        BatchDriver::from_config(&config),
        Err(DmxError::TaxonomyLoad(_))
    ));

    std::fs::write(&config.paths.disease_patterns, r#"{"Autoimmune": {"X": "(unclosed"}}"#)
        .unwrap();
    assert!(matches!(
        BatchDriver::from_config(&config),
        Err(DmxError::InvalidPattern { .. })
    ));
    assert!(!config.paths.output.exists());
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.extraction.batch_size = 0;
    assert!(matches!(
        BatchDriver::from_config(&config),
        Err(DmxError::Config(_))
    ));
}

#[test]
fn test_mentions_round_trip_to_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.extraction.enable_ner = false;
    std::fs::write(&config.paths.disease_patterns, TAXONOMY).unwrap();
    write_jsonl(
        &config.paths.label_input,
        &[json!({
            "spl_id": "a",
            "label_data": {"indications_and_usage": "psoriasis", "generic_name": "calcipotriene"}
        })],
    );

    BatchDriver::from_config(&config).unwrap().run().unwrap();
    let record = &output_lines(&config)[0];
    let pairs = dmx_extractor::association_pairs(record, 0.0);

    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].drug, "[Unknown]");
    assert_eq!(pairs[0].method, MatchMethod::Regex);
}
