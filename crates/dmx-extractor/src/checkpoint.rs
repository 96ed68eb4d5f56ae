//! Checkpoint persistence and output sinks
//!
//! The checkpoint file is owned by a single driver per run. Concurrent
//! drivers against the same checkpoint or output are unsupported.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use dmx_core::{Checkpoint, DmxError, Result};

// ============================================================================
// Checkpoint store
// ============================================================================

/// File-backed checkpoint, overwritten on every save
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint; a missing file means offset 0
    pub fn load(&self) -> Result<Checkpoint> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Checkpoint::default()),
            Err(e) => return Err(DmxError::io(&self.path, e)),
        };

        serde_json::from_str(&content).map_err(|e| {
            DmxError::Checkpoint(format!("{} is malformed: {}", self.path.display(), e))
        })
    }

    /// Write to a sibling temp file, sync, then rename over the target
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| DmxError::io(dir, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| DmxError::io(&tmp, e))?;
            serde_json::to_writer(&mut file, checkpoint)
                .map_err(|e| DmxError::Checkpoint(e.to_string()))?;
            file.sync_all().map_err(|e| DmxError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| DmxError::io(&self.path, e))?;

        tracing::debug!("Checkpoint saved at offset {}", checkpoint.last_offset);
        Ok(())
    }

    /// Remove the checkpoint so the next run starts from offset 0
    pub fn reset(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DmxError::io(&self.path, e)),
        }
    }
}

// ============================================================================
// Output sinks
// ============================================================================

/// Destination for assembled output records
pub trait OutputSink {
    /// Durably write one batch; returns only after the data is committed
    fn write_batch(&mut self, records: &[Value]) -> Result<()>;
}

/// Appends newline-delimited JSON to a file
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for JsonlSink {
    fn write_batch(&mut self, records: &[Value]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| DmxError::io(dir, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DmxError::io(&self.path, e))?;
        let mut writer = BufWriter::new(file);

        for record in records {
            serde_json::to_writer(&mut writer, record)
                .map_err(|e| DmxError::Other(anyhow::anyhow!(e)))?;
            writer
                .write_all(b"\n")
                .map_err(|e| DmxError::io(&self.path, e))?;
        }

        let file = writer
            .into_inner()
            .map_err(|e| DmxError::io(&self.path, e.into_error()))?;
        file.sync_all().map_err(|e| DmxError::io(&self.path, e))?;
        Ok(())
    }
}

/// Collects records in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<Value>,
}

impl OutputSink for MemorySink {
    fn write_batch(&mut self, records: &[Value]) -> Result<()> {
        self.records.extend_from_slice(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_checkpoint_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        assert_eq!(store.load().unwrap(), Checkpoint::default());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/checkpoint.json"));

        store.save(&Checkpoint::new(100)).unwrap();
        store.save(&Checkpoint::new(200)).unwrap();

        assert_eq!(store.load().unwrap().last_offset, 200);
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"last_offset":200}"#);
    }

    #[test]
    fn test_malformed_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{\"last_offset\": -3}").unwrap();

        let err = CheckpointStore::new(&path).load().unwrap_err();
        assert!(matches!(err, DmxError::Checkpoint(_)));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        store.save(&Checkpoint::new(5)).unwrap();
        store.reset().unwrap();
        store.reset().unwrap();
        assert_eq!(store.load().unwrap().last_offset, 0);
    }

    #[test]
    fn test_jsonl_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlSink::new(dir.path().join("out/records.jsonl"));

        sink.write_batch(&[json!({"a": 1}), json!({"a": 2})]).unwrap();
        sink.write_batch(&[json!({"a": 3})]).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"a":2}"#, r#"{"a":3}"#]);
    }
}
