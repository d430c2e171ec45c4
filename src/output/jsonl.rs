//! JSON Lines record sink
//!
//! Writes one `FetchedRecord` per line to
//! `<records-dir>/<date>/<session_id>.jsonl`.

use crate::crawler::{FetchedRecord, RecordSink, SinkOutcome};
use crate::storage::date_to_key;
use crate::HarvestError;
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends records to a per-session JSONL file
pub struct JsonlSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    stored: u64,
}

impl JsonlSink {
    pub fn new(records_dir: &Path, date: NaiveDate, session_id: &str) -> Self {
        let path = records_dir
            .join(date_to_key(date))
            .join(format!("{}.jsonl", session_id));
        Self {
            path,
            writer: None,
            stored: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stored(&self) -> u64 {
        self.stored
    }

    // Opened on first record so sessions that store nothing leave no file
    fn writer(&mut self) -> Result<&mut BufWriter<File>, HarvestError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| HarvestError::Sink("record file not open".to_string()))
    }
}

impl RecordSink for JsonlSink {
    fn accept(&mut self, record: FetchedRecord) -> Result<SinkOutcome, HarvestError> {
        if record.body.trim().is_empty() {
            tracing::debug!("No data on {}", record.url);
            return Ok(SinkOutcome::NoData);
        }

        let line = serde_json::to_string(&record)?;
        let writer = self.writer()?;
        writeln!(writer, "{}", line)?;
        self.stored += 1;
        Ok(SinkOutcome::Stored)
    }

    fn finish(&mut self) -> Result<(), HarvestError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            tracing::info!("Wrote {} records to {}", self.stored, self.path.display());
        }
        Ok(())
    }
}
