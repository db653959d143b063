//! Append-only destinations for execution records.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::record::ExecutionRecord;

/// Receives records in completion order. Records are never rewritten.
pub trait RecordSink: Send {
    /// Appends one record.
    fn write_record(&mut self, record: &ExecutionRecord) -> io::Result<()>;

    /// Makes every appended record durable.
    fn flush(&mut self) -> io::Result<()>;

    /// Human-readable destination for error messages.
    fn target(&self) -> String;
}

/// JSON Lines file opened in append mode.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: File,
}

impl JsonlSink {
    /// Opens `path` for appending, creating it and its parent directory when
    /// absent. Existing content is kept.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

impl RecordSink for JsonlSink {
    fn write_record(&mut self, record: &ExecutionRecord) -> io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        // One write per line keeps each record whole under O_APPEND.
        self.file.write_all(line.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

impl RecordSink for Vec<ExecutionRecord> {
    fn write_record(&mut self, record: &ExecutionRecord) -> io::Result<()> {
        self.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn target(&self) -> String {
        "<memory>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::record::Timing;

    fn record(id: &str) -> ExecutionRecord {
        let timing = Timing {
            start_epoch_ms: 10,
            end_epoch_ms: 20,
            duration_ms: 10,
        };
        ExecutionRecord::success(id, 0, "ok", timing)
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/results/out.jsonl");

        let mut sink = JsonlSink::open(&path).unwrap();
        sink.write_record(&record("t1")).unwrap();
        sink.flush().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert_eq!(sink.target(), path.display().to_string());
    }

    #[test]
    fn test_reopen_appends_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        {
            let mut sink = JsonlSink::open(&path).unwrap();
            sink.write_record(&record("t1")).unwrap();
            sink.flush().unwrap();
        }
        {
            let mut sink = JsonlSink::open(&path).unwrap();
            sink.write_record(&record("t2")).unwrap();
            sink.flush().unwrap();
        }

        let ids: Vec<String> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str::<ExecutionRecord>(line).unwrap().id)
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_vec_sink_collects_records() {
        let mut sink: Vec<ExecutionRecord> = Vec::new();
        sink.write_record(&record("a")).unwrap();
        sink.write_record(&record("b")).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.target(), "<memory>");
    }
}
