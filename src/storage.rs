//! CSV position log sink.
//!
//! One row per confirmed move: an RFC 3339 timestamp, one column per
//! logical target, and the line's label when it had one. Rows are appended
//! and flushed immediately so a run interrupted mid-sequence still leaves a
//! complete log of everything that was reached.

use crate::error::MotionResult;
use std::path::{Path, PathBuf};

/// Appends confirmed moves to a CSV file.
pub struct PositionLog {
    writer: csv::Writer<std::fs::File>,
    path: PathBuf,
}

impl PositionLog {
    /// Open the log for appending, creating it if necessary.
    pub fn open(path: &Path) -> MotionResult<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        // Rows vary in length (label present or not).
        let writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    /// Record one confirmed move.
    pub fn record(&mut self, targets: &[f64], label: Option<&str>) -> MotionResult<()> {
        let mut row: Vec<String> = Vec::with_capacity(targets.len() + 2);
        row.push(chrono::Utc::now().to_rfc3339());
        row.extend(targets.iter().map(|target| format!("{target:.4}")));
        if let Some(label) = label {
            row.push(label.to_string());
        }
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_append_with_and_without_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.csv");

        let mut log = PositionLog::open(&path).unwrap();
        log.record(&[10.0, 90.0], Some("first_move")).unwrap();
        log.record(&[20.0, 45.0], None).unwrap();
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = contents.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].ends_with("first_move"));
        assert!(rows[0].contains("10.0000"));
        assert!(rows[1].contains("45.0000"));
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.csv");

        PositionLog::open(&path)
            .unwrap()
            .record(&[1.0], None)
            .unwrap();
        PositionLog::open(&path)
            .unwrap()
            .record(&[2.0], None)
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
