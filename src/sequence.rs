//! Motion sequence files and the runner that executes them.
//!
//! A sequence file holds one move per line: comma-separated logical
//! targets, one per active stage, with an optional trailing non-numeric
//! label used only for logging. Blank lines and `#` comments are ignored.
//!
//! Lines are *not* count-checked at load time; the executor validates each
//! one, and the runner recovers from `TargetCountMismatch` by skipping the
//! line and continuing — a malformed line in a long automated sequence must
//! not abort the whole run. Every other failure stops the run.

use crate::error::{MotionError, MotionResult};
use crate::executor::{MotionExecutor, MoveOptions};
use crate::storage::PositionLog;
use std::path::Path;

/// One parsed motion line: logical targets plus an optional label.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionLine {
    /// Logical targets, one per active stage, in caller order.
    pub targets: Vec<f64>,
    /// Optional free-text label (trailing non-numeric token).
    pub label: Option<String>,
}

impl MotionLine {
    /// Parse one content line. Returns `None` when the line is not a valid
    /// motion line (no numeric targets, or a non-numeric token before the
    /// end).
    pub fn parse(line: &str) -> Option<MotionLine> {
        let mut parts: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        while parts.last() == Some(&"") {
            parts.pop();
        }
        let label = match parts.last()?.parse::<f64>() {
            Ok(_) => None,
            Err(_) => parts.pop().map(str::to_string),
        };
        let mut targets = Vec::with_capacity(parts.len());
        for part in parts {
            targets.push(part.parse::<f64>().ok()?);
        }
        if targets.is_empty() {
            return None;
        }
        Some(MotionLine { targets, label })
    }
}

/// Load motion lines from a file, skipping blanks, comments and
/// unparseable lines (the latter with a warning).
pub fn load_motion_lines(path: &Path) -> MotionResult<Vec<MotionLine>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MotionError::ConfigMissing {
                path: path.to_path_buf(),
                hint: "see `stagectl format-guide` for the expected layout".into(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let mut lines = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match MotionLine::parse(trimmed) {
            Some(parsed) => lines.push(parsed),
            None => tracing::warn!(
                "line {}: unparseable motion line {:?}; skipped",
                number + 1,
                trimmed
            ),
        }
    }
    tracing::info!("loaded {} motion lines from {}", lines.len(), path.display());
    Ok(lines)
}

/// Counters for one run over a sequence.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Lines that completed within tolerance.
    pub executed: usize,
    /// Lines skipped for a target count mismatch.
    pub skipped: usize,
}

/// Feeds motion lines to the executor, optionally looping and logging.
pub struct SequenceRunner<'a> {
    executor: &'a MotionExecutor,
    log: Option<PositionLog>,
}

impl<'a> SequenceRunner<'a> {
    /// Runner without a position log.
    pub fn new(executor: &'a MotionExecutor) -> Self {
        Self {
            executor,
            log: None,
        }
    }

    /// Attach a CSV position log; confirmed moves are appended to it.
    pub fn with_log(mut self, log: PositionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Run each line once. Count-mismatched lines are skipped with a
    /// warning; every other failure stops the run.
    pub async fn run_once(
        &mut self,
        lines: &[MotionLine],
        options: &MoveOptions,
    ) -> MotionResult<RunReport> {
        let mut report = RunReport::default();
        for (index, line) in lines.iter().enumerate() {
            match self.executor.move_to(&line.targets, options).await {
                Ok(()) => {
                    report.executed += 1;
                    tracing::info!("line {}: reached {:?}", index + 1, line.targets);
                    if let Some(log) = self.log.as_mut() {
                        log.record(&line.targets, line.label.as_deref())?;
                    }
                }
                Err(err) if err.is_skippable() => {
                    report.skipped += 1;
                    tracing::warn!("line {}: {err}; skipped", index + 1);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Run the sequence repeatedly, restarting from the first line after
    /// the last, until the operator interrupts. Returns the accumulated
    /// totals on interruption.
    pub async fn run_looping(
        &mut self,
        lines: &[MotionLine],
        options: &MoveOptions,
    ) -> MotionResult<RunReport> {
        let mut total = RunReport::default();
        loop {
            match self.run_once(lines, options).await {
                Ok(report) => {
                    total.executed += report.executed;
                    total.skipped += report.skipped;
                }
                Err(MotionError::MoveCancelled) => {
                    tracing::info!("loop interrupted after {} moves", total.executed);
                    return Ok(total);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Print the motion-file format guide.
pub fn print_format_guide(labels: &[String]) {
    println!("Format guide for motion files");
    println!("Each line is one configuration of targets for all active stages.");
    println!("Values are comma-separated and must match the number of active stages;");
    println!("an optional trailing non-numeric token is kept as a label for logging.");
    println!("Blank lines and lines starting with '#' are ignored.");
    println!();
    println!("# {}", labels.join(", "));
    println!("30.0, 45.0, 90.0, 0.0, 180.0");
    println!("10.0, 30.0, 60.0, 90.0, 120.0");
    println!("20.0, 5.0, 45.0, 0.0, 90.0, overnight_scan");
}
