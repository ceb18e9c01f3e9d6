//! Motion execution.
//!
//! [`MotionExecutor::move_to`] is the one path every move takes:
//!
//! 1. validate the target count against the active stage set,
//! 2. make sure every involved group is `Ready` (unless the caller skips
//!    preparation),
//! 3. convert logical targets to physical via the calibration engine,
//! 4. dispatch the physical moves, in caller order, as concurrent futures,
//! 5. poll positions until every stage is within tolerance or the timeout
//!    elapses.
//!
//! A move in progress can be interrupted through the cancellation channel
//! (wired to Ctrl-C by the CLI); the executor stops polling and surfaces
//! [`MotionError::MoveCancelled`], leaving the stages wherever they are —
//! there is no automatic rollback.

use crate::calibration::CalibrationEngine;
use crate::config::{MotionSettings, StageId};
use crate::error::{MotionError, MotionResult};
use crate::hardware::MotionController;
use crate::lifecycle::LifecycleManager;
use futures::future;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Options governing one `move_to` call.
#[derive(Debug, Clone)]
pub struct MoveOptions {
    /// Skip the lifecycle check (the caller guarantees prior preparation).
    /// Never bypasses target validation.
    pub skip_prep: bool,
    /// Re-home groups even if already referenced.
    pub force_home: bool,
    /// Maximum |reported - target| for completion.
    pub tolerance: f64,
    /// Overall completion deadline.
    pub timeout: Duration,
    /// Delay between completion polls.
    pub poll_interval: Duration,
    /// Treat stages with no recorded offset as offset 0.0 (with a warning)
    /// instead of failing.
    pub uncalibrated_ok: bool,
}

impl MoveOptions {
    /// Defaults taken from the snapshot's motion settings.
    pub fn from_settings(settings: &MotionSettings) -> Self {
        Self {
            skip_prep: false,
            force_home: false,
            tolerance: settings.position_tolerance,
            timeout: settings.max_wait_time,
            poll_interval: settings.wait_delay,
            uncalibrated_ok: false,
        }
    }
}

/// Physical and logical position of one stage at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StagePosition {
    /// Stage identifier.
    pub stage: StageId,
    /// Raw controller coordinate.
    pub physical: f64,
    /// User-facing coordinate (physical minus zero offset).
    pub logical: f64,
}

/// Point-in-time read-back of the active stages.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    /// When the snapshot was taken.
    pub taken_at: chrono::DateTime<chrono::Utc>,
    /// Per-stage positions, in active-set order.
    pub entries: Vec<StagePosition>,
}

/// Validates, dispatches and confirms moves for the active stage set.
pub struct MotionExecutor {
    controller: Arc<dyn MotionController>,
    lifecycle: Arc<LifecycleManager>,
    calibration: Arc<CalibrationEngine>,
    active: Vec<StageId>,
    cancel: watch::Receiver<bool>,
}

impl MotionExecutor {
    /// Build an executor over the given active stage set.
    pub fn new(
        controller: Arc<dyn MotionController>,
        lifecycle: Arc<LifecycleManager>,
        calibration: Arc<CalibrationEngine>,
        active: Vec<StageId>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            controller,
            lifecycle,
            calibration,
            active,
            cancel,
        }
    }

    /// The active stage set, in caller-defined order.
    pub fn active(&self) -> &[StageId] {
        &self.active
    }

    /// Execute one motion line (logical targets, one per active stage).
    pub async fn move_to(&self, targets: &[f64], options: &MoveOptions) -> MotionResult<()> {
        if targets.len() != self.active.len() {
            return Err(MotionError::TargetCountMismatch {
                expected: self.active.len(),
                got: targets.len(),
            });
        }
        self.check_cancelled()?;

        if !options.skip_prep {
            for group in distinct_groups(&self.active) {
                self.lifecycle.ensure_ready(&group, options.force_home).await?;
            }
        }

        let offsets = self.calibration.offsets().await;
        let mut physical = Vec::with_capacity(targets.len());
        for (stage, &logical) in self.active.iter().zip(targets) {
            let target = match offsets.get(stage) {
                Some(offset) => logical + offset,
                None if options.uncalibrated_ok => {
                    tracing::warn!(
                        "stage {stage} is uncalibrated; using logical coordinates as physical"
                    );
                    logical
                }
                None => {
                    return Err(MotionError::OffsetMissing {
                        stage: stage.to_string(),
                    })
                }
            };
            physical.push((stage.clone(), target));
        }

        let summary = self
            .active
            .iter()
            .zip(targets)
            .map(|(stage, logical)| format!("{stage} -> {logical}"))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!("moving: {summary}");

        // Dispatch in caller order; the futures run concurrently and the
        // driver decides how far commands actually overlap on the wire.
        let dispatches = physical
            .iter()
            .map(|(stage, target)| self.controller.move_absolute(stage, *target));
        for result in future::join_all(dispatches).await {
            result?;
        }

        self.await_within_tolerance(&physical, options).await
    }

    /// Read back physical and logical positions of the active stages.
    pub async fn positions(&self) -> MotionResult<PositionSnapshot> {
        let offsets = self.calibration.offsets().await;
        let mut entries = Vec::with_capacity(self.active.len());
        for stage in &self.active {
            let physical = self.controller.read_position(stage).await?;
            let logical = match offsets.get(stage) {
                Some(offset) => physical - offset,
                None => {
                    tracing::warn!(
                        "stage {stage} is uncalibrated; reporting physical position as logical"
                    );
                    physical
                }
            };
            entries.push(StagePosition {
                stage: stage.clone(),
                physical,
                logical,
            });
        }
        Ok(PositionSnapshot {
            taken_at: chrono::Utc::now(),
            entries,
        })
    }

    /// Move every active stage to `reset_position` (logical). A no-op when
    /// all stages are already within tolerance. Uncalibrated stages degrade
    /// to physical coordinates with a warning.
    pub async fn reset(&self, reset_position: f64, options: &MoveOptions) -> MotionResult<()> {
        let snapshot = self.positions().await?;
        let all_there = snapshot
            .entries
            .iter()
            .all(|entry| (entry.logical - reset_position).abs() <= options.tolerance);
        if all_there {
            tracing::info!("all stages already at {reset_position}");
            return Ok(());
        }
        let targets = vec![reset_position; self.active.len()];
        let mut options = options.clone();
        options.uncalibrated_ok = true;
        self.move_to(&targets, &options).await
    }

    /// Poll until every target is within tolerance, the deadline passes, or
    /// the move is cancelled.
    async fn await_within_tolerance(
        &self,
        targets: &[(StageId, f64)],
        options: &MoveOptions,
    ) -> MotionResult<()> {
        let deadline = Instant::now() + options.timeout;
        let mut pending: Vec<&(StageId, f64)> = targets.iter().collect();
        loop {
            let mut lagging = Vec::new();
            for entry in pending {
                let (stage, target) = entry;
                let position = self.controller.read_position(stage).await?;
                if (position - target).abs() > options.tolerance {
                    lagging.push(entry);
                }
            }
            if lagging.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MotionError::MoveTimeout {
                    lagging: lagging.iter().map(|(stage, _)| stage.to_string()).collect(),
                });
            }
            pending = lagging;
            self.sleep_or_cancel(options.poll_interval).await?;
        }
    }

    async fn sleep_or_cancel(&self, delay: Duration) -> MotionResult<()> {
        let mut cancel = self.cancel.clone();
        if *cancel.borrow() {
            return Err(MotionError::MoveCancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            changed = cancel.changed() => {
                if changed.is_ok() && *cancel.borrow() {
                    return Err(MotionError::MoveCancelled);
                }
                // Sender gone or a spurious update; just finish the wait.
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn check_cancelled(&self) -> MotionResult<()> {
        if *self.cancel.borrow() {
            Err(MotionError::MoveCancelled)
        } else {
            Ok(())
        }
    }
}

/// Groups of the given stages, first-appearance order, deduplicated.
fn distinct_groups(stages: &[StageId]) -> Vec<String> {
    let mut groups: Vec<String> = Vec::new();
    for stage in stages {
        if !groups.iter().any(|g| g == stage.group()) {
            groups.push(stage.group().to_string());
        }
    }
    groups
}
