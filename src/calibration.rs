//! Zero-offset calibration.
//!
//! Operators care about *logical* coordinates: positions relative to a zero
//! they chose themselves. The controller only speaks *physical*
//! coordinates. This module owns the mapping between the two — one offset
//! per stage, where the offset is the physical value that corresponds to
//! logical 0.0:
//!
//! ```text
//! physical = logical + offset        logical = physical - offset
//! ```
//!
//! Both directions use the same stored `f64`, so the round trip
//! `to_logical(to_physical(x)) == x` holds exactly. `set_zero` overwrites
//! from the current physical read, so repeating it with an unmoved stage
//! yields an unchanged offset — the property operators rely on for
//! repeatable calibration.
//!
//! Offsets survive restarts: they live in the `zero_offsets` map of the
//! hardware snapshot file and are persisted by read-modify-write that
//! preserves every other field.

use crate::config::{HardwareMap, HardwareSnapshot, StageId};
use crate::error::{MotionError, MotionResult};
use crate::hardware::MotionController;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Computes, converts and persists per-stage zero offsets.
///
/// The table sits behind an async `RwLock`: the executor snapshots it under
/// a read guard at the start of each move, and `set_zero` (the only
/// mutator) takes the write guard, so calibration never races an in-flight
/// conversion.
pub struct CalibrationEngine {
    controller: Arc<dyn MotionController>,
    offsets: RwLock<BTreeMap<StageId, f64>>,
    snapshot_path: PathBuf,
}

impl CalibrationEngine {
    /// Build the engine from the offsets recorded in the hardware map.
    pub fn new(controller: Arc<dyn MotionController>, map: &HardwareMap) -> Self {
        let offsets = map
            .zero_offsets()
            .iter()
            .map(|(id, offset)| (StageId::new(id.clone()), *offset))
            .collect();
        Self {
            controller,
            offsets: RwLock::new(offsets),
            snapshot_path: map.path().to_path_buf(),
        }
    }

    /// Record each stage's current physical position as its zero offset,
    /// overwriting any prior offset, then persist.
    ///
    /// Repeating this with the stage at the same physical location stores
    /// the same offset; no drift accumulates. That guarantee assumes the
    /// stage has not moved between calls.
    pub async fn set_zero(&self, stages: &[StageId]) -> MotionResult<()> {
        let mut fresh = BTreeMap::new();
        for stage in stages {
            let position = self.controller.read_position(stage).await?;
            tracing::info!("stage {stage}: physical {position:.6} recorded as logical zero");
            fresh.insert(stage.clone(), position);
        }
        self.offsets.write().await.extend(fresh);
        self.persist().await
    }

    /// Recorded offset for a stage, if any.
    pub async fn offset(&self, stage: &StageId) -> Option<f64> {
        self.offsets.read().await.get(stage).copied()
    }

    /// Snapshot the whole table under one read guard.
    pub async fn offsets(&self) -> BTreeMap<StageId, f64> {
        self.offsets.read().await.clone()
    }

    /// Convert a logical target to physical coordinates.
    pub async fn to_physical(&self, stage: &StageId, logical: f64) -> MotionResult<f64> {
        match self.offset(stage).await {
            Some(offset) => Ok(logical + offset),
            None => Err(MotionError::OffsetMissing {
                stage: stage.to_string(),
            }),
        }
    }

    /// Convert a physical read-back to logical coordinates.
    pub async fn to_logical(&self, stage: &StageId, physical: f64) -> MotionResult<f64> {
        match self.offset(stage).await {
            Some(offset) => Ok(physical - offset),
            None => Err(MotionError::OffsetMissing {
                stage: stage.to_string(),
            }),
        }
    }

    /// Write the offsets back into the snapshot file, preserving every
    /// other field.
    pub async fn persist(&self) -> MotionResult<()> {
        let offsets = self.offsets.read().await.clone();
        let raw = std::fs::read_to_string(&self.snapshot_path)?;
        let mut doc: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            MotionError::ConfigMalformed(format!("{}: {e}", self.snapshot_path.display()))
        })?;
        let table: serde_json::Map<String, serde_json::Value> = offsets
            .iter()
            .map(|(id, offset)| (id.to_string(), serde_json::json!(offset)))
            .collect();
        match doc.as_object_mut() {
            Some(object) => {
                object.insert("zero_offsets".into(), serde_json::Value::Object(table));
            }
            None => {
                return Err(MotionError::ConfigMalformed(format!(
                    "{} is not a JSON object",
                    self.snapshot_path.display()
                )))
            }
        }
        let pretty = serde_json::to_string_pretty(&doc).map_err(|e| {
            MotionError::ConfigMalformed(format!("snapshot serialization: {e}"))
        })?;
        std::fs::write(&self.snapshot_path, pretty)?;
        tracing::info!("zero offsets updated in {}", self.snapshot_path.display());
        Ok(())
    }

    /// Replace the in-memory table with what the snapshot file holds.
    pub async fn reload(&self) -> MotionResult<()> {
        let raw = std::fs::read_to_string(&self.snapshot_path)?;
        let snapshot: HardwareSnapshot = serde_json::from_str(&raw).map_err(|e| {
            MotionError::ConfigMalformed(format!("{}: {e}", self.snapshot_path.display()))
        })?;
        let mut offsets = self.offsets.write().await;
        *offsets = snapshot
            .zero_offsets
            .into_iter()
            .map(|(id, offset)| (StageId::new(id), offset))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HardwareSnapshot, MotionSettings, HARDWARE_FILE};
    use crate::hardware::MockController;

    fn write_snapshot(dir: &std::path::Path) -> PathBuf {
        let snapshot = HardwareSnapshot {
            groups: vec!["G1".into()],
            stages: vec![StageId::new("G1.Pos1"), StageId::new("G1.Pos2")],
            labels: Vec::new(),
            zero_offsets: BTreeMap::new(),
            motion: MotionSettings::default(),
        };
        let path = dir.join(HARDWARE_FILE);
        snapshot.save(&path).unwrap();
        path
    }

    fn engine(dir: &std::path::Path, controller: Arc<MockController>) -> CalibrationEngine {
        write_snapshot(dir);
        let map = HardwareMap::load(dir).unwrap();
        CalibrationEngine::new(controller, &map)
    }

    #[tokio::test]
    async fn round_trip_law_holds_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(
            MockController::builder()
                .group("G1", &["G1.Pos1", "G1.Pos2"])
                .position("G1.Pos2", 5.0)
                .build(),
        );
        let engine = engine(dir.path(), controller);
        let stage = StageId::new("G1.Pos2");
        engine.set_zero(&[stage.clone()]).await.unwrap();

        for x in [-270.0, -1.5, 0.0, 0.25, 90.0, 1e9] {
            let physical = engine.to_physical(&stage, x).await.unwrap();
            assert_eq!(engine.to_logical(&stage, physical).await.unwrap(), x);
        }
    }

    #[tokio::test]
    async fn set_zero_is_idempotent_without_motion() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(
            MockController::builder()
                .group("G1", &["G1.Pos1", "G1.Pos2"])
                .position("G1.Pos1", 7.25)
                .build(),
        );
        let engine = engine(dir.path(), controller);
        let stage = StageId::new("G1.Pos1");

        engine.set_zero(&[stage.clone()]).await.unwrap();
        let first = engine.offset(&stage).await;
        engine.set_zero(&[stage.clone()]).await.unwrap();
        let second = engine.offset(&stage).await;

        assert_eq!(first, Some(7.25));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_offset_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(
            MockController::builder()
                .group("G1", &["G1.Pos1", "G1.Pos2"])
                .build(),
        );
        let engine = engine(dir.path(), controller);
        let err = engine
            .to_physical(&StageId::new("G1.Pos1"), 10.0)
            .await
            .unwrap_err();
        assert!(matches!(err, MotionError::OffsetMissing { .. }));
    }

    #[tokio::test]
    async fn offsets_survive_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(
            MockController::builder()
                .group("G1", &["G1.Pos1", "G1.Pos2"])
                .position("G1.Pos1", 3.5)
                .build(),
        );
        let engine = engine(dir.path(), controller.clone());
        let stage = StageId::new("G1.Pos1");
        engine.set_zero(&[stage.clone()]).await.unwrap();

        // A second engine built from the same snapshot sees the offset.
        let map = HardwareMap::load(dir.path()).unwrap();
        let reborn = CalibrationEngine::new(controller, &map);
        assert_eq!(reborn.offset(&stage).await, Some(3.5));

        // And persisting did not clobber the rest of the snapshot.
        assert_eq!(map.stages().len(), 2);
        assert_eq!(map.settings().position_tolerance, 0.1);
    }

    #[tokio::test]
    async fn reload_replaces_the_in_memory_table() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(
            MockController::builder()
                .group("G1", &["G1.Pos1", "G1.Pos2"])
                .position("G1.Pos1", 2.0)
                .build(),
        );
        let engine = engine(dir.path(), controller);
        let stage = StageId::new("G1.Pos1");
        engine.set_zero(&[stage.clone()]).await.unwrap();

        // Hand-edit the file, then reload.
        let raw = std::fs::read_to_string(dir.path().join(HARDWARE_FILE)).unwrap();
        let edited = raw.replace("2.0", "9.0");
        std::fs::write(dir.path().join(HARDWARE_FILE), edited).unwrap();
        engine.reload().await.unwrap();

        assert_eq!(engine.offset(&stage).await, Some(9.0));
    }
}
