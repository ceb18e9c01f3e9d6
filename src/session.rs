//! Session management.
//!
//! A [`MotionSession`] is constructed once, after the credential and
//! hardware files load, and owns everything built around the live
//! controller connection: the hardware map, the lifecycle manager, the
//! calibration engine and the motion executor. The CLI (or an embedding
//! script) talks only to the session; teardown is explicit via
//! [`MotionSession::close`].
//!
//! The bootstrap operations that must work *without* a hardware snapshot —
//! regenerating the snapshot from the live controller and backing up the
//! controller's configuration files — are free functions here, so a fresh
//! setup never hits the snapshot-missing error they are meant to fix.

use crate::calibration::CalibrationEngine;
use crate::config::{
    Credentials, HardwareMap, HardwareSnapshot, MotionSettings, StageId, HARDWARE_FILE,
};
use crate::error::{MotionError, MotionResult};
use crate::executor::{MotionExecutor, MoveOptions, PositionSnapshot};
use crate::hardware::{MotionController, XpsController};
use crate::lifecycle::LifecycleManager;
use crate::sequence::{MotionLine, RunReport, SequenceRunner};
use crate::storage::PositionLog;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// One live control session against one controller.
pub struct MotionSession {
    controller: Arc<dyn MotionController>,
    map: HardwareMap,
    lifecycle: Arc<LifecycleManager>,
    calibration: Arc<CalibrationEngine>,
    executor: MotionExecutor,
    settings: MotionSettings,
}

impl MotionSession {
    /// Load configuration, connect to the XPS controller and assemble a
    /// session. `selection` narrows the active stage set (names or 1-based
    /// indices); `cancel` is flipped to interrupt a move in progress.
    pub async fn connect(
        config_dir: &Path,
        selection: Option<&str>,
        cancel: watch::Receiver<bool>,
    ) -> MotionResult<Self> {
        let credentials = Credentials::load(config_dir)?;
        let map = HardwareMap::load(config_dir)?;
        let controller: Arc<dyn MotionController> =
            Arc::new(XpsController::connect(&credentials).await?);
        Self::with_controller(controller, map, selection, cancel)
    }

    /// Assemble a session around an existing controller (tests, offline
    /// runs against the mock driver).
    pub fn with_controller(
        controller: Arc<dyn MotionController>,
        map: HardwareMap,
        selection: Option<&str>,
        cancel: watch::Receiver<bool>,
    ) -> MotionResult<Self> {
        let active = map.select_stages(selection)?;
        tracing::info!(
            "active stages: {}",
            active
                .iter()
                .map(StageId::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let lifecycle = Arc::new(LifecycleManager::new(
            controller.clone(),
            map.groups().map(|group| group.name.clone()).collect(),
        ));
        let calibration = Arc::new(CalibrationEngine::new(controller.clone(), &map));
        let executor = MotionExecutor::new(
            controller.clone(),
            lifecycle.clone(),
            calibration.clone(),
            active,
            cancel,
        );
        let settings = map.settings().clone();
        Ok(Self {
            controller,
            map,
            lifecycle,
            calibration,
            executor,
            settings,
        })
    }

    /// Move options seeded from the snapshot's motion settings.
    pub fn default_options(&self) -> MoveOptions {
        MoveOptions::from_settings(&self.settings)
    }

    /// The active stage set.
    pub fn active_stages(&self) -> &[StageId] {
        self.executor.active()
    }

    /// Display labels for the snapshot's stages.
    pub fn labels(&self) -> Vec<String> {
        self.map.labels()
    }

    /// Prepare every group for motion. Seeds lifecycle state from the
    /// controller first, so a controller that is already referenced and
    /// enabled skips the enable/home round trips entirely.
    pub async fn prepare(&self, force_home: bool) -> MotionResult<()> {
        if !force_home {
            self.lifecycle.seed_from_controller().await;
            if self.lifecycle.all_ready().await {
                tracing::info!("all groups referenced and enabled; skipping preparation");
                return Ok(());
            }
        }
        for group in self.map.groups() {
            self.lifecycle.ensure_ready(&group.name, force_home).await?;
        }
        Ok(())
    }

    /// Execute one motion line against the active stages.
    pub async fn move_to(&self, targets: &[f64], options: &MoveOptions) -> MotionResult<()> {
        self.executor.move_to(targets, options).await
    }

    /// Run a parsed sequence, optionally looping and logging.
    pub async fn run_sequence(
        &self,
        lines: &[MotionLine],
        options: &MoveOptions,
        loop_mode: bool,
        log: Option<PositionLog>,
    ) -> MotionResult<RunReport> {
        let mut runner = SequenceRunner::new(&self.executor);
        if let Some(log) = log {
            runner = runner.with_log(log);
        }
        if loop_mode {
            runner.run_looping(lines, options).await
        } else {
            runner.run_once(lines, options).await
        }
    }

    /// Move every active stage to the configured reset position.
    pub async fn reset(&self, options: &MoveOptions) -> MotionResult<()> {
        self.executor
            .reset(self.settings.reset_position, options)
            .await
    }

    /// Read back physical and logical positions of the active stages.
    pub async fn positions(&self) -> MotionResult<PositionSnapshot> {
        self.executor.positions().await
    }

    /// Record the current physical position of each active stage as its
    /// logical zero and persist the offsets.
    pub async fn set_zero(&self) -> MotionResult<()> {
        self.calibration.set_zero(self.executor.active()).await
    }

    /// Explicit teardown: disconnect the controller.
    pub async fn close(self) -> MotionResult<()> {
        self.controller.disconnect().await
    }
}

/// Regenerate the hardware snapshot from the live controller.
///
/// Requires only the credential file, so it works on a fresh setup. Motion
/// settings from an existing snapshot are preserved; zero offsets are
/// cleared (stage enumeration may have changed), so `set-zero` must be run
/// again afterwards.
pub async fn generate_snapshot(config_dir: &Path) -> MotionResult<PathBuf> {
    let credentials = Credentials::load(config_dir)?;
    let controller = XpsController::connect(&credentials).await?;
    let layout = controller.describe_groups().await?;
    let disconnect = controller.disconnect().await;

    if layout.is_empty() {
        return Err(MotionError::ControllerFault(
            "controller reported no groups; check the controller configuration".into(),
        ));
    }

    let motion = HardwareMap::load(config_dir)
        .map(|map| map.settings().clone())
        .unwrap_or_default();
    let stages: Vec<StageId> = layout
        .iter()
        .flat_map(|group| group.positioners.iter().cloned().map(StageId::new))
        .collect();
    let snapshot = HardwareSnapshot {
        groups: layout.iter().map(|group| group.name.clone()).collect(),
        labels: stages.iter().map(StageId::to_string).collect(),
        stages,
        zero_offsets: BTreeMap::new(),
        motion,
    };

    let path = config_dir.join(HARDWARE_FILE);
    snapshot.save(&path)?;
    tracing::info!("hardware snapshot written to {}", path.display());
    disconnect?;
    Ok(path)
}

/// Download `system.ini` and `stages.ini` from the controller into
/// `out_dir`. Requires only the credential file.
pub async fn backup_config(config_dir: &Path, out_dir: &Path) -> MotionResult<()> {
    let credentials = Credentials::load(config_dir)?;
    let controller = XpsController::connect(&credentials).await?;
    let backup = controller.backup_config().await;
    let disconnect = controller.disconnect().await;
    let backup = backup?;

    std::fs::create_dir_all(out_dir)?;
    std::fs::write(out_dir.join("system.ini"), &backup.system_ini)?;
    std::fs::write(out_dir.join("stages.ini"), &backup.stages_ini)?;
    tracing::info!("controller configuration backed up to {}", out_dir.display());
    disconnect?;
    Ok(())
}
