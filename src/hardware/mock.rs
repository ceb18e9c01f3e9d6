//! Mock motion controller implementation.
//!
//! In-memory stand-in for a live controller, used by tests and offline
//! runs. Moves complete instantly unless a stage is marked *stuck* (its
//! reported position never changes, which exercises the tolerance/timeout
//! path), lifecycle commands reply `AlreadyDone` when redundant exactly
//! like the real controller, and any command can be scripted to fault.
//! Every command is counted so tests can assert idempotence.

use crate::config::StageId;
use crate::error::{MotionError, MotionResult};
use crate::hardware::controller::{
    CommandOutcome, ConfigBackup, GroupInfo, GroupState, MotionController,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MockInner {
    groups: BTreeMap<String, GroupState>,
    layout: Vec<GroupInfo>,
    positions: HashMap<StageId, f64>,
    stuck: HashSet<StageId>,
    faults: HashMap<String, String>,
    counters: HashMap<String, usize>,
}

impl MockInner {
    fn bump(&mut self, key: &str) {
        *self.counters.entry(key.to_string()).or_insert(0) += 1;
    }

    fn check_fault(&self, key: &str) -> MotionResult<()> {
        match self.faults.get(key) {
            Some(message) => Err(MotionError::ControllerFault(message.clone())),
            None => Ok(()),
        }
    }
}

/// Simulated multi-group motion controller.
pub struct MockController {
    inner: Mutex<MockInner>,
}

impl MockController {
    /// Create a builder for configuring the simulated hardware.
    pub fn builder() -> MockControllerBuilder {
        MockControllerBuilder::default()
    }

    /// Number of times a command was issued, keyed as `"op:target"`
    /// (e.g. `"enable:G1"`, `"home:G1"`, `"move:G1.Pos1"`).
    pub async fn commands_issued(&self, key: &str) -> usize {
        self.inner
            .lock()
            .await
            .counters
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Total `enable` and `home` commands issued across all groups.
    pub async fn lifecycle_commands_issued(&self) -> usize {
        self.inner
            .lock()
            .await
            .counters
            .iter()
            .filter(|(key, _)| key.starts_with("enable:") || key.starts_with("home:"))
            .map(|(_, count)| count)
            .sum()
    }

    /// Overwrite a stage position out-of-band (simulating external motion).
    pub async fn place_stage(&self, stage: &StageId, position: f64) {
        self.inner
            .lock()
            .await
            .positions
            .insert(stage.clone(), position);
    }
}

#[async_trait]
impl MotionController for MockController {
    async fn enable_group(&self, group: &str) -> MotionResult<CommandOutcome> {
        let mut inner = self.inner.lock().await;
        inner.bump(&format!("enable:{group}"));
        inner.check_fault(&format!("enable:{group}"))?;
        let state = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| MotionError::ControllerFault(format!("unknown group '{group}'")))?;
        match *state {
            GroupState::Unknown | GroupState::Disabled => {
                *state = GroupState::Enabled;
                Ok(CommandOutcome::Done)
            }
            _ => Ok(CommandOutcome::AlreadyDone),
        }
    }

    async fn home_group(&self, group: &str) -> MotionResult<CommandOutcome> {
        let mut inner = self.inner.lock().await;
        inner.bump(&format!("home:{group}"));
        inner.check_fault(&format!("home:{group}"))?;
        let state = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| MotionError::ControllerFault(format!("unknown group '{group}'")))?;
        if state.is_homed() {
            Ok(CommandOutcome::AlreadyDone)
        } else {
            *state = GroupState::Ready;
            Ok(CommandOutcome::Done)
        }
    }

    async fn group_state(&self, group: &str) -> MotionResult<GroupState> {
        let mut inner = self.inner.lock().await;
        inner.bump(&format!("status:{group}"));
        inner.check_fault(&format!("status:{group}"))?;
        inner
            .groups
            .get(group)
            .copied()
            .ok_or_else(|| MotionError::ControllerFault(format!("unknown group '{group}'")))
    }

    async fn move_absolute(&self, stage: &StageId, position: f64) -> MotionResult<()> {
        let mut inner = self.inner.lock().await;
        inner.bump(&format!("move:{stage}"));
        inner.check_fault(&format!("move:{stage}"))?;
        if !inner.positions.contains_key(stage) {
            return Err(MotionError::ControllerFault(format!(
                "unknown stage '{stage}'"
            )));
        }
        // A stuck stage accepts the command but never arrives.
        if !inner.stuck.contains(stage) {
            inner.positions.insert(stage.clone(), position);
        }
        Ok(())
    }

    async fn read_position(&self, stage: &StageId) -> MotionResult<f64> {
        let mut inner = self.inner.lock().await;
        inner.bump(&format!("read:{stage}"));
        inner.check_fault(&format!("read:{stage}"))?;
        inner
            .positions
            .get(stage)
            .copied()
            .ok_or_else(|| MotionError::ControllerFault(format!("unknown stage '{stage}'")))
    }

    async fn describe_groups(&self) -> MotionResult<Vec<GroupInfo>> {
        Ok(self.inner.lock().await.layout.clone())
    }

    async fn backup_config(&self) -> MotionResult<ConfigBackup> {
        Ok(ConfigBackup {
            system_ini: b"[GENERAL]\nBootScriptFileName =\n".to_vec(),
            stages_ini: b"[Stage]\n".to_vec(),
        })
    }

    async fn disconnect(&self) -> MotionResult<()> {
        Ok(())
    }
}

/// Builder for [`MockController`].
#[derive(Debug, Default)]
pub struct MockControllerBuilder {
    inner: MockInner,
}

impl MockControllerBuilder {
    /// Add a group with its member stages, all at position 0.0, state
    /// `Disabled`.
    pub fn group(mut self, name: &str, stages: &[&str]) -> Self {
        self.inner
            .groups
            .insert(name.to_string(), GroupState::Disabled);
        self.inner.layout.push(GroupInfo {
            name: name.to_string(),
            positioners: stages.iter().map(|s| s.to_string()).collect(),
        });
        for stage in stages {
            self.inner.positions.insert(StageId::new(*stage), 0.0);
        }
        self
    }

    /// Override the initial state of a group (simulating re-entry into an
    /// already-prepared controller).
    pub fn state(mut self, group: &str, state: GroupState) -> Self {
        self.inner.groups.insert(group.to_string(), state);
        self
    }

    /// Place a stage at an initial position.
    pub fn position(mut self, stage: &str, position: f64) -> Self {
        self.inner.positions.insert(StageId::new(stage), position);
        self
    }

    /// Mark a stage as stuck: move commands are accepted but the reported
    /// position never changes.
    pub fn stuck(mut self, stage: &str) -> Self {
        self.inner.stuck.insert(StageId::new(stage));
        self
    }

    /// Script a fault for a command key (`"enable:G1"`, `"move:G1.Pos1"`, ...).
    pub fn fail_on(mut self, key: &str, message: &str) -> Self {
        self.inner
            .faults
            .insert(key.to_string(), message.to_string());
        self
    }

    /// Build the controller.
    pub fn build(self) -> MockController {
        MockController {
            inner: Mutex::new(self.inner),
        }
    }
}
