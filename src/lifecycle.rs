//! Group lifecycle management.
//!
//! Physical stages must never be moved before their group is enabled and
//! homed, but re-homing on every operation is slow and physically
//! disruptive. This module tracks each group along
//! `Unknown → Disabled → Enabled → Homed → Ready` and makes
//! "prepare once, move many times" both safe and explicit:
//! [`LifecycleManager::ensure_ready`] is the single entry point the motion
//! executor calls before issuing moves, and repeat calls after the first
//! success are cheap no-ops.
//!
//! The controller reports redundant enable/home commands as
//! `AlreadyDone`; those are absorbed as success. Any other fault parks the
//! group in [`GroupState::Fault`] and is surfaced to the caller.

use crate::error::MotionResult;
use crate::hardware::{CommandOutcome, GroupState, MotionController};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

fn rank(state: GroupState) -> u8 {
    match state {
        GroupState::Unknown | GroupState::Fault => 0,
        GroupState::Disabled => 1,
        GroupState::Enabled => 2,
        GroupState::Homed => 3,
        GroupState::Ready => 4,
    }
}

/// Drives groups through initialization and homing, remembering how far
/// each one got this session.
pub struct LifecycleManager {
    controller: Arc<dyn MotionController>,
    states: Mutex<HashMap<String, GroupState>>,
}

impl LifecycleManager {
    /// Track the given groups, all starting at `Unknown`.
    pub fn new(controller: Arc<dyn MotionController>, groups: Vec<String>) -> Self {
        let states = groups
            .into_iter()
            .map(|name| (name, GroupState::Unknown))
            .collect();
        Self {
            controller,
            states: Mutex::new(states),
        }
    }

    /// Last-known state of a group.
    pub async fn state(&self, group: &str) -> GroupState {
        self.states
            .lock()
            .await
            .get(group)
            .copied()
            .unwrap_or_default()
    }

    /// True when every tracked group is `Ready`.
    pub async fn all_ready(&self) -> bool {
        self.states
            .lock()
            .await
            .values()
            .all(|state| *state == GroupState::Ready)
    }

    /// Query the controller's view of each group once, so re-entry into an
    /// already-homed controller skips the enable/home round trip entirely.
    ///
    /// Status-query failures are not fatal here; preparation simply runs.
    pub async fn seed_from_controller(&self) {
        let names: Vec<String> = self.states.lock().await.keys().cloned().collect();
        for name in names {
            match self.controller.group_state(&name).await {
                Ok(state) => {
                    tracing::debug!("group {name} reports {state:?}");
                    self.states.lock().await.insert(name, state);
                }
                Err(e) => {
                    tracing::warn!("could not query state of group {name}: {e}");
                }
            }
        }
    }

    /// Issue `enable` for a group. An already-enabled reply is success.
    pub async fn initialize(&self, group: &str) -> MotionResult<()> {
        match self.controller.enable_group(group).await {
            Ok(CommandOutcome::Done) => {
                tracing::info!("group {group} initialized");
                self.advance(group, GroupState::Enabled).await;
                Ok(())
            }
            Ok(CommandOutcome::AlreadyDone) => {
                tracing::debug!("group {group} already initialized");
                self.advance(group, GroupState::Enabled).await;
                Ok(())
            }
            Err(e) => {
                self.set_fault(group).await;
                Err(e)
            }
        }
    }

    /// Home a group. Skipped when the group is already referenced this
    /// session, unless `force` is set. An already-referenced controller
    /// reply is success.
    pub async fn home(&self, group: &str, force: bool) -> MotionResult<()> {
        if !force && self.state(group).await.is_homed() {
            tracing::debug!("group {group} already referenced; skipping home");
            self.advance(group, GroupState::Ready).await;
            return Ok(());
        }
        match self.controller.home_group(group).await {
            Ok(CommandOutcome::Done) => {
                tracing::info!("group {group} homed");
                self.advance(group, GroupState::Ready).await;
                Ok(())
            }
            Ok(CommandOutcome::AlreadyDone) => {
                tracing::debug!("group {group} was already referenced");
                self.advance(group, GroupState::Ready).await;
                Ok(())
            }
            Err(e) => {
                self.set_fault(group).await;
                Err(e)
            }
        }
    }

    /// Prepare a group for motion: initialize, then home. Idempotent —
    /// once a group is `Ready` (and `force_home` is off) no controller
    /// command is issued at all.
    pub async fn ensure_ready(&self, group: &str, force_home: bool) -> MotionResult<()> {
        if !force_home && self.state(group).await == GroupState::Ready {
            return Ok(());
        }
        self.initialize(group).await?;
        self.home(group, force_home).await
    }

    /// Raise a group's recorded state; never downgrades (a seeded `Homed`
    /// is not lost to a later redundant `Enabled`).
    async fn advance(&self, group: &str, to: GroupState) {
        let mut states = self.states.lock().await;
        let entry = states.entry(group.to_string()).or_default();
        if rank(to) > rank(*entry) {
            *entry = to;
        }
    }

    async fn set_fault(&self, group: &str) {
        self.states
            .lock()
            .await
            .insert(group.to_string(), GroupState::Fault);
    }
}
