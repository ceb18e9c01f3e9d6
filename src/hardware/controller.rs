//! Motion controller session boundary.
//!
//! Hardware-agnostic interface to one multi-axis motion controller.
//! Implementations handle protocol-specific details; see
//! [`XpsController`](crate::hardware::xps::XpsController) for the live TCP
//! driver and [`MockController`](crate::hardware::mock::MockController) for
//! the in-memory one used in tests and offline runs.

use crate::config::StageId;
use crate::error::MotionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a lifecycle command the controller may report as redundant.
///
/// Enabling an already-enabled group (or homing an already-referenced one)
/// is a benign no-op in this domain, not an error; drivers translate the
/// controller's "not allowed" reply for those cases into `AlreadyDone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The controller performed the operation.
    Done,
    /// The controller reported the operation was already in effect.
    AlreadyDone,
}

/// Last-known lifecycle state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupState {
    /// No information yet.
    #[default]
    Unknown,
    /// Known to be uninitialized.
    Disabled,
    /// Initialized but not referenced.
    Enabled,
    /// Referenced, readiness not yet confirmed.
    Homed,
    /// Initialized, referenced and ready to move.
    Ready,
    /// A controller fault was observed; the group must be re-prepared.
    Fault,
}

impl GroupState {
    /// Whether the group holds a valid home reference.
    pub fn is_homed(self) -> bool {
        matches!(self, GroupState::Homed | GroupState::Ready)
    }
}

/// One group and its positioners, as enumerated from the live controller.
///
/// `positioners` holds full stage identifiers (`GROUP.POSITIONER`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Group name.
    pub name: String,
    /// Full stage identifiers belonging to the group.
    pub positioners: Vec<String>,
}

/// Controller configuration files retrieved by
/// [`MotionController::backup_config`].
#[derive(Debug, Clone)]
pub struct ConfigBackup {
    /// Contents of `system.ini`.
    pub system_ini: Vec<u8>,
    /// Contents of `stages.ini`.
    pub stages_ini: Vec<u8>,
}

/// Live connection to a motion controller.
///
/// # Contract
/// - All methods take `&self`; drivers use interior mutability and are safe
///   to share behind an `Arc`.
/// - Commands addressed to the same stage must not be interleaved; whether
///   commands to distinct stages overlap on the wire is a driver decision.
/// - `move_absolute` initiates motion and may return before completion;
///   callers confirm arrival by polling `read_position`.
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Initialize a group so it can be homed. Benign when already done.
    async fn enable_group(&self, group: &str) -> MotionResult<CommandOutcome>;

    /// Run the group's home search, establishing the reference position.
    /// Benign when the group is already referenced.
    async fn home_group(&self, group: &str) -> MotionResult<CommandOutcome>;

    /// Query the controller's view of a group's lifecycle state.
    async fn group_state(&self, group: &str) -> MotionResult<GroupState>;

    /// Command an absolute move, in physical coordinates.
    async fn move_absolute(&self, stage: &StageId, position: f64) -> MotionResult<()>;

    /// Read the current physical position of a stage.
    async fn read_position(&self, stage: &StageId) -> MotionResult<f64>;

    /// Enumerate groups and positioners from the live controller.
    async fn describe_groups(&self) -> MotionResult<Vec<GroupInfo>>;

    /// Retrieve the controller's configuration files.
    async fn backup_config(&self) -> MotionResult<ConfigBackup>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self) -> MotionResult<()>;
}
