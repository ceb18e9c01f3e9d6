//! Configuration loading and the hardware map.
//!
//! Two files live in the configuration directory (default `config/`):
//!
//! - `credentials.json` — controller login (`ip`, `username`, `password`).
//!   Any blank field is a fatal configuration error surfaced before any
//!   controller I/O is attempted.
//! - `hardware.json` — a previously generated snapshot of controller state:
//!   group names, stage identifiers, display labels, recorded zero offsets
//!   and motion settings. Loading performs no network I/O; when the file is
//!   absent the operator is directed to regenerate it from the live
//!   controller (`stagectl generate-config`).

use crate::error::{MotionError, MotionResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory for configuration files, relative to the working
/// directory.
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Credential file name inside the configuration directory.
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Hardware snapshot file name inside the configuration directory.
pub const HARDWARE_FILE: &str = "hardware.json";

const EXAMPLE_CREDENTIALS: &str =
    r#"{ "ip": "192.168.254.254", "username": "Administrator", "password": "Administrator" }"#;

/// Identifier of one stage (one controllable axis), in `GROUP.POSITIONER`
/// form as reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Wrap a stage identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Group portion of the identifier (prefix before the first `.`).
    pub fn group(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Controller connection credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Controller IP address or hostname.
    pub ip: String,
    /// Login user name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl Credentials {
    /// Load and validate the credential file from `dir`.
    pub fn load(dir: &Path) -> MotionResult<Self> {
        let path = dir.join(CREDENTIALS_FILE);
        if !path.exists() {
            return Err(MotionError::ConfigMissing {
                path,
                hint: format!(
                    "create it with the controller login, e.g. {EXAMPLE_CREDENTIALS}"
                ),
            });
        }
        let raw = std::fs::read_to_string(&path)?;
        let credentials: Credentials = serde_json::from_str(&raw)
            .map_err(|e| MotionError::ConfigMalformed(format!("{}: {e}", path.display())))?;
        credentials.validate()?;
        Ok(credentials)
    }

    /// Reject blank fields before any connection attempt is made.
    pub fn validate(&self) -> MotionResult<()> {
        if self.ip.trim().is_empty()
            || self.username.trim().is_empty()
            || self.password.trim().is_empty()
        {
            return Err(MotionError::ConfigMalformed(
                "credential file is incomplete; fill in ip, username and password".into(),
            ));
        }
        Ok(())
    }
}

/// Motion timing and tolerance settings stored in the hardware snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Maximum |reported - target| for a move to count as complete.
    pub position_tolerance: f64,
    /// Delay between completion polls.
    #[serde(with = "humantime_serde")]
    pub wait_delay: Duration,
    /// Overall completion deadline per move.
    #[serde(with = "humantime_serde")]
    pub max_wait_time: Duration,
    /// Logical position targeted by `reset`.
    pub reset_position: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            position_tolerance: 0.1,
            wait_delay: Duration::from_millis(500),
            max_wait_time: Duration::from_secs(10),
            reset_position: 0.0,
        }
    }
}

/// On-disk hardware snapshot: groups, stages, labels, zero offsets and
/// motion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSnapshot {
    /// Controller group names.
    pub groups: Vec<String>,
    /// Stage identifiers, in controller order.
    pub stages: Vec<StageId>,
    /// Display labels, parallel to `stages` (defaults to the identifiers).
    #[serde(default)]
    pub labels: Vec<String>,
    /// Recorded zero offsets, stage identifier to physical value of
    /// logical 0.0.
    #[serde(default)]
    pub zero_offsets: BTreeMap<String, f64>,
    /// Motion timing and tolerance settings.
    #[serde(default)]
    pub motion: MotionSettings,
}

impl HardwareSnapshot {
    /// Pretty-print the snapshot to `path`.
    pub fn save(&self, path: &Path) -> MotionResult<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| MotionError::ConfigMalformed(format!("snapshot serialization: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

/// A named collection of stages the controller enables and homes as a unit.
#[derive(Debug, Clone)]
pub struct Group {
    /// Group name.
    pub name: String,
    /// Member stages, in snapshot order.
    pub stages: Vec<StageId>,
}

/// Validated, immutable-for-session view of the hardware snapshot.
#[derive(Debug, Clone)]
pub struct HardwareMap {
    snapshot: HardwareSnapshot,
    path: PathBuf,
    groups: BTreeMap<String, Group>,
}

impl HardwareMap {
    /// Load and validate the snapshot file from `dir`. Performs no
    /// controller I/O.
    pub fn load(dir: &Path) -> MotionResult<Self> {
        let path = dir.join(HARDWARE_FILE);
        if !path.exists() {
            return Err(MotionError::ConfigMissing {
                path,
                hint: "generate it from the live controller with `stagectl generate-config`"
                    .into(),
            });
        }
        let raw = std::fs::read_to_string(&path)?;
        let snapshot: HardwareSnapshot = serde_json::from_str(&raw)
            .map_err(|e| MotionError::ConfigMalformed(format!("{}: {e}", path.display())))?;
        Self::from_snapshot(snapshot, path)
    }

    /// Validate an already-deserialized snapshot.
    ///
    /// Fails when a stage identifier collides, a stage references an
    /// undeclared group, or a group ends up with zero stages.
    pub fn from_snapshot(snapshot: HardwareSnapshot, path: PathBuf) -> MotionResult<Self> {
        let mut seen = HashSet::new();
        for stage in &snapshot.stages {
            if !seen.insert(stage.clone()) {
                return Err(MotionError::ConfigMalformed(format!(
                    "duplicate stage identifier '{stage}'"
                )));
            }
        }

        let mut groups: BTreeMap<String, Group> = snapshot
            .groups
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    Group {
                        name: name.clone(),
                        stages: Vec::new(),
                    },
                )
            })
            .collect();
        for stage in &snapshot.stages {
            match groups.get_mut(stage.group()) {
                Some(group) => group.stages.push(stage.clone()),
                None => {
                    return Err(MotionError::ConfigMalformed(format!(
                        "stage '{stage}' references undeclared group '{}'",
                        stage.group()
                    )))
                }
            }
        }
        if let Some(empty) = groups.values().find(|g| g.stages.is_empty()) {
            return Err(MotionError::ConfigMalformed(format!(
                "group '{}' has no stages",
                empty.name
            )));
        }

        Ok(Self {
            snapshot,
            path,
            groups,
        })
    }

    /// Path of the backing snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Motion settings from the snapshot.
    pub fn settings(&self) -> &MotionSettings {
        &self.snapshot.motion
    }

    /// All stage identifiers, in snapshot order.
    pub fn stages(&self) -> &[StageId] {
        &self.snapshot.stages
    }

    /// Display labels (stage identifiers when none were recorded).
    pub fn labels(&self) -> Vec<String> {
        if self.snapshot.labels.len() == self.snapshot.stages.len() {
            self.snapshot.labels.clone()
        } else {
            self.snapshot.stages.iter().map(|s| s.to_string()).collect()
        }
    }

    /// Iterate over the groups, in name order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Recorded zero offsets.
    pub fn zero_offsets(&self) -> &BTreeMap<String, f64> {
        &self.snapshot.zero_offsets
    }

    /// Resolve a `--stages` selection against the snapshot.
    ///
    /// The selection is a comma-separated list of either 1-based indices or
    /// stage names. `None` (or an empty string) selects every stage.
    pub fn select_stages(&self, selection: Option<&str>) -> MotionResult<Vec<StageId>> {
        let Some(raw) = selection else {
            return Ok(self.snapshot.stages.clone());
        };
        let parts: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            return Ok(self.snapshot.stages.clone());
        }

        let by_index = parts
            .iter()
            .all(|p| p.chars().all(|c| c.is_ascii_digit()));
        let mut chosen = Vec::with_capacity(parts.len());
        for part in parts {
            if by_index {
                let index: usize = part.parse().map_err(|_| {
                    MotionError::ConfigMalformed(format!("invalid stage index '{part}'"))
                })?;
                let stage = index
                    .checked_sub(1)
                    .and_then(|i| self.snapshot.stages.get(i))
                    .ok_or_else(|| {
                        MotionError::ConfigMalformed(format!(
                            "stage index {index} out of range (1-{})",
                            self.snapshot.stages.len()
                        ))
                    })?;
                chosen.push(stage.clone());
            } else {
                let stage = self
                    .snapshot
                    .stages
                    .iter()
                    .find(|s| s.as_str() == part)
                    .ok_or_else(|| {
                        MotionError::ConfigMalformed(format!("stage name '{part}' not found"))
                    })?;
                chosen.push(stage.clone());
            }
        }
        Ok(chosen)
    }
}
