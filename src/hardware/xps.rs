//! Newport XPS motion controller driver.
//!
//! Protocol Overview:
//! - Format: ASCII function-call commands over TCP, port 5001
//! - Commands: `Name(arg1,arg2,...)`, e.g. `GroupMoveAbsolute(SP1.Pos1,5.0)`
//! - Replies: `code,body,EndOfAPI` with no line terminator; code 0 is
//!   success, negative codes are controller errors
//! - Error -22 ("Not allowed action") on initialize/home means the group is
//!   already in the requested state and is reported as
//!   [`CommandOutcome::AlreadyDone`]
//!
//! Configuration backup (`system.ini` / `stages.ini`) goes through the
//! controller's FTP service; the command socket does not serve files.

use crate::config::{Credentials, StageId};
use crate::error::{MotionError, MotionResult};
use crate::hardware::controller::{
    CommandOutcome, ConfigBackup, GroupInfo, GroupState, MotionController,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Command port of the XPS ASCII API.
pub const DEFAULT_PORT: u16 = 5001;

/// Default per-command timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Terminator closing every controller reply.
const REPLY_TERMINATOR: &str = "EndOfAPI";

/// XPS error code for "Not allowed action" (already initialized/homed).
const ERR_NOT_ALLOWED: i32 = -22;

/// Driver for the Newport XPS universal motion controller.
///
/// The socket is protected by a mutex, so commands are serialized at the
/// transport: one outstanding command per controller at a time.
pub struct XpsController {
    stream: Mutex<BufReader<TcpStream>>,
    credentials: Credentials,
    timeout: Duration,
}

impl XpsController {
    /// Connect to the controller's command port and log in.
    pub async fn connect(credentials: &Credentials) -> MotionResult<Self> {
        let addr = format!("{}:{}", credentials.ip, DEFAULT_PORT);
        let stream = timeout(Duration::from_secs(5), TcpStream::connect(&addr))
            .await
            .map_err(|_| MotionError::ControllerFault(format!("connection timeout to {addr}")))?
            .map_err(|e| {
                MotionError::ControllerFault(format!("failed to connect to {addr}: {e}"))
            })?;
        stream.set_nodelay(true)?;
        tracing::info!("connected to XPS at {addr}");

        let controller = Self {
            stream: Mutex::new(BufReader::new(stream)),
            credentials: credentials.clone(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };
        controller
            .command(&format!(
                "Login({},{})",
                controller.credentials.username, controller.credentials.password
            ))
            .await?;
        Ok(controller)
    }

    /// Set the per-command timeout.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    /// Send one command and return `(code, body)` from the reply.
    async fn command_with_code(&self, command: &str) -> MotionResult<(i32, String)> {
        let mut stream = self.stream.lock().await;

        let wire = format!("{command}\r\n");
        tracing::debug!("XPS write: {:?}", command);
        stream.get_mut().write_all(wire.as_bytes()).await?;
        stream.get_mut().flush().await?;

        let reply = timeout(self.timeout, read_reply(&mut stream))
            .await
            .map_err(|_| {
                MotionError::ControllerFault(format!("timeout waiting for reply to {command}"))
            })??;
        tracing::debug!("XPS reply: {:?}", reply);
        parse_reply(&reply)
    }

    /// Send one command, treating any nonzero code as a fault.
    async fn command(&self, command: &str) -> MotionResult<String> {
        match self.command_with_code(command).await? {
            (0, body) => Ok(body),
            (code, body) => Err(command_fault(command, code, &body)),
        }
    }

    /// Send a lifecycle command whose "Not allowed action" reply is benign.
    async fn lifecycle_command(&self, command: &str) -> MotionResult<CommandOutcome> {
        match self.command_with_code(command).await? {
            (0, _) => Ok(CommandOutcome::Done),
            (ERR_NOT_ALLOWED, _) => Ok(CommandOutcome::AlreadyDone),
            (code, body) => Err(command_fault(command, code, &body)),
        }
    }
}

#[async_trait]
impl MotionController for XpsController {
    async fn enable_group(&self, group: &str) -> MotionResult<CommandOutcome> {
        self.lifecycle_command(&format!("GroupInitialize({group})"))
            .await
    }

    async fn home_group(&self, group: &str) -> MotionResult<CommandOutcome> {
        self.lifecycle_command(&format!("GroupHomeSearch({group})"))
            .await
    }

    async fn group_state(&self, group: &str) -> MotionResult<GroupState> {
        let body = self
            .command(&format!("GroupStatusGet({group},int *)"))
            .await?;
        let code: i32 = body.trim().parse().map_err(|_| {
            MotionError::ControllerFault(format!(
                "unparseable group status '{body}' for {group}"
            ))
        })?;
        Ok(map_group_status(code))
    }

    async fn move_absolute(&self, stage: &StageId, position: f64) -> MotionResult<()> {
        self.command(&format!("GroupMoveAbsolute({stage},{position:.6})"))
            .await?;
        Ok(())
    }

    async fn read_position(&self, stage: &StageId) -> MotionResult<f64> {
        let body = self
            .command(&format!("GroupPositionCurrentGet({stage},double *)"))
            .await?;
        body.trim().parse().map_err(|_| {
            MotionError::ControllerFault(format!("unparseable position '{body}' for {stage}"))
        })
    }

    async fn describe_groups(&self) -> MotionResult<Vec<GroupInfo>> {
        let body = self.command("ObjectsListGet(char *)").await?;
        Ok(parse_objects_list(&body))
    }

    async fn backup_config(&self) -> MotionResult<ConfigBackup> {
        let credentials = self.credentials.clone();
        tokio::task::spawn_blocking(move || fetch_config_files(&credentials))
            .await
            .map_err(|e| MotionError::ControllerFault(format!("backup task failed: {e}")))?
    }

    async fn disconnect(&self) -> MotionResult<()> {
        let mut stream = self.stream.lock().await;
        let _ = stream.get_mut().shutdown().await;
        tracing::info!("disconnected from XPS");
        Ok(())
    }
}

/// Read bytes until the reply terminator arrives.
async fn read_reply(stream: &mut BufReader<TcpStream>) -> MotionResult<String> {
    let mut reply = String::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(MotionError::ControllerFault(
                "connection closed by controller".into(),
            ));
        }
        reply.push_str(&String::from_utf8_lossy(&chunk[..n]));
        if reply.trim_end().ends_with(REPLY_TERMINATOR) {
            return Ok(reply);
        }
    }
}

/// Split a `code,body,EndOfAPI` reply into its parts.
fn parse_reply(reply: &str) -> MotionResult<(i32, String)> {
    let trimmed = reply.trim();
    let body = trimmed.strip_suffix(REPLY_TERMINATOR).unwrap_or(trimmed);
    let body = body.trim_end().trim_end_matches(',');
    let (code, rest) = match body.split_once(',') {
        Some((code, rest)) => (code, rest),
        None => (body, ""),
    };
    let code: i32 = code.trim().parse().map_err(|_| {
        MotionError::ControllerFault(format!("malformed controller reply: {reply:?}"))
    })?;
    Ok((code, rest.trim().to_string()))
}

fn command_fault(command: &str, code: i32, body: &str) -> MotionError {
    if body.is_empty() {
        MotionError::ControllerFault(format!("{command} failed with controller error {code}"))
    } else {
        MotionError::ControllerFault(format!(
            "{command} failed with controller error {code} ({body})"
        ))
    }
}

/// Coarse mapping of the XPS group status table.
///
/// 0-9 are the not-initialized states, 10-19 the ready states, 20/21
/// disable (referenced, motor off), 42 not referenced, 43 homing, 44-49
/// moving/jogging (referenced and usable).
fn map_group_status(code: i32) -> GroupState {
    match code {
        0..=9 => GroupState::Disabled,
        10..=19 => GroupState::Ready,
        20 | 21 => GroupState::Homed,
        42 | 43 => GroupState::Enabled,
        44..=49 => GroupState::Ready,
        _ => GroupState::Unknown,
    }
}

/// Parse the semicolon-separated object list into groups with their
/// positioners.
fn parse_objects_list(body: &str) -> Vec<GroupInfo> {
    let mut groups: Vec<GroupInfo> = Vec::new();
    for name in body.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        match name.split_once('.') {
            None => {
                if !groups.iter().any(|g| g.name == name) {
                    groups.push(GroupInfo {
                        name: name.to_string(),
                        positioners: Vec::new(),
                    });
                }
            }
            Some((group, _)) => {
                if let Some(info) = groups.iter_mut().find(|g| g.name == group) {
                    info.positioners.push(name.to_string());
                } else {
                    groups.push(GroupInfo {
                        name: group.to_string(),
                        positioners: vec![name.to_string()],
                    });
                }
            }
        }
    }
    groups
}

/// Fetch `system.ini` and `stages.ini` over the controller's FTP service.
fn fetch_config_files(credentials: &Credentials) -> MotionResult<ConfigBackup> {
    use suppaftp::FtpStream;

    let addr = format!("{}:21", credentials.ip);
    let mut ftp = FtpStream::connect(&addr)
        .map_err(|e| MotionError::ControllerFault(format!("FTP connect to {addr} failed: {e}")))?;
    ftp.login(&credentials.username, &credentials.password)
        .map_err(|e| MotionError::ControllerFault(format!("FTP login failed: {e}")))?;
    ftp.cwd("/Admin/Config")
        .map_err(|e| MotionError::ControllerFault(format!("FTP chdir failed: {e}")))?;
    let system_ini = ftp
        .retr_as_buffer("system.ini")
        .map_err(|e| MotionError::ControllerFault(format!("failed to fetch system.ini: {e}")))?
        .into_inner();
    let stages_ini = ftp
        .retr_as_buffer("stages.ini")
        .map_err(|e| MotionError::ControllerFault(format!("failed to fetch stages.ini: {e}")))?
        .into_inner();
    let _ = ftp.quit();
    Ok(ConfigBackup {
        system_ini,
        stages_ini,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_reply() {
        let (code, body) = parse_reply("0,GroupInitialize(SP1),EndOfAPI").unwrap();
        assert_eq!(code, 0);
        assert_eq!(body, "GroupInitialize(SP1)");
    }

    #[test]
    fn parses_value_reply() {
        let (code, body) = parse_reply("0,12.345,EndOfAPI").unwrap();
        assert_eq!(code, 0);
        assert_eq!(body, "12.345");
    }

    #[test]
    fn parses_not_allowed_reply() {
        let (code, _) = parse_reply("-22,GroupInitialize(SP1),EndOfAPI").unwrap();
        assert_eq!(code, ERR_NOT_ALLOWED);
    }

    #[test]
    fn rejects_garbage_reply() {
        assert!(parse_reply("not a reply").is_err());
    }

    #[test]
    fn objects_list_groups_positioners_under_their_group() {
        let groups = parse_objects_list("SP1;SP1.Pos1;SP1.Pos2;SP3;SP3.Pos3;");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "SP1");
        assert_eq!(groups[0].positioners, vec!["SP1.Pos1", "SP1.Pos2"]);
        assert_eq!(groups[1].name, "SP3");
        assert_eq!(groups[1].positioners, vec!["SP3.Pos3"]);
    }

    #[test]
    fn objects_list_tolerates_positioner_before_group_entry() {
        let groups = parse_objects_list("SP1.Pos1;SP1");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].positioners, vec!["SP1.Pos1"]);
    }

    #[test]
    fn group_status_mapping_covers_lifecycle_states() {
        assert_eq!(map_group_status(0), GroupState::Disabled);
        assert_eq!(map_group_status(7), GroupState::Disabled);
        assert_eq!(map_group_status(11), GroupState::Ready);
        assert_eq!(map_group_status(42), GroupState::Enabled);
        assert_eq!(map_group_status(44), GroupState::Ready);
        assert_eq!(map_group_status(20), GroupState::Homed);
        assert_eq!(map_group_status(99), GroupState::Unknown);
    }
}
