//! Tracing initialization.
//!
//! Structured, async-aware logging via `tracing` + `tracing-subscriber`.
//! The filter comes from the `STAGECTL_LOG` environment variable when set
//! (full directive syntax), otherwise from the CLI `--log-level` flag.

use crate::error::{MotionError, MotionResult};
use tracing_subscriber::EnvFilter;

/// Environment variable consulted for filter directives.
pub const ENV_FILTER_VAR: &str = "STAGECTL_LOG";

/// Install the global subscriber. `level` is the fallback when the
/// environment variable is unset.
pub fn init(level: &str) -> MotionResult<()> {
    let filter = EnvFilter::try_from_env(ENV_FILTER_VAR)
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| MotionError::ConfigMalformed(format!("invalid log level '{level}': {e}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}
