//! # stagectl
//!
//! Multi-axis motion stage control for Newport XPS-class controllers:
//! group initialization and homing, zero-offset calibration separating
//! physical controller coordinates from user-logical coordinates, and a
//! motion-sequence executor with tolerance- and timeout-aware completion
//! checking.
//!
//! ## Crate Structure
//!
//! - **`config`**: credential and hardware snapshot files, the validated
//!   hardware map, and stage selection.
//! - **`hardware`**: the `MotionController` session boundary with the live
//!   XPS TCP driver and the mock driver used by tests.
//! - **`lifecycle`**: the per-group `Unknown → Disabled → Enabled → Homed →
//!   Ready` state machine; `ensure_ready` gates every move.
//! - **`calibration`**: the zero-offset table and logical/physical
//!   conversion, persisted in the hardware snapshot.
//! - **`executor`**: validation, dispatch and completion confirmation for
//!   each move; position read-back.
//! - **`sequence`**: motion-file parsing and the skip-not-abort runner.
//! - **`session`**: the explicit session object tying the above together,
//!   plus the bootstrap operations (snapshot generation, config backup).
//! - **`storage`**: the CSV position log sink.
//! - **`error`**: the `MotionError` taxonomy.
//! - **`tracing_setup`**: logging initialization.

pub mod calibration;
pub mod config;
pub mod error;
pub mod executor;
pub mod hardware;
pub mod lifecycle;
pub mod sequence;
pub mod session;
pub mod storage;
pub mod tracing_setup;
