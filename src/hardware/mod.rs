//! Controller drivers and the session boundary they implement.
//!
//! The rest of the application only sees the [`MotionController`] trait;
//! protocol-specific details live in the driver modules.

pub mod controller;
pub mod mock;
pub mod xps;

pub use controller::{
    CommandOutcome, ConfigBackup, GroupInfo, GroupState, MotionController,
};
pub use mock::MockController;
pub use xps::XpsController;
