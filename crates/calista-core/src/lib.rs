//! Core value types and shared plumbing for the Calista ingestion service.
//!
//! Holds the device/reading model, the error taxonomy, CLI settings and the
//! statistic-id helpers used by every other crate in the workspace.

pub mod error;
pub mod models;
pub mod settings;
pub mod util;

pub use error::{CalistaError, Result};
