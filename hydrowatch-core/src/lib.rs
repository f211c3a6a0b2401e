//! HydroWatch Core - Shared infrastructure for the dashboard session core
//!
//! This crate defines the error type, configuration model, logging setup and
//! small async helpers used by the API client and the session manager.

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;

// Re-export commonly used external types
pub use tokio;
pub use tracing;
