//! HydroWatch API - client for the dashboard backend
//!
//! Wire types and the [`AuthApi`] seam the session manager depends on, plus
//! the reqwest-backed [`HttpAuthApi`] used in production.

pub mod auth;
pub mod client;
pub mod types;
pub mod users;


pub use auth::{AuthApi, HttpAuthApi};
pub use client::ApiClientConfig;
pub use types::*;
