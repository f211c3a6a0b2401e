//! Session Management Module
//!
//! Owns the authentication lifecycle: restore on startup, sign-in, token
//! renewal and sign-out, with the persisted record kept in step.

pub mod manager;
pub mod storage;
pub mod types;

pub use manager::{ManagerOptions, SessionManager};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SessionStorage};
pub use types::*;
