//! HydroWatch Session - authentication lifecycle for the dashboard
//!
//! This crate is the single source of truth for "who is signed in and with
//! what role". Views never touch tokens or storage directly; they hold a
//! [`SessionManager`] handle, observe its snapshot, and ask the
//! [`RouteGuard`] whether a location may render.
//!
//! ## Layers
//!
//! - **Persistence** ([`session::storage`]): key-value store holding the four
//!   session keys, written and cleared as one unit
//! - **Transport** (`hydrowatch-api`): the [`hydrowatch_api::AuthApi`] seam
//! - **Manager** ([`SessionManager`]): restore, sign-in, refresh, sign-out
//! - **Guard** ([`RouteGuard`]): loading / redirect / render decisions

pub mod auth;
pub mod session;

pub use auth::{GuardDecision, GuardWatch, Identity, Redirect, Role, RouteGuard};
pub use session::{
    Credentials, FileStore, KeyValueStore, LifecycleState, ManagerOptions, MemoryStore,
    PersistedRecord, SessionManager, SessionSnapshot, SessionStorage,
};

use hydrowatch_core::HydroError;

/// Message shown when the backend cannot be reached
pub const CONNECTION_FAILED: &str = "Connection failed. Make sure the server is running.";

/// User-facing failure of a session operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Bad email/password or unknown unique ID; carries the backend's `detail`
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Connection failed. Make sure the server is running.")]
    NetworkFailure { reason: String },

    /// Token renewal failed; the session has already been cleared
    #[error("Session expired. Please sign in again.")]
    SessionExpired,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("{0}")]
    NotPermitted(String),

    /// A logout completed while this sign-in was in flight
    #[error("Sign-in cancelled by logout")]
    Superseded,

    #[error("Failed to persist session: {0}")]
    Storage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Classify a failed login, portal login or registration
    pub fn from_sign_in_failure(error: HydroError, fallback: &str) -> Self {
        match error {
            HydroError::Api { status, detail, .. } if (400..500).contains(&status) => {
                if detail.trim().is_empty() {
                    AuthError::InvalidCredentials(fallback.to_string())
                } else {
                    AuthError::InvalidCredentials(detail)
                }
            }
            HydroError::Api { status, detail, .. } => AuthError::Rejected {
                status,
                message: detail,
            },
            other => AuthError::NetworkFailure {
                reason: other.to_string(),
            },
        }
    }

    /// Classify a failed authenticated request
    pub fn from_request_failure(error: HydroError) -> Self {
        match error {
            HydroError::Api {
                status: 403,
                detail,
                ..
            } => AuthError::NotPermitted(detail),
            HydroError::Api { status, detail, .. } => AuthError::Rejected {
                status,
                message: detail,
            },
            HydroError::Storage { message, .. } => AuthError::Storage(message),
            other => AuthError::NetworkFailure {
                reason: other.to_string(),
            },
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::NetworkFailure { .. } => true,
            AuthError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrowatch_core::ErrorContext;

    fn api_error(status: u16, detail: &str) -> HydroError {
        HydroError::Api {
            status,
            detail: detail.to_string(),
            context: ErrorContext::new("test"),
        }
    }

    #[test]
    fn test_sign_in_failures_surface_backend_detail() {
        let error = AuthError::from_sign_in_failure(api_error(401, "Invalid credentials"), "x");
        assert_eq!(error, AuthError::InvalidCredentials("Invalid credentials".into()));
        assert_eq!(error.to_string(), "Invalid credentials");

        let blank = AuthError::from_sign_in_failure(api_error(422, " "), "Login failed");
        assert_eq!(blank.to_string(), "Login failed");

        let server = AuthError::from_sign_in_failure(api_error(503, "Database down"), "x");
        assert!(server.is_retryable());
        assert_eq!(server.to_string(), "Database down");
    }

    #[test]
    fn test_transport_failures_use_generic_message() {
        let error = AuthError::from_sign_in_failure(
            HydroError::Network {
                message: "connection refused".into(),
                source: None,
                context: ErrorContext::new("test"),
            },
            "Login failed",
        );
        assert_eq!(error.to_string(), CONNECTION_FAILED);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_request_failures() {
        assert_eq!(
            AuthError::from_request_failure(api_error(403, "Admins only")),
            AuthError::NotPermitted("Admins only".into())
        );
        assert_eq!(
            AuthError::from_request_failure(api_error(404, "User not found")),
            AuthError::Rejected {
                status: 404,
                message: "User not found".into()
            }
        );
    }
}
