//! Identity and access control
//!
//! - [`Identity`]: the signed-in principal, either an administrator or a portal user
//! - [`RouteGuard`]: pure policy deciding whether a requested view may render

pub mod guard;
pub mod identity;

pub use guard::{GuardDecision, GuardWatch, Redirect, RouteGuard};
pub use identity::{Identity, Role};
