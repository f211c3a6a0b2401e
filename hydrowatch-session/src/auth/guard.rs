//! Route Guard
//!
//! Decides, from the session snapshot alone, whether a requested location
//! may render, must wait, or must redirect. It never mutates the session.

use super::identity::Role;
use crate::session::SessionSnapshot;
use crate::LifecycleState;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Where to send the viewer instead
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub to: String,
    /// Location to come back to after signing in
    pub return_to: Option<String>,
}

/// Outcome of guarding one location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    /// Session still resolving; show a placeholder
    Loading,
    Render,
    Redirect(Redirect),
}

impl GuardDecision {
    pub fn is_redirect(&self) -> bool {
        matches!(self, GuardDecision::Redirect(_))
    }
}

/// Access policy over location prefixes
#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_path: String,
    rules: Vec<(String, Role)>,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::dashboard()
    }
}

impl RouteGuard {
    /// Guard that only checks for a session
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
            rules: Vec::new(),
        }
    }

    /// Dashboard layout: portal pages under `/user`, everything else for admins
    pub fn dashboard() -> Self {
        Self::new("/login")
            .require_role("/", Role::Admin)
            .require_role(Role::User.home_path(), Role::User)
    }

    /// Restrict a location prefix to one role
    pub fn require_role(mut self, prefix: impl Into<String>, role: Role) -> Self {
        let prefix = prefix.into();
        self.rules.retain(|(existing, _)| *existing != prefix);
        self.rules.push((prefix, role));
        self
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Role required for a location; the longest matching prefix wins
    pub fn required_role(&self, location: &str) -> Option<Role> {
        let path = path_of(location);
        self.rules
            .iter()
            .filter(|(prefix, _)| prefix_matches(prefix, path))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, role)| *role)
    }

    fn is_login(&self, location: &str) -> bool {
        path_of(location) == self.login_path
    }

    /// Decide what to show for `location`
    pub fn evaluate(&self, snapshot: &SessionSnapshot, location: &str) -> GuardDecision {
        if self.is_login(location) {
            return GuardDecision::Render;
        }

        match snapshot.lifecycle_state {
            LifecycleState::Uninitialized | LifecycleState::Restoring => GuardDecision::Loading,
            LifecycleState::Unauthenticated => GuardDecision::Redirect(Redirect {
                to: self.login_path.clone(),
                return_to: Some(location.to_string()),
            }),
            LifecycleState::Authenticated => match (self.required_role(location), snapshot.role())
            {
                (Some(required), Some(role)) if required != role => {
                    debug!(location = location, role = %role, "Location belongs to another role");
                    GuardDecision::Redirect(Redirect {
                        to: role.home_path().to_string(),
                        return_to: None,
                    })
                }
                _ => GuardDecision::Render,
            },
        }
    }

    /// Landing location after a successful sign-in
    pub fn post_login_destination(&self, return_to: Option<&str>, role: Role) -> String {
        let allowed = |location: &&str| {
            location.starts_with('/')
                && !location.starts_with("//")
                && !self.is_login(location)
                && self
                    .required_role(location)
                    .map_or(true, |required| required == role)
        };

        match return_to.filter(allowed) {
            Some(location) => location.to_string(),
            None => role.home_path().to_string(),
        }
    }

    /// Follow the session and re-evaluate `location` on every transition
    pub fn watch(
        &self,
        mut snapshots: watch::Receiver<SessionSnapshot>,
        location: impl Into<String>,
    ) -> GuardWatch {
        let location = location.into();
        let snapshot = snapshots.borrow_and_update().clone();
        let current = self.evaluate(&snapshot, &location);

        GuardWatch {
            guard: self.clone(),
            snapshots,
            location,
            current,
        }
    }
}

/// Guarded location that reacts to session changes
pub struct GuardWatch {
    guard: RouteGuard,
    snapshots: watch::Receiver<SessionSnapshot>,
    location: String,
    current: GuardDecision,
}

impl GuardWatch {
    pub fn current(&self) -> &GuardDecision {
        &self.current
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Follow a redirect or user navigation
    pub fn navigate(&mut self, location: impl Into<String>) -> GuardDecision {
        self.location = location.into();
        let snapshot = self.snapshots.borrow_and_update().clone();
        self.current = self.guard.evaluate(&snapshot, &self.location);
        self.current.clone()
    }

    /// Next decision that differs from the current one
    ///
    /// Returns `None` once the session manager is gone.
    pub async fn changed(&mut self) -> Option<GuardDecision> {
        loop {
            if self.snapshots.changed().await.is_err() {
                return None;
            }

            let snapshot = self.snapshots.borrow_and_update().clone();
            let decision = self.guard.evaluate(&snapshot, &self.location);
            if decision != self.current {
                self.current = decision.clone();
                return Some(decision);
            }
        }
    }
}

/// Path part of a location, without query or fragment
fn path_of(location: &str) -> &str {
    let end = location.find(['?', '#']).unwrap_or(location.len());
    &location[..end]
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use hydrowatch_api::{AdminUser, PortalUser};
    use std::time::Duration;

    fn admin() -> Identity {
        Identity::Admin(AdminUser {
            id: "a-1".into(),
            email: "admin@water.org".into(),
            full_name: Some("Admin".into()),
            avatar_url: None,
        })
    }

    fn portal() -> Identity {
        Identity::PortalUser(PortalUser {
            id: "p-1".into(),
            unique_id: "WU-2024-001".into(),
            full_name: "Test User".into(),
            area: None,
            email: None,
            phone: None,
            is_active: Some(true),
        })
    }

    fn snapshot(state: LifecycleState, identity: Option<Identity>) -> SessionSnapshot {
        SessionSnapshot {
            identity,
            lifecycle_state: state,
        }
    }

    #[test]
    fn test_pending_states_never_redirect() {
        let guard = RouteGuard::dashboard();
        for state in [LifecycleState::Uninitialized, LifecycleState::Restoring] {
            for location in ["/", "/quality", "/user", "/settings?tab=2"] {
                assert_eq!(
                    guard.evaluate(&snapshot(state, None), location),
                    GuardDecision::Loading
                );
            }
        }
    }

    #[test]
    fn test_unauthenticated_redirects_with_return_location() {
        let guard = RouteGuard::dashboard();
        let decision = guard.evaluate(
            &snapshot(LifecycleState::Unauthenticated, None),
            "/anomalies?zone=4",
        );
        assert_eq!(
            decision,
            GuardDecision::Redirect(Redirect {
                to: "/login".into(),
                return_to: Some("/anomalies?zone=4".into()),
            })
        );

        // The login page itself is public
        assert_eq!(
            guard.evaluate(&snapshot(LifecycleState::Unauthenticated, None), "/login"),
            GuardDecision::Render
        );
    }

    #[test]
    fn test_role_prefixes() {
        let guard = RouteGuard::dashboard();
        assert_eq!(guard.required_role("/"), Some(Role::Admin));
        assert_eq!(guard.required_role("/user"), Some(Role::User));
        assert_eq!(guard.required_role("/user/reports?id=3"), Some(Role::User));
        assert_eq!(guard.required_role("/users"), Some(Role::Admin));
        assert_eq!(RouteGuard::new("/login").required_role("/quality"), None);

        let signed_in = snapshot(LifecycleState::Authenticated, Some(portal()));
        assert_eq!(guard.evaluate(&signed_in, "/user"), GuardDecision::Render);
        assert_eq!(
            guard.evaluate(&signed_in, "/analytics"),
            GuardDecision::Redirect(Redirect {
                to: "/user".into(),
                return_to: None,
            })
        );

        let admin_in = snapshot(LifecycleState::Authenticated, Some(admin()));
        assert_eq!(guard.evaluate(&admin_in, "/upload"), GuardDecision::Render);
        assert!(guard.evaluate(&admin_in, "/user/profile").is_redirect());
    }

    #[test]
    fn test_post_login_destination() {
        let guard = RouteGuard::dashboard();
        assert_eq!(
            guard.post_login_destination(Some("/analytics"), Role::Admin),
            "/analytics"
        );
        assert_eq!(guard.post_login_destination(None, Role::Admin), "/");
        assert_eq!(
            guard.post_login_destination(Some("/analytics"), Role::User),
            "/user"
        );
        assert_eq!(
            guard.post_login_destination(Some("/login"), Role::Admin),
            "/"
        );
        assert_eq!(
            guard.post_login_destination(Some("//evil.example"), Role::Admin),
            "/"
        );
    }

    #[tokio::test]
    async fn test_watch_redirects_once_per_transition() {
        let (tx, rx) = watch::channel(snapshot(LifecycleState::Restoring, None));
        let guard = RouteGuard::dashboard();
        let mut view = guard.watch(rx, "/quality");
        assert_eq!(view.current(), &GuardDecision::Loading);

        tx.send_replace(snapshot(LifecycleState::Authenticated, Some(admin())));
        assert_eq!(view.changed().await, Some(GuardDecision::Render));

        // Background refresh failure
        tx.send_replace(snapshot(LifecycleState::Unauthenticated, None));
        let redirect = view.changed().await.unwrap();
        assert!(redirect.is_redirect());

        // Same decision again produces nothing new
        tx.send_replace(snapshot(LifecycleState::Unauthenticated, None));
        let quiet = tokio::time::timeout(Duration::from_millis(50), view.changed()).await;
        assert!(quiet.is_err());

        tx.send_replace(snapshot(LifecycleState::Authenticated, Some(admin())));
        assert_eq!(view.changed().await, Some(GuardDecision::Render));

        // Following the redirect lands on the public login page
        tx.send_replace(snapshot(LifecycleState::Unauthenticated, None));
        assert!(view.changed().await.unwrap().is_redirect());
        assert_eq!(view.navigate("/login"), GuardDecision::Render);

        drop(tx);
        assert_eq!(view.changed().await, None);
    }
}
