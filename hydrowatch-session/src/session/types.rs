//! Session Types and Structures

use crate::auth::{Identity, Role};
use hydrowatch_api::PortalUser;
use hydrowatch_core::{storage_error, HydroResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage keys of the persisted record
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_ROLE_KEY: &str = "user_role";
pub const PORTAL_USER_KEY: &str = "portal_user";

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Process just started; nothing consulted yet
    Uninitialized,
    /// Persisted record being validated
    Restoring,
    Authenticated,
    Unauthenticated,
}

impl LifecycleState {
    /// Still resolving; views should show a placeholder
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            LifecycleState::Uninitialized | LifecycleState::Restoring
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Restoring => "restoring",
            LifecycleState::Authenticated => "authenticated",
            LifecycleState::Unauthenticated => "unauthenticated",
        };
        f.write_str(label)
    }
}

/// Bearer token pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens stay out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Read-only view handed to the rest of the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub lifecycle_state: LifecycleState,
}

impl SessionSnapshot {
    pub fn uninitialized() -> Self {
        Self {
            identity: None,
            lifecycle_state: LifecycleState::Uninitialized,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.lifecycle_state == LifecycleState::Authenticated
    }

    pub fn role(&self) -> Option<Role> {
        self.identity.as_ref().map(Identity::role)
    }
}

/// Durable form of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub credentials: Credentials,
    pub role: Role,
    /// Only for portal users, which have no "who am I" endpoint
    pub portal_user: Option<PortalUser>,
}

impl PersistedRecord {
    pub fn from_identity(identity: &Identity, credentials: &Credentials) -> Self {
        Self {
            credentials: credentials.clone(),
            role: identity.role(),
            portal_user: identity.as_portal_user().cloned(),
        }
    }

    /// Portal identity restorable without a network call
    pub fn portal_identity(&self) -> Option<Identity> {
        match self.role {
            Role::User => self.portal_user.clone().map(Identity::PortalUser),
            Role::Admin => None,
        }
    }

    /// Flatten into the four storage keys
    pub fn to_entries(&self) -> HydroResult<BTreeMap<String, String>> {
        let mut entries = BTreeMap::new();
        entries.insert(
            ACCESS_TOKEN_KEY.to_string(),
            self.credentials.access_token.clone(),
        );
        entries.insert(
            REFRESH_TOKEN_KEY.to_string(),
            self.credentials.refresh_token.clone(),
        );
        entries.insert(USER_ROLE_KEY.to_string(), self.role.as_str().to_string());
        if let Some(user) = &self.portal_user {
            entries.insert(PORTAL_USER_KEY.to_string(), serde_json::to_string(user)?);
        }
        Ok(entries)
    }

    /// Rebuild from storage keys; `None` when no session is stored
    pub fn from_entries(entries: &BTreeMap<String, String>) -> HydroResult<Option<Self>> {
        let access_token = match entries.get(ACCESS_TOKEN_KEY) {
            Some(token) if !token.is_empty() => token.clone(),
            _ => return Ok(None),
        };

        let refresh_token = entries
            .get(REFRESH_TOKEN_KEY)
            .cloned()
            .unwrap_or_default();

        // Records written before roles existed belong to administrators
        let role = match entries.get(USER_ROLE_KEY) {
            Some(raw) => raw
                .parse::<Role>()
                .map_err(|e| storage_error!(e, "persisted_record"))?,
            None => Role::Admin,
        };

        let portal_user = match entries.get(PORTAL_USER_KEY) {
            Some(raw) if role == Role::User => Some(serde_json::from_str(raw)?),
            _ => None,
        };

        Ok(Some(Self {
            credentials: Credentials {
                access_token,
                refresh_token,
            },
            role,
            portal_user,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal_user() -> PortalUser {
        PortalUser {
            id: "p-1".into(),
            unique_id: "WU-2024-001".into(),
            full_name: "Test User".into(),
            area: None,
            email: None,
            phone: Some("0771234567".into()),
            is_active: Some(true),
        }
    }

    #[test]
    fn test_portal_record_keys() {
        let identity = Identity::PortalUser(portal_user());
        let record = PersistedRecord::from_identity(&identity, &Credentials::new("a", "b"));
        let entries = record.to_entries().unwrap();

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[USER_ROLE_KEY], "user");
        assert_eq!(entries[ACCESS_TOKEN_KEY], "a");

        let restored = PersistedRecord::from_entries(&entries).unwrap().unwrap();
        assert_eq!(restored.portal_identity(), Some(identity));
    }

    #[test]
    fn test_admin_record_has_no_snapshot() {
        let identity = Identity::Admin(hydrowatch_api::AdminUser {
            id: "a-1".into(),
            email: "admin@water.org".into(),
            full_name: None,
            avatar_url: None,
        });
        let record = PersistedRecord::from_identity(&identity, &Credentials::new("a", "b"));
        let entries = record.to_entries().unwrap();

        assert_eq!(entries.len(), 3);
        assert!(!entries.contains_key(PORTAL_USER_KEY));
        assert_eq!(record.portal_identity(), None);
    }

    #[test]
    fn test_missing_or_legacy_entries() {
        assert!(PersistedRecord::from_entries(&BTreeMap::new())
            .unwrap()
            .is_none());

        let mut legacy = BTreeMap::new();
        legacy.insert(ACCESS_TOKEN_KEY.to_string(), "a".to_string());
        legacy.insert(REFRESH_TOKEN_KEY.to_string(), "b".to_string());
        let record = PersistedRecord::from_entries(&legacy).unwrap().unwrap();
        assert_eq!(record.role, Role::Admin);

        legacy.insert(USER_ROLE_KEY.to_string(), "superuser".to_string());
        assert!(PersistedRecord::from_entries(&legacy).is_err());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let debug = format!("{:?}", Credentials::new("secret-access", "secret-refresh"));
        assert!(!debug.contains("secret"));
    }
}
