//! Signed-in principal
//!
//! The backend returns two unrelated user shapes. They are kept apart as a
//! tagged union so callers match on the role instead of probing fields.

use hydrowatch_api::{AdminUser, PortalUser};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Role discriminant, stored verbatim under the `user_role` key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Dashboard administrator
    Admin,
    /// Portal user
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// Landing location after sign-in
    pub fn home_path(&self) -> &'static str {
        match self {
            Role::Admin => "/",
            Role::User => "/user",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(format!("Unknown user role: {}", s)),
        }
    }
}

/// Either an administrator or a portal user, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Identity {
    #[serde(rename = "admin")]
    Admin(AdminUser),
    #[serde(rename = "user")]
    PortalUser(PortalUser),
}

impl Identity {
    pub fn role(&self) -> Role {
        match self {
            Identity::Admin(_) => Role::Admin,
            Identity::PortalUser(_) => Role::User,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Identity::Admin(admin) => &admin.id,
            Identity::PortalUser(user) => &user.id,
        }
    }

    /// Name to greet the user with
    pub fn display_name(&self) -> String {
        match self {
            Identity::Admin(admin) => admin
                .full_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| admin.email.clone()),
            Identity::PortalUser(user) if !user.full_name.trim().is_empty() => {
                user.full_name.clone()
            }
            Identity::PortalUser(user) => user.unique_id.clone(),
        }
    }

    pub fn as_admin(&self) -> Option<&AdminUser> {
        match self {
            Identity::Admin(admin) => Some(admin),
            Identity::PortalUser(_) => None,
        }
    }

    pub fn as_portal_user(&self) -> Option<&PortalUser> {
        match self {
            Identity::PortalUser(user) => Some(user),
            Identity::Admin(_) => None,
        }
    }

    /// Decode a role-dependent `user` payload, e.g. from a refresh reply
    pub fn from_payload(role: Role, payload: serde_json::Value) -> Option<Self> {
        let decoded = match role {
            Role::Admin => serde_json::from_value(payload).map(Identity::Admin),
            Role::User => serde_json::from_value(payload).map(Identity::PortalUser),
        };
        match decoded {
            Ok(identity) => Some(identity),
            Err(e) => {
                debug!("Ignoring {} payload that does not decode: {}", role, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" USER ".parse::<Role>().unwrap(), Role::User);
        assert!("guest".parse::<Role>().is_err());
        assert_eq!(Role::User.to_string(), "user");
    }

    #[test]
    fn test_identity_serializes_with_role_tag() {
        let identity = Identity::PortalUser(PortalUser {
            id: "p-1".into(),
            unique_id: "WU-2024-001".into(),
            full_name: "Test User".into(),
            area: Some("Zone 4".into()),
            email: None,
            phone: None,
            is_active: None,
        });

        let value = serde_json::to_value(&identity).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["unique_id"], "WU-2024-001");
        assert_eq!(value["area"], "Zone 4");

        let back: Identity = serde_json::from_value(value).unwrap();
        assert_eq!(back, identity);
    }

    #[test]
    fn test_from_payload_respects_role() {
        let admin = Identity::from_payload(
            Role::Admin,
            json!({"id": "a-1", "email": "admin@water.org", "full_name": null}),
        )
        .unwrap();
        assert_eq!(admin.role(), Role::Admin);
        assert_eq!(admin.display_name(), "admin@water.org");

        // An admin-shaped payload has no unique_id, so it cannot become a portal identity
        assert!(Identity::from_payload(
            Role::User,
            json!({"id": "a-1", "email": "admin@water.org"})
        )
        .is_none());
    }
}
