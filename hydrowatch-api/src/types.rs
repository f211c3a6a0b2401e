//! Request and response bodies exchanged with the backend

use serde::{Deserialize, Serialize};

/// Administrator account as returned by `/api/auth/login` and `/api/auth/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Portal user identified by a unique ID, without a password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalUser {
    #[serde(default)]
    pub id: String,
    pub unique_id: String,
    #[serde(default)]
    pub full_name: String,
    /// Service area; the backend names this field `address`
    #[serde(default, alias = "address", skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Token pair plus the principal it was issued for
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse<U> {
    pub access_token: String,
    pub refresh_token: String,
    pub user: U,
}

/// `/api/auth/refresh` reply; the user payload is optional and role-dependent
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortalLoginRequest<'a> {
    pub unique_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Administrator self-registration
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

/// Editable fields of the administrator profile
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Admin-side creation of a portal user
#[derive(Debug, Clone, Serialize)]
pub struct PortalUserCreate {
    pub unique_id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(rename = "address")]
    pub area: Option<String>,
}

/// Partial update of a portal user
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortalUserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "address", skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// FastAPI-style error body
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    /// Flatten `detail`, which is a string for HTTPException and a list for validation errors
    pub(crate) fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .map(str::to_string)
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PortalUserList {
    #[serde(default)]
    pub users: Vec<PortalUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PortalUserEnvelope {
    pub user: PortalUser,
}
