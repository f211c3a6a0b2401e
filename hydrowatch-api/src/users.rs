//! Portal user management (administrator only)
//!
//! Every call takes the caller's access token; the session manager's
//! `authorized` wrapper supplies it and retries once after a token refresh.

use hydrowatch_core::HydroResult;

use crate::auth::HttpAuthApi;
use crate::client::decode_json;
use crate::types::{PortalUser, PortalUserCreate, PortalUserEnvelope, PortalUserList, PortalUserUpdate};

impl HttpAuthApi {
    /// `GET /api/users`
    pub async fn list_portal_users(&self, access_token: &str) -> HydroResult<Vec<PortalUser>> {
        let request = self.get("/api/users").bearer_auth(access_token);
        let response = self.send(request, "list_portal_users").await?;
        let list: PortalUserList = decode_json(response, "list_portal_users").await?;
        Ok(list.users)
    }

    /// `GET /api/users/{id}`
    pub async fn get_portal_user(&self, access_token: &str, id: &str) -> HydroResult<PortalUser> {
        let path = format!("/api/users/{}", urlencoding::encode(id));
        let request = self.get(&path).bearer_auth(access_token);
        let response = self.send(request, "get_portal_user").await?;
        let envelope: PortalUserEnvelope = decode_json(response, "get_portal_user").await?;
        Ok(envelope.user)
    }

    /// `POST /api/users/register`
    pub async fn create_portal_user(
        &self,
        access_token: &str,
        user: &PortalUserCreate,
    ) -> HydroResult<PortalUser> {
        let request = self
            .post("/api/users/register")
            .bearer_auth(access_token)
            .json(user);
        let response = self.send(request, "create_portal_user").await?;
        let envelope: PortalUserEnvelope = decode_json(response, "create_portal_user").await?;
        Ok(envelope.user)
    }

    /// `PUT /api/users/{id}`
    pub async fn update_portal_user(
        &self,
        access_token: &str,
        id: &str,
        update: &PortalUserUpdate,
    ) -> HydroResult<PortalUser> {
        let path = format!("/api/users/{}", urlencoding::encode(id));
        let request = self.put(&path).bearer_auth(access_token).json(update);
        let response = self.send(request, "update_portal_user").await?;
        let envelope: PortalUserEnvelope = decode_json(response, "update_portal_user").await?;
        Ok(envelope.user)
    }

    /// `DELETE /api/users/{id}`
    pub async fn delete_portal_user(&self, access_token: &str, id: &str) -> HydroResult<()> {
        let path = format!("/api/users/{}", urlencoding::encode(id));
        let request = self.delete(&path).bearer_auth(access_token);
        self.send(request, "delete_portal_user").await?;
        Ok(())
    }
}
