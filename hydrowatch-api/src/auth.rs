//! Authentication endpoints
//!
//! [`AuthApi`] is the seam the session manager talks through; tests swap in a
//! scripted implementation, production uses [`HttpAuthApi`].

use async_trait::async_trait;
use hydrowatch_core::HydroResult;
use tracing::{debug, info};

use crate::client::{
    create_http_client, decode_json, handle_response_error, transport_error, ApiClientConfig,
};
use crate::types::{
    AdminUser, LoginRequest, PortalLoginRequest, PortalUser, ProfileUpdate, RefreshRequest,
    RefreshResponse, RegisterRequest, TokenResponse,
};

/// Remote authentication operations consumed by the session manager
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /api/auth/login`
    async fn login(&self, email: &str, password: &str) -> HydroResult<TokenResponse<AdminUser>>;

    /// `GET /api/auth/me`
    async fn me(&self, access_token: &str) -> HydroResult<AdminUser>;

    /// `POST /api/auth/refresh`
    async fn refresh(&self, refresh_token: &str) -> HydroResult<RefreshResponse>;

    /// `POST /api/auth/logout`
    async fn logout(&self, access_token: &str) -> HydroResult<()>;

    /// `POST /api/users/login`
    async fn portal_login(&self, unique_id: &str) -> HydroResult<TokenResponse<PortalUser>>;

    /// `POST /api/auth/register`
    async fn register(&self, request: &RegisterRequest) -> HydroResult<TokenResponse<AdminUser>>;

    /// `PUT /api/auth/profile`
    async fn update_profile(
        &self,
        access_token: &str,
        update: &ProfileUpdate,
    ) -> HydroResult<AdminUser>;
}

/// reqwest-backed client for the dashboard backend
pub struct HttpAuthApi {
    pub(crate) client: reqwest::Client,
    pub(crate) config: ApiClientConfig,
}

impl HttpAuthApi {
    /// Create a new API client
    pub fn new(config: ApiClientConfig) -> HydroResult<Self> {
        let client = create_http_client(&config)?;

        info!("Created dashboard API client for {}", config.base_url);

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    /// Send a request and turn non-2xx statuses into `HydroError::Api`
    pub(crate) async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> HydroResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, operation))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, operation).await);
        }

        Ok(response)
    }

    pub(crate) fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let url = self.config.endpoint(path);
        debug!("GET {}", url);
        self.client.get(url)
    }

    pub(crate) fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = self.config.endpoint(path);
        debug!("POST {}", url);
        self.client.post(url)
    }

    pub(crate) fn put(&self, path: &str) -> reqwest::RequestBuilder {
        let url = self.config.endpoint(path);
        debug!("PUT {}", url);
        self.client.put(url)
    }

    pub(crate) fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        let url = self.config.endpoint(path);
        debug!("DELETE {}", url);
        self.client.delete(url)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> HydroResult<TokenResponse<AdminUser>> {
        let request = self
            .post("/api/auth/login")
            .json(&LoginRequest { email, password });
        let response = self.send(request, "login").await?;
        decode_json(response, "login").await
    }

    async fn me(&self, access_token: &str) -> HydroResult<AdminUser> {
        let request = self.get("/api/auth/me").bearer_auth(access_token);
        let response = self.send(request, "me").await?;
        decode_json(response, "me").await
    }

    async fn refresh(&self, refresh_token: &str) -> HydroResult<RefreshResponse> {
        let request = self
            .post("/api/auth/refresh")
            .json(&RefreshRequest { refresh_token });
        let response = self.send(request, "refresh").await?;
        decode_json(response, "refresh").await
    }

    async fn logout(&self, access_token: &str) -> HydroResult<()> {
        let request = self.post("/api/auth/logout").bearer_auth(access_token);
        let response = self.send(request, "logout").await?;
        debug!("Remote logout answered {}", response.status());
        Ok(())
    }

    async fn portal_login(&self, unique_id: &str) -> HydroResult<TokenResponse<PortalUser>> {
        let request = self
            .post("/api/users/login")
            .json(&PortalLoginRequest { unique_id });
        let response = self.send(request, "portal_login").await?;
        decode_json(response, "portal_login").await
    }

    async fn register(&self, request: &RegisterRequest) -> HydroResult<TokenResponse<AdminUser>> {
        let request = self.post("/api/auth/register").json(request);
        let response = self.send(request, "register").await?;
        decode_json(response, "register").await
    }

    async fn update_profile(
        &self,
        access_token: &str,
        update: &ProfileUpdate,
    ) -> HydroResult<AdminUser> {
        let request = self
            .put("/api/auth/profile")
            .bearer_auth(access_token)
            .json(update);
        let response = self.send(request, "update_profile").await?;
        decode_json(response, "update_profile").await
    }
}
