//! Scripted backend shared by the session manager tests

#![allow(dead_code)]

use async_trait::async_trait;
use hydrowatch_api::{
    AdminUser, AuthApi, PortalUser, ProfileUpdate, RefreshResponse, RegisterRequest, TokenResponse,
};
use hydrowatch_core::{ErrorContext, HydroError, HydroResult};
use hydrowatch_session::{
    Credentials, Identity, KeyValueStore, ManagerOptions, MemoryStore, PersistedRecord, Role,
    SessionManager, SessionStorage,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reply
#[derive(Clone)]
pub enum Reply<T> {
    Ok(T),
    /// Non-2xx status with a `detail` message
    Status(u16, &'static str),
    /// Transport failure
    Offline,
}

/// Replies for one endpoint, consumed in order; the last one served repeats
pub struct Script<T> {
    replies: Mutex<VecDeque<Reply<T>>>,
    last: Mutex<Option<Reply<T>>>,
    calls: AtomicUsize,
    delay_ms: AtomicU64,
    seen: Mutex<Vec<String>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(&self, reply: Reply<T>) -> &Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn delay(&self, ms: u64) -> &Self {
        self.delay_ms.store(ms, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Token or identifier each call was made with
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    async fn next(&self, operation: &str, argument: &str) -> HydroResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(argument.to_string());

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let reply = {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.replies.lock().unwrap().pop_front() {
                *last = Some(next);
            }
            last.clone()
        };

        match reply {
            Some(Reply::Ok(value)) => Ok(value),
            Some(Reply::Status(status, detail)) => Err(HydroError::Api {
                status,
                detail: detail.to_string(),
                context: ErrorContext::new("scripted_api").with_operation(operation),
            }),
            Some(Reply::Offline) | None => Err(HydroError::Network {
                message: "connection refused".to_string(),
                source: None,
                context: ErrorContext::new("scripted_api").with_operation(operation),
            }),
        }
    }
}

/// In-process stand-in for the dashboard backend
pub struct ScriptedApi {
    pub login: Script<TokenResponse<AdminUser>>,
    pub me: Script<AdminUser>,
    pub refresh: Script<RefreshResponse>,
    pub logout: Script<()>,
    pub portal_login: Script<TokenResponse<PortalUser>>,
    pub register: Script<TokenResponse<AdminUser>>,
    pub update_profile: Script<AdminUser>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        let api = Self {
            login: Script::new(),
            me: Script::new(),
            refresh: Script::new(),
            logout: Script::new(),
            portal_login: Script::new(),
            register: Script::new(),
            update_profile: Script::new(),
        };
        *api.logout.last.lock().unwrap() = Some(Reply::Ok(()));
        Arc::new(api)
    }

    pub fn total_calls(&self) -> usize {
        self.login.calls()
            + self.me.calls()
            + self.refresh.calls()
            + self.logout.calls()
            + self.portal_login.calls()
            + self.register.calls()
            + self.update_profile.calls()
    }
}

#[async_trait]
impl AuthApi for ScriptedApi {
    async fn login(&self, email: &str, _password: &str) -> HydroResult<TokenResponse<AdminUser>> {
        self.login.next("login", email).await
    }

    async fn me(&self, access_token: &str) -> HydroResult<AdminUser> {
        self.me.next("me", access_token).await
    }

    async fn refresh(&self, refresh_token: &str) -> HydroResult<RefreshResponse> {
        self.refresh.next("refresh", refresh_token).await
    }

    async fn logout(&self, access_token: &str) -> HydroResult<()> {
        self.logout.next("logout", access_token).await
    }

    async fn portal_login(&self, unique_id: &str) -> HydroResult<TokenResponse<PortalUser>> {
        self.portal_login.next("portal_login", unique_id).await
    }

    async fn register(&self, request: &RegisterRequest) -> HydroResult<TokenResponse<AdminUser>> {
        self.register.next("register", &request.email).await
    }

    async fn update_profile(
        &self,
        access_token: &str,
        update: &ProfileUpdate,
    ) -> HydroResult<AdminUser> {
        let mut user = self
            .update_profile
            .next("update_profile", access_token)
            .await?;
        if let Some(name) = &update.full_name {
            user.full_name = Some(name.clone());
        }
        Ok(user)
    }
}

pub fn admin_user() -> AdminUser {
    AdminUser {
        id: "a-1".to_string(),
        email: "admin@water.org".to_string(),
        full_name: Some("Plant Admin".to_string()),
        avatar_url: None,
    }
}

pub fn portal_user() -> PortalUser {
    PortalUser {
        id: "p-1".to_string(),
        unique_id: "WU-2024-001".to_string(),
        full_name: "Test User".to_string(),
        area: Some("Zone 4".to_string()),
        email: None,
        phone: None,
        is_active: Some(true),
    }
}

pub fn tokens<U>(access: &str, refresh: &str, user: U) -> TokenResponse<U> {
    TokenResponse {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        user,
    }
}

pub fn refreshed(access: &str, refresh: &str, user: Option<serde_json::Value>) -> RefreshResponse {
    RefreshResponse {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        user,
    }
}

pub fn options() -> ManagerOptions {
    ManagerOptions {
        network_timeout_ms: 500,
    }
}

pub fn manager(api: &Arc<ScriptedApi>, store: &Arc<MemoryStore>) -> SessionManager {
    SessionManager::new(api.clone(), store.clone(), options())
}

/// Pretend a previous process left a session behind
pub fn seed(store: &Arc<MemoryStore>, identity: &Identity, access: &str, refresh: &str) {
    let store: Arc<dyn KeyValueStore> = store.clone();
    SessionStorage::new(store)
        .save(&PersistedRecord::from_identity(
            identity,
            &Credentials::new(access, refresh),
        ))
        .unwrap();
}

pub fn seed_admin(store: &Arc<MemoryStore>) {
    seed(store, &Identity::Admin(admin_user()), "stored-access", "stored-refresh");
}

pub fn stored_role(store: &MemoryStore) -> Option<Role> {
    store
        .entries()
        .get("user_role")
        .and_then(|raw| raw.parse().ok())
}
