//! Session Manager - authentication lifecycle
//!
//! Owns the signed-in identity and its tokens, mediates every credential
//! issuance and renewal, and keeps the persisted record in step with memory.
//!
//! All mutations happen under one async lock. Network legs run outside the
//! lock; before committing their result, operations compare the generation
//! they started from so a stale completion cannot resurrect a cleared session.

use super::storage::{FileStore, KeyValueStore, SessionStorage};
use super::types::{Credentials, LifecycleState, PersistedRecord, SessionSnapshot};
use crate::auth::{Identity, Role};
use crate::{AuthError, AuthResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use hydrowatch_api::{
    AdminUser, ApiClientConfig, AuthApi, HttpAuthApi, PortalUser, ProfileUpdate, RegisterRequest,
    TokenResponse,
};
use hydrowatch_core::{
    log_operation_error, log_operation_start, log_operation_success, try_with_timeout,
    validation_error, HydroConfig, HydroError, HydroResult,
};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Tuning knobs for the session manager
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Upper bound for every network leg (restore, refresh, sign-in, logout)
    pub network_timeout_ms: u64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            network_timeout_ms: 10_000,
        }
    }
}

impl From<&HydroConfig> for ManagerOptions {
    fn from(config: &HydroConfig) -> Self {
        Self {
            network_timeout_ms: config.session.restore_timeout_ms,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveSession {
    identity: Identity,
    credentials: Credentials,
}

impl ActiveSession {
    fn admin(tokens: TokenResponse<AdminUser>) -> Self {
        Self {
            identity: Identity::Admin(tokens.user),
            credentials: Credentials::new(tokens.access_token, tokens.refresh_token),
        }
    }

    fn portal(tokens: TokenResponse<PortalUser>) -> Self {
        Self {
            identity: Identity::PortalUser(tokens.user),
            credentials: Credentials::new(tokens.access_token, tokens.refresh_token),
        }
    }
}

/// Credentials exist only inside `Authenticated`
enum SessionPhase {
    Uninitialized,
    Restoring,
    Authenticated(ActiveSession),
    Unauthenticated,
}

impl SessionPhase {
    fn lifecycle(&self) -> LifecycleState {
        match self {
            SessionPhase::Uninitialized => LifecycleState::Uninitialized,
            SessionPhase::Restoring => LifecycleState::Restoring,
            SessionPhase::Authenticated(_) => LifecycleState::Authenticated,
            SessionPhase::Unauthenticated => LifecycleState::Unauthenticated,
        }
    }

    fn active(&self) -> Option<&ActiveSession> {
        match self {
            SessionPhase::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

struct SessionState {
    phase: SessionPhase,
    /// Bumped whenever the principal changes (sign-in, restore, clear)
    generation: u64,
    /// Bumped by every logout; sign-ins started before it are discarded
    logouts: u64,
}

type RefreshFlight = Shared<BoxFuture<'static, bool>>;

struct Inner {
    api: Arc<dyn AuthApi>,
    storage: SessionStorage,
    options: ManagerOptions,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    restored: OnceCell<()>,
    refresh_flight: StdMutex<Option<RefreshFlight>>,
    last_error: StdMutex<Option<String>>,
}

/// Handle to the process-wide session; cheap to clone
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a session manager over the given transport and store
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn KeyValueStore>,
        options: ManagerOptions,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::uninitialized());

        Self {
            inner: Arc::new(Inner {
                api,
                storage: SessionStorage::new(store),
                options,
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Uninitialized,
                    generation: 0,
                    logouts: 0,
                }),
                snapshot_tx,
                restored: OnceCell::new(),
                refresh_flight: StdMutex::new(None),
                last_error: StdMutex::new(None),
            }),
        }
    }

    /// Production wiring: HTTP transport plus the file store from configuration
    pub fn with_http(config: &HydroConfig) -> HydroResult<(Self, Arc<HttpAuthApi>)> {
        let api = Arc::new(HttpAuthApi::new(ApiClientConfig::from(&config.api))?);
        let path = config.session.resolved_storage_path();
        info!("Session file: {}", path.display());

        let manager = Self::new(
            api.clone(),
            Arc::new(FileStore::new(path)),
            ManagerOptions::from(config),
        );
        Ok((manager, api))
    }

    /// Restore the persisted session; runs once, concurrent callers share it
    pub async fn initialize(&self) -> LifecycleState {
        self.inner
            .restored
            .get_or_init(|| self.inner.restore())
            .await;
        self.snapshot().lifecycle_state
    }

    /// Current identity and lifecycle state; never touches the network
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Observe every state transition
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Most recent sign-in failure, as shown on the login form
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error()
    }

    pub fn clear_error(&self) {
        self.inner.set_last_error(None);
    }

    /// Administrator sign-in
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<Identity> {
        log_operation_start!("login", email = %email);

        if email.trim().is_empty() || password.is_empty() {
            return Err(self
                .inner
                .reject("Please fill in all fields".to_string()));
        }

        let api = self.inner.api.clone();
        let email = email.trim();
        self.inner
            .sign_in("login", "Login failed", async move {
                let tokens = api.login(email, password).await?;
                Ok(ActiveSession::admin(tokens))
            })
            .await
    }

    /// Portal sign-in by unique ID only
    pub async fn portal_login(&self, unique_id: &str) -> AuthResult<Identity> {
        let unique_id = unique_id.trim();
        log_operation_start!("portal_login", unique_id = %unique_id);

        if unique_id.is_empty() {
            return Err(self
                .inner
                .reject("Please enter your Unique ID".to_string()));
        }

        let api = self.inner.api.clone();
        self.inner
            .sign_in("portal_login", "Login failed", async move {
                let tokens = api.portal_login(unique_id).await?;
                Ok(ActiveSession::portal(tokens))
            })
            .await
    }

    /// Administrator self-registration; signs in on success
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> AuthResult<Identity> {
        log_operation_start!("register", email = %email);

        if email.trim().is_empty() || password.is_empty() {
            return Err(self
                .inner
                .reject("Please fill in all fields".to_string()));
        }

        let request = RegisterRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            full_name: full_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        };
        let api = self.inner.api.clone();
        self.inner
            .sign_in("register", "Registration failed", async move {
                let tokens = api.register(&request).await?;
                Ok(ActiveSession::admin(tokens))
            })
            .await
    }

    /// Renew the token pair; failure clears the session
    ///
    /// Concurrent callers share a single network call and its outcome.
    pub async fn refresh(&self) -> bool {
        self.initialize().await;

        let flight = {
            let mut slot = self
                .inner
                .refresh_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let flight = async move {
                        let refreshed = inner.run_refresh().await;
                        inner
                            .refresh_flight
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .take();
                        refreshed
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Sign out; always ends `Unauthenticated`
    ///
    /// Fails only when the persisted record could not be removed, in which
    /// case the next process would find it again.
    pub async fn logout(&self) -> AuthResult<()> {
        log_operation_start!("logout");

        let access_token = {
            let mut state = self.inner.state.lock().await;
            state.logouts += 1;
            state.generation += 1;
            state
                .phase
                .active()
                .map(|session| session.credentials.access_token.clone())
        };

        if let Some(token) = access_token {
            let timeout = self.inner.options.network_timeout_ms;
            if let Err(e) = try_with_timeout(self.inner.api.logout(&token), timeout, "logout").await
            {
                debug!(error = %e, "Remote logout failed; clearing local session anyway");
            }
        }

        let mut state = self.inner.state.lock().await;
        let clear_failure = self.inner.invalidate(&mut state, "logout");
        self.inner.set_last_error(None);

        match clear_failure {
            Some(e) => {
                log_operation_error!("logout", e);
                Err(AuthError::Storage(e.to_string()))
            }
            None => {
                log_operation_success!("logout");
                Ok(())
            }
        }
    }

    /// Run an authenticated request
    ///
    /// `operation` receives the current access token. A 401 triggers one
    /// shared refresh and a single retry with the renewed token.
    pub async fn authorized<T, F, Fut>(&self, operation: F) -> AuthResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = HydroResult<T>>,
    {
        self.initialize().await;

        let token = self
            .inner
            .access_token()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        let error = match operation(token.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_unauthorized() => e,
            Err(e) => return Err(AuthError::from_request_failure(e)),
        };

        debug!(error = %error, "Access token rejected");

        // Another caller may already have renewed the token
        let renewed = match self.inner.access_token().await {
            Some(current) if current != token => Some(current),
            _ => {
                if self.refresh().await {
                    self.inner.access_token().await
                } else {
                    None
                }
            }
        };

        let token = renewed.ok_or(AuthError::SessionExpired)?;
        operation(token)
            .await
            .map_err(AuthError::from_request_failure)
    }

    /// Update the administrator profile and the in-memory identity
    pub async fn update_profile(&self, update: ProfileUpdate) -> AuthResult<Identity> {
        self.initialize().await;

        match self.snapshot().identity {
            Some(Identity::Admin(_)) => {}
            Some(Identity::PortalUser(_)) => {
                return Err(AuthError::NotPermitted(
                    "Profile editing is only available to administrators".to_string(),
                ))
            }
            None => return Err(AuthError::NotAuthenticated),
        }

        let api = self.inner.api.clone();
        let user = self
            .authorized(move |token| {
                let api = api.clone();
                let update = update.clone();
                async move { api.update_profile(&token, &update).await }
            })
            .await?;

        let identity = Identity::Admin(user);
        let mut state = self.inner.state.lock().await;
        let session = match state.phase.active() {
            Some(active) if active.identity.role() == Role::Admin => ActiveSession {
                identity: identity.clone(),
                credentials: active.credentials.clone(),
            },
            _ => return Err(AuthError::Superseded),
        };

        self.inner
            .commit(&mut state, session, false)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        log_operation_success!("update_profile");
        Ok(identity)
    }
}

impl Inner {
    fn publish(&self, state: &SessionState) {
        let snapshot = SessionSnapshot {
            identity: state.phase.active().map(|session| session.identity.clone()),
            lifecycle_state: state.phase.lifecycle(),
        };

        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    /// Persist first, then switch memory; a failed write leaves both untouched
    fn commit(
        &self,
        state: &mut SessionState,
        session: ActiveSession,
        new_principal: bool,
    ) -> HydroResult<()> {
        let record = PersistedRecord::from_identity(&session.identity, &session.credentials);
        self.storage.save(&record)?;

        state.phase = SessionPhase::Authenticated(session);
        if new_principal {
            state.generation += 1;
        }
        self.publish(state);
        Ok(())
    }

    /// Drop the session; returns the storage error if the record survived
    fn invalidate(&self, state: &mut SessionState, reason: &str) -> Option<HydroError> {
        let clear_failure = self.storage.clear().err();
        if let Some(e) = &clear_failure {
            e.log();
        }

        let was_authenticated = state.phase.active().is_some();
        state.phase = SessionPhase::Unauthenticated;
        state.generation += 1;
        self.publish(state);

        if was_authenticated {
            info!(reason = reason, "Session cleared");
        } else {
            debug!(reason = reason, "Session marked unauthenticated");
        }

        clear_failure
    }

    async fn access_token(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .phase
            .active()
            .map(|session| session.credentials.access_token.clone())
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_last_error(&self, message: Option<String>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = message;
    }

    /// Input rejected before any network call
    fn reject(&self, message: String) -> AuthError {
        self.set_last_error(Some(message.clone()));
        AuthError::InvalidCredentials(message)
    }

    async fn sign_in<F>(&self, operation: &str, fallback: &str, request: F) -> AuthResult<Identity>
    where
        F: Future<Output = HydroResult<ActiveSession>>,
    {
        let logouts = self.state.lock().await.logouts;

        let result = try_with_timeout(request, self.options.network_timeout_ms, operation).await;
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                let error = AuthError::from_sign_in_failure(e, fallback);
                log_operation_error!(operation, error);
                self.set_last_error(Some(error.to_string()));
                return Err(error);
            }
        };

        let mut state = self.state.lock().await;
        if state.logouts != logouts {
            warn!(operation = operation, "Discarding sign-in completed after logout");
            return Err(AuthError::Superseded);
        }

        let identity = session.identity.clone();
        if let Err(e) = self.commit(&mut state, session, true) {
            e.log();
            let error = AuthError::Storage(e.to_string());
            self.set_last_error(Some(error.to_string()));
            return Err(error);
        }

        self.set_last_error(None);
        log_operation_success!(operation, role = %identity.role());
        Ok(identity)
    }

    async fn restore(&self) {
        let generation = {
            let mut state = self.state.lock().await;
            // A cancelled earlier attempt may have left `Restoring` behind
            if !matches!(
                state.phase,
                SessionPhase::Uninitialized | SessionPhase::Restoring
            ) {
                debug!("Session already resolved; skipping restore");
                return;
            }
            state.phase = SessionPhase::Restoring;
            self.publish(&state);
            state.generation
        };

        log_operation_start!("restore_session");

        let outcome = match self.storage.load() {
            Ok(Some(record)) => self.validate_record(record).await,
            Ok(None) => None,
            Err(e) => {
                e.log();
                None
            }
        };

        let mut state = self.state.lock().await;
        if state.generation != generation || !matches!(state.phase, SessionPhase::Restoring) {
            debug!("Session changed while restoring; keeping the newer state");
            return;
        }

        match outcome {
            Some(session) => {
                let role = session.identity.role();
                match self.commit(&mut state, session, true) {
                    Ok(()) => {
                        log_operation_success!("restore_session", role = %role);
                    }
                    Err(e) => {
                        e.log();
                        self.invalidate(&mut state, "restore_persist_failed");
                    }
                }
            }
            None => {
                self.invalidate(&mut state, "no_valid_session");
            }
        }
    }

    /// Turn a persisted record into a live session, if it is still good
    async fn validate_record(&self, record: PersistedRecord) -> Option<ActiveSession> {
        match record.role {
            Role::User => match record.portal_identity() {
                Some(identity) => Some(ActiveSession {
                    identity,
                    credentials: record.credentials,
                }),
                None => {
                    warn!("Portal session without a user snapshot; discarding");
                    None
                }
            },
            Role::Admin => {
                let timeout = self.options.network_timeout_ms;
                let me = try_with_timeout(
                    self.api.me(&record.credentials.access_token),
                    timeout,
                    "restore_me",
                )
                .await;

                match me {
                    Ok(user) => Some(ActiveSession {
                        identity: Identity::Admin(user),
                        credentials: record.credentials,
                    }),
                    Err(e) => {
                        debug!(error = %e, "Stored access token not accepted; trying refresh");
                        match self
                            .exchange_refresh_token(
                                &record.credentials.refresh_token,
                                Role::Admin,
                                None,
                            )
                            .await
                        {
                            Ok(session) => Some(session),
                            Err(e) => {
                                log_operation_error!("restore_refresh", e);
                                None
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run_refresh(&self) -> bool {
        let (generation, refresh_token, previous) = {
            let state = self.state.lock().await;
            match state.phase.active() {
                Some(session) => (
                    state.generation,
                    session.credentials.refresh_token.clone(),
                    session.identity.clone(),
                ),
                None => {
                    debug!("No session to refresh");
                    return false;
                }
            }
        };

        log_operation_start!("refresh");
        let role = previous.role();
        let result = self
            .exchange_refresh_token(&refresh_token, role, Some(previous))
            .await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Discarding refresh result for a session that has moved on");
            return state.phase.active().is_some();
        }

        match result {
            Ok(session) => match self.commit(&mut state, session, false) {
                Ok(()) => {
                    log_operation_success!("refresh");
                    true
                }
                Err(e) => {
                    e.log();
                    self.invalidate(&mut state, "refresh_persist_failed");
                    false
                }
            },
            Err(e) => {
                log_operation_error!("refresh", e);
                self.invalidate(&mut state, "refresh_failed");
                false
            }
        }
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        role: Role,
        previous: Option<Identity>,
    ) -> HydroResult<ActiveSession> {
        if refresh_token.is_empty() {
            return Err(validation_error!(
                "No refresh token stored",
                "refresh_token",
                "session_manager"
            ));
        }

        let timeout = self.options.network_timeout_ms;
        let refreshed = try_with_timeout(self.api.refresh(refresh_token), timeout, "refresh").await?;
        let credentials = Credentials::new(refreshed.access_token, refreshed.refresh_token);

        let identity = match refreshed
            .user
            .and_then(|payload| Identity::from_payload(role, payload))
            .or(previous)
        {
            Some(identity) => identity,
            None if role == Role::Admin => {
                let user = try_with_timeout(
                    self.api.me(&credentials.access_token),
                    timeout,
                    "refresh_me",
                )
                .await?;
                Identity::Admin(user)
            }
            None => {
                return Err(validation_error!(
                    "Refresh reply carried no portal user",
                    "user",
                    "session_manager"
                ))
            }
        };

        Ok(ActiveSession {
            identity,
            credentials,
        })
    }
}
