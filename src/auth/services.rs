use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::auth::dto::{
    AuthContext, AuthSession, AuthUser, LoginRequest, ProfileUpdate, RefreshRequest, RegisterOutcome, SessionState,
    UserProfile,
};
use crate::auth::repo::rfc3339_ms;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::gateway::{ApiBody, RestClient};
use crate::images::services::{cleanup_replaced_image, discard_image, upload_image};
use crate::kv::KeyValueStore;
use crate::state::AppState;

pub const SESSION_KEY: &str = "sleepdex.auth.session";
pub const REMEMBERED_EMAIL_KEY: &str = "sleepdex.auth.remembered_email";
const MIN_PASSWORD_LEN: usize = 6;
const MAX_DISPLAY_NAME_LEN: usize = 40;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

struct SessionInner {
    rest: RestClient,
    durable: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: RwLock<SessionState>,
}

/// Owns the signed-in session and its profile.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(rest: RestClient, durable: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                rest,
                durable,
                clock,
                state: RwLock::new(SessionState::Uninitialized),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner
            .state
            .read()
            .map(|s| s.clone())
            .unwrap_or(SessionState::Anonymous)
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.inner.state.write() {
            *state = next;
        }
    }

    pub fn profile(&self) -> Option<UserProfile> {
        match self.state() {
            SessionState::Authenticated { profile, .. } => profile,
            _ => None,
        }
    }

    /// Credentials of the signed-in user.
    pub fn context(&self) -> Result<AuthContext> {
        match self.state() {
            SessionState::Authenticated { session, profile } => Ok(AuthContext {
                access_token: session.access_token,
                user_id: session.user.id,
                is_admin: profile.is_some_and(|p| p.is_admin),
            }),
            _ => Err(Error::NotAuthenticated),
        }
    }

    pub fn admin_context(&self) -> Result<AuthContext> {
        let ctx = self.context()?;
        if !ctx.is_admin {
            return Err(Error::Forbidden);
        }
        Ok(ctx)
    }

    fn stored_session(&self) -> Option<AuthSession> {
        let raw = match self.inner.durable.get(SESSION_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "stored session unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "discarding malformed stored session");
                self.clear_stored_session();
                None
            }
        }
    }

    fn store_session(&self, session: &AuthSession) {
        let stored = serde_json::to_string(session)
            .map_err(Error::from)
            .and_then(|raw| self.inner.durable.set(SESSION_KEY, &raw));
        if let Err(e) = stored {
            warn!(error = %e, "session not persisted");
        }
    }

    fn clear_stored_session(&self) {
        if let Err(e) = self.inner.durable.remove(SESSION_KEY) {
            warn!(error = %e, "stored session not cleared");
        }
    }

    async fn auth_call<B: Serialize>(&self, path: &str, grant: Option<&str>, body: &B) -> Result<Value> {
        let mut req = self.inner.rest.request(Method::POST, path, None)?;
        if let Some(grant) = grant {
            req.query.push(("grant_type".into(), grant.into()));
        }
        req.body = ApiBody::Json(serde_json::to_value(body)?);
        let resp = self.inner.rest.send(req).await?;
        if !resp.is_success() {
            return Err(self.inner.rest.failure(&resp, false));
        }
        Ok(resp.json_value())
    }

    async fn current_user(&self, token: &str) -> Result<AuthUser> {
        let req = self.inner.rest.request(Method::GET, "/auth/user", Some(token))?;
        let resp = self.inner.rest.send(req).await?;
        if !resp.is_success() {
            return Err(self.inner.rest.failure(&resp, false));
        }
        AuthUser::from_value(&resp.json_value()).ok_or_else(|| Error::backend(resp.status, "malformed user payload"))
    }

    async fn refresh(&self, session: &AuthSession) -> Result<AuthSession> {
        let body = self
            .auth_call(
                "/auth/token",
                Some("refresh_token"),
                &RefreshRequest {
                    refresh_token: session.refresh_token.clone(),
                },
            )
            .await?;
        AuthSession::from_token_response(&body, self.inner.clock.now_ms())
            .ok_or_else(|| Error::backend(200, "token refresh returned no session"))
    }

    /// Profile for `session`; a failure here does not sign the user out.
    async fn establish(&self, session: AuthSession) -> SessionState {
        self.store_session(&session);
        let profile = match UserProfile::ensure(
            &self.inner.rest,
            &session.user,
            &session.access_token,
            self.inner.clock.now_ms(),
        )
        .await
        {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "profile unavailable");
                None
            }
        };
        let state = SessionState::Authenticated { session, profile };
        self.set_state(state.clone());
        state
    }

    fn settle_anonymous(&self) -> SessionState {
        self.clear_stored_session();
        self.set_state(SessionState::Anonymous);
        SessionState::Anonymous
    }

    /// Restores the stored session, once. Later calls return the settled state.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> SessionState {
        let current = self.state();
        if current != SessionState::Uninitialized {
            return current;
        }
        if !self.inner.rest.is_configured() {
            debug!("backend not configured; stored session kept for later");
            self.set_state(SessionState::Anonymous);
            return SessionState::Anonymous;
        }
        let Some(mut session) = self.stored_session() else {
            self.set_state(SessionState::Anonymous);
            return SessionState::Anonymous;
        };

        if session.is_expired_at(self.inner.clock.now_ms()) {
            if session.refresh_token.is_empty() {
                debug!("stored session expired without refresh token");
                return self.settle_anonymous();
            }
            match self.refresh(&session).await {
                Ok(renewed) => {
                    debug!("stored session renewed");
                    session = renewed;
                }
                Err(e) => {
                    warn!(error = %e, "session refresh failed");
                    return self.settle_anonymous();
                }
            }
        }

        match self.current_user(&session.access_token).await {
            Ok(user) => {
                session.user = user;
                let state = self.establish(session).await;
                info!("session restored");
                state
            }
            Err(e) => {
                warn!(error = %e, "stored session rejected");
                self.settle_anonymous()
            }
        }
    }

    fn validate_credentials(email: &str, password: &str) -> Result<()> {
        if !is_valid_email(email) {
            return Err(Error::validation("invalid email"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = email.trim().to_lowercase();
        Self::validate_credentials(&email, password)?;
        let body = self
            .auth_call(
                "/auth/token",
                Some("password"),
                &LoginRequest {
                    email: email.clone(),
                    password: password.to_string(),
                },
            )
            .await?;
        let session = AuthSession::from_token_response(&body, self.inner.clock.now_ms())
            .ok_or_else(|| Error::backend(200, "login returned no session"))?;
        self.remember_email(&email);
        self.establish(session.clone()).await;
        info!(user_id = %session.user.id, "signed in");
        Ok(session)
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, email: &str, password: &str) -> Result<RegisterOutcome> {
        let email = email.trim().to_lowercase();
        Self::validate_credentials(&email, password)?;
        let body = self
            .auth_call(
                "/auth/signup",
                None,
                &LoginRequest {
                    email: email.clone(),
                    password: password.to_string(),
                },
            )
            .await?;
        self.remember_email(&email);
        match AuthSession::from_token_response(&body, self.inner.clock.now_ms()) {
            Some(session) => {
                self.establish(session.clone()).await;
                info!(user_id = %session.user.id, "registered and signed in");
                Ok(RegisterOutcome::SignedIn(session))
            }
            None => {
                info!("registered; email confirmation pending");
                Ok(RegisterOutcome::ConfirmationRequired { email })
            }
        }
    }

    /// Remote sign-out is best effort; local state is always cleared.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let SessionState::Authenticated { session, .. } = self.state() {
            let remote = async {
                let req = self
                    .inner
                    .rest
                    .request(Method::POST, "/auth/logout", Some(&session.access_token))?;
                let resp = self.inner.rest.send(req).await?;
                if resp.is_success() {
                    Ok::<(), Error>(())
                } else {
                    Err(self.inner.rest.failure(&resp, false))
                }
            };
            if let Err(e) = remote.await {
                warn!(error = %e, "remote logout failed");
            }
        }
        self.settle_anonymous();
        info!("signed out");
    }

    /// Drops the local session after the backend reported it expired.
    pub fn handle_expired(&self) {
        if matches!(self.state(), SessionState::Authenticated { .. }) {
            warn!("session expired; sign in again");
            self.settle_anonymous();
        }
    }

    /// Listens for expiry broadcasts until the notifier is dropped.
    pub fn spawn_expiry_listener(&self) -> JoinHandle<()> {
        let mut rx = self.inner.rest.expiry().subscribe();
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => {
                        debug!(message = %signal.message, "expiry signal");
                        manager.handle_expired();
                    }
                    Err(RecvError::Lagged(_)) => manager.handle_expired(),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn remember_email(&self, email: &str) {
        if let Err(e) = self.inner.durable.set(REMEMBERED_EMAIL_KEY, &json!(email).to_string()) {
            warn!(error = %e, "remembered email not saved");
        }
    }

    pub fn remembered_email(&self) -> Option<String> {
        let raw = self.inner.durable.get(REMEMBERED_EMAIL_KEY).ok()??;
        serde_json::from_str(&raw).ok()
    }

    pub fn forget_email(&self) {
        if let Err(e) = self.inner.durable.remove(REMEMBERED_EMAIL_KEY) {
            warn!(error = %e, "remembered email not removed");
        }
    }

    fn replace_profile(&self, profile: UserProfile) {
        if let Ok(mut state) = self.inner.state.write() {
            if let SessionState::Authenticated { profile: current, .. } = &mut *state {
                *current = Some(profile);
            }
        }
    }
}

#[cfg(test)]
impl SessionManager {
    pub fn sign_in_for_test(&self, is_admin: bool) {
        let user = AuthUser {
            id: uuid::Uuid::nil(),
            email: Some("admin@sleepdex.test".into()),
        };
        let profile = UserProfile {
            id: user.id,
            display_name: Some("admin".into()),
            avatar_url: None,
            is_admin,
            created_at: None,
            updated_at: None,
        };
        self.set_state(SessionState::Authenticated {
            session: AuthSession {
                access_token: "admin-token".into(),
                refresh_token: "refresh".into(),
                expires_at: None,
                user,
            },
            profile: Some(profile),
        });
    }
}

/// Display name and/or avatar. A new avatar replaces the old blob.
#[instrument(skip(st, update))]
pub async fn update_profile(st: &AppState, update: ProfileUpdate) -> Result<UserProfile> {
    let display_name = match update.display_name.as_deref().map(str::trim) {
        Some("") => return Err(Error::validation("display name cannot be empty")),
        Some(name) if name.chars().count() > MAX_DISPLAY_NAME_LEN => {
            return Err(Error::validation(format!(
                "display name is limited to {} characters",
                MAX_DISPLAY_NAME_LEN
            )))
        }
        other => other.map(str::to_string),
    };
    let ctx = st.session.context()?;
    let previous = st.session.profile().and_then(|p| p.avatar_url);

    let avatar_url = match update.avatar {
        Some(upload) => Some(upload_image(st, &ctx, upload).await?),
        None => None,
    };

    let mut fields = Map::new();
    if let Some(name) = display_name {
        fields.insert("display_name".into(), json!(name));
    }
    if let Some(url) = &avatar_url {
        fields.insert("avatar_url".into(), json!(url));
    }
    if fields.is_empty() {
        return st
            .session
            .profile()
            .ok_or_else(|| Error::NotFound("profile".into()));
    }
    let now = rfc3339_ms(st.clock.now_ms());
    fields.insert("updated_at".into(), json!(now));

    let profile = match UserProfile::update(&st.rest, ctx.user_id, Value::Object(fields), &ctx.access_token).await {
        Ok(p) => p,
        Err(e) => {
            if let Some(url) = &avatar_url {
                discard_image(st, &ctx, url).await;
            }
            return Err(e);
        }
    };
    if avatar_url.is_some() {
        cleanup_replaced_image(st, &ctx, previous.as_deref(), avatar_url.as_deref()).await;
    }
    st.session.replace_profile(profile.clone());
    info!("profile updated");
    Ok(profile)
}
