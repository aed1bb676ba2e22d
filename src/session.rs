//! Session state and the session-store collaborator.
//!
//! The shipped store keeps the whole session in a signed cookie, so the
//! proxy itself stays stateless. The store trait is what the loader chain
//! and the flow handlers program against; a server-side KV store would slot
//! in behind the same three operations.

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, SignedCookieJar};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as base64_url;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::cookies;
use crate::options::CookieOptions;

/// Server-side record that a given browser represents an authenticated user.
///
/// At least one of `user` / `email` is non-empty once the session counts as
/// populated. Token fields may all be empty (htpasswd logins carry only
/// `user`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub created_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

impl Session {
    /// An empty session valid for `lifetime` starting now.
    pub fn new(lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            user: String::new(),
            email: String::new(),
            preferred_username: String::new(),
            access_token: String::new(),
            id_token: String::new(),
            refresh_token: String::new(),
            created_on: now,
            expires_on: now + lifetime,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_on
    }

    pub fn is_populated(&self) -> bool {
        !self.user.is_empty() || !self.email.is_empty()
    }

    /// The identity string surfaced in `GAP-Auth` and audit logs: the email
    /// when present, the user otherwise.
    pub fn identity(&self) -> &str {
        if self.email.is_empty() {
            &self.user
        } else {
            &self.email
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("session store backend error: {0}")]
    Backend(String),
}

/// Session persistence collaborator. `save` and `clear` hand back the
/// `Set-Cookie` the caller must attach to its response; `load` only reads.
///
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, headers: &HeaderMap) -> Result<Option<Session>, StoreError>;
    async fn save(
        &self,
        headers: &HeaderMap,
        session: &Session,
    ) -> Result<Cookie<'static>, StoreError>;
    async fn clear(&self, headers: &HeaderMap) -> Cookie<'static>;
}

/// Cookie-borne session store: the JSON session, signed with the configured
/// cookie key. Tamper-proof, not encrypted; the browser that owns the
/// session can read its own tokens.
pub struct CookieSessionStore {
    cookie: Arc<CookieOptions>,
}

impl CookieSessionStore {
    pub fn new(cookie: Arc<CookieOptions>) -> Self {
        Self { cookie }
    }
}

#[async_trait]
impl SessionStore for CookieSessionStore {
    async fn load(&self, headers: &HeaderMap) -> Result<Option<Session>, StoreError> {
        let jar = SignedCookieJar::from_headers(headers, self.cookie.key.clone());
        let Some(cookie) = jar.get(&self.cookie.name) else {
            return Ok(None);
        };
        let decoded = match base64_url.decode(cookie.value()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%e, "discarding undecodable session cookie");
                return Ok(None);
            }
        };
        match serde_json::from_slice::<Session>(&decoded) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(%e, "discarding undecodable session cookie");
                Ok(None)
            }
        }
    }

    async fn save(
        &self,
        headers: &HeaderMap,
        session: &Session,
    ) -> Result<Cookie<'static>, StoreError> {
        let value = base64_url.encode(serde_json::to_vec(session)?);
        let cookie = cookies::make_cookie(
            &self.cookie,
            headers,
            self.cookie.name.clone(),
            value,
            self.cookie.expire(),
        );
        Ok(cookies::sign_cookie(&self.cookie.key, cookie))
    }

    async fn clear(&self, headers: &HeaderMap) -> Cookie<'static> {
        cookies::clear_cookie(&self.cookie, headers, self.cookie.name.clone())
    }
}
