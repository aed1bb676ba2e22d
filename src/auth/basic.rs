//! htpasswd credential store and the Basic-auth session loader.
//!
//! Only bcrypt entries (`$2a$` / `$2b$` / `$2y$`) are supported.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as base64_std;
use chrono::Duration;
use eyre::{WrapErr as _, eyre};
use tokio::fs;

use crate::auth::chain::{ChainError, Scope, SessionLoader};
use crate::session::Session;

/// Flat-file credential store, `user:bcrypt-hash` per line.
pub struct Htpasswd {
    users: HashMap<String, String>,
}

impl Htpasswd {
    /// Loads and validates the file. Unsupported hash formats are a startup
    /// error, not a silent per-request failure.
    pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(&path).await.wrap_err(format!(
            "Failed to read htpasswd file at: {}",
            path_ref.display()
        ))?;
        Self::from_content(&content)
            .wrap_err(format!("Invalid htpasswd file at: {}", path_ref.display()))
    }

    /// Parses htpasswd content directly.
    pub fn from_content(content: &str) -> eyre::Result<Self> {
        let mut users = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((user, hash)) = line.split_once(':') else {
                return Err(eyre!("line {}: expected user:hash", lineno + 1));
            };
            if !hash.starts_with("$2") {
                return Err(eyre!(
                    "line {}: unsupported hash for {user:?}, only bcrypt entries are accepted",
                    lineno + 1
                ));
            }
            users.insert(user.to_string(), hash.to_string());
        }
        Ok(Self { users })
    }

    /// Constant-ish credential check; malformed stored hashes just fail.
    pub fn validate(&self, user: &str, password: &str) -> bool {
        let Some(hash) = self.users.get(user) else {
            return false;
        };
        match bcrypt::verify(password, hash) {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(%user, %e, "bcrypt verification error");
                false
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Decodes `Authorization: Basic …` into `(user, password)`.
pub(crate) fn parse_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, payload) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Basic") {
        return None;
    }
    let decoded = base64_std.decode(payload.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Authenticates `Authorization: Basic` requests against the htpasswd file.
/// Sessions it mints carry only `user`.
pub struct BasicLoader {
    htpasswd: Arc<Htpasswd>,
    session_lifetime: Duration,
}

impl BasicLoader {
    pub fn new(htpasswd: Arc<Htpasswd>, session_lifetime: Duration) -> Self {
        Self {
            htpasswd,
            session_lifetime,
        }
    }
}

#[async_trait]
impl SessionLoader for BasicLoader {
    async fn load(&self, headers: &HeaderMap, scope: &mut Scope) -> Result<(), ChainError> {
        let Some((user, password)) = parse_basic(headers) else {
            return Ok(());
        };
        if !self.htpasswd.validate(&user, &password) {
            tracing::warn!(%user, "rejected basic auth credentials");
            return Ok(());
        }
        tracing::info!(%user, "authenticated via basic auth");
        let mut session = Session::new(self.session_lifetime);
        session.user = user;
        scope.session = Some(session);
        Ok(())
    }
}
