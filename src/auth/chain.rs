//! The session loader chain.
//!
//! Loaders run in declaration order (bearer → basic → stored) against a
//! per-request [`Scope`]; a loader that finds the scope already populated
//! skips. The chain holds no mutable state of its own and is safe to invoke
//! concurrently.

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::Cookie;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::options::Options;
use crate::provider::{Provider, ProviderError};
use crate::session::{Session, SessionStore, StoreError};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Per-request record the loaders populate. Cookies collected here must be
/// attached to whatever response the request ends up producing (refresh
/// re-persists, a dead stored session clears).
#[derive(Default)]
pub struct Scope {
    pub session: Option<Session>,
    pub set_cookies: Vec<Cookie<'static>>,
}

#[async_trait]
pub trait SessionLoader: Send + Sync {
    async fn load(&self, headers: &HeaderMap, scope: &mut Scope) -> Result<(), ChainError>;
}

pub struct Chain {
    loaders: Vec<Box<dyn SessionLoader>>,
}

impl Chain {
    pub fn new(loaders: Vec<Box<dyn SessionLoader>>) -> Self {
        Self { loaders }
    }

    /// Runs the loaders in order. `Ok` with an empty scope means
    /// "unauthenticated", not an error.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Scope, ChainError> {
        let mut scope = Scope::default();
        for loader in &self.loaders {
            if scope.session.is_some() {
                break;
            }
            loader.load(headers, &mut scope).await?;
        }
        Ok(scope)
    }
}

/// Loads the session persisted by the session store, refreshing it at the
/// provider when the refresh period has elapsed since `created_on`.
pub struct StoredLoader {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn Provider>,
    options: Arc<Options>,
}

impl StoredLoader {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn Provider>,
        options: Arc<Options>,
    ) -> Self {
        Self {
            store,
            provider,
            options,
        }
    }
}

#[async_trait]
impl SessionLoader for StoredLoader {
    async fn load(&self, headers: &HeaderMap, scope: &mut Scope) -> Result<(), ChainError> {
        let Some(mut session) = self.store.load(headers).await? else {
            return Ok(());
        };

        let mut persist = false;
        let refresh_period = self.options.cookie.refresh_period();
        if !refresh_period.is_zero() && Utc::now() - session.created_on >= refresh_period {
            match self.provider.refresh_session_if_needed(&mut session).await {
                Ok(true) => persist = true,
                Ok(false) | Err(ProviderError::NotImplemented) => {}
                Err(e) => {
                    tracing::warn!(user = %session.user, %e, "session refresh failed, clearing session");
                    scope.set_cookies.push(self.store.clear(headers).await);
                    return Ok(());
                }
            }
        }

        if session.is_expired()
            || !session.is_populated()
            || !self.provider.validate_session(&session).await
        {
            tracing::info!(user = %session.user, "stored session no longer valid, clearing");
            scope.set_cookies.push(self.store.clear(headers).await);
            return Ok(());
        }

        if !self.options.validate_email(&session.email) {
            tracing::warn!(
                user = %session.user,
                email = %session.email,
                "stored session rejected by email policy, clearing"
            );
            scope.set_cookies.push(self.store.clear(headers).await);
            return Ok(());
        }

        if persist {
            scope
                .set_cookies
                .push(self.store.save(headers, &session).await?);
        }
        scope.session = Some(session);
        Ok(())
    }
}
