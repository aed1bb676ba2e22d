//! The OAuth/OIDC provider collaborator.
//!
//! The proxy core programs against [`Provider`]; concrete adapters supply
//! whichever capabilities their provider has. Unsupported lookups return
//! [`ProviderError::NotImplemented`], which the callback state machine and
//! the loader chain treat as soft success.

pub mod oidc;

pub use oidc::OidcProvider;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::auth::bearer::BearerClaims;
use crate::session::Session;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider does not support this operation; callers treat it as a
    /// soft success that leaves the affected field untouched.
    #[error("not implemented by this provider")]
    NotImplemented,
    #[error("invalid provider configuration: {0}")]
    Config(String),
    #[error("code redemption failed: {0}")]
    Redeem(String),
    #[error("session refresh failed: {0}")]
    Refresh(String),
    #[error("identity lookup failed: {0}")]
    Lookup(String),
}

/// Capability set of an identity provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name shown on the sign-in button.
    fn display_name(&self) -> &str;

    /// Authorization endpoint URL for the browser redirect. `state` is
    /// carried opaquely through the provider; `nonce` is the CSRF nonce for
    /// providers that can bind it into the issued token.
    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
    ) -> Result<Url, ProviderError>;

    /// Exchanges an authorization code for a session.
    async fn redeem(&self, redirect_uri: &str, code: &str) -> Result<Session, ProviderError>;

    async fn get_email_address(&self, _session: &Session) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented)
    }

    async fn get_user_name(&self, _session: &Session) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented)
    }

    async fn get_preferred_username(&self, _session: &Session) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented)
    }

    /// Refreshes the session in place when the provider supports it.
    /// Returns `Ok(true)` when the session changed and must be re-persisted.
    async fn refresh_session_if_needed(
        &self,
        _session: &mut Session,
    ) -> Result<bool, ProviderError> {
        Ok(false)
    }

    /// Liveness check for stored sessions beyond plain expiry.
    async fn validate_session(&self, session: &Session) -> bool {
        !session.is_expired()
    }

    /// Group membership predicate applied after the email validator.
    fn validate_group(&self, _email: &str) -> bool {
        true
    }

    /// Materializes a session from a verified bearer token, for providers
    /// that want to override the default claims-based materialization.
    fn session_from_bearer(
        &self,
        _raw: &str,
        _claims: &BearerClaims,
    ) -> Result<Session, ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}

/// Placeholder for deployments without a browser login flow (htpasswd or
/// bearer-JWT only). Every browser-flow operation fails loudly.
#[derive(Debug, Default)]
pub struct NullProvider;

#[async_trait]
impl Provider for NullProvider {
    fn display_name(&self) -> &str {
        "none"
    }

    fn authorization_url(
        &self,
        _redirect_uri: &str,
        _state: &str,
        _nonce: &str,
    ) -> Result<Url, ProviderError> {
        Err(ProviderError::Config(
            "no OIDC provider configured".to_string(),
        ))
    }

    async fn redeem(&self, _redirect_uri: &str, _code: &str) -> Result<Session, ProviderError> {
        Err(ProviderError::Config(
            "no OIDC provider configured".to_string(),
        ))
    }
}
