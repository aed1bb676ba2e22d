//! Bearer-JWT session loader for trusted issuers.
//!
//! Each configured issuer gets one verifier (HS256 shared secret or RS256
//! public key); for every bearer token on the request the verifiers run in
//! declaration order and the first acceptance wins. A token nobody accepts
//! leaves the request unauthenticated rather than failing it.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use chrono::{DateTime, Duration, Utc};
use eyre::{WrapErr as _, eyre};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::ExposeSecret as _;
use serde::Deserialize;

use crate::auth::chain::{ChainError, Scope, SessionLoader};
use crate::config::JwtIssuerSection;
use crate::provider::{Provider, ProviderError};
use crate::session::Session;

/// Claims extracted from an accepted bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct BearerClaims {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub preferred_username: String,
    pub exp: i64,
}

/// One trusted issuer.
pub struct JwtVerifier {
    issuer: String,
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Builds a verifier from configuration; reads RS256 public keys from
    /// disk, so this belongs in startup.
    pub fn from_config(cfg: &JwtIssuerSection) -> eyre::Result<Self> {
        let (key, algorithm) = match (&cfg.secret, &cfg.public_key_file) {
            (Some(secret), None) => (
                DecodingKey::from_secret(secret.expose_secret().as_bytes()),
                Algorithm::HS256,
            ),
            (None, Some(path)) => {
                let pem = std::fs::read(path)
                    .wrap_err_with(|| format!("Failed to read public key file at: {path}"))?;
                (
                    DecodingKey::from_rsa_pem(&pem)
                        .wrap_err_with(|| format!("Invalid RSA public key in {path}"))?,
                    Algorithm::RS256,
                )
            }
            _ => {
                return Err(eyre!(
                    "jwt issuer {:?} needs exactly one of secret or public_key_file",
                    cfg.issuer
                ));
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = 60;
        validation.set_issuer(&[cfg.issuer.clone()]);
        match &cfg.audience {
            Some(audience) => validation.set_audience(&[audience.clone()]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            issuer: cfg.issuer.clone(),
            key,
            validation,
        })
    }

    fn verify(&self, token: &str) -> Option<BearerClaims> {
        match decode::<BearerClaims>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(issuer = %self.issuer, %e, "bearer token rejected by verifier");
                None
            }
        }
    }
}

/// Extracts every `Authorization: Bearer` token on the request.
fn bearer_tokens(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            (scheme.eq_ignore_ascii_case("Bearer") && !token.trim().is_empty())
                .then(|| token.trim())
        })
}

pub struct BearerLoader {
    verifiers: Vec<JwtVerifier>,
    provider: Arc<dyn Provider>,
}

impl BearerLoader {
    pub fn new(verifiers: Vec<JwtVerifier>, provider: Arc<dyn Provider>) -> Self {
        Self {
            verifiers,
            provider,
        }
    }

    fn materialize(&self, raw: &str, claims: &BearerClaims) -> Session {
        match self.provider.session_from_bearer(raw, claims) {
            Ok(session) => session,
            Err(ProviderError::NotImplemented) => claims_session(raw, claims),
            Err(e) => {
                tracing::warn!(%e, "provider bearer materializer failed, using claims");
                claims_session(raw, claims)
            }
        }
    }
}

/// Default materialization straight from the verified claims.
fn claims_session(raw: &str, claims: &BearerClaims) -> Session {
    let now = Utc::now();
    let expires_on = DateTime::<Utc>::from_timestamp(claims.exp, 0).unwrap_or(now);
    let mut session = Session::new(Duration::zero());
    session.user = claims.sub.clone();
    session.email = claims.email.clone();
    session.preferred_username = claims.preferred_username.clone();
    session.access_token = raw.to_string();
    session.id_token = raw.to_string();
    session.created_on = now;
    session.expires_on = expires_on;
    session
}

#[async_trait]
impl SessionLoader for BearerLoader {
    async fn load(&self, headers: &HeaderMap, scope: &mut Scope) -> Result<(), ChainError> {
        for token in bearer_tokens(headers) {
            for verifier in &self.verifiers {
                if let Some(claims) = verifier.verify(token) {
                    tracing::info!(
                        user = %claims.sub,
                        issuer = %verifier.issuer,
                        "authenticated via bearer token"
                    );
                    scope.session = Some(self.materialize(token, &claims));
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
