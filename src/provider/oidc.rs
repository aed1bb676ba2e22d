//! Generic OpenID Connect provider adapter.
//!
//! Discovery runs once at startup; per-request work is limited to cloning
//! the client to pin the redirect URI. Identity (sub, email, preferred
//! username) comes from the verified ID token, so the optional lookup
//! capabilities stay `NotImplemented`.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use eyre::{WrapErr as _, eyre};
use oauth2_reqwest::ReqwestClient;
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointMaybeSet, EndpointNotSet,
    EndpointSet, IssuerUrl, Nonce, OAuth2TokenResponse as _, RedirectUrl, RefreshToken, Scope,
    core::{CoreAuthenticationFlow, CoreClient, CoreIdToken, CoreProviderMetadata},
};
use reqwest::redirect::Policy;
use secrecy::ExposeSecret as _;
use url::Url;

use crate::config::OidcSection;
use crate::provider::{Provider, ProviderError};
use crate::session::Session;

// Endpoints we require from discovery: authorization and token. Device
// auth, introspection and revocation are not used.
pub(crate) type OidcClientReady = CoreClient<
    EndpointSet,      // HasAuthUrl
    EndpointNotSet,   // HasDeviceAuthUrl
    EndpointNotSet,   // HasIntrospectionUrl
    EndpointNotSet,   // HasRevocationUrl
    EndpointSet,      // HasTokenUrl
    EndpointMaybeSet, // HasUserInfoUrl (from discovery, optional)
>;

pub struct OidcProvider {
    client: OidcClientReady,
    http: reqwest::Client,
    scopes: Vec<String>,
    display_name: String,
    /// Session lifetime when the token response carries no `expires_in`.
    fallback_lifetime: Duration,
}

impl OidcProvider {
    /// Discovers the issuer and builds a ready client.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built, discovery fails, or the
    /// provider metadata lacks a token endpoint.
    pub async fn discover(cfg: &OidcSection, fallback_lifetime: Duration) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(Policy::limited(3))
            .build()
            .wrap_err("failed to build HTTP client")?;

        let issuer = IssuerUrl::new(cfg.issuer.clone()).wrap_err("invalid issuer URL")?;
        let provider_metadata =
            CoreProviderMetadata::discover_async(issuer, &ReqwestClient::from(http.clone()))
                .await
                .wrap_err("OIDC discovery failed")?;

        let client = CoreClient::from_provider_metadata(
            provider_metadata.clone(),
            ClientId::new(cfg.client_id.clone()),
            Some(ClientSecret::new(
                cfg.client_secret.expose_secret().to_string(),
            )),
        )
        .set_auth_uri(provider_metadata.authorization_endpoint().clone());
        let client = if let Some(token_url) = provider_metadata.token_endpoint().cloned() {
            client.set_token_uri(token_url)
        } else {
            return Err(eyre!("OIDC provider missing token endpoint"));
        };

        tracing::info!(issuer = %cfg.issuer, client_id = %cfg.client_id, "OIDC provider ready");

        Ok(Self {
            client,
            http,
            scopes: cfg.scopes.clone(),
            display_name: cfg.provider_display_name.clone(),
            fallback_lifetime,
        })
    }

    fn client_for(&self, redirect_uri: &str) -> Result<OidcClientReady, ProviderError> {
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| ProviderError::Config(format!("invalid redirect URL: {e}")))?;
        Ok(self.client.clone().set_redirect_uri(redirect))
    }
}

/// Raw compact JWT of an ID token, via its serde representation.
fn raw_jwt(id_token: &CoreIdToken) -> String {
    serde_json::to_string(id_token)
        .map(|s| s.trim_matches('"').to_owned())
        .unwrap_or_default()
}

/// The ID-token nonce claim is not re-checked here: CSRF binding happens at
/// the state-parameter layer before redemption is attempted.
fn accept_any_nonce(_: Option<&Nonce>) -> Result<(), String> {
    Ok(())
}

#[async_trait]
impl Provider for OidcProvider {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
    ) -> Result<Url, ProviderError> {
        let client = self.client_for(redirect_uri)?;
        let state = state.to_string();
        let nonce = nonce.to_string();
        let mut authorize = client.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            move || CsrfToken::new(state),
            move || Nonce::new(nonce),
        );
        for scope in &self.scopes {
            authorize = authorize.add_scope(Scope::new(scope.clone()));
        }
        let (auth_url, _, _) = authorize.url();
        Ok(auth_url)
    }

    async fn redeem(&self, redirect_uri: &str, code: &str) -> Result<Session, ProviderError> {
        let client = self.client_for(redirect_uri)?;
        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&ReqwestClient::from(self.http.clone()))
            .await
            .map_err(|e| ProviderError::Redeem(e.to_string()))?;

        let id_token = token_response
            .extra_fields()
            .id_token()
            .cloned()
            .ok_or_else(|| ProviderError::Redeem("no id_token in token response".to_string()))?;
        let claims = id_token
            .claims(&client.id_token_verifier(), accept_any_nonce)
            .map_err(|e| ProviderError::Redeem(format!("invalid id token: {e}")))?;

        let now = Utc::now();
        let expires_on = token_response
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .map_or(now + self.fallback_lifetime, |d| now + d);

        Ok(Session {
            user: claims.subject().to_string(),
            email: claims
                .email()
                .map(|e| e.to_string())
                .unwrap_or_default(),
            preferred_username: claims
                .preferred_username()
                .map(|p| p.to_string())
                .unwrap_or_default(),
            access_token: token_response.access_token().secret().clone(),
            id_token: raw_jwt(&id_token),
            refresh_token: token_response
                .refresh_token()
                .map(|t| t.secret().clone())
                .unwrap_or_default(),
            created_on: now,
            expires_on,
        })
    }

    async fn refresh_session_if_needed(
        &self,
        session: &mut Session,
    ) -> Result<bool, ProviderError> {
        if session.refresh_token.is_empty() {
            return Ok(false);
        }
        let refresh_token = RefreshToken::new(session.refresh_token.clone());
        let token_response = self
            .client
            .exchange_refresh_token(&refresh_token)
            .request_async(&ReqwestClient::from(self.http.clone()))
            .await
            .map_err(|e| ProviderError::Refresh(e.to_string()))?;

        let now = Utc::now();
        session.access_token = token_response.access_token().secret().clone();
        if let Some(new_refresh) = token_response.refresh_token() {
            session.refresh_token = new_refresh.secret().clone();
        }
        if let Some(id_token) = token_response.extra_fields().id_token() {
            session.id_token = raw_jwt(id_token);
        }
        session.created_on = now;
        session.expires_on = token_response
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .map_or(now + self.fallback_lifetime, |d| now + d);
        tracing::info!(user = %session.user, "refreshed session at the provider");
        Ok(true)
    }
}
