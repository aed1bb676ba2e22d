//! Resolved, immutable runtime policy.
//!
//! `Options` is built once at startup from the raw TOML config and then only
//! ever shared by reference; anything that can be invalid (regexes, CIDRs,
//! URLs, the cookie secret) fails here and aborts initialization instead of
//! surfacing per request.

use std::sync::Arc;

use axum_extra::extract::cookie::Key;
use cookie::SameSite;
use cookie::time::Duration as CookieDuration;
use eyre::{WrapErr as _, eyre};
use secrecy::ExposeSecret as _;
use url::Url;

use crate::config::Config;
use crate::cookies;
use crate::redirect::AllowedDomain;

/// Attributes shared by every cookie the proxy writes.
#[derive(Clone)]
pub struct CookieOptions {
    pub name: String,
    pub key: Key,
    pub domains: Vec<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub expire_secs: i64,
    pub refresh_secs: i64,
}

impl CookieOptions {
    pub fn expire(&self) -> CookieDuration {
        CookieDuration::seconds(self.expire_secs)
    }

    pub fn session_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expire_secs)
    }

    /// How long after `created_on` a stored session becomes due for a
    /// provider refresh. Zero disables refreshing.
    pub fn refresh_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_secs)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            name: "_authgate".into(),
            key: Key::generate(),
            domains: vec!["example.com".into()],
            path: "/".into(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            expire_secs: 7 * 24 * 3600,
            refresh_secs: 0,
        }
    }
}

/// Which identity headers are projected onto upstream requests and client
/// responses (spec'd per request by the header projector).
#[derive(Debug, Clone, Default)]
pub struct HeaderPolicy {
    pub pass_basic_auth: bool,
    pub pass_user_headers: bool,
    pub pass_access_token: bool,
    pub pass_authorization: bool,
    pub set_xauthrequest: bool,
    pub set_basic_auth: bool,
    pub set_authorization: bool,
    pub prefer_email_to_user: bool,
    pub basic_auth_password: String,
}

/// The per-process policy record. Never mutated after construction.
pub struct Options {
    pub proxy_prefix: String,
    pub upstream_url: Url,
    pub redirect_url: Option<Url>,
    pub skip_provider_button: bool,
    pub skip_auth_strip_headers: bool,
    pub cookie: Arc<CookieOptions>,
    pub headers: HeaderPolicy,
    pub whitelist_domains: Vec<AllowedDomain>,
    pub email_domains: Vec<String>,
}

impl Options {
    pub fn from_config(cfg: &Config) -> eyre::Result<Self> {
        let proxy_prefix = cfg.proxy.prefix.trim_end_matches('/').to_string();
        if !proxy_prefix.starts_with('/') {
            return Err(eyre!("proxy prefix must start with '/': {proxy_prefix:?}"));
        }

        let upstream_url = Url::parse(&cfg.upstream.url)
            .wrap_err_with(|| format!("invalid upstream url {:?}", cfg.upstream.url))?;

        let redirect_url = cfg
            .auth
            .redirect_url
            .as_deref()
            .map(|raw| Url::parse(raw).wrap_err_with(|| format!("invalid redirect url {raw:?}")))
            .transpose()?;

        let whitelist_domains = cfg
            .auth
            .whitelist_domains
            .iter()
            .map(|entry| AllowedDomain::parse(entry).map_err(|e| eyre!(e)))
            .collect::<eyre::Result<Vec<_>>>()?;

        let key = cookies::key_from_secret(
            cfg.cookie
                .secret
                .as_ref()
                .map(|s| s.expose_secret())
        )?;

        let same_site = parse_same_site(&cfg.cookie.same_site)?;

        let cookie = Arc::new(CookieOptions {
            name: cfg.cookie.name.clone(),
            key,
            domains: cfg.cookie.domains.clone(),
            path: cfg.cookie.path.clone(),
            secure: cfg.cookie.secure,
            http_only: cfg.cookie.http_only,
            same_site,
            expire_secs: cfg.cookie.expire_secs,
            refresh_secs: cfg.cookie.refresh_secs,
        });

        let headers = HeaderPolicy {
            pass_basic_auth: cfg.headers.pass_basic_auth,
            pass_user_headers: cfg.headers.pass_user_headers,
            pass_access_token: cfg.headers.pass_access_token,
            pass_authorization: cfg.headers.pass_authorization,
            set_xauthrequest: cfg.headers.set_xauthrequest,
            set_basic_auth: cfg.headers.set_basic_auth,
            set_authorization: cfg.headers.set_authorization,
            prefer_email_to_user: cfg.headers.prefer_email_to_user,
            basic_auth_password: cfg
                .auth
                .basic_auth_password
                .as_ref()
                .map(|s| s.expose_secret().to_string())
                .unwrap_or_default(),
        };

        Ok(Self {
            proxy_prefix,
            upstream_url,
            redirect_url,
            skip_provider_button: cfg.proxy.skip_provider_button,
            skip_auth_strip_headers: cfg.auth.skip_auth_strip_headers,
            cookie,
            headers,
            whitelist_domains,
            email_domains: cfg.auth.email_domains.clone(),
        })
    }

    /// A proxy-owned path, e.g. `prefixed("/callback")`.
    pub fn prefixed(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.proxy_prefix)
    }

    /// The policy email predicate. `*` admits everything, including the
    /// empty email of providers that expose none; explicit domain lists
    /// require a matching non-empty address.
    pub fn validate_email(&self, email: &str) -> bool {
        if self.email_domains.iter().any(|d| d == "*") {
            return true;
        }
        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        self.email_domains
            .iter()
            .any(|d| domain.eq_ignore_ascii_case(d.trim_start_matches('@')))
    }
}

fn parse_same_site(raw: &str) -> eyre::Result<SameSite> {
    match raw.to_ascii_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" => Ok(SameSite::None),
        other => Err(eyre!(
            "invalid cookie same_site {other:?}, expected lax, strict or none"
        )),
    }
}
