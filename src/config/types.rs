//! Configuration data structures.
//!
//! Everything here mirrors the TOML file one-to-one; defaults are supplied
//! via small `default_*` functions so an almost-empty file is runnable.

use secrecy::SecretString;
use serde::Deserialize;

/// Root configuration.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerSection,
    /// The single upstream application requests are forwarded to.
    pub upstream: UpstreamSection,
    /// Proxy-owned URL surface.
    #[serde(default)]
    pub proxy: ProxySection,
    /// Cookie attributes shared by all proxy cookies.
    #[serde(default)]
    pub cookie: CookieSection,
    /// Authentication policy: who gets in, and who skips the gate.
    #[serde(default)]
    pub auth: AuthSection,
    /// Identity headers projected to upstream and back to the client.
    #[serde(default)]
    pub headers: HeadersSection,
    /// OpenID Connect provider used for the browser login flow.
    #[serde(default)]
    pub oidc: Option<OidcSection>,
    /// Trusted bearer-JWT issuers for non-browser clients.
    #[serde(default)]
    pub jwt_issuers: Vec<JwtIssuerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// TCP port for the proxy listener.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address for the listener.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct UpstreamSection {
    /// Base URL of the upstream application, e.g. `http://127.0.0.1:8080`.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySection {
    /// URL path prefix reserved for the proxy's own endpoints.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Skip the sign-in page and send unauthenticated browsers straight to
    /// the provider.
    #[serde(default)]
    pub skip_provider_button: bool,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            skip_provider_button: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CookieSection {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    /// Base64-encoded signing key material (64+ bytes decoded). Generated
    /// per process when omitted.
    #[serde(default)]
    pub secret: Option<SecretString>,
    /// Candidate Domain attributes; per request the longest one covering the
    /// request host wins.
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub http_only: bool,
    #[serde(default = "default_same_site")]
    pub same_site: String,
    /// Session cookie lifetime in seconds.
    #[serde(default = "default_cookie_expire")]
    pub expire_secs: i64,
    /// Seconds after which a stored session is refreshed at the provider.
    /// Zero disables refreshing.
    #[serde(default)]
    pub refresh_secs: i64,
}

impl Default for CookieSection {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            secret: None,
            domains: Vec::new(),
            path: default_cookie_path(),
            secure: true,
            http_only: true,
            same_site: default_same_site(),
            expire_secs: default_cookie_expire(),
            refresh_secs: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSection {
    /// Accepted email domains; `*` accepts every authenticated account.
    #[serde(default = "default_email_domains")]
    pub email_domains: Vec<String>,
    /// Optional htpasswd file (bcrypt entries) enabling manual sign-in and
    /// the Basic-auth loader.
    #[serde(default)]
    pub htpasswd_file: Option<String>,
    /// Password used when projecting `Authorization: Basic` to the upstream.
    #[serde(default)]
    pub basic_auth_password: Option<SecretString>,
    /// Path regexes that bypass authentication entirely.
    #[serde(default)]
    pub skip_auth_routes: Vec<String>,
    /// Let CORS preflight (OPTIONS) requests through unauthenticated.
    #[serde(default)]
    pub skip_auth_preflight: bool,
    /// Strip inbound identity headers from whitelisted requests before they
    /// reach the upstream.
    #[serde(default = "default_true")]
    pub skip_auth_strip_headers: bool,
    /// CIDRs whose clients bypass authentication.
    #[serde(default)]
    pub trusted_ips: Vec<String>,
    /// Header carrying the real client IP when a front proxy sits in front,
    /// e.g. `X-Forwarded-For` or `X-Real-IP`.
    #[serde(default)]
    pub real_ip_header: Option<String>,
    /// Hosts valid as absolute post-auth redirect targets.
    #[serde(default)]
    pub whitelist_domains: Vec<String>,
    /// Fully-qualified OAuth2 redirect URL. When omitted it is derived per
    /// request from the Host header and the cookie Secure flag.
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            email_domains: default_email_domains(),
            htpasswd_file: None,
            basic_auth_password: None,
            skip_auth_routes: Vec::new(),
            skip_auth_preflight: false,
            skip_auth_strip_headers: true,
            trusted_ips: Vec::new(),
            real_ip_header: None,
            whitelist_domains: Vec::new(),
            redirect_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeadersSection {
    #[serde(default = "default_true")]
    pub pass_basic_auth: bool,
    #[serde(default = "default_true")]
    pub pass_user_headers: bool,
    #[serde(default)]
    pub pass_access_token: bool,
    #[serde(default)]
    pub pass_authorization: bool,
    #[serde(default)]
    pub set_xauthrequest: bool,
    #[serde(default)]
    pub set_basic_auth: bool,
    #[serde(default)]
    pub set_authorization: bool,
    #[serde(default)]
    pub prefer_email_to_user: bool,
}

impl Default for HeadersSection {
    fn default() -> Self {
        Self {
            pass_basic_auth: true,
            pass_user_headers: true,
            pass_access_token: false,
            pass_authorization: false,
            set_xauthrequest: false,
            set_basic_auth: false,
            set_authorization: false,
            prefer_email_to_user: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OidcSection {
    /// Issuer URL used for discovery.
    pub issuer: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default = "default_oidc_scopes")]
    pub scopes: Vec<String>,
    /// Name shown on the sign-in button.
    #[serde(default = "default_display_name")]
    pub provider_display_name: String,
}

/// A trusted issuer for `Authorization: Bearer` JWTs. Exactly one of
/// `secret` (HS256) or `public_key_file` (RS256 PEM) must be set.
#[derive(Debug, Deserialize, Clone)]
pub struct JwtIssuerSection {
    pub issuer: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub secret: Option<SecretString>,
    #[serde(default)]
    pub public_key_file: Option<String>,
}

const fn default_port() -> u16 {
    4180
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_prefix() -> String {
    "/oauth2".to_string()
}

fn default_cookie_name() -> String {
    "_authgate".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_same_site() -> String {
    "lax".to_string()
}

const fn default_cookie_expire() -> i64 {
    7 * 24 * 3600
}

fn default_email_domains() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_client_id() -> String {
    "authgate".to_string()
}

fn default_oidc_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "email".to_string(),
        "profile".to_string(),
    ]
}

fn default_display_name() -> String {
    "OpenID Connect".to_string()
}

const fn default_true() -> bool {
    true
}
