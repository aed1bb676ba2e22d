//! Cookie construction shared by the session store, the CSRF helper and the
//! header projector.
//!
//! All proxy cookies carry the same configured attributes; only name, value
//! and lifetime differ. The Domain attribute is picked per request as the
//! longest configured domain that is a suffix of the request Host.

use axum::http::{HeaderMap, header};
use axum_extra::extract::cookie::{Cookie, Key};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as base64_std;
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use eyre::WrapErr as _;
use rand::{RngExt as _, distr::Alphanumeric};

use crate::options::CookieOptions;
use crate::redirect::split_host_port;

/// Length of generated CSRF nonces.
const NONCE_LEN: usize = 32;

/// Cookie key from an optional base64-encoded secret. A configured but
/// invalid secret is a startup error; an absent secret generates an
/// ephemeral key (sessions then die with the process).
pub fn key_from_secret(secret: Option<&str>) -> eyre::Result<Key> {
    match secret {
        Some(encoded) => {
            let bytes = base64_std
                .decode(encoded)
                .wrap_err("cookie secret is not valid base64")?;
            Key::try_from(&bytes[..])
                .wrap_err("cookie secret must decode to at least 64 bytes of key material")
        }
        None => {
            tracing::warn!(
                "no cookie secret configured; generated an ephemeral key, sessions will not survive a restart"
            );
            Ok(Key::generate())
        }
    }
}

/// Random alphanumeric nonce for the CSRF round-trip.
pub fn generate_nonce() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// Request host as seen by the browser: the front-end terminator's
/// `X-Forwarded-Host` when present, the plain `Host` header otherwise.
pub fn request_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))?
        .to_str()
        .ok()
        .map(str::to_owned)
}

/// Longest configured domain that covers the request host, if any.
pub fn select_domain(host: &str, domains: &[String]) -> Option<String> {
    let (hostname, _) = split_host_port(host);
    let hostname = hostname.to_ascii_lowercase();
    domains
        .iter()
        .filter(|candidate| {
            let bare = candidate.trim_start_matches('.').to_ascii_lowercase();
            hostname == bare || hostname.ends_with(&format!(".{bare}"))
        })
        .max_by_key(|candidate| candidate.trim_start_matches('.').len())
        .map(|candidate| candidate.trim_start_matches('.').to_owned())
}

/// Builds a cookie with the configured attributes and a per-request Domain.
/// A configured domain list that covers no domain of the request host logs a
/// warning but does not block (the cookie is then host-only).
pub fn make_cookie(
    opts: &CookieOptions,
    headers: &HeaderMap,
    name: String,
    value: String,
    max_age: CookieDuration,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path(opts.path.clone())
        .http_only(opts.http_only)
        .secure(opts.secure)
        .same_site(opts.same_site)
        .max_age(max_age);
    if !opts.domains.is_empty() {
        let host = request_host(headers).unwrap_or_default();
        match select_domain(&host, &opts.domains) {
            Some(domain) => builder = builder.domain(domain),
            None => {
                tracing::warn!(
                    %host,
                    "request host not covered by any configured cookie domain"
                );
            }
        }
    }
    builder.build()
}

/// A removal cookie for `name`: empty value, epoch expiry, same attributes.
pub fn clear_cookie(opts: &CookieOptions, headers: &HeaderMap, name: String) -> Cookie<'static> {
    let mut cookie = make_cookie(opts, headers, name, String::new(), CookieDuration::ZERO);
    cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
    cookie
}

/// Signs `cookie`'s value with `key`, returning the wire cookie to set.
pub fn sign_cookie(key: &Key, cookie: Cookie<'static>) -> Cookie<'static> {
    let mut jar = cookie::CookieJar::new();
    jar.signed_mut(key).add(cookie);
    jar.delta()
        .next()
        .cloned()
        .expect("signed jar delta contains the cookie just added")
}
