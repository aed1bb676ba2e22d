//! CSRF nonce cookie for the authorization-code round-trip.
//!
//! `/start` issues the cookie with a fresh nonce and threads the same nonce
//! through the provider's `state` parameter; `/callback` requires the two to
//! match byte-for-byte and clears the cookie unconditionally.

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, SignedCookieJar};

use crate::cookies;
use crate::options::CookieOptions;

fn cookie_name(opts: &CookieOptions) -> String {
    format!("{}_csrf", opts.name)
}

/// Issues the nonce cookie: session-cookie attributes and lifetime, the
/// `_csrf` name aside. The callback clears it no matter how the flow ends.
pub fn issue(opts: &CookieOptions, headers: &HeaderMap, nonce: &str) -> Cookie<'static> {
    let cookie = cookies::make_cookie(
        opts,
        headers,
        cookie_name(opts),
        nonce.to_owned(),
        opts.expire(),
    );
    cookies::sign_cookie(&opts.key, cookie)
}

/// Reads the nonce back, rejecting unsigned or tampered values.
pub fn read(opts: &CookieOptions, headers: &HeaderMap) -> Option<String> {
    let jar = SignedCookieJar::from_headers(headers, opts.key.clone());
    jar.get(&cookie_name(opts))
        .map(|cookie| cookie.value().to_string())
}

/// Removal cookie for the nonce.
pub fn clear(opts: &CookieOptions, headers: &HeaderMap) -> Cookie<'static> {
    cookies::clear_cookie(opts, headers, cookie_name(opts))
}
