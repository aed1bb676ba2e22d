//! Identity-header projection onto upstream requests and client responses.
//!
//! Hardening invariant: every identity header the current policy could emit
//! is either set from the live session or explicitly removed. Inbound values
//! never survive, so clients cannot preset `X-Forwarded-User` and have the
//! upstream trust it. Strip mode applies the same removal to whitelisted
//! requests that bypass authentication.

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as base64_std;

use crate::options::HeaderPolicy;
use crate::session::Session;

pub const X_FORWARDED_USER: HeaderName = HeaderName::from_static("x-forwarded-user");
pub const X_FORWARDED_EMAIL: HeaderName = HeaderName::from_static("x-forwarded-email");
pub const X_FORWARDED_PREFERRED_USERNAME: HeaderName =
    HeaderName::from_static("x-forwarded-preferred-username");
pub const X_FORWARDED_ACCESS_TOKEN: HeaderName =
    HeaderName::from_static("x-forwarded-access-token");
pub const X_AUTH_REQUEST_USER: HeaderName = HeaderName::from_static("x-auth-request-user");
pub const X_AUTH_REQUEST_EMAIL: HeaderName = HeaderName::from_static("x-auth-request-email");
pub const X_AUTH_REQUEST_PREFERRED_USERNAME: HeaderName =
    HeaderName::from_static("x-auth-request-preferred-username");
pub const X_AUTH_REQUEST_ACCESS_TOKEN: HeaderName =
    HeaderName::from_static("x-auth-request-access-token");
pub const GAP_AUTH: HeaderName = HeaderName::from_static("gap-auth");

/// Name of the cookie carrying the ID token for WebSocket upgrades that
/// cannot send an Authorization header.
pub const X_AUTHORIZATION_COOKIE: &str = "X-Authorization";

/// Sets `name` to `value`, or removes it when the source is empty (or not a
/// representable header value). Absence must delete, never inherit.
fn set_or_remove(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if value.is_empty() {
        headers.remove(name);
        return;
    }
    match HeaderValue::from_str(value) {
        Ok(parsed) => {
            headers.insert(name, parsed);
        }
        Err(_) => {
            tracing::warn!(header = %name, "dropping unrepresentable identity header value");
            headers.remove(name);
        }
    }
}

/// The user identity after the `prefer_email_to_user` substitution.
fn effective_user<'a>(policy: &HeaderPolicy, session: &'a Session) -> &'a str {
    if policy.prefer_email_to_user && !session.email.is_empty() {
        &session.email
    } else {
        &session.user
    }
}

/// The email to emit alongside: deleted once it already became the user.
fn effective_email<'a>(policy: &HeaderPolicy, session: &'a Session) -> &'a str {
    if policy.prefer_email_to_user && !session.email.is_empty() {
        ""
    } else {
        &session.email
    }
}

fn basic_value(user: &str, password: &str) -> String {
    if user.is_empty() {
        return String::new();
    }
    format!(
        "Basic {}",
        base64_std.encode(format!("{user}:{password}"))
    )
}

fn bearer_value(token: &str) -> String {
    if token.is_empty() {
        return String::new();
    }
    format!("Bearer {token}")
}

/// Applies the request-side policy before the request is forwarded upstream.
pub fn project_request(policy: &HeaderPolicy, session: &Session, headers: &mut HeaderMap) {
    let user = effective_user(policy, session);
    let email = effective_email(policy, session);

    if policy.pass_basic_auth {
        set_or_remove(
            headers,
            AUTHORIZATION,
            &basic_value(user, &policy.basic_auth_password),
        );
        set_or_remove(headers, X_FORWARDED_USER, user);
        set_or_remove(headers, X_FORWARDED_EMAIL, email);
        set_or_remove(
            headers,
            X_FORWARDED_PREFERRED_USERNAME,
            &session.preferred_username,
        );
    }
    if policy.pass_user_headers {
        set_or_remove(headers, X_FORWARDED_USER, user);
        set_or_remove(headers, X_FORWARDED_EMAIL, email);
        set_or_remove(
            headers,
            X_FORWARDED_PREFERRED_USERNAME,
            &session.preferred_username,
        );
    }
    if policy.pass_access_token {
        set_or_remove(headers, X_FORWARDED_ACCESS_TOKEN, &session.access_token);
    }
    if policy.pass_authorization {
        set_or_remove(headers, AUTHORIZATION, &bearer_value(&session.id_token));
    }
}

/// Applies the response-side policy. `GAP-Auth` is always set.
pub fn project_response(policy: &HeaderPolicy, session: &Session, headers: &mut HeaderMap) {
    if policy.set_xauthrequest {
        set_or_remove(headers, X_AUTH_REQUEST_USER, &session.user);
        set_or_remove(headers, X_AUTH_REQUEST_EMAIL, &session.email);
        set_or_remove(
            headers,
            X_AUTH_REQUEST_PREFERRED_USERNAME,
            &session.preferred_username,
        );
        if policy.pass_access_token {
            set_or_remove(headers, X_AUTH_REQUEST_ACCESS_TOKEN, &session.access_token);
        }
    }
    if policy.set_basic_auth {
        let user = effective_user(policy, session);
        set_or_remove(
            headers,
            AUTHORIZATION,
            &basic_value(user, &policy.basic_auth_password),
        );
    }
    if policy.set_authorization {
        set_or_remove(headers, AUTHORIZATION, &bearer_value(&session.id_token));
    }
    set_or_remove(headers, GAP_AUTH, session.identity());
}

/// Strip mode: deletes the inbound identity headers a whitelisted request
/// could otherwise smuggle past the upstream's trust in this proxy.
pub fn strip_request(policy: &HeaderPolicy, headers: &mut HeaderMap) {
    if policy.pass_basic_auth || policy.pass_authorization {
        headers.remove(AUTHORIZATION);
    }
    if policy.pass_basic_auth || policy.pass_user_headers {
        headers.remove(X_FORWARDED_USER);
        headers.remove(X_FORWARDED_EMAIL);
        headers.remove(X_FORWARDED_PREFERRED_USERNAME);
    }
    if policy.pass_access_token {
        headers.remove(X_FORWARDED_ACCESS_TOKEN);
    }
}
