//! HTTP surface of the proxy: router, OAuth2 flow handlers, auth-only and
//! userinfo endpoints, and the authenticated proxy fallback.

pub mod endpoints;
pub mod oauth;
pub mod proxy;
pub mod server;
pub mod templates;

pub use server::{AppState, build_router, create_app, start};

use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::Cookie;

/// A plain 302 Found; `axum::response::Redirect` issues 303/307/308 and the
/// OAuth2 flow is specified in terms of 302.
pub(crate) fn found(location: &str) -> Response {
    let value = HeaderValue::from_str(location)
        .unwrap_or_else(|_| HeaderValue::from_static("/"));
    (StatusCode::FOUND, [(LOCATION, value)]).into_response()
}

/// Appends a `Set-Cookie` header to an already-built response.
pub(crate) fn append_cookie(response: &mut Response, cookie: Cookie<'static>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => {
            tracing::error!(%e, name = cookie.name(), "failed to serialize Set-Cookie header");
        }
    }
}

/// Whether the client asked for JSON (API clients get 401 bodies instead of
/// the sign-in page).
pub(crate) fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}
