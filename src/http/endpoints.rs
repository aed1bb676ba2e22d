//! Auth-subrequest and identity endpoints.
//!
//! `<prefix>/auth` exists for external reverse proxies (nginx
//! `auth_request` and friends): 202 with projected identity headers when the
//! request authenticates, 401 otherwise. `<prefix>/userinfo` exposes the
//! authenticated identity as JSON.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use crate::http::templates::ROBOTS_TXT;
use crate::http::{AppState, append_cookie};
use crate::{cookies, headers as header_projection};

/// GET `/robots.txt`
pub(crate) async fn robots() -> &'static str {
    ROBOTS_TXT
}

/// GET `<prefix>/auth`
#[axum::debug_handler]
pub(crate) async fn auth_only(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let scope = match state.chain.resolve(&headers).await {
        Ok(scope) => scope,
        Err(e) => {
            tracing::error!(%e, "session resolution failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let Some(session) = scope.session else {
        let mut response =
            (StatusCode::UNAUTHORIZED, "unauthorized request\n").into_response();
        for cookie in scope.set_cookies {
            append_cookie(&mut response, cookie);
        }
        return response;
    };

    let mut response = StatusCode::ACCEPTED.into_response();
    header_projection::project_response(
        &state.options.headers,
        &session,
        response.headers_mut(),
    );
    for cookie in scope.set_cookies {
        append_cookie(&mut response, cookie);
    }
    let ws_cookie = cookies::make_cookie(
        &state.options.cookie,
        &headers,
        header_projection::X_AUTHORIZATION_COOKIE.to_string(),
        session.id_token.clone(),
        state.options.cookie.expire(),
    );
    append_cookie(&mut response, ws_cookie);
    response
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    preferred_username: String,
}

/// GET `<prefix>/userinfo`
#[axum::debug_handler]
pub(crate) async fn user_info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let scope = match state.chain.resolve(&headers).await {
        Ok(scope) => scope,
        Err(e) => {
            tracing::error!(%e, "session resolution failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let Some(session) = scope.session else {
        let mut response = (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized request"})),
        )
            .into_response();
        for cookie in scope.set_cookies {
            append_cookie(&mut response, cookie);
        }
        return response;
    };
    let mut response = Json(UserInfo {
        email: session.email.clone(),
        preferred_username: session.preferred_username.clone(),
    })
    .into_response();
    for cookie in scope.set_cookies {
        append_cookie(&mut response, cookie);
    }
    response
}
