//! The authenticated-proxy fallback: everything that is not a proxy-owned
//! path lands here. Whitelisted requests go straight to the upstream (in
//! strip mode when configured); everything else must resolve a session
//! through the loader chain first.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::http::templates::{error_page, sign_in_page};
use crate::http::{AppState, accepts_json, append_cookie, found};
use crate::{cookies, headers as header_projection};

#[axum::debug_handler]
pub(crate) async fn handle(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
) -> Response {
    let client_ip = state.gate.client_ip(req.headers(), Some(remote));

    if state
        .gate
        .is_whitelisted(req.method(), req.uri().path(), client_ip)
    {
        if state.options.skip_auth_strip_headers {
            header_projection::strip_request(&state.options.headers, req.headers_mut());
        }
        return forward(&state, req).await;
    }

    let scope = match state.chain.resolve(req.headers()).await {
        Ok(scope) => scope,
        Err(e) => {
            tracing::error!(%e, %remote, "session resolution failed");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            );
        }
    };

    let Some(session) = scope.session else {
        let mut response = needs_login(&state, &req);
        for cookie in scope.set_cookies {
            append_cookie(&mut response, cookie);
        }
        return response;
    };

    // Cookies must be built while the request headers (Host) are still
    // available; the request moves into the upstream forward below.
    let ws_cookie = cookies::make_cookie(
        &state.options.cookie,
        req.headers(),
        header_projection::X_AUTHORIZATION_COOKIE.to_string(),
        session.id_token.clone(),
        state.options.cookie.expire(),
    );

    header_projection::project_request(&state.options.headers, &session, req.headers_mut());

    let mut response = forward(&state, req).await;
    header_projection::project_response(
        &state.options.headers,
        &session,
        response.headers_mut(),
    );
    for cookie in scope.set_cookies {
        append_cookie(&mut response, cookie);
    }
    append_cookie(&mut response, ws_cookie);
    response
}

/// Unauthenticated requests: 401 JSON for API clients, otherwise the
/// sign-in page — or a direct hop to `/start` when the provider button is
/// suppressed.
fn needs_login(state: &AppState, req: &Request<Body>) -> Response {
    if accepts_json(req.headers()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized request"})),
        )
            .into_response();
    }
    let request_uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    if state.options.skip_provider_button {
        let encoded: String =
            url::form_urlencoded::byte_serialize(request_uri.as_bytes()).collect();
        return found(&format!("{}?rd={encoded}", state.options.prefixed("/start")));
    }
    sign_in_page(
        &state.options,
        state.provider.display_name(),
        StatusCode::FORBIDDEN,
        &request_uri,
        state.htpasswd.is_some(),
    )
}

async fn forward(state: &AppState, req: Request<Body>) -> Response {
    match state.upstream.forward(req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(%e, "upstream request failed");
            error_page(StatusCode::BAD_GATEWAY, "Bad Gateway", "Bad Gateway")
        }
    }
}
