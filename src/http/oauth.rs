//! The browser-facing OAuth2 flow: sign-in page, manual htpasswd sign-in,
//! flow start, provider callback and sign-out.
//!
//! The CSRF nonce issued at `/start` travels twice: in the `_csrf` cookie
//! and inside the provider `state` parameter (`<nonce>:<redirect>`). The
//! callback accepts a code only when the two nonces match byte-for-byte.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Form, OriginalUri, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::http::templates::{error_page, sign_in_page};
use crate::http::{AppState, append_cookie, found};
use crate::options::Options;
use crate::provider::ProviderError;
use crate::session::Session;
use crate::{cookies, csrf, redirect};

#[derive(Deserialize, Default)]
pub(crate) struct RedirectQuery {
    pub rd: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct SignInForm {
    username: Option<String>,
    password: Option<String>,
    rd: Option<String>,
}

/// Resolves the post-auth redirect: `X-Auth-Request-Redirect` header first,
/// then the `rd` parameter (which wins), then the request URI itself —
/// collapsed to `/` when it points into the proxy's own prefix. Anything
/// that fails validation becomes `/`.
pub(crate) fn resolve_app_redirect(
    options: &Options,
    headers: &HeaderMap,
    rd: Option<&str>,
    request_uri: &str,
) -> String {
    let mut redirect_target = headers
        .get("x-auth-request-redirect")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if let Some(rd) = rd
        && !rd.is_empty()
    {
        redirect_target = rd.to_string();
    }
    if redirect_target.is_empty() {
        redirect_target = request_uri.to_string();
        if redirect_target.starts_with(&options.proxy_prefix) {
            redirect_target = "/".to_string();
        }
    }
    if !redirect::is_valid_redirect(&redirect_target, &options.whitelist_domains) {
        redirect_target = "/".to_string();
    }
    redirect_target
}

/// The OAuth2 redirect URI for this request. A configured redirect URL with
/// an explicit host is used verbatim; otherwise the URI is rebuilt from the
/// request Host, with the scheme following the session cookie's Secure flag.
pub(crate) fn get_redirect_uri(options: &Options, headers: &HeaderMap) -> String {
    if let Some(configured) = &options.redirect_url
        && configured.has_host()
    {
        return configured.to_string();
    }
    let scheme = if options.cookie.secure { "https" } else { "http" };
    let host = cookies::request_host(headers).unwrap_or_default();
    format!("{scheme}://{host}{}", options.prefixed("/callback"))
}

/// GET `<prefix>/sign_in`
#[axum::debug_handler]
pub(crate) async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Query(RedirectQuery { rd }): Query<RedirectQuery>,
) -> Response {
    let redirect_target =
        resolve_app_redirect(&state.options, &headers, rd.as_deref(), &uri.to_string());
    if state.options.skip_provider_button {
        return start_flow(&state, &headers, &redirect_target);
    }
    sign_in_page(
        &state.options,
        state.provider.display_name(),
        StatusCode::OK,
        &redirect_target,
        state.htpasswd.is_some(),
    )
}

/// POST `<prefix>/sign_in` — manual htpasswd sign-in.
#[axum::debug_handler]
pub(crate) async fn sign_in_post(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Form(form): Form<SignInForm>,
) -> Response {
    let redirect_target = resolve_app_redirect(
        &state.options,
        &headers,
        form.rd.as_deref(),
        &uri.to_string(),
    );

    let (Some(htpasswd), Some(username), Some(password)) =
        (&state.htpasswd, &form.username, &form.password)
    else {
        return sign_in_page(
            &state.options,
            state.provider.display_name(),
            StatusCode::OK,
            &redirect_target,
            state.htpasswd.is_some(),
        );
    };

    if !htpasswd.validate(username, password) {
        tracing::warn!(user = %username, %remote, "manual sign-in rejected: invalid credentials");
        return sign_in_page(
            &state.options,
            state.provider.display_name(),
            StatusCode::UNAUTHORIZED,
            &redirect_target,
            true,
        );
    }

    let mut session = Session::new(state.options.cookie.session_lifetime());
    session.user = username.clone();
    let session_cookie = match state.store.save(&headers, &session).await {
        Ok(cookie) => cookie,
        Err(e) => {
            tracing::error!(%e, "failed to save session after manual sign-in");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            );
        }
    };
    tracing::info!(user = %username, %remote, "authenticated via htpasswd sign-in");
    let mut response = found(&redirect_target);
    append_cookie(&mut response, session_cookie);
    response
}

/// GET `<prefix>/start`
#[axum::debug_handler]
pub(crate) async fn start(
    State(state): State<AppState>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Query(RedirectQuery { rd }): Query<RedirectQuery>,
) -> Response {
    let redirect_target =
        resolve_app_redirect(&state.options, &headers, rd.as_deref(), &uri.to_string());
    start_flow(&state, &headers, &redirect_target)
}

/// Issues the CSRF cookie and redirects to the provider's authorization
/// endpoint with `state = <nonce>:<redirect>`.
fn start_flow(state: &AppState, headers: &HeaderMap, redirect_target: &str) -> Response {
    let nonce = cookies::generate_nonce();
    let oauth_state = format!("{nonce}:{redirect_target}");
    let redirect_uri = get_redirect_uri(&state.options, headers);
    let auth_url = match state
        .provider
        .authorization_url(&redirect_uri, &oauth_state, &nonce)
    {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(%e, "failed to build authorization URL");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            );
        }
    };
    let csrf_cookie = csrf::issue(&state.options.cookie, headers, &nonce);
    let mut response = found(auth_url.as_str());
    append_cookie(&mut response, csrf_cookie);
    response
}

/// GET `<prefix>/callback`
#[axum::debug_handler]
pub(crate) async fn callback(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let options = &state.options;

    if let Some(provider_error) = params.error {
        tracing::warn!(error = %provider_error, %remote, "provider returned an error at callback");
        return error_page(StatusCode::FORBIDDEN, "Permission Denied", &provider_error);
    }

    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        tracing::warn!(%remote, "callback missing authorization code");
        return error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Error",
            "Internal Error",
        );
    };

    let redirect_uri = get_redirect_uri(options, &headers);
    let mut session = match state.provider.redeem(&redirect_uri, &code).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(%e, %remote, "error redeeming authorization code");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            );
        }
    };

    fill_missing_identity(&state, &mut session).await;

    let raw_state = params.state.unwrap_or_default();
    let Some((nonce, app_redirect)) = raw_state.split_once(':') else {
        tracing::warn!(%remote, "callback state parameter is malformed");
        return error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Error",
            "Invalid State",
        );
    };

    let Some(cookie_nonce) = csrf::read(&options.cookie, &headers) else {
        tracing::warn!(%remote, "callback missing CSRF cookie");
        return error_page(StatusCode::FORBIDDEN, "Permission Denied", "csrf failed");
    };
    let clear_csrf = csrf::clear(&options.cookie, &headers);
    if cookie_nonce != nonce {
        tracing::warn!(user = %session.user, %remote, "CSRF nonce mismatch at callback");
        let mut response =
            error_page(StatusCode::FORBIDDEN, "Permission Denied", "csrf failed");
        append_cookie(&mut response, clear_csrf);
        return response;
    }

    let app_redirect = if redirect::is_valid_redirect(app_redirect, &options.whitelist_domains) {
        app_redirect.to_string()
    } else {
        "/".to_string()
    };

    if !options.validate_email(&session.email) || !state.provider.validate_group(&session.email) {
        tracing::warn!(
            user = %session.user,
            email = %session.email,
            %remote,
            "permission denied: account not authorized"
        );
        let mut response =
            error_page(StatusCode::FORBIDDEN, "Permission Denied", "Invalid Account");
        append_cookie(&mut response, clear_csrf);
        return response;
    }

    let session_cookie = match state.store.save(&headers, &session).await {
        Ok(cookie) => cookie,
        Err(e) => {
            tracing::error!(%e, %remote, "failed to persist session");
            let mut response = error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            );
            append_cookie(&mut response, clear_csrf);
            return response;
        }
    };

    tracing::info!(
        user = %session.user,
        email = %session.email,
        %remote,
        "authentication complete"
    );
    let mut response = found(&app_redirect);
    append_cookie(&mut response, clear_csrf);
    append_cookie(&mut response, session_cookie);
    response
}

/// Backfills identity fields the redemption left empty via the provider's
/// optional lookups; `NotImplemented` is a soft success.
async fn fill_missing_identity(state: &AppState, session: &mut Session) {
    if session.email.is_empty() {
        match state.provider.get_email_address(session).await {
            Ok(email) => session.email = email,
            Err(ProviderError::NotImplemented) => {}
            Err(e) => tracing::warn!(%e, "email lookup failed"),
        }
    }
    if session.user.is_empty() {
        match state.provider.get_user_name(session).await {
            Ok(user) => session.user = user,
            Err(ProviderError::NotImplemented) => {}
            Err(e) => tracing::warn!(%e, "user lookup failed"),
        }
    }
    if session.preferred_username.is_empty() {
        match state.provider.get_preferred_username(session).await {
            Ok(preferred) => session.preferred_username = preferred,
            Err(ProviderError::NotImplemented) => {}
            Err(e) => tracing::warn!(%e, "preferred username lookup failed"),
        }
    }
}

/// GET `<prefix>/sign_out`
#[axum::debug_handler]
pub(crate) async fn sign_out(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Query(RedirectQuery { rd }): Query<RedirectQuery>,
) -> Response {
    let redirect_target =
        resolve_app_redirect(&state.options, &headers, rd.as_deref(), &uri.to_string());
    if let Ok(Some(session)) = state.store.load(&headers).await {
        tracing::info!(user = %session.user, email = %session.email, %remote, "signed out");
    }
    let clear_cookie = state.store.clear(&headers).await;
    let mut response = found(&redirect_target);
    append_cookie(&mut response, clear_cookie);
    response
}
