//! The browser round-trip: flow start, callback CSRF binding, provider
//! errors, sign-out and the manual htpasswd sign-in.

mod common;

use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::header::COOKIE;
use axum::http::{Request, StatusCode};
use url::Url;

use common::{
    BASE_CONFIG, GOOD_CODE, Harness, StubProvider, authenticated_session, body_string, call,
    cookie_header, find_cookie, get, harness, harness_with, location, session_cookie_pair,
    set_cookies,
};

/// Runs `/start` and hands back the CSRF cookie pair plus the state value
/// the provider saw.
async fn start_flow(h: &Harness, rd: &str) -> ((String, String), String) {
    let response = call(&h.state, get(&format!("/oauth2/start?rd={rd}"))).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let provider_url = Url::parse(&location(&response)).unwrap();
    assert_eq!(provider_url.host_str(), Some("provider.test"));
    let state_param = provider_url
        .query_pairs()
        .find(|(name, _)| name == "state")
        .map(|(_, value)| value.to_string())
        .expect("provider URL carries state");

    let cookies = set_cookies(&response);
    let csrf = find_cookie(&cookies, "_authgate_csrf").expect("csrf cookie issued");
    assert!(
        find_cookie(&cookies, "_authgate").is_none(),
        "no session cookie before the callback"
    );
    (
        (csrf.name().to_string(), csrf.value().to_string()),
        state_param,
    )
}

#[tokio::test]
async fn start_issues_nonce_state_and_csrf_cookie() {
    let h = harness(BASE_CONFIG);
    let (_csrf, state_param) = start_flow(&h, "/dashboard").await;

    let (nonce, redirect) = state_param.split_once(':').unwrap();
    assert!(nonce.len() >= 32, "nonce too short: {nonce}");
    assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(redirect, "/dashboard");
}

#[tokio::test]
async fn start_carries_derived_redirect_uri() {
    let h = harness(BASE_CONFIG);
    let response = call(&h.state, get("/oauth2/start?rd=/dashboard")).await;
    let provider_url = Url::parse(&location(&response)).unwrap();
    let redirect_uri = provider_url
        .query_pairs()
        .find(|(name, _)| name == "redirect_uri")
        .map(|(_, value)| value.to_string())
        .unwrap();
    // cookie.secure defaults to true, so the derived scheme is https
    assert_eq!(redirect_uri, "https://app.example.com/oauth2/callback");
}

#[tokio::test]
async fn callback_with_matching_nonce_mints_session() {
    let h = harness(BASE_CONFIG);
    let ((csrf_name, csrf_value), state_param) = start_flow(&h, "/dashboard").await;

    let mut request = get(&format!(
        "/oauth2/callback?code={GOOD_CODE}&state={state_param}"
    ));
    request.headers_mut().insert(
        COOKIE,
        cookie_header(&[(&csrf_name, &csrf_value)]),
    );
    let response = call(&h.state, request).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/dashboard");

    let cookies = set_cookies(&response);
    let cleared_csrf = find_cookie(&cookies, "_authgate_csrf").expect("csrf cookie cleared");
    assert_eq!(cleared_csrf.value(), "");
    let session_cookie = find_cookie(&cookies, "_authgate").expect("session cookie set");
    assert!(!session_cookie.value().is_empty());
    assert_eq!(h.provider.redeemed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn callback_with_wrong_nonce_is_denied() {
    let h = harness(BASE_CONFIG);
    // Cookie from one flow, state from a second: byte-for-byte equality fails.
    let ((csrf_name, stale_value), _) = start_flow(&h, "/dashboard").await;
    let (_fresh, fresh_state) = start_flow(&h, "/dashboard").await;

    let mut request = get(&format!(
        "/oauth2/callback?code={GOOD_CODE}&state={fresh_state}"
    ));
    request
        .headers_mut()
        .insert(COOKIE, cookie_header(&[(&csrf_name, &stale_value)]));
    let response = call(&h.state, request).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let cookies = set_cookies(&response);
    let cleared = find_cookie(&cookies, "_authgate_csrf").expect("csrf cookie cleared");
    assert_eq!(cleared.value(), "");
    assert!(
        find_cookie(&cookies, "_authgate").is_none(),
        "no session on CSRF failure"
    );
    let body = body_string(response).await;
    assert!(body.contains("Permission Denied"), "body: {body}");
}

#[tokio::test]
async fn callback_without_csrf_cookie_is_denied() {
    let h = harness(BASE_CONFIG);
    let (_csrf, state_param) = start_flow(&h, "/dashboard").await;

    let request = get(&format!(
        "/oauth2/callback?code={GOOD_CODE}&state={state_param}"
    ));
    let response = call(&h.state, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(find_cookie(&set_cookies(&response), "_authgate").is_none());
}

#[tokio::test]
async fn provider_error_short_circuits_before_redemption() {
    let h = harness(BASE_CONFIG);
    let response = call(
        &h.state,
        get("/oauth2/callback?error=access_denied&state=N:/x"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        h.provider.redeemed.load(Ordering::SeqCst),
        0,
        "no redemption call may be made on provider error"
    );
    let body = body_string(response).await;
    assert!(body.contains("access_denied"));
}

#[tokio::test]
async fn malformed_state_is_an_internal_error() {
    let h = harness(BASE_CONFIG);
    let ((csrf_name, csrf_value), _) = start_flow(&h, "/dashboard").await;
    let mut request = get(&format!(
        "/oauth2/callback?code={GOOD_CODE}&state=no-delimiter"
    ));
    request
        .headers_mut()
        .insert(COOKIE, cookie_header(&[(&csrf_name, &csrf_value)]));
    let response = call(&h.state, request).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn unsafe_redirect_in_state_collapses_to_root() {
    let h = harness(BASE_CONFIG);
    // state nonce:redirect where redirect is an open-redirect attempt;
    // craft the flow with rd targeting the attack.
    let ((csrf_name, csrf_value), state_param) = start_flow(&h, "//evil.com").await;
    // /start already collapsed the invalid target
    assert!(state_param.ends_with(":/"), "state was {state_param}");

    let mut request = get(&format!(
        "/oauth2/callback?code={GOOD_CODE}&state={state_param}"
    ));
    request
        .headers_mut()
        .insert(COOKIE, cookie_header(&[(&csrf_name, &csrf_value)]));
    let response = call(&h.state, request).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn cross_domain_redirect_requires_whitelist() {
    let h = harness(BASE_CONFIG);
    let (_, state_param) = start_flow(&h, "https://app.example.com:8443/x").await;
    assert!(state_param.ends_with(":https://app.example.com:8443/x"));

    let (_, state_param) = start_flow(&h, "https://evil.com/").await;
    assert!(state_param.ends_with(":/"));
}

#[tokio::test]
async fn group_rejection_is_permission_denied() {
    let mut provider = StubProvider::returning("a", "a@b");
    provider.rejected_email = Some("a@b".to_string());
    let h = harness_with(BASE_CONFIG, provider);

    let ((csrf_name, csrf_value), state_param) = start_flow(&h, "/dashboard").await;
    let mut request = get(&format!(
        "/oauth2/callback?code={GOOD_CODE}&state={state_param}"
    ));
    request
        .headers_mut()
        .insert(COOKIE, cookie_header(&[(&csrf_name, &csrf_value)]));
    let response = call(&h.state, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(find_cookie(&set_cookies(&response), "_authgate").is_none());
}

#[tokio::test]
async fn failed_redemption_is_an_internal_error() {
    let h = harness(BASE_CONFIG);
    let ((csrf_name, csrf_value), state_param) = start_flow(&h, "/dashboard").await;
    let mut request = get(&format!("/oauth2/callback?code=BAD&state={state_param}"));
    request
        .headers_mut()
        .insert(COOKIE, cookie_header(&[(&csrf_name, &csrf_value)]));
    let response = call(&h.state, request).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_string(response).await;
    assert!(body.contains("Internal Error"));
}

#[tokio::test]
async fn sign_out_clears_session_and_redirects() {
    let h = harness(BASE_CONFIG);
    let (name, value) = session_cookie_pair(&h.state, &authenticated_session("u", "u@b")).await;

    let mut request = get("/oauth2/sign_out?rd=/bye");
    request
        .headers_mut()
        .insert(COOKIE, cookie_header(&[(&name, &value)]));
    let response = call(&h.state, request).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/bye");
    let cookies = set_cookies(&response);
    let cleared = find_cookie(&cookies, "_authgate").expect("session cookie cleared");
    assert_eq!(cleared.value(), "");
}

#[tokio::test]
async fn sign_in_page_renders_provider_button() {
    let h = harness(BASE_CONFIG);
    let response = call(&h.state, get("/oauth2/sign_in?rd=/app")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Sign in with Stub"));
    assert!(body.contains("/oauth2/start?rd=%2Fapp"));
    assert!(!body.contains("password"), "no htpasswd form configured");
}

fn htpasswd_config(user: &str, password: &str) -> String {
    let hash = bcrypt::hash(password, 4).unwrap();
    let path = std::env::temp_dir().join(format!("authgate_it_htpasswd_{user}.txt"));
    std::fs::write(&path, format!("{user}:{hash}\n")).unwrap();
    format!(
        "{BASE_CONFIG}\nhtpasswd_file = \"{}\"\n",
        path.display()
    )
}

#[tokio::test]
async fn manual_sign_in_mints_user_only_session() {
    let h = harness(&htpasswd_config("alice", "s3cret"));
    let request = Request::builder()
        .method("POST")
        .uri("/oauth2/sign_in")
        .header(axum::http::header::HOST, "app.example.com")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("username=alice&password=s3cret&rd=/app"))
        .unwrap();
    let response = call(&h.state, request).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/app");
    let cookies = set_cookies(&response);
    assert!(find_cookie(&cookies, "_authgate").is_some());
}

#[tokio::test]
async fn manual_sign_in_rejects_bad_password() {
    let h = harness(&htpasswd_config("bob", "s3cret"));
    let request = Request::builder()
        .method("POST")
        .uri("/oauth2/sign_in")
        .header(axum::http::header::HOST, "app.example.com")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("username=bob&password=wrong&rd=/app"))
        .unwrap();
    let response = call(&h.state, request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(find_cookie(&set_cookies(&response), "_authgate").is_none());
}

#[tokio::test]
async fn no_cache_headers_on_proxy_prefixed_paths() {
    let h = harness(BASE_CONFIG);
    let response = call(&h.state, get("/oauth2/sign_in")).await;
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("no-cache, no-store, must-revalidate, max-age=0")
    );
    assert_eq!(
        response
            .headers()
            .get("expires")
            .and_then(|v| v.to_str().ok()),
        Some("Thu, 01 Jan 1970 00:00:00 GMT")
    );
    assert_eq!(
        response
            .headers()
            .get("x-accel-expires")
            .and_then(|v| v.to_str().ok()),
        Some("0")
    );

    // the auth subrequest endpoint is exempt
    let response = call(&h.state, get("/oauth2/auth")).await;
    assert!(response.headers().get("x-accel-expires").is_none());
}
