//! Shared harness for the integration suite: stub provider and upstream,
//! state assembly from a TOML snippet, and oneshot request helpers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{HOST, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use chrono::{Duration, Utc};
use tower::ServiceExt as _;
use url::Url;

use authgate::auth::bearer::JwtVerifier;
use authgate::auth::{BasicLoader, BearerLoader, Chain, Htpasswd, SessionLoader, StoredLoader};
use authgate::config::Config;
use authgate::gate::Gate;
use authgate::http::{AppState, build_router};
use authgate::options::Options;
use authgate::provider::{Provider, ProviderError};
use authgate::session::{CookieSessionStore, Session, SessionStore};
use authgate::upstream::{Upstream, UpstreamError};

pub const GOOD_CODE: &str = "GOOD";

/// Provider stub: redeems `GOOD` for a canned session and records how often
/// redemption was attempted.
pub struct StubProvider {
    pub session: Session,
    pub redeemed: AtomicUsize,
    pub rejected_email: Option<String>,
}

impl StubProvider {
    pub fn returning(user: &str, email: &str) -> Self {
        let mut session = Session::new(Duration::hours(1));
        session.user = user.to_string();
        session.email = email.to_string();
        session.access_token = "stub-access-token".to_string();
        session.id_token = "stub-id-token".to_string();
        Self {
            session,
            redeemed: AtomicUsize::new(0),
            rejected_email: None,
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn display_name(&self) -> &str {
        "Stub"
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
    ) -> Result<Url, ProviderError> {
        Url::parse_with_params(
            "https://provider.test/authorize",
            &[
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("nonce", nonce),
            ],
        )
        .map_err(|e| ProviderError::Config(e.to_string()))
    }

    async fn redeem(&self, _redirect_uri: &str, code: &str) -> Result<Session, ProviderError> {
        self.redeemed.fetch_add(1, Ordering::SeqCst);
        if code == GOOD_CODE {
            Ok(self.session.clone())
        } else {
            Err(ProviderError::Redeem("unknown code".to_string()))
        }
    }

    fn validate_group(&self, email: &str) -> bool {
        self.rejected_email.as_deref() != Some(email)
    }
}

/// Upstream stub: records forwarded requests and answers 200.
#[derive(Default)]
pub struct RecordingUpstream {
    pub requests: Mutex<Vec<(String, HeaderMap)>>,
}

impl RecordingUpstream {
    pub fn last_request(&self) -> (String, HeaderMap) {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("upstream was not reached")
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Upstream for RecordingUpstream {
    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let path = req.uri().path().to_string();
        let headers = req.headers().clone();
        self.requests.lock().unwrap().push((path, headers));
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("x-upstream", "1")
            .body(Body::from("upstream response"))
            .expect("static response builds"))
    }
}

pub struct Harness {
    pub state: AppState,
    pub provider: Arc<StubProvider>,
    pub upstream: Arc<RecordingUpstream>,
}

/// Assembles an `AppState` exactly like the server bootstrap does, with the
/// stub provider and upstream injected.
pub fn harness_with(config_toml: &str, provider: StubProvider) -> Harness {
    let cfg: Config = toml::from_str(config_toml).expect("test config parses");
    let options = Arc::new(Options::from_config(&cfg).expect("test options resolve"));
    let gate = Arc::new(Gate::from_config(&cfg.auth).expect("test gate resolves"));
    let provider = Arc::new(provider);
    let upstream = Arc::new(RecordingUpstream::default());
    let upstream_dyn: Arc<dyn Upstream> = upstream.clone();
    let store: Arc<dyn SessionStore> = Arc::new(CookieSessionStore::new(options.cookie.clone()));

    let htpasswd = cfg.auth.htpasswd_file.as_ref().map(|path| {
        let content = std::fs::read_to_string(path).expect("htpasswd file readable");
        Arc::new(Htpasswd::from_content(&content).expect("htpasswd content valid"))
    });

    let provider_dyn: Arc<dyn Provider> = provider.clone();
    let mut loaders: Vec<Box<dyn SessionLoader>> = Vec::new();
    if !cfg.jwt_issuers.is_empty() {
        let verifiers = cfg
            .jwt_issuers
            .iter()
            .map(|issuer| JwtVerifier::from_config(issuer).expect("verifier builds"))
            .collect();
        loaders.push(Box::new(BearerLoader::new(verifiers, provider_dyn.clone())));
    }
    if let Some(htpasswd) = &htpasswd {
        loaders.push(Box::new(BasicLoader::new(
            htpasswd.clone(),
            options.cookie.session_lifetime(),
        )));
    }
    loaders.push(Box::new(StoredLoader::new(
        store.clone(),
        provider_dyn.clone(),
        options.clone(),
    )));

    let state = AppState {
        options,
        provider: provider_dyn,
        store,
        chain: Arc::new(Chain::new(loaders)),
        gate,
        upstream: upstream_dyn,
        htpasswd,
    };

    Harness {
        state,
        provider,
        upstream,
    }
}

pub fn harness(config_toml: &str) -> Harness {
    harness_with(config_toml, StubProvider::returning("a", "a@b"))
}

pub const BASE_CONFIG: &str = r#"
[upstream]
url = "http://upstream.internal"

[cookie]
domains = ["example.com"]

[auth]
whitelist_domains = [".example.com:*"]
"#;

/// Sends a request through a freshly built router for `state`, injecting the
/// transport remote address the way a real listener would.
pub async fn call(state: &AppState, mut req: Request<Body>) -> Response<Body> {
    req.extensions_mut().insert(ConnectInfo(SocketAddr::from((
        [127, 0, 0, 1],
        40000,
    ))));
    build_router(state.clone())
        .oneshot(req)
        .await
        .expect("router is infallible")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(HOST, "app.example.com")
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// All `Set-Cookie` values on a response, parsed.
pub fn set_cookies(response: &Response<Body>) -> Vec<cookie::Cookie<'static>> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| {
            cookie::Cookie::parse(value.to_str().unwrap().to_string())
                .expect("response cookies parse")
        })
        .collect()
}

pub fn find_cookie<'a>(
    cookies: &'a [cookie::Cookie<'static>],
    name: &str,
) -> Option<&'a cookie::Cookie<'static>> {
    cookies.iter().find(|c| c.name() == name)
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(axum::http::header::LOCATION)
        .expect("redirect carries Location")
        .to_str()
        .unwrap()
        .to_string()
}

/// Serializes cookies into a request `Cookie` header value.
pub fn cookie_header(pairs: &[(&str, &str)]) -> HeaderValue {
    let joined = pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ");
    HeaderValue::from_str(&joined).unwrap()
}

/// Persists `session` through the state's own store and returns the request
/// cookie pair that will load it back.
pub async fn session_cookie_pair(state: &AppState, session: &Session) -> (String, String) {
    let mut headers = HeaderMap::new();
    headers.insert(HOST, HeaderValue::from_static("app.example.com"));
    let cookie = state
        .store
        .save(&headers, session)
        .await
        .expect("session persists");
    (cookie.name().to_string(), cookie.value().to_string())
}

pub fn authenticated_session(user: &str, email: &str) -> Session {
    let mut session = Session::new(Duration::hours(1));
    session.user = user.to_string();
    session.email = email.to_string();
    session.access_token = "stored-access-token".to_string();
    session.id_token = "stored-id-token".to_string();
    session.created_on = Utc::now();
    session
}
