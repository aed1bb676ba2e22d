//! State assembly, router construction and server startup.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, COOKIE, EXPIRES};
use axum::http::{HeaderName, HeaderValue, Request};
use axum::middleware::{self as ax_middleware, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Router, body::Body};
use eyre::WrapErr as _;
use tokio::{net, signal};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt as _, request_id::MakeRequestUuid, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;

use crate::auth::{BasicLoader, BearerLoader, Chain, Htpasswd, StoredLoader, bearer::JwtVerifier};
use crate::config::{self, Config};
use crate::gate::Gate;
use crate::http::{endpoints, oauth, proxy};
use crate::options::Options;
use crate::provider::{NullProvider, OidcProvider, Provider};
use crate::session::{CookieSessionStore, SessionStore};
use crate::upstream::{ReqwestUpstream, Upstream};

const X_ACCEL_EXPIRES: HeaderName = HeaderName::from_static("x-accel-expires");

/// Application state shared across request handlers. Everything inside is
/// immutable or internally synchronized; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub options: Arc<Options>,
    pub provider: Arc<dyn Provider>,
    pub store: Arc<dyn SessionStore>,
    pub chain: Arc<Chain>,
    pub gate: Arc<Gate>,
    pub upstream: Arc<dyn Upstream>,
    pub htpasswd: Option<Arc<Htpasswd>>,
}

/// Builds the full application state from configuration: resolved options,
/// provider discovery, credential stores and the loader chain. Any
/// configuration error aborts startup here.
pub async fn build_state(cfg: &Config) -> eyre::Result<AppState> {
    let options = Arc::new(Options::from_config(cfg)?);
    let gate = Arc::new(Gate::from_config(&cfg.auth)?);

    let provider: Arc<dyn Provider> = match &cfg.oidc {
        Some(oidc_cfg) => Arc::new(
            OidcProvider::discover(oidc_cfg, options.cookie.session_lifetime())
                .await
                .wrap_err("Failed to set up OIDC provider")?,
        ),
        None => {
            info!("no OIDC provider configured; browser login flow disabled");
            Arc::new(NullProvider)
        }
    };

    let htpasswd = match &cfg.auth.htpasswd_file {
        Some(path) => Some(Arc::new(
            Htpasswd::load(Path::new(path))
                .await
                .wrap_err("Failed to load htpasswd file")?,
        )),
        None => None,
    };

    let store: Arc<dyn SessionStore> = Arc::new(CookieSessionStore::new(options.cookie.clone()));

    let chain = build_chain(cfg, &options, &provider, &store, htpasswd.as_ref())?;

    let upstream: Arc<dyn Upstream> = Arc::new(ReqwestUpstream::new(options.upstream_url.clone())?);

    Ok(AppState {
        options,
        provider,
        store,
        chain: Arc::new(chain),
        gate,
        upstream,
        htpasswd,
    })
}

/// Loader order is part of the contract: bearer JWT, then Basic, then the
/// stored session.
fn build_chain(
    cfg: &Config,
    options: &Arc<Options>,
    provider: &Arc<dyn Provider>,
    store: &Arc<dyn SessionStore>,
    htpasswd: Option<&Arc<Htpasswd>>,
) -> eyre::Result<Chain> {
    let mut loaders: Vec<Box<dyn crate::auth::SessionLoader>> = Vec::new();
    if !cfg.jwt_issuers.is_empty() {
        let verifiers = cfg
            .jwt_issuers
            .iter()
            .map(JwtVerifier::from_config)
            .collect::<eyre::Result<Vec<_>>>()?;
        loaders.push(Box::new(BearerLoader::new(verifiers, provider.clone())));
    }
    if let Some(htpasswd) = htpasswd {
        loaders.push(Box::new(BasicLoader::new(
            htpasswd.clone(),
            options.cookie.session_lifetime(),
        )));
    }
    loaders.push(Box::new(StoredLoader::new(
        store.clone(),
        provider.clone(),
        options.clone(),
    )));
    Ok(Chain::new(loaders))
}

/// Routes for the proxy's own endpoints plus the authenticated-proxy
/// fallback.
///
/// Proxy-prefixed responses get the no-cache header triplet; the
/// `<prefix>/auth` subrequest endpoint is exempt so external proxies may
/// cache its verdicts.
pub fn build_router(state: AppState) -> Router {
    let prefix = &state.options.proxy_prefix;
    let no_cache = {
        let prefix = prefix.clone();
        let auth_path = state.options.prefixed("/auth");
        move |req: Request<Body>, next: Next| {
            let prefix = prefix.clone();
            let auth_path = auth_path.clone();
            async move {
                let path = req.uri().path().to_owned();
                let mut response: Response = next.run(req).await;
                if path.starts_with(&prefix) && path != auth_path {
                    let headers = response.headers_mut();
                    headers.insert(
                        EXPIRES,
                        HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"),
                    );
                    headers.insert(
                        CACHE_CONTROL,
                        HeaderValue::from_static(
                            "no-cache, no-store, must-revalidate, max-age=0",
                        ),
                    );
                    headers.insert(X_ACCEL_EXPIRES, HeaderValue::from_static("0"));
                }
                response
            }
        }
    };

    Router::new()
        .route("/robots.txt", get(endpoints::robots))
        .route(
            &state.options.prefixed("/sign_in"),
            get(oauth::sign_in).post(oauth::sign_in_post),
        )
        .route(&state.options.prefixed("/sign_out"), get(oauth::sign_out))
        .route(&state.options.prefixed("/start"), get(oauth::start))
        .route(&state.options.prefixed("/callback"), get(oauth::callback))
        .route(&state.options.prefixed("/auth"), get(endpoints::auth_only))
        .route(
            &state.options.prefixed("/userinfo"),
            get(endpoints::user_info),
        )
        .fallback(proxy::handle)
        .layer(ax_middleware::from_fn(no_cache))
        .with_state(state)
}

/// The deployable service: router plus the shared middleware stack.
pub fn create_app(state: AppState) -> IntoMakeServiceWithConnectInfo<Router, SocketAddr> {
    let middleware_stack = ServiceBuilder::new()
        .sensitive_headers([AUTHORIZATION, COOKIE])
        .set_x_request_id(MakeRequestUuid)
        .propagate_x_request_id()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    build_router(state)
        .layer(middleware_stack)
        .into_make_service_with_connect_info::<SocketAddr>()
}

/// Resolves when a shutdown signal is received.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to create SIGTERM signal handler");
        let _ = sigterm.recv().await;
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Loads configuration, builds state and serves until shutdown.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, a collaborator
/// fails to initialize, or the listener cannot bind.
pub async fn start(
    config_path: &Path,
    port_override: Option<u16>,
    bind_override: Option<&str>,
) -> eyre::Result<()> {
    let cfg = config::load(config_path).await?;

    let listen_port = port_override.unwrap_or(cfg.server.port);
    let bind_str = bind_override.unwrap_or(&cfg.server.bind);
    let listen_ip: IpAddr = bind_str
        .parse()
        .wrap_err_with(|| format!("invalid bind address {bind_str:?}"))?;
    let addr = SocketAddr::from((listen_ip, listen_port));

    let state = build_state(&cfg).await?;
    let app = create_app(state);

    info!("Listening on http://{}", addr);
    let listener = net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);
    tokio::select! {
        res = server => res?,
        () = shutdown_signal() => {
            info!("Received shutdown, shutting down");
        }
    }
    Ok(())
}
