//! Forwarding to the upstream application.
//!
//! The shipped transport rewrites the request onto the configured base URL
//! with reqwest and streams the upstream response back. Hop-by-hop headers
//! are scrubbed in both directions.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::HOST;
use axum::http::{HeaderMap, HeaderName, Request, Response};
use eyre::WrapErr as _;
use reqwest::redirect::Policy;
use thiserror::Error;
use url::Url;

/// Cap on buffered request bodies; upstream responses stream and are not
/// subject to it.
const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 8] = [
    HeaderName::from_static("connection"),
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-authenticate"),
    HeaderName::from_static("proxy-authorization"),
    HeaderName::from_static("te"),
    HeaderName::from_static("trailer"),
    HeaderName::from_static("transfer-encoding"),
    HeaderName::from_static("upgrade"),
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid proxied request: {0}")]
    Request(String),
}

/// The upstream transport collaborator.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, UpstreamError>;
}

pub struct ReqwestUpstream {
    base: Url,
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new(base: Url) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .wrap_err("failed to build upstream HTTP client")?;
        Ok(Self { base, client })
    }

    fn target_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(query);
        url
    }
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let (parts, body) = req.into_parts();
        let url = self.target_url(parts.uri.path(), parts.uri.query());

        let mut headers = parts.headers;
        strip_hop_headers(&mut headers);
        headers.remove(HOST);

        let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        tracing::debug!(method = %parts.method, url = %url, "forwarding to upstream");
        let upstream_response = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream_response.status();
        let response_headers: Vec<_> = upstream_response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let mut builder = Response::builder().status(status);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in response_headers {
                headers.append(name, value);
            }
        }
        builder
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| UpstreamError::Request(e.to_string()))
    }
}
