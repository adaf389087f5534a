//! Forwarding to the single upstream.
//!
//! # Responsibilities
//! - Rewrite the request target onto the upstream base URL (http or https)
//! - Set Host, User-Agent and X-Forwarded-Host for the upstream
//! - Strip hop-by-hop headers in both directions
//! - Map connection failures to 502 and deadline expiry to 504

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{self, HeaderName, InvalidHeaderValue},
        uri::{Authority, InvalidUri, Scheme},
        HeaderMap, HeaderValue, StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls::{crypto::ring, ClientConfig, RootCertStore};
use thiserror::Error;
use url::{Position, Url};

use crate::config::UpstreamConfig;

const USER_AGENT: &str = concat!("chaos-proxy/", env!("CARGO_PKG_VERSION"));

static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

/// Upstream URL could not be turned into a forwarding target.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("upstream URL {0:?} has no host")]
    MissingHost(String),

    #[error("invalid upstream scheme or authority: {0}")]
    Uri(#[from] InvalidUri),

    #[error("invalid upstream host header: {0}")]
    HostHeader(#[from] InvalidHeaderValue),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),
}

/// Forwards requests to one fixed upstream.
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    scheme: Scheme,
    authority: Authority,
    host_header: HeaderValue,
    base_path: String,
    base_query: Option<String>,
    timeout: Duration,
}

impl UpstreamForwarder {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ForwardError> {
        let url = Url::parse(&config.url)?;
        if url.host_str().is_none() {
            return Err(ForwardError::MissingHost(config.url.clone()));
        }

        let scheme: Scheme = url.scheme().parse()?;
        let authority: Authority = url[Position::BeforeHost..Position::AfterPort].parse()?;
        let host_header = HeaderValue::from_str(authority.as_str())?;

        let client = Client::builder(TokioExecutor::new()).build(https_connector()?);

        Ok(Self {
            client,
            scheme,
            authority,
            host_header,
            base_path: url.path().to_string(),
            base_query: url.query().map(str::to_string),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Absolute upstream URI for an inbound request target.
    pub fn upstream_uri(&self, uri: &Uri) -> Result<Uri, axum::http::Error> {
        let path = join_path(&self.base_path, uri.path());
        let path_and_query = match merge_query(self.base_query.as_deref(), uri.query()) {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }

    pub async fn forward(&self, request: Request) -> Response {
        let (mut parts, body) = request.into_parts();

        let uri = match self.upstream_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(uri = %parts.uri, error = %e, "Cannot map request target onto upstream");
                return (StatusCode::BAD_REQUEST, "Invalid request target").into_response();
            }
        };

        let original_host = parts.headers.get(header::HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });

        strip_hop_by_hop(&mut parts.headers);
        parts.headers.insert(header::HOST, self.host_header.clone());
        parts
            .headers
            .insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        if let Some(host) = original_host {
            parts.headers.insert(X_FORWARDED_HOST.clone(), host);
        }
        parts.uri = uri;
        // The upstream client speaks HTTP/1.1 regardless of the inbound protocol.
        parts.version = Version::HTTP_11;

        tracing::debug!(upstream = %parts.uri, method = %parts.method, "Proxying request");

        let upstream_request = Request::from_parts(parts, body);
        match tokio::time::timeout(self.timeout, self.client.request(upstream_request)).await {
            Ok(Ok(response)) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Upstream error");
                (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "Upstream timed out");
                (StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out").into_response()
            }
        }
    }
}

/// Connector for both schemes. Trusts the platform's root certificates.
fn https_connector() -> Result<HttpsConnector<HttpConnector>, ForwardError> {
    let builder = match HttpsConnectorBuilder::new().with_provider_and_native_roots(ring::default_provider()) {
        Ok(builder) => builder,
        Err(e) => {
            // Plain http upstreams still work; https ones will fail verification.
            tracing::warn!(error = %e, "No native root certificates loaded");
            let tls = ClientConfig::builder_with_provider(ring::default_provider().into())
                .with_safe_default_protocol_versions()?
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth();
            HttpsConnectorBuilder::new().with_tls_config(tls)
        }
    };

    Ok(builder.https_or_http().enable_http1().build())
}

/// Innermost handler: hands the request to the upstream.
pub async fn proxy_handler(
    State(upstream): State<UpstreamForwarder>,
    request: Request,
) -> Response {
    upstream.forward(request).await
}

/// Join two paths with exactly one slash between them.
pub fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Combine the upstream's own query with the request's.
pub fn merge_query(base: Option<&str>, request: Option<&str>) -> Option<String> {
    match (base.filter(|q| !q.is_empty()), request.filter(|q| !q.is_empty())) {
        (Some(base), Some(request)) => Some(format!("{base}&{request}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
