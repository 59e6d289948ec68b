//! # HTTP-01 Responder
//!
//! The program run inside each solver Pod. It answers the CA's probe on
//! `/.well-known/acme-challenge/<token>` with the key authorization, and
//! only for the one domain and token it was started with.
//!
//! Routes:
//! - `GET /.well-known/acme-challenge/{token}` - key authorization as `text/plain`
//! - `GET /healthz` - readiness and liveness probe
//!
//! Everything else, including a matching path requested for another host,
//! is a 404.

use crate::solver::{ACME_CHALLENGE_PATH_PREFIX, SOLVER_HEALTH_PATH};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// The single challenge one responder serves
#[derive(Clone)]
pub struct ChallengeResponse {
    pub domain: String,
    pub token: String,
    pub key: String,
}

impl std::fmt::Debug for ChallengeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeResponse")
            .field("domain", &self.domain)
            .field("token", &self.token)
            .field("key", &"***")
            .finish()
    }
}

impl ChallengeResponse {
    /// True when `host` (optionally with a port) names the served domain
    #[must_use]
    pub fn serves_host(&self, host: &str) -> bool {
        strip_port(host).eq_ignore_ascii_case(&self.domain)
    }
}

/// Drop a trailing `:port`, leaving bracketed IPv6 literals intact
fn strip_port(host: &str) -> &str {
    if let Some(end) = host.strip_prefix('[').and_then(|rest| rest.find(']')) {
        return &host[..end + 2];
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

pub fn router(challenge: ChallengeResponse) -> Router {
    let route = format!("{ACME_CHALLENGE_PATH_PREFIX}{{token}}");
    Router::new()
        .route(&route, get(challenge_handler))
        .route(SOLVER_HEALTH_PATH, get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(challenge))
}

/// Bind and serve until the process is stopped
pub async fn serve(port: u16, challenge: ChallengeResponse) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!(
        "Serving HTTP-01 challenge for {} on {}",
        challenge.domain, addr
    );

    axum::serve(listener, router(challenge)).await?;
    Ok(())
}

async fn challenge_handler(
    State(challenge): State<Arc<ChallengeResponse>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> impl IntoResponse {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| uri.host())
        .unwrap_or_default();

    if !challenge.serves_host(host) {
        debug!("Rejecting challenge request for host {:?}", host);
        return (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "text/plain")], String::new());
    }
    if token != challenge.token {
        debug!("Rejecting challenge request for unknown token");
        return (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "text/plain")], String::new());
    }

    info!("Served key authorization for {}", challenge.domain);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        challenge.key.clone(),
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}
