//! Reference directive backend.
//!
//! # Responsibilities
//! - Answer every directive fetch with a JSON directive document
//! - Geo lookup: `geo` cookie, else first octet of X-Forwarded-For
//!   (`192` → UK, anything else → US)
//! - Sticky A/B membership: `ab` cookie, else presence of `X-In-AB`
//! - Ask for the cookies to be set on delivery when the client lacks them
//! - Tag every request with an `x-request-id` and echo it back

use std::future::Future;
use std::time::Duration;

use axum::{
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Json},
    routing::any,
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;

/// IP assumed when the request carries no X-Forwarded-For.
const DEFAULT_CLIENT_IP: &str = "10.1.1.1";

/// Directive document in the shape the interpreter consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveDocument {
    pub vcl_recv: Vec<String>,
    pub vcl_deliver: Vec<String>,
}

/// HTTP server for the reference directive backend.
pub struct DirectiveServer {
    router: Router,
}

impl DirectiveServer {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            router: Self::build_router(config),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig) -> Router {
        Router::new()
            .route("/", any(directive_handler))
            .route("/{*path}", any(directive_handler))
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until Ctrl+C.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        self.run_until(listener, shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Directive server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Directive server stopped");
        Ok(())
    }
}

async fn directive_handler(method: Method, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
    let forwarded_url = header(&headers, "x-forwarded-url").unwrap_or("-");
    tracing::debug!(method = %method, path = %uri.path(), forwarded_url = %forwarded_url, "Directive request");
    Json(directives_for(&headers))
}

/// Compute the directive document for one forwarded client request.
pub fn directives_for(headers: &HeaderMap) -> DirectiveDocument {
    let mut doc = DirectiveDocument::default();

    let geo = match cookie(headers, "geo") {
        Some(geo) => geo,
        None => {
            let ip = header(headers, "x-forwarded-for").unwrap_or(DEFAULT_CLIENT_IP);
            let geo = geo_for_ip(ip).to_string();
            doc.vcl_deliver.push(format!("Set-Cookie: geo={geo}"));
            geo
        }
    };
    doc.vcl_recv.push(format!("X-Geo: {geo}"));
    doc.vcl_recv.push("X-Vary: X-Geo".to_string());

    let ab = match cookie(headers, "ab") {
        Some(ab) => ab,
        None => {
            let ab = if headers.contains_key("x-in-ab") { "1" } else { "0" };
            doc.vcl_deliver.push(format!("Set-Cookie: ab={ab}"));
            ab.to_string()
        }
    };
    doc.vcl_recv.push(format!("X-Ab: {ab}"));
    doc.vcl_recv.push("Vary: X-Ab".to_string());

    doc
}

fn geo_for_ip(forwarded_for: &str) -> &'static str {
    let client = forwarded_for.split(',').next().unwrap_or_default().trim();
    match client.split('.').next() {
        Some("192") => "UK",
        _ => "US",
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Value of one cookie across every Cookie header, `;`-separated.
fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
