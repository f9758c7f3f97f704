//! Liveness endpoint: every request gets the current time as plain text.
use anyhow::{Context, Result};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Router;
use chrono::{DateTime, SecondsFormat, Utc};
use std::future::Future;
use tracing::info;

pub fn router() -> Router {
    Router::new().fallback(ping)
}

async fn ping() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], iso_timestamp(Utc::now()))
}

/// `2026-10-18T12:00:00.000Z`
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn serve(port: u16, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, "Server running");
    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown)
        .await
        .context("liveness server failed")
}
