//! JSON REST API for BMS, on axum.

mod api;
mod middleware;

use std::future::Future;

use anyhow::Context;
use bms_engine::Engine;
use tokio::net::TcpListener;

pub use api::{build_app, ApiError, ApiResponse, AppState, ErrorBody, ResponseMeta};
pub use middleware::{AuthState, RequestId, USER_HEADER};

pub const CRATE_NAME: &str = "bms-web";

/// Serve the API on `0.0.0.0:<web_port>` until `shutdown` resolves.
pub async fn serve(engine: Engine, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let auth = AuthState::from_config(&engine.config)?;
    let port = engine.config.web_port;
    let app = build_app(AppState { engine }, auth);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    tracing::info!(port, "bms api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving http")?;
    Ok(())
}
