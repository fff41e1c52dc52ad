//! Lightweight admin HTTP server spawner
//!
//! Runs a caller-supplied router on its own thread and runtime, so it keeps
//! serving regardless of how the main process schedules its own work.
//! `/healthz` is always mounted.

use std::thread;

use axum::{routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::types::Health;

async fn healthz() -> Json<Health> {
    Json(Health::ok())
}

/// Attach `/healthz` and request tracing to the given router.
pub fn with_health(router: Router) -> Router {
    router
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
}

/// Spawn an admin HTTP server exposing `/healthz` plus the caller's routes.
pub fn spawn_admin_server(addr: &str, router: Router) -> thread::JoinHandle<anyhow::Result<()>> {
    let addr = addr.to_string();
    thread::spawn(move || {
        let rt = Builder::new_multi_thread().enable_all().build()?;
        rt.block_on(async move {
            let listener = TcpListener::bind(&addr).await.map_err(|e| {
                error!(%addr, error = %e, "admin bind failed");
                anyhow::anyhow!("bind admin {addr}: {e}")
            })?;
            info!(%addr, "admin server listening");
            axum::serve(listener, with_health(router)).await?;
            Ok(())
        })
    })
}
