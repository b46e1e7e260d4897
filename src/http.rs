//! Operational HTTP surface: `GET /health`.

use crate::resilience::health::{self, HealthReport};
use crate::resilience::BreakerRegistry;
use crate::Result;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Router exposing breaker health. Always answers 200; degradation is
/// reported in the body.
pub fn router(registry: Arc<BreakerRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(registry)
}

async fn health_check(State(registry): State<Arc<BreakerRegistry>>) -> Json<HealthReport> {
    Json(health::report(&registry))
}

/// Serve [`router`] on `listener` until `shutdown` resolves.
pub async fn serve<S>(listener: TcpListener, registry: Arc<BreakerRegistry>, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "health endpoint listening");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
