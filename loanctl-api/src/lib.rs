//! HTTP surface: webhook ingress plus the operator admin API (spec §6).
//! Router composition and middleware layering follow the reference's
//! `common/src/api/server.rs` shape — per-domain router builders merged
//! into one `Router`, wrapped in a `ServiceBuilder` stack, served with a
//! graceful-shutdown-aware future — reduced to what this surface needs:
//! no mTLS, no SGX attestation, just tracing, backpressure, and a timeout.

pub mod admin;
pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod state;
pub mod webhooks;

use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use loanctl_core::task::ShutdownChannel;
use loanctl_core::ErrorKind;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Webhook ingress, rate-limited per spec §6 (120 req/min), unauthenticated
/// beyond the HMAC signature `webhooks::verify_and_parse` checks per-request.
fn webhook_router(state: AppState) -> Router {
    let limiter = rate_limit::webhook_limiter();
    Router::new()
        .route("/webhooks/:provider/disbursement", post(webhooks::disbursement))
        .route("/webhooks/:provider/repayment", post(webhooks::repayment))
        .layer(middleware::from_fn_with_state(limiter, rate_limit::enforce))
        .with_state(state)
}

/// Every route here sits behind `auth::require_admin_key`.
fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/ops/reconciliation", get(admin::reconciliation_report))
        .route("/admin/ops/chain-actions/:id/requeue", post(admin::requeue_action))
        .route("/admin/breaker/status", get(admin::breaker_status))
        .route("/admin/breaker/overrides", get(admin::breaker_overrides))
        .route("/admin/breaker/incidents", get(admin::list_incidents))
        .route("/admin/breaker/incidents/:id/resolve", post(admin::resolve_incident))
        .route("/admin/partners/:id", get(admin::partner_status))
        .route("/admin/health", get(admin::health))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_admin_key))
        .with_state(state)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(webhook_router(state.clone()))
        .merge(admin_router(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(|error: tower::BoxError| async move {
                    ApiError::new(ErrorKind::Unknown, format!("service unavailable: {error}"))
                }))
                .layer(tower::load_shed::LoadShedLayer::new())
                .layer(tower::limit::ConcurrencyLimitLayer::new(256))
                .timeout(REQUEST_TIMEOUT),
        )
}

/// Binds and serves `router` until `shutdown.recv()` resolves, then stops
/// accepting new connections and lets in-flight requests drain.
pub async fn serve(addr: std::net::SocketAddr, router: Router, mut shutdown: ShutdownChannel) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "loanctl-api listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.recv().await;
            info!("loanctl-api shutting down gracefully");
        })
        .await?;
    Ok(())
}
