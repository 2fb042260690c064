//! Per-endpoint rate limiting for webhook ingress (spec §6: "120 req/min per
//! endpoint"). The reference has no rate-limiting layer of its own — its
//! `LayerConfig` stops at load-shed/buffer/concurrency/timeout — so this is
//! an enrichment crate (`governor`, the standard token-bucket limiter for
//! `tower`/`axum` services) applied in the same `ServiceBuilder` position the
//! reference reserves for backpressure middleware.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{Quota, RateLimiter};
use http::StatusCode;
use nonzero_governor::per_minute;

pub type EndpointLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// 120 requests/min, matching the spec's webhook-ingress cap.
pub fn webhook_limiter() -> Arc<EndpointLimiter> {
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute(120))))
}

/// Rejects with a plain 429; webhook ingress's "always ACK 200" rule applies
/// to *processing* outcomes (bad signature, stale timestamp, replay), not to
/// transport-level throttling.
pub async fn enforce(State(limiter): State<Arc<EndpointLimiter>>, request: Request, next: Next) -> Response {
    if limiter.check().is_err() {
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }
    next.run(request).await
}

mod nonzero_governor {
    use std::num::NonZeroU32;

    pub fn per_minute(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).expect("rate limit quota must be nonzero")
    }
}
