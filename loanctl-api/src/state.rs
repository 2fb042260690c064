//! Shared state handed to every handler, assembled once at startup by the
//! `loanctl` bin crate and cloned (all fields are `Arc`) into each request.

use std::collections::HashMap;
use std::sync::Arc;

use loanctl_breaker::CircuitBreaker;
use loanctl_chain::ActionEnqueuer;
use loanctl_ledger::reconciliation::OnchainPrincipalSource;
use loanctl_store::Store;

/// Configuration pulled in at startup (spec §7 Configuration taxonomy: a
/// missing entry here is a fail-fast condition in the bin crate, never an
/// HTTP-layer concern).
pub struct ApiConfig {
    /// Checked against the `x-api-key` / `x-admin-key` header on every
    /// `/admin/*` route.
    pub admin_api_key: String,
    /// Per-provider HMAC secret, keyed by the `<provider>` path segment.
    pub webhook_secrets: HashMap<String, Vec<u8>>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub enqueuer: Arc<dyn ActionEnqueuer>,
    pub breaker: Arc<dyn CircuitBreaker>,
    pub principal_source: Arc<dyn OnchainPrincipalSource>,
    pub config: Arc<ApiConfig>,
}
