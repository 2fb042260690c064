//! Admin-key guard. The reference gates its Lexe-operator routes with a
//! bearer-auth middleware that rejects before the handler runs; this is the
//! same shape reduced to the spec's static-key scheme (spec §7 Config):
//! every `/admin/*` call must carry a matching `x-api-key`/`x-admin-key` plus
//! an `x-operator-id`/`x-admin-subject` identifying the caller for the audit
//! log.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use loanctl_core::ErrorKind;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let key = headers
        .get("x-api-key")
        .or_else(|| headers.get("x-admin-key"))
        .and_then(|v| v.to_str().ok());
    let operator = headers
        .get("x-operator-id")
        .or_else(|| headers.get("x-admin-subject"))
        .and_then(|v| v.to_str().ok());

    let (Some(key), Some(operator)) = (key, operator) else {
        return Err(ApiError::new(ErrorKind::Unauthorized, "missing admin credentials"));
    };
    if key != state.config.admin_api_key {
        warn!(operator, "rejected admin request: bad api key");
        return Err(ApiError::new(ErrorKind::Unauthorized, "bad admin api key"));
    }

    tracing::info!(operator, path = %request.uri().path(), "admin request authorized");
    Ok(next.run(request).await)
}
