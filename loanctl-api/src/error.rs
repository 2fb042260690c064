//! Uniform JSON error responses for the admin API (spec §7), mirroring the
//! reference's split between error classification (`ErrorKind`) and HTTP
//! serialisation (`build_json_response`): one serialisable error type, one
//! `IntoResponse` impl, every collaborator error converts into it.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use loanctl_core::{CoreError, ErrorKind, ToHttpStatus};

pub struct ApiError(pub CoreError);

impl ApiError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self(CoreError::new(kind, msg))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.to_http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

impl From<loanctl_store::StoreError> for ApiError {
    fn from(e: loanctl_store::StoreError) -> Self {
        Self::new(ErrorKind::Unknown, e.to_string())
    }
}

impl From<loanctl_chain::PipelineError> for ApiError {
    fn from(e: loanctl_chain::PipelineError) -> Self {
        Self::new(ErrorKind::Unknown, e.to_string())
    }
}

impl From<loanctl_breaker::BreakerError> for ApiError {
    fn from(e: loanctl_breaker::BreakerError) -> Self {
        use loanctl_breaker::BreakerError::*;
        match e {
            GlobalTrip | PartnerTrip(_) => Self::new(ErrorKind::LogicalOnChain, e.to_string()),
            Store(err) => Self::new(ErrorKind::Unknown, err.to_string()),
        }
    }
}

impl From<loanctl_ledger::LedgerError> for ApiError {
    fn from(e: loanctl_ledger::LedgerError) -> Self {
        Self::new(ErrorKind::Integrity, e.to_string())
    }
}
