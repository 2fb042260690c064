//! The error taxonomy from the error-handling design: transient-on-chain,
//! logical-on-chain, fiat-provider, validation, integrity, and configuration
//! errors each map onto one [`ErrorKind`] variant. `ErrorKind` is the
//! serialisable shape that crosses the admin HTTP boundary; everything else
//! (pipeline loops, webhook ingress) converts to a state transition instead
//! of propagating an error past its boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The wire shape for every admin-API error response. Mirrors the
/// single-struct error response used by production Rust HTTP services: one
/// serialisable type, everything else converts to/from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub msg: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, msg: msg.into() }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for CoreError {}

/// Error taxonomy from the error-handling design (§7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// nonce-too-low, replacement-underpriced, RPC timeout, connection-reset.
    TransientOnChain,
    /// execution reverted, out-of-gas.
    LogicalOnChain,
    /// invalid signature, malformed JSON, unrecognised event, stale
    /// timestamp, nonce replay.
    FiatProvider,
    /// amount mismatch, invalid schedule params, partner not ACTIVE.
    Validation,
    /// schedule-hash mismatch, accrual double-charge.
    Integrity,
    /// missing RPC url / webhook secret / private key at startup.
    Configuration,
    /// requested resource does not exist (admin lookups).
    NotFound,
    /// caller lacked a valid `x-api-key` / `x-admin-key`.
    Unauthorized,
    /// caught-all for anything not otherwise classified.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransientOnChain => "transient_on_chain",
            ErrorKind::LogicalOnChain => "logical_on_chain",
            ErrorKind::FiatProvider => "fiat_provider",
            ErrorKind::Validation => "validation",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Maps an [`ErrorKind`] to the HTTP status the admin API should return for
/// it, the same separation of concerns the reference error taxonomy uses
/// (`ToHttpStatus`) to keep classification logic out of the HTTP layer.
pub trait ToHttpStatus {
    fn to_http_status_code(&self) -> u16;
}

impl ToHttpStatus for ErrorKind {
    fn to_http_status_code(&self) -> u16 {
        match self {
            ErrorKind::TransientOnChain => 503,
            ErrorKind::LogicalOnChain => 409,
            ErrorKind::FiatProvider => 200, // webhook ingress always ACKs
            ErrorKind::Validation => 400,
            ErrorKind::Integrity => 500,
            ErrorKind::Configuration => 500,
            ErrorKind::NotFound => 404,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Unknown => 500,
        }
    }
}

impl ToHttpStatus for CoreError {
    fn to_http_status_code(&self) -> u16 {
        self.kind.to_http_status_code()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::TransientOnChain).unwrap();
        assert_eq!(json, "\"TRANSIENT_ON_CHAIN\"");
    }
}
