use thiserror::Error;

/// Webhook-ingress errors (spec §7 Fiat-provider taxonomy). Every variant
/// here becomes a dead-letter row plus a provider-ACK; none of them ever
/// propagate past the controller (spec §7 Propagation policy).
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unrecognised event type: {0}")]
    UnrecognisedEvent(String),
    #[error("stale timestamp: {0}")]
    StaleTimestamp(i64),
    #[error("replayed (source={src}, nonce={nonce})")]
    Replay { src: String, nonce: String },
}

/// State-machine errors (spec §7 Validation taxonomy): raised synchronously
/// to the caller and logged, never silently swallowed.
#[derive(Debug, Error)]
pub enum FiatError {
    #[error("amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: String, actual: String },
    #[error("transfer already exists for idempotency key {0}")]
    DuplicateIdempotencyKey(String),
    #[error("no transfer found for loan in expected state")]
    NoTransferInExpectedState,
    #[error(transparent)]
    Store(#[from] loanctl_store::StoreError),
    #[error(transparent)]
    Pipeline(#[from] loanctl_chain::PipelineError),
}
