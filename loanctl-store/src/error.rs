use thiserror::Error;

/// Storage-layer errors, in the same spirit as a sled-backed store's error
/// enum: I/O failures are distinguished from (de)serialization failures, and
/// a `Conflict` variant carries the unique-constraint violations the rest of
/// the workspace relies on for idempotency (duplicate `actionKey`, duplicate
/// `idempotencyKey`, duplicate `(nonce, source)`, duplicate `(entryId,
/// hourBucket)`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
