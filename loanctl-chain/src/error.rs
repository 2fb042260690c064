use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] loanctl_store::StoreError),
    #[error(transparent)]
    Nonce(#[from] crate::nonce::NonceError),
    #[error(transparent)]
    Sender(#[from] crate::chain_sender::ChainSenderError),
    #[error("gas ceiling exceeded: {0}")]
    GasCeiling(String),
    #[error("action already enqueued under key {0}")]
    DuplicateActionKey(String),
    #[error("action {0} not found")]
    ActionNotFound(String),
    #[error("action {0} cannot be requeued from its current state")]
    RequeueNotAllowed(String),
}
