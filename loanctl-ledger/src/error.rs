use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("installment_count must be >= 1")]
    EmptySchedule,
    #[error("interval_seconds must be > 0")]
    NonPositiveInterval,
    #[error("interest_rate_bps must be in 0..=100000, got {0}")]
    RateOutOfRange(u32),
    #[error("schedule hash mismatch for loan {loan_id}: stored {stored}, recomputed {recomputed}")]
    HashIntegrity { loan_id: String, stored: String, recomputed: String },
    #[error(transparent)]
    Store(#[from] loanctl_store::StoreError),
    #[error(transparent)]
    Pipeline(#[from] loanctl_chain::PipelineError),
    #[error(transparent)]
    Breaker(#[from] loanctl_breaker::BreakerError),
    #[error("canonical json encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
