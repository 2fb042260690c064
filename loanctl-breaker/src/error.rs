use loanctl_core::PartnerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("origination blocked: breaker tripped globally")]
    GlobalTrip,
    #[error("origination blocked for partner {0}: breaker tripped for this partner")]
    PartnerTrip(PartnerId),
    #[error(transparent)]
    Store(#[from] loanctl_store::StoreError),
}
