//! The installment engine: schedule generation, delinquency classification,
//! hourly accrual, and the reconciliation/integrity/report batch jobs that
//! keep the backend ledger honest against its own hash commitments and the
//! chain (spec §4.3, §4.4, §4.6).

pub mod accrual;
pub mod breaker_feed;
pub mod delinquency;
pub mod error;
pub mod reconciliation;
pub mod report;
pub mod schedule;

pub use error::LedgerError;
