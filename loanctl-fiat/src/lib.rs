//! The fiat side of the control plane (spec §4.2): webhook verification and
//! the two `FiatTransfer` state machines (disbursement, repayment) that keep
//! off-chain money movement and on-chain loan state in lockstep.

pub mod disbursement;
pub mod error;
pub mod repayment;
pub mod webhook;

pub use error::{FiatError, WebhookError};
