//! The narrow `ChainSender` capability (spec §6): the only surface through
//! which the pipeline touches the underlying on-chain RPC. The core never
//! couples to a specific chain client; production wires in a real
//! implementation, tests wire in [`MockChainSender`].

use async_trait::async_trait;
use loanctl_core::ActionId;
use loanctl_store::ActionPayload;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Clone, Debug)]
pub struct ChainReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub status: ReceiptStatus,
    pub revert_reason: Option<String>,
    pub loan_contract: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FeeEstimate {
    /// EIP-1559 fields, preferred when the provider supports them.
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    /// Legacy fallback.
    pub gas_price: Option<u128>,
}

#[derive(Clone, Debug)]
pub struct SendResult {
    pub tx_hash: String,
    pub nonce: u64,
}

#[derive(Clone, Debug)]
pub struct BumpResult {
    pub tx_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainSenderError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Logical(String),
}

/// The capability surface the pipeline consumes. `send_action` and
/// `bump_and_replace` take the already-assigned `nonce`; gas ceiling
/// enforcement happens in the caller (`GasStrategy`), not here.
#[async_trait]
pub trait ChainSender: Send + Sync + 'static {
    async fn pending_nonce(&self, signer: &str) -> Result<u64, ChainSenderError>;

    async fn estimate_fees(&self) -> Result<FeeEstimate, ChainSenderError>;

    async fn estimate_gas_limit(&self, payload: &ActionPayload) -> Result<u64, ChainSenderError>;

    async fn send_action(
        &self,
        id: &ActionId,
        payload: &ActionPayload,
        nonce: u64,
        fees: &FeeEstimate,
        gas_limit: u64,
    ) -> Result<SendResult, ChainSenderError>;

    async fn bump_and_replace(
        &self,
        payload: &ActionPayload,
        nonce: u64,
        fees: &FeeEstimate,
        gas_limit: u64,
    ) -> Result<BumpResult, ChainSenderError>;

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<ChainReceipt>, ChainSenderError>;

    async fn is_healthy(&self) -> bool;
}
