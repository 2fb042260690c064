//! Default `ChainSender` wired by `run` when no production RPC client is
//! configured. The contract treats chain connectivity as pluggable and
//! explicitly out of this crate's scope (the core talks to it only through
//! `ChainSender`); this implementation simulates submission and mining
//! in-process so `loanctl run` is demonstrable end to end without a real
//! chain, the same role the pipeline's own test doubles play in `pipeline.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use loanctl_chain::chain_sender::{BumpResult, ChainReceipt, ChainSenderError, FeeEstimate, ReceiptStatus, SendResult};
use loanctl_chain::ChainSender;
use loanctl_core::ids::random_hex_id;
use loanctl_core::ActionId;
use loanctl_store::ActionPayload;

pub struct PaperChainSender {
    next_nonce: AtomicU64,
    receipts: Mutex<std::collections::HashMap<String, ChainReceipt>>,
}

impl PaperChainSender {
    pub fn new() -> Self {
        Self { next_nonce: AtomicU64::new(0), receipts: Mutex::new(std::collections::HashMap::new()) }
    }

    fn record_mined(&self, tx_hash: String, block_number: u64) {
        self.receipts.lock().unwrap().insert(
            tx_hash.clone(),
            ChainReceipt { tx_hash, block_number, gas_used: 21_000, status: ReceiptStatus::Success, revert_reason: None, loan_contract: None },
        );
    }
}

impl Default for PaperChainSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainSender for PaperChainSender {
    async fn pending_nonce(&self, _signer: &str) -> Result<u64, ChainSenderError> {
        Ok(self.next_nonce.load(Ordering::SeqCst))
    }

    async fn estimate_fees(&self) -> Result<FeeEstimate, ChainSenderError> {
        Ok(FeeEstimate { max_fee_per_gas: Some(30_000_000_000), max_priority_fee_per_gas: Some(1_000_000_000), gas_price: None })
    }

    async fn estimate_gas_limit(&self, _payload: &ActionPayload) -> Result<u64, ChainSenderError> {
        Ok(150_000)
    }

    async fn send_action(
        &self,
        _id: &ActionId,
        _payload: &ActionPayload,
        nonce: u64,
        _fees: &FeeEstimate,
        _gas_limit: u64,
    ) -> Result<SendResult, ChainSenderError> {
        self.next_nonce.fetch_max(nonce + 1, Ordering::SeqCst);
        let tx_hash = random_hex_id("0xpaper");
        self.record_mined(tx_hash.clone(), nonce + 1);
        Ok(SendResult { tx_hash, nonce })
    }

    async fn bump_and_replace(
        &self,
        _payload: &ActionPayload,
        nonce: u64,
        _fees: &FeeEstimate,
        _gas_limit: u64,
    ) -> Result<BumpResult, ChainSenderError> {
        let tx_hash = random_hex_id("0xpaperbump");
        self.record_mined(tx_hash.clone(), nonce + 1);
        Ok(BumpResult { tx_hash })
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<ChainReceipt>, ChainSenderError> {
        Ok(self.receipts.lock().unwrap().get(tx_hash).cloned())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
