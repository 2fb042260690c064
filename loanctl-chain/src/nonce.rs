//! Nonce manager (spec §4.1.1): serializes nonce assignment for a single
//! signer so the mempool never sees a gap or a duplicate.

use std::sync::Arc;

use loanctl_store::{SignerNonce, Store};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chain_sender::{ChainSender, ChainSenderError};

/// Reconciliation aborts startup if `|rpc - db| > ABORT_THRESHOLD` — an
/// operator needs to look at it (spec §5).
const RECONCILE_ABORT_THRESHOLD: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("nonce reconciliation diverged too far: rpc={rpc} db={db}, diff > {threshold}")]
    ReconciliationDiverged { rpc: u64, db: u64, threshold: i64 },
    #[error(transparent)]
    Sender(#[from] ChainSenderError),
    #[error(transparent)]
    Store(#[from] loanctl_store::StoreError),
}

/// Owns the single in-memory "next nonce" for one (signer, chainId) pair.
/// The in-memory value is authoritatively reconstructable from the store —
/// it is the one piece of shared mutable state the spec explicitly calls out
/// as living outside the durable store (spec §3 Ownership).
pub struct NonceManager {
    signer: String,
    chain_id: u64,
    store: Arc<dyn Store>,
    /// Guards both the critical section (FIFO queueing of `with_nonce`
    /// callers) and the next-nonce value itself.
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    pub fn new(signer: impl Into<String>, chain_id: u64, store: Arc<dyn Store>) -> Self {
        Self { signer: signer.into(), chain_id, store, next: Mutex::new(None) }
    }

    /// Startup reconciliation: compare the provider's pending count to the
    /// durable record, adopt `max(rpc, db)` within tolerance, else demand an
    /// operator.
    pub async fn reconcile_at_startup(
        &self,
        sender: &dyn ChainSender,
    ) -> Result<(), NonceError> {
        let rpc = sender.pending_nonce(&self.signer).await?;
        let db = self
            .store
            .get_signer_nonce(&self.signer, self.chain_id)
            .await?
            .map(|r| r.nonce)
            .unwrap_or(rpc);

        let diff = (rpc as i64 - db as i64).abs();
        if diff > RECONCILE_ABORT_THRESHOLD {
            return Err(NonceError::ReconciliationDiverged {
                rpc,
                db,
                threshold: RECONCILE_ABORT_THRESHOLD,
            });
        }

        let adopted = rpc.max(db);
        info!(signer = %self.signer, rpc, db, adopted, "nonce reconciled at startup");
        self.store
            .put_signer_nonce(SignerNonce { signer: self.signer.clone(), chain_id: self.chain_id, nonce: adopted })
            .await?;
        *self.next.lock().await = Some(adopted);
        Ok(())
    }

    /// `resync()`: clears the in-memory next-nonce so the following call
    /// re-reads from the provider. Callers must invoke this after any
    /// out-of-band submission such as a bump.
    pub async fn resync(&self) {
        *self.next.lock().await = None;
    }

    async fn load_next(&self, sender: &dyn ChainSender) -> Result<u64, NonceError> {
        let mut guard = self.next.lock().await;
        if let Some(n) = *guard {
            return Ok(n);
        }
        let db = self.store.get_signer_nonce(&self.signer, self.chain_id).await?;
        let n = match db {
            Some(record) => record.nonce,
            None => sender.pending_nonce(&self.signer).await?,
        };
        *guard = Some(n);
        Ok(n)
    }

    /// Runs `send_fn` with the next nonce held for its exclusive use.
    /// Commits `current + 1` on success; rolls back to `current` on failure
    /// so the next caller reuses the same value (invariant: nonce
    /// uniqueness and rollback, spec §8 properties 1-2).
    pub async fn with_nonce<T, E, F, Fut>(
        &self,
        sender: &dyn ChainSender,
        send_fn: F,
    ) -> Result<T, NonceError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        // Holding the mutex across the whole call (init + send_fn) is what
        // gives FIFO, at-most-one-in-flight semantics: the next waiter can't
        // even read a nonce value until this one fully commits or rolls back.
        let mut guard = self.next.lock().await;
        let current = match *guard {
            Some(n) => n,
            None => {
                drop(guard);
                let n = self.load_next(sender).await?;
                guard = self.next.lock().await;
                n
            }
        };

        match send_fn(current).await {
            Ok(value) => {
                let next = current + 1;
                *guard = Some(next);
                drop(guard);
                self.store
                    .put_signer_nonce(SignerNonce {
                        signer: self.signer.clone(),
                        chain_id: self.chain_id,
                        nonce: next,
                    })
                    .await?;
                Ok(value)
            }
            Err(err) => {
                warn!(signer = %self.signer, nonce = current, %err, "send_fn rejected, rolling back nonce");
                // Leave `*guard` at `current`: the next caller reuses it.
                Err(NonceError::Sender(ChainSenderError::Transient(err.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use loanctl_core::ActionId;
    use loanctl_store::{ActionPayload, MemoryStore};

    use super::*;
    use crate::chain_sender::{BumpResult, ChainReceipt, FeeEstimate, SendResult};

    struct StubSender {
        pending: u64,
    }

    #[async_trait]
    impl ChainSender for StubSender {
        async fn pending_nonce(&self, _signer: &str) -> Result<u64, ChainSenderError> {
            Ok(self.pending)
        }
        async fn estimate_fees(&self) -> Result<FeeEstimate, ChainSenderError> {
            unimplemented!()
        }
        async fn estimate_gas_limit(&self, _payload: &ActionPayload) -> Result<u64, ChainSenderError> {
            unimplemented!()
        }
        async fn send_action(
            &self,
            _id: &ActionId,
            _payload: &ActionPayload,
            _nonce: u64,
            _fees: &FeeEstimate,
            _gas_limit: u64,
        ) -> Result<SendResult, ChainSenderError> {
            unimplemented!()
        }
        async fn bump_and_replace(
            &self,
            _payload: &ActionPayload,
            _nonce: u64,
            _fees: &FeeEstimate,
            _gas_limit: u64,
        ) -> Result<BumpResult, ChainSenderError> {
            unimplemented!()
        }
        async fn get_receipt(&self, _tx_hash: &str) -> Result<Option<ChainReceipt>, ChainSenderError> {
            unimplemented!()
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn rollback_reuses_nonce() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let manager = NonceManager::new("0xabc", 1, store);
        let sender = StubSender { pending: 5 };

        let first = manager.with_nonce(&sender, |n| async move { Err::<(), _>(format!("rpc down at {n}")) }).await;
        assert!(first.is_err());

        let second_nonce = AtomicU64::new(0);
        manager
            .with_nonce(&sender, |n| {
                second_nonce.store(n, Ordering::SeqCst);
                async move { Ok::<(), String>(()) }
            })
            .await
            .unwrap();
        assert_eq!(second_nonce.load(Ordering::SeqCst), 5);

        let third_nonce = AtomicU64::new(0);
        manager
            .with_nonce(&sender, |n| {
                third_nonce.store(n, Ordering::SeqCst);
                async move { Ok::<(), String>(()) }
            })
            .await
            .unwrap();
        assert_eq!(third_nonce.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn concurrent_calls_produce_gap_free_nonces() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let manager = Arc::new(NonceManager::new("0xabc", 1, store));
        let sender = Arc::new(StubSender { pending: 10 });

        let mut handles = Vec::new();
        let observed = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..100 {
            let manager = manager.clone();
            let sender = sender.clone();
            let observed = observed.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .with_nonce(sender.as_ref(), |n| {
                        let observed = observed.clone();
                        async move {
                            observed.lock().await.push(n);
                            Ok::<(), String>(())
                        }
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let mut nonces = observed.lock().await.clone();
        nonces.sort();
        let expected: Vec<u64> = (10..110).collect();
        assert_eq!(nonces, expected);
    }
}
