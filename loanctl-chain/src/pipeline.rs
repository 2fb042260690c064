//! The action pipeline (spec §4.1): three independent cooperative loops
//! (sender, receipt, stuck) driving `ChainAction` from QUEUED to MINED or
//! DLQ, plus the startup-recovery pass for crash-interrupted actions.
//!
//! Modelled on the reference's cooperative `tokio::select!` background-loop
//! pattern: each loop owns its own `tokio::time::interval` and is spawned as
//! a named, panic-propagating task that drains on a shared shutdown signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loanctl_core::task::{LoanctlTask, ShutdownChannel};
use loanctl_core::{time::now_unix, ActionId, LoanId};
use loanctl_store::{ActionPayload, ActionState, ChainAction, Store};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::chain_sender::{ChainSender, ReceiptStatus};
use crate::classifier::{self, Classification};
use crate::error::PipelineError;
use crate::gas;
use crate::nonce::NonceManager;

pub const DEFAULT_SENDER_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_RECEIPT_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_STUCK_PERIOD: Duration = Duration::from_secs(60);
const SENDER_BATCH_SIZE: usize = 25;
const RECEIPT_BATCH_SIZE: usize = 50;

/// Side effects the pipeline fans out after a receipt confirms, variant
/// tagged rather than a direct call into the loan/fiat services (design
/// notes §9): straight-line data instead of a deep callback chain.
#[derive(Clone, Debug)]
pub enum PostMineEvent {
    LoanTransitioned { loan_id: LoanId, loan_contract: String },
    FiatRecordConfirmed { loan_id: LoanId },
    FiatRepayConfirmed { loan_id: LoanId },
    ActivationConfirmed { loan_id: LoanId },
}

/// Process-lifetime counters; not used for correctness, only observability
/// (spec §3 Ownership / §9 design notes).
#[derive(Default)]
pub struct Metrics {
    pub sent: AtomicU64,
    pub mined: AtomicU64,
    pub dlq: AtomicU64,
    pub bumped: AtomicU64,
    pub nonce_conflicts: AtomicU64,
}

pub struct ActionPipeline<CS: ChainSender> {
    store: Arc<dyn Store>,
    sender: Arc<CS>,
    nonce: Arc<NonceManager>,
    events_tx: mpsc::Sender<PostMineEvent>,
    /// Read at the top of the sender loop; the one boolean shared flag the
    /// concurrency model names explicitly (spec §5).
    pause: Arc<AtomicBool>,
    pub metrics: Arc<Metrics>,
    sender_period: Duration,
    receipt_period: Duration,
    stuck_period: Duration,
}

impl<CS: ChainSender> ActionPipeline<CS> {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<CS>,
        nonce: Arc<NonceManager>,
        events_tx: mpsc::Sender<PostMineEvent>,
    ) -> Self {
        Self {
            store,
            sender,
            nonce,
            events_tx,
            pause: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(Metrics::default()),
            sender_period: DEFAULT_SENDER_PERIOD,
            receipt_period: DEFAULT_RECEIPT_PERIOD,
            stuck_period: DEFAULT_STUCK_PERIOD,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn unpause(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    /// `enqueue(loanId, type, payload, actionKey?)`. Idempotent iff
    /// `action_key` is supplied: a duplicate is a conflict the caller treats
    /// as "already enqueued".
    pub async fn enqueue(
        &self,
        loan_id: LoanId,
        payload: ActionPayload,
        action_key: Option<String>,
        confirmations_required: u32,
    ) -> Result<ActionId, PipelineError> {
        let id = ActionId::generate();
        let action = ChainAction {
            id: id.clone(),
            action_key: action_key.clone(),
            loan_id,
            payload,
            state: ActionState::Queued,
            tx_hash: None,
            nonce: None,
            bump_count: 0,
            attempts: 0,
            next_retry_at: None,
            sent_at: None,
            mined_at: None,
            dlq_at: None,
            last_error: None,
            block_number: None,
            gas_used: None,
            revert_reason: None,
            confirmations_received: 0,
            confirmations_required,
            created_at: now_unix(),
        };
        match self.store.insert_action(action).await {
            Ok(()) => Ok(id),
            Err(loanctl_store::StoreError::Conflict(msg)) => {
                Err(PipelineError::DuplicateActionKey(action_key.unwrap_or(msg)))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Whether an admin-triggered requeue of `action` is allowed: MINED is
    /// permanent, and SENT always carries a `tx_hash` (invariant i) so
    /// requeuing it would risk a second submission racing the first.
    pub fn can_requeue(action: &ChainAction) -> bool {
        !matches!(action.state, ActionState::Mined) && !(action.state == ActionState::Sent && action.tx_hash.is_some())
    }

    /// Admin replay (spec §3 invariant iii): the one path that may move an
    /// action out of a state the automatic pipeline would never revisit.
    /// Idempotent: requeuing an action already in QUEUED is a no-op write.
    pub async fn requeue_action(&self, id: &ActionId) -> Result<(), PipelineError> {
        let mut action = self
            .store
            .get_action(id)
            .await?
            .ok_or_else(|| PipelineError::ActionNotFound(id.to_string()))?;
        if !Self::can_requeue(&action) {
            return Err(PipelineError::RequeueNotAllowed(id.to_string()));
        }
        action.state = ActionState::Queued;
        action.next_retry_at = None;
        action.last_error = None;
        self.store.update_action(action).await?;
        Ok(())
    }

    /// Startup recovery (spec §4.1): re-marks crash-interrupted PROCESSING
    /// actions as QUEUED before any loop runs.
    pub async fn recover_on_startup(&self) -> Result<u64, PipelineError> {
        let n = self.store.recover_processing_actions().await?;
        if n > 0 {
            warn!(count = n, "recovered actions stuck in PROCESSING after a crash");
        }
        Ok(n)
    }

    /// Spawns the three cooperative loops as named tasks sharing one
    /// shutdown signal. Returns immediately; join the returned tasks to wait
    /// for drain.
    pub fn spawn_loops(self: Arc<Self>, mut shutdown: ShutdownChannel) -> Vec<LoanctlTask<()>>
    where
        CS: ChainSender,
    {
        let sender_loop = {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            LoanctlTask::spawn_named("pipeline-sender-loop", async move {
                let mut ticker = tokio::time::interval(this.sender_period);
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            if let Err(err) = this.run_sender_batch().await {
                                warn!(%err, "sender loop batch failed");
                            }
                        }
                    }
                }
            })
        };

        let receipt_loop = {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            LoanctlTask::spawn_named("pipeline-receipt-loop", async move {
                let mut ticker = tokio::time::interval(this.receipt_period);
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            if let Err(err) = this.run_receipt_batch().await {
                                warn!(%err, "receipt loop batch failed");
                            }
                        }
                    }
                }
            })
        };

        let stuck_loop = {
            let this = self.clone();
            LoanctlTask::spawn_named("pipeline-stuck-loop", async move {
                let mut ticker = tokio::time::interval(this.stuck_period);
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            if let Err(err) = this.run_stuck_batch().await {
                                warn!(%err, "stuck loop batch failed");
                            }
                        }
                    }
                }
            })
        };

        vec![sender_loop, receipt_loop, stuck_loop]
    }

    #[instrument(skip(self), name = "sender-loop-batch")]
    async fn run_sender_batch(&self) -> Result<(), PipelineError> {
        if self.pause.load(Ordering::SeqCst) {
            return Ok(());
        }
        let now = now_unix();
        let candidates = self.store.list_actions_by_state(ActionState::Queued, SENDER_BATCH_SIZE).await?;
        for action in candidates {
            if let Some(retry_at) = action.next_retry_at {
                if retry_at > now {
                    continue;
                }
            }
            self.process_queued_action(action).await?;
        }
        Ok(())
    }

    async fn process_queued_action(&self, mut action: ChainAction) -> Result<(), PipelineError> {
        action.state = ActionState::Processing;
        self.store.update_action(action.clone()).await?;

        // Crash-resumed action: tx_hash already present, don't resubmit.
        if action.tx_hash.is_some() {
            action.state = ActionState::Sent;
            self.store.update_action(action).await?;
            return Ok(());
        }

        let action_type = action.action_type();
        let fees = match self.sender.estimate_fees().await {
            Ok(f) => f,
            Err(err) => {
                self.handle_send_failure(action, err.to_string()).await?;
                return Ok(());
            }
        };
        let raw_gas_estimate = match self.sender.estimate_gas_limit(&action.payload).await {
            Ok(g) => g,
            Err(err) => {
                self.handle_send_failure(action, err.to_string()).await?;
                return Ok(());
            }
        };
        let gas_limit = gas::buffered_gas_limit(raw_gas_estimate);
        if let Err(reason) = gas::check_gas_ceiling(action_type, gas_limit) {
            self.fail_to_dlq(action, reason).await?;
            return Ok(());
        }

        let id = action.id.clone();
        let payload = action.payload.clone();
        let sender = self.sender.clone();
        let result = self
            .nonce
            .with_nonce(sender.as_ref(), |nonce| {
                let sender = sender.clone();
                let payload = payload.clone();
                async move { sender.send_action(&id, &payload, nonce, &fees, gas_limit).await }
            })
            .await;

        match result {
            Ok(sent) => {
                action.state = ActionState::Sent;
                action.tx_hash = Some(sent.tx_hash);
                action.nonce = Some(sent.nonce);
                action.sent_at = Some(now_unix());
                self.store.update_action(action).await?;
                self.metrics.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.handle_send_failure(action, err.to_string()).await?;
            }
        }
        Ok(())
    }

    async fn handle_send_failure(&self, action: ChainAction, error: String) -> Result<(), PipelineError> {
        if classifier::is_nonce_conflict(&error) {
            self.metrics.nonce_conflicts.fetch_add(1, Ordering::Relaxed);
            self.nonce.resync().await;
        }
        match classifier::classify(&error) {
            Classification::Retry => self.retry_action(action, error).await,
            Classification::Dlq => self.fail_to_dlq(action, error).await,
        }
    }

    async fn retry_action(&self, mut action: ChainAction, error: String) -> Result<(), PipelineError> {
        action.attempts += 1;
        action.last_error = Some(error.clone());
        if action.attempts >= loanctl_store::MAX_RETRIES {
            return self.fail_to_dlq(action, format!("max retries exceeded: {error}")).await;
        }
        let delay = loanctl_core::backoff::retry_delay(action.attempts);
        action.state = ActionState::Retrying;
        action.next_retry_at = Some(now_unix() + delay.as_secs() as i64);
        self.store.update_action(action.clone()).await?;
        // Back to QUEUED so the sender loop picks it up once `next_retry_at`
        // has passed.
        let mut requeued = action;
        requeued.state = ActionState::Queued;
        self.store.update_action(requeued).await?;
        Ok(())
    }

    async fn fail_to_dlq(&self, mut action: ChainAction, error: String) -> Result<(), PipelineError> {
        action.state = ActionState::Dlq;
        action.dlq_at = Some(now_unix());
        action.last_error = Some(error);
        self.store.update_action(action).await?;
        self.metrics.dlq.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[instrument(skip(self), name = "receipt-loop-batch")]
    async fn run_receipt_batch(&self) -> Result<(), PipelineError> {
        let sent = self.store.list_actions_by_state(ActionState::Sent, RECEIPT_BATCH_SIZE).await?;
        for action in sent {
            self.process_sent_action(action).await?;
        }
        Ok(())
    }

    async fn process_sent_action(&self, mut action: ChainAction) -> Result<(), PipelineError> {
        let Some(tx_hash) = action.tx_hash.clone() else { return Ok(()) };
        let receipt = match self.sender.get_receipt(&tx_hash).await {
            Ok(Some(r)) => r,
            Ok(None) => return Ok(()), // still pending
            Err(err) => {
                warn!(%err, %tx_hash, "get_receipt failed, will retry next tick");
                return Ok(());
            }
        };

        match receipt.status {
            ReceiptStatus::Success => {
                action.state = ActionState::Mined;
                action.mined_at = Some(now_unix());
                action.block_number = Some(receipt.block_number);
                action.gas_used = Some(receipt.gas_used);
                let action_type = action.action_type();
                let loan_id = action.loan_id.clone();
                self.store.update_action(action).await?;
                self.metrics.mined.fetch_add(1, Ordering::Relaxed);
                self.fire_post_mine_event(action_type, loan_id, receipt.loan_contract).await;
            }
            ReceiptStatus::Reverted => {
                action.state = ActionState::Failed;
                action.revert_reason = receipt.revert_reason.clone();
                let reason = receipt.revert_reason.unwrap_or_else(|| "execution reverted".to_string());
                self.store.update_action(action.clone()).await?;
                self.handle_send_failure(action, reason).await?;
            }
        }
        Ok(())
    }

    async fn fire_post_mine_event(
        &self,
        action_type: loanctl_store::ActionType,
        loan_id: LoanId,
        loan_contract: Option<String>,
    ) {
        use loanctl_store::ActionType::*;
        let event = match action_type {
            CreateLoan => loan_contract.map(|addr| PostMineEvent::LoanTransitioned { loan_id, loan_contract: addr }),
            RecordDisbursement => Some(PostMineEvent::FiatRecordConfirmed { loan_id }),
            ActivateLoan => Some(PostMineEvent::ActivationConfirmed { loan_id }),
            Repay => Some(PostMineEvent::FiatRepayConfirmed { loan_id }),
            FundLoan | RecordRepayment | ConfigureSchedule => None,
        };
        if let Some(event) = event {
            if self.events_tx.send(event).await.is_err() {
                warn!("post-mine event receiver dropped");
            }
        }
    }

    #[instrument(skip(self), name = "stuck-loop-batch")]
    async fn run_stuck_batch(&self) -> Result<(), PipelineError> {
        let threshold = now_unix() - loanctl_store::STUCK_TX_THRESHOLD_MS / 1_000;
        let stuck = self.store.list_stuck_actions(threshold).await?;
        for action in stuck {
            self.bump_stuck_action(action).await?;
        }
        Ok(())
    }

    async fn bump_stuck_action(&self, mut action: ChainAction) -> Result<(), PipelineError> {
        let Some(nonce) = action.nonce else { return Ok(()) };
        if action.bump_count >= loanctl_store::MAX_BUMP_COUNT {
            return self.fail_to_dlq(action, "bump cap exceeded".to_string()).await;
        }

        action.state = ActionState::Retrying;
        self.store.update_action(action.clone()).await?;

        let action_type = action.action_type();
        let fees = match self.sender.estimate_fees().await {
            Ok(f) => gas::bump_fees(&f),
            Err(err) => return self.handle_send_failure(action, err.to_string()).await,
        };
        let gas_limit = match self.sender.estimate_gas_limit(&action.payload).await {
            Ok(g) => gas::buffered_gas_limit(g),
            Err(err) => return self.handle_send_failure(action, err.to_string()).await,
        };
        if gas::check_gas_ceiling(action_type, gas_limit).is_err() {
            return self.fail_to_dlq(action, "gas ceiling exceeded on bump".to_string()).await;
        }

        match self.sender.bump_and_replace(&action.payload, nonce, &fees, gas_limit).await {
            Ok(bumped) => {
                action.state = ActionState::Sent;
                action.tx_hash = Some(bumped.tx_hash);
                action.bump_count += 1;
                action.sent_at = Some(now_unix());
                self.store.update_action(action).await?;
                self.metrics.bumped.fetch_add(1, Ordering::Relaxed);
                // The bump was an out-of-band submission: the nonce manager
                // must resync before its next assignment.
                self.nonce.resync().await;
                Ok(())
            }
            Err(err) => self.handle_send_failure(action, err.to_string()).await,
        }
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use loanctl_core::PartnerId;
    use loanctl_store::MemoryStore;
    use tokio::sync::mpsc;

    use super::*;
    use crate::chain_sender::{BumpResult, ChainReceipt, ChainSenderError, FeeEstimate, SendResult};

    struct AlwaysSucceedsSender;

    #[async_trait]
    impl ChainSender for AlwaysSucceedsSender {
        async fn pending_nonce(&self, _signer: &str) -> Result<u64, ChainSenderError> {
            Ok(0)
        }
        async fn estimate_fees(&self) -> Result<FeeEstimate, ChainSenderError> {
            Ok(FeeEstimate { max_fee_per_gas: Some(100), max_priority_fee_per_gas: Some(2), gas_price: None })
        }
        async fn estimate_gas_limit(&self, _payload: &ActionPayload) -> Result<u64, ChainSenderError> {
            Ok(21_000)
        }
        async fn send_action(
            &self,
            id: &ActionId,
            _payload: &ActionPayload,
            nonce: u64,
            _fees: &FeeEstimate,
            _gas_limit: u64,
        ) -> Result<SendResult, ChainSenderError> {
            Ok(SendResult { tx_hash: format!("0xtx-{id}"), nonce })
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
        async fn get_receipt(&self, tx_hash: &str) -> Result<Option<ChainReceipt>, ChainSenderError> {
            Ok(Some(ChainReceipt {
                tx_hash: tx_hash.to_string(),
                block_number: 1,
                gas_used: 21_000,
                status: ReceiptStatus::Success,
                revert_reason: None,
                loan_contract: None,
            }))
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn enqueue_then_sender_batch_marks_sent() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let sender = Arc::new(AlwaysSucceedsSender);
        let nonce = Arc::new(NonceManager::new("0xsigner", 1, store.clone()));
        let (tx, _rx) = mpsc::channel(8);
        let pipeline = ActionPipeline::new(store.clone(), sender, nonce, tx);

        let id = pipeline
            .enqueue(
                LoanId::new("loan-1"),
                ActionPayload::CreateLoan { partner_id: PartnerId::new("p1"), principal: loanctl_core::MinorUnits(1) },
                None,
                1,
            )
            .await
            .unwrap();

        pipeline.run_sender_batch().await.unwrap();
        let action = store.get_action(&id).await.unwrap().unwrap();
        assert_eq!(action.state, ActionState::Sent);
        assert!(action.tx_hash.is_some());

        pipeline.run_receipt_batch().await.unwrap();
        let action = store.get_action(&id).await.unwrap().unwrap();
        assert_eq!(action.state, ActionState::Mined);
    }

    #[tokio::test]
    async fn duplicate_action_key_is_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let sender = Arc::new(AlwaysSucceedsSender);
        let nonce = Arc::new(NonceManager::new("0xsigner", 1, store.clone()));
        let (tx, _rx) = mpsc::channel(8);
        let pipeline = ActionPipeline::new(store, sender, nonce, tx);

        let key = Some("idem-1".to_string());
        let payload = ActionPayload::FundLoan { amount: loanctl_core::MinorUnits(1) };
        pipeline.enqueue(LoanId::new("loan-1"), payload.clone(), key.clone(), 1).await.unwrap();
        let err = pipeline.enqueue(LoanId::new("loan-1"), payload, key, 1).await.unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateActionKey(_)));
    }
}
