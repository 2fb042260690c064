use async_trait::async_trait;
use loanctl_core::{ActionId, LoanId};

use crate::error::StoreResult;
use crate::model::*;

/// The durable store abstraction (spec §2.1 / §3 Ownership): the single
/// source of truth for every entity in the data model, with ACID semantics
/// and unique-constraint-backed idempotency keys. Every mutating method here
/// is expected to be a single transactional read-modify-write; callers never
/// hold a row across an `.await` boundary outside of a single call.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // --- ChainAction --- //

    /// Inserts a new action. If `action_key` is `Some` and already claimed,
    /// returns `StoreError::Conflict` — callers treat this as "already
    /// enqueued" (spec §4.1).
    async fn insert_action(&self, action: ChainAction) -> StoreResult<()>;

    async fn get_action(&self, id: &ActionId) -> StoreResult<Option<ChainAction>>;

    async fn update_action(&self, action: ChainAction) -> StoreResult<()>;

    /// Actions in `state`, ordered by `created_at` ascending, oldest first;
    /// used by the three pipeline loops to pick work.
    async fn list_actions_by_state(
        &self,
        state: ActionState,
        limit: usize,
    ) -> StoreResult<Vec<ChainAction>>;

    /// `SENT` actions older than `sent_before`, for the stuck loop.
    async fn list_stuck_actions(&self, sent_before: i64) -> StoreResult<Vec<ChainAction>>;

    /// Startup recovery: every action left in `PROCESSING` from a prior
    /// crash, atomically re-marked `QUEUED`.
    async fn recover_processing_actions(&self) -> StoreResult<u64>;

    // --- SignerNonce --- //

    async fn get_signer_nonce(&self, signer: &str, chain_id: u64) -> StoreResult<Option<SignerNonce>>;

    async fn put_signer_nonce(&self, record: SignerNonce) -> StoreResult<()>;

    // --- FiatTransfer --- //

    /// Inserts a transfer, enforcing the unique `idempotency_key` index.
    async fn insert_transfer(&self, transfer: FiatTransfer) -> StoreResult<()>;

    async fn update_transfer(&self, transfer: FiatTransfer) -> StoreResult<()>;

    async fn get_transfer_by_idempotency_key(&self, key: &str) -> StoreResult<Option<FiatTransfer>>;

    /// The most recently created transfer for `loan_id` in `direction`, used
    /// by `onRecordDisbursementConfirmed` / `onActivateLoanConfirmed`.
    async fn latest_transfer(
        &self,
        loan_id: &LoanId,
        direction: TransferDirection,
    ) -> StoreResult<Option<FiatTransfer>>;

    async fn list_transfers_for_loan(&self, loan_id: &LoanId) -> StoreResult<Vec<FiatTransfer>>;

    // --- WebhookNonce --- //

    /// Atomically claims `(source, nonce)`. Returns `Ok(true)` on first
    /// claim, `Ok(false)` if already claimed (replay).
    async fn claim_webhook_nonce(&self, source: &str, nonce: &str, now: i64) -> StoreResult<bool>;

    /// Deletes claims older than the TTL; purely a space-reclamation job.
    async fn purge_expired_webhook_nonces(&self, older_than: i64) -> StoreResult<u64>;

    // --- DeadLetter --- //

    async fn insert_dead_letter(&self, dead_letter: DeadLetter) -> StoreResult<()>;

    async fn list_dead_letters(&self, limit: usize) -> StoreResult<Vec<DeadLetter>>;

    // --- InstallmentSchedule / InstallmentEntry --- //

    async fn put_schedule(&self, schedule: InstallmentSchedule) -> StoreResult<()>;

    async fn get_schedule(&self, loan_id: &LoanId) -> StoreResult<Option<InstallmentSchedule>>;

    async fn list_schedules(&self) -> StoreResult<Vec<InstallmentSchedule>>;

    async fn put_entries(&self, entries: Vec<InstallmentEntry>) -> StoreResult<()>;

    async fn update_entry(&self, entry: InstallmentEntry) -> StoreResult<()>;

    async fn list_entries_for_loan(&self, loan_id: &LoanId) -> StoreResult<Vec<InstallmentEntry>>;

    // --- AccrualSnapshot --- //

    /// Inserts the snapshot iff `(entry_id, hour_bucket)` is unseen. Returns
    /// `Ok(true)` if inserted, `Ok(false)` if it already existed
    /// (idempotency, spec §4.4).
    async fn insert_accrual_snapshot_if_absent(&self, snapshot: AccrualSnapshot) -> StoreResult<bool>;

    async fn list_accrual_snapshots_for_entry(&self, entry_id: &str) -> StoreResult<Vec<AccrualSnapshot>>;

    // --- Reconciliation / Settlement --- //

    async fn insert_incident(&self, incident: ReconIncident) -> StoreResult<()>;

    async fn resolve_incident(&self, id: &str, resolved_at: i64) -> StoreResult<()>;

    async fn list_open_incidents(&self) -> StoreResult<Vec<ReconIncident>>;

    async fn insert_report(&self, report: ReconReport) -> StoreResult<()>;

    async fn insert_settlement_check(&self, check: SettlementCheck) -> StoreResult<()>;

    /// Every loan that currently has a schedule, i.e. is in scope for the
    /// ACTIVE-loan batch jobs (accrual, reconciliation, settlement).
    async fn list_loan_ids_with_schedule(&self) -> StoreResult<Vec<LoanId>>;
}
