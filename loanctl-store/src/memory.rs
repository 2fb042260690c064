//! An in-memory [`Store`] implementation for tests: same transactional
//! contract (single `Mutex` guarding every table), no persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use loanctl_core::{ActionId, LoanId};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::model::*;
use crate::traits::Store;

#[derive(Default)]
struct Tables {
    actions: HashMap<ActionId, ChainAction>,
    action_keys: HashMap<String, ActionId>,
    signer_nonces: HashMap<(String, u64), SignerNonce>,
    transfers: HashMap<String, FiatTransfer>,
    transfer_idempotency: HashMap<String, String>,
    webhook_nonces: HashMap<(String, String), i64>,
    dead_letters: Vec<DeadLetter>,
    schedules: HashMap<LoanId, InstallmentSchedule>,
    entries: HashMap<String, InstallmentEntry>,
    accrual_snapshots: HashMap<(String, i64), AccrualSnapshot>,
    incidents: HashMap<String, ReconIncident>,
    reports: Vec<ReconReport>,
    settlement_checks: Vec<SettlementCheck>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { tables: Mutex::new(Tables::default()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_action(&self, action: ChainAction) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if let Some(key) = &action.action_key {
            if t.action_keys.contains_key(key) {
                return Err(StoreError::Conflict(format!("action_key {key} already enqueued")));
            }
            t.action_keys.insert(key.clone(), action.id.clone());
        }
        t.actions.insert(action.id.clone(), action);
        Ok(())
    }

    async fn get_action(&self, id: &ActionId) -> StoreResult<Option<ChainAction>> {
        Ok(self.tables.lock().await.actions.get(id).cloned())
    }

    async fn update_action(&self, action: ChainAction) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if !t.actions.contains_key(&action.id) {
            return Err(StoreError::NotFound(action.id.to_string()));
        }
        t.actions.insert(action.id.clone(), action);
        Ok(())
    }

    async fn list_actions_by_state(&self, state: ActionState, limit: usize) -> StoreResult<Vec<ChainAction>> {
        let t = self.tables.lock().await;
        let mut actions: Vec<ChainAction> =
            t.actions.values().filter(|a| a.state == state).cloned().collect();
        actions.sort_by_key(|a| a.created_at);
        actions.truncate(limit);
        Ok(actions)
    }

    async fn list_stuck_actions(&self, sent_before: i64) -> StoreResult<Vec<ChainAction>> {
        let t = self.tables.lock().await;
        Ok(t.actions
            .values()
            .filter(|a| {
                a.state == ActionState::Sent
                    && a.bump_count < MAX_BUMP_COUNT
                    && a.sent_at.is_some_and(|s| s < sent_before)
            })
            .cloned()
            .collect())
    }

    async fn recover_processing_actions(&self) -> StoreResult<u64> {
        let mut t = self.tables.lock().await;
        let mut n = 0u64;
        for action in t.actions.values_mut() {
            if action.state == ActionState::Processing {
                action.state = ActionState::Queued;
                action.next_retry_at = None;
                action.last_error = Some("reset: worker crash during PROCESSING".to_string());
                n += 1;
            }
        }
        Ok(n)
    }

    async fn get_signer_nonce(&self, signer: &str, chain_id: u64) -> StoreResult<Option<SignerNonce>> {
        Ok(self.tables.lock().await.signer_nonces.get(&(signer.to_string(), chain_id)).cloned())
    }

    async fn put_signer_nonce(&self, record: SignerNonce) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        t.signer_nonces.insert((record.signer.clone(), record.chain_id), record);
        Ok(())
    }

    async fn insert_transfer(&self, transfer: FiatTransfer) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if t.transfer_idempotency.contains_key(&transfer.idempotency_key) {
            return Err(StoreError::Conflict(format!(
                "idempotency_key {} already used",
                transfer.idempotency_key
            )));
        }
        t.transfer_idempotency.insert(transfer.idempotency_key.clone(), transfer.id.clone());
        t.transfers.insert(transfer.id.clone(), transfer);
        Ok(())
    }

    async fn update_transfer(&self, transfer: FiatTransfer) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if !t.transfers.contains_key(&transfer.id) {
            return Err(StoreError::NotFound(transfer.id));
        }
        t.transfers.insert(transfer.id.clone(), transfer);
        Ok(())
    }

    async fn get_transfer_by_idempotency_key(&self, key: &str) -> StoreResult<Option<FiatTransfer>> {
        let t = self.tables.lock().await;
        Ok(t.transfer_idempotency.get(key).and_then(|id| t.transfers.get(id)).cloned())
    }

    async fn latest_transfer(
        &self,
        loan_id: &LoanId,
        direction: TransferDirection,
    ) -> StoreResult<Option<FiatTransfer>> {
        let t = self.tables.lock().await;
        Ok(t.transfers
            .values()
            .filter(|tr| &tr.loan_id == loan_id && tr.direction == direction)
            .max_by_key(|tr| tr.webhook_timestamp)
            .cloned())
    }

    async fn list_transfers_for_loan(&self, loan_id: &LoanId) -> StoreResult<Vec<FiatTransfer>> {
        let t = self.tables.lock().await;
        Ok(t.transfers.values().filter(|tr| &tr.loan_id == loan_id).cloned().collect())
    }

    async fn claim_webhook_nonce(&self, source: &str, nonce: &str, now: i64) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        let key = (source.to_string(), nonce.to_string());
        if t.webhook_nonces.contains_key(&key) {
            return Ok(false);
        }
        t.webhook_nonces.insert(key, now);
        Ok(true)
    }

    async fn purge_expired_webhook_nonces(&self, older_than: i64) -> StoreResult<u64> {
        let mut t = self.tables.lock().await;
        let before = t.webhook_nonces.len();
        t.webhook_nonces.retain(|_, claimed_at| *claimed_at >= older_than);
        Ok((before - t.webhook_nonces.len()) as u64)
    }

    async fn insert_dead_letter(&self, dead_letter: DeadLetter) -> StoreResult<()> {
        self.tables.lock().await.dead_letters.push(dead_letter);
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> StoreResult<Vec<DeadLetter>> {
        let t = self.tables.lock().await;
        let mut v = t.dead_letters.clone();
        v.sort_by_key(|d| std::cmp::Reverse(d.created_at));
        v.truncate(limit);
        Ok(v)
    }

    async fn put_schedule(&self, schedule: InstallmentSchedule) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        t.schedules.insert(schedule.loan_id.clone(), schedule);
        Ok(())
    }

    async fn get_schedule(&self, loan_id: &LoanId) -> StoreResult<Option<InstallmentSchedule>> {
        Ok(self.tables.lock().await.schedules.get(loan_id).cloned())
    }

    async fn list_schedules(&self) -> StoreResult<Vec<InstallmentSchedule>> {
        Ok(self.tables.lock().await.schedules.values().cloned().collect())
    }

    async fn put_entries(&self, entries: Vec<InstallmentEntry>) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        for entry in entries {
            t.entries.insert(entry.entry_id(), entry);
        }
        Ok(())
    }

    async fn update_entry(&self, entry: InstallmentEntry) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        t.entries.insert(entry.entry_id(), entry);
        Ok(())
    }

    async fn list_entries_for_loan(&self, loan_id: &LoanId) -> StoreResult<Vec<InstallmentEntry>> {
        let t = self.tables.lock().await;
        let mut v: Vec<InstallmentEntry> =
            t.entries.values().filter(|e| &e.loan_id == loan_id).cloned().collect();
        v.sort_by_key(|e| e.installment_index);
        Ok(v)
    }

    async fn insert_accrual_snapshot_if_absent(&self, snapshot: AccrualSnapshot) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        let key = (snapshot.entry_id.clone(), snapshot.hour_bucket);
        if t.accrual_snapshots.contains_key(&key) {
            return Ok(false);
        }
        t.accrual_snapshots.insert(key, snapshot);
        Ok(true)
    }

    async fn list_accrual_snapshots_for_entry(&self, entry_id: &str) -> StoreResult<Vec<AccrualSnapshot>> {
        let t = self.tables.lock().await;
        Ok(t.accrual_snapshots
            .values()
            .filter(|s| s.entry_id == entry_id)
            .cloned()
            .collect())
    }

    async fn insert_incident(&self, incident: ReconIncident) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        t.incidents.insert(incident.id.clone(), incident);
        Ok(())
    }

    async fn resolve_incident(&self, id: &str, resolved_at: i64) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        let incident = t.incidents.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        incident.resolved_at = Some(resolved_at);
        Ok(())
    }

    async fn list_open_incidents(&self) -> StoreResult<Vec<ReconIncident>> {
        let t = self.tables.lock().await;
        Ok(t.incidents.values().filter(|i| i.resolved_at.is_none()).cloned().collect())
    }

    async fn insert_report(&self, report: ReconReport) -> StoreResult<()> {
        self.tables.lock().await.reports.push(report);
        Ok(())
    }

    async fn insert_settlement_check(&self, check: SettlementCheck) -> StoreResult<()> {
        self.tables.lock().await.settlement_checks.push(check);
        Ok(())
    }

    async fn list_loan_ids_with_schedule(&self) -> StoreResult<Vec<LoanId>> {
        Ok(self.tables.lock().await.schedules.keys().cloned().collect())
    }
}
