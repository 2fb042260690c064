//! Embedded, transactional store backend, adapted from a sled-based
//! `StateDb` pattern found elsewhere in the example pool: one named
//! [`sled::Tree`] per entity, [`bincode`] for row encoding, and separate
//! index trees backing the unique-constraint idempotency keys the rest of
//! the workspace depends on.

use async_trait::async_trait;
use loanctl_core::{ActionId, LoanId};
use sled::{Db, Tree};

use crate::error::{StoreError, StoreResult};
use crate::model::*;
use crate::traits::Store;

pub struct SledStore {
    _db: Db,
    actions: Tree,
    action_keys: Tree,
    signer_nonces: Tree,
    transfers: Tree,
    transfer_idempotency: Tree,
    webhook_nonces: Tree,
    dead_letters: Tree,
    schedules: Tree,
    entries: Tree,
    accrual_snapshots: Tree,
    incidents: Tree,
    reports: Tree,
    settlement_checks: Tree,
}

fn ser<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn de<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let open_tree = |name: &str| -> StoreResult<Tree> {
            db.open_tree(name).map_err(|e| StoreError::Backend(e.to_string()))
        };
        Ok(Self {
            actions: open_tree("actions")?,
            action_keys: open_tree("action_keys")?,
            signer_nonces: open_tree("signer_nonces")?,
            transfers: open_tree("transfers")?,
            transfer_idempotency: open_tree("transfer_idempotency")?,
            webhook_nonces: open_tree("webhook_nonces")?,
            dead_letters: open_tree("dead_letters")?,
            schedules: open_tree("schedules")?,
            entries: open_tree("entries")?,
            accrual_snapshots: open_tree("accrual_snapshots")?,
            incidents: open_tree("incidents")?,
            reports: open_tree("reports")?,
            settlement_checks: open_tree("settlement_checks")?,
            _db: db,
        })
    }

    fn iter_values<T: serde::de::DeserializeOwned>(tree: &Tree) -> StoreResult<Vec<T>> {
        tree.iter()
            .values()
            .map(|res| {
                let bytes = res.map_err(|e| StoreError::Backend(e.to_string()))?;
                de(&bytes)
            })
            .collect()
    }
}

#[async_trait]
impl Store for SledStore {
    async fn insert_action(&self, action: ChainAction) -> StoreResult<()> {
        if let Some(key) = &action.action_key {
            let ok = self
                .action_keys
                .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(action.id.as_str().as_bytes()))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if ok.is_err() {
                return Err(StoreError::Conflict(format!("action_key {key} already enqueued")));
            }
        }
        self.actions
            .insert(action.id.as_str().as_bytes(), ser(&action)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_action(&self, id: &ActionId) -> StoreResult<Option<ChainAction>> {
        match self.actions.get(id.as_str().as_bytes()).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_action(&self, action: ChainAction) -> StoreResult<()> {
        self.actions
            .insert(action.id.as_str().as_bytes(), ser(&action)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_actions_by_state(&self, state: ActionState, limit: usize) -> StoreResult<Vec<ChainAction>> {
        let mut actions: Vec<ChainAction> = Self::iter_values::<ChainAction>(&self.actions)?
            .into_iter()
            .filter(|a| a.state == state)
            .collect();
        actions.sort_by_key(|a| a.created_at);
        actions.truncate(limit);
        Ok(actions)
    }

    async fn list_stuck_actions(&self, sent_before: i64) -> StoreResult<Vec<ChainAction>> {
        Ok(Self::iter_values::<ChainAction>(&self.actions)?
            .into_iter()
            .filter(|a| {
                a.state == ActionState::Sent
                    && a.bump_count < MAX_BUMP_COUNT
                    && a.sent_at.is_some_and(|s| s < sent_before)
            })
            .collect())
    }

    async fn recover_processing_actions(&self) -> StoreResult<u64> {
        let mut n = 0u64;
        for mut action in Self::iter_values::<ChainAction>(&self.actions)? {
            if action.state == ActionState::Processing {
                action.state = ActionState::Queued;
                action.next_retry_at = None;
                action.last_error = Some("reset: worker crash during PROCESSING".to_string());
                self.actions
                    .insert(action.id.as_str().as_bytes(), ser(&action)?)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn get_signer_nonce(&self, signer: &str, chain_id: u64) -> StoreResult<Option<SignerNonce>> {
        let key = format!("{signer}:{chain_id}");
        match self.signer_nonces.get(key.as_bytes()).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_signer_nonce(&self, record: SignerNonce) -> StoreResult<()> {
        let key = format!("{}:{}", record.signer, record.chain_id);
        self.signer_nonces
            .insert(key.as_bytes(), ser(&record)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn insert_transfer(&self, transfer: FiatTransfer) -> StoreResult<()> {
        let ok = self
            .transfer_idempotency
            .compare_and_swap(
                transfer.idempotency_key.as_bytes(),
                None as Option<&[u8]>,
                Some(transfer.id.as_bytes()),
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if ok.is_err() {
            return Err(StoreError::Conflict(format!(
                "idempotency_key {} already used",
                transfer.idempotency_key
            )));
        }
        self.transfers
            .insert(transfer.id.as_bytes(), ser(&transfer)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn update_transfer(&self, transfer: FiatTransfer) -> StoreResult<()> {
        self.transfers
            .insert(transfer.id.as_bytes(), ser(&transfer)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_transfer_by_idempotency_key(&self, key: &str) -> StoreResult<Option<FiatTransfer>> {
        let id_bytes = match self
            .transfer_idempotency
            .get(key.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(b) => b,
            None => return Ok(None),
        };
        match self.transfers.get(&id_bytes).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn latest_transfer(
        &self,
        loan_id: &LoanId,
        direction: TransferDirection,
    ) -> StoreResult<Option<FiatTransfer>> {
        Ok(Self::iter_values::<FiatTransfer>(&self.transfers)?
            .into_iter()
            .filter(|tr| &tr.loan_id == loan_id && tr.direction == direction)
            .max_by_key(|tr| tr.webhook_timestamp))
    }

    async fn list_transfers_for_loan(&self, loan_id: &LoanId) -> StoreResult<Vec<FiatTransfer>> {
        Ok(Self::iter_values::<FiatTransfer>(&self.transfers)?
            .into_iter()
            .filter(|tr| &tr.loan_id == loan_id)
            .collect())
    }

    async fn claim_webhook_nonce(&self, source: &str, nonce: &str, now: i64) -> StoreResult<bool> {
        let key = format!("{source}:{nonce}");
        let ok = self
            .webhook_nonces
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(ser(&now)?))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(ok.is_ok())
    }

    async fn purge_expired_webhook_nonces(&self, older_than: i64) -> StoreResult<u64> {
        let mut n = 0u64;
        for item in self.webhook_nonces.iter() {
            let (key, bytes) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let claimed_at: i64 = de(&bytes)?;
            if claimed_at < older_than {
                self.webhook_nonces.remove(key).map_err(|e| StoreError::Backend(e.to_string()))?;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn insert_dead_letter(&self, dead_letter: DeadLetter) -> StoreResult<()> {
        self.dead_letters
            .insert(dead_letter.id.as_bytes(), ser(&dead_letter)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> StoreResult<Vec<DeadLetter>> {
        let mut v = Self::iter_values::<DeadLetter>(&self.dead_letters)?;
        v.sort_by_key(|d| std::cmp::Reverse(d.created_at));
        v.truncate(limit);
        Ok(v)
    }

    async fn put_schedule(&self, schedule: InstallmentSchedule) -> StoreResult<()> {
        self.schedules
            .insert(schedule.loan_id.as_str().as_bytes(), ser(&schedule)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_schedule(&self, loan_id: &LoanId) -> StoreResult<Option<InstallmentSchedule>> {
        match self
            .schedules
            .get(loan_id.as_str().as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_schedules(&self) -> StoreResult<Vec<InstallmentSchedule>> {
        Self::iter_values(&self.schedules)
    }

    async fn put_entries(&self, entries: Vec<InstallmentEntry>) -> StoreResult<()> {
        for entry in entries {
            self.entries
                .insert(entry.entry_id().as_bytes(), ser(&entry)?)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn update_entry(&self, entry: InstallmentEntry) -> StoreResult<()> {
        self.entries
            .insert(entry.entry_id().as_bytes(), ser(&entry)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_entries_for_loan(&self, loan_id: &LoanId) -> StoreResult<Vec<InstallmentEntry>> {
        let mut v: Vec<InstallmentEntry> = Self::iter_values::<InstallmentEntry>(&self.entries)?
            .into_iter()
            .filter(|e| &e.loan_id == loan_id)
            .collect();
        v.sort_by_key(|e| e.installment_index);
        Ok(v)
    }

    async fn insert_accrual_snapshot_if_absent(&self, snapshot: AccrualSnapshot) -> StoreResult<bool> {
        let key = format!("{}:{}", snapshot.entry_id, snapshot.hour_bucket);
        let ok = self
            .accrual_snapshots
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(ser(&snapshot)?))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(ok.is_ok())
    }

    async fn list_accrual_snapshots_for_entry(&self, entry_id: &str) -> StoreResult<Vec<AccrualSnapshot>> {
        Ok(Self::iter_values::<AccrualSnapshot>(&self.accrual_snapshots)?
            .into_iter()
            .filter(|s| s.entry_id == entry_id)
            .collect())
    }

    async fn insert_incident(&self, incident: ReconIncident) -> StoreResult<()> {
        self.incidents
            .insert(incident.id.as_bytes(), ser(&incident)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn resolve_incident(&self, id: &str, resolved_at: i64) -> StoreResult<()> {
        let bytes = self
            .incidents
            .get(id.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut incident: ReconIncident = de(&bytes)?;
        incident.resolved_at = Some(resolved_at);
        self.incidents
            .insert(id.as_bytes(), ser(&incident)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_open_incidents(&self) -> StoreResult<Vec<ReconIncident>> {
        Ok(Self::iter_values::<ReconIncident>(&self.incidents)?
            .into_iter()
            .filter(|i| i.resolved_at.is_none())
            .collect())
    }

    async fn insert_report(&self, report: ReconReport) -> StoreResult<()> {
        self.reports
            .insert(report.id.as_bytes(), ser(&report)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn insert_settlement_check(&self, check: SettlementCheck) -> StoreResult<()> {
        self.settlement_checks
            .insert(check.id.as_bytes(), ser(&check)?)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_loan_ids_with_schedule(&self) -> StoreResult<Vec<LoanId>> {
        Ok(Self::iter_values::<InstallmentSchedule>(&self.schedules)?
            .into_iter()
            .map(|s| s.loan_id)
            .collect())
    }
}
