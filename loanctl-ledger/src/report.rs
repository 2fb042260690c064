//! Daily report generation (spec §4.6 last paragraph): per-pool and global
//! rollups of outstanding balances, repayment totals, and delinquency
//! distribution, each stamped with a SHA-256 checksum of its own canonical
//! JSON for archival integrity.

use std::collections::HashMap;
use std::sync::Arc;

#[cfg(test)]
use loanctl_core::MinorUnits;
use loanctl_core::{sha256, LoanId, PartnerId};
use loanctl_store::{ActionPayload, ActionState, ActionType, AccrualStatus, Store};
use serde::Serialize;

use crate::error::LedgerError;

#[derive(Clone, Debug, Default, Serialize)]
pub struct DelinquencyBuckets {
    pub days_1_5: u32,
    pub days_6_15: u32,
    pub days_16_30: u32,
    pub days_31_plus: u32,
}

impl DelinquencyBuckets {
    fn record(&mut self, days_past_due: i64) {
        match days_past_due {
            0 => {}
            1..=5 => self.days_1_5 += 1,
            6..=15 => self.days_6_15 += 1,
            16..=30 => self.days_16_30 += 1,
            _ => self.days_31_plus += 1,
        }
    }
}

/// Field order is the canonical wire format (struct serialization preserves
/// declaration order), same discipline as the schedule engine's documents.
#[derive(Debug, Serialize)]
pub struct PoolReport {
    pub partner_id: Option<String>,
    pub active_loan_count: u32,
    pub outstanding_principal: String,
    pub outstanding_interest: String,
    pub outstanding_penalty: String,
    pub fiat_repayment_total: String,
    pub chain_repayment_total: String,
    pub delinquency_buckets: DelinquencyBuckets,
    pub defaulted_loan_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PoolReportWithChecksum {
    #[serde(flatten)]
    pub report: PoolReport,
    pub checksum: String,
}

#[derive(Debug, Serialize)]
pub struct DailyReportSet {
    pub run_at: i64,
    pub global: PoolReportWithChecksum,
    pub per_pool: Vec<PoolReportWithChecksum>,
}

#[derive(Default)]
struct Accumulator {
    active_loan_count: u32,
    outstanding_principal: i128,
    outstanding_interest: i128,
    outstanding_penalty: i128,
    fiat_repayment_total: i128,
    chain_repayment_total: i128,
    buckets: DelinquencyBuckets,
    defaulted_loan_ids: Vec<LoanId>,
}

impl Accumulator {
    fn finish(self, partner_id: Option<PartnerId>) -> PoolReportWithChecksum {
        let report = PoolReport {
            partner_id: partner_id.map(|p| p.to_string()),
            active_loan_count: self.active_loan_count,
            outstanding_principal: self.outstanding_principal.to_string(),
            outstanding_interest: self.outstanding_interest.to_string(),
            outstanding_penalty: self.outstanding_penalty.to_string(),
            fiat_repayment_total: self.fiat_repayment_total.to_string(),
            chain_repayment_total: self.chain_repayment_total.to_string(),
            delinquency_buckets: self.buckets,
            defaulted_loan_ids: self.defaulted_loan_ids.iter().map(LoanId::to_string).collect(),
        };
        let checksum = sha256::digest_hex(&serde_json::to_vec(&report).expect("report always serializes"));
        PoolReportWithChecksum { report, checksum }
    }
}

/// Scans every action state for a `CREATE_LOAN` action addressed to
/// `loan_id`. Loan-to-partner assignment lives only on that action's
/// payload since there is no separate Loan row in this store (loan
/// lifecycle is an external collaborator, spec §1).
pub(crate) async fn partner_for_loan(store: &Arc<dyn Store>, loan_id: &LoanId) -> Result<Option<PartnerId>, LedgerError> {
    for state in [
        ActionState::Queued,
        ActionState::Processing,
        ActionState::Sent,
        ActionState::Mined,
        ActionState::Failed,
        ActionState::Retrying,
        ActionState::Dlq,
    ] {
        for action in store.list_actions_by_state(state, usize::MAX).await? {
            if &action.loan_id == loan_id {
                if let ActionPayload::CreateLoan { partner_id, .. } = action.payload {
                    return Ok(Some(partner_id));
                }
            }
        }
    }
    Ok(None)
}

async fn mined_repay_total(store: &Arc<dyn Store>, loan_id: &LoanId) -> Result<i128, LedgerError> {
    let mut total = 0i128;
    for action in store.list_actions_by_state(ActionState::Mined, usize::MAX).await? {
        if &action.loan_id != loan_id || action.action_type() != ActionType::Repay {
            continue;
        }
        if let ActionPayload::Repay { amount, .. } = action.payload {
            total += amount.0;
        }
    }
    Ok(total)
}

pub async fn generate_daily_report(store: &Arc<dyn Store>) -> Result<DailyReportSet, LedgerError> {
    let mut global = Accumulator::default();
    let mut per_pool: HashMap<PartnerId, Accumulator> = HashMap::new();

    for loan_id in store.list_loan_ids_with_schedule().await? {
        let entries = store.list_entries_for_loan(&loan_id).await?;
        let transfers = store.list_transfers_for_loan(&loan_id).await?;
        let partner_id = partner_for_loan(store, &loan_id).await?;

        let mut loan_principal = 0i128;
        let mut loan_interest = 0i128;
        let mut loan_penalty = 0i128;
        let mut loan_is_defaulted = false;
        let mut loan_buckets = DelinquencyBuckets::default();
        for entry in &entries {
            if entry.is_open() {
                loan_principal += (entry.principal_due.0 - entry.principal_paid.0).max(0);
                loan_interest += (entry.interest_due.0 - entry.interest_paid.0).max(0);
                loan_penalty += entry.penalty_accrued.0;
                loan_buckets.record(entry.days_past_due);
            }
            if entry.accrual_status == AccrualStatus::Defaulted {
                loan_is_defaulted = true;
            }
        }

        let fiat_total: i128 = transfers
            .iter()
            .filter(|t| t.direction == loanctl_store::TransferDirection::Inbound && t.confirmed_at.is_some())
            .map(|t| t.amount_kes.0)
            .sum();
        let chain_total = mined_repay_total(store, &loan_id).await?;

        global.active_loan_count += 1;
        global.outstanding_principal += loan_principal;
        global.outstanding_interest += loan_interest;
        global.outstanding_penalty += loan_penalty;
        global.fiat_repayment_total += fiat_total;
        global.chain_repayment_total += chain_total;
        merge_buckets(&mut global.buckets, &loan_buckets);
        if loan_is_defaulted {
            global.defaulted_loan_ids.push(loan_id.clone());
        }

        if let Some(partner_id) = partner_id {
            let acc = per_pool.entry(partner_id).or_default();
            acc.active_loan_count += 1;
            acc.outstanding_principal += loan_principal;
            acc.outstanding_interest += loan_interest;
            acc.outstanding_penalty += loan_penalty;
            acc.fiat_repayment_total += fiat_total;
            acc.chain_repayment_total += chain_total;
            merge_buckets(&mut acc.buckets, &loan_buckets);
            if loan_is_defaulted {
                acc.defaulted_loan_ids.push(loan_id.clone());
            }
        }
    }

    let per_pool_reports =
        per_pool.into_iter().map(|(partner_id, acc)| acc.finish(Some(partner_id))).collect();

    Ok(DailyReportSet { run_at: loanctl_core::time::now_unix(), global: global.finish(None), per_pool: per_pool_reports })
}

fn merge_buckets(into: &mut DelinquencyBuckets, from: &DelinquencyBuckets) {
    into.days_1_5 += from.days_1_5;
    into.days_6_15 += from.days_6_15;
    into.days_16_30 += from.days_16_30;
    into.days_31_plus += from.days_31_plus;
}

#[cfg(test)]
mod test {
    use loanctl_core::ActionId;
    use loanctl_store::memory::MemoryStore;
    use loanctl_store::{ChainAction, InstallmentEntry, InstallmentSchedule, InstallmentStatus};

    use super::*;

    #[tokio::test]
    async fn global_rollup_sums_per_pool_figures() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let loan_id = LoanId::from("loan-report-1".to_string());
        let partner_id = PartnerId::from("partner-1".to_string());

        store
            .insert_action(ChainAction {
                id: ActionId::generate(),
                action_key: None,
                loan_id: loan_id.clone(),
                payload: ActionPayload::CreateLoan { partner_id: partner_id.clone(), principal: MinorUnits(1_000_000) },
                state: ActionState::Mined,
                tx_hash: Some("0xabc".into()),
                nonce: Some(1),
                bump_count: 0,
                attempts: 0,
                next_retry_at: None,
                sent_at: Some(0),
                mined_at: Some(0),
                dlq_at: None,
                last_error: None,
                block_number: Some(1),
                gas_used: Some(21_000),
                revert_reason: None,
                confirmations_received: 1,
                confirmations_required: 1,
                created_at: 0,
            })
            .await
            .unwrap();

        store
            .put_schedule(InstallmentSchedule {
                loan_id: loan_id.clone(),
                schedule_hash: "h".into(),
                schedule_json: "{}".into(),
                total_installments: 1,
                principal_per_installment: MinorUnits(1_000_000),
                interest_rate_bps: 0,
                interval_seconds: 86_400,
                start_timestamp: 0,
                grace_period_seconds: 0,
                penalty_apr_bps: 0,
            })
            .await
            .unwrap();
        store
            .put_entries(vec![InstallmentEntry {
                loan_id: loan_id.clone(),
                installment_index: 0,
                due_timestamp: 0,
                principal_due: MinorUnits(1_000_000),
                interest_due: MinorUnits(0),
                total_due: MinorUnits(1_000_000),
                principal_paid: MinorUnits::ZERO,
                interest_paid: MinorUnits::ZERO,
                penalty_accrued: MinorUnits::ZERO,
                accrual_status: AccrualStatus::Current,
                status: InstallmentStatus::Due,
                days_past_due: 0,
                delinquent_since: None,
            }])
            .await
            .unwrap();

        let report = generate_daily_report(&store).await.unwrap();
        assert_eq!(report.global.report.active_loan_count, 1);
        assert_eq!(report.per_pool.len(), 1);
        assert_eq!(report.per_pool[0].report.outstanding_principal, "1000000");
        assert_eq!(report.global.report.outstanding_principal, "1000000");
        assert!(!report.global.checksum.is_empty());
    }
}
