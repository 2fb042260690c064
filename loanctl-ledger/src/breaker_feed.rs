//! The installment breaker feed (spec §4.5): aggregates per-partner
//! delinquency/default metrics from the installment book and calls the
//! breaker's evaluators. Runs on its own cadence, independent of the
//! accrual job that produced the underlying entry statuses.

use std::collections::HashMap;
use std::sync::Arc;

use loanctl_core::{MinorUnits, PartnerId};
use loanctl_breaker::CircuitBreaker;
use loanctl_store::{AccrualStatus, ReconIncident, Store};

use crate::error::LedgerError;
use crate::report::partner_for_loan;

const BPS_DENOMINATOR: u64 = 10_000;

#[derive(Default)]
struct PartnerCounts {
    total_entries: u64,
    delinquent_14d: u64,
    defaulted_30d: u64,
    exposure: i128,
}

/// One run: tallies per-partner entry counts, derives `delinquencyRate14d`
/// / `defaultRate30d` in basis points, and calls the breaker's evaluators.
/// Returns every incident the evaluators actually created (empty when every
/// partner is under threshold or already flagged).
pub async fn run_breaker_feed(
    store: &Arc<dyn Store>,
    breaker: &dyn CircuitBreaker,
) -> Result<Vec<ReconIncident>, LedgerError> {
    let mut by_partner: HashMap<PartnerId, PartnerCounts> = HashMap::new();

    for loan_id in store.list_loan_ids_with_schedule().await? {
        let Some(partner_id) = partner_for_loan(store, &loan_id).await? else { continue };
        let counts = by_partner.entry(partner_id).or_default();
        for entry in store.list_entries_for_loan(&loan_id).await? {
            if !entry.is_open() {
                continue;
            }
            counts.total_entries += 1;
            counts.exposure += (entry.principal_due.0 - entry.principal_paid.0).max(0);
            match entry.accrual_status {
                AccrualStatus::Delinquent | AccrualStatus::DefaultCandidate => counts.delinquent_14d += 1,
                AccrualStatus::Defaulted => {
                    counts.delinquent_14d += 1;
                    counts.defaulted_30d += 1;
                }
                _ => {}
            }
        }
    }

    let mut fired = Vec::new();
    for (partner_id, counts) in by_partner {
        if counts.total_entries == 0 {
            continue;
        }
        let delinquency_rate_bps = (counts.delinquent_14d * BPS_DENOMINATOR / counts.total_entries) as u32;
        let default_rate_bps = (counts.defaulted_30d * BPS_DENOMINATOR / counts.total_entries) as u32;
        let per_borrower_exposure = MinorUnits(counts.exposure);
        tracing::debug!(
            %partner_id, delinquency_rate_bps, default_rate_bps, exposure = %per_borrower_exposure,
            "breaker feed metrics for partner"
        );

        if let Some(inc) = breaker.evaluate_delinquency_spike(&partner_id, delinquency_rate_bps).await? {
            fired.push(inc);
        }
        if let Some(inc) = breaker.evaluate_partner_default_spike(&partner_id, default_rate_bps).await? {
            fired.push(inc);
        }
    }

    Ok(fired)
}

#[cfg(test)]
mod test {
    use loanctl_breaker::ThresholdBreaker;
    use loanctl_core::{ActionId, LoanId};
    use loanctl_store::memory::MemoryStore;
    use loanctl_store::{
        ActionPayload, ActionState, ChainAction, InstallmentEntry, InstallmentSchedule, InstallmentStatus,
    };

    use super::*;

    #[tokio::test]
    async fn high_delinquency_rate_trips_partner() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let breaker = ThresholdBreaker::new(store.clone(), 1_000, 1_000);
        let loan_id = LoanId::from("loan-feed-1".to_string());
        let partner_id = PartnerId::from("partner-feed-1".to_string());

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
                accrual_status: AccrualStatus::Defaulted,
                status: InstallmentStatus::Delinquent,
                days_past_due: 45,
                delinquent_since: Some(0),
            }])
            .await
            .unwrap();

        let fired = run_breaker_feed(&store, &breaker).await.unwrap();
        assert_eq!(fired.len(), 2, "both delinquency and default spikes should fire at 100% rate");
        assert!(breaker.assert_origination_allowed(&partner_id).await.is_err());
    }
}
