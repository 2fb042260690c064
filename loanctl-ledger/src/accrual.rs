//! Hourly idempotent penalty accrual (spec §4.4). Runs over every
//! non-PAID/non-WAIVED entry of every loan with a schedule, reclassifies it,
//! and charges at most one penalty delta per `(entryId, hourBucket)`.

use std::sync::Arc;

use loanctl_core::time::{hour_bucket, now_unix};
use loanctl_core::MinorUnits;
use loanctl_store::{AccrualSnapshot, AccrualStatus, InstallmentSchedule, Store};
use tracing::{debug, info};

use crate::delinquency;
use crate::error::LedgerError;

#[derive(Debug, Default)]
pub struct AccrualRunSummary {
    pub entries_examined: u32,
    /// Entries that got a fresh snapshot this run (penalty delta may be zero
    /// for CURRENT/IN_GRACE entries — "processed", not "charged money").
    pub entries_processed: u32,
    pub entries_skipped_idempotent: u32,
}

/// One run of the hourly job across every loan that has a schedule.
pub async fn run_accrual_job(store: &Arc<dyn Store>) -> Result<AccrualRunSummary, LedgerError> {
    let now = now_unix();
    let bucket = hour_bucket(now);
    let mut summary = AccrualRunSummary::default();

    for loan_id in store.list_loan_ids_with_schedule().await? {
        let Some(schedule) = store.get_schedule(&loan_id).await? else { continue };
        let entries = store.list_entries_for_loan(&loan_id).await?;
        for entry in entries.into_iter().filter(|e| e.is_open()) {
            summary.entries_examined += 1;
            if accrue_one(store, &schedule, entry, now, bucket).await? {
                summary.entries_processed += 1;
            } else {
                summary.entries_skipped_idempotent += 1;
            }
        }
    }

    info!(
        examined = summary.entries_examined,
        processed = summary.entries_processed,
        skipped = summary.entries_skipped_idempotent,
        "accrual job run complete"
    );
    Ok(summary)
}

/// Returns `true` if a penalty was charged, `false` if this `(entry,
/// hourBucket)` pair was already seen (idempotent skip).
async fn accrue_one(
    store: &Arc<dyn Store>,
    schedule: &InstallmentSchedule,
    mut entry: loanctl_store::InstallmentEntry,
    now: i64,
    bucket: i64,
) -> Result<bool, LedgerError> {
    let entry_id = entry.entry_id();
    let status = delinquency::classify(entry.due_timestamp, now, schedule.grace_period_seconds);
    let dpd = delinquency::days_past_due(entry.due_timestamp, now);

    let overdue_principal = MinorUnits((entry.principal_due.0 - entry.principal_paid.0).max(0));
    let delta = delinquency::hourly_penalty(status, overdue_principal, schedule.penalty_apr_bps as i64);

    let snapshot = AccrualSnapshot {
        entry_id: entry_id.clone(),
        hour_bucket: bucket,
        penalty_delta: delta,
        days_past_due: dpd,
        accrual_status: status,
    };
    let inserted = store.insert_accrual_snapshot_if_absent(snapshot).await?;
    if !inserted {
        debug!(entry_id, bucket, "accrual snapshot already exists, skipping");
        return Ok(false);
    }

    let was_delinquent = matches!(
        entry.accrual_status,
        AccrualStatus::Delinquent | AccrualStatus::DefaultCandidate | AccrualStatus::Defaulted
    );
    let now_delinquent =
        matches!(status, AccrualStatus::Delinquent | AccrualStatus::DefaultCandidate | AccrualStatus::Defaulted);

    entry.accrual_status = status;
    entry.days_past_due = dpd;
    entry.penalty_accrued = MinorUnits(entry.penalty_accrued.0 + delta.0);
    if !was_delinquent && now_delinquent {
        entry.delinquent_since = Some(now);
    } else if was_delinquent && !now_delinquent {
        entry.delinquent_since = None;
    }

    store.update_entry(entry).await?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use loanctl_core::LoanId;
    use loanctl_store::memory::MemoryStore;
    use loanctl_store::{InstallmentEntry, InstallmentStatus};

    use super::*;

    fn schedule(loan_id: LoanId, grace: i64) -> InstallmentSchedule {
        InstallmentSchedule {
            loan_id,
            schedule_hash: "h".into(),
            schedule_json: "{}".into(),
            total_installments: 1,
            principal_per_installment: MinorUnits(1_000_000),
            interest_rate_bps: 1_200,
            interval_seconds: 30 * 86_400,
            start_timestamp: 0,
            grace_period_seconds: grace,
            penalty_apr_bps: 5_000,
        }
    }

    fn entry(loan_id: LoanId, due_timestamp: i64) -> InstallmentEntry {
        InstallmentEntry {
            loan_id,
            installment_index: 0,
            due_timestamp,
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
        }
    }

    #[tokio::test]
    async fn second_run_in_the_same_hour_bucket_is_a_noop() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let loan_id = LoanId::from("loan-acc-1".to_string());
        let now = now_unix();
        let overdue_due = now - 20 * 86_400;

        store.put_schedule(schedule(loan_id.clone(), 3 * 86_400)).await.unwrap();
        store.put_entries(vec![entry(loan_id.clone(), overdue_due)]).await.unwrap();

        let first = run_accrual_job(&store).await.unwrap();
        assert_eq!(first.entries_processed, 1);

        let second = run_accrual_job(&store).await.unwrap();
        assert_eq!(second.entries_processed, 0);
        assert_eq!(second.entries_skipped_idempotent, 1);

        let stored = store.list_entries_for_loan(&loan_id).await.unwrap();
        assert_eq!(stored[0].accrual_status, AccrualStatus::DefaultCandidate);
        assert!(stored[0].penalty_accrued.0 > 0);
        assert!(stored[0].delinquent_since.is_some());
    }

    #[tokio::test]
    async fn current_entries_are_examined_but_not_charged() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let loan_id = LoanId::from("loan-acc-2".to_string());
        let now = now_unix();
        let future_due = now + 30 * 86_400;

        store.put_schedule(schedule(loan_id.clone(), 3 * 86_400)).await.unwrap();
        store.put_entries(vec![entry(loan_id.clone(), future_due)]).await.unwrap();

        let summary = run_accrual_job(&store).await.unwrap();
        assert_eq!(summary.entries_processed, 1);
        let stored = store.list_entries_for_loan(&loan_id).await.unwrap();
        assert_eq!(stored[0].penalty_accrued, MinorUnits::ZERO);
        assert_eq!(stored[0].accrual_status, AccrualStatus::Current);
    }
}
