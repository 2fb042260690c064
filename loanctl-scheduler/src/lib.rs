//! Time-driven orchestration (spec §6): wires the six cron cadences to the
//! installment-engine and reconciliation jobs. `tokio-cron-scheduler` is an
//! enrichment crate — the teacher has no scheduled-job surface of its own,
//! so this crate's shape is grounded in that crate's own async-job idiom
//! rather than a teacher pattern.

use std::sync::Arc;

use loanctl_breaker::CircuitBreaker;
use loanctl_ledger::reconciliation::OnchainPrincipalSource;
use loanctl_store::Store;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Everything the six scheduled jobs need. Cloned (cheap, all `Arc`) into
/// each job closure.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn Store>,
    pub breaker: Arc<dyn CircuitBreaker>,
    pub principal_source: Arc<dyn OnchainPrincipalSource>,
}

macro_rules! spawn_job {
    ($scheduler:expr, $cron:expr, $name:literal, $deps:expr, $body:expr) => {{
        let deps = $deps.clone();
        let job = Job::new_async($cron, move |_uuid, _l| {
            let deps = deps.clone();
            Box::pin(async move {
                info!(job = $name, "scheduled job starting");
                if let Err(err) = ($body)(deps).await {
                    error!(job = $name, %err, "scheduled job failed");
                }
            })
        })?;
        $scheduler.add(job).await?;
    }};
}

/// Builds (but does not start) the scheduler with all six cadences
/// registered. Call `.start().await` on the result.
pub async fn build_scheduler(deps: SchedulerDeps) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    spawn_job!(scheduler, "0 5 * * * *", "hourly_accrual", deps, |deps: SchedulerDeps| async move {
        loanctl_ledger::accrual::run_accrual_job(&deps.store).await?;
        Ok::<_, anyhow::Error>(())
    });

    spawn_job!(scheduler, "0 0 1 * * *", "daily_evaluation", deps, |deps: SchedulerDeps| async move {
        loanctl_ledger::report::generate_daily_report(&deps.store).await?;
        Ok::<_, anyhow::Error>(())
    });

    spawn_job!(scheduler, "0 30 1 * * *", "breaker_feed", deps, |deps: SchedulerDeps| async move {
        loanctl_ledger::breaker_feed::run_breaker_feed(&deps.store, deps.breaker.as_ref()).await?;
        Ok::<_, anyhow::Error>(())
    });

    spawn_job!(scheduler, "0 0 2 * * *", "reconciliation_and_integrity", deps, |deps: SchedulerDeps| async move {
        loanctl_ledger::reconciliation::balance_reconciliation(&deps.store, deps.principal_source.as_ref()).await?;
        loanctl_ledger::reconciliation::accounting_integrity(&deps.store).await?;
        Ok::<_, anyhow::Error>(())
    });

    spawn_job!(scheduler, "0 30 2 * * *", "daily_report", deps, |deps: SchedulerDeps| async move {
        loanctl_ledger::report::generate_daily_report(&deps.store).await?;
        Ok::<_, anyhow::Error>(())
    });

    spawn_job!(scheduler, "0 0 3 * * *", "settlement_check", deps, |deps: SchedulerDeps| async move {
        loanctl_ledger::reconciliation::settlement_integrity(&deps.store).await?;
        Ok::<_, anyhow::Error>(())
    });

    Ok(scheduler)
}

#[cfg(test)]
mod test {
    use loanctl_breaker::ThresholdBreaker;
    use loanctl_core::{LoanId, MinorUnits};
    use loanctl_store::memory::MemoryStore;

    use super::*;

    struct FixedPrincipal;

    #[async_trait::async_trait]
    impl OnchainPrincipalSource for FixedPrincipal {
        async fn onchain_principal(&self, _loan_id: &LoanId) -> anyhow::Result<MinorUnits> {
            Ok(MinorUnits::ZERO)
        }
    }

    #[tokio::test]
    async fn scheduler_registers_all_six_cadences() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let breaker: Arc<dyn CircuitBreaker> = Arc::new(ThresholdBreaker::new(store.clone(), 1_000, 1_000));
        let deps = SchedulerDeps { store, breaker, principal_source: Arc::new(FixedPrincipal) };

        let scheduler = build_scheduler(deps).await.unwrap();
        drop(scheduler);
    }
}
