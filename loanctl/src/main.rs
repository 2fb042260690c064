//! Process entrypoint: CLI parsing, fail-fast config, and wiring every
//! crate in the workspace into one running service, mirroring the
//! reference's node binary shape (load config, build shared state, spawn
//! supervised tasks, wait on a shutdown signal) reduced to this domain.

mod config;
mod paper_chain_sender;

use std::sync::Arc;

use argh::FromArgs;
use loanctl_api::state::{ApiConfig, AppState};
use loanctl_breaker::{CircuitBreaker, ThresholdBreaker};
use loanctl_chain::{ActionEnqueuer, ActionPipeline, NonceManager, PostMineEvent};
use loanctl_core::task::{LoanctlTask, ShutdownChannel};
use loanctl_core::ActionId;
use loanctl_ledger::reconciliation::OnchainPrincipalSource;
use loanctl_store::{SledStore, Store};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::paper_chain_sender::PaperChainSender;

/// loanctl: hybrid fiat/on-chain loan origination control plane.
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunArgs),
    Migrate(MigrateArgs),
    ReplayAction(ReplayActionArgs),
}

/// start the full service: action pipeline, fiat webhooks, scheduler, admin API
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
struct RunArgs {}

/// open the store at the configured path, applying any pending schema upgrades
#[derive(FromArgs)]
#[argh(subcommand, name = "migrate")]
struct MigrateArgs {}

/// move a DLQ'd or stuck action back to QUEUED (admin replay, spec §3 invariant iii)
#[derive(FromArgs)]
#[argh(subcommand, name = "replay-action")]
struct ReplayActionArgs {
    #[argh(positional)]
    action_id: String,
}

/// Breaker feed needs a real on-chain principal proxy; the CLI's default
/// always reports zero exposure, same pluggable-boundary rationale as
/// `PaperChainSender`.
struct ZeroPrincipalSource;

#[async_trait::async_trait]
impl OnchainPrincipalSource for ZeroPrincipalSource {
    async fn onchain_principal(&self, _loan_id: &loanctl_core::LoanId) -> anyhow::Result<loanctl_core::MinorUnits> {
        Ok(loanctl_core::MinorUnits::ZERO)
    }
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli: Cli = argh::from_env();

    match cli.command {
        Command::Run(_) => run().await,
        Command::Migrate(_) => migrate().await,
        Command::ReplayAction(args) => replay_action(args).await,
    }
}

async fn migrate() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    let _store = SledStore::open(&cfg.database_path)?;
    info!(path = %cfg.database_path, "store opened; sled applies its own on-disk format, no separate migration step needed");
    Ok(())
}

async fn replay_action(args: ReplayActionArgs) -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    let store: Arc<dyn Store> = Arc::new(SledStore::open(&cfg.database_path)?);
    let sender = Arc::new(PaperChainSender::new());
    let nonce = Arc::new(NonceManager::new(cfg.signer_address.clone(), cfg.chain_id, store.clone()));
    let (events_tx, _events_rx) = mpsc::channel(1);
    let pipeline = Arc::new(ActionPipeline::new(store, sender, nonce, events_tx));

    let id = ActionId::from(args.action_id.clone());
    pipeline.requeue_action(&id).await?;
    info!(action_id = %args.action_id, "action requeued");
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    let store: Arc<dyn Store> = Arc::new(SledStore::open(&cfg.database_path)?);

    let sender = Arc::new(PaperChainSender::new());
    let nonce = Arc::new(NonceManager::new(cfg.signer_address.clone(), cfg.chain_id, store.clone()));
    nonce.reconcile_at_startup(sender.as_ref()).await?;

    let (events_tx, mut events_rx) = mpsc::channel(256);
    let pipeline = Arc::new(ActionPipeline::new(store.clone(), sender, nonce, events_tx));
    let recovered = pipeline.recover_on_startup().await?;
    info!(recovered, "startup recovery complete");

    let breaker: Arc<dyn CircuitBreaker> = Arc::new(ThresholdBreaker::new(store.clone(), 1_000, 1_000));
    let principal_source: Arc<dyn OnchainPrincipalSource> = Arc::new(ZeroPrincipalSource);
    let enqueuer: Arc<dyn ActionEnqueuer> = pipeline.clone();

    let shutdown = ShutdownChannel::new();
    let mut tasks: Vec<LoanctlTask<()>> = pipeline.clone().spawn_loops(shutdown.clone());

    // Drains `PostMineEvent`s the pipeline fans out after each receipt
    // confirms, applying the matching fiat-side guard (spec §4.2 state
    // machines — these never run inline in the pipeline itself, see
    // pipeline.rs's design note on straight-line data over callback chains).
    {
        let store = store.clone();
        let mut shutdown = shutdown.clone();
        tasks.push(LoanctlTask::spawn_named("post-mine-events", async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = events_rx.recv() => {
                        let Some(event) = event else { break };
                        let result = match event {
                            PostMineEvent::LoanTransitioned { .. } => Ok(()),
                            PostMineEvent::FiatRecordConfirmed { loan_id } => {
                                loanctl_fiat::disbursement::on_record_disbursement_confirmed(&store, &loan_id).await
                            }
                            PostMineEvent::ActivationConfirmed { loan_id } => {
                                loanctl_fiat::disbursement::on_activate_loan_confirmed(&store, &loan_id).await
                            }
                            PostMineEvent::FiatRepayConfirmed { loan_id } => {
                                loanctl_fiat::repayment::on_repay_confirmed(&store, &loan_id).await
                            }
                        };
                        if let Err(err) = result {
                            error!(%err, "post-mine event handler failed");
                        }
                    }
                }
            }
        }));
    }

    let scheduler_deps =
        loanctl_scheduler::SchedulerDeps { store: store.clone(), breaker: breaker.clone(), principal_source: principal_source.clone() };
    let scheduler = loanctl_scheduler::build_scheduler(scheduler_deps).await?;
    scheduler.start().await?;

    let api_state = AppState {
        store: store.clone(),
        enqueuer,
        breaker,
        principal_source,
        config: Arc::new(ApiConfig { admin_api_key: cfg.admin_api_key, webhook_secrets: cfg.webhook_secrets }),
    };
    let router = loanctl_api::build_router(api_state);
    let api_shutdown = shutdown.clone();
    tasks.push(LoanctlTask::spawn_named("api-server", async move {
        if let Err(err) = loanctl_api::serve(cfg.bind_addr, router, api_shutdown).await {
            error!(%err, "api server exited with error");
        }
    }));

    wait_for_shutdown_signal().await;
    shutdown.send();
    for task in tasks {
        task.logged().await;
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler") };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received SIGINT"),
        _ = terminate => warn!("received SIGTERM"),
    }
}
