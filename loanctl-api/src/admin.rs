//! Operator-facing admin surface (spec §6 "HTTP admin endpoints"). Every
//! route here runs behind `auth::require_admin_key`; handlers are thin,
//! each delegating straight into the crate that owns the underlying data
//! (`loanctl-ledger` for reconciliation, `loanctl-breaker` for circuit
//! state, `loanctl-chain` for the action pipeline).

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use loanctl_core::{ActionId, PartnerId};
use loanctl_ledger::reconciliation;
use loanctl_store::PartnerStatus;
use serde::Serialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
struct ReconciliationResponse {
    report: loanctl_store::ReconReport,
    accounting_incidents: Vec<loanctl_store::ReconIncident>,
    settlement_checks: Vec<loanctl_store::SettlementCheck>,
}

/// Runs the three reconciliation jobs synchronously and returns their
/// combined output. The same jobs the scheduler runs nightly (spec §6
/// cadence table); this lets an operator trigger one on demand.
pub async fn reconciliation_report(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = reconciliation::balance_reconciliation(&state.store, state.principal_source.as_ref()).await?;
    let accounting_incidents = reconciliation::accounting_integrity(&state.store).await?;
    let settlement_checks = reconciliation::settlement_integrity(&state.store).await?;
    Ok(Json(ReconciliationResponse { report, accounting_incidents, settlement_checks }))
}

pub async fn breaker_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let status = state.breaker.status().await?;
    Ok(Json(json!({
        "enforcement": {
            "globalBlock": status.global_block,
            "globalFreeze": status.global_freeze,
            "requireManualApproval": status.require_manual_approval,
        },
        "openIncidentCount": status.open_incident_count,
        "activeOverrideCount": status.active_override_count,
    })))
}

pub async fn breaker_overrides(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.breaker.list_overrides().await)
}

pub async fn list_incidents(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_open_incidents().await?))
}

pub async fn resolve_incident(
    State(state): State<AppState>,
    Path(incident_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.resolve_incident(&incident_id, loanctl_core::time::now_unix()).await?;
    Ok(Json(json!({"resolved": incident_id})))
}

/// Admin replay: `POST /admin/ops/chain-actions/:id/requeue`. Idempotent
/// and refuses MINED or SENT-with-tx-hash actions (spec §3 invariant iii).
pub async fn requeue_action(
    State(state): State<AppState>,
    Path(action_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = ActionId::from(action_id.clone());
    state.enqueuer.requeue(&id).await?;
    Ok(Json(json!({"requeued": action_id})))
}

/// Partner delinquency/default posture derived from open breaker
/// incidents, since loan/partner lifecycle has no dedicated entity in
/// this store (spec §1, "out of core").
pub async fn partner_status(
    State(state): State<AppState>,
    Path(partner_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let partner_id = PartnerId::from(partner_id);
    let open = state.store.list_open_incidents().await?;
    let incidents: Vec<_> = open.into_iter().filter(|inc| inc.partner_id.as_ref() == Some(&partner_id)).collect();
    let origination_allowed = state.breaker.assert_origination_allowed(&partner_id).await.is_ok();
    let status = if origination_allowed { PartnerStatus::Active } else { PartnerStatus::Suspended };
    Ok(Json(json!({
        "partnerId": partner_id,
        "status": status,
        "originationAllowed": origination_allowed,
        "openIncidents": incidents,
    })))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_open = state.store.list_open_incidents().await.is_ok();
    Json(json!({"status": "ok", "storeReachable": store_open}))
}
