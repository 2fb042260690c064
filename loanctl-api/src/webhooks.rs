//! Webhook ingress (spec §6, §4.2.1). Raw bytes are pulled via `axum::body::Bytes`
//! rather than a JSON extractor because signature verification needs the
//! exact wire bytes, the same reason the reference reserves a dedicated
//! extractor (`LxJson`) instead of trusting `axum::Json`'s body handling —
//! here the constraint runs one step earlier, before any deserialisation.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use http::{HeaderMap, StatusCode};
use loanctl_core::ids::random_hex_id;
use loanctl_core::{time::now_unix, MinorUnits};
use loanctl_fiat::disbursement::{self, InitiatePayoutParams};
use loanctl_fiat::repayment::{self, HandleRepaymentParams};
use loanctl_fiat::webhook::{self, IngestOutcome, WebhookPayload};
use loanctl_store::{DeadLetter, DeadLetterReason};
use tracing::{error, warn};

use crate::state::AppState;

/// Every outcome — success, dead-letter, or internal error — renders the
/// same provider-facing ACK body. The provider never learns why a webhook
/// didn't take; that's the operator's job via `/admin/ops/reconciliation`.
fn ack() -> impl IntoResponse {
    (StatusCode::OK, r#"{"status":"received"}"#)
}

/// Persists a downstream-processing dead-letter (spec §7: "all errors become
/// dead-letter rows plus provider-ACK"). `webhook::ingest` already records
/// the ingress-stage failures; this covers the failures that can only happen
/// after a payload has been parsed and handed to a state machine.
async fn record_processing_dead_letter(state: &AppState, source: &str, raw_body: &[u8], detail: String) {
    let dead_letter = DeadLetter {
        id: random_hex_id("deadletter"),
        source: source.to_string(),
        reason: DeadLetterReason::ProcessingFailed,
        detail,
        raw_body: raw_body.to_vec(),
        created_at: now_unix(),
    };
    if let Err(store_err) = state.store.insert_dead_letter(dead_letter).await {
        warn!(%store_err, "failed to persist dead-letter row");
    }
}

async fn verify_and_parse(
    state: &AppState,
    provider: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<WebhookPayload, ()> {
    let Some(secret) = state.config.webhook_secrets.get(provider) else {
        warn!(provider, "webhook received for unconfigured provider");
        record_processing_dead_letter(state, provider, body, "no webhook secret configured for provider".to_string())
            .await;
        return Err(());
    };
    let signature = headers
        .get(format!("x-{provider}-signature"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match webhook::ingest(&state.store, provider, secret, body, signature).await {
        IngestOutcome::Accepted(payload) => Ok(payload),
        IngestOutcome::DeadLettered(err) => {
            warn!(provider, %err, "webhook dead-lettered");
            Err(())
        }
    }
}

pub async fn disbursement(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Ok(payload) = verify_and_parse(&state, &provider, &headers, &body).await else {
        return ack();
    };

    // First-contact requests (no transfer yet) are provider-initiated
    // "payout accepted" callbacks; subsequent confirmation callbacks drive
    // the state machine forward. Both share the same idempotency key.
    if state
        .store
        .get_transfer_by_idempotency_key(&payload.idempotency_key)
        .await
        .ok()
        .flatten()
        .is_none()
    {
        if let Err(err) = disbursement::initiate_payout(
            &state.store,
            InitiatePayoutParams {
                loan_id: payload.loan_id.clone(),
                provider_ref: payload.provider_ref.clone(),
                idempotency_key: payload.idempotency_key.clone(),
                amount_kes: MinorUnits(payload.amount_minor),
                phone_number: payload.phone_number.clone(),
            },
        )
        .await
        {
            error!(%err, "initiate_payout failed, dead-lettering");
            record_processing_dead_letter(&state, &provider, &payload.raw_body, err.to_string()).await;
            return ack();
        }
    }

    if let Err(err) = disbursement::handle_disbursement_confirmed(
        &state.store,
        &state.enqueuer,
        &payload.provider_ref,
        &payload.idempotency_key,
        &payload.raw_body,
        MinorUnits(payload.amount_minor),
        payload.timestamp_unix,
    )
    .await
    {
        error!(%err, "handle_disbursement_confirmed failed, dead-lettering");
        record_processing_dead_letter(&state, &provider, &payload.raw_body, err.to_string()).await;
    }

    ack()
}

pub async fn repayment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Ok(payload) = verify_and_parse(&state, &provider, &headers, &body).await else {
        return ack();
    };
    let raw_body = payload.raw_body.clone();

    if let Err(err) = repayment::handle_repayment(
        &state.store,
        &state.enqueuer,
        HandleRepaymentParams {
            loan_id: payload.loan_id,
            provider_ref: payload.provider_ref,
            idempotency_key: payload.idempotency_key,
            amount_kes: MinorUnits(payload.amount_minor),
            phone_number: payload.phone_number,
            raw_payload: payload.raw_body,
            ts: payload.timestamp_unix,
            expected_amount: None,
        },
    )
    .await
    {
        error!(%err, "handle_repayment failed, dead-lettering");
        record_processing_dead_letter(&state, &provider, &raw_body, err.to_string()).await;
    }

    ack()
}
