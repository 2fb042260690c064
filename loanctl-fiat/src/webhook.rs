//! Webhook verification (spec §4.2.1): signature check, payload parsing,
//! freshness gate, replay gate. The ingress layer always ACKs once a request
//! has been durably dead-lettered or accepted — unrecoverable processing
//! errors never propagate as HTTP failures (spec §4.2.1, §7).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use loanctl_core::ids::random_hex_id;
use loanctl_core::{sha256, time::now_unix};
use loanctl_store::{DeadLetter, DeadLetterReason, Store, TIMESTAMP_FRESHNESS_MS};
use serde_json::Value;
use tracing::warn;

use crate::error::WebhookError;

impl WebhookError {
    fn dead_letter_reason(&self) -> DeadLetterReason {
        match self {
            WebhookError::InvalidSignature => DeadLetterReason::InvalidSignature,
            WebhookError::MalformedPayload(_) => DeadLetterReason::MalformedPayload,
            WebhookError::UnrecognisedEvent(_) => DeadLetterReason::UnrecognisedEvent,
            WebhookError::StaleTimestamp(_) => DeadLetterReason::StaleTimestamp,
            WebhookError::Replay { .. } => DeadLetterReason::Replay,
        }
    }
}

/// Persists the durable dead-letter row spec §7 requires before the caller
/// ACKs ("all errors become dead-letter rows plus provider-ACK"). Failure to
/// write is logged but never turns into a second error path — the ACK still
/// happens either way, same fail-open posture as the rest of ingest.
async fn record_dead_letter(store: &Arc<dyn Store>, source: &str, raw_body: &[u8], err: &WebhookError) {
    let dead_letter = DeadLetter {
        id: random_hex_id("deadletter"),
        source: source.to_string(),
        reason: err.dead_letter_reason(),
        detail: err.to_string(),
        raw_body: raw_body.to_vec(),
        created_at: now_unix(),
    };
    if let Err(store_err) = store.insert_dead_letter(dead_letter).await {
        warn!(%store_err, "failed to persist dead-letter row");
    }
}

#[derive(Clone, Debug)]
pub struct WebhookPayload {
    pub loan_id: loanctl_core::LoanId,
    pub provider_ref: String,
    pub idempotency_key: String,
    pub amount_minor: i128,
    pub phone_number: String,
    pub timestamp_unix: i64,
    pub nonce: String,
    pub raw_body: Vec<u8>,
}

/// Verifies `x-<provider>-signature` (hex HMAC-SHA-256 over the raw body)
/// using constant-time comparison.
pub fn verify_signature(secret: &[u8], raw_body: &[u8], signature_hex: &str) -> bool {
    let expected = sha256::hmac_sha256_hex(secret, raw_body);
    sha256::verify_hmac_hex(&expected, &signature_hex.to_lowercase())
}

/// Supports the 14-digit provider timestamp format (`YYYYMMDDHHMMSS`) and
/// ISO 8601.
pub fn parse_timestamp(raw: &str) -> Result<i64, WebhookError> {
    if raw.len() == 14 && raw.chars().all(|c| c.is_ascii_digit()) {
        let fmt = "%Y%m%d%H%M%S";
        let naive = chrono::NaiveDateTime::parse_from_str(raw, fmt)
            .map_err(|e| WebhookError::MalformedPayload(format!("bad 14-digit timestamp: {e}")))?;
        return Ok(naive.and_utc().timestamp());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).timestamp())
        .map_err(|e| WebhookError::MalformedPayload(format!("bad ISO 8601 timestamp: {e}")))
}

/// Parses a provider JSON payload into the fields the state machines need.
/// `nonce` defaults to the idempotency key when the provider doesn't send a
/// distinct one (spec §4.2.1 step 3).
pub fn parse_payload(raw_body: &[u8]) -> Result<WebhookPayload, WebhookError> {
    let json: Value = serde_json::from_slice(raw_body)
        .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    let field = |name: &str| -> Result<&Value, WebhookError> {
        json.get(name).ok_or_else(|| WebhookError::MalformedPayload(format!("missing field {name}")))
    };

    let loan_id = field("loan_id")?
        .as_str()
        .ok_or_else(|| WebhookError::MalformedPayload("loan_id not a string".into()))?
        .to_string();
    let provider_ref = field("provider_ref")?
        .as_str()
        .ok_or_else(|| WebhookError::MalformedPayload("provider_ref not a string".into()))?
        .to_string();
    let idempotency_key = field("idempotency_key")?
        .as_str()
        .ok_or_else(|| WebhookError::MalformedPayload("idempotency_key not a string".into()))?
        .to_string();
    let amount_minor = field("amount")?
        .as_i64()
        .ok_or_else(|| WebhookError::MalformedPayload("amount not an integer".into()))? as i128;
    let phone_number = field("phone_number")?
        .as_str()
        .ok_or_else(|| WebhookError::MalformedPayload("phone_number not a string".into()))?
        .to_string();
    let timestamp_raw = field("timestamp")?
        .as_str()
        .ok_or_else(|| WebhookError::MalformedPayload("timestamp not a string".into()))?;
    let timestamp_unix = parse_timestamp(timestamp_raw)?;
    let nonce = json
        .get("nonce")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| idempotency_key.clone());

    Ok(WebhookPayload {
        loan_id: loanctl_core::LoanId::from(loan_id),
        provider_ref,
        idempotency_key,
        amount_minor,
        phone_number,
        timestamp_unix,
        nonce,
        raw_body: raw_body.to_vec(),
    })
}

#[derive(Debug)]
pub enum IngestOutcome {
    Accepted(WebhookPayload),
    DeadLettered(WebhookError),
}

/// Runs webhook ingest steps 1-5 (spec §4.2.1): signature, parse, freshness,
/// replay. Step 6 (dispatch to the state machine) is the caller's job once
/// it receives `Accepted`.
pub async fn ingest(
    store: &Arc<dyn Store>,
    source: &str,
    secret: &[u8],
    raw_body: &[u8],
    signature_hex: &str,
) -> IngestOutcome {
    if !verify_signature(secret, raw_body, signature_hex) {
        warn!(source, "webhook signature verification failed");
        let err = WebhookError::InvalidSignature;
        record_dead_letter(store, source, raw_body, &err).await;
        return IngestOutcome::DeadLettered(err);
    }

    let payload = match parse_payload(raw_body) {
        Ok(p) => p,
        Err(err) => {
            record_dead_letter(store, source, raw_body, &err).await;
            return IngestOutcome::DeadLettered(err);
        }
    };

    let now = now_unix();
    if (now * 1_000 - payload.timestamp_unix * 1_000).abs() > TIMESTAMP_FRESHNESS_MS {
        let err = WebhookError::StaleTimestamp(payload.timestamp_unix);
        record_dead_letter(store, source, raw_body, &err).await;
        return IngestOutcome::DeadLettered(err);
    }

    match store.claim_webhook_nonce(source, &payload.nonce, now).await {
        Ok(true) => IngestOutcome::Accepted(payload),
        Ok(false) => {
            let err = WebhookError::Replay { src: source.to_string(), nonce: payload.nonce };
            record_dead_letter(store, source, raw_body, &err).await;
            IngestOutcome::DeadLettered(err)
        }
        Err(err) => {
            warn!(%err, "webhook-nonce claim failed at the store layer");
            let err = WebhookError::MalformedPayload(err.to_string());
            record_dead_letter(store, source, raw_body, &err).await;
            IngestOutcome::DeadLettered(err)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fourteen_digit_timestamp_parses() {
        let ts = parse_timestamp("20250101120000").unwrap();
        assert_eq!(ts, 1_735_732_800);
    }

    #[test]
    fn iso8601_timestamp_parses() {
        let ts = parse_timestamp("2025-01-01T12:00:00Z").unwrap();
        assert_eq!(ts, 1_735_732_800);
    }

    #[test]
    fn signature_must_match_raw_body() {
        let secret = b"shh";
        let body = br#"{"a":1}"#;
        let sig = sha256::hmac_sha256_hex(secret, body);
        assert!(verify_signature(secret, body, &sig));
        assert!(!verify_signature(secret, b"tampered", &sig));
    }
}
