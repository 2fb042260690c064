//! Disbursement (OUTBOUND) state machine (spec §4.2):
//!
//! ```text
//! PENDING → PAYOUT_INITIATED → PAYOUT_CONFIRMED → CHAIN_RECORD_PENDING
//!                                              → CHAIN_RECORDED → ACTIVATED
//! ```
//!
//! Failure branches at any step land in FAILED.

use std::sync::Arc;

use loanctl_chain::ActionEnqueuer;
use loanctl_core::{canonical, sha256, time::now_unix, LoanId, MinorUnits};
use loanctl_store::{ActionPayload, FiatTransfer, Store, TransferDirection, TransferStatus};
use tracing::{info, warn};

use crate::error::FiatError;

pub struct InitiatePayoutParams {
    pub loan_id: LoanId,
    pub provider_ref: String,
    pub idempotency_key: String,
    pub amount_kes: MinorUnits,
    pub phone_number: String,
}

/// Idempotent on `idempotencyKey`: a repeat call with the same key returns
/// the existing transfer without resubmitting to the provider.
pub async fn initiate_payout(
    store: &Arc<dyn Store>,
    params: InitiatePayoutParams,
) -> Result<FiatTransfer, FiatError> {
    if let Some(existing) = store.get_transfer_by_idempotency_key(&params.idempotency_key).await? {
        return Ok(existing);
    }

    let now = now_unix();
    let mut transfer = FiatTransfer {
        id: params.idempotency_key.clone(),
        loan_id: params.loan_id,
        direction: TransferDirection::Outbound,
        status: TransferStatus::Pending,
        provider_ref: params.provider_ref,
        idempotency_key: params.idempotency_key,
        amount_kes: params.amount_kes,
        phone_number: params.phone_number,
        ref_hash: None,
        proof_hash: None,
        raw_payload: String::new(),
        webhook_timestamp: now,
        confirmed_at: None,
        applied_onchain_at: None,
        failed_at: None,
        failure_reason: None,
    };
    store.insert_transfer(transfer.clone()).await?;

    // Provider submission is an external side effect (out of scope here);
    // once accepted, the transfer moves to PAYOUT_INITIATED.
    transfer.status = TransferStatus::PayoutInitiated;
    store.update_transfer(transfer.clone()).await?;
    Ok(transfer)
}

/// Idempotent on the "past initiation" status set (spec §4.2). On first
/// arrival at PAYOUT_INITIATED: checks the amount, computes `proofHash` /
/// `refHash`, advances to PAYOUT_CONFIRMED, enqueues RECORD_DISBURSEMENT then
/// ACTIVATE_LOAN in order, and advances to CHAIN_RECORD_PENDING.
pub async fn handle_disbursement_confirmed(
    store: &Arc<dyn Store>,
    enqueuer: &Arc<dyn ActionEnqueuer>,
    provider_ref: &str,
    idempotency_key: &str,
    raw_payload: &[u8],
    amount: MinorUnits,
    ts: i64,
) -> Result<(), FiatError> {
    let mut transfer = store
        .get_transfer_by_idempotency_key(idempotency_key)
        .await?
        .ok_or(FiatError::NoTransferInExpectedState)?;

    if transfer.status.is_past_initiation() {
        info!(idempotency_key, "disbursement confirmation already applied, skipping");
        return Ok(());
    }
    if transfer.status != TransferStatus::PayoutInitiated {
        return Err(FiatError::NoTransferInExpectedState);
    }
    if amount != transfer.amount_kes {
        return Err(FiatError::AmountMismatch {
            expected: transfer.amount_kes.to_string(),
            actual: amount.to_string(),
        });
    }

    let canonical_payload =
        canonical::canonicalize_json_bytes(raw_payload).unwrap_or_else(|_| raw_payload.to_vec());
    let proof_hash = sha256::digest_hex(&canonical_payload);
    let ref_hash = sha256::ref_hash(provider_ref, &transfer.loan_id.to_string(), "OUTBOUND");

    transfer.ref_hash = Some(ref_hash.clone());
    transfer.proof_hash = Some(proof_hash.clone());
    transfer.raw_payload = String::from_utf8_lossy(raw_payload).into_owned();
    transfer.webhook_timestamp = ts;
    transfer.confirmed_at = Some(now_unix());
    transfer.status = TransferStatus::PayoutConfirmed;
    store.update_transfer(transfer.clone()).await?;

    enqueuer
        .enqueue(
            transfer.loan_id.clone(),
            ActionPayload::RecordDisbursement { ref_hash, proof_hash: proof_hash.clone() },
            Some(format!("record-disbursement:{idempotency_key}")),
            1,
        )
        .await?;
    enqueuer
        .enqueue(
            transfer.loan_id.clone(),
            ActionPayload::ActivateLoan {
                fiat_disbursement_ref: provider_ref.to_string(),
                proof_hash,
            },
            Some(format!("activate-loan:{idempotency_key}")),
            1,
        )
        .await?;

    transfer.status = TransferStatus::ChainRecordPending;
    store.update_transfer(transfer).await?;
    Ok(())
}

/// If the latest OUTBOUND transfer for `loan_id` is CHAIN_RECORD_PENDING,
/// advances it to CHAIN_RECORDED.
pub async fn on_record_disbursement_confirmed(
    store: &Arc<dyn Store>,
    loan_id: &LoanId,
) -> Result<(), FiatError> {
    let Some(mut transfer) = store.latest_transfer(loan_id, TransferDirection::Outbound).await?
    else {
        return Ok(());
    };
    if transfer.status == TransferStatus::ChainRecordPending {
        transfer.status = TransferStatus::ChainRecorded;
        store.update_transfer(transfer).await?;
    }
    Ok(())
}

/// Activation guard (spec §4.2): advances to ACTIVATED only if the current
/// status is CHAIN_RECORDED. This is the structural invariant that keeps a
/// loan from going live on-chain before fiat proof is durable.
pub async fn on_activate_loan_confirmed(store: &Arc<dyn Store>, loan_id: &LoanId) -> Result<(), FiatError> {
    let Some(mut transfer) = store.latest_transfer(loan_id, TransferDirection::Outbound).await?
    else {
        return Ok(());
    };
    if transfer.status != TransferStatus::ChainRecorded {
        warn!(%loan_id, status = ?transfer.status, "activation guard: refusing to activate, not CHAIN_RECORDED");
        return Ok(());
    }
    transfer.status = TransferStatus::Activated;
    store.update_transfer(transfer).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use loanctl_core::ids::PartnerId;
    use loanctl_store::memory::MemoryStore;

    use super::*;

    fn loan_id() -> LoanId {
        LoanId::from("loan-1".to_string())
    }

    struct NoopEnqueuer;

    #[async_trait::async_trait]
    impl ActionEnqueuer for NoopEnqueuer {
        async fn enqueue(
            &self,
            _loan_id: LoanId,
            _payload: ActionPayload,
            _action_key: Option<String>,
            _confirmations_required: u32,
        ) -> Result<loanctl_core::ActionId, loanctl_chain::PipelineError> {
            Ok(loanctl_core::ActionId::generate())
        }

        async fn get_action(
            &self,
            _id: &loanctl_core::ActionId,
        ) -> Result<Option<loanctl_store::ChainAction>, loanctl_chain::PipelineError> {
            Ok(None)
        }

        async fn requeue(&self, _id: &loanctl_core::ActionId) -> Result<(), loanctl_chain::PipelineError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn activation_guard_blocks_until_chain_recorded() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let enqueuer: Arc<dyn ActionEnqueuer> = Arc::new(NoopEnqueuer);
        let _ = PartnerId::from("partner-1".to_string());

        initiate_payout(
            &store,
            InitiatePayoutParams {
                loan_id: loan_id(),
                provider_ref: "prov-ref-1".into(),
                idempotency_key: "idem-1".into(),
                amount_kes: MinorUnits(10_000),
                phone_number: "+254700000000".into(),
            },
        )
        .await
        .unwrap();

        handle_disbursement_confirmed(
            &store,
            &enqueuer,
            "prov-ref-1",
            "idem-1",
            br#"{"a":1}"#,
            MinorUnits(10_000),
            now_unix(),
        )
        .await
        .unwrap();

        // Attempting activation before the RECORD_DISBURSEMENT receipt
        // lands must be a no-op: still CHAIN_RECORD_PENDING.
        on_activate_loan_confirmed(&store, &loan_id()).await.unwrap();
        let transfer = store
            .latest_transfer(&loan_id(), TransferDirection::Outbound)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transfer.status, TransferStatus::ChainRecordPending);

        on_record_disbursement_confirmed(&store, &loan_id()).await.unwrap();
        on_activate_loan_confirmed(&store, &loan_id()).await.unwrap();
        let transfer = store
            .latest_transfer(&loan_id(), TransferDirection::Outbound)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transfer.status, TransferStatus::Activated);
    }

    #[tokio::test]
    async fn amount_mismatch_is_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let enqueuer: Arc<dyn ActionEnqueuer> = Arc::new(NoopEnqueuer);

        initiate_payout(
            &store,
            InitiatePayoutParams {
                loan_id: loan_id(),
                provider_ref: "prov-ref-1".into(),
                idempotency_key: "idem-2".into(),
                amount_kes: MinorUnits(10_000),
                phone_number: "+254700000000".into(),
            },
        )
        .await
        .unwrap();

        let result = handle_disbursement_confirmed(
            &store,
            &enqueuer,
            "prov-ref-1",
            "idem-2",
            br#"{"a":1}"#,
            MinorUnits(9_999),
            now_unix(),
        )
        .await;
        assert!(matches!(result, Err(FiatError::AmountMismatch { .. })));
    }
}
