//! Repayment (INBOUND) state machine (spec §4.2):
//!
//! ```text
//! PENDING → REPAYMENT_RECEIVED → CHAIN_REPAY_PENDING → CHAIN_REPAY_CONFIRMED
//! ```

use std::sync::Arc;

use loanctl_chain::ActionEnqueuer;
use loanctl_core::{canonical, sha256, time::now_unix, LoanId, MinorUnits};
use loanctl_store::{ActionPayload, FiatTransfer, Store, TransferDirection, TransferStatus};
use tracing::info;

use crate::error::FiatError;

pub struct HandleRepaymentParams {
    pub loan_id: LoanId,
    pub provider_ref: String,
    pub idempotency_key: String,
    pub amount_kes: MinorUnits,
    pub phone_number: String,
    pub raw_payload: Vec<u8>,
    pub ts: i64,
    /// If the caller knows the expected repayment amount (e.g. the next due
    /// installment total), it is enforced here; `None` skips the check.
    pub expected_amount: Option<MinorUnits>,
}

/// Idempotent on `idempotencyKey`. Enforces amount match when an expected
/// amount is supplied, persists proof/ref hashes, enqueues REPAY then
/// RECORD_REPAYMENT in order, and advances to CHAIN_REPAY_PENDING.
pub async fn handle_repayment(
    store: &Arc<dyn Store>,
    enqueuer: &Arc<dyn ActionEnqueuer>,
    params: HandleRepaymentParams,
) -> Result<FiatTransfer, FiatError> {
    if let Some(existing) = store.get_transfer_by_idempotency_key(&params.idempotency_key).await? {
        info!(idempotency_key = %params.idempotency_key, "repayment already applied, skipping");
        return Ok(existing);
    }

    if let Some(expected) = params.expected_amount {
        if expected != params.amount_kes {
            return Err(FiatError::AmountMismatch {
                expected: expected.to_string(),
                actual: params.amount_kes.to_string(),
            });
        }
    }

    let canonical_payload = canonical::canonicalize_json_bytes(&params.raw_payload)
        .unwrap_or_else(|_| params.raw_payload.clone());
    let proof_hash = sha256::digest_hex(&canonical_payload);
    let ref_hash = sha256::ref_hash(&params.provider_ref, &params.loan_id.to_string(), "INBOUND");

    let now = now_unix();
    let mut transfer = FiatTransfer {
        id: params.idempotency_key.clone(),
        loan_id: params.loan_id.clone(),
        direction: TransferDirection::Inbound,
        status: TransferStatus::RepaymentReceived,
        provider_ref: params.provider_ref,
        idempotency_key: params.idempotency_key.clone(),
        amount_kes: params.amount_kes,
        phone_number: params.phone_number,
        ref_hash: Some(ref_hash.clone()),
        proof_hash: Some(proof_hash.clone()),
        raw_payload: String::from_utf8_lossy(&params.raw_payload).into_owned(),
        webhook_timestamp: params.ts,
        confirmed_at: Some(now),
        applied_onchain_at: None,
        failed_at: None,
        failure_reason: None,
    };
    store.insert_transfer(transfer.clone()).await?;

    enqueuer
        .enqueue(
            transfer.loan_id.clone(),
            ActionPayload::Repay { amount: params.amount_kes, ref_hash: ref_hash.clone() },
            Some(format!("repay:{}", transfer.idempotency_key)),
            1,
        )
        .await?;
    enqueuer
        .enqueue(
            transfer.loan_id.clone(),
            ActionPayload::RecordRepayment { ref_hash, proof_hash },
            Some(format!("record-repayment:{}", transfer.idempotency_key)),
            1,
        )
        .await?;

    transfer.status = TransferStatus::ChainRepayPending;
    store.update_transfer(transfer.clone()).await?;
    Ok(transfer)
}

/// Confirmation of the REPAY action: advances the latest INBOUND transfer to
/// CHAIN_REPAY_CONFIRMED and stamps `appliedOnchainAt`.
pub async fn on_repay_confirmed(store: &Arc<dyn Store>, loan_id: &LoanId) -> Result<(), FiatError> {
    let Some(mut transfer) = store.latest_transfer(loan_id, TransferDirection::Inbound).await?
    else {
        return Ok(());
    };
    if transfer.status == TransferStatus::ChainRepayPending {
        transfer.status = TransferStatus::ChainRepayConfirmed;
        transfer.applied_onchain_at = Some(now_unix());
        store.update_transfer(transfer).await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use loanctl_store::memory::MemoryStore;

    use super::*;

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
    async fn repeat_idempotency_key_is_a_noop() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let enqueuer: Arc<dyn ActionEnqueuer> = Arc::new(NoopEnqueuer);
        let loan_id = LoanId::from("loan-9".to_string());

        let make_params = || HandleRepaymentParams {
            loan_id: loan_id.clone(),
            provider_ref: "prov-9".into(),
            idempotency_key: "idem-9".into(),
            amount_kes: MinorUnits(5_000),
            phone_number: "+254711111111".into(),
            raw_payload: br#"{"x":1}"#.to_vec(),
            ts: now_unix(),
            expected_amount: None,
        };

        let first = handle_repayment(&store, &enqueuer, make_params()).await.unwrap();
        let second = handle_repayment(&store, &enqueuer, make_params()).await.unwrap();
        assert_eq!(first.idempotency_key, second.idempotency_key);
        assert_eq!(second.status, TransferStatus::ChainRepayPending);
    }

    #[tokio::test]
    async fn confirmation_stamps_applied_onchain_at() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let enqueuer: Arc<dyn ActionEnqueuer> = Arc::new(NoopEnqueuer);
        let loan_id = LoanId::from("loan-10".to_string());

        handle_repayment(
            &store,
            &enqueuer,
            HandleRepaymentParams {
                loan_id: loan_id.clone(),
                provider_ref: "prov-10".into(),
                idempotency_key: "idem-10".into(),
                amount_kes: MinorUnits(5_000),
                phone_number: "+254711111111".into(),
                raw_payload: br#"{"x":1}"#.to_vec(),
                ts: now_unix(),
                expected_amount: Some(MinorUnits(5_000)),
            },
        )
        .await
        .unwrap();

        on_repay_confirmed(&store, &loan_id).await.unwrap();
        let transfer = store.latest_transfer(&loan_id, TransferDirection::Inbound).await.unwrap().unwrap();
        assert_eq!(transfer.status, TransferStatus::ChainRepayConfirmed);
        assert!(transfer.applied_onchain_at.is_some());
    }
}
