//! The durable store: data model, `Store` trait, and two backends (an
//! embedded sled-based production store, and an in-memory store for tests).

pub mod error;
pub mod memory;
pub mod model;
pub mod sled_store;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use model::*;
pub use sled_store::SledStore;
pub use traits::Store;

#[cfg(test)]
mod test {
    use loanctl_core::{ActionId, LoanId, PartnerId};

    use super::*;

    fn sample_action(key: Option<&str>) -> ChainAction {
        ChainAction {
            id: ActionId::generate(),
            action_key: key.map(|k| k.to_string()),
            loan_id: LoanId::new("loan-1"),
            payload: ActionPayload::CreateLoan {
                partner_id: PartnerId::new("partner-1"),
                principal: loanctl_core::MinorUnits(100_000_000),
            },
            state: ActionState::Queued,
            tx_hash: None,
            nonce: None,
            bump_count: 0,
            attempts: 0,
            next_retry_at: None,
            sent_at: None,
            mined_at: None,
            dlq_at: None,
            last_error: None,
            block_number: None,
            gas_used: None,
            revert_reason: None,
            confirmations_received: 0,
            confirmations_required: 1,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_action_key_conflicts() {
        let store = MemoryStore::new();
        store.insert_action(sample_action(Some("idem-1"))).await.unwrap();
        let err = store.insert_action(sample_action(Some("idem-1"))).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_actions_by_state_is_ordered_by_creation() {
        let store = MemoryStore::new();
        let mut a = sample_action(None);
        a.created_at = 5;
        let mut b = sample_action(None);
        b.created_at = 1;
        store.insert_action(a.clone()).await.unwrap();
        store.insert_action(b.clone()).await.unwrap();
        let listed = store.list_actions_by_state(ActionState::Queued, 10).await.unwrap();
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }
}
