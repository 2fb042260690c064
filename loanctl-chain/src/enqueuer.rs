//! A narrow trait capturing just the `enqueue` entrypoint, so collaborators
//! (the fiat state machines, the installment engine) can depend on "a thing
//! that can enqueue chain actions" without being generic over the concrete
//! `ChainSender` implementation the pipeline was built with.

use async_trait::async_trait;
use loanctl_core::{ActionId, LoanId};
use loanctl_store::{ActionPayload, ChainAction};

use crate::chain_sender::ChainSender;
use crate::error::PipelineError;
use crate::pipeline::ActionPipeline;

#[async_trait]
pub trait ActionEnqueuer: Send + Sync {
    async fn enqueue(
        &self,
        loan_id: LoanId,
        payload: ActionPayload,
        action_key: Option<String>,
        confirmations_required: u32,
    ) -> Result<ActionId, PipelineError>;

    async fn get_action(&self, id: &ActionId) -> Result<Option<ChainAction>, PipelineError>;

    /// Admin replay: moves a non-terminal, non-SENT action back to QUEUED.
    async fn requeue(&self, id: &ActionId) -> Result<(), PipelineError>;
}

#[async_trait]
impl<CS: ChainSender> ActionEnqueuer for ActionPipeline<CS> {
    async fn enqueue(
        &self,
        loan_id: LoanId,
        payload: ActionPayload,
        action_key: Option<String>,
        confirmations_required: u32,
    ) -> Result<ActionId, PipelineError> {
        ActionPipeline::enqueue(self, loan_id, payload, action_key, confirmations_required).await
    }

    async fn get_action(&self, id: &ActionId) -> Result<Option<ChainAction>, PipelineError> {
        Ok(self.store().get_action(id).await?)
    }

    async fn requeue(&self, id: &ActionId) -> Result<(), PipelineError> {
        ActionPipeline::requeue_action(self, id).await
    }
}
