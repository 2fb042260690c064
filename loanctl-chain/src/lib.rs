//! The durable action pipeline: nonce manager, failure classifier, gas
//! strategy, and the three cooperative loops that drive `ChainAction` to
//! MINED or DLQ.

pub mod chain_sender;
pub mod classifier;
pub mod enqueuer;
pub mod error;
pub mod gas;
pub mod nonce;
pub mod pipeline;

pub use chain_sender::{ChainReceipt, ChainSender, ChainSenderError, FeeEstimate, ReceiptStatus};
pub use enqueuer::ActionEnqueuer;
pub use error::PipelineError;
pub use nonce::{NonceError, NonceManager};
pub use pipeline::{ActionPipeline, PostMineEvent};
