//! The durable-store data model (spec §3): every row type the rest of the
//! workspace reads and writes. All rows are exclusively owned by the store —
//! services hold no long-lived mutable copies.

use loanctl_core::{ActionId, LoanId, MinorUnits, PartnerId};
use serde::{Deserialize, Serialize};

pub const MAX_BUMP_COUNT: u32 = 3;
pub const MAX_RETRIES: u32 = 5;
pub const STUCK_TX_THRESHOLD_MS: i64 = 5 * 60 * 1_000;
pub const WEBHOOK_NONCE_TTL_SECS: i64 = 24 * 60 * 60;
pub const TIMESTAMP_FRESHNESS_MS: i64 = 5 * 60 * 1_000;

// --- ChainAction --- //

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    CreateLoan,
    FundLoan,
    ActivateLoan,
    RecordDisbursement,
    Repay,
    RecordRepayment,
    ConfigureSchedule,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Queued,
    Processing,
    Sent,
    Mined,
    Failed,
    Retrying,
    Dlq,
}

impl ActionState {
    /// Terminal states never re-enter another state through the automatic
    /// pipeline (invariant iii); only admin replay may move DLQ back to
    /// QUEUED.
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionState::Mined | ActionState::Dlq)
    }
}

/// Structured, per-action-type payload. Re-architected from the source's
/// untyped key-value blob (design notes §9) into a tagged variant decoded
/// strictly on read; stored as JSON in the durable row for forward
/// compatibility.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPayload {
    CreateLoan {
        partner_id: PartnerId,
        principal: MinorUnits,
    },
    FundLoan {
        amount: MinorUnits,
    },
    ActivateLoan {
        fiat_disbursement_ref: String,
        proof_hash: String,
    },
    RecordDisbursement {
        ref_hash: String,
        proof_hash: String,
    },
    Repay {
        amount: MinorUnits,
        ref_hash: String,
    },
    RecordRepayment {
        ref_hash: String,
        proof_hash: String,
    },
    ConfigureSchedule {
        schedule_hash: String,
        total_installments: u32,
        principal_per_installment: MinorUnits,
        interest_rate_bps: u32,
        interval_seconds: i64,
        start_timestamp: i64,
    },
}

impl ActionPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionPayload::CreateLoan { .. } => ActionType::CreateLoan,
            ActionPayload::FundLoan { .. } => ActionType::FundLoan,
            ActionPayload::ActivateLoan { .. } => ActionType::ActivateLoan,
            ActionPayload::RecordDisbursement { .. } => ActionType::RecordDisbursement,
            ActionPayload::Repay { .. } => ActionType::Repay,
            ActionPayload::RecordRepayment { .. } => ActionType::RecordRepayment,
            ActionPayload::ConfigureSchedule { .. } => ActionType::ConfigureSchedule,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainAction {
    pub id: ActionId,
    pub action_key: Option<String>,
    pub loan_id: LoanId,
    pub payload: ActionPayload,
    pub state: ActionState,
    pub tx_hash: Option<String>,
    pub nonce: Option<u64>,
    pub bump_count: u32,
    pub attempts: u32,
    pub next_retry_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub mined_at: Option<i64>,
    pub dlq_at: Option<i64>,
    pub last_error: Option<String>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub revert_reason: Option<String>,
    pub confirmations_received: u32,
    pub confirmations_required: u32,
    pub created_at: i64,
}

impl ChainAction {
    pub fn action_type(&self) -> ActionType {
        self.payload.action_type()
    }

    /// Invariant (i): any action in SENT or later has a non-null `txHash`
    /// and `nonce`.
    pub fn assert_invariants(&self) {
        if matches!(self.state, ActionState::Sent | ActionState::Mined) {
            debug_assert!(self.tx_hash.is_some(), "SENT/MINED action missing tx_hash");
            debug_assert!(self.nonce.is_some(), "SENT/MINED action missing nonce");
        }
        debug_assert!(self.bump_count <= MAX_BUMP_COUNT);
        debug_assert!(self.attempts <= MAX_RETRIES || self.state == ActionState::Dlq);
    }
}

// --- SignerNonce --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignerNonce {
    pub signer: String,
    pub chain_id: u64,
    /// The next nonce the manager will try to assign: one past the highest
    /// nonce successfully submitted.
    pub nonce: u64,
}

// --- FiatTransfer --- //

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferDirection {
    Outbound,
    Inbound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    PayoutInitiated,
    PayoutConfirmed,
    ChainRecordPending,
    ChainRecorded,
    Activated,
    RepaymentReceived,
    ChainRepayPending,
    ChainRepayConfirmed,
    Failed,
    /// Legacy aliases named explicitly in spec §4.2 as treated equivalently
    /// to PAYOUT_CONFIRMED-and-later for idempotency purposes.
    Confirmed,
    AppliedOnchain,
}

impl TransferStatus {
    /// The set `handleDisbursementConfirmed` treats as "already past
    /// initiation" for idempotency (spec §4.2).
    pub fn is_past_initiation(self) -> bool {
        matches!(
            self,
            TransferStatus::PayoutConfirmed
                | TransferStatus::ChainRecordPending
                | TransferStatus::ChainRecorded
                | TransferStatus::Activated
                | TransferStatus::Confirmed
                | TransferStatus::AppliedOnchain
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FiatTransfer {
    pub id: String,
    pub loan_id: LoanId,
    pub direction: TransferDirection,
    pub status: TransferStatus,
    pub provider_ref: String,
    pub idempotency_key: String,
    pub amount_kes: MinorUnits,
    pub phone_number: String,
    pub ref_hash: Option<String>,
    pub proof_hash: Option<String>,
    pub raw_payload: String,
    pub webhook_timestamp: i64,
    pub confirmed_at: Option<i64>,
    pub applied_onchain_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub failure_reason: Option<String>,
}

// --- WebhookNonce --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookNonce {
    pub nonce: String,
    pub source: String,
    pub claimed_at: i64,
}

// --- PartnerStatus --- //

/// Partner lifecycle state surfaced by `GET /admin/partners/:id` (spec
/// §6). There is no dedicated partner entity in this store (spec §1,
/// partner onboarding/KYC is "out of core"), so `PENDING`/`VERIFIED` are
/// part of the wire contract but never produced here; the only states this
/// store can derive from observable data are `ACTIVE` (origination allowed)
/// and `SUSPENDED` (breaker-blocked, globally or for this partner).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartnerStatus {
    Pending,
    Verified,
    Active,
    Suspended,
}

// --- DeadLetter --- //

/// Why a webhook was dead-lettered (spec §4.2.1 steps 2/4/5, §7 taxonomy
/// item iii). Mirrors `WebhookError` without depending on `loanctl-fiat`,
/// the same layering `ActionPayload` uses to avoid a reverse crate edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadLetterReason {
    InvalidSignature,
    MalformedPayload,
    UnrecognisedEvent,
    StaleTimestamp,
    Replay,
    /// A webhook passed ingest but a downstream state-machine transition
    /// (payout initiation, disbursement/repayment confirmation) failed, or
    /// it named a provider with no configured secret.
    ProcessingFailed,
}

/// Durable row for every webhook that never reached a state machine (spec
/// §7: "all errors become dead-letter rows plus provider-ACK"). `raw_body`
/// is kept verbatim for operator replay/audit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: String,
    pub source: String,
    pub reason: DeadLetterReason,
    pub detail: String,
    pub raw_body: Vec<u8>,
    pub created_at: i64,
}

// --- InstallmentSchedule / InstallmentEntry --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallmentSchedule {
    pub loan_id: LoanId,
    pub schedule_hash: String,
    pub schedule_json: String,
    pub total_installments: u32,
    pub principal_per_installment: MinorUnits,
    pub interest_rate_bps: u32,
    pub interval_seconds: i64,
    pub start_timestamp: i64,
    pub grace_period_seconds: i64,
    pub penalty_apr_bps: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Current,
    InGrace,
    Delinquent,
    DefaultCandidate,
    Defaulted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    Pending,
    Due,
    Paid,
    Delinquent,
    Defaulted,
    Waived,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallmentEntry {
    pub loan_id: LoanId,
    pub installment_index: u32,
    pub due_timestamp: i64,
    pub principal_due: MinorUnits,
    pub interest_due: MinorUnits,
    pub total_due: MinorUnits,
    pub principal_paid: MinorUnits,
    pub interest_paid: MinorUnits,
    pub penalty_accrued: MinorUnits,
    pub accrual_status: AccrualStatus,
    pub status: InstallmentStatus,
    pub days_past_due: i64,
    pub delinquent_since: Option<i64>,
}

impl InstallmentEntry {
    pub fn entry_id(&self) -> String {
        entry_id(&self.loan_id, self.installment_index)
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.status, InstallmentStatus::Paid | InstallmentStatus::Waived)
    }
}

/// Composite key for an installment entry: `(loanId, installmentIndex)`.
pub fn entry_id(loan_id: &LoanId, installment_index: u32) -> String {
    format!("{loan_id}:{installment_index}")
}

// --- AccrualSnapshot --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccrualSnapshot {
    pub entry_id: String,
    pub hour_bucket: i64,
    pub penalty_delta: MinorUnits,
    pub days_past_due: i64,
    pub accrual_status: AccrualStatus,
}

// --- Reconciliation / Settlement --- //

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentSeverity {
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    BalanceMismatch,
    ScheduleHashMismatch,
    AccrualDoubleCharge,
    RoundingDrift,
    TimingDrift,
    /// Per-partner 14-day delinquency rate breached its threshold (spec
    /// §4.5, `evaluateDelinquencySpike`).
    DelinquencySpike,
    /// Per-partner 30-day default rate breached its threshold (spec §4.5,
    /// `evaluatePartnerDefaultSpike`).
    PartnerDefaultSpike,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconIncident {
    pub id: String,
    pub loan_id: Option<LoanId>,
    /// Set instead of `loan_id` for the breaker's partner-level spike
    /// incidents (spec §4.5); the two are mutually exclusive in practice.
    pub partner_id: Option<PartnerId>,
    pub kind: IncidentKind,
    pub severity: IncidentSeverity,
    pub detail: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    pub fires_breaker: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconReport {
    pub id: String,
    pub run_at: i64,
    pub loans_checked: u32,
    pub critical_mismatches: u32,
    pub incident_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementCheckKind {
    FiatConfirmedNoChain,
    ChainRecordNoFiat,
    ActiveMissingDisbursement,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettlementCheck {
    pub id: String,
    pub loan_id: LoanId,
    pub kind: SettlementCheckKind,
    pub failed: bool,
    pub run_at: i64,
}
