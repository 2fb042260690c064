//! Circuit breaker consumed contract (spec §4.5). The core only ever calls
//! through this trait — `assertOriginationAllowed` gates loan creation,
//! `evaluateDelinquencySpike` / `evaluatePartnerDefaultSpike` are idempotent
//! thresholded incident creators fed by the installment breaker feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use loanctl_core::ids::random_hex_id;
use loanctl_core::time::now_unix;
use loanctl_core::PartnerId;
use loanctl_store::{IncidentKind, IncidentSeverity, ReconIncident, Store};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::BreakerError;

#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    /// The first check loan creation makes. Errors when blocked globally or
    /// for this specific partner.
    async fn assert_origination_allowed(&self, partner_id: &PartnerId) -> Result<(), BreakerError>;

    /// Idempotent: a spike already flagged by an unresolved incident for
    /// this partner does not create a duplicate. Returns the newly created
    /// incident, or `None` if no incident was created (rate below
    /// threshold, or already flagged).
    async fn evaluate_delinquency_spike(
        &self,
        partner_id: &PartnerId,
        delinquency_rate_14d_bps: u32,
    ) -> Result<Option<ReconIncident>, BreakerError>;

    async fn evaluate_partner_default_spike(
        &self,
        partner_id: &PartnerId,
        default_rate_30d_bps: u32,
    ) -> Result<Option<ReconIncident>, BreakerError>;

    /// Backing data for `GET /admin/breaker/status`.
    async fn status(&self) -> Result<BreakerStatus, BreakerError>;

    /// Backing data for `GET /admin/breaker/overrides`.
    async fn list_overrides(&self) -> Vec<BreakerOverride>;
}

/// Mirrors the admin status response shape: three independent enforcement
/// flags plus open-incident/override counts.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerStatus {
    pub global_block: bool,
    pub global_freeze: bool,
    pub require_manual_approval: bool,
    pub open_incident_count: usize,
    pub active_override_count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerOverride {
    pub partner_id: PartnerId,
    pub reason: &'static str,
}

/// Per-partner metrics the installment breaker feed computes and hands to
/// the evaluators (spec §4.5).
#[derive(Clone, Copy, Debug)]
pub struct PartnerMetrics {
    pub delinquency_rate_14d_bps: u32,
    pub default_rate_30d_bps: u32,
    pub per_borrower_exposure: loanctl_core::MinorUnits,
}

/// A threshold-tripped breaker backed by the durable store for incident
/// persistence and an in-process override map for the global/per-partner
/// trip state. Overrides are operator-set (out of this crate's scope to
/// expose an API for — that's `loanctl-api`'s job); this type just holds
/// and consults them.
pub struct ThresholdBreaker {
    store: Arc<dyn Store>,
    global_tripped: AtomicBool,
    global_freeze: AtomicBool,
    require_manual_approval: AtomicBool,
    partner_tripped: Mutex<HashMap<PartnerId, bool>>,
    delinquency_spike_threshold_bps: u32,
    default_spike_threshold_bps: u32,
}

impl ThresholdBreaker {
    pub fn new(store: Arc<dyn Store>, delinquency_spike_threshold_bps: u32, default_spike_threshold_bps: u32) -> Self {
        Self {
            store,
            global_tripped: AtomicBool::new(false),
            global_freeze: AtomicBool::new(false),
            require_manual_approval: AtomicBool::new(false),
            partner_tripped: Mutex::new(HashMap::new()),
            delinquency_spike_threshold_bps,
            default_spike_threshold_bps,
        }
    }

    pub fn trip_global(&self) {
        warn!("breaker tripped globally");
        self.global_tripped.store(true, Ordering::SeqCst);
    }

    pub fn reset_global(&self) {
        info!("breaker reset globally");
        self.global_tripped.store(false, Ordering::SeqCst);
    }

    /// Freezes origination without marking it a hard block (spec's
    /// `globalFreeze`, distinct from `globalBlock` in the status payload).
    pub fn set_global_freeze(&self, frozen: bool) {
        self.global_freeze.store(frozen, Ordering::SeqCst);
    }

    pub fn set_require_manual_approval(&self, required: bool) {
        self.require_manual_approval.store(required, Ordering::SeqCst);
    }

    pub async fn trip_partner(&self, partner_id: PartnerId) {
        warn!(%partner_id, "breaker tripped for partner");
        self.partner_tripped.lock().await.insert(partner_id, true);
    }

    pub async fn reset_partner(&self, partner_id: &PartnerId) {
        info!(%partner_id, "breaker reset for partner");
        self.partner_tripped.lock().await.remove(partner_id);
    }

    async fn existing_unresolved(&self, partner_id: &PartnerId, kind: IncidentKind) -> Result<bool, BreakerError> {
        let open = self.store.list_open_incidents().await?;
        Ok(open
            .iter()
            .any(|inc| inc.kind == kind && inc.partner_id.as_ref() == Some(partner_id)))
    }
}

#[async_trait]
impl CircuitBreaker for ThresholdBreaker {
    async fn assert_origination_allowed(&self, partner_id: &PartnerId) -> Result<(), BreakerError> {
        if self.global_tripped.load(Ordering::SeqCst) {
            return Err(BreakerError::GlobalTrip);
        }
        if self.partner_tripped.lock().await.get(partner_id).copied().unwrap_or(false) {
            return Err(BreakerError::PartnerTrip(partner_id.clone()));
        }
        Ok(())
    }

    async fn evaluate_delinquency_spike(
        &self,
        partner_id: &PartnerId,
        delinquency_rate_14d_bps: u32,
    ) -> Result<Option<ReconIncident>, BreakerError> {
        if delinquency_rate_14d_bps <= self.delinquency_spike_threshold_bps {
            return Ok(None);
        }
        if self.existing_unresolved(partner_id, IncidentKind::DelinquencySpike).await? {
            return Ok(None);
        }
        let incident = ReconIncident {
            id: random_hex_id("incident"),
            loan_id: None,
            partner_id: Some(partner_id.clone()),
            kind: IncidentKind::DelinquencySpike,
            severity: IncidentSeverity::High,
            detail: format!(
                "delinquency_rate_14d_bps={delinquency_rate_14d_bps} threshold={}",
                self.delinquency_spike_threshold_bps
            ),
            created_at: now_unix(),
            resolved_at: None,
            fires_breaker: true,
        };
        self.store.insert_incident(incident.clone()).await?;
        self.trip_partner(partner_id.clone()).await;
        Ok(Some(incident))
    }

    async fn evaluate_partner_default_spike(
        &self,
        partner_id: &PartnerId,
        default_rate_30d_bps: u32,
    ) -> Result<Option<ReconIncident>, BreakerError> {
        if default_rate_30d_bps <= self.default_spike_threshold_bps {
            return Ok(None);
        }
        if self.existing_unresolved(partner_id, IncidentKind::PartnerDefaultSpike).await? {
            return Ok(None);
        }
        let incident = ReconIncident {
            id: random_hex_id("incident"),
            loan_id: None,
            partner_id: Some(partner_id.clone()),
            kind: IncidentKind::PartnerDefaultSpike,
            severity: IncidentSeverity::Critical,
            detail: format!(
                "default_rate_30d_bps={default_rate_30d_bps} threshold={}",
                self.default_spike_threshold_bps
            ),
            created_at: now_unix(),
            resolved_at: None,
            fires_breaker: true,
        };
        self.store.insert_incident(incident.clone()).await?;
        self.trip_partner(partner_id.clone()).await;
        Ok(Some(incident))
    }

    async fn status(&self) -> Result<BreakerStatus, BreakerError> {
        let open_incident_count = self.store.list_open_incidents().await?.len();
        let active_override_count = self.partner_tripped.lock().await.values().filter(|v| **v).count();
        Ok(BreakerStatus {
            global_block: self.global_tripped.load(Ordering::SeqCst),
            global_freeze: self.global_freeze.load(Ordering::SeqCst),
            require_manual_approval: self.require_manual_approval.load(Ordering::SeqCst),
            open_incident_count,
            active_override_count,
        })
    }

    async fn list_overrides(&self) -> Vec<BreakerOverride> {
        self.partner_tripped
            .lock()
            .await
            .iter()
            .filter(|(_, tripped)| **tripped)
            .map(|(partner_id, _)| BreakerOverride { partner_id: partner_id.clone(), reason: "partner trip" })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use loanctl_store::memory::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn origination_blocked_after_global_trip() {
        let breaker = ThresholdBreaker::new(Arc::new(MemoryStore::new()), 1_000, 1_000);
        let partner = PartnerId::from("partner-1".to_string());
        assert!(breaker.assert_origination_allowed(&partner).await.is_ok());
        breaker.trip_global();
        assert!(matches!(breaker.assert_origination_allowed(&partner).await, Err(BreakerError::GlobalTrip)));
    }

    #[tokio::test]
    async fn delinquency_spike_is_idempotent() {
        let breaker = ThresholdBreaker::new(Arc::new(MemoryStore::new()), 1_000, 1_000);
        let partner = PartnerId::from("partner-2".to_string());

        let first = breaker.evaluate_delinquency_spike(&partner, 2_000).await.unwrap();
        assert!(first.is_some());
        let second = breaker.evaluate_delinquency_spike(&partner, 2_500).await.unwrap();
        assert!(second.is_none(), "second breach while first incident is still open must not duplicate");

        // Once tripped, origination is blocked for this partner.
        assert!(matches!(
            breaker.assert_origination_allowed(&partner).await,
            Err(BreakerError::PartnerTrip(_))
        ));
    }

    #[tokio::test]
    async fn rate_below_threshold_creates_nothing() {
        let breaker = ThresholdBreaker::new(Arc::new(MemoryStore::new()), 1_000, 1_000);
        let partner = PartnerId::from("partner-3".to_string());
        assert!(breaker.evaluate_delinquency_spike(&partner, 500).await.unwrap().is_none());
        assert!(breaker.evaluate_partner_default_spike(&partner, 500).await.unwrap().is_none());
    }
}
