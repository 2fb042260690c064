//! The five-state delinquency classifier (spec §4.4): pure and stateless,
//! no store or clock access — callers pass `now_unix` explicitly so the
//! classification is reproducible in tests and in the hourly job alike.

use loanctl_core::MinorUnits;
use loanctl_store::AccrualStatus;

const SECONDS_PER_DAY: i64 = 86_400;
const DELINQUENT_TO_DEFAULT_CANDIDATE_DAYS: i64 = 14;
const DEFAULT_CANDIDATE_TO_DEFAULTED_DAYS: i64 = 30;
const BPS_DENOMINATOR: i128 = 10_000;
const HOURS_PER_YEAR: i128 = 8_760;

/// `daysPastDue = floor(overdue / 86400)`, measured from `due_timestamp`
/// regardless of the grace period.
pub fn days_past_due(due_timestamp: i64, now_unix: i64) -> i64 {
    let overdue = now_unix - due_timestamp;
    if overdue <= 0 {
        0
    } else {
        overdue / SECONDS_PER_DAY
    }
}

pub fn classify(due_timestamp: i64, now_unix: i64, grace_period_seconds: i64) -> AccrualStatus {
    let overdue = now_unix - due_timestamp;
    if overdue <= 0 {
        return AccrualStatus::Current;
    }
    if overdue <= grace_period_seconds {
        return AccrualStatus::InGrace;
    }
    let dpd = days_past_due(due_timestamp, now_unix);
    if dpd < DELINQUENT_TO_DEFAULT_CANDIDATE_DAYS {
        AccrualStatus::Delinquent
    } else if dpd < DEFAULT_CANDIDATE_TO_DEFAULTED_DAYS {
        AccrualStatus::DefaultCandidate
    } else {
        AccrualStatus::Defaulted
    }
}

/// Most severe of a set of statuses; `CURRENT` for an empty slice.
/// `AccrualStatus` derives `Ord` in the declared CURRENT..DEFAULTED order,
/// so "most severe" is just `max`.
pub fn worst(statuses: &[AccrualStatus]) -> AccrualStatus {
    statuses.iter().copied().max().unwrap_or(AccrualStatus::Current)
}

/// `penaltyDelta = overduePrincipal * penaltyAprBps / (10_000 * 8760)`,
/// truncating. Zero for CURRENT/IN_GRACE, zero principal, or a non-positive
/// rate.
pub fn hourly_penalty(status: AccrualStatus, overdue_principal: MinorUnits, penalty_apr_bps: i64) -> MinorUnits {
    if matches!(status, AccrualStatus::Current | AccrualStatus::InGrace) {
        return MinorUnits::ZERO;
    }
    if overdue_principal.0 <= 0 || penalty_apr_bps <= 0 {
        return MinorUnits::ZERO;
    }
    let delta = overdue_principal.0 * penalty_apr_bps as i128 / (BPS_DENOMINATOR * HOURS_PER_YEAR);
    MinorUnits(delta)
}

#[cfg(test)]
mod test {
    use super::*;

    const DAY: i64 = 86_400;

    #[test]
    fn classification_table_matches_spec_boundaries() {
        let due = 1_000_000;
        let grace = 3 * DAY;

        assert_eq!(classify(due, due - 1, grace), AccrualStatus::Current);
        assert_eq!(classify(due, due, grace), AccrualStatus::Current);
        assert_eq!(classify(due, due + grace, grace), AccrualStatus::InGrace);
        assert_eq!(classify(due, due + grace + 1, grace), AccrualStatus::Delinquent);
        assert_eq!(classify(due, due + 14 * DAY, grace), AccrualStatus::DefaultCandidate);
        assert_eq!(classify(due, due + 29 * DAY, grace), AccrualStatus::DefaultCandidate);
        assert_eq!(classify(due, due + 30 * DAY, grace), AccrualStatus::Defaulted);
    }

    #[test]
    fn worst_picks_most_severe_and_defaults_to_current() {
        assert_eq!(worst(&[]), AccrualStatus::Current);
        assert_eq!(
            worst(&[AccrualStatus::InGrace, AccrualStatus::Delinquent, AccrualStatus::Current]),
            AccrualStatus::Delinquent
        );
        assert_eq!(worst(&[AccrualStatus::Defaulted, AccrualStatus::DefaultCandidate]), AccrualStatus::Defaulted);
    }

    #[test]
    fn penalty_is_zero_before_delinquency() {
        assert_eq!(hourly_penalty(AccrualStatus::Current, MinorUnits(1_000_000), 5_000), MinorUnits::ZERO);
        assert_eq!(hourly_penalty(AccrualStatus::InGrace, MinorUnits(1_000_000), 5_000), MinorUnits::ZERO);
    }

    #[test]
    fn penalty_is_zero_for_nonpositive_principal_or_rate() {
        assert_eq!(hourly_penalty(AccrualStatus::Delinquent, MinorUnits(0), 5_000), MinorUnits::ZERO);
        assert_eq!(hourly_penalty(AccrualStatus::Delinquent, MinorUnits(1_000_000), 0), MinorUnits::ZERO);
    }

    #[test]
    fn penalty_formula_truncates() {
        // 1_000_000 * 5_000 / (10_000 * 8760) = 57.06... -> 57
        assert_eq!(hourly_penalty(AccrualStatus::Delinquent, MinorUnits(1_000_000), 5_000), MinorUnits(57));
    }
}
