//! Gas strategy (spec §4.1.3): fee estimation, fee bumping, gas-limit
//! buffering, and per-action-type gas ceilings.

use loanctl_store::ActionType;

use crate::chain_sender::FeeEstimate;

/// `bumpFees`: multiplies both EIP-1559 caps (or the legacy gas price) by
/// 13/10 — 30%, comfortably above the 10% replacement minimum most clients
/// enforce.
pub fn bump_fees(fees: &FeeEstimate) -> FeeEstimate {
    let bump = |v: u128| v.saturating_mul(13) / 10;
    FeeEstimate {
        max_fee_per_gas: fees.max_fee_per_gas.map(bump),
        max_priority_fee_per_gas: fees.max_priority_fee_per_gas.map(bump),
        gas_price: fees.gas_price.map(bump),
    }
}

/// `estimateGasLimit`: provider estimate x 12/10 — a 20% buffer.
pub fn buffered_gas_limit(provider_estimate: u64) -> u64 {
    provider_estimate.saturating_mul(12) / 10
}

/// Per-action-type gas ceilings (spec §4.1.3). Exceeding the ceiling aborts
/// submission; the caller marks the action FAILED with a gas-ceiling reason,
/// which the classifier routes to DLQ (an unrecognised-error fail-safe).
pub fn gas_ceiling(action_type: ActionType) -> u64 {
    match action_type {
        ActionType::CreateLoan => 3_000_000,
        ActionType::FundLoan => 500_000,
        ActionType::ActivateLoan => 400_000,
        ActionType::RecordDisbursement => 300_000,
        ActionType::Repay => 400_000,
        ActionType::RecordRepayment => 300_000,
        ActionType::ConfigureSchedule => 600_000,
    }
}

pub const GAS_CEILING_ERROR_PREFIX: &str = "gas ceiling exceeded";

pub fn check_gas_ceiling(action_type: ActionType, gas_limit: u64) -> Result<(), String> {
    let ceiling = gas_ceiling(action_type);
    if gas_limit > ceiling {
        return Err(format!("{GAS_CEILING_ERROR_PREFIX}: {gas_limit} > {ceiling} for {action_type:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bump_fees_applies_thirty_percent() {
        let fees = FeeEstimate {
            max_fee_per_gas: Some(100),
            max_priority_fee_per_gas: Some(10),
            gas_price: None,
        };
        let bumped = bump_fees(&fees);
        assert_eq!(bumped.max_fee_per_gas, Some(130));
        assert_eq!(bumped.max_priority_fee_per_gas, Some(13));
    }

    #[test]
    fn buffered_gas_limit_applies_twenty_percent() {
        assert_eq!(buffered_gas_limit(1_000_000), 1_200_000);
    }

    #[test]
    fn gas_ceiling_rejects_excessive_estimate() {
        assert!(check_gas_ceiling(ActionType::CreateLoan, 3_000_001).is_err());
        assert!(check_gas_ceiling(ActionType::CreateLoan, 3_000_000).is_ok());
    }
}
