use std::cmp::min;
use std::time::Duration;

const INITIAL_WAIT_MS: u64 = 1_000;
const MAXIMUM_WAIT_MS: u64 = 60_000;
const EXP_BASE: u64 = 2;

/// Exponential retry backoff for `ChainAction` retries: `2^attempts * 1s`,
/// capped so a pathologically high attempt count can't overflow.
///
/// ```
/// # use loanctl_core::backoff::retry_delay;
/// # use std::time::Duration;
/// assert_eq!(retry_delay(0), Duration::from_secs(1));
/// assert_eq!(retry_delay(1), Duration::from_secs(2));
/// assert_eq!(retry_delay(5), Duration::from_secs(32));
/// ```
pub fn retry_delay(attempts: u32) -> Duration {
    let factor = EXP_BASE.saturating_pow(attempts);
    let wait_ms = INITIAL_WAIT_MS.saturating_mul(factor);
    Duration::from_millis(min(wait_ms, MAXIMUM_WAIT_MS))
}

/// An iterator form of [`retry_delay`], for callsites that want to keep
/// sleeping on successive attempts without tracking the counter themselves.
pub fn retry_delay_iter() -> impl Iterator<Item = Duration> {
    (0u32..).map(retry_delay)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_integer_overflow() {
        let mut iter = retry_delay_iter();
        for _ in 0..500 {
            iter.next();
        }
    }

    #[test]
    fn matches_spec_formula() {
        for attempts in 0..6u32 {
            let expected = Duration::from_millis(1_000 * 2u64.pow(attempts));
            assert_eq!(retry_delay(attempts), expected);
        }
    }
}
