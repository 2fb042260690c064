use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in whole seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_secs() as i64
}

/// Floors a Unix timestamp to the start of its UTC hour; this is the
/// `hourBucket` key used by the accrual job's idempotency record.
pub fn hour_bucket(unix_secs: i64) -> i64 {
    const SECONDS_PER_HOUR: i64 = 3_600;
    unix_secs.div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hour_bucket_floors_down() {
        assert_eq!(hour_bucket(3_661), 3_600);
        assert_eq!(hour_bucket(3_600), 3_600);
        assert_eq!(hour_bucket(0), 0);
    }
}
