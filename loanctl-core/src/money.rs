use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An arbitrary-precision-enough (`i128`) integer amount in a currency's
/// smallest unit (USDC: 10^-6, KES: 10^-2). Always serialises as a decimal
/// string so values beyond `2^53` survive round-trips through JSON, per the
/// data model's decimal discipline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinorUnits(pub i128);

impl MinorUnits {
    pub const ZERO: MinorUnits = MinorUnits(0);

    pub fn new(value: i128) -> Self {
        Self(value)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Saturates at zero; used for "remaining balance" computations where a
    /// negative result would indicate an overpayment, not a debt.
    pub fn saturating_sub_floor_zero(self, other: Self) -> Self {
        Self((self.0 - other.0).max(0))
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }
}

impl Add for MinorUnits {
    type Output = MinorUnits;
    fn add(self, rhs: Self) -> Self::Output {
        MinorUnits(self.0 + rhs.0)
    }
}

impl Sub for MinorUnits {
    type Output = MinorUnits;
    fn sub(self, rhs: Self) -> Self::Output {
        MinorUnits(self.0 - rhs.0)
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MinorUnits {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i128>().map(MinorUnits)
    }
}

impl Serialize for MinorUnits {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for MinorUnits {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MinorUnitsVisitor;

        impl Visitor<'_> for MinorUnitsVisitor {
            type Value = MinorUnits;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or integer amount in minor units")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.parse::<i128>()
                    .map(MinorUnits)
                    .map_err(|_| de::Error::custom("invalid minor-units integer"))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(MinorUnits(v as i128))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(MinorUnits(v as i128))
            }
        }

        deserializer.deserialize_any(MinorUnitsVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_beyond_f64_precision() {
        let big = MinorUnits(9_007_199_254_740_993_000); // > 2^53
        let json = serde_json::to_string(&big).unwrap();
        assert_eq!(json, "\"9007199254740993000\"");
        let back: MinorUnits = serde_json::from_str(&json).unwrap();
        assert_eq!(back, big);
    }

    #[test]
    fn saturating_sub_floors_at_zero() {
        let a = MinorUnits(5);
        let b = MinorUnits(10);
        assert_eq!(a.saturating_sub_floor_zero(b), MinorUnits::ZERO);
    }
}
