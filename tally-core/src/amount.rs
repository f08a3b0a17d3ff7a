use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::Zero;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a balance string is not a base-10 integer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid amount `{0}`: expected a base-10 integer")]
pub struct AmountParseError(pub String);

/// Arbitrary precision signed integer used for balances and deltas.
///
/// Ledger balances routinely exceed `u64`, so nothing in the accounting path
/// ever narrows to a native integer. The wire representation is a decimal
/// string; plain JSON integers are accepted on input as well.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigInt);

impl Amount {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError(s.to_string()));
        }
        let magnitude = BigInt::parse_bytes(digits.as_bytes(), 10)
            .ok_or_else(|| AmountParseError(s.to_string()))?;
        Ok(Self(if negative { -magnitude } else { magnitude }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(BigInt::from(value))
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(BigInt::from(value))
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl Sub<&Amount> for &Amount {
    type Output = Amount;

    fn sub(self, rhs: &Amount) -> Amount {
        Amount(&self.0 - &rhs.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal integer string or a JSON integer")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
        value.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Amount, E> {
        Ok(Amount::from(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Amount, E> {
        Ok(Amount::from(value))
    }
}
