//! Shared primitive types used across the entire ledger.

use crate::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A stable identifier for a user account, supplied by the auth layer.
pub type UserId = String;

/// Identifier of an earning grant (`grt-<uuid>`).
pub type GrantId = String;

/// Identifier of a withdrawal request (`wdr-<uuid>`).
pub type WithdrawalId = String;

/// Number of fractional digits carried by [`Amount`].
pub const AMOUNT_DECIMALS: u32 = 8;

/// Raw units in one whole unit of currency.
pub const RAW_PER_UNIT: u64 = 10u64.pow(AMOUNT_DECIMALS);

/// Fixed-point currency amount.
///
/// Stored as unsigned raw units, so a balance can never be negative.
/// All arithmetic that could underflow goes through `checked_sub`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Largest storable amount. SQLite integers are i64.
    pub const MAX: Self = Self(i64::MAX as u64);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Whole units, e.g. `Amount::units(100)` is `100.00000000`.
    pub const fn units(whole: u64) -> Self {
        Self(whole * RAW_PER_UNIT)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// None when the sum would exceed [`Amount::MAX`].
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self).filter(|sum| *sum <= Self::MAX)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Clamped to [`Amount::MAX`].
    pub fn saturating_add(self, other: Self) -> Self {
        self.checked_add(other).unwrap_or(Self::MAX)
    }

    pub(crate) fn to_sql(self) -> LedgerResult<i64> {
        i64::try_from(self.0).map_err(|_| LedgerError::AmountOverflow { what: "stored amount" })
    }

    pub(crate) fn from_sql(raw: i64) -> Self {
        Self(raw.max(0) as u64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / RAW_PER_UNIT;
        let frac = self.0 % RAW_PER_UNIT;
        write!(f, "{whole}.{frac:0width$}", width = AMOUNT_DECIMALS as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount '{0}'")]
pub struct ParseAmountError(pub String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAmountError(s.to_string());
        let trimmed = s.trim();
        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if frac.len() > AMOUNT_DECIMALS as usize {
            return Err(err());
        }
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(err());
        }

        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| err())? };
        let frac_raw: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = AMOUNT_DECIMALS as usize);
            padded.parse().map_err(|_| err())?
        };
        whole
            .checked_mul(RAW_PER_UNIT)
            .and_then(|w| w.checked_add(frac_raw))
            .filter(|raw| *raw <= Self::MAX.0)
            .map(Self)
            .ok_or_else(err)
    }
}

// Amounts travel as decimal strings so JSON consumers never see raw units.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!("12".parse::<Amount>().unwrap(), Amount::units(12));
        assert_eq!("0.5".parse::<Amount>().unwrap(), Amount::from_raw(50_000_000));
        assert_eq!(".25".parse::<Amount>().unwrap(), Amount::from_raw(25_000_000));
        assert_eq!("0.00000001".parse::<Amount>().unwrap(), Amount::from_raw(1));
    }

    #[test]
    fn rejects_malformed_amounts() {
        for bad in ["", ".", "-1", "1.2.3", "abc", "0.000000001", "1e5"] {
            assert!(bad.parse::<Amount>().is_err(), "'{bad}' should not parse");
        }
    }

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&Amount::from_raw(150_000_000)).unwrap();
        assert_eq!(json, "\"1.50000000\"");
        let back: Amount = serde_json::from_str("\"1.5\"").unwrap();
        assert_eq!(back, Amount::from_raw(150_000_000));
    }

    #[test]
    fn addition_is_bounded_by_storable_max() {
        assert_eq!(Amount::MAX.checked_add(Amount::from_raw(1)), None);
        assert_eq!(Amount::MAX.saturating_add(Amount::MAX), Amount::MAX);
        assert!(Amount::from_raw(u64::MAX).to_sql().is_err());
        assert_eq!(Amount::MAX.to_sql().unwrap(), i64::MAX);
        assert!("92233720368.54775808".parse::<Amount>().is_err());
    }

    #[test]
    fn displays_all_fractional_digits() {
        assert_eq!(Amount::units(50).to_string(), "50.00000000");
        assert_eq!(Amount::from_raw(123).to_string(), "0.00000123");
    }
}
