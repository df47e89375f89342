//! Dual-token balances.
//!
//! `Coins` pairs two arbitrary-precision integers, SCPT (the staking token)
//! and SPAY (the gas / payment token), both denominated in wei
//! (1 token = 10^18 wei).
//!
//! Components are signed so that intermediate results such as
//! `a.minus(b)` can be checked with `is_nonnegative()`; a balance that is
//! stored in an account must always satisfy `is_valid()`.

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

pub const DENOM_SCPT_WEI: &str = "SCPTWei";
pub const DENOM_SPAY_WEI: &str = "SPAYWei";

/// 10^18 wei per whole token.
pub const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoinError {
    #[error("invalid coin amount: {0}")]
    InvalidAmount(String),

    #[error("negative coin amount: {0}")]
    Negative(String),
}

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Coins {
    pub scpt: BigInt,
    pub spay: BigInt,
}

impl Coins {
    pub fn new(scpt: impl Into<BigInt>, spay: impl Into<BigInt>) -> Self {
        Self {
            scpt: scpt.into(),
            spay: spay.into(),
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn scpt(amount: impl Into<BigInt>) -> Self {
        Self::new(amount, 0)
    }

    pub fn spay(amount: impl Into<BigInt>) -> Self {
        Self::new(0, amount)
    }

    pub fn plus(&self, other: &Coins) -> Coins {
        Coins {
            scpt: &self.scpt + &other.scpt,
            spay: &self.spay + &other.spay,
        }
    }

    pub fn negative(&self) -> Coins {
        Coins {
            scpt: -&self.scpt,
            spay: -&self.spay,
        }
    }

    pub fn minus(&self, other: &Coins) -> Coins {
        self.plus(&other.negative())
    }

    /// `floor(self * percentage / 100)` per component (truncating toward zero).
    pub fn calculate_percentage(&self, percentage: u32) -> Coins {
        let p = BigInt::from(percentage);
        let hundred = BigInt::from(100u32);
        Coins {
            scpt: &self.scpt * &p / &hundred,
            spay: &self.spay * &p / &hundred,
        }
    }

    /// `self * numerator / denominator` per component; zero when the denominator is zero.
    pub fn scale(&self, numerator: &BigInt, denominator: &BigInt) -> Coins {
        if denominator.is_zero() {
            return Coins::zero();
        }
        Coins {
            scpt: &self.scpt * numerator / denominator,
            spay: &self.spay * numerator / denominator,
        }
    }

    #[must_use]
    pub fn is_gte(&self, other: &Coins) -> bool {
        self.minus(other).is_nonnegative()
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.scpt.is_zero() && self.spay.is_zero()
    }

    #[must_use]
    pub fn is_equal(&self, other: &Coins) -> bool {
        self == other
    }

    /// One component strictly positive and the other non-negative.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        (self.scpt.is_positive() && !self.spay.is_negative())
            || (!self.scpt.is_negative() && self.spay.is_positive())
    }

    #[must_use]
    pub fn is_nonnegative(&self) -> bool {
        !self.scpt.is_negative() && !self.spay.is_negative()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_nonnegative()
    }

    /// SCPT component as u128 when it fits; used for voting power.
    pub fn scpt_u128(&self) -> Option<u128> {
        self.scpt.to_u128()
    }
}

impl Add for Coins {
    type Output = Coins;
    fn add(self, rhs: Coins) -> Coins {
        self.plus(&rhs)
    }
}

impl Sub for Coins {
    type Output = Coins;
    fn sub(self, rhs: Coins) -> Coins {
        self.minus(&rhs)
    }
}

impl<'a> Add<&'a Coins> for &'a Coins {
    type Output = Coins;
    fn add(self, rhs: &'a Coins) -> Coins {
        self.plus(rhs)
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}, {} {}",
            self.scpt, DENOM_SCPT_WEI, self.spay, DENOM_SPAY_WEI
        )
    }
}

impl fmt::Debug for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coins{{scpt: {}, spay: {}}}", self.scpt, self.spay)
    }
}

/* serde: components as decimal strings, stable across json and bincode */
#[derive(Serialize, Deserialize)]
struct CoinsRepr {
    scptwei: String,
    spaywei: String,
}

impl Serialize for Coins {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CoinsRepr {
            scptwei: self.scpt.to_string(),
            spaywei: self.spay.to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Coins {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let r = CoinsRepr::deserialize(deserializer)?;
        let scpt = BigInt::from_str(&r.scptwei).map_err(serde::de::Error::custom)?;
        let spay = BigInt::from_str(&r.spaywei).map_err(serde::de::Error::custom)?;
        Ok(Coins { scpt, spay })
    }
}

/// Serde adapter for a bare `BigInt` field, encoded as a decimal string.
///
/// ```ignore
/// #[serde(with = "scpt_common::coin::bigint_string")]
/// pub amount: BigInt,
/// ```
pub mod bigint_string {
    use num_bigint::BigInt;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(v: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigInt::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// AMOUNT PARSING
// ════════════════════════════════════════════════════════════════════════════

/// Parse a human-entered amount.
///
/// A trailing `wei` (any case) means the number is already in wei and must
/// be an integer. Otherwise the value is in whole tokens, may carry a
/// decimal fraction, and is multiplied by 10^18 (digits beyond 18 decimal
/// places are truncated). Negative values are rejected.
pub fn parse_coin_amount(input: &str) -> Result<BigInt, CoinError> {
    let s = input.trim();
    let invalid = || CoinError::InvalidAmount(input.to_string());

    let split = s.len().saturating_sub(3);
    let (body, in_wei) = match (s.get(..split), s.get(split..)) {
        (Some(b), Some(suffix)) if s.len() > 3 && suffix.eq_ignore_ascii_case("wei") => (b, true),
        _ => (s, false),
    };

    if body.starts_with('-') {
        return Err(CoinError::Negative(input.to_string()));
    }
    let body = body.strip_prefix('+').unwrap_or(body);
    if body.is_empty() {
        return Err(invalid());
    }

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    let digits_ok = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if !digits_ok(int_part) || !digits_ok(frac_part) || (int_part.is_empty() && frac_part.is_empty())
    {
        return Err(invalid());
    }

    if in_wei {
        if !frac_part.is_empty() {
            return Err(invalid());
        }
        return BigInt::from_str(int_part).map_err(|_| invalid());
    }

    let mut frac: String = frac_part.chars().take(18).collect();
    while frac.len() < 18 {
        frac.push('0');
    }
    let int_digits = if int_part.is_empty() { "0" } else { int_part };
    let combined = format!("{}{}", int_digits, frac);
    let value = BigInt::from_str(&combined).map_err(|_| invalid())?;
    debug_assert!(value.sign() != Sign::Minus);
    Ok(value)
}

/// Whole tokens to wei.
pub fn tokens(n: u64) -> BigInt {
    BigInt::from(n) * BigInt::from(WEI_PER_TOKEN)
}
