//! Exact fixed-point monetary amounts.
//!
//! zcashd reports amounts either as JSON numbers (`getbalance`) or as
//! strings (`z_gettotalbalance`). Both are parsed from their decimal text
//! into an integer number of zatoshis, so comparisons are exact.

use {
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    serde_json::{Number, Value},
    std::{fmt, iter::Sum, str::FromStr},
    thiserror::Error,
};

/// Zatoshis per coin.
pub const COIN: i64 = 100_000_000;

/// Largest amount any single value may carry (21 million coins).
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Smallest transparent output relayed as standard, in zatoshis.
pub const DUST_THRESHOLD: i64 = 546;

const DECIMALS: usize = 8;
const COIN_UNSIGNED: u64 = 100_000_000;

/// Errors produced while reading an amount from its decimal text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,

    #[error("malformed amount {0:?}")]
    Malformed(String),

    #[error("amount {0:?} has more than 8 decimal places")]
    TooPrecise(String),

    #[error("amount {0:?} is out of range")]
    OutOfRange(String),

    #[error("expected a decimal number or string, found {0}")]
    UnexpectedType(String),
}

/// A signed amount of zatoshis.
///
/// Negative values are allowed so that the harness can express deltas
/// (value leaving a pool, fees paid). Use [`Amount::is_valid_money`] to
/// check the range a node would accept for a single value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn from_zat(zat: i64) -> Self {
        Self(zat)
    }

    /// Whole coins, e.g. a block reward of `50`.
    pub fn from_coins(coins: i64) -> Option<Self> {
        coins.checked_mul(COIN).map(Self)
    }

    pub const fn zat(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_valid_money(self) -> bool {
        self.0 >= 0 && self.0 <= MAX_MONEY
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn checked_neg(self) -> Option<Self> {
        self.0.checked_neg().map(Self)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Sums a sequence of amounts, returning `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Self>>(amounts: I) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.checked_add(amount))
    }

    /// Formats the way zcashd formats amounts inside error messages: the
    /// fractional part is trimmed of trailing zeros but keeps at least two
    /// digits (`50.00`, `0.00000545`, `10000.0001`).
    pub fn format_money(self) -> String {
        let full = self.to_string();
        match full.split_once('.') {
            Some((whole, frac)) => {
                let trimmed = frac.trim_end_matches('0');
                let frac = if trimmed.len() < 2 {
                    &frac[..2]
                } else {
                    trimmed
                };
                format!("{whole}.{frac}")
            }
            None => full,
        }
    }

    /// JSON number carrying the exact decimal text, suitable as an RPC
    /// parameter.
    pub fn to_json(self) -> Value {
        match Number::from_str(&self.to_string()) {
            Ok(number) => Value::Number(number),
            Err(_) => Value::String(self.to_string()),
        }
    }

    /// Reads an amount from a JSON value that is either a number or a
    /// decimal string.
    pub fn from_json(value: &Value) -> Result<Self, AmountError> {
        match value {
            Value::Number(number) => number.to_string().parse(),
            Value::String(text) => text.parse(),
            other => Err(AmountError::UnexpectedType(json_type_name(other).to_string())),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:08}",
            magnitude / COIN_UNSIGNED,
            magnitude % COIN_UNSIGNED
        )
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(AmountError::Empty);
        }
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Malformed(text.to_string()));
        }

        let frac = if frac.len() > DECIMALS {
            let (kept, rest) = frac.split_at(DECIMALS);
            if !rest.bytes().all(|b| b == b'0') {
                return Err(AmountError::TooPrecise(text.to_string()));
            }
            kept
        } else {
            frac
        };

        let out_of_range = || AmountError::OutOfRange(text.to_string());
        let whole_zat = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<i64>()
                .map_err(|_| out_of_range())?
                .checked_mul(COIN)
                .ok_or_else(out_of_range)?
        };
        let frac_zat = format!("{frac:0<8}")
            .parse::<i64>()
            .map_err(|_| AmountError::Malformed(text.to_string()))?;
        let zat = whole_zat.checked_add(frac_zat).ok_or_else(out_of_range)?;
        if negative {
            zat.checked_neg().map(Self).ok_or_else(out_of_range)
        } else {
            Ok(Self(zat))
        }
    }
}

impl Sum for Amount {
    /// Saturating sum; use [`Amount::checked_sum`] where overflow matters.
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // `Value` preserves the original number text under `arbitrary_precision`.
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(de::Error::custom)
    }
}
