//! Monetary amounts in integer minor units.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::ValidationError;

/// Amount of money in minor units (grosze, cents) with an ISO currency.
///
/// Amounts are signed: refunds carry negative values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: i64,
    pub currency: String,
}

impl Money {
    /// Creates a new amount. The currency code is normalized to upper case.
    pub fn new(amount: i64, currency: impl AsRef<str>) -> Self {
        Self {
            amount,
            currency: currency.as_ref().trim().to_ascii_uppercase(),
        }
    }

    /// Parses a provider decimal string ("19.99") into minor units.
    ///
    /// Parsing is exact; at most two fractional digits are accepted.
    pub fn from_decimal_str(value: &str, currency: impl AsRef<str>) -> Result<Self, ValidationError> {
        Ok(Self::new(parse_decimal_minor(value)?, currency))
    }

    /// Formats the amount as a two-decimal string ("19.99").
    pub fn to_decimal_string(&self) -> String {
        format_minor_units(self.amount)
    }

    /// Returns the same amount with the sign flipped.
    pub fn negated(&self) -> Self {
        Self {
            amount: -self.amount,
            currency: self.currency.clone(),
        }
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

/// Parses "12", "12.5" or "12.50" (optionally signed) into minor units.
pub fn parse_decimal_minor(value: &str) -> Result<i64, ValidationError> {
    let value = value.trim();
    let invalid = |reason: &str| ValidationError::invalid_format("amount", reason.to_string());

    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let (whole, fraction) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("expected a decimal number"));
    }
    if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("at most two fractional digits are allowed"));
    }

    let whole: i64 = whole.parse().map_err(|_| invalid("amount too large"))?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| invalid("bad fraction"))? * 10,
        _ => fraction.parse().map_err(|_| invalid("bad fraction"))?,
    };

    let minor = whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| invalid("amount too large"))?;

    Ok(if negative { -minor } else { minor })
}

/// Formats minor units as a two-decimal string.
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
