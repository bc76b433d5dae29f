//! Payment provider identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// The three external payment processors the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Card processor.
    Stripe,
    /// Wallet processor.
    PayPal,
    /// Instant bank transfer processor (BLIK).
    Przelewy24,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Stripe,
        ProviderKind::PayPal,
        ProviderKind::Przelewy24,
    ];

    /// Stable storage and routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
            ProviderKind::PayPal => "paypal",
            ProviderKind::Przelewy24 => "przelewy24",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "Card",
            ProviderKind::PayPal => "PayPal",
            ProviderKind::Przelewy24 => "BLIK / Przelewy24",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" | "card" => Ok(ProviderKind::Stripe),
            "paypal" | "wallet" => Ok(ProviderKind::PayPal),
            "przelewy24" | "p24" | "blik" => Ok(ProviderKind::Przelewy24),
            other => Err(ValidationError::invalid_format(
                "provider",
                format!("unknown payment provider '{}'", other),
            )),
        }
    }
}
