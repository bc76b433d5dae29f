//! Plan definitions, plan levels and billing cycles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{PlanId, ValidationError};

use super::Money;

/// Code of the always-available free plan.
pub const FREE_PLAN_CODE: &str = "free";

/// Free-tier rows never come up for renewal.
pub const FREE_PLAN_PERIOD_DAYS: i64 = 365 * 100;

/// Total-order rank used to compare plan tiers for access decisions.
///
/// Several codes may share a level (`basic` and `starter`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanLevel(u8);

impl PlanLevel {
    pub const FREE: PlanLevel = PlanLevel(1);
    pub const BASIC: PlanLevel = PlanLevel(2);
    pub const PREMIUM: PlanLevel = PlanLevel(3);
    pub const PRO: PlanLevel = PlanLevel(4);
    pub const ENTERPRISE: PlanLevel = PlanLevel(5);

    /// Resolves the level for a plan code. Unknown codes rank as free.
    pub fn for_code(code: &str) -> PlanLevel {
        match code {
            "free" => Self::FREE,
            "basic" | "starter" => Self::BASIC,
            "premium" => Self::PREMIUM,
            "pro" => Self::PRO,
            "enterprise" => Self::ENTERPRISE,
            _ => Self::FREE,
        }
    }

    /// Returns the numeric rank.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for PlanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Billing cadence of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Fixed period length. Deliberately not calendar-aware.
    pub fn period_days(&self) -> i64 {
        match self {
            BillingCycle::Monthly => 30,
            BillingCycle::Yearly => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Ok(BillingCycle::Monthly),
            "yearly" | "year" | "annual" => Ok(BillingCycle::Yearly),
            other => Err(ValidationError::invalid_format(
                "billing_cycle",
                format!("unknown billing cycle '{}'", other),
            )),
        }
    }
}

/// A purchasable plan tier.
///
/// Plans are effectively immutable once a live subscription references them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    /// Monthly price in minor units.
    pub price_monthly: i64,
    /// Yearly price in minor units.
    pub price_yearly: i64,
    pub currency: String,
    pub trial_days: u32,
    /// Feature codes advertised with this plan.
    pub features: Vec<String>,
    pub is_active: bool,
    pub is_featured: bool,
    pub sort_order: i32,
}

impl Plan {
    /// Level derived from the plan code.
    pub fn level(&self) -> PlanLevel {
        PlanLevel::for_code(&self.code)
    }

    pub fn is_free(&self) -> bool {
        self.code == FREE_PLAN_CODE
    }

    pub fn has_trial(&self) -> bool {
        self.trial_days > 0
    }

    /// Price charged for one period of the given cycle.
    pub fn price_for(&self, cycle: BillingCycle) -> Money {
        let amount = match cycle {
            BillingCycle::Monthly => self.price_monthly,
            BillingCycle::Yearly => self.price_yearly,
        };
        Money::new(amount, &self.currency)
    }
}

/// Built-in plan table used to seed the catalog in development and tests.
pub fn default_plans(currency: &str) -> Vec<Plan> {
    let plan = |code: &str, name: &str, monthly: i64, yearly: i64, trial: u32, order: i32| Plan {
        id: PlanId::new(),
        code: code.to_string(),
        name: name.to_string(),
        description: None,
        price_monthly: monthly,
        price_yearly: yearly,
        currency: currency.to_ascii_uppercase(),
        trial_days: trial,
        features: Vec::new(),
        is_active: true,
        is_featured: code == "premium",
        sort_order: order,
    };

    vec![
        plan("free", "Free", 0, 0, 0, 0),
        plan("basic", "Basic", 1999, 19990, 0, 1),
        plan("premium", "Premium", 3999, 39990, 14, 2),
        plan("pro", "Pro", 7999, 79990, 14, 3),
        plan("enterprise", "Enterprise", 19999, 199990, 0, 4),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_hierarchy() {
        assert!(PlanLevel::for_code("free") < PlanLevel::for_code("basic"));
        assert!(PlanLevel::for_code("basic") < PlanLevel::for_code("premium"));
        assert!(PlanLevel::for_code("premium") < PlanLevel::for_code("pro"));
        assert!(PlanLevel::for_code("pro") < PlanLevel::for_code("enterprise"));
    }

    #[test]
    fn basic_and_starter_tie() {
        assert_eq!(PlanLevel::for_code("basic"), PlanLevel::for_code("starter"));
    }

    #[test]
    fn unknown_code_ranks_as_free() {
        assert_eq!(PlanLevel::for_code("legacy-gold"), PlanLevel::FREE);
    }

    #[test]
    fn cycle_period_is_fixed_offset() {
        assert_eq!(BillingCycle::Monthly.period_days(), 30);
        assert_eq!(BillingCycle::Yearly.period_days(), 365);
    }

    #[test]
    fn cycle_parses_aliases() {
        assert_eq!("Yearly".parse::<BillingCycle>().unwrap(), BillingCycle::Yearly);
        assert_eq!("annual".parse::<BillingCycle>().unwrap(), BillingCycle::Yearly);
        assert!("weekly".parse::<BillingCycle>().is_err());
    }

    #[test]
    fn price_for_picks_cycle_price() {
        let plans = default_plans("pln");
        let premium = plans.iter().find(|p| p.code == "premium").unwrap();
        assert_eq!(premium.price_for(BillingCycle::Monthly), Money::new(3999, "PLN"));
        assert_eq!(premium.price_for(BillingCycle::Yearly), Money::new(39990, "PLN"));
        assert!(premium.has_trial());
    }

    #[test]
    fn cycle_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BillingCycle::Yearly).unwrap(), "\"yearly\"");
    }
}
