//! Plan-based feature gating with per-user overrides.
//!
//! A feature declares the cheapest plan that unlocks it. Base access is
//! `user_level >= required_level`; an unexpired override always wins over
//! the rank decision.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::foundation::{Timestamp, UserId};

use super::{PlanLevel, FREE_PLAN_CODE};

/// Feature code → minimum plan code.
static DEFAULT_REQUIREMENTS: Lazy<BTreeMap<String, String>> = Lazy::new(|| {
    let table: &[(&str, &[&str])] = &[
        ("free", &["notes", "preset-browser", "pwa"]),
        (
            "basic",
            &["synth2600", "midi-generator", "music-production", "offline-mode"],
        ),
        (
            "premium",
            &[
                "collaboration",
                "priority-support",
                "advanced-export",
                "unlimited-tracks",
                "unlimited-presets",
            ],
        ),
        (
            "pro",
            &["api-access", "custom-branding", "white-label", "team-management"],
        ),
        (
            "enterprise",
            &["dedicated-support", "sla", "custom-integrations"],
        ),
    ];

    table
        .iter()
        .flat_map(|(plan, features)| {
            features
                .iter()
                .map(move |feature| (feature.to_string(), plan.to_string()))
        })
        .collect()
});

/// Administrative override direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAccess {
    Grant,
    Deny,
}

impl OverrideAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAccess::Grant => "grant",
            OverrideAccess::Deny => "deny",
        }
    }
}

/// Per-user exception to plan-based access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureOverride {
    pub user_id: UserId,
    pub feature_code: String,
    pub access_type: OverrideAccess,
    pub expires_at: Option<Timestamp>,
    pub reason: Option<String>,
    pub created_at: Timestamp,
}

impl FeatureOverride {
    pub fn new(
        user_id: UserId,
        feature_code: impl Into<String>,
        access_type: OverrideAccess,
        expires_at: Option<Timestamp>,
        reason: Option<String>,
    ) -> Self {
        Self {
            user_id,
            feature_code: feature_code.into(),
            access_type,
            expires_at,
            reason,
            created_at: Timestamp::now(),
        }
    }

    /// Expiry is filtered at read time; there is no cleanup job.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.is_after(&now),
            None => true,
        }
    }
}

/// Outcome of evaluating one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDecision {
    pub allowed: bool,
    pub required_plan: String,
    /// Set when an override decided the outcome.
    pub via_override: Option<OverrideAccess>,
}

/// Feature-access map for one user, as exposed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAccessMap {
    pub plan_code: String,
    pub plan_level: PlanLevel,
    pub features: BTreeMap<String, FeatureDecision>,
}

impl FeatureAccessMap {
    pub fn is_allowed(&self, feature_code: &str) -> bool {
        self.features
            .get(feature_code)
            .map(|d| d.allowed)
            .unwrap_or(false)
    }
}

/// Resolves boolean feature access from a plan code plus overrides.
///
/// Pure: callers fetch the plan and overrides once per logical request.
#[derive(Debug, Clone)]
pub struct FeatureAccessEvaluator {
    requirements: BTreeMap<String, String>,
}

impl Default for FeatureAccessEvaluator {
    fn default() -> Self {
        Self {
            requirements: DEFAULT_REQUIREMENTS.clone(),
        }
    }
}

impl FeatureAccessEvaluator {
    /// Creates an evaluator with a custom requirement table.
    pub fn new(requirements: BTreeMap<String, String>) -> Self {
        Self { requirements }
    }

    /// Minimum plan code for a feature. Unknown features require `free`.
    pub fn required_plan(&self, feature_code: &str) -> &str {
        self.requirements
            .get(feature_code)
            .map(String::as_str)
            .unwrap_or(FREE_PLAN_CODE)
    }

    /// Returns true when `plan_code` may use `feature_code`.
    pub fn is_feature_allowed(
        &self,
        plan_code: &str,
        feature_code: &str,
        overrides: &[FeatureOverride],
        now: Timestamp,
    ) -> bool {
        self.decide(plan_code, feature_code, overrides, now).allowed
    }

    /// Full decision for one feature, including which rule applied.
    pub fn decide(
        &self,
        plan_code: &str,
        feature_code: &str,
        overrides: &[FeatureOverride],
        now: Timestamp,
    ) -> FeatureDecision {
        let required_plan = self.required_plan(feature_code).to_string();

        if let Some(access) = active_override(feature_code, overrides, now) {
            return FeatureDecision {
                allowed: access == OverrideAccess::Grant,
                required_plan,
                via_override: Some(access),
            };
        }

        let allowed = PlanLevel::for_code(plan_code) >= PlanLevel::for_code(&required_plan);
        FeatureDecision {
            allowed,
            required_plan,
            via_override: None,
        }
    }

    /// Evaluates every known feature plus any feature named by an override.
    pub fn feature_map(
        &self,
        plan_code: &str,
        overrides: &[FeatureOverride],
        now: Timestamp,
    ) -> FeatureAccessMap {
        let mut features = BTreeMap::new();

        let codes = self
            .requirements
            .keys()
            .map(String::as_str)
            .chain(overrides.iter().map(|o| o.feature_code.as_str()));

        for code in codes {
            if !features.contains_key(code) {
                features.insert(code.to_string(), self.decide(plan_code, code, overrides, now));
            }
        }

        FeatureAccessMap {
            plan_code: plan_code.to_string(),
            plan_level: PlanLevel::for_code(plan_code),
            features,
        }
    }
}

/// A deny beats a grant when both are active for the same feature.
fn active_override(
    feature_code: &str,
    overrides: &[FeatureOverride],
    now: Timestamp,
) -> Option<OverrideAccess> {
    let mut found = None;
    for o in overrides
        .iter()
        .filter(|o| o.feature_code == feature_code && o.is_active_at(now))
    {
        if o.access_type == OverrideAccess::Deny {
            return Some(OverrideAccess::Deny);
        }
        found = Some(o.access_type);
    }
    found
}
