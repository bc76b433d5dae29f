//! PayPal wire types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::billing::{BillingCycle, Money};
use crate::domain::foundation::UserId;
use crate::ports::PaymentError;

/// Webhook envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalWebhookEvent {
    /// WH-...
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: serde_json::Value,
    pub summary: Option<String>,
}

/// `resource` of BILLING.SUBSCRIPTION.* events and the create response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalSubscription {
    /// I-...
    pub id: String,
    pub plan_id: Option<String>,
    pub custom_id: Option<String>,
    pub status: Option<String>,
    pub status_change_note: Option<String>,
    pub billing_info: Option<PayPalBillingInfo>,
    #[serde(default)]
    pub links: Vec<PayPalLink>,
}

impl PayPalSubscription {
    pub fn approval_url(&self) -> Option<String> {
        self.links
            .iter()
            .find(|l| l.rel == "approve")
            .map(|l| l.href.clone())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalBillingInfo {
    pub last_payment: Option<PayPalLastPayment>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalLastPayment {
    pub amount: PayPalMoney,
}

/// v1 subscriptions API money: `{"value": "19.99", "currency_code": "PLN"}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalMoney {
    pub value: String,
    pub currency_code: String,
}

/// v1 payments API amount: `{"total": "19.99", "currency": "PLN"}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalAmount {
    pub total: String,
    pub currency: String,
}

impl PayPalAmount {
    /// Exact minor units; refund notifications may carry a leading minus.
    pub fn to_money(&self) -> Result<Money, PaymentError> {
        let money = Money::from_decimal_str(&self.total, &self.currency)
            .map_err(|e| PaymentError::invalid_webhook(format!("Invalid PayPal amount: {}", e)))?;
        Ok(Money::new(money.amount.abs(), &money.currency))
    }
}

impl PayPalMoney {
    pub fn to_money(&self) -> Result<Money, PaymentError> {
        Money::from_decimal_str(&self.value, &self.currency_code)
            .map_err(|e| PaymentError::invalid_webhook(format!("Invalid PayPal amount: {}", e)))
    }
}

/// `resource` of PAYMENT.SALE.COMPLETED.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalSale {
    pub id: String,
    pub billing_agreement_id: Option<String>,
    pub custom: Option<String>,
    pub amount: PayPalAmount,
    pub state: Option<String>,
}

/// `resource` of PAYMENT.SALE.REFUNDED and the refund response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalRefund {
    pub id: String,
    pub sale_id: Option<String>,
    pub amount: Option<PayPalAmount>,
    pub state: Option<String>,
}

/// v2 Orders API order, both the create and the capture response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalOrder {
    pub id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub purchase_units: Vec<PayPalPurchaseUnit>,
    #[serde(default)]
    pub links: Vec<PayPalLink>,
}

impl PayPalOrder {
    /// Buyers approve orders on `approve` or, for newer integrations, `payer-action`.
    pub fn approval_url(&self) -> Option<String> {
        self.links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone())
    }

    pub fn first_capture(&self) -> Option<&PayPalCapture> {
        self.purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|payments| payments.captures.iter())
            .next()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalPurchaseUnit {
    pub reference_id: Option<String>,
    pub payments: Option<PayPalOrderPayments>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalOrderPayments {
    #[serde(default)]
    pub captures: Vec<PayPalCapture>,
}

/// `resource` of PAYMENT.CAPTURE.* events and an entry of a captured order.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalCapture {
    pub id: String,
    pub status: Option<String>,
    pub amount: Option<PayPalMoney>,
    pub custom_id: Option<String>,
    pub supplementary_data: Option<PayPalSupplementaryData>,
}

impl PayPalCapture {
    pub fn order_id(&self) -> Option<&str> {
        self.supplementary_data
            .as_ref()
            .and_then(|d| d.related_ids.as_ref())
            .and_then(|ids| ids.order_id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalSupplementaryData {
    pub related_ids: Option<PayPalRelatedIds>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalRelatedIds {
    pub order_id: Option<String>,
}

/// `resource` of PAYMENT.CAPTURE.REFUNDED and the capture refund response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalCaptureRefund {
    pub id: String,
    pub status: Option<String>,
    pub amount: Option<PayPalMoney>,
    #[serde(default)]
    pub links: Vec<PayPalLink>,
}

impl PayPalCaptureRefund {
    /// Capture id taken from the `up` link (`.../v2/payments/captures/{id}`).
    pub fn capture_id(&self) -> Option<String> {
        self.links
            .iter()
            .find(|l| l.rel == "up" && l.href.contains("/captures/"))
            .and_then(|l| l.href.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayPalLink {
    pub href: String,
    pub rel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalAccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalVerificationResponse {
    pub verification_status: String,
}

/// `custom_id` written at checkout: `user|plan|cycle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomId {
    pub user_id: UserId,
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
}

impl CustomId {
    pub fn encode(user_id: &UserId, plan_code: &str, cycle: BillingCycle) -> String {
        format!("{}|{}|{}", user_id, plan_code, cycle)
    }

    /// Splits from the right so user ids may themselves contain `|`.
    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.rsplitn(3, '|');
        let cycle = parts.next()?.parse::<BillingCycle>().ok()?;
        let plan_code = parts.next()?.to_string();
        let user_id = UserId::new(parts.next()?).ok()?;
        Some(Self {
            user_id,
            plan_code,
            billing_cycle: cycle,
        })
    }
}

/// Plan ids configured in PayPal, keyed by (plan code, cycle).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayPalPlanMap(HashMap<(String, BillingCycle), String>);

impl PayPalPlanMap {
    /// Parses `premium:monthly:P-123,premium:yearly:P-456`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut map = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [plan, cycle, id] = parts.as_slice() else {
                return Err(format!("expected plan:cycle:id, got '{}'", entry));
            };
            let cycle = cycle
                .parse::<BillingCycle>()
                .map_err(|e| format!("'{}': {}", entry, e))?;
            if plan.is_empty() || id.is_empty() {
                return Err(format!("empty plan code or id in '{}'", entry));
            }
            map.insert((plan.to_string(), cycle), id.to_string());
        }
        Ok(Self(map))
    }

    pub fn get(&self, plan_code: &str, cycle: BillingCycle) -> Option<&str> {
        self.0.get(&(plan_code.to_string(), cycle)).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_id_round_trips() {
        let user = UserId::new("auth0|abc").unwrap();
        let raw = CustomId::encode(&user, "premium", BillingCycle::Yearly);
        let decoded = CustomId::decode(&raw).unwrap();
        assert_eq!(decoded.user_id, user);
        assert_eq!(decoded.plan_code, "premium");
        assert_eq!(decoded.billing_cycle, BillingCycle::Yearly);
    }

    #[test]
    fn custom_id_rejects_garbage() {
        assert!(CustomId::decode("just-a-user").is_none());
        assert!(CustomId::decode("u1|premium|weekly").is_none());
    }

    #[test]
    fn plan_map_parses_entries() {
        let map = PayPalPlanMap::parse("premium:monthly:P-1, premium:yearly:P-2").unwrap();
        assert_eq!(map.get("premium", BillingCycle::Monthly), Some("P-1"));
        assert_eq!(map.get("premium", BillingCycle::Yearly), Some("P-2"));
        assert_eq!(map.get("pro", BillingCycle::Monthly), None);
    }

    #[test]
    fn plan_map_rejects_malformed_entries() {
        assert!(PayPalPlanMap::parse("premium:P-1").is_err());
        assert!(PayPalPlanMap::parse("premium:weekly:P-1").is_err());
        assert!(PayPalPlanMap::parse("").unwrap().is_empty());
    }

    #[test]
    fn capture_refund_finds_capture_from_up_link() {
        let refund: PayPalCaptureRefund = serde_json::from_value(serde_json::json!({
            "id": "RF-1",
            "links": [
                {"href": "https://api-m.paypal.com/v2/payments/refunds/RF-1", "rel": "self"},
                {"href": "https://api-m.paypal.com/v2/payments/captures/CAP-9", "rel": "up"}
            ]
        }))
        .unwrap();
        assert_eq!(refund.capture_id().as_deref(), Some("CAP-9"));
    }

    #[test]
    fn refund_amount_is_made_positive() {
        let amount = PayPalAmount {
            total: "-10.50".into(),
            currency: "PLN".into(),
        };
        assert_eq!(amount.to_money().unwrap(), Money::new(1050, "PLN"));
    }
}
