use serde::{Deserialize, Serialize};

use super::order::{OrderDraft, OrderPricing};

/// Hosted payment page created by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Everything the gateway needs to price a hosted checkout.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub product_id: String,
    pub product_name: String,
    pub pricing: OrderPricing,
    pub customer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
}

/// Fallback intake form shown when hosted checkout is unavailable.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualOrderForm {
    pub draft: OrderDraft,
    pub pricing: Option<OrderPricing>,
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum CheckoutState {
    Idle,
    Paying,
    Redirected {
        session: CheckoutSession,
    },
    Failed {
        reason: String,
        fallback: ManualOrderForm,
    },
}

impl CheckoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Idle => "idle",
            CheckoutState::Paying => "paying",
            CheckoutState::Redirected { .. } => "redirected",
            CheckoutState::Failed { .. } => "failed",
        }
    }
}
