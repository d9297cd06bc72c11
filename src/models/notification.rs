use serde::{Deserialize, Serialize};

/// Body of the login-alert function: `{email, loginTime}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginNotification {
    pub email: String,
    pub login_time: String,
}

/// Body of the order function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotification {
    #[serde(default)]
    pub order_id: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub product_name: String,
    pub final_price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub birth_time: Option<String>,
    #[serde(default)]
    pub birth_place: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// A rendered message ready for the mail provider.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

fn default_currency() -> String {
    "usd".to_string()
}
