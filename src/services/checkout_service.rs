use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StripeConfig;
use crate::error::{AppError, AppResult};
use crate::models::checkout::{CheckoutRequest, CheckoutSession, CheckoutState, ManualOrderForm};
use crate::models::order::{OrderDraft, OrderPricing, OrderRecord};
use crate::services::api_client::error_from_reqwest;
use crate::services::order_service::{validate_draft, OrderService};

/// Creates hosted payment pages.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &CheckoutRequest) -> AppResult<CheckoutSession>;
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Stripe Checkout over its form-encoded REST API.
pub struct StripeGateway {
    client: reqwest::Client,
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig, timeout: Duration) -> AppResult<Self> {
        if config.secret_key.trim().is_empty() {
            return Err(AppError::checkout_unavailable("stripe secret key is empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::checkout_unavailable(format!("failed to build stripe client: {err}")))?;
        Ok(Self { client, config })
    }

    fn form_fields(&self, request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut fields = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.config.success_url.clone()),
            ("cancel_url".to_string(), self.config.cancel_url.clone()),
            ("customer_email".to_string(), request.customer_email.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.pricing.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.pricing.final_price_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.product_name.clone(),
            ),
            ("metadata[product_id]".to_string(), request.product_id.clone()),
            (
                "metadata[discount_cents]".to_string(),
                request.pricing.discount_cents.to_string(),
            ),
        ];
        if let Some(code) = &request.referral_code {
            fields.push(("metadata[referral_code]".to_string(), code.clone()));
        }
        fields
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(&self, request: &CheckoutRequest) -> AppResult<CheckoutSession> {
        let correlation_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}/v1/checkout/sessions",
            self.config.api_base.trim_end_matches('/')
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.secret_key)
            .form(&self.form_fields(request))
            .send()
            .await
            .map_err(|err| error_from_reqwest(err, &correlation_id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|parsed| parsed.error.message)
                .unwrap_or_else(|| format!("stripe returned status {}", status.as_u16()));
            return Err(AppError::checkout_unavailable(message));
        }

        let session: CheckoutSession = response.json().await.map_err(|err| {
            AppError::checkout_unavailable(format!("unreadable checkout session: {err}"))
        })?;
        debug!(target: "app::checkout", session_id = %session.id, correlation_id = %correlation_id, "checkout session created");
        Ok(session)
    }
}

enum Gateway {
    Ready(Arc<dyn PaymentGateway>),
    Unavailable(String),
}

/// Drives `idle -> paying -> redirected | failed`. Every failure lands in
/// `failed` with a prefilled manual order form.
pub struct CheckoutDispatcher {
    gateway: Gateway,
    orders: Arc<OrderService>,
    state: Mutex<CheckoutState>,
}

impl CheckoutDispatcher {
    pub fn new(gateway: Arc<dyn PaymentGateway>, orders: Arc<OrderService>) -> Self {
        Self::with_gateway(Gateway::Ready(gateway), orders)
    }

    /// A missing config or a gateway that fails to build still yields a
    /// dispatcher; it just always falls back to the manual form.
    pub fn from_config(config: Option<&StripeConfig>, timeout: Duration, orders: Arc<OrderService>) -> Self {
        let gateway = match config {
            None => Gateway::Unavailable("payment is not configured".to_string()),
            Some(config) => match StripeGateway::new(config.clone(), timeout) {
                Ok(stripe) => Gateway::Ready(Arc::new(stripe)),
                Err(err) => Gateway::Unavailable(format!("payment gateway failed to initialize: {err}")),
            },
        };
        Self::with_gateway(gateway, orders)
    }

    fn with_gateway(gateway: Gateway, orders: Arc<OrderService>) -> Self {
        Self {
            gateway,
            orders,
            state: Mutex::new(CheckoutState::Idle),
        }
    }

    pub fn state(&self) -> AppResult<CheckoutState> {
        Ok(self.lock_state()?.clone())
    }

    /// Back to `idle`. Rejected while a checkout is paying, since the
    /// in-flight session would land on top of the reset.
    pub fn reset(&self) -> AppResult<CheckoutState> {
        let mut state = self.lock_state()?;
        if matches!(*state, CheckoutState::Paying) {
            return Err(AppError::conflict("checkout in progress cannot be reset"));
        }
        *state = CheckoutState::Idle;
        Ok(state.clone())
    }

    /// Starts checkout for `draft`. Rejected while a checkout is already
    /// paying or when the draft does not validate; every later failure is
    /// reported through the returned state.
    pub async fn dispatch(&self, draft: &OrderDraft) -> AppResult<CheckoutState> {
        {
            let mut state = self.lock_state()?;
            if matches!(*state, CheckoutState::Paying) {
                return Err(AppError::conflict("checkout already in progress"));
            }
            validate_draft(draft, Utc::now().date_naive())?;
            *state = CheckoutState::Paying;
        }

        let outcome = self.run(draft).await;
        let next = match outcome {
            Ok(session) => {
                info!(target: "app::checkout", product_id = %draft.product_id, "redirecting to hosted checkout");
                CheckoutState::Redirected { session }
            }
            Err(failure) => {
                warn!(target: "app::checkout", reason = %failure.reason, "checkout failed, offering manual order form");
                CheckoutState::Failed {
                    reason: failure.reason,
                    fallback: ManualOrderForm {
                        draft: draft.clone(),
                        pricing: failure.pricing,
                        product_name: failure.product_name,
                    },
                }
            }
        };

        let mut state = self.lock_state()?;
        *state = next;
        Ok(state.clone())
    }

    /// Creates the order from the fallback form with status `created`.
    pub async fn submit_manual(&self, form: &ManualOrderForm) -> AppResult<OrderRecord> {
        if matches!(*self.lock_state()?, CheckoutState::Paying) {
            return Err(AppError::conflict("checkout already in progress"));
        }
        let record = match (&form.pricing, &form.product_name) {
            (Some(pricing), Some(name)) => {
                self.orders
                    .submit_quoted(&form.draft, name, pricing.clone())
                    .await?
            }
            _ => self.orders.submit(&form.draft).await?,
        };
        self.reset()?;
        Ok(record)
    }

    async fn run(&self, draft: &OrderDraft) -> Result<CheckoutSession, CheckoutFailure> {
        let gateway = match &self.gateway {
            Gateway::Ready(gateway) => Arc::clone(gateway),
            Gateway::Unavailable(reason) => return Err(CheckoutFailure::bare(reason.clone())),
        };

        let quote = self
            .orders
            .quote(draft)
            .await
            .map_err(|err| CheckoutFailure::bare(err.to_string()))?;

        let request = CheckoutRequest {
            product_id: quote.product.id.clone(),
            product_name: quote.product.name.clone(),
            pricing: quote.pricing.clone(),
            customer_email: draft.customer.email.trim().to_lowercase(),
            referral_code: quote.referral.as_ref().map(|referral| referral.code.clone()),
        };

        gateway.create_session(&request).await.map_err(|err| CheckoutFailure {
            reason: err.to_string(),
            pricing: Some(quote.pricing),
            product_name: Some(quote.product.name),
        })
    }

    fn lock_state(&self) -> AppResult<MutexGuard<'_, CheckoutState>> {
        self.state
            .lock()
            .map_err(|_| AppError::other("checkout state lock poisoned"))
    }
}

struct CheckoutFailure {
    reason: String,
    pricing: Option<OrderPricing>,
    product_name: Option<String>,
}

impl CheckoutFailure {
    fn bare(reason: String) -> Self {
        Self {
            reason,
            pricing: None,
            product_name: None,
        }
    }
}
