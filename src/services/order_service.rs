use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::attribution::AttributionRecord;
use crate::models::catalog::{Product, Referral};
use crate::models::order::{
    BirthData, CustomerInfo, OrderCreateInput, OrderDraft, OrderListParams, OrderPricing, OrderRecord, OrderStatus,
    OrderStatusUpdate,
};
use crate::services::api_client::ApiClient;
use crate::services::local_state_service::LocalStateService;
use crate::utils::redact::mask_email;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));
static REFERRAL_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9_-]{1,64}$").expect("referral code pattern compiles"));

const MAX_NAME_LEN: usize = 120;
const MAX_NOTES_LEN: usize = 2_000;

/// Validates a draft against `today`. Errors list every offending field.
pub fn validate_draft(draft: &OrderDraft, today: NaiveDate) -> AppResult<()> {
    let mut problems: Vec<(&str, &str)> = Vec::new();

    let name = draft.customer.name.trim();
    if name.is_empty() {
        problems.push(("customer.name", "name is required"));
    } else if name.chars().count() > MAX_NAME_LEN {
        problems.push(("customer.name", "name is too long"));
    }
    if !EMAIL_PATTERN.is_match(draft.customer.email.trim()) {
        problems.push(("customer.email", "email address is not valid"));
    }
    if draft.birth.date > today {
        problems.push(("birth.date", "birth date cannot be in the future"));
    }
    if draft.birth.place.trim().is_empty() {
        problems.push(("birth.place", "birth place is required"));
    }
    if draft.product_id.trim().is_empty() {
        problems.push(("productId", "product is required"));
    }
    if draft
        .referral_code
        .as_deref()
        .map(str::trim)
        .map_or(false, |code| !code.is_empty() && normalize_code(Some(code)).is_none())
    {
        problems.push(("referralCode", "referral code is not valid"));
    }
    if draft
        .notes
        .as_deref()
        .map_or(false, |notes| notes.chars().count() > MAX_NOTES_LEN)
    {
        problems.push(("notes", "notes are too long"));
    }

    if problems.is_empty() {
        return Ok(());
    }

    let fields: serde_json::Map<String, serde_json::Value> = problems
        .iter()
        .map(|(field, message)| (field.to_string(), json!(message)))
        .collect();
    Err(AppError::validation_with_details(
        problems[0].1,
        json!({ "fields": fields }),
    ))
}

/// `round_half_up(base * percent / 100)` in integer cents.
pub fn discount_cents(base_cents: i64, percent: i32) -> i64 {
    let percent = i64::from(percent.clamp(0, 100));
    let base = base_cents.max(0);
    base.saturating_mul(percent).saturating_add(50) / 100
}

/// Inactive referrals, and a missing one, give no discount.
pub fn price_order(product: &Product, referral: Option<&Referral>) -> OrderPricing {
    let percent = referral
        .filter(|referral| referral.active)
        .map_or(0, |referral| referral.discount_percent);
    let base = product.base_price_cents.max(0);
    let discount = discount_cents(base, percent);

    OrderPricing {
        base_price_cents: base,
        discount_cents: discount,
        final_price_cents: base - discount,
        currency: product.currency.to_lowercase(),
    }
}

/// Request body for `POST /api/orders`, tagged with the visitor's campaign.
pub fn build_create_input(
    draft: &OrderDraft,
    product_name: &str,
    pricing: OrderPricing,
    attribution: Option<&AttributionRecord>,
) -> OrderCreateInput {
    let referral_code = normalize_code(draft.referral_code.as_deref())
        .or_else(|| attribution.and_then(|record| normalize_code(record.referral_code.as_deref())));

    OrderCreateInput {
        customer: CustomerInfo {
            name: draft.customer.name.trim().to_string(),
            email: draft.customer.email.trim().to_lowercase(),
        },
        birth: BirthData {
            date: draft.birth.date,
            time: draft.birth.time,
            place: draft.birth.place.trim().to_string(),
        },
        product_id: draft.product_id.trim().to_string(),
        product_name: product_name.to_string(),
        pricing,
        referral_code,
        utm_source: attribution.and_then(|record| record.utm_source.clone()),
        utm_campaign: attribution.and_then(|record| record.utm_campaign.clone()),
        status: OrderStatus::Created,
        notes: draft
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string),
    }
}

/// Trimmed, upper-cased code, or `None` when blank or not made of
/// `A-Z`, `0-9`, `_` and `-`.
pub fn normalize_code(code: Option<&str>) -> Option<String> {
    code.map(|code| code.trim().to_uppercase())
        .filter(|code| REFERRAL_CODE_PATTERN.is_match(code))
}

/// Checks the lifecycle rule before anything is sent.
pub fn check_transition(current: &OrderRecord, next: OrderStatus) -> AppResult<()> {
    if current.status.can_transition_to(next) {
        return Ok(());
    }
    Err(AppError::validation_with_details(
        format!(
            "order cannot move from {} to {}",
            current.status.as_str(),
            next.as_str()
        ),
        json!({ "orderId": current.id, "from": current.status.as_str(), "to": next.as_str() }),
    ))
}

/// A priced draft ready for checkout or manual submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderQuote {
    pub product: Product,
    pub pricing: OrderPricing,
    pub referral: Option<Referral>,
}

pub struct OrderService {
    client: ApiClient,
    state: Arc<LocalStateService>,
}

impl OrderService {
    pub fn new(client: ApiClient, state: Arc<LocalStateService>) -> Self {
        Self { client, state }
    }

    pub async fn products(&self) -> AppResult<Vec<Product>> {
        let products = self.client.list_products().await?;
        Ok(products.into_iter().filter(|product| product.active).collect())
    }

    /// Validates the draft, then resolves product and referral into a price.
    pub async fn quote(&self, draft: &OrderDraft) -> AppResult<OrderQuote> {
        validate_draft(draft, Utc::now().date_naive())?;

        let product_id = draft.product_id.trim();
        let product = self
            .products()
            .await?
            .into_iter()
            .find(|product| product.id == product_id)
            .ok_or_else(|| AppError::validation(format!("unknown product: {product_id}")))?;

        let referral = match self.referral_code_for(draft).await {
            Some(code) => {
                let referral = self.client.get_referral(&code).await?;
                if referral.is_none() {
                    warn!(target: "app::orders", code = %code, "referral code not found, pricing without discount");
                }
                referral
            }
            None => None,
        };

        let pricing = price_order(&product, referral.as_ref());
        Ok(OrderQuote {
            product,
            pricing,
            referral,
        })
    }

    /// Creates the order with status `created`.
    pub async fn submit(&self, draft: &OrderDraft) -> AppResult<OrderRecord> {
        let quote = self.quote(draft).await?;
        self.submit_quoted(draft, &quote.product.name, quote.pricing).await
    }

    pub async fn submit_quoted(
        &self,
        draft: &OrderDraft,
        product_name: &str,
        pricing: OrderPricing,
    ) -> AppResult<OrderRecord> {
        validate_draft(draft, Utc::now().date_naive())?;
        let attribution = self.attribution().await;
        let input = build_create_input(draft, product_name, pricing, attribution.as_ref());
        let record = self.client.create_order(&input).await?;

        info!(
            target: "app::orders",
            order_id = %record.id,
            product_id = %record.product_id,
            customer = %mask_email(&record.customer.email),
            final_price_cents = record.pricing.final_price_cents,
            "order created"
        );
        Ok(record)
    }

    /// Newest first; the status filter is also applied locally.
    pub async fn list(&self, params: &OrderListParams, token: &str) -> AppResult<Vec<OrderRecord>> {
        let mut orders = self.client.list_orders(params, token).await?;
        if let Some(status) = params.status {
            orders.retain(|order| order.status == status);
        }
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = params.limit {
            orders.truncate(limit as usize);
        }
        Ok(orders)
    }

    pub async fn get(&self, id: &str, token: &str) -> AppResult<OrderRecord> {
        self.client.get_order(id, token).await
    }

    pub async fn update_status(
        &self,
        current: &OrderRecord,
        next: OrderStatus,
        notes: Option<String>,
        token: &str,
    ) -> AppResult<OrderRecord> {
        check_transition(current, next)?;

        let update = OrderStatusUpdate {
            id: current.id.clone(),
            status: next,
            notes,
        };
        let updated = self.client.update_order(&update, token).await?;
        info!(
            target: "app::orders",
            order_id = %updated.id,
            from = current.status.as_str(),
            to = updated.status.as_str(),
            "order status updated"
        );
        Ok(updated)
    }

    async fn referral_code_for(&self, draft: &OrderDraft) -> Option<String> {
        if let Some(code) = normalize_code(draft.referral_code.as_deref()) {
            return Some(code);
        }
        self.attribution()
            .await
            .and_then(|record| normalize_code(record.referral_code.as_deref()))
    }

    async fn attribution(&self) -> Option<AttributionRecord> {
        match self.state.run_blocking(|state| state.attribution()).await {
            Ok(record) => record,
            Err(err) => {
                warn!(target: "app::orders", error = %err, "attribution unavailable for order");
                None
            }
        }
    }
}
