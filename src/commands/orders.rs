use serde::{Deserialize, Serialize};

use crate::models::catalog::Product;
use crate::models::order::{OrderDraft, OrderListParams, OrderPricing, OrderRecord, OrderStatus};

use super::{AppState, CommandError, CommandResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderQuoteResponse {
    pub product: Product,
    pub pricing: OrderPricing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChange {
    pub id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn products_list(state: &AppState) -> CommandResult<Vec<Product>> {
    state.orders().products().await.map_err(CommandError::from)
}

pub async fn orders_quote(state: &AppState, draft: OrderDraft) -> CommandResult<OrderQuoteResponse> {
    let quote = state.orders().quote(&draft).await?;
    Ok(OrderQuoteResponse {
        product: quote.product,
        pricing: quote.pricing,
        referral_code: quote
            .referral
            .filter(|referral| referral.active)
            .map(|referral| referral.code),
    })
}

pub async fn orders_submit(state: &AppState, draft: OrderDraft) -> CommandResult<OrderRecord> {
    let record = state.orders().submit(&draft).await?;
    state
        .events()
        .order_created(&record.id, &record.product_id, record.pricing.final_price_cents)
        .await;
    Ok(record)
}

pub async fn orders_list(state: &AppState, params: Option<OrderListParams>) -> CommandResult<Vec<OrderRecord>> {
    let orders = state.orders();
    let params = params.unwrap_or_default();
    state
        .auth()
        .authorized(|token| async move { orders.list(&params, &token).await })
        .await
        .map_err(CommandError::from)
}

pub async fn orders_get(state: &AppState, id: String) -> CommandResult<OrderRecord> {
    let orders = state.orders();
    state
        .auth()
        .authorized(|token| async move { orders.get(&id, &token).await })
        .await
        .map_err(CommandError::from)
}

/// Loads the order, checks the transition, then patches it. A move to `paid`
/// or `fulfilled` from `created` reports the completed order.
pub async fn orders_update_status(state: &AppState, change: OrderStatusChange) -> CommandResult<OrderRecord> {
    let orders = state.orders();
    let updated = state
        .auth()
        .authorized(|token| async move {
            let current = orders.get(&change.id, &token).await?;
            let completes = current.status == OrderStatus::Created
                && matches!(change.status, OrderStatus::Paid | OrderStatus::Fulfilled);
            let updated = orders
                .update_status(&current, change.status, change.notes, &token)
                .await?;
            Ok((updated, completes))
        })
        .await?;

    let (record, completes) = updated;
    if completes {
        state
            .events()
            .order_completed(&record.id, &record.product_id, record.pricing.final_price_cents)
            .await;
    }
    Ok(record)
}
