use crate::models::checkout::{CheckoutState, ManualOrderForm};
use crate::models::order::{OrderDraft, OrderRecord};

use super::{AppState, CommandError, CommandResult};

pub async fn checkout_start(state: &AppState, draft: OrderDraft) -> CommandResult<CheckoutState> {
    state
        .checkout()
        .dispatch(&draft)
        .await
        .map_err(CommandError::from)
}

pub async fn checkout_state(state: &AppState) -> CommandResult<CheckoutState> {
    state.checkout().state().map_err(CommandError::from)
}

pub async fn checkout_reset(state: &AppState) -> CommandResult<CheckoutState> {
    state.checkout().reset().map_err(CommandError::from)
}

pub async fn checkout_submit_manual(state: &AppState, form: ManualOrderForm) -> CommandResult<OrderRecord> {
    let record = state.checkout().submit_manual(&form).await?;
    state
        .events()
        .order_created(&record.id, &record.product_id, record.pricing.final_price_cents)
        .await;
    Ok(record)
}
