use serde::Deserialize;

use crate::models::attribution::AttributionRecord;
use crate::services::attribution_service::parse_page_url;

use super::{run_blocking, AppState, CommandResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLoad {
    pub url: String,
    #[serde(default)]
    pub referrer: Option<String>,
}

/// Captures attribution for the page, then reports the view. Reporting
/// problems never fail the page load.
pub async fn page_loaded(state: &AppState, page: PageLoad) -> CommandResult<AttributionRecord> {
    let attribution = state.attribution();
    let url = page.url.clone();
    let referrer = page.referrer.clone();
    let record = run_blocking(move || attribution.capture(&url, referrer.as_deref())).await?;

    let path = parse_page_url(&page.url)
        .map(|visit| visit.path)
        .unwrap_or_else(|_| page.url.clone());
    state.events().page_view(&path, page.referrer.as_deref()).await;

    Ok(record)
}

pub async fn order_viewed(state: &AppState, order_id: String, product_id: Option<String>) -> CommandResult<bool> {
    Ok(state
        .events()
        .order_view(&order_id, product_id.as_deref())
        .await)
}

pub async fn visitor_session_id(state: &AppState) -> CommandResult<String> {
    let local_state = state.local_state();
    run_blocking(move || local_state.session_id()).await
}
