use crate::models::analytics::{AnalyticsFilters, AnalyticsRangeKey, DashboardSnapshot};

use super::{AppState, CommandError, CommandResult};

pub async fn analytics_dashboard_load(state: &AppState) -> CommandResult<DashboardSnapshot> {
    state.dashboard().refresh().await.map_err(CommandError::from)
}

pub async fn analytics_dashboard_snapshot(state: &AppState) -> CommandResult<DashboardSnapshot> {
    state.dashboard().snapshot().map_err(CommandError::from)
}

pub async fn analytics_set_range(
    state: &AppState,
    range: AnalyticsRangeKey,
) -> CommandResult<DashboardSnapshot> {
    state
        .dashboard()
        .set_range(range)
        .await
        .map_err(CommandError::from)
}

pub async fn analytics_set_filters(
    state: &AppState,
    filters: Option<AnalyticsFilters>,
) -> CommandResult<DashboardSnapshot> {
    let dashboard = state.dashboard();
    match filters {
        Some(filters) => dashboard.set_filters(filters).await,
        None => dashboard.clear_filters().await,
    }
    .map_err(CommandError::from)
}
