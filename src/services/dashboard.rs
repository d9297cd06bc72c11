use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::analytics::{
    AnalyticsFilters, AnalyticsQuery, AnalyticsRangeKey, AnalyticsSummary, DashboardSnapshot,
    DateWindow,
};
use crate::services::analytics_service::{resolve_window, AnalyticsSource};
use crate::services::summary_service::normalize_daily;

struct DashboardState {
    range: AnalyticsRangeKey,
    filters: AnalyticsFilters,
    window: DateWindow,
    summary: AnalyticsSummary,
    loading: bool,
    error: Option<String>,
    applied_token: u64,
}

/// Range/filter selection plus the last applied summary.
///
/// Every refresh takes a sequence token; a response is applied only while its
/// token is still the newest one issued, so a slow earlier request can never
/// overwrite a later one.
pub struct AnalyticsDashboard {
    source: Arc<dyn AnalyticsSource>,
    state: RwLock<DashboardState>,
    sequence: AtomicU64,
    today: fn() -> NaiveDate,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

impl AnalyticsDashboard {
    pub fn new(source: Arc<dyn AnalyticsSource>) -> Self {
        Self::with_clock(source, utc_today)
    }

    pub fn with_clock(source: Arc<dyn AnalyticsSource>, today: fn() -> NaiveDate) -> Self {
        let range = AnalyticsRangeKey::default();
        let window = resolve_window(range, today());
        Self {
            source,
            state: RwLock::new(DashboardState {
                range,
                filters: AnalyticsFilters::default(),
                window,
                summary: AnalyticsSummary::zeroed(&window),
                loading: false,
                error: None,
                applied_token: 0,
            }),
            sequence: AtomicU64::new(0),
            today,
        }
    }

    pub fn snapshot(&self) -> AppResult<DashboardSnapshot> {
        let state = self.read_state()?;
        Ok(DashboardSnapshot {
            range: state.range,
            window: state.window,
            filters: state.filters.clone(),
            summary: state.summary.clone(),
            loading: state.loading,
            error: state.error.clone(),
            applied_token: state.applied_token,
        })
    }

    pub async fn set_range(&self, range: AnalyticsRangeKey) -> AppResult<DashboardSnapshot> {
        self.write_state()?.range = range;
        self.refresh().await
    }

    pub async fn set_filters(&self, filters: AnalyticsFilters) -> AppResult<DashboardSnapshot> {
        self.write_state()?.filters = filters.normalized();
        self.refresh().await
    }

    pub async fn clear_filters(&self) -> AppResult<DashboardSnapshot> {
        self.set_filters(AnalyticsFilters::default()).await
    }

    /// Fetches a summary for the current selection. Failures are folded into
    /// the snapshot, never returned.
    pub async fn refresh(&self) -> AppResult<DashboardSnapshot> {
        let token = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let query = {
            let mut state = self.write_state()?;
            state.window = resolve_window(state.range, (self.today)());
            state.loading = true;
            AnalyticsQuery {
                window: state.window,
                filters: state.filters.clone(),
            }
        };

        debug!(
            target: "app::analytics",
            token,
            from = %query.window.from,
            to = %query.window.to,
            filtered = !query.filters.is_empty(),
            "refreshing analytics dashboard"
        );

        let result = self.source.fetch_summary(&query).await;

        {
            let mut state = self.write_state()?;
            let latest = self.sequence.load(Ordering::SeqCst);
            if token != latest {
                debug!(target: "app::analytics", token, latest, "discarding stale analytics response");
            } else {
                match result {
                    Ok(mut summary) => {
                        summary.daily = normalize_daily(summary.daily, &query.window);
                        state.summary = summary;
                        state.error = None;
                    }
                    Err(err) => {
                        warn!(target: "app::analytics", token, error = %err, "analytics summary request failed");
                        state.summary = AnalyticsSummary::zeroed(&query.window);
                        state.error = Some(err.to_string());
                    }
                }
                state.window = query.window;
                state.loading = false;
                state.applied_token = token;
            }
        }

        self.snapshot()
    }

    fn read_state(&self) -> AppResult<std::sync::RwLockReadGuard<'_, DashboardState>> {
        self.state
            .read()
            .map_err(|_| AppError::other("dashboard state lock poisoned"))
    }

    fn write_state(&self) -> AppResult<std::sync::RwLockWriteGuard<'_, DashboardState>> {
        self.state
            .write()
            .map_err(|_| AppError::other("dashboard state lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorCode;
    use crate::models::analytics::DailyPoint;
    use async_trait::async_trait;

    fn fixed_today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    struct FailingSource;

    #[async_trait]
    impl AnalyticsSource for FailingSource {
        async fn fetch_summary(&self, _query: &AnalyticsQuery) -> AppResult<AnalyticsSummary> {
            Err(AppError::api(ApiErrorCode::Unavailable, "summary endpoint down"))
        }
    }

    struct SparseSource;

    #[async_trait]
    impl AnalyticsSource for SparseSource {
        async fn fetch_summary(&self, query: &AnalyticsQuery) -> AppResult<AnalyticsSummary> {
            let mut point = DailyPoint::zero(query.window.to);
            point.page_views = 4;
            Ok(AnalyticsSummary {
                daily: vec![point],
                ..AnalyticsSummary::default()
            })
        }
    }

    #[tokio::test]
    async fn failure_resets_to_zeroed_summary_and_clears_loading() {
        let dashboard = AnalyticsDashboard::with_clock(Arc::new(FailingSource), fixed_today);
        let snapshot = dashboard.set_range(AnalyticsRangeKey::SevenDays).await.unwrap();

        assert!(!snapshot.loading);
        assert_eq!(snapshot.error.as_deref(), Some("summary endpoint down"));
        assert_eq!(snapshot.summary.daily.len(), 7);
        assert_eq!(snapshot.summary.totals.page_views, 0);
        assert!(snapshot.summary.top_pages.is_empty());
    }

    #[tokio::test]
    async fn received_series_is_zero_filled_to_the_window() {
        let dashboard = AnalyticsDashboard::with_clock(Arc::new(SparseSource), fixed_today);
        let snapshot = dashboard.refresh().await.unwrap();

        assert_eq!(snapshot.window.to, fixed_today());
        assert_eq!(snapshot.summary.daily.len(), 30);
        assert_eq!(snapshot.summary.daily.last().unwrap().page_views, 4);
        assert_eq!(snapshot.applied_token, 1);
        assert!(snapshot.error.is_none());
    }
}
