use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::db::repositories::analytics_event_repository::AnalyticsEventRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::analytics::{
    AnalyticsEvent, AnalyticsQuery, AnalyticsRangeKey, AnalyticsSummary, DateWindow,
};
use crate::services::api_client::ApiClient;
use crate::services::summary_service::{build_summary, DEFAULT_TOP_N};

const LOCAL_RETENTION_DAYS: i64 = 400;

/// Inclusive UTC window for a relative range ending on `today`.
pub fn resolve_window(range: AnalyticsRangeKey, today: NaiveDate) -> DateWindow {
    range.window_ending(today)
}

/// Where the dashboard gets its summaries from.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn fetch_summary(&self, query: &AnalyticsQuery) -> AppResult<AnalyticsSummary>;
}

/// Pre-aggregated summaries from `GET /api/analytics/summary`.
pub struct HttpAnalyticsSource {
    client: ApiClient,
}

impl HttpAnalyticsSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnalyticsSource for HttpAnalyticsSource {
    async fn fetch_summary(&self, query: &AnalyticsQuery) -> AppResult<AnalyticsSummary> {
        self.client.fetch_summary(query).await
    }
}

/// Event log kept in the local database and aggregated in process.
#[derive(Clone)]
pub struct LocalAnalyticsStore {
    db: DbPool,
    top_n: usize,
}

impl LocalAnalyticsStore {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            top_n: DEFAULT_TOP_N,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }

    pub fn record(&self, event: &AnalyticsEvent) -> AppResult<i64> {
        self.db
            .with_connection(|conn| AnalyticsEventRepository::insert(conn, event))
    }

    pub fn summarize(&self, query: &AnalyticsQuery) -> AppResult<AnalyticsSummary> {
        let rows = self.db.with_connection(|conn| {
            AnalyticsEventRepository::list_between(conn, query.window.from, query.window.to)
        })?;
        let events: Vec<AnalyticsEvent> = rows.into_iter().filter_map(|row| row.into_event()).collect();

        debug!(
            target: "app::analytics",
            from = %query.window.from,
            to = %query.window.to,
            events = events.len(),
            "aggregating local analytics"
        );

        Ok(build_summary(&events, &query.window, &query.filters, self.top_n))
    }

    /// Drops events older than the retention horizon relative to `today`.
    pub fn purge_expired(&self, today: NaiveDate) -> AppResult<usize> {
        let cutoff = today - Duration::days(LOCAL_RETENTION_DAYS);
        let removed = self
            .db
            .with_connection(|conn| AnalyticsEventRepository::purge_before(conn, cutoff))?;
        if removed > 0 {
            info!(target: "app::analytics", removed, cutoff = %cutoff, "purged expired analytics events");
        }
        Ok(removed)
    }
}

#[async_trait]
impl AnalyticsSource for LocalAnalyticsStore {
    async fn fetch_summary(&self, query: &AnalyticsQuery) -> AppResult<AnalyticsSummary> {
        let store = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || store.summarize(&query))
            .await
            .map_err(|err| AppError::other(format!("analytics aggregation task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analytics::{AnalyticsEventType, AnalyticsFilters};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[test]
    fn resolve_window_matches_range_lengths() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let window = resolve_window(AnalyticsRangeKey::SevenDays, today);
        assert_eq!(window.from, NaiveDate::from_ymd_opt(2024, 2, 23).unwrap());
        assert_eq!(window.to, today);

        let window = resolve_window(AnalyticsRangeKey::Year, today);
        assert_eq!(window.from, NaiveDate::from_ymd_opt(2023, 3, 2).unwrap());
    }

    #[test]
    fn local_store_round_trips_events_into_a_summary() {
        let dir = tempdir().unwrap();
        let store = LocalAnalyticsStore::new(DbPool::new(dir.path().join("a.sqlite")).unwrap());

        let mut event = AnalyticsEvent::new(AnalyticsEventType::PageView, "s1");
        event.path = Some("/".into());
        event.occurred_at = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        store.record(&event).unwrap();

        let query = AnalyticsQuery {
            window: DateWindow {
                from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            },
            filters: AnalyticsFilters::default(),
        };
        let summary = store.summarize(&query).unwrap();
        assert_eq!(summary.totals.page_views, 1);
        assert_eq!(summary.daily.len(), 3);
        assert_eq!(summary.top_pages[0].label, "/");

        let removed = store
            .purge_expired(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap())
            .unwrap();
        assert_eq!(removed, 1);
    }
}
