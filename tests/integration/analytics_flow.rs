use std::sync::Arc;
use std::time::Duration as StdDuration;

use astral_storefront::db::DbPool;
use astral_storefront::error::{AppError, AppResult};
use astral_storefront::models::analytics::{
    AnalyticsEvent, AnalyticsEventType, AnalyticsFilters, AnalyticsQuery, AnalyticsRangeKey,
    AnalyticsSummary, AnalyticsTotals, DateWindow,
};
use astral_storefront::services::analytics_service::{
    AnalyticsSource, HttpAnalyticsSource, LocalAnalyticsStore,
};
use astral_storefront::services::api_client::ApiClient;
use astral_storefront::services::dashboard::AnalyticsDashboard;
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::tempdir;

fn fixed_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 7).expect("date")
}

/// Answers 7-day queries slowly and every other query immediately, tagging
/// each summary with the window length so the test can tell them apart.
struct RangeDelayedSource;

#[async_trait]
impl AnalyticsSource for RangeDelayedSource {
    async fn fetch_summary(&self, query: &AnalyticsQuery) -> AppResult<AnalyticsSummary> {
        let days = query.window.len_days();
        if days == 7 {
            tokio::time::sleep(StdDuration::from_millis(250)).await;
        }
        Ok(AnalyticsSummary {
            totals: AnalyticsTotals {
                page_views: days,
                ..AnalyticsTotals::default()
            },
            ..AnalyticsSummary::default()
        })
    }
}

struct DownSource;

#[async_trait]
impl AnalyticsSource for DownSource {
    async fn fetch_summary(&self, _query: &AnalyticsQuery) -> AppResult<AnalyticsSummary> {
        Err(AppError::other("analytics backend offline"))
    }
}

#[tokio::test]
async fn slow_earlier_response_never_overwrites_a_newer_one() {
    let dashboard = AnalyticsDashboard::with_clock(Arc::new(RangeDelayedSource), fixed_today);

    let (first, second) = futures::join!(dashboard.set_range(AnalyticsRangeKey::SevenDays), async {
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        dashboard.set_range(AnalyticsRangeKey::ThirtyDays).await
    });
    first.expect("first refresh");
    let second = second.expect("second refresh");
    assert_eq!(second.summary.totals.page_views, 30);

    let snapshot = dashboard.snapshot().expect("snapshot");
    assert_eq!(snapshot.range, AnalyticsRangeKey::ThirtyDays);
    assert_eq!(snapshot.applied_token, 2);
    assert_eq!(snapshot.summary.totals.page_views, 30);
    assert_eq!(snapshot.summary.daily.len(), 30);
    assert_eq!(snapshot.window.to, fixed_today());
    assert!(!snapshot.loading);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn failed_refresh_shows_zeroed_summary_with_error() {
    let dashboard = AnalyticsDashboard::with_clock(Arc::new(DownSource), fixed_today);

    let snapshot = dashboard
        .set_range(AnalyticsRangeKey::SevenDays)
        .await
        .expect("refresh completes");

    assert_eq!(snapshot.error.as_deref(), Some("analytics backend offline"));
    assert_eq!(snapshot.summary.totals, AnalyticsTotals::default());
    assert_eq!(snapshot.summary.daily.len(), 7);
    assert!(snapshot.summary.daily.iter().all(|point| point.page_views == 0));
    assert!(!snapshot.loading);
}

fn event_at(
    event_type: AnalyticsEventType,
    session: &str,
    day: u32,
    configure: impl FnOnce(&mut AnalyticsEvent),
) -> AnalyticsEvent {
    let mut event = AnalyticsEvent::new(event_type, session);
    event.occurred_at = Utc
        .with_ymd_and_hms(2024, 6, day, 12, 0, 0)
        .single()
        .expect("timestamp");
    configure(&mut event);
    event
}

#[test]
fn local_store_aggregates_filters_and_ranks() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("analytics.sqlite")).expect("db pool");
    let store = LocalAnalyticsStore::new(pool).with_top_n(1);

    let events = vec![
        event_at(AnalyticsEventType::PageView, "s1", 2, |e| {
            e.path = Some("/".into());
            e.utm_source = Some("instagram".into());
            e.country_code = Some("gb".into());
        }),
        event_at(AnalyticsEventType::PageView, "s1", 2, |e| {
            e.path = Some("/readings".into());
            e.utm_source = Some("instagram".into());
            e.country_code = Some("gb".into());
        }),
        event_at(AnalyticsEventType::PageView, "s2", 3, |e| {
            e.path = Some("/readings".into());
            e.utm_source = Some("instagram".into());
            e.country_code = Some("US".into());
        }),
        event_at(AnalyticsEventType::OrderCompleted, "s2", 3, |e| {
            e.product_id = Some("natal-chart".into());
            e.utm_source = Some("instagram".into());
            e.revenue_cents = Some(4_050);
        }),
        event_at(AnalyticsEventType::PageView, "s3", 4, |e| {
            e.path = Some("/".into());
            e.utm_source = Some("tiktok".into());
        }),
        // Outside the queried week.
        event_at(AnalyticsEventType::PageView, "s4", 20, |e| {
            e.path = Some("/".into());
            e.utm_source = Some("instagram".into());
        }),
    ];
    for event in &events {
        store.record(event).expect("record event");
    }

    let window = DateWindow {
        from: NaiveDate::from_ymd_opt(2024, 6, 1).expect("from"),
        to: fixed_today(),
    };
    let everything = store
        .summarize(&AnalyticsQuery {
            window,
            filters: AnalyticsFilters::default(),
        })
        .expect("summary");
    assert_eq!(everything.totals.page_views, 4);
    assert_eq!(everything.totals.unique_visitors, 3);
    assert_eq!(everything.totals.orders_completed, 1);
    assert_eq!(everything.totals.revenue_cents, 4_050);
    assert_eq!(everything.daily.len(), 7);
    assert_eq!(everything.top_pages.len(), 1);

    let instagram = store
        .summarize(&AnalyticsQuery {
            window,
            filters: AnalyticsFilters {
                utm_source: Some("instagram".into()),
                ..AnalyticsFilters::default()
            },
        })
        .expect("filtered summary");
    assert_eq!(instagram.totals.page_views, 3);
    assert_eq!(instagram.totals.unique_visitors, 2);
    assert_eq!(instagram.top_pages[0].label, "/readings");
    assert_eq!(instagram.top_pages[0].count, 2);
    assert_eq!(instagram.top_countries[0].label, "GB");
}

#[test]
fn local_store_purges_events_past_retention() {
    let dir = tempdir().expect("temp dir");
    let store = LocalAnalyticsStore::new(DbPool::new(dir.path().join("purge.sqlite")).expect("db pool"));

    let mut old = AnalyticsEvent::new(AnalyticsEventType::PageView, "s1");
    old.occurred_at = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).single().expect("old");
    store.record(&old).expect("record old");
    store
        .record(&event_at(AnalyticsEventType::PageView, "s2", 5, |_| {}))
        .expect("record recent");

    let removed = store.purge_expired(fixed_today()).expect("purge");
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn http_source_sends_window_and_active_filters_only() {
    let server = MockServer::start_async().await;
    let summary_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/analytics/summary")
                .query_param("from", "2024-06-01")
                .query_param("to", "2024-06-07")
                .query_param("utm_source", "instagram");
            then.status(200).json_body(json!({
                "totals": { "pageViews": 12, "uniqueVisitors": 5 },
                "daily": [ { "date": "2024-06-03", "pageViews": 12, "uniqueVisitors": 5 } ],
                "topPages": [ { "label": "/", "count": 12 } ]
            }));
        })
        .await;

    let client = ApiClient::new(&server.base_url(), StdDuration::from_secs(5)).expect("client");
    let dashboard = AnalyticsDashboard::with_clock(Arc::new(HttpAnalyticsSource::new(client)), fixed_today);
    dashboard
        .set_range(AnalyticsRangeKey::SevenDays)
        .await
        .expect("range");

    let snapshot = dashboard
        .set_filters(AnalyticsFilters {
            utm_source: Some(" instagram ".into()),
            utm_campaign: Some("all".into()),
            ..AnalyticsFilters::default()
        })
        .await
        .expect("filters");

    summary_mock.assert_async().await;
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.summary.totals.page_views, 12);
    assert_eq!(snapshot.summary.daily.len(), 7);
    let third = snapshot
        .summary
        .daily
        .iter()
        .find(|point| point.date == NaiveDate::from_ymd_opt(2024, 6, 3).expect("day"))
        .expect("point for the 3rd");
    assert_eq!(third.page_views, 12);
    assert_eq!(snapshot.summary.daily[0].page_views, 0);
}
