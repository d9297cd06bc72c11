use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use crate::models::analytics::{
    AnalyticsEvent, AnalyticsEventType, AnalyticsFilters, AnalyticsSummary, AnalyticsTotals,
    DailyPoint, DateWindow, TopEntry,
};

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Default)]
struct DayAccumulator {
    page_views: i64,
    visitors: HashSet<String>,
    orders_created: i64,
    orders_completed: i64,
    revenue_cents: i64,
}

/// Rolls an event log up into totals, a zero-filled daily series and top-N
/// breakdowns.
///
/// Events outside `window` (by UTC day) or rejected by `filters` are ignored.
/// Page and referrer rankings count page views, country ranking counts
/// distinct visitors, product ranking counts created orders.
pub fn build_summary(
    events: &[AnalyticsEvent],
    window: &DateWindow,
    filters: &AnalyticsFilters,
    top_n: usize,
) -> AnalyticsSummary {
    let mut days: BTreeMap<NaiveDate, DayAccumulator> = window
        .days()
        .map(|day| (day, DayAccumulator::default()))
        .collect();

    let mut visitors: HashSet<&str> = HashSet::new();
    let mut pages: HashMap<String, i64> = HashMap::new();
    let mut referrers: HashMap<String, i64> = HashMap::new();
    let mut products: HashMap<String, i64> = HashMap::new();
    let mut country_visitors: HashMap<String, HashSet<&str>> = HashMap::new();

    for event in events {
        let day = event.occurred_at.date_naive();
        let Some(bucket) = days.get_mut(&day) else {
            continue;
        };
        if !filters.matches(event) {
            continue;
        }

        visitors.insert(event.session_id.as_str());
        bucket.visitors.insert(event.session_id.clone());

        if let Some(country) = non_blank(&event.country_code) {
            country_visitors
                .entry(country.to_uppercase())
                .or_default()
                .insert(event.session_id.as_str());
        }

        match event.event_type {
            AnalyticsEventType::PageView => {
                bucket.page_views += 1;
                if let Some(path) = non_blank(&event.path) {
                    *pages.entry(path.to_string()).or_default() += 1;
                }
                if let Some(referrer) = non_blank(&event.referrer) {
                    *referrers.entry(referrer.to_string()).or_default() += 1;
                }
            }
            AnalyticsEventType::OrderCreated => {
                bucket.orders_created += 1;
                if let Some(product) = non_blank(&event.product_id) {
                    *products.entry(product.to_string()).or_default() += 1;
                }
            }
            AnalyticsEventType::OrderCompleted => {
                bucket.orders_completed += 1;
                bucket.revenue_cents += event.revenue_cents.unwrap_or(0);
            }
            AnalyticsEventType::OrderView | AnalyticsEventType::CalculatorUsed => {}
        }
    }

    let daily: Vec<DailyPoint> = days
        .into_iter()
        .map(|(date, acc)| DailyPoint {
            date,
            page_views: acc.page_views,
            unique_visitors: acc.visitors.len() as i64,
            orders_created: acc.orders_created,
            orders_completed: acc.orders_completed,
            revenue_cents: acc.revenue_cents,
        })
        .collect();

    let totals = AnalyticsTotals {
        page_views: daily.iter().map(|p| p.page_views).sum(),
        unique_visitors: visitors.len() as i64,
        orders_created: daily.iter().map(|p| p.orders_created).sum(),
        orders_completed: daily.iter().map(|p| p.orders_completed).sum(),
        revenue_cents: daily.iter().map(|p| p.revenue_cents).sum(),
    };

    let countries = country_visitors
        .into_iter()
        .map(|(code, sessions)| (code, sessions.len() as i64))
        .collect();

    AnalyticsSummary {
        totals,
        daily,
        top_pages: rank(pages, top_n),
        top_referrers: rank(referrers, top_n),
        top_countries: rank(countries, top_n),
        top_products: rank(products, top_n),
    }
}

/// Count descending, then label ascending so ties are stable.
pub fn rank(counts: HashMap<String, i64>, top_n: usize) -> Vec<TopEntry> {
    let mut entries: Vec<TopEntry> = counts
        .into_iter()
        .map(|(label, count)| TopEntry { label, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    entries.truncate(top_n);
    entries
}

/// Coerces a received series to exactly one point per window day, ascending.
pub fn normalize_daily(daily: Vec<DailyPoint>, window: &DateWindow) -> Vec<DailyPoint> {
    let mut by_day: BTreeMap<NaiveDate, DailyPoint> = window
        .days()
        .map(|day| (day, DailyPoint::zero(day)))
        .collect();

    for point in daily {
        if let Some(slot) = by_day.get_mut(&point.date) {
            *slot = point;
        }
    }

    by_day.into_values().collect()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
