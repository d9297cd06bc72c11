use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Relative ranges offered by the admin dashboard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnalyticsRangeKey {
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
    #[serde(rename = "90d")]
    NinetyDays,
    #[serde(rename = "365d")]
    Year,
}

impl AnalyticsRangeKey {
    pub const ALL: [AnalyticsRangeKey; 4] = [
        AnalyticsRangeKey::SevenDays,
        AnalyticsRangeKey::ThirtyDays,
        AnalyticsRangeKey::NinetyDays,
        AnalyticsRangeKey::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsRangeKey::SevenDays => "7d",
            AnalyticsRangeKey::ThirtyDays => "30d",
            AnalyticsRangeKey::NinetyDays => "90d",
            AnalyticsRangeKey::Year => "365d",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            AnalyticsRangeKey::SevenDays => 7,
            AnalyticsRangeKey::ThirtyDays => 30,
            AnalyticsRangeKey::NinetyDays => 90,
            AnalyticsRangeKey::Year => 365,
        }
    }

    /// Inclusive calendar-day window ending on `today`.
    pub fn window_ending(&self, today: NaiveDate) -> DateWindow {
        DateWindow {
            from: today - Duration::days(self.days() - 1),
            to: today,
        }
    }
}

impl Default for AnalyticsRangeKey {
    fn default() -> Self {
        AnalyticsRangeKey::ThirtyDays
    }
}

/// Inclusive on both ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.from && day <= self.to
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let to = self.to;
        self.from.iter_days().take_while(move |day| *day <= to)
    }

    pub fn len_days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }
}

/// Four independent categorical filters; `None` means "no filter".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsFilters {
    #[serde(default)]
    pub utm_source: Option<String>,
    #[serde(default)]
    pub utm_campaign: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
}

impl AnalyticsFilters {
    /// Blank strings collapse to `None` so "all" selections never reach the wire.
    pub fn normalized(self) -> Self {
        Self {
            utm_source: normalize_filter(self.utm_source),
            utm_campaign: normalize_filter(self.utm_campaign),
            referral_code: normalize_filter(self.referral_code),
            product_id: normalize_filter(self.product_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.utm_source.is_none()
            && self.utm_campaign.is_none()
            && self.referral_code.is_none()
            && self.product_id.is_none()
    }

    /// Query parameters for `GET /api/analytics/summary`, active filters only.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(value) = &self.utm_source {
            pairs.push(("utm_source", value.clone()));
        }
        if let Some(value) = &self.utm_campaign {
            pairs.push(("utm_campaign", value.clone()));
        }
        if let Some(value) = &self.referral_code {
            pairs.push(("referral_code", value.clone()));
        }
        if let Some(value) = &self.product_id {
            pairs.push(("product_id", value.clone()));
        }
        pairs
    }

    pub fn matches(&self, event: &AnalyticsEvent) -> bool {
        filter_matches(&self.utm_source, &event.utm_source)
            && filter_matches(&self.utm_campaign, &event.utm_campaign)
            && filter_matches(&self.referral_code, &event.referral_code)
            && filter_matches(&self.product_id, &event.product_id)
    }
}

fn normalize_filter(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn filter_matches(filter: &Option<String>, value: &Option<String>) -> bool {
    match filter {
        None => true,
        Some(expected) => value
            .as_deref()
            .map(|actual| actual.eq_ignore_ascii_case(expected))
            .unwrap_or(false),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    PageView,
    OrderView,
    OrderCreated,
    OrderCompleted,
    CalculatorUsed,
}

impl AnalyticsEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsEventType::PageView => "page_view",
            AnalyticsEventType::OrderView => "order_view",
            AnalyticsEventType::OrderCreated => "order_created",
            AnalyticsEventType::OrderCompleted => "order_completed",
            AnalyticsEventType::CalculatorUsed => "calculator_used",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "page_view" => Some(AnalyticsEventType::PageView),
            "order_view" => Some(AnalyticsEventType::OrderView),
            "order_created" => Some(AnalyticsEventType::OrderCreated),
            "order_completed" => Some(AnalyticsEventType::OrderCompleted),
            "calculator_used" => Some(AnalyticsEventType::CalculatorUsed),
            _ => None,
        }
    }
}

/// One tracked interaction, as posted to `POST /api/analytics/event`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub event_type: AnalyticsEventType,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(event_type: AnalyticsEventType, session_id: impl Into<String>) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            path: None,
            referrer: None,
            country_code: None,
            product_id: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            referral_code: None,
            revenue_cents: None,
            metadata: None,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsTotals {
    #[serde(default)]
    pub page_views: i64,
    #[serde(default)]
    pub unique_visitors: i64,
    #[serde(default)]
    pub orders_created: i64,
    #[serde(default)]
    pub orders_completed: i64,
    #[serde(default)]
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub date: NaiveDate,
    #[serde(default)]
    pub page_views: i64,
    #[serde(default)]
    pub unique_visitors: i64,
    #[serde(default)]
    pub orders_created: i64,
    #[serde(default)]
    pub orders_completed: i64,
    #[serde(default)]
    pub revenue_cents: i64,
}

impl DailyPoint {
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            page_views: 0,
            unique_visitors: 0,
            orders_created: 0,
            orders_completed: 0,
            revenue_cents: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopEntry {
    pub label: String,
    pub count: i64,
}

/// Read-only rollup returned by `GET /api/analytics/summary`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    #[serde(default)]
    pub totals: AnalyticsTotals,
    #[serde(default)]
    pub daily: Vec<DailyPoint>,
    #[serde(default)]
    pub top_pages: Vec<TopEntry>,
    #[serde(default)]
    pub top_referrers: Vec<TopEntry>,
    #[serde(default)]
    pub top_countries: Vec<TopEntry>,
    #[serde(default)]
    pub top_products: Vec<TopEntry>,
}

impl AnalyticsSummary {
    /// All-zero summary with one point per day of `window`.
    pub fn zeroed(window: &DateWindow) -> Self {
        Self {
            daily: window.days().map(DailyPoint::zero).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub window: DateWindow,
    #[serde(default)]
    pub filters: AnalyticsFilters,
}

/// What the dashboard hands to the view layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub range: AnalyticsRangeKey,
    pub window: DateWindow,
    pub filters: AnalyticsFilters,
    pub summary: AnalyticsSummary,
    pub loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub applied_token: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_ending_is_inclusive_for_every_range() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        for range in AnalyticsRangeKey::ALL {
            let window = range.window_ending(today);
            assert_eq!(window.to, today);
            assert_eq!(window.from, today - Duration::days(range.days() - 1));
            assert_eq!(window.len_days(), range.days());
            assert_eq!(window.days().count() as i64, range.days());
        }
    }

    #[test]
    fn filters_normalize_blank_and_all_to_none() {
        let filters = AnalyticsFilters {
            utm_source: Some("  ".into()),
            utm_campaign: Some("All".into()),
            referral_code: Some(" LUNA10 ".into()),
            product_id: None,
        }
        .normalized();

        assert_eq!(filters.utm_source, None);
        assert_eq!(filters.utm_campaign, None);
        assert_eq!(filters.referral_code.as_deref(), Some("LUNA10"));
        assert_eq!(
            filters.query_pairs(),
            vec![("referral_code", "LUNA10".to_string())]
        );
    }

    #[test]
    fn range_key_serializes_as_short_label() {
        let json = serde_json::to_string(&AnalyticsRangeKey::Year).unwrap();
        assert_eq!(json, "\"365d\"");
    }
}
