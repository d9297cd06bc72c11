use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::usage::{
    CalculatorUsage, SignPairCount, UsageCreateInput, UsageDailyPoint, UsageRange, UsageStats,
    ZodiacSign,
};
use crate::services::api_client::ApiClient;
use crate::services::compatibility::compatibility_score;

const POPULAR_PAIRS_LIMIT: usize = 10;
const RECENT_LIMIT: usize = 20;

/// Inclusive day window in the display timezone. `start` is `None` for `all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageWindow {
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
}

impl UsageWindow {
    pub fn resolve(range: UsageRange, today: NaiveDate) -> AppResult<Self> {
        match range {
            UsageRange::All => Ok(Self { start: None, end: today }),
            UsageRange::Custom { from, to } => {
                if from > to {
                    return Err(AppError::validation(format!(
                        "custom range starts after it ends ({from} > {to})"
                    )));
                }
                Ok(Self { start: Some(from), end: to })
            }
            preset => {
                let days = preset.preset_days().unwrap_or(30);
                Ok(Self {
                    start: Some(today - Duration::days(days - 1)),
                    end: today,
                })
            }
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start.map_or(true, |start| day >= start) && day <= self.end
    }

    /// Instant check against [`UsageWindow::bounds`] in the display timezone.
    pub fn contains_instant(&self, at: DateTime<Utc>, tz: Tz) -> bool {
        let (start, end) = self.bounds(tz);
        start.map_or(true, |start| at >= start) && at <= end
    }

    /// Instant bounds: local midnight of `start`, last instant of `end`.
    pub fn bounds(&self, tz: Tz) -> (Option<DateTime<Utc>>, DateTime<Utc>) {
        let start = self.start.map(|day| local_instant(tz, day, NaiveTime::MIN));
        let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
        (start, local_instant(tz, self.end, end_of_day))
    }
}

fn local_instant(tz: Tz, day: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = day.and_time(time);
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Skipped by a DST gap; the UTC reading is the closest defined instant.
        None => Utc.from_utc_datetime(&naive),
    }
}

pub fn local_day(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// One point per distinct local day, oldest first.
pub fn group_by_day(usages: &[CalculatorUsage], tz: Tz) -> Vec<UsageDailyPoint> {
    let mut counts: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for usage in usages {
        *counts.entry(local_day(usage.created_at, tz)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(date, count)| UsageDailyPoint { date, count })
        .collect()
}

/// Keeps points inside the window. An empty result becomes a single zero
/// point at the window end so charts always have a baseline.
pub fn filter_to_window(points: &[UsageDailyPoint], window: &UsageWindow) -> Vec<UsageDailyPoint> {
    let filtered: Vec<UsageDailyPoint> = points
        .iter()
        .filter(|point| window.contains(point.date))
        .cloned()
        .collect();

    if filtered.is_empty() {
        vec![UsageDailyPoint {
            date: window.end,
            count: 0,
        }]
    } else {
        filtered
    }
}

/// Pairs are unordered: leo/aries and aries/leo count together.
pub fn popular_pairs<'a, I>(usages: I, limit: usize) -> Vec<SignPairCount>
where
    I: IntoIterator<Item = &'a CalculatorUsage>,
{
    let mut counts: HashMap<(ZodiacSign, ZodiacSign), i64> = HashMap::new();
    for usage in usages {
        let key = if usage.sign_a <= usage.sign_b {
            (usage.sign_a, usage.sign_b)
        } else {
            (usage.sign_b, usage.sign_a)
        };
        *counts.entry(key).or_default() += 1;
    }

    let mut pairs: Vec<SignPairCount> = counts
        .into_iter()
        .map(|((sign_a, sign_b), count)| SignPairCount { sign_a, sign_b, count })
        .collect();
    pairs.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| (a.sign_a, a.sign_b).cmp(&(b.sign_a, b.sign_b)))
    });
    pairs.truncate(limit);
    pairs
}

pub fn compute_stats(
    usages: &[CalculatorUsage],
    range: UsageRange,
    today: NaiveDate,
    tz: Tz,
) -> AppResult<UsageStats> {
    let window = UsageWindow::resolve(range, today)?;
    let in_window: Vec<&CalculatorUsage> = usages
        .iter()
        .filter(|usage| window.contains_instant(usage.created_at, tz))
        .collect();

    let chart = filter_to_window(&group_by_day(usages, tz), &window);
    let mut daily = chart.clone();
    daily.sort_by(|a, b| b.date.cmp(&a.date));

    let mut recent: Vec<CalculatorUsage> = in_window.iter().map(|usage| (*usage).clone()).collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(RECENT_LIMIT);

    Ok(UsageStats {
        range,
        window_start: window.start,
        window_end: window.end,
        total: in_window.len() as i64,
        daily,
        chart,
        popular_pairs: popular_pairs(in_window.iter().copied(), POPULAR_PAIRS_LIMIT),
        recent,
    })
}

/// Calculator usage: recording runs and the admin history view.
pub struct UsageService {
    client: ApiClient,
    tz: Tz,
}

impl UsageService {
    pub fn new(client: ApiClient, tz: Tz) -> Self {
        Self { client, tz }
    }

    pub fn today(&self) -> NaiveDate {
        local_day(Utc::now(), self.tz)
    }

    pub async fn record(&self, sign_a: ZodiacSign, sign_b: ZodiacSign) -> AppResult<CalculatorUsage> {
        let input = UsageCreateInput {
            sign_a,
            sign_b,
            score: compatibility_score(sign_a, sign_b),
        };
        self.client.record_usage(&input).await
    }

    pub async fn stats(&self, range: UsageRange, token: &str) -> AppResult<UsageStats> {
        let usages = self.client.list_usage(token).await?;
        debug!(target: "app::usage", count = usages.len(), "fetched calculator usage");
        compute_stats(&usages, range, self.today(), self.tz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn usage(id: &str, at: DateTime<Utc>, a: ZodiacSign, b: ZodiacSign) -> CalculatorUsage {
        CalculatorUsage {
            id: id.to_string(),
            sign_a: a,
            sign_b: b,
            score: compatibility_score(a, b),
            created_at: at,
        }
    }

    fn sample() -> Vec<CalculatorUsage> {
        vec![
            usage("1", Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(), ZodiacSign::Leo, ZodiacSign::Aries),
            usage("2", Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap(), ZodiacSign::Aries, ZodiacSign::Leo),
            usage("3", Utc.with_ymd_and_hms(2024, 1, 3, 7, 30, 0).unwrap(), ZodiacSign::Virgo, ZodiacSign::Pisces),
        ]
    }

    #[test]
    fn groups_one_point_per_day() {
        let points = group_by_day(&sample(), Tz::UTC);
        assert_eq!(
            points,
            vec![
                UsageDailyPoint { date: date(2024, 1, 1), count: 2 },
                UsageDailyPoint { date: date(2024, 1, 3), count: 1 },
            ]
        );
        assert_eq!(points.iter().map(|p| p.count).sum::<i64>(), 3);
    }

    #[test]
    fn grouping_follows_display_timezone() {
        // 2024-01-03 07:30 UTC is still 2024-01-02 in Los Angeles.
        let points = group_by_day(&sample(), chrono_tz::America::Los_Angeles);
        assert_eq!(points[1].date, date(2024, 1, 2));
    }

    #[test]
    fn week_window_keeps_both_days() {
        let stats = compute_stats(&sample(), UsageRange::Week, date(2024, 1, 5), Tz::UTC).unwrap();
        assert_eq!(stats.chart.len(), 2);
        assert_eq!(stats.chart.iter().map(|p| p.count).sum::<i64>(), 3);
        assert_eq!(stats.chart[0].date, date(2024, 1, 1));
        assert_eq!(stats.daily[0].date, date(2024, 1, 3));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.popular_pairs[0].count, 2);
        assert_eq!(stats.popular_pairs[0].sign_a, ZodiacSign::Aries);
        assert_eq!(stats.recent[0].id, "3");
    }

    #[test]
    fn empty_window_synthesizes_one_zero_point_at_end() {
        let stats = compute_stats(&sample(), UsageRange::Week, date(2024, 3, 1), Tz::UTC).unwrap();
        assert_eq!(stats.chart, vec![UsageDailyPoint { date: date(2024, 3, 1), count: 0 }]);
        assert_eq!(stats.total, 0);

        let stats = compute_stats(&[], UsageRange::All, date(2024, 3, 1), Tz::UTC).unwrap();
        assert_eq!(stats.chart, vec![UsageDailyPoint { date: date(2024, 3, 1), count: 0 }]);

        let custom = UsageRange::Custom { from: date(2023, 5, 1), to: date(2023, 5, 9) };
        let stats = compute_stats(&sample(), custom, date(2024, 3, 1), Tz::UTC).unwrap();
        assert_eq!(stats.chart, vec![UsageDailyPoint { date: date(2023, 5, 9), count: 0 }]);
    }

    #[test]
    fn reversed_custom_range_is_rejected() {
        let custom = UsageRange::Custom { from: date(2024, 2, 1), to: date(2024, 1, 1) };
        assert!(compute_stats(&sample(), custom, date(2024, 3, 1), Tz::UTC).is_err());
    }

    #[test]
    fn bounds_start_at_local_midnight() {
        let window = UsageWindow::resolve(UsageRange::Week, date(2024, 1, 7)).unwrap();
        let (start, end) = window.bounds(chrono_tz::Europe::Berlin);
        assert_eq!(start.unwrap(), Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap());
        assert_eq!(end.date_naive(), date(2024, 1, 7));
    }

    #[test]
    fn custom_range_counts_by_local_day_bounds() {
        let tz = chrono_tz::Europe::London;
        // 23:30 UTC on the 2nd is already 00:30 on the 3rd in London (BST).
        let late = vec![usage(
            "late",
            Utc.with_ymd_and_hms(2024, 6, 2, 23, 30, 0).unwrap(),
            ZodiacSign::Leo,
            ZodiacSign::Libra,
        )];

        let first_two = UsageRange::Custom { from: date(2024, 6, 1), to: date(2024, 6, 2) };
        let stats = compute_stats(&late, first_two, date(2024, 6, 10), tz).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.chart, vec![UsageDailyPoint { date: date(2024, 6, 2), count: 0 }]);

        let third = UsageRange::Custom { from: date(2024, 6, 3), to: date(2024, 6, 3) };
        let stats = compute_stats(&late, third, date(2024, 6, 10), tz).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.chart, vec![UsageDailyPoint { date: date(2024, 6, 3), count: 1 }]);
    }
}
