use std::convert::TryFrom;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{named_params, Connection, Row};
use tracing::warn;

use crate::error::AppResult;
use crate::models::analytics::{AnalyticsEvent, AnalyticsEventType};

#[derive(Debug, Clone)]
pub struct AnalyticsEventRow {
    pub id: i64,
    pub event_type: String,
    pub session_id: String,
    pub path: Option<String>,
    pub referrer: Option<String>,
    pub country_code: Option<String>,
    pub product_id: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub referral_code: Option<String>,
    pub revenue_cents: Option<i64>,
    pub metadata_json: Option<String>,
    pub occurred_at: String,
}

impl AnalyticsEventRow {
    /// Rows with an unknown type or a malformed timestamp are skipped.
    pub fn into_event(self) -> Option<AnalyticsEvent> {
        let event_type = AnalyticsEventType::parse(&self.event_type)?;
        let occurred_at = match DateTime::parse_from_rfc3339(&self.occurred_at) {
            Ok(value) => value.with_timezone(&Utc),
            Err(err) => {
                warn!(target: "app::db", id = self.id, error = %err, "skipping event with bad timestamp");
                return None;
            }
        };
        let metadata = self
            .metadata_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());

        Some(AnalyticsEvent {
            event_type,
            session_id: self.session_id,
            path: self.path,
            referrer: self.referrer,
            country_code: self.country_code,
            product_id: self.product_id,
            utm_source: self.utm_source,
            utm_medium: self.utm_medium,
            utm_campaign: self.utm_campaign,
            referral_code: self.referral_code,
            revenue_cents: self.revenue_cents,
            metadata,
            occurred_at,
        })
    }
}

impl TryFrom<&Row<'_>> for AnalyticsEventRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            event_type: row.get("event_type")?,
            session_id: row.get("session_id")?,
            path: row.get("path")?,
            referrer: row.get("referrer")?,
            country_code: row.get("country_code")?,
            product_id: row.get("product_id")?,
            utm_source: row.get("utm_source")?,
            utm_medium: row.get("utm_medium")?,
            utm_campaign: row.get("utm_campaign")?,
            referral_code: row.get("referral_code")?,
            revenue_cents: row.get("revenue_cents")?,
            metadata_json: row.get("metadata_json")?,
            occurred_at: row.get("occurred_at")?,
        })
    }
}

pub struct AnalyticsEventRepository;

impl AnalyticsEventRepository {
    pub fn insert(conn: &Connection, event: &AnalyticsEvent) -> AppResult<i64> {
        let metadata_json = match &event.metadata {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };

        conn.execute(
            r#"
                INSERT INTO analytics_events (
                    event_type,
                    session_id,
                    path,
                    referrer,
                    country_code,
                    product_id,
                    utm_source,
                    utm_medium,
                    utm_campaign,
                    referral_code,
                    revenue_cents,
                    metadata_json,
                    occurred_at,
                    occurred_day
                ) VALUES (
                    :event_type,
                    :session_id,
                    :path,
                    :referrer,
                    :country_code,
                    :product_id,
                    :utm_source,
                    :utm_medium,
                    :utm_campaign,
                    :referral_code,
                    :revenue_cents,
                    :metadata_json,
                    :occurred_at,
                    :occurred_day
                )
            "#,
            named_params! {
                ":event_type": event.event_type.as_str(),
                ":session_id": &event.session_id,
                ":path": &event.path,
                ":referrer": &event.referrer,
                ":country_code": &event.country_code,
                ":product_id": &event.product_id,
                ":utm_source": &event.utm_source,
                ":utm_medium": &event.utm_medium,
                ":utm_campaign": &event.utm_campaign,
                ":referral_code": &event.referral_code,
                ":revenue_cents": &event.revenue_cents,
                ":metadata_json": &metadata_json,
                ":occurred_at": event.occurred_at.to_rfc3339(),
                ":occurred_day": event.occurred_at.date_naive().to_string(),
            },
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Events whose UTC day falls inside `[from, to]`, oldest first.
    pub fn list_between(
        conn: &Connection,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AnalyticsEventRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                id,
                event_type,
                session_id,
                path,
                referrer,
                country_code,
                product_id,
                utm_source,
                utm_medium,
                utm_campaign,
                referral_code,
                revenue_cents,
                metadata_json,
                occurred_at
            FROM analytics_events
            WHERE occurred_day >= :from AND occurred_day <= :to
            ORDER BY occurred_at ASC, id ASC
            "#,
        )?;

        let rows = stmt
            .query_map(
                named_params! { ":from": from.to_string(), ":to": to.to_string() },
                |row| AnalyticsEventRow::try_from(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn purge_before(conn: &Connection, cutoff: NaiveDate) -> AppResult<usize> {
        let deleted = conn.execute(
            "DELETE FROM analytics_events WHERE occurred_day < ?1",
            [cutoff.to_string()],
        )?;
        Ok(deleted)
    }
}
