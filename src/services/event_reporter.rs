use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::analytics::{AnalyticsEvent, AnalyticsEventType};
use crate::models::usage::ZodiacSign;
use crate::services::analytics_service::LocalAnalyticsStore;
use crate::services::api_client::ApiClient;
use crate::services::geo_service::GeoService;
use crate::services::local_state_service::LocalStateService;

/// Per-call event details; everything visitor-scoped is filled in by the reporter.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub path: Option<String>,
    pub referrer: Option<String>,
    pub product_id: Option<String>,
    pub revenue_cents: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

/// Posts tagged events to the collection endpoint. Reporting never fails the
/// caller: errors are logged and the event is dropped.
pub struct EventReporter {
    client: ApiClient,
    state: Arc<LocalStateService>,
    geo: Option<Arc<GeoService>>,
    mirror: Option<LocalAnalyticsStore>,
}

impl EventReporter {
    pub fn new(client: ApiClient, state: Arc<LocalStateService>) -> Self {
        Self {
            client,
            state,
            geo: None,
            mirror: None,
        }
    }

    pub fn with_geo(mut self, geo: Arc<GeoService>) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Also appends every event to the local log so the local source can aggregate it.
    pub fn with_local_mirror(mut self, store: LocalAnalyticsStore) -> Self {
        self.mirror = Some(store);
        self
    }

    /// Returns whether the remote endpoint accepted the event.
    pub async fn track(&self, event_type: AnalyticsEventType, context: EventContext) -> bool {
        let event = match self.build_event(event_type, context).await {
            Ok(event) => event,
            Err(err) => {
                warn!(target: "app::events", event_type = event_type.as_str(), error = %err, "failed to build analytics event");
                return false;
            }
        };

        if let Some(store) = &self.mirror {
            let store = store.clone();
            let mirrored = event.clone();
            let outcome = tokio::task::spawn_blocking(move || store.record(&mirrored))
                .await
                .map_err(|err| AppError::other(format!("analytics mirror task failed: {err}")))
                .and_then(|result| result);
            if let Err(err) = outcome {
                warn!(target: "app::events", error = %err, "failed to mirror analytics event locally");
            }
        }

        match self.client.post_event(&event).await {
            Ok(()) => {
                debug!(target: "app::events", event_type = event_type.as_str(), "analytics event reported");
                true
            }
            Err(err) => {
                warn!(
                    target: "app::events",
                    event_type = event_type.as_str(),
                    correlation_id = err.correlation_id().unwrap_or("-"),
                    error = %err,
                    "analytics event dropped"
                );
                false
            }
        }
    }

    pub async fn page_view(&self, path: &str, referrer: Option<&str>) -> bool {
        self.track(
            AnalyticsEventType::PageView,
            EventContext {
                path: Some(path.to_string()),
                referrer: referrer.map(str::to_string),
                ..EventContext::default()
            },
        )
        .await
    }

    pub async fn order_view(&self, order_id: &str, product_id: Option<&str>) -> bool {
        self.track(
            AnalyticsEventType::OrderView,
            EventContext {
                product_id: product_id.map(str::to_string),
                metadata: Some(json!({ "orderId": order_id })),
                ..EventContext::default()
            },
        )
        .await
    }

    pub async fn order_created(&self, order_id: &str, product_id: &str, amount_cents: i64) -> bool {
        self.track(
            AnalyticsEventType::OrderCreated,
            EventContext {
                product_id: Some(product_id.to_string()),
                metadata: Some(json!({ "orderId": order_id, "amountCents": amount_cents })),
                ..EventContext::default()
            },
        )
        .await
    }

    pub async fn order_completed(&self, order_id: &str, product_id: &str, revenue_cents: i64) -> bool {
        self.track(
            AnalyticsEventType::OrderCompleted,
            EventContext {
                product_id: Some(product_id.to_string()),
                revenue_cents: Some(revenue_cents),
                metadata: Some(json!({ "orderId": order_id })),
                ..EventContext::default()
            },
        )
        .await
    }

    pub async fn calculator_used(&self, sign_a: ZodiacSign, sign_b: ZodiacSign, score: u8) -> bool {
        self.track(
            AnalyticsEventType::CalculatorUsed,
            EventContext {
                metadata: Some(json!({
                    "signA": sign_a.as_str(),
                    "signB": sign_b.as_str(),
                    "score": score,
                })),
                ..EventContext::default()
            },
        )
        .await
    }

    async fn build_event(&self, event_type: AnalyticsEventType, context: EventContext) -> AppResult<AnalyticsEvent> {
        let (session_id, attribution) = self
            .state
            .run_blocking(|state| Ok((state.session_id()?, state.attribution()?)))
            .await?;

        let mut event = AnalyticsEvent::new(event_type, session_id);
        event.path = context.path;
        event.referrer = context.referrer.filter(|value| !value.trim().is_empty());
        event.product_id = context.product_id;
        event.revenue_cents = context.revenue_cents;
        event.metadata = context.metadata;

        if let Some(attribution) = attribution {
            event.utm_source = attribution.utm_source;
            event.utm_medium = attribution.utm_medium;
            event.utm_campaign = attribution.utm_campaign;
            event.referral_code = attribution.referral_code;
        }

        if let Some(geo) = &self.geo {
            event.country_code = geo.country().await.map(|country| country.code);
        }

        Ok(event)
    }
}
