pub mod analytics;
pub mod auth;
pub mod checkout;
pub mod orders;
pub mod tracking;
pub mod usage;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{error, info, warn};

use crate::config::StorefrontConfig;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::services::analytics_service::{AnalyticsSource, HttpAnalyticsSource, LocalAnalyticsStore};
use crate::services::api_client::ApiClient;
use crate::services::attribution_service::AttributionService;
use crate::services::auth_service::AuthService;
use crate::services::checkout_service::{CheckoutDispatcher, PaymentGateway};
use crate::services::dashboard::AnalyticsDashboard;
use crate::services::event_reporter::EventReporter;
use crate::services::geo_service::GeoService;
use crate::services::local_state_service::LocalStateService;
use crate::services::order_service::OrderService;
use crate::services::usage_service::UsageService;
use crate::utils::crypto::CryptoVault;

/// Which backend the admin dashboard aggregates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalyticsBackend {
    #[default]
    Remote,
    Local,
}

/// Service container handed to every command. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    config: Arc<StorefrontConfig>,
    db_pool: DbPool,
    local_state: Arc<LocalStateService>,
    attribution_service: Arc<AttributionService>,
    event_reporter: Arc<EventReporter>,
    local_analytics: LocalAnalyticsStore,
    dashboard: Arc<AnalyticsDashboard>,
    usage_service: Arc<UsageService>,
    order_service: Arc<OrderService>,
    checkout_dispatcher: Arc<CheckoutDispatcher>,
    auth_service: Arc<AuthService>,
}

impl AppState {
    /// Wires every service from configuration, keeping the vault master secret
    /// in the OS keyring.
    pub fn new(config: StorefrontConfig) -> AppResult<Self> {
        let db_pool = DbPool::new(config.database_path())?;
        let vault = CryptoVault::from_database_path(db_pool.path())?;
        Self::build(config, db_pool, vault, AnalyticsBackend::Remote, None)
    }

    /// Same wiring with an explicit vault, backend and (optionally) payment gateway.
    pub fn with_parts(
        config: StorefrontConfig,
        vault: CryptoVault,
        backend: AnalyticsBackend,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> AppResult<Self> {
        let db_pool = DbPool::new(config.database_path())?;
        Self::build(config, db_pool, vault, backend, gateway)
    }

    fn build(
        config: StorefrontConfig,
        db_pool: DbPool,
        vault: CryptoVault,
        backend: AnalyticsBackend,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> AppResult<Self> {
        let client = ApiClient::new(&config.api_base_url, config.http_timeout)?;
        let local_state = Arc::new(LocalStateService::new(db_pool.clone(), vault));
        let attribution_service = Arc::new(AttributionService::new(Arc::clone(&local_state)));
        let local_analytics = LocalAnalyticsStore::new(db_pool.clone());

        let geo = Arc::new(GeoService::new(
            Arc::clone(&local_state),
            &config.geo_lookup_url,
            config.http_timeout,
        )?);
        let mut reporter = EventReporter::new(client.clone(), Arc::clone(&local_state)).with_geo(geo);
        if backend == AnalyticsBackend::Local {
            if let Err(err) = local_analytics.purge_expired(Utc::now().date_naive()) {
                warn!(target: "app::state", error = %err, "failed to purge expired analytics events");
            }
            reporter = reporter.with_local_mirror(local_analytics.clone());
        }
        let event_reporter = Arc::new(reporter);

        let source: Arc<dyn AnalyticsSource> = match backend {
            AnalyticsBackend::Remote => Arc::new(HttpAnalyticsSource::new(client.clone())),
            AnalyticsBackend::Local => Arc::new(local_analytics.clone()),
        };
        let dashboard = Arc::new(AnalyticsDashboard::new(source));

        let usage_service = Arc::new(UsageService::new(client.clone(), config.display_tz));
        let order_service = Arc::new(OrderService::new(client.clone(), Arc::clone(&local_state)));
        let checkout_dispatcher = Arc::new(match gateway {
            Some(gateway) => CheckoutDispatcher::new(gateway, Arc::clone(&order_service)),
            None => CheckoutDispatcher::from_config(
                config.stripe.as_ref(),
                config.http_timeout,
                Arc::clone(&order_service),
            ),
        });
        let auth_service = Arc::new(AuthService::new(client, Arc::clone(&local_state)));

        info!(
            target: "app::state",
            api = %config.api_base_url,
            backend = ?backend,
            payments = config.stripe.is_some(),
            "storefront services ready"
        );

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            local_state,
            attribution_service,
            event_reporter,
            local_analytics,
            dashboard,
            usage_service,
            order_service,
            checkout_dispatcher,
            auth_service,
        })
    }

    pub fn config(&self) -> Arc<StorefrontConfig> {
        Arc::clone(&self.config)
    }

    pub fn db(&self) -> DbPool {
        self.db_pool.clone()
    }

    pub fn local_state(&self) -> Arc<LocalStateService> {
        Arc::clone(&self.local_state)
    }

    pub fn attribution(&self) -> Arc<AttributionService> {
        Arc::clone(&self.attribution_service)
    }

    pub fn events(&self) -> Arc<EventReporter> {
        Arc::clone(&self.event_reporter)
    }

    pub fn local_analytics(&self) -> LocalAnalyticsStore {
        self.local_analytics.clone()
    }

    pub fn dashboard(&self) -> Arc<AnalyticsDashboard> {
        Arc::clone(&self.dashboard)
    }

    pub fn usage(&self) -> Arc<UsageService> {
        Arc::clone(&self.usage_service)
    }

    pub fn orders(&self) -> Arc<OrderService> {
        Arc::clone(&self.order_service)
    }

    pub fn checkout(&self) -> Arc<CheckoutDispatcher> {
        Arc::clone(&self.checkout_dispatcher)
    }

    pub fn auth(&self) -> Arc<AuthService> {
        Arc::clone(&self.auth_service)
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// The error shape the UI layer receives.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl CommandError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<JsonValue>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Validation {
                message, details, ..
            } => CommandError::new("VALIDATION_ERROR", message, details),
            AppError::NotFound => CommandError::new("NOT_FOUND", "the requested record does not exist", None),
            AppError::Conflict { message } => CommandError::new("CONFLICT", message, None),
            AppError::Api {
                code,
                message,
                correlation_id,
                details,
            } => {
                let mut merged = JsonMap::new();
                if let Some(existing) = details {
                    match existing {
                        JsonValue::Object(map) => {
                            for (key, value) in map {
                                merged.insert(key, value);
                            }
                        }
                        value => {
                            merged.insert("info".to_string(), value);
                        }
                    }
                }
                if let Some(id) = correlation_id {
                    merged.insert("correlationId".to_string(), JsonValue::String(id));
                }
                let detail_value = if merged.is_empty() {
                    None
                } else {
                    Some(JsonValue::Object(merged))
                };
                CommandError::new(code.as_str(), message, detail_value)
            }
            AppError::Unauthenticated => {
                CommandError::new("UNAUTHENTICATED", "please sign in again", None)
            }
            AppError::CheckoutUnavailable(reason) => {
                warn!(target: "app::command", %reason, "checkout unavailable in command");
                CommandError::new("CHECKOUT_UNAVAILABLE", reason, None)
            }
            AppError::MailDelivery(message) => CommandError::new("MAIL_DELIVERY_FAILED", message, None),
            AppError::Database { message } => {
                error!(target: "app::command", %message, "database error in command");
                CommandError::new("UNKNOWN", message, None)
            }
            AppError::Serialization(error) => {
                error!(target: "app::command", error = %error, "serialization error in command");
                CommandError::new("UNKNOWN", "failed to serialize data", None)
            }
            AppError::Io(error) => {
                error!(target: "app::command", error = %error, "io error in command");
                CommandError::new("UNKNOWN", "file system access failed", None)
            }
            AppError::Other(message) => {
                error!(target: "app::command", %message, "unexpected error in command");
                CommandError::new("UNKNOWN", message, None)
            }
        }
    }
}

/// Runs SQLite-bound work off the async executor.
pub(crate) async fn run_blocking<T: Send + 'static>(
    task: impl FnOnce() -> Result<T, AppError> + Send + 'static,
) -> CommandResult<T> {
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| CommandError::new("UNKNOWN", format!("background task failed: {err}"), None))?
        .map_err(CommandError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorCode;

    #[test]
    fn api_errors_carry_correlation_id_into_details() {
        let err = AppError::api_with_details(
            ApiErrorCode::RateLimited,
            "too many requests",
            Some("corr-9"),
            Some(serde_json::json!({ "status": 429 })),
        );
        let command: CommandError = err.into();
        assert_eq!(command.code, "RATE_LIMITED");
        let details = command.details.unwrap();
        assert_eq!(details["correlationId"], "corr-9");
        assert_eq!(details["status"], 429);
    }

    #[test]
    fn validation_errors_keep_details() {
        let err = AppError::validation_with_details("bad", serde_json::json!({ "fields": {} }));
        let command = CommandError::from(err);
        assert_eq!(command.code, "VALIDATION_ERROR");
        assert!(command.details.is_some());
    }
}
