use std::time::{Duration as StdDuration, Instant};

use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ApiErrorCode, AppError, AppResult};
use crate::models::analytics::{AnalyticsEvent, AnalyticsQuery, AnalyticsSummary};
use crate::models::auth::{LoginRequest, LoginResponse, SessionInfo};
use crate::models::catalog::{Product, Referral};
use crate::models::order::{OrderCreateInput, OrderListParams, OrderRecord, OrderStatusUpdate};
use crate::models::usage::{CalculatorUsage, UsageCreateInput};

/// Typed client for the storefront REST API. Every call is a single attempt;
/// callers decide how to degrade.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: StdDuration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Some(StdDuration::from_secs(90)))
            .build()
            .map_err(|err| AppError::other(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn post_event(&self, event: &AnalyticsEvent) -> AppResult<()> {
        self.send_without_body(Method::POST, "/api/analytics/event", Some(event), None)
            .await
    }

    pub async fn fetch_summary(&self, query: &AnalyticsQuery) -> AppResult<AnalyticsSummary> {
        let mut params = vec![
            ("from", query.window.from.to_string()),
            ("to", query.window.to.to_string()),
        ];
        params.extend(query.filters.query_pairs());

        let request = self
            .request(Method::GET, "/api/analytics/summary", None)
            .query(&params);
        self.execute_json(request, "analytics.summary").await
    }

    pub async fn create_order(&self, input: &OrderCreateInput) -> AppResult<OrderRecord> {
        let request = self.request(Method::POST, "/api/orders", None).json(input);
        self.execute_json(request, "orders.create").await
    }

    pub async fn list_orders(&self, params: &OrderListParams, token: &str) -> AppResult<Vec<OrderRecord>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(status) = params.status {
            query.push(("status", status.as_str().to_string()));
        }
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }

        let request = self
            .request(Method::GET, "/api/orders", Some(token))
            .query(&query);
        self.execute_json(request, "orders.list").await
    }

    pub async fn get_order(&self, id: &str, token: &str) -> AppResult<OrderRecord> {
        let request = self
            .request(Method::GET, "/api/orders", Some(token))
            .query(&[("id", id)]);
        self.execute_json(request, "orders.get").await
    }

    pub async fn update_order(&self, update: &OrderStatusUpdate, token: &str) -> AppResult<OrderRecord> {
        let request = self
            .request(Method::PATCH, "/api/orders", Some(token))
            .json(update);
        self.execute_json(request, "orders.update").await
    }

    pub async fn list_usage(&self, token: &str) -> AppResult<Vec<CalculatorUsage>> {
        let request = self.request(Method::GET, "/api/usage", Some(token));
        self.execute_json(request, "usage.list").await
    }

    pub async fn record_usage(&self, input: &UsageCreateInput) -> AppResult<CalculatorUsage> {
        let request = self.request(Method::POST, "/api/usage", None).json(input);
        self.execute_json(request, "usage.record").await
    }

    pub async fn login(&self, credentials: &LoginRequest) -> AppResult<LoginResponse> {
        let request = self
            .request(Method::POST, "/api/auth/login", None)
            .json(credentials);
        self.execute_json(request, "auth.login").await
    }

    pub async fn session(&self, token: &str) -> AppResult<SessionInfo> {
        let request = self.request(Method::GET, "/api/auth/session", Some(token));
        self.execute_json(request, "auth.session").await
    }

    /// `Ok(None)` when the code does not exist. The code travels as a single
    /// encoded path segment.
    pub async fn get_referral(&self, code: &str) -> AppResult<Option<Referral>> {
        let url = self.url_with_segments(&["api", "referrals", code.trim()])?;
        let request = self.client.request(Method::GET, url);
        match self.execute_json(request, "referrals.get").await {
            Ok(referral) => Ok(Some(referral)),
            Err(err) if err.api_code() == Some(ApiErrorCode::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn list_products(&self) -> AppResult<Vec<Product>> {
        let request = self.request(Method::GET, "/api/products", None);
        self.execute_json(request, "products.list").await
    }

    fn url_with_segments(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| AppError::other(format!("invalid api base url {}: {err}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::other(format!("api base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_without_body<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        token: Option<&str>,
    ) -> AppResult<()> {
        let mut request = self.request(method, path, token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let correlation_id = Uuid::new_v4().to_string();
        let response = request
            .send()
            .await
            .map_err(|err| error_from_reqwest(err, &correlation_id))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_http_error(status, &correlation_id, &body))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> AppResult<T> {
        let correlation_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        debug!(
            target: "app::api",
            operation,
            correlation_id = %correlation_id,
            "calling storefront api"
        );

        let response = request
            .send()
            .await
            .map_err(|err| error_from_reqwest(err, &correlation_id))?;

        let status = response.status();
        let latency_ms = start.elapsed().as_millis();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target: "app::api",
                operation,
                correlation_id = %correlation_id,
                status = status.as_u16(),
                latency_ms,
                "storefront api returned an error status"
            );
            return Err(map_http_error(status, &correlation_id, &body));
        }

        debug!(
            target: "app::api",
            operation,
            correlation_id = %correlation_id,
            latency_ms,
            "storefront api responded"
        );

        response.json::<T>().await.map_err(|err| {
            AppError::api_with_details(
                ApiErrorCode::InvalidResponse,
                format!("{operation} returned an unexpected body"),
                Some(correlation_id.as_str()),
                Some(json!({ "reason": err.to_string() })),
            )
        })
    }
}

/// Maps a non-success status to an error, surfacing `{"error": "..."}` bodies.
pub(crate) fn map_http_error(status: StatusCode, correlation_id: &str, body: &str) -> AppError {
    let remote_message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .or_else(|| value.get("message"))
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
        });

    let (code, fallback) = match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            (ApiErrorCode::InvalidRequest, "request rejected by the server")
        }
        StatusCode::UNAUTHORIZED => (ApiErrorCode::Unauthorized, "authentication required"),
        StatusCode::FORBIDDEN => (ApiErrorCode::Forbidden, "access denied"),
        StatusCode::NOT_FOUND => (ApiErrorCode::NotFound, "resource not found"),
        StatusCode::TOO_MANY_REQUESTS => (ApiErrorCode::RateLimited, "too many requests"),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            (ApiErrorCode::HttpTimeout, "upstream timed out")
        }
        status if status.is_server_error() => (ApiErrorCode::Unavailable, "service unavailable"),
        _ => (ApiErrorCode::Unknown, "unexpected response status"),
    };

    AppError::api_with_details(
        code,
        remote_message.unwrap_or_else(|| fallback.to_string()),
        Some(correlation_id),
        Some(json!({ "status": status.as_u16() })),
    )
}

pub(crate) fn error_from_reqwest(err: reqwest::Error, correlation_id: &str) -> AppError {
    if err.is_timeout() {
        AppError::api_with_details(
            ApiErrorCode::HttpTimeout,
            "request timed out",
            Some(correlation_id),
            None,
        )
    } else if err.is_connect() {
        AppError::api_with_details(
            ApiErrorCode::Unavailable,
            "could not connect to the server",
            Some(correlation_id),
            None,
        )
    } else if let Some(status) = err.status() {
        map_http_error(status, correlation_id, "")
    } else {
        AppError::api_with_details(
            ApiErrorCode::Unknown,
            format!("request failed: {err}"),
            Some(correlation_id),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_errors_map_to_codes_and_keep_remote_message() {
        let err = map_http_error(StatusCode::UNAUTHORIZED, "c-1", "");
        assert_eq!(err.api_code(), Some(ApiErrorCode::Unauthorized));
        assert!(err.is_auth_failure());
        assert_eq!(err.correlation_id(), Some("c-1"));

        let err = map_http_error(StatusCode::BAD_REQUEST, "c-2", r#"{"error":"email required"}"#);
        assert_eq!(err.api_code(), Some(ApiErrorCode::InvalidRequest));
        assert_eq!(err.to_string(), "email required");

        let err = map_http_error(StatusCode::BAD_GATEWAY, "c-3", "<html>");
        assert_eq!(err.api_code(), Some(ApiErrorCode::Unavailable));
        assert_eq!(err.to_string(), "service unavailable");
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        let client = ApiClient::new("https://api.astral.test/", StdDuration::from_secs(1)).unwrap();
        let url = client
            .url_with_segments(&["api", "referrals", "LUNA10#FORGED?x=1"])
            .unwrap();
        assert_eq!(url.path(), "/api/referrals/LUNA10%23FORGED%3Fx=1");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        let url = client.url_with_segments(&["api", "referrals", "a/b"]).unwrap();
        assert_eq!(url.path(), "/api/referrals/a%2Fb");
    }
}
