use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult};
use crate::models::notification::{LoginNotification, OrderNotification, OutgoingEmail};
use crate::utils::redact::{mask_email, redact_sensitive_data};

use super::templates::{login_alert, order_admin_alert, order_confirmation, RenderedEmail};
use super::FunctionsState;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const ALLOWED_METHODS: &str = "POST, OPTIONS";

/// Explicit answer to the CORS preflight on both function paths.
pub async fn preflight() -> Response {
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
            (ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
        "ok",
    )
        .into_response()
}

pub async fn login_notification(
    State(state): State<FunctionsState>,
    payload: Result<Json<JsonValue>, JsonRejection>,
) -> Response {
    respond("login-notification", handle_login(&state, payload).await)
}

pub async fn order_notification(
    State(state): State<FunctionsState>,
    payload: Result<Json<JsonValue>, JsonRejection>,
) -> Response {
    respond("order-notification", handle_order(&state, payload).await)
}

async fn handle_login(
    state: &FunctionsState,
    payload: Result<Json<JsonValue>, JsonRejection>,
) -> AppResult<JsonValue> {
    let notification: LoginNotification = decode(payload)?;
    if !EMAIL_PATTERN.is_match(notification.email.trim()) {
        return Err(AppError::validation("email is not valid"));
    }
    if notification.login_time.trim().is_empty() {
        return Err(AppError::validation("loginTime is required"));
    }

    let rendered = login_alert(&notification);
    let result = deliver(state, vec![notification.email.trim().to_string()], rendered).await?;
    info!(target: "app::notify", email = %mask_email(&notification.email), "login alert sent");
    Ok(result)
}

async fn handle_order(
    state: &FunctionsState,
    payload: Result<Json<JsonValue>, JsonRejection>,
) -> AppResult<JsonValue> {
    let order: OrderNotification = decode(payload)?;
    if order.customer_name.trim().is_empty() {
        return Err(AppError::validation("customerName is required"));
    }
    if !EMAIL_PATTERN.is_match(order.customer_email.trim()) {
        return Err(AppError::validation("customerEmail is not valid"));
    }
    if order.product_name.trim().is_empty() {
        return Err(AppError::validation("productName is required"));
    }
    if order.final_price_cents < 0 {
        return Err(AppError::validation("finalPriceCents cannot be negative"));
    }

    let confirmation = deliver(
        state,
        vec![order.customer_email.trim().to_string()],
        order_confirmation(&order),
    )
    .await?;

    if let Some(admin) = &state.admin_email {
        let alert = deliver(state, vec![admin.clone()], order_admin_alert(&order)).await?;
        debug!(target: "app::notify", provider = %alert, "admin order alert sent");
    }

    info!(
        target: "app::notify",
        order_id = order.order_id.as_deref().unwrap_or("-"),
        customer = %mask_email(&order.customer_email),
        "order confirmation sent"
    );
    Ok(confirmation)
}

fn decode<T: serde::de::DeserializeOwned>(payload: Result<Json<JsonValue>, JsonRejection>) -> AppResult<T> {
    let Json(raw) = payload.map_err(|rejection| AppError::validation(rejection.body_text()))?;
    debug!(target: "app::notify", payload = %redact_sensitive_data(&raw), "notification payload received");
    serde_json::from_value(raw).map_err(|err| AppError::validation(format!("invalid payload: {err}")))
}

async fn deliver(state: &FunctionsState, to: Vec<String>, rendered: RenderedEmail) -> AppResult<JsonValue> {
    let mailer = state
        .mailer
        .as_ref()
        .ok_or_else(|| AppError::mail_delivery("mail provider is not configured"))?;

    let email = OutgoingEmail {
        from: state.from.clone(),
        to,
        subject: rendered.subject,
        html: rendered.html,
    };
    mailer.send(&email).await
}

/// `200` with the provider payload, otherwise `500` with `{"error": message}`.
fn respond(function: &'static str, result: AppResult<JsonValue>) -> Response {
    match result {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(err) => {
            let message = match &err {
                AppError::Validation { message, .. } => message.clone(),
                AppError::MailDelivery(message) => message.clone(),
                other => other.to_string(),
            };
            error!(target: "app::notify", function, error = %err, "notification function failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response()
        }
    }
}
