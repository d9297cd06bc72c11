use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::MailConfig;
use crate::error::{AppError, AppResult};
use crate::models::notification::OutgoingEmail;
use crate::utils::redact::mask_email;

/// Transactional mail delivery. Returns the provider's response body.
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> AppResult<JsonValue>;
}

/// Mail provider reached over `POST {base}/emails` with a bearer API key.
pub struct HttpMailer {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl HttpMailer {
    pub fn new(config: &MailConfig, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::other(format!("failed to build mail client: {err}")))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/emails", config.api_base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl MailProvider for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> AppResult<JsonValue> {
        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await
            .map_err(|err| AppError::mail_delivery(format!("mail provider unreachable: {err}")))?;

        let status = response.status();
        let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);

        if !status.is_success() {
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(|value| value.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("mail provider returned status {}", status.as_u16()));
            warn!(target: "app::notify", status = status.as_u16(), "mail provider rejected message");
            return Err(AppError::mail_delivery(message));
        }

        debug!(
            target: "app::notify",
            recipients = ?email.to.iter().map(|to| mask_email(to)).collect::<Vec<_>>(),
            latency_ms = start.elapsed().as_millis(),
            "mail accepted by provider"
        );
        Ok(body)
    }
}
