use std::env;
use std::fmt::Display;
use std::fs::read_to_string;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_MAIL_API_BASE: &str = "https://api.resend.com";
const DEFAULT_MAIL_FROM: &str = "Astral Readings <orders@astral.example>";
const DEFAULT_GEO_LOOKUP_URL: &str = "https://ipapi.co/json/";
const SECRETS_DIR: &str = "/run/secrets";

/// Stripe settings. Absent when no secret key is configured, which sends
/// every checkout straight to the manual order form.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: String,
    pub api_base: String,
    pub from: String,
    pub admin_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub api_base_url: String,
    pub data_dir: PathBuf,
    pub display_tz: Tz,
    pub http_timeout: Duration,
    pub stripe: Option<StripeConfig>,
    pub mail: Option<MailConfig>,
    pub geo_lookup_url: String,
    pub notify_port: u16,
}

impl StorefrontConfig {
    pub fn load() -> AppResult<Self> {
        let api_base_url = try_load::<String>("ASTRAL_API_BASE_URL", DEFAULT_API_BASE_URL)?
            .trim_end_matches('/')
            .to_string();
        let data_dir = PathBuf::from(try_load::<String>("ASTRAL_DATA_DIR", ".astral")?);
        let display_tz = try_load::<Tz>("ASTRAL_DISPLAY_TZ", "UTC")?;
        let http_timeout = Duration::from_secs(try_load::<u64>("ASTRAL_HTTP_TIMEOUT_SECS", "15")?);

        let stripe = match secret("STRIPE_SECRET_KEY") {
            Some(secret_key) => Some(StripeConfig {
                secret_key,
                api_base: try_load::<String>("STRIPE_API_BASE", DEFAULT_STRIPE_API_BASE)?,
                success_url: try_load::<String>(
                    "STRIPE_SUCCESS_URL",
                    &format!("{api_base_url}/checkout/success"),
                )?,
                cancel_url: try_load::<String>(
                    "STRIPE_CANCEL_URL",
                    &format!("{api_base_url}/checkout/cancel"),
                )?,
            }),
            None => {
                warn!(target: "app::config", "STRIPE_SECRET_KEY not set, checkout falls back to manual orders");
                None
            }
        };

        let mail = match secret("MAIL_API_KEY") {
            Some(api_key) => Some(MailConfig {
                api_key,
                api_base: try_load::<String>("MAIL_API_BASE", DEFAULT_MAIL_API_BASE)?,
                from: try_load::<String>("MAIL_FROM", DEFAULT_MAIL_FROM)?,
                admin_email: env::var("ADMIN_NOTIFY_EMAIL").ok().filter(|v| !v.trim().is_empty()),
            }),
            None => {
                warn!(target: "app::config", "MAIL_API_KEY not set, notification functions will answer 500");
                None
            }
        };

        Ok(Self {
            api_base_url,
            data_dir,
            display_tz,
            http_timeout,
            stripe,
            mail,
            geo_lookup_url: try_load::<String>("GEO_LOOKUP_URL", DEFAULT_GEO_LOOKUP_URL)?,
            notify_port: try_load::<u16>("NOTIFY_PORT", "8787")?,
        })
    }

    /// Configuration pointing at `api_base_url` with everything optional switched off.
    pub fn for_api(api_base_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            data_dir: data_dir.into(),
            display_tz: Tz::UTC,
            http_timeout: Duration::from_secs(15),
            stripe: None,
            mail: None,
            geo_lookup_url: DEFAULT_GEO_LOOKUP_URL.to_string(),
            notify_port: 8787,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("storefront.sqlite")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> AppResult<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!(target: "app::config", "{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim()
        .parse()
        .map_err(|err| AppError::validation(format!("invalid {key} value: {err}")))
}

/// Environment first, then the mounted secret file.
fn secret(name: &str) -> Option<String> {
    if let Ok(value) = env::var(name) {
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }

    let path = format!("{SECRETS_DIR}/{name}");
    match read_to_string(&path) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Ok(_) => None,
        Err(_) => None,
    }
}
