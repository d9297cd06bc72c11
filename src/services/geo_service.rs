use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::services::local_state_service::{CountryInfo, LocalStateService};

/// Union of the fields the common geo-IP JSON endpoints return. Some put the
/// ISO code in `country`, others the display name.
#[derive(Debug, Default, Deserialize)]
struct GeoLookupResponse {
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default, rename = "countryCode")]
    country_code_camel: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl GeoLookupResponse {
    fn into_country(self) -> Option<CountryInfo> {
        let country = self.country.map(|value| value.trim().to_string());
        let code = self
            .country_code
            .or(self.country_code_camel)
            .or_else(|| country.clone().filter(|value| value.len() == 2))
            .map(|code| code.trim().to_uppercase())
            .filter(|code| code.len() == 2)?;
        let name = self
            .country_name
            .or_else(|| country.filter(|value| value.len() > 2))
            .unwrap_or_else(|| code.clone());
        Some(CountryInfo { name, code })
    }
}

const FAILED_LOOKUP_BACKOFF: Duration = Duration::from_secs(300);

/// Visitor country, looked up once per profile and then served from local state.
/// After a failed lookup the endpoint is left alone for a backoff period.
pub struct GeoService {
    state: Arc<LocalStateService>,
    client: reqwest::Client,
    lookup_url: String,
    retry_after: Duration,
    failed_at: Mutex<Option<Instant>>,
}

impl GeoService {
    pub fn new(state: Arc<LocalStateService>, lookup_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::other(format!("failed to build geo client: {err}")))?;
        Ok(Self {
            state,
            client,
            lookup_url: lookup_url.to_string(),
            retry_after: FAILED_LOOKUP_BACKOFF,
            failed_at: Mutex::new(None),
        })
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// `None` when the lookup fails; the failure is logged, not returned.
    pub async fn country(&self) -> Option<CountryInfo> {
        match self.state.run_blocking(|state| state.cached_country()).await {
            Ok(Some(country)) => return Some(country),
            Ok(None) => {}
            Err(err) => warn!(target: "app::geo", error = %err, "failed to read cached country"),
        }

        if self.in_backoff() {
            debug!(target: "app::geo", "skipping country lookup after a recent failure");
            return None;
        }

        match self.lookup().await {
            Ok(country) => {
                self.set_failed(false);
                let cached = country.clone();
                if let Err(err) = self
                    .state
                    .run_blocking(move |state| state.save_country(&cached))
                    .await
                {
                    warn!(target: "app::geo", error = %err, "failed to cache country");
                }
                debug!(target: "app::geo", code = %country.code, "visitor country resolved");
                Some(country)
            }
            Err(err) => {
                self.set_failed(true);
                warn!(target: "app::geo", error = %err, "country lookup failed");
                None
            }
        }
    }

    fn in_backoff(&self) -> bool {
        self.failed_at
            .lock()
            .map(|failed_at| failed_at.map_or(false, |at| at.elapsed() < self.retry_after))
            .unwrap_or(false)
    }

    fn set_failed(&self, failed: bool) {
        if let Ok(mut failed_at) = self.failed_at.lock() {
            *failed_at = failed.then(Instant::now);
        }
    }

    async fn lookup(&self) -> AppResult<CountryInfo> {
        let response = self
            .client
            .get(&self.lookup_url)
            .send()
            .await
            .map_err(|err| AppError::other(format!("geo lookup request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::other(format!(
                "geo lookup returned status {}",
                response.status().as_u16()
            )));
        }

        let body: GeoLookupResponse = response
            .json()
            .await
            .map_err(|err| AppError::other(format!("geo lookup body unreadable: {err}")))?;

        body.into_country()
            .ok_or_else(|| AppError::other("geo lookup returned no country code"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_both_common_response_shapes() {
        let ipapi: GeoLookupResponse =
            serde_json::from_str(r#"{"country":"DE","country_name":"Germany","country_code":"DE"}"#).unwrap();
        assert_eq!(
            ipapi.into_country(),
            Some(CountryInfo { name: "Germany".into(), code: "DE".into() })
        );

        let ip_api: GeoLookupResponse =
            serde_json::from_str(r#"{"country":"Japan","countryCode":"jp"}"#).unwrap();
        assert_eq!(
            ip_api.into_country(),
            Some(CountryInfo { name: "Japan".into(), code: "JP".into() })
        );

        let empty: GeoLookupResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.into_country(), None);
    }
}
