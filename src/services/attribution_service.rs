use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::attribution::{AttributionParams, AttributionRecord};
use crate::services::local_state_service::LocalStateService;
use crate::services::order_service::normalize_code;

const RELATIVE_BASE: &str = "http://storefront.local";
const REFERRAL_KEYS: [&str; 3] = ["ref", "referral", "referral_code"];

/// A page load as the attribution layer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageVisit {
    pub path: String,
    pub params: AttributionParams,
}

/// Parses an absolute or site-relative page URL into its path and campaign parameters.
pub fn parse_page_url(page_url: &str) -> AppResult<PageVisit> {
    let url = match Url::parse(page_url) {
        Ok(url) => url,
        Err(_) => Url::parse(RELATIVE_BASE)
            .and_then(|base| base.join(page_url))
            .map_err(|err| AppError::validation(format!("invalid page url {page_url}: {err}")))?,
    };

    let mut params = AttributionParams::default();
    for (key, value) in url.query_pairs() {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let value = Some(value.to_string());
        match key.as_ref() {
            "utm_source" => params.utm_source = value,
            "utm_medium" => params.utm_medium = value,
            "utm_campaign" => params.utm_campaign = value,
            "utm_term" => params.utm_term = value,
            "utm_content" => params.utm_content = value,
            key if REFERRAL_KEYS.contains(&key) => match normalize_code(value.as_deref()) {
                Some(code) => params.referral_code = Some(code),
                None => debug!(target: "app::attribution", "ignoring malformed referral code"),
            },
            _ => {}
        }
    }

    Ok(PageVisit {
        path: url.path().to_string(),
        params,
    })
}

/// Merges one page load into the persisted record.
///
/// Landing path and referrer are first-seen and never replaced. Campaign
/// fields are overwritten only when present on this load, and `updated_at`
/// moves only when at least one of them was.
pub fn merge_attribution(
    existing: Option<AttributionRecord>,
    params: &AttributionParams,
    landing_path: &str,
    referrer: Option<&str>,
    now: DateTime<Utc>,
) -> AttributionRecord {
    let mut record = existing.unwrap_or_default();

    if record.landing_path.is_none() && !landing_path.is_empty() {
        record.landing_path = Some(landing_path.to_string());
    }
    if record.referrer.is_none() {
        record.referrer = referrer
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
    }

    overwrite(&mut record.utm_source, &params.utm_source);
    overwrite(&mut record.utm_medium, &params.utm_medium);
    overwrite(&mut record.utm_campaign, &params.utm_campaign);
    overwrite(&mut record.utm_term, &params.utm_term);
    overwrite(&mut record.utm_content, &params.utm_content);
    overwrite(&mut record.referral_code, &params.referral_code);

    if !params.is_empty() {
        record.updated_at = Some(now);
    }

    record
}

fn overwrite(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

pub struct AttributionService {
    state: Arc<LocalStateService>,
}

impl AttributionService {
    pub fn new(state: Arc<LocalStateService>) -> Self {
        Self { state }
    }

    /// Called on every page load. Local only, no network.
    pub fn capture(&self, page_url: &str, referrer: Option<&str>) -> AppResult<AttributionRecord> {
        let visit = parse_page_url(page_url)?;
        let existing = self.state.attribution()?;
        let merged = merge_attribution(existing.clone(), &visit.params, &visit.path, referrer, Utc::now());

        if existing.as_ref() != Some(&merged) {
            self.state.save_attribution(&merged)?;
            debug!(
                target: "app::attribution",
                path = %visit.path,
                has_campaign = !visit.params.is_empty(),
                "attribution updated"
            );
        }

        Ok(merged)
    }

    pub fn current(&self) -> AppResult<AttributionRecord> {
        Ok(self.state.attribution()?.unwrap_or_default())
    }
}
