use serde::Serialize;
use tracing::warn;

use crate::models::usage::{UsageRange, UsageStats};
use crate::services::compatibility::{parse_pair, read_pair, CompatibilityReading};

use super::{AppState, CommandError, CommandResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorResult {
    pub reading: CompatibilityReading,
    pub recorded: bool,
}

/// Scores the pair, then records the run. A failed recording still returns the reading.
pub async fn calculator_run(state: &AppState, sign_a: String, sign_b: String) -> CommandResult<CalculatorResult> {
    let (a, b) = parse_pair(&sign_a, &sign_b)?;
    let reading = read_pair(a, b);

    let recorded = match state.usage().record(a, b).await {
        Ok(_) => true,
        Err(err) => {
            warn!(target: "app::usage", error = %err, "calculator usage was not recorded");
            false
        }
    };
    state.events().calculator_used(a, b, reading.score).await;

    Ok(CalculatorResult { reading, recorded })
}

pub async fn usage_stats(state: &AppState, range: Option<UsageRange>) -> CommandResult<UsageStats> {
    let usage = state.usage();
    let range = range.unwrap_or_default();
    state
        .auth()
        .authorized(|token| async move { usage.stats(range, &token).await })
        .await
        .map_err(CommandError::from)
}
