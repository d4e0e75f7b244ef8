//! Parsing and presentation of a finished tuning execution.

use crate::error::{Result, TunerError};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambda_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<String>,
}

/// Output document of a succeeded execution. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_machine: Option<StateMachineInfo>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TuningResult {
    pub fn parse(output: Option<&str>) -> Result<Self> {
        let output = output
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| TunerError::ResultShape("execution succeeded without output".into()))?;
        serde_json::from_str(output)
            .map_err(|e| TunerError::ResultShape(format!("unreadable execution output: {}", e)))
    }

    pub fn visualization(&self) -> Option<&str> {
        self.state_machine
            .as_ref()
            .and_then(|sm| sm.visualization.as_deref())
            .filter(|v| !v.trim().is_empty())
    }

    /// A result without a usable visualization link is not shown at all.
    pub fn into_presentable(self) -> Result<(TuningResult, SafeUrl)> {
        let url = match self.visualization() {
            Some(raw) => sanitize_resource_url(raw)?,
            None => {
                return Err(TunerError::ResultShape(
                    "result has no stateMachine.visualization".into(),
                ))
            }
        };
        Ok((self, url))
    }
}

/// URL that passed `sanitize_resource_url` and may be handed to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SafeUrl(String);

impl SafeUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn sanitize_resource_url(raw: &str) -> Result<SafeUrl> {
    let url = raw.trim();
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(TunerError::ResultShape(format!(
            "visualization url contains whitespace or control characters: {:?}",
            url
        )));
    }
    let parsed = Url::parse(url).map_err(|e| {
        TunerError::ResultShape(format!("visualization url is not absolute: {}: {}", url, e))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TunerError::ResultShape(format!(
            "visualization url must be http(s): {}",
            url
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(TunerError::ResultShape(format!(
            "visualization url has no host: {}",
            url
        )));
    }
    Ok(SafeUrl(url.to_string()))
}

// 2 * 10^20 is still an exact f64.
const MAX_EXACT_DECIMALS: usize = 20;

/// Fixed-point rendering with `decimals` digits after the point. Exact ties
/// round away from zero.
pub fn format_value(value: f64, decimals: usize) -> String {
    if value.is_finite() && decimals <= MAX_EXACT_DECIMALS {
        let scale = 2.0 * 10f64.powi(decimals as i32);
        let doubled = (value * scale).round();
        // mul_add rounds once, so zero means value * scale is exactly odd.
        if doubled % 2.0 != 0.0 && value.mul_add(scale, -doubled) == 0.0 {
            let rounded = (doubled + doubled.signum()) / scale;
            return format!("{:.*}", decimals, rounded);
        }
    }
    format!("{:.*}", decimals, value)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningSummary {
    pub power: Option<String>,
    pub cost: Option<String>,
    pub duration: Option<String>,
    pub execution_cost: Option<String>,
    pub lambda_cost: Option<String>,
    pub visualization: Option<String>,
}

impl TuningSummary {
    pub fn from_result(result: &TuningResult) -> Self {
        let sm = result.state_machine.clone().unwrap_or_default();
        Self {
            power: result.power.map(|p| format!("{} MB", p)),
            cost: result.cost.map(|c| format!("${}", format_value(c, 9))),
            duration: result.duration.map(|d| format!("{} ms", format_value(d, 0))),
            execution_cost: sm.execution_cost.map(|c| format!("${}", format_value(c, 5))),
            lambda_cost: sm.lambda_cost.map(|c| format!("${}", format_value(c, 5))),
            visualization: result.visualization().map(str::to_string),
        }
    }

    /// Present fields as `(label, value)` pairs in display order.
    pub fn lines(&self) -> Vec<(&'static str, &str)> {
        [
            ("best_power", &self.power),
            ("cost_per_invocation", &self.cost),
            ("avg_duration", &self.duration),
            ("state_machine_cost", &self.execution_cost),
            ("lambda_cost", &self.lambda_cost),
            ("visualization", &self.visualization),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| (label, v)))
        .collect()
    }
}
