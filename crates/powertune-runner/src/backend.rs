//! HTTP collaborator that starts tuning executions and reports their status.

use crate::config::TunerConfig;
use crate::error::{Result, TunerError};
use crate::form::TunerRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Opaque identifier of one tuning execution on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    #[serde(rename = "executionToken")]
    pub execution_token: String,
}

impl ExecutionHandle {
    pub fn new(execution_token: impl Into<String>) -> Self {
        Self {
            execution_token: execution_token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.execution_token
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Empty or missing status.
    Unknown,
    /// Anything else the backend reports. Polled like `Running`.
    Other(String),
}

impl ExecutionStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).unwrap_or("") {
            "" => ExecutionStatus::Unknown,
            "RUNNING" => ExecutionStatus::Running,
            "SUCCEEDED" => ExecutionStatus::Succeeded,
            "FAILED" => ExecutionStatus::Failed,
            "CANCELLED" => ExecutionStatus::Cancelled,
            other => ExecutionStatus::Other(other.to_string()),
        }
    }

    /// Whether polling stops on this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Unknown
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Unknown => "UNKNOWN",
            ExecutionStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub status: ExecutionStatus,
    /// Execution output, itself a JSON document encoded as a string.
    pub output: Option<String>,
}

impl StatusResponse {
    pub fn new(status: ExecutionStatus, output: Option<String>) -> Self {
        Self { status, output }
    }
}

#[derive(Debug, Deserialize)]
struct RawStatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<Value>,
}

impl From<RawStatusResponse> for StatusResponse {
    fn from(raw: RawStatusResponse) -> Self {
        // Some deployments return the output already decoded.
        let output = match raw.output {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };
        StatusResponse {
            status: ExecutionStatus::parse(raw.status.as_deref()),
            output,
        }
    }
}

/// The two calls the tuner needs from its backend.
pub trait TunerBackend {
    fn submit_tuning(&self, request: &TunerRequest) -> Result<ExecutionHandle>;

    fn get_tuning_status(&self, handle: &ExecutionHandle) -> Result<StatusResponse>;
}

pub struct HttpBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &TunerConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("powertune/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::blocking::Response> {
        let url = format!("{}{}", self.endpoint, path);
        debug!(%url, "backend request");
        let mut req = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let response = req.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TunerError::Transport(format!(
                "HTTP {} from {}: {}",
                status,
                url,
                body.trim()
            )));
        }
        Ok(response)
    }
}

impl TunerBackend for HttpBackend {
    fn submit_tuning(&self, request: &TunerRequest) -> Result<ExecutionHandle> {
        let handle: ExecutionHandle = self.post("/power-tuner", request)?.json()?;
        if handle.execution_token.trim().is_empty() {
            return Err(TunerError::Transport(
                "backend returned an empty execution token".to_string(),
            ));
        }
        Ok(handle)
    }

    fn get_tuning_status(&self, handle: &ExecutionHandle) -> Result<StatusResponse> {
        let raw: RawStatusResponse = self.post("/power-tuner/status", handle)?.json()?;
        Ok(raw.into())
    }
}
