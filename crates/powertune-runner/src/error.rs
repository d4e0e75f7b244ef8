use crate::backend::ExecutionStatus;
use crate::form::ValidationErrors;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TunerError>;

#[derive(Debug, Error)]
pub enum TunerError {
    #[error("validation_failed: {0}")]
    Validation(ValidationErrors),

    #[error("transport_error: {0}")]
    Transport(String),

    #[error("terminal_status: execution finished with status {0}")]
    TerminalStatus(ExecutionStatus),

    #[error("result_shape: {0}")]
    ResultShape(String),

    #[error("poll_timeout: status still {last_status} after {attempts} attempts")]
    Timeout {
        attempts: u32,
        last_status: ExecutionStatus,
    },

    #[error("config_error: {0}")]
    Config(String),

    #[error("storage_error: {0}")]
    Storage(String),
}

impl TunerError {
    /// Stable snake_case code used in `--json` error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            TunerError::Validation(_) => "validation_failed",
            TunerError::Transport(_) => "transport_error",
            TunerError::TerminalStatus(_) => "terminal_status",
            TunerError::ResultShape(_) => "result_shape",
            TunerError::Timeout { .. } => "poll_timeout",
            TunerError::Config(_) => "config_error",
            TunerError::Storage(_) => "storage_error",
        }
    }
}

impl From<reqwest::Error> for TunerError {
    fn from(err: reqwest::Error) -> Self {
        TunerError::Transport(err.to_string())
    }
}

impl From<ValidationErrors> for TunerError {
    fn from(errors: ValidationErrors) -> Self {
        TunerError::Validation(errors)
    }
}
