//! Client for Lambda power-tuning executions.
//!
//! A `TunerSession` owns the request draft and the presentation state of one
//! run. It submits a new tuning request (or adopts an existing execution
//! token), persists the token through a `TokenStore`, and polls the backend on
//! a fixed schedule until the execution reaches a terminal status or the
//! attempt budget runs out.

pub mod backend;
pub mod config;
pub mod error;
pub mod form;
pub mod poller;
pub mod results;
pub mod schedule;
pub mod session;
pub mod state;
pub mod storage;

pub use backend::{ExecutionHandle, ExecutionStatus, HttpBackend, StatusResponse, TunerBackend};
pub use config::TunerConfig;
pub use error::{Result, TunerError};
pub use form::{
    form_disabled, form_label, is_lambda_arn, power_values, vis_label, OperationType,
    PowerValues, Strategy, TunerDraft, TunerRequest, ValidationErrors,
};
pub use poller::{PollEvent, PollMachine, PollOutcome, PollState, Poller};
pub use results::{format_value, sanitize_resource_url, SafeUrl, TuningResult, TuningSummary};
pub use schedule::{CancelSignal, Schedule, Sleeper, ThreadSleeper};
pub use session::TunerSession;
pub use state::{has_visualisation, ResultState};
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
