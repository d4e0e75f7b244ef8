//! Tuning request draft, its validation rules and the values derived from it.

use crate::error::{Result, TunerError};
use crate::state::ResultState;
use regex::Regex;
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

pub const MIN_POWER: u32 = 128;
pub const MAX_POWER: u32 = 3008;
pub const POWER_INCREMENT: u32 = 64;
pub const DEFAULT_INVOCATIONS: u32 = 10;
const EMPTY_PAYLOAD: &str = "{}";

/// Every memory size the tuner can try, in MB.
pub fn power_values() -> Vec<u32> {
    (MIN_POWER..=MAX_POWER)
        .step_by(POWER_INCREMENT as usize)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    Balanced,
    Cost,
    Speed,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Balanced => "Balanced",
            Strategy::Cost => "Cost",
            Strategy::Speed => "Speed",
        }
    }

    pub fn balanced_weight(&self) -> f64 {
        match self {
            Strategy::Speed => 1.0,
            Strategy::Cost => 0.0,
            Strategy::Balanced => 0.5,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    NewTuner,
    ExistingExecution,
}

impl OperationType {
    pub fn label(&self) -> &'static str {
        match self {
            OperationType::NewTuner => "New Tuner",
            OperationType::ExistingExecution => "Existing execution ID",
        }
    }
}

/// Memory sizes sent to the backend: the `ALL` sentinel or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerValues {
    All,
    Custom(Vec<u32>),
}

impl Serialize for PowerValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PowerValues::All => serializer.serialize_str("ALL"),
            PowerValues::Custom(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for v in values {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
        }
    }
}

/// Validated request body for `submit_tuning`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunerRequest {
    #[serde(rename = "lambdaARN")]
    pub lambda_arn: String,
    pub strategy: Strategy,
    pub balanced_weight: f64,
    pub power_values: PowerValues,
    pub use_custom: bool,
    pub num: u32,
    pub payload: Value,
    pub include_payload: bool,
    pub parallel_invocation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.push(field, message);
        errors
    }

    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.field, e.message))
            .collect();
        write!(f, "invalid fields: {}", parts.join(", "))
    }
}

/// Editable form state. Some setters have side effects on other fields:
/// changing the strategy recomputes the weight, dropping the payload resets it.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerDraft {
    operation_type: OperationType,
    lambda_arn: String,
    strategy: Strategy,
    balanced_weight: Option<f64>,
    power_values: Vec<u32>,
    use_custom: bool,
    num: Option<u32>,
    payload: String,
    include_payload: bool,
    parallel_invocation: bool,
    execution_id: String,
}

impl Default for TunerDraft {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TunerDraft {
    /// `stored_token` is the last persisted execution id; it prefills resume mode.
    pub fn new(stored_token: Option<String>) -> Self {
        Self {
            operation_type: OperationType::NewTuner,
            lambda_arn: String::new(),
            strategy: Strategy::Balanced,
            balanced_weight: Some(Strategy::Balanced.balanced_weight()),
            power_values: power_values(),
            use_custom: false,
            num: Some(DEFAULT_INVOCATIONS),
            payload: EMPTY_PAYLOAD.to_string(),
            include_payload: false,
            parallel_invocation: false,
            execution_id: stored_token.unwrap_or_default(),
        }
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn set_operation_type(&mut self, operation_type: OperationType) {
        self.operation_type = operation_type;
    }

    pub fn lambda_arn(&self) -> &str {
        &self.lambda_arn
    }

    pub fn set_lambda_arn(&mut self, arn: impl Into<String>) {
        self.lambda_arn = arn.into();
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.strategy = strategy;
        self.balanced_weight = Some(strategy.balanced_weight());
    }

    pub fn balanced_weight(&self) -> Option<f64> {
        self.balanced_weight
    }

    pub fn set_balanced_weight(&mut self, weight: Option<f64>) {
        self.balanced_weight = weight;
    }

    pub fn power_values(&self) -> &[u32] {
        &self.power_values
    }

    pub fn set_power_values(&mut self, values: Vec<u32>) {
        self.power_values = values;
    }

    pub fn use_custom(&self) -> bool {
        self.use_custom
    }

    pub fn set_use_custom(&mut self, use_custom: bool) {
        self.use_custom = use_custom;
    }

    pub fn num(&self) -> Option<u32> {
        self.num
    }

    pub fn set_num(&mut self, num: Option<u32>) {
        self.num = num;
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<String>) {
        self.payload = payload.into();
    }

    pub fn include_payload(&self) -> bool {
        self.include_payload
    }

    pub fn set_include_payload(&mut self, include: bool) {
        self.include_payload = include;
        if !include {
            self.payload = EMPTY_PAYLOAD.to_string();
        }
    }

    pub fn parallel_invocation(&self) -> bool {
        self.parallel_invocation
    }

    pub fn set_parallel_invocation(&mut self, parallel: bool) {
        self.parallel_invocation = parallel;
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn set_execution_id(&mut self, id: impl Into<String>) {
        self.execution_id = id.into();
    }

    /// Field rules for a new tuning run. Reports every failing field at once.
    pub fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if self.lambda_arn.trim().is_empty() {
            errors.push("lambdaARN", "required");
        } else if !is_lambda_arn(&self.lambda_arn) {
            errors.push("lambdaARN", "not a Lambda function ARN");
        }
        if self.power_values.is_empty() {
            errors.push("powerValues", "required");
        }
        match self.balanced_weight {
            None => errors.push("balancedWeight", "required"),
            Some(w) if !(0.0..=1.0).contains(&w) => {
                errors.push("balancedWeight", format!("{} is outside [0, 1]", w))
            }
            Some(_) => {}
        }
        match self.num {
            None => errors.push("num", "required"),
            Some(0) => errors.push("num", "must be at least 1"),
            Some(_) => {}
        }
        if self.include_payload {
            if let Err(e) = serde_json::from_str::<Value>(&self.payload) {
                errors.push("payload", format!("invalid JSON: {}", e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn to_request(&self) -> Result<TunerRequest> {
        self.validate()?;
        let payload = if self.include_payload {
            serde_json::from_str(&self.payload).map_err(|e| {
                TunerError::Validation(ValidationErrors::single(
                    "payload",
                    format!("invalid JSON: {}", e),
                ))
            })?
        } else {
            Value::Object(Default::default())
        };
        let power_values = if self.use_custom {
            PowerValues::Custom(self.power_values.clone())
        } else {
            PowerValues::All
        };
        Ok(TunerRequest {
            lambda_arn: self.lambda_arn.trim().to_string(),
            strategy: self.strategy,
            balanced_weight: self.balanced_weight.unwrap_or(0.5),
            power_values,
            use_custom: self.use_custom,
            num: self.num.unwrap_or(DEFAULT_INVOCATIONS),
            payload,
            include_payload: self.include_payload,
            parallel_invocation: self.parallel_invocation,
        })
    }
}

pub fn form_label(draft: &TunerDraft) -> &'static str {
    match draft.operation_type() {
        OperationType::NewTuner => "Start power tuner",
        OperationType::ExistingExecution => "Fetch tuner result",
    }
}

pub fn vis_label(draft: &TunerDraft) -> String {
    let mut label = format!("Visualization with {} strategy", draft.strategy());
    if draft.strategy() == Strategy::Balanced {
        match draft.balanced_weight() {
            Some(w) => label.push_str(&format!(" ({})", w)),
            None => label.push_str(" ()"),
        }
    }
    label
}

/// Submission is blocked while a run is in flight or the active mode is incomplete.
pub fn form_disabled(draft: &TunerDraft, state: &ResultState) -> bool {
    let incomplete = match draft.operation_type() {
        OperationType::ExistingExecution => draft.execution_id().trim().is_empty(),
        OperationType::NewTuner => !draft.is_valid(),
    };
    incomplete || state.results_processing
}

static LAMBDA_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^arn:(aws[a-zA-Z-]*)?:lambda:[a-z]{2}((-gov)|(-iso(b?)))?-[a-z]+-[0-9]:[0-9]{12}:function:[a-zA-Z0-9_-]+(:(\$LATEST|[a-zA-Z0-9_-]+))?$",
    )
    .expect("valid lambda arn regex")
});

/// Matches `arn:<partition>:lambda:<region>:<account>:function:<name>[:<qualifier>]`
/// with the character classes Lambda accepts.
pub fn is_lambda_arn(arn: &str) -> bool {
    LAMBDA_ARN.is_match(arn)
}
