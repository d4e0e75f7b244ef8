use crate::results::{SafeUrl, TuningResult};
use serde::Serialize;

/// Presentation state of the current run.
///
/// At most one of `results_processing`, `results_back` and `results_error`
/// is set; all three clear means idle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultState {
    pub results_back: bool,
    pub results_processing: bool,
    pub results_error: bool,
    pub results: Option<TuningResult>,
    pub visualisation_url: Option<SafeUrl>,
    pub execution_token: String,
}

impl ResultState {
    /// Clear everything left by the previous run and mark the new one in flight.
    pub fn begin(&mut self) {
        *self = ResultState {
            results_processing: true,
            ..ResultState::default()
        };
    }

    pub fn succeed(&mut self, result: TuningResult, url: SafeUrl) {
        self.results = Some(result);
        self.visualisation_url = Some(url);
        self.results_back = true;
        self.results_processing = false;
        self.results_error = false;
    }

    /// Every failure kind lands here; they are not told apart on screen.
    pub fn fail(&mut self) {
        self.reset_tuner();
        self.results_error = true;
    }

    pub fn reset_tuner(&mut self) {
        self.results_back = false;
        self.results_processing = false;
    }

    pub fn is_idle(&self) -> bool {
        !self.results_back && !self.results_processing && !self.results_error
    }
}

pub fn has_visualisation(state: &ResultState) -> bool {
    state.results_back
        && state
            .results
            .as_ref()
            .and_then(TuningResult::visualization)
            .is_some()
}
