//! One tuning session: the draft, the presentation state and the collaborators
//! that launch, resume and poll executions.

use crate::backend::{ExecutionHandle, StatusResponse, TunerBackend};
use crate::error::{Result, TunerError};
use crate::form::{self, OperationType, TunerDraft, TunerRequest, ValidationErrors};
use crate::poller::{PollEvent, Poller};
use crate::results::TuningResult;
use crate::schedule::{Schedule, Sleeper, ThreadSleeper};
use crate::state::{self, ResultState};
use crate::storage::TokenStore;
use tracing::{info, warn};

pub struct TunerSession {
    draft: TunerDraft,
    state: ResultState,
    backend: Box<dyn TunerBackend>,
    store: Box<dyn TokenStore>,
    sleeper: Box<dyn Sleeper>,
    schedule: Schedule,
    observer: Option<Box<dyn FnMut(&PollEvent)>>,
    last_attempts: u32,
}

impl TunerSession {
    /// The stored execution token, if any, prefills the draft's execution id.
    pub fn new(
        backend: Box<dyn TunerBackend>,
        store: Box<dyn TokenStore>,
        schedule: Schedule,
    ) -> Result<Self> {
        let stored = store.get()?;
        Ok(Self {
            draft: TunerDraft::new(stored),
            state: ResultState::default(),
            backend,
            store,
            sleeper: Box::new(ThreadSleeper),
            schedule,
            observer: None,
            last_attempts: 0,
        })
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn on_poll_event(&mut self, observer: impl FnMut(&PollEvent) + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn draft(&self) -> &TunerDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut TunerDraft {
        &mut self.draft
    }

    pub fn state(&self) -> &ResultState {
        &self.state
    }

    pub fn store(&self) -> &dyn TokenStore {
        self.store.as_ref()
    }

    /// Status queries issued by the last poll.
    pub fn last_attempts(&self) -> u32 {
        self.last_attempts
    }

    pub fn form_disabled(&self) -> bool {
        form::form_disabled(&self.draft, &self.state)
    }

    pub fn form_label(&self) -> &'static str {
        form::form_label(&self.draft)
    }

    pub fn vis_label(&self) -> String {
        form::vis_label(&self.draft)
    }

    pub fn has_visualisation(&self) -> bool {
        state::has_visualisation(&self.state)
    }

    /// Run the active mode to completion: submit or resume, then poll.
    /// Invalid input fails before any state change or network call.
    pub fn start_tuning(&mut self) -> Result<TuningResult> {
        let handle = match self.draft.operation_type() {
            OperationType::NewTuner => {
                let request = self.draft.to_request()?;
                self.state.begin();
                self.launch(&request)?
            }
            OperationType::ExistingExecution => {
                let token = self.draft.execution_id().trim().to_string();
                if token.is_empty() {
                    return Err(TunerError::Validation(ValidationErrors::single(
                        "executionId",
                        "required",
                    )));
                }
                self.state.begin();
                self.resume(&token)
            }
        };
        self.start_polling(handle)
    }

    pub fn launch(&mut self, request: &TunerRequest) -> Result<ExecutionHandle> {
        info!(
            lambda_arn = %request.lambda_arn,
            strategy = %request.strategy,
            num = request.num,
            "submitting tuning request"
        );
        match self.backend.submit_tuning(request) {
            Ok(handle) => {
                info!(execution = handle.token(), "tuning execution started");
                Ok(handle)
            }
            Err(err) => {
                warn!(error = %err, "tuning submission failed");
                self.process_error(true);
                Err(err)
            }
        }
    }

    pub fn resume(&self, token: &str) -> ExecutionHandle {
        info!(execution = token, "resuming existing execution");
        ExecutionHandle::new(token)
    }

    /// Persist the handle and poll it until a terminal decision.
    pub fn start_polling(&mut self, handle: ExecutionHandle) -> Result<TuningResult> {
        self.state.execution_token = handle.token().to_string();
        self.state.results_processing = true;
        self.draft.set_execution_id(handle.token());
        if let Err(err) = self.store.set(handle.token()) {
            warn!(error = %err, "could not persist execution token");
            self.process_error(false);
            return Err(err);
        }

        let mut observer = self.observer.take();
        let outcome = {
            let poller = Poller::new(self.backend.as_ref(), self.sleeper.as_ref(), self.schedule);
            poller.poll(&handle, &mut |event: &PollEvent| {
                if let Some(cb) = observer.as_mut() {
                    cb(event);
                }
            })
        };
        self.observer = observer;
        self.last_attempts = outcome.attempts;

        match outcome.result {
            Ok((result, url)) => {
                self.state.succeed(result.clone(), url);
                Ok(result)
            }
            Err(err) => {
                self.process_error(false);
                Err(err)
            }
        }
    }

    /// One status query for the draft's execution id, outside the poll loop.
    pub fn fetch_status(&self) -> Result<StatusResponse> {
        let token = self.draft.execution_id().trim();
        if token.is_empty() {
            return Err(TunerError::Validation(ValidationErrors::single(
                "executionId",
                "required",
            )));
        }
        self.backend.get_tuning_status(&ExecutionHandle::new(token))
    }

    /// Forget the current run entirely, including the stored token.
    pub fn reset_tuning(&mut self) -> Result<()> {
        self.state = ResultState::default();
        self.store.clear()?;
        let operation_type = self.draft.operation_type();
        self.draft = TunerDraft::new(None);
        self.draft.set_operation_type(operation_type);
        Ok(())
    }

    pub fn reset_tuner(&mut self) {
        self.state.reset_tuner();
    }

    fn process_error(&mut self, first_call: bool) {
        self.state.fail();
        if first_call {
            self.state.execution_token.clear();
            if let Err(err) = self.store.clear() {
                warn!(error = %err, "could not clear stored execution token");
            }
        }
    }
}
