//! Status polling for one execution.
//!
//! `PollMachine` holds the decision logic and never touches the network or a
//! clock; `Poller` feeds it from a backend on a `Schedule`. A terminal
//! decision fires the machine's `CancelSignal`, which the schedule checks
//! before every tick, so nothing is queried after the run is decided.

use crate::backend::{ExecutionHandle, ExecutionStatus, StatusResponse, TunerBackend};
use crate::error::{Result, TunerError};
use crate::results::{SafeUrl, TuningResult};
use crate::schedule::{CancelSignal, Schedule, Sleeper};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Idle,
    Polling {
        attempt: u32,
        handle: ExecutionHandle,
    },
    Succeeded {
        result: TuningResult,
        url: SafeUrl,
    },
    Failed {
        reason: String,
    },
    Cancelled,
    TimedOut {
        attempts: u32,
    },
}

/// Reported to the observer after every status query.
#[derive(Debug, Clone, PartialEq)]
pub struct PollEvent {
    pub attempt: u32,
    pub max_attempts: u32,
    /// `None` when the query itself failed.
    pub status: Option<ExecutionStatus>,
}

pub struct PollOutcome {
    pub attempts: u32,
    pub state: PollState,
    pub result: Result<(TuningResult, SafeUrl)>,
}

pub struct PollMachine {
    state: PollState,
    attempts: u32,
    max_attempts: u32,
    cancel: CancelSignal,
    decision: Option<Result<(TuningResult, SafeUrl)>>,
}

impl PollMachine {
    pub fn start(handle: ExecutionHandle, max_attempts: u32, cancel: CancelSignal) -> Self {
        Self {
            state: PollState::Polling { attempt: 0, handle },
            attempts: 0,
            max_attempts,
            cancel,
            decision: None,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_decided(&self) -> bool {
        self.decision.is_some()
    }

    /// Feed one query result. Responses arriving after a decision are ignored.
    pub fn record(&mut self, response: Result<StatusResponse>) {
        let handle = match &self.state {
            PollState::Polling { handle, .. } if self.decision.is_none() => handle.clone(),
            _ => {
                debug!("status response after terminal decision ignored");
                return;
            }
        };
        self.attempts += 1;
        let attempt = self.attempts;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let reason = err.to_string();
                self.decide(PollState::Failed { reason }, Err(err));
                return;
            }
        };

        match response.status {
            ExecutionStatus::Succeeded => {
                match TuningResult::parse(response.output.as_deref())
                    .and_then(TuningResult::into_presentable)
                {
                    Ok((result, url)) => {
                        let state = PollState::Succeeded {
                            result: result.clone(),
                            url: url.clone(),
                        };
                        self.decide(state, Ok((result, url)));
                    }
                    Err(err) => {
                        let reason = err.to_string();
                        self.decide(PollState::Failed { reason }, Err(err));
                    }
                }
            }
            ExecutionStatus::Cancelled => {
                self.decide(
                    PollState::Cancelled,
                    Err(TunerError::TerminalStatus(ExecutionStatus::Cancelled)),
                );
            }
            status @ (ExecutionStatus::Failed | ExecutionStatus::Unknown) => {
                let reason = format!("execution reported {}", status);
                self.decide(
                    PollState::Failed { reason },
                    Err(TunerError::TerminalStatus(status)),
                );
            }
            status if attempt >= self.max_attempts => {
                self.decide(
                    PollState::TimedOut { attempts: attempt },
                    Err(TunerError::Timeout {
                        attempts: attempt,
                        last_status: status,
                    }),
                );
            }
            _ => {
                self.state = PollState::Polling { attempt, handle };
            }
        }
    }

    fn decide(&mut self, state: PollState, decision: Result<(TuningResult, SafeUrl)>) {
        if !self.cancel.fire() {
            return;
        }
        self.state = state;
        self.decision = Some(decision);
    }

    pub fn into_outcome(self) -> PollOutcome {
        let attempts = self.attempts;
        match self.decision {
            Some(result) => PollOutcome {
                attempts,
                state: self.state,
                result,
            },
            // Schedule ended without a decision: either cancelled from outside
            // or the tick budget was smaller than the attempt budget.
            None => PollOutcome {
                attempts,
                state: PollState::TimedOut { attempts },
                result: Err(TunerError::Timeout {
                    attempts,
                    last_status: ExecutionStatus::Running,
                }),
            },
        }
    }
}

pub struct Poller<'a> {
    backend: &'a dyn TunerBackend,
    sleeper: &'a dyn Sleeper,
    schedule: Schedule,
}

impl<'a> Poller<'a> {
    pub fn new(backend: &'a dyn TunerBackend, sleeper: &'a dyn Sleeper, schedule: Schedule) -> Self {
        Self {
            backend,
            sleeper,
            schedule,
        }
    }

    pub fn poll(&self, handle: &ExecutionHandle, observer: &mut dyn FnMut(&PollEvent)) -> PollOutcome {
        let cancel = CancelSignal::new();
        let max_attempts = self.schedule.max_ticks();
        let mut machine = PollMachine::start(handle.clone(), max_attempts, cancel.clone());
        info!(
            execution = handle.token(),
            max_attempts,
            interval_secs = self.schedule.interval().as_secs(),
            "polling execution"
        );

        self.schedule.run(self.sleeper, &cancel, |_tick| {
            let response = self.backend.get_tuning_status(handle);
            let status = match &response {
                Ok(r) => Some(r.status.clone()),
                Err(err) => {
                    warn!(error = %err, "status query failed");
                    None
                }
            };
            let attempt = machine.attempts() + 1;
            debug!(attempt, status = ?status, "status received");
            observer(&PollEvent {
                attempt,
                max_attempts,
                status,
            });
            machine.record(response);
        });

        let outcome = machine.into_outcome();
        match &outcome.result {
            Ok((_, url)) => info!(attempts = outcome.attempts, visualization = %url, "execution succeeded"),
            Err(err) => warn!(attempts = outcome.attempts, error = %err, "polling ended without a result"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{status, succeeded, ScriptedBackend};
    use crate::schedule::testing::RecordingSleeper;
    use std::time::Duration;

    fn poll_with(backend: &ScriptedBackend) -> (PollOutcome, Vec<PollEvent>, usize) {
        let sleeper = RecordingSleeper::default();
        let poller = Poller::new(backend, &sleeper, Schedule::default());
        let mut events = Vec::new();
        let outcome = poller.poll(&ExecutionHandle::new("exec-1"), &mut |e: &PollEvent| events.push(e.clone()));
        let sleeps = sleeper.sleeps.borrow().len();
        (outcome, events, sleeps)
    }

    #[test]
    fn succeeded_with_visualization_is_accepted() {
        let backend = ScriptedBackend::new().with_statuses(vec![
            status(ExecutionStatus::Running),
            succeeded(r#"{"stateMachine":{"visualization":"https://x"}}"#),
        ]);
        let (outcome, events, sleeps) = poll_with(&backend);
        let (result, url) = outcome.result.expect("success");
        assert_eq!(url.as_str(), "https://x");
        assert_eq!(result.visualization(), Some("https://x"));
        assert_eq!(outcome.attempts, 2);
        assert!(matches!(outcome.state, PollState::Succeeded { .. }));
        assert_eq!(backend.calls.queries.get(), 2);
        assert_eq!(events.len(), 2);
        assert_eq!(sleeps, 1);
    }

    #[test]
    fn succeeded_without_visualization_is_an_error() {
        let backend = ScriptedBackend::new().with_statuses(vec![succeeded(r#"{"stateMachine":{}}"#)]);
        let (outcome, _, _) = poll_with(&backend);
        assert!(matches!(outcome.result, Err(TunerError::ResultShape(_))));
        assert!(matches!(outcome.state, PollState::Failed { .. }));
        assert_eq!(backend.calls.queries.get(), 1);
    }

    #[test]
    fn failed_at_third_attempt_stops_immediately() {
        let backend = ScriptedBackend::new().with_statuses(vec![
            status(ExecutionStatus::Running),
            status(ExecutionStatus::Running),
            status(ExecutionStatus::Failed),
        ]);
        let (outcome, events, sleeps) = poll_with(&backend);
        assert!(matches!(
            outcome.result,
            Err(TunerError::TerminalStatus(ExecutionStatus::Failed))
        ));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(backend.calls.queries.get(), 3);
        assert_eq!(events.last().map(|e| e.attempt), Some(3));
        assert_eq!(sleeps, 2);
    }

    #[test]
    fn cancelled_and_unknown_are_terminal_errors() {
        let backend = ScriptedBackend::new().with_statuses(vec![status(ExecutionStatus::Cancelled)]);
        let (outcome, _, _) = poll_with(&backend);
        assert_eq!(outcome.state, PollState::Cancelled);
        assert!(outcome.result.is_err());

        let backend = ScriptedBackend::new().with_statuses(vec![status(ExecutionStatus::Unknown)]);
        let (outcome, _, _) = poll_with(&backend);
        assert!(matches!(
            outcome.result,
            Err(TunerError::TerminalStatus(ExecutionStatus::Unknown))
        ));
        assert_eq!(backend.calls.queries.get(), 1);
    }

    #[test]
    fn running_for_every_attempt_times_out_after_cap() {
        let backend = ScriptedBackend::new();
        let (outcome, events, sleeps) = poll_with(&backend);
        assert_eq!(backend.calls.queries.get(), 24);
        assert_eq!(outcome.attempts, 24);
        assert_eq!(outcome.state, PollState::TimedOut { attempts: 24 });
        assert!(matches!(
            outcome.result,
            Err(TunerError::Timeout { attempts: 24, .. })
        ));
        assert_eq!(events.len(), 24);
        assert_eq!(sleeps, 23);
    }

    #[test]
    fn other_statuses_keep_polling() {
        let backend = ScriptedBackend::new().with_statuses(vec![
            Ok(StatusResponse::new(ExecutionStatus::Other("QUEUED".into()), None)),
            succeeded(r#"{"stateMachine":{"visualization":"https://x"}}"#),
        ]);
        let (outcome, _, _) = poll_with(&backend);
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn step_functions_timed_out_is_polled_until_cap() {
        let timed_out = || {
            Ok(StatusResponse::new(
                ExecutionStatus::parse(Some("TIMED_OUT")),
                None,
            ))
        };
        let mut machine = PollMachine::start(ExecutionHandle::new("e"), 3, CancelSignal::new());
        machine.record(timed_out());
        machine.record(timed_out());
        assert!(!machine.is_decided());
        machine.record(timed_out());
        let outcome = machine.into_outcome();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.state, PollState::TimedOut { attempts: 3 });
        match outcome.result {
            Err(TunerError::Timeout {
                attempts,
                last_status,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, ExecutionStatus::Other("TIMED_OUT".into()));
            }
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn transport_error_stops_polling() {
        let backend = ScriptedBackend::new().with_statuses(vec![
            status(ExecutionStatus::Running),
            Err(TunerError::Transport("connection reset".into())),
        ]);
        let (outcome, events, _) = poll_with(&backend);
        assert!(matches!(outcome.result, Err(TunerError::Transport(_))));
        assert_eq!(backend.calls.queries.get(), 2);
        assert_eq!(events[1].status, None);
    }

    #[test]
    fn machine_honours_only_first_decision() {
        let cancel = CancelSignal::new();
        let mut machine = PollMachine::start(ExecutionHandle::new("e"), 24, cancel.clone());
        machine.record(status(ExecutionStatus::Failed));
        assert!(machine.is_decided());
        assert!(cancel.is_fired());
        machine.record(succeeded(r#"{"stateMachine":{"visualization":"https://x"}}"#));
        assert_eq!(machine.attempts(), 1);
        let outcome = machine.into_outcome();
        assert!(outcome.result.is_err());
    }

    #[test]
    fn machine_times_out_at_its_own_cap() {
        let mut machine = PollMachine::start(ExecutionHandle::new("e"), 2, CancelSignal::new());
        machine.record(status(ExecutionStatus::Running));
        assert_eq!(
            machine.state(),
            &PollState::Polling {
                attempt: 1,
                handle: ExecutionHandle::new("e")
            }
        );
        machine.record(status(ExecutionStatus::Running));
        assert_eq!(machine.state(), &PollState::TimedOut { attempts: 2 });
    }

    #[test]
    fn short_schedule_interval_is_respected() {
        let backend = ScriptedBackend::new();
        let sleeper = RecordingSleeper::default();
        let poller = Poller::new(&backend, &sleeper, Schedule::new(Duration::from_millis(10), 3));
        let outcome = poller.poll(&ExecutionHandle::new("e"), &mut |_: &PollEvent| {});
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            *sleeper.sleeps.borrow(),
            vec![Duration::from_millis(10), Duration::from_millis(10)]
        );
    }
}
