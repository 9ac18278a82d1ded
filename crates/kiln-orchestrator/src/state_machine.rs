//! Pure state machine for one pipeline run
//!
//! `transition(state, event) -> (state, actions)` has no I/O and no async. The
//! orchestrator executes the returned actions and feeds the outcome back as the next
//! event. Invalid transitions land in `Aborted`; this function never panics.

/// Pipeline state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Initial state - no run in progress
    Idle,
    /// Asking the planner for a change-set
    Planning {
        max_attempts: u32,
        run_tests: bool,
    },
    /// Applying the planned change-set to the project
    Applying {
        max_attempts: u32,
        run_tests: bool,
    },
    /// Clean + build for `attempt` (1-based)
    Building {
        attempt: u32,
        max_attempts: u32,
        run_tests: bool,
    },
    /// Diagnosing and fixing the failures of `attempt`
    Repairing {
        attempt: u32,
        max_attempts: u32,
        run_tests: bool,
    },
    /// Running the test suite after a successful build
    Testing,
    /// Build succeeded; `tested` if the test stage ran
    Done {
        tested: bool,
    },
    /// Retry budget exhausted without a successful build
    BuildFailed {
        attempts: u32,
    },
    /// Planner failed; the project was not touched
    PlanningFailed {
        error: String,
    },
    /// Change-set could not be applied
    ApplyFailed {
        error: String,
    },
    /// Cancellation observed during `stage`
    Cancelled {
        stage: &'static str,
    },
    /// Final-attempt error or an invalid transition
    Aborted {
        error: String,
    },
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Planning { .. } => "planning",
            State::Applying { .. } => "applying",
            State::Building { .. } => "building",
            State::Repairing { .. } => "repairing",
            State::Testing => "testing",
            State::Done { .. } => "done",
            State::BuildFailed { .. } => "build_failed",
            State::PlanningFailed { .. } => "planning_failed",
            State::ApplyFailed { .. } => "apply_failed",
            State::Cancelled { .. } => "cancelled",
            State::Aborted { .. } => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Done { .. }
                | State::BuildFailed { .. }
                | State::PlanningFailed { .. }
                | State::ApplyFailed { .. }
                | State::Cancelled { .. }
                | State::Aborted { .. }
        )
    }

    /// Build attempt this state belongs to, if any
    pub fn attempt(&self) -> Option<u32> {
        match self {
            State::Building { attempt, .. } | State::Repairing { attempt, .. } => Some(*attempt),
            State::BuildFailed { attempts } => Some(*attempts),
            _ => None,
        }
    }
}

/// Outcome of an executed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Start a new run with its retry ceiling and test policy
    Start { max_attempts: u32, run_tests: bool },
    /// Planner returned a change-set
    Planned { items: usize, references: bool },
    /// Planner failed
    PlanningError { message: String },
    /// Every item of the change-set was applied
    Applied { items: usize },
    /// Applying failed as a whole or for at least one item
    ApplyError { message: String },
    /// Build finished with no errors
    BuildSucceeded,
    /// Build finished with errors
    BuildFailed { diagnostics: usize },
    /// Clean or build returned an error instead of an outcome
    AttemptError { message: String },
    /// Repair round finished; `fixes` were applied
    RepairComplete { fixes: usize },
    /// Test stage finished, whatever its result
    TestsFinished,
    /// Cancellation requested
    Cancel,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Ask the planner for a change-set
    Plan,
    /// Apply the planned change-set
    Apply,
    /// Clean and build for `attempt`
    CleanAndBuild { attempt: u32 },
    /// Diagnose and fix the failures of `attempt`
    Diagnose { attempt: u32 },
    /// Run the test suite
    RunTests,
    /// Report progress to observers
    Notify { message: String },
}

fn notify(message: impl Into<String>) -> Action {
    Action::Notify {
        message: message.into(),
    }
}

fn after_success(run_tests: bool, attempt: u32) -> (State, Vec<Action>) {
    if run_tests {
        (
            State::Testing,
            vec![
                notify(format!("Build succeeded on attempt {}, running tests", attempt)),
                Action::RunTests,
            ],
        )
    } else {
        (
            State::Done { tested: false },
            vec![notify(format!("Build succeeded on attempt {}", attempt))],
        )
    }
}

/// Pure state transition function
///
/// Takes the current state and an event, returns the new state and the actions to
/// execute. Any invalid transition results in `Aborted` with a descriptive error.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        (state, Event::Cancel) if !state.is_terminal() => {
            let stage = state.name();
            (
                State::Cancelled { stage },
                vec![notify(format!("Cancelled during {}", stage))],
            )
        }

        (
            State::Idle,
            Event::Start {
                max_attempts,
                run_tests,
            },
        ) => (
            State::Planning {
                max_attempts: max_attempts.max(1),
                run_tests,
            },
            vec![notify("Planning changes"), Action::Plan],
        ),

        (
            State::Planning {
                max_attempts,
                run_tests,
            },
            Event::Planned { items, references },
        ) => (
            State::Applying {
                max_attempts,
                run_tests: run_tests || references,
            },
            vec![
                notify(format!("Planned {} change(s)", items)),
                Action::Apply,
            ],
        ),

        (State::Planning { .. }, Event::PlanningError { message }) => (
            State::PlanningFailed {
                error: message.clone(),
            },
            vec![notify(format!("Planning failed: {}", message))],
        ),

        (
            State::Applying {
                max_attempts,
                run_tests,
            },
            Event::Applied { items },
        ) => (
            State::Building {
                attempt: 1,
                max_attempts,
                run_tests,
            },
            vec![
                notify(format!("Applied {} change(s)", items)),
                Action::CleanAndBuild { attempt: 1 },
            ],
        ),

        (State::Applying { .. }, Event::ApplyError { message }) => (
            State::ApplyFailed {
                error: message.clone(),
            },
            vec![notify(format!("Applying changes failed: {}", message))],
        ),

        (
            State::Building {
                attempt,
                run_tests,
                ..
            },
            Event::BuildSucceeded,
        ) => after_success(run_tests, attempt),

        (
            State::Building {
                attempt,
                max_attempts,
                run_tests,
            },
            Event::BuildFailed { diagnostics },
        ) => (
            State::Repairing {
                attempt,
                max_attempts,
                run_tests,
            },
            vec![
                notify(format!(
                    "Build attempt {}/{} failed with {} diagnostic(s)",
                    attempt, max_attempts, diagnostics
                )),
                Action::Diagnose { attempt },
            ],
        ),

        (
            State::Building {
                attempt,
                max_attempts,
                run_tests,
            },
            Event::AttemptError { message },
        ) => {
            if attempt >= max_attempts {
                (
                    State::Aborted {
                        error: message.clone(),
                    },
                    vec![notify(format!(
                        "Build attempt {}/{} errored: {}",
                        attempt, max_attempts, message
                    ))],
                )
            } else {
                let next = attempt + 1;
                (
                    State::Building {
                        attempt: next,
                        max_attempts,
                        run_tests,
                    },
                    vec![
                        notify(format!(
                            "Build attempt {}/{} errored, retrying: {}",
                            attempt, max_attempts, message
                        )),
                        Action::CleanAndBuild { attempt: next },
                    ],
                )
            }
        }

        (
            State::Repairing {
                attempt,
                max_attempts,
                run_tests,
            },
            Event::RepairComplete { fixes },
        ) => {
            if attempt >= max_attempts {
                (
                    State::BuildFailed { attempts: attempt },
                    vec![notify(format!(
                        "Applied {} fix(es); retry budget of {} exhausted",
                        fixes, max_attempts
                    ))],
                )
            } else {
                let next = attempt + 1;
                (
                    State::Building {
                        attempt: next,
                        max_attempts,
                        run_tests,
                    },
                    vec![
                        notify(format!("Applied {} fix(es), rebuilding", fixes)),
                        Action::CleanAndBuild { attempt: next },
                    ],
                )
            }
        }

        (State::Testing, Event::TestsFinished) => (
            State::Done { tested: true },
            vec![notify("Tests finished")],
        ),

        (state, event) => {
            let error = format!("Invalid transition from {} on {:?}", state.name(), event);
            (
                State::Aborted {
                    error: error.clone(),
                },
                vec![notify(error)],
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn building(attempt: u32, max_attempts: u32) -> State {
        State::Building {
            attempt,
            max_attempts,
            run_tests: false,
        }
    }

    #[test]
    fn test_start_plans() {
        let (state, actions) = transition(
            State::Idle,
            Event::Start {
                max_attempts: 3,
                run_tests: false,
            },
        );
        assert_eq!(
            state,
            State::Planning {
                max_attempts: 3,
                run_tests: false
            }
        );
        assert!(actions.contains(&Action::Plan));
    }

    #[test]
    fn test_zero_budget_clamped() {
        let (state, _) = transition(
            State::Idle,
            Event::Start {
                max_attempts: 0,
                run_tests: false,
            },
        );
        assert_eq!(
            state,
            State::Planning {
                max_attempts: 1,
                run_tests: false
            }
        );
    }

    #[test]
    fn test_references_force_tests() {
        let (state, actions) = transition(
            State::Planning {
                max_attempts: 3,
                run_tests: false,
            },
            Event::Planned {
                items: 2,
                references: true,
            },
        );
        assert_eq!(
            state,
            State::Applying {
                max_attempts: 3,
                run_tests: true
            }
        );
        assert!(actions.contains(&Action::Apply));

        let (state, actions) = transition(
            State::Building {
                attempt: 1,
                max_attempts: 3,
                run_tests: true,
            },
            Event::BuildSucceeded,
        );
        assert_eq!(state, State::Testing);
        assert!(actions.contains(&Action::RunTests));
    }

    #[test]
    fn test_planning_error_is_terminal() {
        let (state, actions) = transition(
            State::Planning {
                max_attempts: 3,
                run_tests: false,
            },
            Event::PlanningError {
                message: "no model".to_string(),
            },
        );
        assert!(state.is_terminal());
        assert_eq!(state.name(), "planning_failed");
        assert!(!actions.contains(&Action::Apply));
    }

    #[test]
    fn test_success_stops_building() {
        let (state, actions) = transition(building(2, 3), Event::BuildSucceeded);
        assert_eq!(state, State::Done { tested: false });
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::CleanAndBuild { .. })));
    }

    #[test]
    fn test_failure_diagnoses_then_rebuilds() {
        let (state, actions) = transition(building(1, 3), Event::BuildFailed { diagnostics: 2 });
        assert_eq!(state.name(), "repairing");
        assert!(actions.contains(&Action::Diagnose { attempt: 1 }));

        let (state, actions) = transition(state, Event::RepairComplete { fixes: 2 });
        assert_eq!(state, building(2, 3));
        assert!(actions.contains(&Action::CleanAndBuild { attempt: 2 }));
    }

    #[test]
    fn test_final_attempt_repairs_then_gives_up() {
        let (state, actions) = transition(building(3, 3), Event::BuildFailed { diagnostics: 1 });
        assert!(actions.contains(&Action::Diagnose { attempt: 3 }));

        let (state, actions) = transition(state, Event::RepairComplete { fixes: 1 });
        assert_eq!(state, State::BuildFailed { attempts: 3 });
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::CleanAndBuild { .. })));
    }

    #[test]
    fn test_attempt_error_retries_until_final() {
        let error = || Event::AttemptError {
            message: "compiler crashed".to_string(),
        };

        let (state, actions) = transition(building(1, 3), error());
        assert_eq!(state, building(2, 3));
        assert!(actions.contains(&Action::CleanAndBuild { attempt: 2 }));

        let (state, _) = transition(building(3, 3), error());
        assert_eq!(
            state,
            State::Aborted {
                error: "compiler crashed".to_string()
            }
        );
    }

    #[test]
    fn test_cancel_from_any_active_state() {
        let (state, _) = transition(building(2, 3), Event::Cancel);
        assert_eq!(state, State::Cancelled { stage: "building" });

        let (state, _) = transition(State::Testing, Event::Cancel);
        assert_eq!(state, State::Cancelled { stage: "testing" });
    }

    #[test]
    fn test_invalid_transition_aborts() {
        let (state, _) = transition(State::Idle, Event::BuildSucceeded);
        assert_eq!(state.name(), "aborted");

        let (state, _) = transition(State::Done { tested: false }, Event::Cancel);
        assert_eq!(state.name(), "aborted");
    }

    #[test]
    fn test_attempt_numbers() {
        assert_eq!(building(2, 3).attempt(), Some(2));
        assert_eq!(State::BuildFailed { attempts: 3 }.attempt(), Some(3));
        assert_eq!(State::Testing.attempt(), None);
    }
}
