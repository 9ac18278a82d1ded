//! Orchestrator - drives plan, apply, build and repair for one request at a time
//!
//! The control flow lives in [`transition`]; this module only executes the actions
//! it returns and turns their results into events. Every project-touching call runs
//! while the run holds the single-writer [`AffinityGuard`].

use kiln_agent::Planner;
use kiln_core::{
    BuildOutcome, ChangeRequest, ConcurrencyPolicy, Diagnostic, FixAttempt, PipelineConfig,
};
use kiln_project::{AffinityGuard, AffinityToken, BuildDriver, ProjectMutator};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::AutomationError;
use crate::progress::{ObserverRegistry, ProgressEvent, ProgressObserver, SubscriptionId};
use crate::run::{BuildAttempt, PipelineRun, RunOptions, TestStatus};
use crate::state_machine::{transition, Action, Event, State};

/// Returned by [`Orchestrator::get_direct_response`] when the planner cannot answer
pub const FALLBACK_RESPONSE: &str =
    "Sorry, I couldn't get an answer right now. Please try again in a moment.";

/// Ask `planner` for a conversational answer, falling back to [`FALLBACK_RESPONSE`]
///
/// Touches neither the project nor the affinity token, so it can run without a build
/// driver or alongside a pipeline run.
pub async fn direct_response(planner: &dyn Planner, request: &str) -> String {
    if request.trim().is_empty() {
        return FALLBACK_RESPONSE.to_string();
    }

    match planner.get_direct_response(request).await {
        Ok(answer) if !answer.trim().is_empty() => answer,
        Ok(_) => {
            warn!("Planner returned an empty direct response");
            FALLBACK_RESPONSE.to_string()
        }
        Err(e) => {
            warn!("Direct response failed: {}", e);
            FALLBACK_RESPONSE.to_string()
        }
    }
}

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    mutator: Arc<dyn ProjectMutator>,
    builder: Arc<dyn BuildDriver>,
    config: PipelineConfig,
    affinity: AffinityToken,
    observers: ObserverRegistry,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        mutator: Arc<dyn ProjectMutator>,
        builder: Arc<dyn BuildDriver>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            planner,
            mutator,
            builder,
            config,
            affinity: AffinityToken::new(),
            observers: ObserverRegistry::new(),
        }
    }

    /// Share a single-writer token with other users of the same project
    pub fn with_affinity(mut self, affinity: AffinityToken) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn affinity(&self) -> &AffinityToken {
        &self.affinity
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn subscribe(&self, observer: Arc<dyn ProgressObserver>) -> SubscriptionId {
        self.observers.subscribe(observer).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id).await
    }

    /// Run the pipeline with the configured policy and report only the outcome
    pub async fn process_request(&self, request: &str) -> Result<(), AutomationError> {
        self.run(request, RunOptions::default()).await?.into_result()
    }

    /// Start a run in the background
    pub fn spawn_request(
        self: &Arc<Self>,
        request: impl Into<String>,
        options: RunOptions,
    ) -> JoinHandle<Result<PipelineRun, AutomationError>> {
        let this = Arc::clone(self);
        let request = request.into();
        tokio::spawn(async move { this.run(&request, options).await })
    }

    /// Conversational answer that bypasses the pipeline; never fails
    pub async fn get_direct_response(&self, request: &str) -> String {
        direct_response(self.planner.as_ref(), request).await
    }

    /// Run the pipeline and return the full record
    ///
    /// `Err` only for requests that never started (`InvalidArgument`, `Busy`, or a
    /// cancellation while waiting for the project). Every started run returns `Ok`;
    /// use [`PipelineRun::into_result`] for the outcome.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        request: &str,
        options: RunOptions,
    ) -> Result<PipelineRun, AutomationError> {
        let request = ChangeRequest::new(request).ok_or_else(|| {
            AutomationError::InvalidArgument("request must not be empty".to_string())
        })?;

        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.max_build_attempts);
        if max_attempts == 0 {
            return Err(AutomationError::InvalidArgument(
                "max build attempts must be at least 1".to_string(),
            ));
        }
        let run_tests = options.run_tests.unwrap_or(self.config.run_tests);

        let guard = self.acquire(&options.cancel).await?;

        let mut run = PipelineRun::new(request, max_attempts);
        info!("Starting run {} ({} build attempt(s))", run.id, max_attempts);
        self.notify(&run, "started", 0, run.request.text().to_string())
            .await;

        self.drive(&mut run, &guard, &options.cancel, run_tests).await;
        run.finished_at = Some(chrono::Utc::now());

        info!("Run {} finished: {}", run.id, run.summary());
        Ok(run)
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<AffinityGuard, AutomationError> {
        match self.config.concurrency {
            ConcurrencyPolicy::Reject => self.affinity.try_acquire().ok_or_else(|| {
                warn!("Rejecting request, another run holds the project");
                AutomationError::Busy
            }),
            ConcurrencyPolicy::Wait => {
                if self.affinity.is_held() {
                    info!("Waiting for the running pipeline to release the project");
                }
                tokio::select! {
                    guard = self.affinity.acquire() => Ok(guard),
                    _ = cancel.cancelled() => Err(AutomationError::Cancelled {
                        stage: "waiting".to_string(),
                    }),
                }
            }
        }
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        guard: &AffinityGuard,
        cancel: &CancellationToken,
        run_tests: bool,
    ) {
        let (mut state, mut actions) = transition(
            State::Idle,
            Event::Start {
                max_attempts: run.budget.max(),
                run_tests,
            },
        );

        loop {
            run.state = state.clone();
            let mut next = None;

            for action in actions {
                match action {
                    Action::Notify { message } => {
                        let attempt = state.attempt().unwrap_or_else(|| run.budget.used());
                        self.notify(run, state.name(), attempt, message).await;
                    }
                    action => next = Some(self.execute(action, run, guard, cancel).await),
                }
            }

            if state.is_terminal() {
                break;
            }

            let event = next.unwrap_or_else(|| Event::AttemptError {
                message: format!("no action produced an event in {}", state.name()),
            });
            debug!("{} <- {:?}", state.name(), event);
            (state, actions) = transition(state, event);
        }
    }

    async fn execute(
        &self,
        action: Action,
        run: &mut PipelineRun,
        guard: &AffinityGuard,
        cancel: &CancellationToken,
    ) -> Event {
        if cancel.is_cancelled() {
            return Event::Cancel;
        }

        match action {
            Action::Plan => self.plan(run).await,
            Action::Apply => self.apply(run, guard).await,
            Action::CleanAndBuild { attempt } => self.build(run, attempt, cancel).await,
            Action::Diagnose { attempt } => self.repair(run, attempt, guard, cancel).await,
            Action::RunTests => self.test(run, cancel).await,
            Action::Notify { .. } => Event::AttemptError {
                message: "notify is not executable".to_string(),
            },
        }
    }

    async fn plan(&self, run: &mut PipelineRun) -> Event {
        match self.planner.analyze_request(run.request.text()).await {
            Ok(changes) => {
                let event = Event::Planned {
                    items: changes.len(),
                    references: changes.has_references(),
                };
                run.change_set = Some(changes);
                event
            }
            Err(e) => {
                warn!("Planning failed: {}", e);
                let message = e.to_string();
                run.failure = Some(e);
                Event::PlanningError { message }
            }
        }
    }

    async fn apply(&self, run: &mut PipelineRun, guard: &AffinityGuard) -> Event {
        let changes = run.change_set.clone().unwrap_or_default();

        match self.mutator.apply_change_set(guard, &changes).await {
            Ok(report) => {
                let event = if report.has_failures() {
                    let failed: Vec<String> = report
                        .failed()
                        .map(|item| format!("{} {}", item.kind, item.target))
                        .collect();
                    Event::ApplyError {
                        message: format!("{} ({})", report.summary(), failed.join(", ")),
                    }
                } else {
                    Event::Applied {
                        items: report.items.len(),
                    }
                };
                run.apply_report = Some(report);
                event
            }
            Err(e) => {
                warn!("Applying changes failed: {}", e);
                let message = e.to_string();
                run.failure = Some(e);
                Event::ApplyError { message }
            }
        }
    }

    async fn build(&self, run: &mut PipelineRun, attempt: u32, cancel: &CancellationToken) -> Event {
        if run.budget.consume().is_none() {
            return Event::AttemptError {
                message: format!("retry budget exhausted before attempt {}", attempt),
            };
        }
        let final_attempt = run.budget.is_exhausted();
        run.attempts.push(BuildAttempt::new(attempt));

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = async {
                self.builder.clean().await?;
                self.builder.build().await
            } => Some(result),
        };

        let Some(current) = run.current_attempt_mut() else {
            return Event::AttemptError {
                message: "attempt record missing".to_string(),
            };
        };

        match result {
            None => {
                current.outcome = Some(BuildOutcome::cancelled(started.elapsed()));
                Event::Cancel
            }
            Some(Ok(outcome)) => {
                // Error diagnostics fail the build even when the driver reported success
                let event = if outcome.success && outcome.error_count() == 0 {
                    Event::BuildSucceeded
                } else {
                    Event::BuildFailed {
                        diagnostics: outcome.diagnostics.len(),
                    }
                };
                current.outcome = Some(outcome);
                event
            }
            Some(Err(e)) => {
                warn!("Build attempt {} errored: {}", attempt, e);
                let message = e.to_string();
                current.error = Some(message.clone());
                if final_attempt {
                    run.failure = Some(e);
                }
                Event::AttemptError { message }
            }
        }
    }

    fn diagnostics_to_fix(&self, run: &PipelineRun) -> Vec<Diagnostic> {
        let Some(outcome) = run.attempts.last().and_then(|a| a.outcome.as_ref()) else {
            return Vec::new();
        };
        outcome
            .diagnostics
            .iter()
            .filter(|d| self.config.diagnose_warnings || d.is_error())
            .cloned()
            .collect()
    }

    /// Diagnose and fix in build order, one fix at a time
    async fn repair(
        &self,
        run: &mut PipelineRun,
        attempt: u32,
        guard: &AffinityGuard,
        cancel: &CancellationToken,
    ) -> Event {
        let diagnostics = self.diagnostics_to_fix(run);
        let mut applied = 0;

        for diagnostic in diagnostics {
            if cancel.is_cancelled() {
                return Event::Cancel;
            }

            let replacement = match self.planner.get_error_fix(&diagnostic).await {
                Ok(fix) => fix,
                Err(e) => {
                    warn!("Diagnosis failed for {}: {}", diagnostic, e);
                    continue;
                }
            };
            if replacement.trim().is_empty() {
                debug!("No fix proposed for {}", diagnostic);
                continue;
            }

            if cancel.is_cancelled() {
                return Event::Cancel;
            }

            let mut fix = FixAttempt::new(diagnostic, replacement);
            match self.mutator.apply_change_set(guard, &fix.to_change_set()).await {
                Ok(report) if !report.has_failures() => {
                    fix.applied = true;
                    applied += 1;
                    self.notify(
                        run,
                        "repairing",
                        attempt,
                        format!("Fixed {}:{}", fix.path, fix.line),
                    )
                    .await;
                }
                Ok(report) => warn!(
                    "Fix for {}:{} not applied: {}",
                    fix.path,
                    fix.line,
                    report.summary()
                ),
                Err(e) => warn!("Fix for {}:{} not applied: {}", fix.path, fix.line, e),
            }

            if let Some(current) = run.current_attempt_mut() {
                current.fixes.push(fix);
            }
        }

        Event::RepairComplete { fixes: applied }
    }

    async fn test(&self, run: &mut PipelineRun, cancel: &CancellationToken) -> Event {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Event::Cancel,
            result = self.builder.run_tests() => result,
        };

        run.tests = match result {
            Ok(true) => TestStatus::Passed,
            Ok(false) => TestStatus::Failed,
            Err(e) => TestStatus::Errored(e.to_string()),
        };
        if let Some(advisory) = run.test_failure() {
            warn!("{} (advisory)", advisory);
        }
        Event::TestsFinished
    }

    async fn notify(&self, run: &PipelineRun, stage: &'static str, attempt: u32, message: String) {
        let event = ProgressEvent {
            run_id: run.id,
            stage,
            attempt,
            max_attempts: run.budget.max(),
            message,
            timestamp: chrono::Utc::now(),
        };
        self.observers.emit(&event).await;
    }
}
