//! Scripted collaborators that count their calls

#![allow(dead_code)]

use async_trait::async_trait;
use kiln_agent::Planner;
use kiln_core::{BuildOutcome, ChangeSet, Diagnostic, KilnError, PipelineConfig, Result};
use kiln_orchestrator::{CancellationToken, Orchestrator};
use kiln_project::{AffinityGuard, ApplyReport, BuildDriver, ItemAction, ItemOutcome, ProjectMutator};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn diag(file: &str, line: usize, message: &str) -> Diagnostic {
    Diagnostic::error(file, line, message)
}

pub fn failed(diagnostics: Vec<Diagnostic>) -> Result<BuildOutcome> {
    Ok(BuildOutcome::failed(diagnostics, Duration::from_millis(10)))
}

pub fn succeeded() -> Result<BuildOutcome> {
    Ok(BuildOutcome::succeeded(Duration::from_millis(10)))
}

fn count(counter: &AtomicUsize) -> usize {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

/// Planner returning a fixed plan and a queue of fixes
#[derive(Default)]
pub struct ScriptedPlanner {
    plan: Mutex<Option<Result<ChangeSet>>>,
    fixes: Mutex<VecDeque<Result<String>>>,
    direct: Mutex<Option<Result<String>>>,
    pub analyze_calls: AtomicUsize,
    pub fix_calls: AtomicUsize,
    pub direct_calls: AtomicUsize,
    pub diagnosed: Mutex<Vec<Diagnostic>>,
}

impl ScriptedPlanner {
    pub fn new(changes: ChangeSet) -> Self {
        Self {
            plan: Mutex::new(Some(Ok(changes))),
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plan: Mutex::new(Some(Err(KilnError::Planner(message.to_string())))),
            ..Default::default()
        }
    }

    /// Fixes returned in order; once drained every diagnosis returns ""
    pub fn with_fixes(self, fixes: Vec<Result<String>>) -> Self {
        *self.fixes.lock().unwrap() = fixes.into();
        self
    }

    pub fn with_direct(self, answer: Result<String>) -> Self {
        *self.direct.lock().unwrap() = Some(answer);
        self
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn fix_calls(&self) -> usize {
        self.fix_calls.load(Ordering::SeqCst)
    }

    pub fn diagnosed(&self) -> Vec<Diagnostic> {
        self.diagnosed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn analyze_request(&self, _request: &str) -> Result<ChangeSet> {
        count(&self.analyze_calls);
        self.plan
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(ChangeSet::new()))
    }

    async fn get_error_fix(&self, diagnostic: &Diagnostic) -> Result<String> {
        count(&self.fix_calls);
        self.diagnosed.lock().unwrap().push(diagnostic.clone());
        self.fixes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }

    async fn get_direct_response(&self, _request: &str) -> Result<String> {
        count(&self.direct_calls);
        self.direct
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(KilnError::Api("no answer scripted".to_string())))
    }
}

/// Build driver replaying scripted outcomes; succeeds once the script is drained
#[derive(Default)]
pub struct ScriptedBuilder {
    outcomes: Mutex<VecDeque<Result<BuildOutcome>>>,
    tests: Mutex<Option<Result<bool>>>,
    /// Cancel this token right after the nth build call returns
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    build_delay: Option<Duration>,
    pub clean_calls: AtomicUsize,
    pub build_calls: AtomicUsize,
    pub test_calls: AtomicUsize,
}

impl ScriptedBuilder {
    pub fn new(outcomes: Vec<Result<BuildOutcome>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        }
    }

    pub fn with_tests(self, result: Result<bool>) -> Self {
        *self.tests.lock().unwrap() = Some(result);
        self
    }

    pub fn cancel_after(self, builds: usize, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((builds, token));
        self
    }

    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    pub fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    pub fn clean_calls(&self) -> usize {
        self.clean_calls.load(Ordering::SeqCst)
    }

    pub fn test_calls(&self) -> usize {
        self.test_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildDriver for ScriptedBuilder {
    async fn clean(&self) -> Result<()> {
        count(&self.clean_calls);
        Ok(())
    }

    async fn build(&self) -> Result<BuildOutcome> {
        let call = count(&self.build_calls);
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(succeeded);

        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *after == call {
                token.cancel();
            }
        }
        outcome
    }

    async fn run_tests(&self) -> Result<bool> {
        count(&self.test_calls);
        self.tests.lock().unwrap().take().unwrap_or(Ok(true))
    }
}

/// Mutator that records change-sets, optionally delegating to a real one
#[derive(Default)]
pub struct CountingMutator {
    inner: Option<Arc<dyn ProjectMutator>>,
    fail_items: bool,
    pub calls: AtomicUsize,
    pub applied: Mutex<Vec<ChangeSet>>,
}

impl CountingMutator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapping(inner: Arc<dyn ProjectMutator>) -> Self {
        Self {
            inner: Some(inner),
            ..Default::default()
        }
    }

    /// Every item fails with `FileExists`
    pub fn failing_items() -> Self {
        Self {
            fail_items: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> Vec<ChangeSet> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProjectMutator for CountingMutator {
    async fn apply_change_set(
        &self,
        guard: &AffinityGuard,
        changes: &ChangeSet,
    ) -> Result<ApplyReport> {
        count(&self.calls);
        self.applied.lock().unwrap().push(changes.clone());

        if let Some(inner) = &self.inner {
            return inner.apply_change_set(guard, changes).await;
        }

        let items = changes
            .items
            .iter()
            .map(|item| ItemOutcome {
                kind: item.kind(),
                target: item.target().to_string(),
                result: if self.fail_items {
                    Err(KilnError::FileExists(item.target().to_string()))
                } else {
                    Ok(ItemAction::Modified)
                },
            })
            .collect();
        Ok(ApplyReport { items })
    }
}

pub struct Harness {
    pub planner: Arc<ScriptedPlanner>,
    pub mutator: Arc<CountingMutator>,
    pub builder: Arc<ScriptedBuilder>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(planner: ScriptedPlanner, mutator: CountingMutator, builder: ScriptedBuilder) -> Self {
        Self::with_config(planner, mutator, builder, PipelineConfig::default())
    }

    pub fn with_config(
        planner: ScriptedPlanner,
        mutator: CountingMutator,
        builder: ScriptedBuilder,
        config: PipelineConfig,
    ) -> Self {
        let planner = Arc::new(planner);
        let mutator = Arc::new(mutator);
        let builder = Arc::new(builder);
        let orchestrator = Arc::new(Orchestrator::new(
            planner.clone(),
            mutator.clone(),
            builder.clone(),
            config,
        ));
        Self {
            planner,
            mutator,
            builder,
            orchestrator,
        }
    }
}
