//! Planner contract and the model-backed implementation

use async_trait::async_trait;
use kiln_core::{ChangeSet, Diagnostic, KilnError, ModificationMode, Result};
use std::path::PathBuf;
use tracing::{debug, info, instrument};

use crate::client::AgentClient;
use crate::parse::{parse_change_set, parse_fix};
use crate::prompt::{
    build_chat_prompt, build_fix_prompt, build_plan_prompt, fix_system_prompt,
    CHAT_SYSTEM_PROMPT, PLAN_SYSTEM_PROMPT,
};

/// Turns requests into change-sets and diagnostics into fixes
///
/// Every call is independent. Implementations must not rely on earlier calls.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan the edits for a change request
    async fn analyze_request(&self, request: &str) -> Result<ChangeSet>;

    /// Fix text for the diagnosed line; empty means "no fix"
    ///
    /// It is applied as a modification of that line, so under whole-file replacement it
    /// must be the complete corrected file.
    async fn get_error_fix(&self, diagnostic: &Diagnostic) -> Result<String>;

    /// Conversational answer, never applied to the project
    async fn get_direct_response(&self, request: &str) -> Result<String>;
}

/// [`Planner`] backed by an Anthropic model
#[derive(Debug, Clone)]
pub struct AgentPlanner {
    client: AgentClient,
    root: PathBuf,
    files: Vec<String>,
    mode: ModificationMode,
}

impl AgentPlanner {
    pub fn new(client: AgentClient, root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            root: root.into(),
            files: Vec::new(),
            mode: ModificationMode::default(),
        }
    }

    /// Project files listed in planning prompts
    pub fn with_file_listing(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_mode(mut self, mode: ModificationMode) -> Self {
        self.mode = mode;
        self
    }

    async fn read_diagnosed_file(&self, diagnostic: &Diagnostic) -> Option<String> {
        let path = self.root.join(&diagnostic.file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("Could not read {} for diagnosis: {}", path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl Planner for AgentPlanner {
    #[instrument(skip(self, request), fields(model = %self.client.model()))]
    async fn analyze_request(&self, request: &str) -> Result<ChangeSet> {
        if request.trim().is_empty() {
            return Err(KilnError::Planner("Empty request".to_string()));
        }

        let prompt = build_plan_prompt(request, &self.files, self.mode);
        let result = self.client.complete(Some(PLAN_SYSTEM_PROMPT), &prompt).await?;
        let changes = parse_change_set(&result.output);

        info!("Planned {} change(s)", changes.len());
        Ok(changes)
    }

    #[instrument(skip(self), fields(file = %diagnostic.file, line = diagnostic.line))]
    async fn get_error_fix(&self, diagnostic: &Diagnostic) -> Result<String> {
        let content = self.read_diagnosed_file(diagnostic).await;
        let prompt = build_fix_prompt(diagnostic, content.as_deref(), self.mode);
        let result = self
            .client
            .complete(Some(fix_system_prompt(self.mode)), &prompt)
            .await?;
        Ok(finish_fix(parse_fix(&result.output), content.as_deref(), self.mode))
    }

    async fn get_direct_response(&self, request: &str) -> Result<String> {
        let result = self
            .client
            .complete(Some(CHAT_SYSTEM_PROMPT), &build_chat_prompt(request))
            .await?;
        Ok(result.output.trim().to_string())
    }
}

/// `parse_fix` trims newlines; a whole-file fix gets the file's trailing newline back
fn finish_fix(fix: String, original: Option<&str>, mode: ModificationMode) -> String {
    let wants_newline = mode == ModificationMode::Replace
        && original.is_some_and(|content| content.ends_with('\n'));
    if wants_newline && !fix.is_empty() && !fix.ends_with('\n') {
        format!("{}\n", fix)
    } else {
        fix
    }
}
