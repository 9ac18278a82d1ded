//! Build driver - clean, build and test a project
//!
//! Build and test calls can run for an unbounded time. Child processes are spawned
//! with `kill_on_drop`, so a caller that stops awaiting (e.g. on cancellation) also
//! stops the compiler.

use async_trait::async_trait;
use kiln_core::{BuildCommands, BuildOutcome, KilnConfig, KilnError, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::diagnostics::parse_diagnostics;

/// Maximum characters of raw output kept in error messages
const OUTPUT_PREVIEW_CHARS: usize = 4000;

/// Build driver contract
#[async_trait]
pub trait BuildDriver: Send + Sync {
    async fn clean(&self) -> Result<()>;

    /// Build and report diagnostics in discovery order
    async fn build(&self) -> Result<BuildOutcome>;

    /// Run the test suite; `Ok(false)` means tests ran and failed
    async fn run_tests(&self) -> Result<bool>;
}

/// Output of one external command
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// [`BuildDriver`] that shells out to configured or detected commands
#[derive(Debug, Clone)]
pub struct CommandBuildDriver {
    root: PathBuf,
    commands: BuildCommands,
}

impl CommandBuildDriver {
    pub fn new(root: impl Into<PathBuf>, commands: BuildCommands) -> Self {
        Self {
            root: root.into(),
            commands,
        }
    }

    /// Resolve commands from configuration and project language
    pub fn from_config(config: &KilnConfig, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let commands = config.build_commands(&root)?;
        Ok(Self::new(root, commands))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn commands(&self) -> &BuildCommands {
        &self.commands
    }

    async fn run_command(&self, command_line: &str) -> Result<CommandOutput> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| KilnError::Build("Empty command".to_string()))?;
        let args: Vec<&str> = parts.collect();

        debug!("Running {} {:?} in {}", program, args, self.root.display());

        let output = Command::new(program)
            .args(&args)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| KilnError::Build(format!("Failed to run {}: {}", command_line, e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl BuildDriver for CommandBuildDriver {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn clean(&self) -> Result<()> {
        let Some(clean) = &self.commands.clean else {
            debug!("No clean command configured, skipping");
            return Ok(());
        };

        let output = self.run_command(clean).await?;
        if !output.success {
            return Err(KilnError::Build(format!(
                "{} failed:\n{}",
                clean,
                truncate(output.stderr.trim(), OUTPUT_PREVIEW_CHARS)
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn build(&self) -> Result<BuildOutcome> {
        let started = Instant::now();
        let output = self.run_command(&self.commands.build).await?;
        let diagnostics = parse_diagnostics(&output.combined(), &self.root);

        let outcome = BuildOutcome::new(output.success, diagnostics, started.elapsed());
        if !outcome.success && outcome.diagnostics.is_empty() {
            warn!(
                "{} failed without parseable diagnostics:\n{}",
                self.commands.build,
                truncate(output.combined().trim(), OUTPUT_PREVIEW_CHARS)
            );
        }

        info!("Build {}", outcome.summary());
        Ok(outcome)
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn run_tests(&self) -> Result<bool> {
        let Some(test) = &self.commands.test else {
            return Err(KilnError::Build("No test command configured".to_string()));
        };

        let output = self.run_command(test).await?;
        if !output.success {
            warn!(
                "{} failed:\n{}",
                test,
                truncate(output.combined().trim(), OUTPUT_PREVIEW_CHARS)
            );
        }
        Ok(output.success)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max).collect();
        format!("{}...[truncated]", head)
    } else {
        s.to_string()
    }
}
