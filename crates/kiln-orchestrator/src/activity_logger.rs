//! Activity Logger - human-readable run log in `.kiln/activity.md`
//!
//! Subscribed as a [`ProgressObserver`]. Every write is fail-open: a full disk or a
//! read-only project never affects the run being logged.

use async_trait::async_trait;
use chrono::Utc;
use kiln_core::fail_open::fail_open;
use kiln_core::Result;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::progress::{ProgressEvent, ProgressObserver};
use crate::run::{PipelineRun, TestStatus};

/// Maximum characters of a request echoed into the log heading
const HEADING_PREVIEW_CHARS: usize = 120;

pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    /// Log into `<kiln_dir>/activity.md`
    pub fn new(kiln_dir: impl AsRef<Path>) -> Self {
        Self {
            output_path: kiln_dir.as_ref().join("activity.md"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Append a closing summary for a finished run
    pub async fn log_summary(&self, run: &PipelineRun) {
        fail_open("activity_logger::log_summary", || async {
            let mut content = format!("\n**Result**: {}\n", run.summary());

            if let Some(report) = &run.apply_report {
                content.push_str(&format!("**Changes**: {}\n", report.summary()));
                for item in report.failed() {
                    if let Err(e) = &item.result {
                        content.push_str(&format!("- Failed {} `{}`: {}\n", item.kind, item.target, e));
                    }
                }
            }

            let fixes: Vec<_> = run.fixes().collect();
            if !fixes.is_empty() {
                content.push_str("**Fixes**:\n");
                for fix in fixes {
                    content.push_str(&format!(
                        "- {}:{} {}\n",
                        fix.path,
                        fix.line,
                        if fix.applied { "applied" } else { "not applied" }
                    ));
                }
            }

            if let TestStatus::Errored(message) = &run.tests {
                content.push_str(&format!("**Test error**: {}\n", message));
            }

            content.push_str("\n---\n");
            self.append(&content).await
        })
        .await;
    }

    async fn append(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn format_event(event: &ProgressEvent) -> String {
    let time = event.timestamp.format("%H:%M:%S");

    if event.stage == "started" {
        let heading: String = event
            .message
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(HEADING_PREVIEW_CHARS)
            .collect();
        return format!(
            "\n## Run: {}\n**Started**: {}\n**Run ID**: {}\n**Max Attempts**: {}\n\n",
            heading,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            event.run_id,
            event.max_attempts
        );
    }

    if event.attempt > 0 {
        format!(
            "- `{}` **{}** ({}/{}): {}\n",
            time, event.stage, event.attempt, event.max_attempts, event.message
        )
    } else {
        format!("- `{}` **{}**: {}\n", time, event.stage, event.message)
    }
}

#[async_trait]
impl ProgressObserver for ActivityLogger {
    async fn on_event(&self, event: &ProgressEvent) {
        let content = format_event(event);
        fail_open("activity_logger::on_event", || self.append(&content)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::ChangeRequest;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn event(stage: &'static str, attempt: u32, message: &str) -> ProgressEvent {
        ProgressEvent {
            run_id: Uuid::new_v4(),
            stage,
            attempt,
            max_attempts: 3,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_events_are_appended() {
        let dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(dir.path().join(".kiln"));

        logger.on_event(&event("started", 0, "add a logger\nwith details")).await;
        logger.on_event(&event("planning", 0, "Planning changes")).await;
        logger.on_event(&event("building", 1, "Build attempt 1/3 failed")).await;

        let content = std::fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("## Run: add a logger\n"));
        assert!(!content.contains("with details"));
        assert!(content.contains("**planning**: Planning changes"));
        assert!(content.contains("**building** (1/3): Build attempt 1/3 failed"));
    }

    #[tokio::test]
    async fn test_summary() {
        let dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(dir.path());
        let mut run = PipelineRun::new(ChangeRequest::new("x").unwrap(), 3);
        run.state = crate::state_machine::State::Done { tested: false };

        logger.log_summary(&run).await;
        let content = std::fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("**Result**: done after 0 build(s)"));
    }

    #[tokio::test]
    async fn test_unwritable_path_fails_open() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let logger = ActivityLogger::new(&blocker);
        logger.on_event(&event("planning", 0, "ignored")).await;
        assert!(!logger.path().exists());
    }
}
