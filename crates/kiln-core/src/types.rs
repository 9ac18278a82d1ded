//! Core type definitions for the Kiln pipeline

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A free-text change request submitted by the user
///
/// Immutable once constructed; the pipeline only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    text: String,
}

impl ChangeRequest {
    /// Wrap request text. Returns `None` for empty or whitespace-only input.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            None
        } else {
            Some(Self { text })
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Display for ChangeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Where a code change lands inside the target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChangeTarget {
    /// 1-based inclusive line range
    Lines { start: usize, end: usize },
    /// First occurrence of a literal search pattern
    Search { pattern: String },
}

/// One replacement inside a file modification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    pub target: ChangeTarget,
    pub new_content: String,
}

impl CodeChange {
    pub fn at_lines(start: usize, end: usize, new_content: impl Into<String>) -> Self {
        Self {
            target: ChangeTarget::Lines { start, end },
            new_content: new_content.into(),
        }
    }

    pub fn at_pattern(pattern: impl Into<String>, new_content: impl Into<String>) -> Self {
        Self {
            target: ChangeTarget::Search {
                pattern: pattern.into(),
            },
            new_content: new_content.into(),
        }
    }
}

/// Create a new file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCreation {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub overwrite: bool,
}

/// Edit an existing file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModification {
    pub path: String,
    pub changes: Vec<CodeChange>,
}

/// Add a dependency to the current project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAddition {
    pub name: String,
}

/// A single item of a change-set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ChangeItem {
    Create(FileCreation),
    Modify(FileModification),
    Reference(ReferenceAddition),
}

impl ChangeItem {
    /// Path or reference name this item targets
    pub fn target(&self) -> &str {
        match self {
            Self::Create(c) => &c.path,
            Self::Modify(m) => &m.path,
            Self::Reference(r) => &r.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Modify(_) => "modify",
            Self::Reference(_) => "reference",
        }
    }
}

/// Ordered list of project edits produced by the planner
///
/// An empty change-set is a valid no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub items: Vec<ChangeItem>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_creation(
        mut self,
        path: impl Into<String>,
        content: impl Into<String>,
        overwrite: bool,
    ) -> Self {
        self.items.push(ChangeItem::Create(FileCreation {
            path: path.into(),
            content: content.into(),
            overwrite,
        }));
        self
    }

    pub fn with_modification(mut self, path: impl Into<String>, changes: Vec<CodeChange>) -> Self {
        self.items.push(ChangeItem::Modify(FileModification {
            path: path.into(),
            changes,
        }));
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>) -> Self {
        self.items.push(ChangeItem::Reference(ReferenceAddition { name: name.into() }));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether any item adds a project reference
    pub fn has_references(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, ChangeItem::Reference(_)))
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "fatal error" => Ok(Self::Error),
            "warning" => Ok(Self::Warning),
            "info" | "note" | "help" => Ok(Self::Info),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// One build-time error or warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Project-relative file path
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            column: 0,
            severity: Severity::Error,
            code: None,
            message: message.into(),
        }
    }

    pub fn warning(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(file, line, message)
        }
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = column;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}: {}", self.file, self.line, self.column, self.severity)?;
        if let Some(code) = &self.code {
            write!(f, "[{}]", code)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Result of one clean+build invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Never true while an error-severity diagnostic is present
    pub success: bool,
    /// Diagnostics in discovery order
    pub diagnostics: Vec<Diagnostic>,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl BuildOutcome {
    /// Build an outcome from the driver's exit status and parsed diagnostics
    pub fn new(exit_success: bool, diagnostics: Vec<Diagnostic>, elapsed: Duration) -> Self {
        let success = exit_success && !diagnostics.iter().any(Diagnostic::is_error);
        Self {
            success,
            diagnostics,
            elapsed,
            cancelled: false,
        }
    }

    pub fn succeeded(elapsed: Duration) -> Self {
        Self::new(true, Vec::new(), elapsed)
    }

    pub fn failed(diagnostics: Vec<Diagnostic>, elapsed: Duration) -> Self {
        Self {
            success: false,
            diagnostics,
            elapsed,
            cancelled: false,
        }
    }

    pub fn cancelled(elapsed: Duration) -> Self {
        Self {
            success: false,
            diagnostics: Vec::new(),
            elapsed,
            cancelled: true,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn summary(&self) -> String {
        if self.cancelled {
            return "cancelled".to_string();
        }
        let warnings = self.diagnostics.len() - self.error_count();
        format!(
            "{} ({} errors, {} warnings, {:.1}s)",
            if self.success { "succeeded" } else { "failed" },
            self.error_count(),
            warnings,
            self.elapsed.as_secs_f64()
        )
    }
}

/// A fix proposed for one diagnostic during a repair round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub diagnostic: Diagnostic,
    pub replacement: String,
    pub path: String,
    pub line: usize,
    /// Whether the mutator wrote the fix
    pub applied: bool,
}

impl FixAttempt {
    pub fn new(diagnostic: Diagnostic, replacement: impl Into<String>) -> Self {
        Self {
            path: diagnostic.file.clone(),
            line: diagnostic.line,
            diagnostic,
            replacement: replacement.into(),
            applied: false,
        }
    }

    /// The single-line modification that carries this fix
    pub fn to_change_set(&self) -> ChangeSet {
        ChangeSet::new().with_modification(
            self.path.clone(),
            vec![CodeChange::at_lines(
                self.line,
                self.line,
                self.replacement.clone(),
            )],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_request_rejects_blank() {
        assert!(ChangeRequest::new("").is_none());
        assert!(ChangeRequest::new("   \n\t").is_none());
        assert_eq!(ChangeRequest::new("add a button").unwrap().text(), "add a button");
    }

    #[test]
    fn test_build_outcome_success_requires_no_errors() {
        let outcome = BuildOutcome::new(
            true,
            vec![Diagnostic::error("src/lib.rs", 3, "mismatched types")],
            Duration::from_millis(10),
        );
        assert!(!outcome.success);

        let outcome = BuildOutcome::new(
            true,
            vec![Diagnostic::warning("src/lib.rs", 3, "unused variable")],
            Duration::from_millis(10),
        );
        assert!(outcome.success);
        assert_eq!(outcome.error_count(), 0);
    }

    #[test]
    fn test_change_set_builders() {
        let set = ChangeSet::new()
            .with_creation("src/a.rs", "fn a() {}", false)
            .with_reference("serde");
        assert_eq!(set.len(), 2);
        assert!(set.has_references());
        assert_eq!(set.items[0].target(), "src/a.rs");
        assert_eq!(set.items[1].kind(), "reference");
        assert!(ChangeSet::new().is_empty());
    }

    #[test]
    fn test_fix_attempt_targets_diagnostic_line() {
        let diag = Diagnostic::error("src/main.rs", 12, "cannot find value `x`");
        let fix = FixAttempt::new(diag, "let x = 1;");
        let set = fix.to_change_set();

        match &set.items[0] {
            ChangeItem::Modify(m) => {
                assert_eq!(m.path, "src/main.rs");
                assert_eq!(m.changes[0].target, ChangeTarget::Lines { start: 12, end: 12 });
                assert_eq!(m.changes[0].new_content, "let x = 1;");
            }
            other => panic!("Expected modification, got {:?}", other),
        }
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("error".parse::<Severity>().unwrap(), Severity::Error);
        assert_eq!("Warning".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("note".parse::<Severity>().unwrap(), Severity::Info);
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::error("src/lib.rs", 4, "oops")
            .with_column(9)
            .with_code("E0308");
        assert_eq!(diag.to_string(), "src/lib.rs:4:9: error[E0308]: oops");
    }
}
