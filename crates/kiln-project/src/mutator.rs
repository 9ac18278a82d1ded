//! Project mutator - applies change-sets to a project tree
//!
//! Every item of a change-set is attempted independently. A failed item is recorded
//! in the [`ApplyReport`] and never stops the remaining items; nothing is rolled back.

use async_trait::async_trait;
use kiln_core::{
    ChangeItem, ChangeSet, ChangeTarget, CodeChange, FileCreation, FileModification, KilnError,
    ModificationMode, ReferenceAddition, Result,
};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::affinity::{AffinityGuard, AffinityToken};
use crate::tree::ProjectTree;

/// What happened to a successfully applied item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    Created,
    Overwritten,
    Modified,
    ReferenceAdded,
    /// The reference was already a dependency
    ReferencePresent,
}

/// Result of applying one change-set item
#[derive(Debug)]
pub struct ItemOutcome {
    pub kind: &'static str,
    pub target: String,
    pub result: std::result::Result<ItemAction, KilnError>,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-item report of one `apply_change_set` call, in change-set order
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub items: Vec<ItemOutcome>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| i.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| !i.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Generate a summary string
    pub fn summary(&self) -> String {
        let count = |action: ItemAction| {
            self.items
                .iter()
                .filter(|i| matches!(i.result, Ok(a) if a == action))
                .count()
        };

        let mut parts = Vec::new();
        let created = count(ItemAction::Created) + count(ItemAction::Overwritten);
        if created > 0 {
            parts.push(format!("{} created", created));
        }
        let modified = count(ItemAction::Modified);
        if modified > 0 {
            parts.push(format!("{} modified", modified));
        }
        let references = count(ItemAction::ReferenceAdded) + count(ItemAction::ReferencePresent);
        if references > 0 {
            parts.push(format!("{} references", references));
        }
        let failed = self.failed().count();
        if failed > 0 {
            parts.push(format!("{} failed", failed));
        }

        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Applies change-sets to a project
#[async_trait]
pub trait ProjectMutator: Send + Sync {
    /// Apply every item of `changes`, requiring the single-writer guard
    ///
    /// A guard from a token the mutator is not bound to is an error, and nothing is
    /// applied. An unbound mutator accepts any guard.
    async fn apply_change_set(
        &self,
        guard: &AffinityGuard,
        changes: &ChangeSet,
    ) -> Result<ApplyReport>;
}

/// [`ProjectMutator`] writing to a project directory on disk
pub struct WorkspaceMutator<T: ProjectTree> {
    root: PathBuf,
    tree: T,
    mode: ModificationMode,
    protected_files: Vec<String>,
    affinity: Option<AffinityToken>,
}

impl<T: ProjectTree> WorkspaceMutator<T> {
    pub fn new(root: impl Into<PathBuf>, tree: T) -> Self {
        Self {
            root: root.into(),
            tree,
            mode: ModificationMode::default(),
            protected_files: Vec::new(),
            affinity: None,
        }
    }

    /// Only accept guards acquired from `token`
    pub fn with_affinity(mut self, token: AffinityToken) -> Self {
        self.affinity = Some(token);
        self
    }

    pub fn with_mode(mut self, mode: ModificationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_protected_files(mut self, protected: Vec<String>) -> Self {
        self.protected_files = protected;
        self
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = validate_path(path, &self.protected_files)?;
        Ok(self.root.join(relative))
    }

    async fn ensure_parent(&self, relative: &str, full: &Path) -> Result<()> {
        let Some(parent) = full.parent() else {
            return Ok(());
        };
        if parent.exists() {
            return Ok(());
        }

        let folder = Path::new(relative)
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        match self.tree.current_project() {
            Some(project) if !folder.is_empty() => self.tree.add_folder(&project, &folder)?,
            _ => tokio::fs::create_dir_all(parent).await?,
        }
        debug!("Created directory: {}", parent.display());
        Ok(())
    }

    async fn create_file(&self, creation: &FileCreation) -> Result<ItemAction> {
        let path = self.resolve(&creation.path)?;
        let exists = tokio::fs::try_exists(&path).await?;

        if exists && !creation.overwrite {
            return Err(KilnError::FileExists(creation.path.clone()));
        }

        self.ensure_parent(&creation.path, &path).await?;
        tokio::fs::write(&path, &creation.content).await?;

        if exists {
            info!("Overwrote file: {}", creation.path);
            Ok(ItemAction::Overwritten)
        } else {
            info!("Created file: {}", creation.path);
            Ok(ItemAction::Created)
        }
    }

    async fn modify_file(&self, modification: &FileModification) -> Result<ItemAction> {
        let path = self.resolve(&modification.path)?;

        let (content, action) = match self.mode {
            // The replacement is authoritative for the whole file; line ranges are not
            // merged against the existing content in this mode.
            ModificationMode::Replace => {
                let action = if tokio::fs::try_exists(&path).await? {
                    ItemAction::Modified
                } else {
                    ItemAction::Created
                };
                let content: String = modification
                    .changes
                    .iter()
                    .map(|c| c.new_content.as_str())
                    .collect();
                (content, action)
            }
            ModificationMode::Splice => {
                let original = tokio::fs::read_to_string(&path).await?;
                let content = splice_changes(&original, &modification.changes)
                    .map_err(|e| KilnError::Other(format!("{}: {}", modification.path, e)))?;
                (content, ItemAction::Modified)
            }
        };

        self.ensure_parent(&modification.path, &path).await?;
        tokio::fs::write(&path, content).await?;
        info!(
            "Modified file: {} ({} changes)",
            modification.path,
            modification.changes.len()
        );
        Ok(action)
    }

    fn add_reference(&self, reference: &ReferenceAddition) -> Result<ItemAction> {
        let project = self.tree.current_project().ok_or_else(|| {
            KilnError::ProjectNotFound(format!("cannot add reference {}", reference.name))
        })?;
        if !self.tree.project_exists(&project) {
            return Err(KilnError::ProjectNotFound(project));
        }

        let name = reference
            .name
            .split_once('@')
            .map(|(name, _)| name)
            .unwrap_or(&reference.name)
            .trim();
        if self
            .tree
            .project_dependencies(&project)?
            .iter()
            .any(|d| d == name)
        {
            debug!("Reference {} already present in {}", name, project);
            return Ok(ItemAction::ReferencePresent);
        }

        self.tree.add_reference(&project, &reference.name)?;
        Ok(ItemAction::ReferenceAdded)
    }
}

#[async_trait]
impl<T: ProjectTree> ProjectMutator for WorkspaceMutator<T> {
    #[instrument(skip_all, fields(items = changes.len()))]
    async fn apply_change_set(
        &self,
        guard: &AffinityGuard,
        changes: &ChangeSet,
    ) -> Result<ApplyReport> {
        if let Some(token) = &self.affinity {
            if !token.owns(guard) {
                return Err(KilnError::Project(
                    "Affinity guard belongs to a different project token".to_string(),
                ));
            }
        }

        let mut report = ApplyReport::default();

        for item in &changes.items {
            let result = match item {
                ChangeItem::Create(c) => self.create_file(c).await,
                ChangeItem::Modify(m) => self.modify_file(m).await,
                ChangeItem::Reference(r) => self.add_reference(r),
            };

            if let Err(e) = &result {
                warn!("Failed to apply {} {}: {}", item.kind(), item.target(), e);
            }

            report.items.push(ItemOutcome {
                kind: item.kind(),
                target: item.target().to_string(),
                result,
            });
        }

        debug!("Applied change-set: {}", report.summary());
        Ok(report)
    }
}

/// Validate that a path is a safe project-relative write target
pub fn validate_path(path: &str, protected_files: &[String]) -> Result<PathBuf> {
    if path.trim().is_empty() {
        return Err(KilnError::PathValidation("Empty path".to_string()));
    }

    let path = Path::new(path);

    if path.is_absolute() || path.has_root() {
        return Err(KilnError::PathValidation(format!(
            "Absolute paths not allowed: {}",
            path.display()
        )));
    }

    for component in path.components() {
        if let Component::ParentDir = component {
            return Err(KilnError::PathValidation(format!(
                "Path traversal not allowed: {}",
                path.display()
            )));
        }
    }

    for protected in protected_files {
        let hit = path.starts_with(protected)
            || path
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|name| name == protected);
        if hit {
            return Err(KilnError::PathValidation(format!(
                "Cannot write to protected file: {}",
                path.display()
            )));
        }
    }

    Ok(path.to_path_buf())
}

/// Apply code changes in order; each change sees the result of the previous one
fn splice_changes(original: &str, changes: &[CodeChange]) -> std::result::Result<String, String> {
    let trailing_newline = original.ends_with('\n');
    let mut content = original.to_string();

    for change in changes {
        content = match &change.target {
            ChangeTarget::Lines { start, end } => {
                let lines: Vec<&str> = content.lines().collect();
                let (start, end) = (*start, *end);
                // start == len + 1 appends after the last line
                if start == 0 || end < start || start > lines.len() + 1 || end > lines.len().max(start)
                {
                    return Err(format!(
                        "line range {}-{} outside file of {} lines",
                        start,
                        end,
                        lines.len()
                    ));
                }

                let tail_from = end.min(lines.len());
                let mut spliced: Vec<&str> = lines[..start - 1].to_vec();
                spliced.extend(change.new_content.lines());
                spliced.extend_from_slice(&lines[tail_from..]);
                spliced.join("\n")
            }
            ChangeTarget::Search { pattern } => {
                if pattern.is_empty() || !content.contains(pattern.as_str()) {
                    return Err(format!("pattern not found: {:?}", pattern));
                }
                content.replacen(pattern.as_str(), &change.new_content, 1)
            }
        };
    }

    if trailing_newline && !content.ends_with('\n') {
        content.push('\n');
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::AffinityToken;
    use crate::tree::CargoProjectTree;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        dir
    }

    fn mutator(dir: &TempDir) -> WorkspaceMutator<CargoProjectTree> {
        WorkspaceMutator::new(dir.path(), CargoProjectTree::new(dir.path()))
            .with_protected_files(vec![".git".to_string(), "Cargo.lock".to_string()])
    }

    #[tokio::test]
    async fn test_empty_change_set_is_noop() {
        let dir = project();
        let token = AffinityToken::new();
        let guard = token.acquire().await;

        let report = mutator(&dir)
            .apply_change_set(&guard, &ChangeSet::new())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(!report.has_failures());
        assert_eq!(report.summary(), "no changes");
    }

    #[tokio::test]
    async fn test_bound_mutator_rejects_foreign_guard() {
        let dir = project();
        let token = AffinityToken::new();
        let unrelated = AffinityToken::new();
        let bound = mutator(&dir).with_affinity(token.clone());
        let changes = ChangeSet::new().with_creation("notes.txt", "hi", false);

        let foreign = unrelated.acquire().await;
        let err = bound.apply_change_set(&foreign, &changes).await.unwrap_err();
        assert!(matches!(err, KilnError::Project(_)));
        assert!(!dir.path().join("notes.txt").exists());

        let guard = token.acquire().await;
        let report = bound.apply_change_set(&guard, &changes).await.unwrap();
        assert_eq!(report.succeeded().count(), 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_create_refuses_existing_without_overwrite() {
        let dir = project();
        std::fs::write(dir.path().join("README.md"), "old").unwrap();
        let token = AffinityToken::new();
        let guard = token.acquire().await;

        let changes = ChangeSet::new()
            .with_creation("README.md", "new", false)
            .with_creation("src/lib.rs", "pub fn a() {}", false);
        let report = mutator(&dir).apply_change_set(&guard, &changes).await.unwrap();

        assert!(matches!(
            report.items[0].result,
            Err(KilnError::FileExists(_))
        ));
        assert_eq!(report.items[1].result.as_ref().ok(), Some(&ItemAction::Created));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "old"
        );
        assert!(dir.path().join("src/lib.rs").exists());
        assert_eq!(report.summary(), "1 created, 1 failed");
    }

    #[tokio::test]
    async fn test_create_with_overwrite() {
        let dir = project();
        std::fs::write(dir.path().join("README.md"), "old").unwrap();
        let token = AffinityToken::new();
        let guard = token.acquire().await;

        let changes = ChangeSet::new().with_creation("README.md", "new", true);
        let report = mutator(&dir).apply_change_set(&guard, &changes).await.unwrap();

        assert_eq!(
            report.items[0].result.as_ref().ok(),
            Some(&ItemAction::Overwritten)
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn test_replace_mode_concatenates_changes() {
        let dir = project();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "line1\nline2\nline3\n").unwrap();
        let token = AffinityToken::new();
        let guard = token.acquire().await;

        let changes = ChangeSet::new().with_modification(
            "src/main.rs",
            vec![
                CodeChange::at_lines(2, 2, "fn main() {\n"),
                CodeChange::at_lines(3, 3, "}\n"),
            ],
        );
        mutator(&dir).apply_change_set(&guard, &changes).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/main.rs")).unwrap(),
            "fn main() {\n}\n"
        );
    }

    #[tokio::test]
    async fn test_splice_mode_uses_line_ranges() {
        let dir = project();
        std::fs::write(dir.path().join("notes.txt"), "a\nb\nc\nd\n").unwrap();
        let token = AffinityToken::new();
        let guard = token.acquire().await;

        let changes = ChangeSet::new().with_modification(
            "notes.txt",
            vec![
                CodeChange::at_lines(2, 3, "B\nC"),
                CodeChange::at_pattern("d", "D"),
            ],
        );
        let report = mutator(&dir)
            .with_mode(ModificationMode::Splice)
            .apply_change_set(&guard, &changes)
            .await
            .unwrap();

        assert!(!report.has_failures());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "a\nB\nC\nD\n"
        );
    }

    #[tokio::test]
    async fn test_splice_mode_rejects_bad_range() {
        let dir = project();
        std::fs::write(dir.path().join("notes.txt"), "a\n").unwrap();
        let token = AffinityToken::new();
        let guard = token.acquire().await;

        let changes =
            ChangeSet::new().with_modification("notes.txt", vec![CodeChange::at_lines(5, 6, "x")]);
        let report = mutator(&dir)
            .with_mode(ModificationMode::Splice)
            .apply_change_set(&guard, &changes)
            .await
            .unwrap();

        assert!(report.has_failures());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "a\n"
        );
    }

    #[tokio::test]
    async fn test_reference_addition() {
        let dir = project();
        let token = AffinityToken::new();
        let guard = token.acquire().await;

        let changes = ChangeSet::new().with_reference("serde").with_reference("serde");
        let report = mutator(&dir).apply_change_set(&guard, &changes).await.unwrap();

        assert_eq!(
            report.items[0].result.as_ref().ok(),
            Some(&ItemAction::ReferenceAdded)
        );
        assert_eq!(
            report.items[1].result.as_ref().ok(),
            Some(&ItemAction::ReferencePresent)
        );
    }

    #[tokio::test]
    async fn test_reference_without_project() {
        let dir = TempDir::new().unwrap();
        let token = AffinityToken::new();
        let guard = token.acquire().await;

        let changes = ChangeSet::new()
            .with_reference("serde")
            .with_creation("a.txt", "still written", false);
        let report = mutator(&dir).apply_change_set(&guard, &changes).await.unwrap();

        assert!(matches!(
            report.items[0].result,
            Err(KilnError::ProjectNotFound(_))
        ));
        assert!(report.items[1].is_success());
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_validate_path() {
        let protected = vec![".git".to_string(), "Cargo.lock".to_string()];
        assert!(validate_path("", &protected).is_err());
        assert!(validate_path("/etc/passwd", &protected).is_err());
        assert!(validate_path("../../../etc/passwd", &protected).is_err());
        assert!(validate_path(".git/config", &protected).is_err());
        assert!(validate_path("sub/Cargo.lock", &protected).is_err());
        assert!(validate_path("src/main.rs", &protected).is_ok());
    }

    #[test]
    fn test_splice_append_after_last_line() {
        let result = splice_changes("a\nb\n", &[CodeChange::at_lines(3, 3, "c")]).unwrap();
        assert_eq!(result, "a\nb\nc\n");
    }
}
