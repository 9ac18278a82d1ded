//! Host project model
//!
//! The mutator never edits manifests directly; it asks a [`ProjectTree`] to resolve
//! the current project and to record folders and references. Calls are synchronous
//! and must only be made while the caller holds the affinity guard.

use kiln_core::{KilnError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Project-tree collaborator contract
pub trait ProjectTree: Send + Sync {
    /// Name of the project mutations apply to, if one can be resolved
    fn current_project(&self) -> Option<String>;

    fn project_exists(&self, name: &str) -> bool;

    /// Register a project-relative folder, creating it if needed
    fn add_folder(&self, project: &str, folder: &str) -> Result<()>;

    /// Add a dependency reference (`name` or `name@version`)
    fn add_reference(&self, project: &str, reference: &str) -> Result<()>;

    /// Project-relative paths of all source files
    fn project_files(&self, project: &str) -> Result<Vec<String>>;

    /// Names of current dependencies
    fn project_dependencies(&self, project: &str) -> Result<Vec<String>>;
}

/// Directories never listed as project files
const IGNORED_DIRS: &[&str] = &["target", "node_modules", "bin", "obj"];

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || IGNORED_DIRS.contains(&name)
}

/// [`ProjectTree`] over a Cargo package directory
///
/// The project is the package named in `Cargo.toml`; references are entries in
/// its `[dependencies]` table.
#[derive(Debug, Clone)]
pub struct CargoProjectTree {
    root: PathBuf,
    name_override: Option<String>,
}

impl CargoProjectTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            name_override: None,
        }
    }

    /// Use a fixed project name instead of reading the manifest
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name_override = Some(name.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("Cargo.toml")
    }

    fn read_manifest(&self) -> Result<toml::Table> {
        let content = std::fs::read_to_string(self.manifest_path())?;
        content
            .parse::<toml::Table>()
            .map_err(|e| KilnError::Project(format!("Invalid Cargo.toml: {}", e)))
    }

    fn package_name(&self) -> Option<String> {
        let manifest = self.read_manifest().ok()?;
        manifest
            .get("package")?
            .get("name")?
            .as_str()
            .map(|s| s.to_string())
    }

    /// Files below `dir`, relative to the root, skipping nested ignored directories
    fn files_under(&self, dir: &Path) -> Result<Vec<String>> {
        let pattern = format!(
            "{}/**/*",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| KilnError::Project(format!("Invalid glob pattern: {}", e)))?;

        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let relative = path.strip_prefix(&self.root).ok()?.to_path_buf();
                let skip = relative
                    .components()
                    .any(|c| is_ignored(&c.as_os_str().to_string_lossy()));
                (!skip).then(|| relative.to_string_lossy().replace('\\', "/"))
            })
            .collect())
    }

    fn ensure_project(&self, project: &str) -> Result<()> {
        if self.project_exists(project) {
            Ok(())
        } else {
            Err(KilnError::ProjectNotFound(project.to_string()))
        }
    }
}

impl ProjectTree for CargoProjectTree {
    fn current_project(&self) -> Option<String> {
        if let Some(name) = &self.name_override {
            return self.manifest_path().exists().then(|| name.clone());
        }
        self.package_name()
    }

    fn project_exists(&self, name: &str) -> bool {
        self.current_project().as_deref() == Some(name)
    }

    fn add_folder(&self, project: &str, folder: &str) -> Result<()> {
        self.ensure_project(project)?;
        let path = self.root.join(folder);
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
            debug!("Added folder {} to {}", folder, project);
        }
        Ok(())
    }

    fn add_reference(&self, project: &str, reference: &str) -> Result<()> {
        self.ensure_project(project)?;

        let (name, version) = match reference.split_once('@') {
            Some((name, version)) => (name.trim(), version.trim()),
            None => (reference.trim(), "*"),
        };
        if name.is_empty() {
            return Err(KilnError::Project("Empty reference name".to_string()));
        }

        let content = std::fs::read_to_string(self.manifest_path())?;
        let mut manifest = content
            .parse::<toml_edit::DocumentMut>()
            .map_err(|e| KilnError::Project(format!("Invalid Cargo.toml: {}", e)))?;
        let dependencies = manifest
            .entry("dependencies")
            .or_insert(toml_edit::table())
            .as_table_like_mut()
            .ok_or_else(|| {
                KilnError::Project("[dependencies] in Cargo.toml is not a table".to_string())
            })?;

        dependencies.insert(name, toml_edit::value(version));
        std::fs::write(self.manifest_path(), manifest.to_string())?;

        info!("Added reference {} = \"{}\" to {}", name, version, project);
        Ok(())
    }

    fn project_files(&self, project: &str) -> Result<Vec<String>> {
        self.ensure_project(project)?;

        // Ignored top-level directories are never walked
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if is_ignored(&name) {
                continue;
            }
            if path.is_file() {
                files.push(name);
            } else if path.is_dir() {
                files.extend(self.files_under(&path)?);
            }
        }

        files.sort();
        Ok(files)
    }

    fn project_dependencies(&self, project: &str) -> Result<Vec<String>> {
        self.ensure_project(project)?;

        let manifest = self.read_manifest()?;
        Ok(manifest
            .get("dependencies")
            .and_then(|d| d.as_table())
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default())
    }
}
