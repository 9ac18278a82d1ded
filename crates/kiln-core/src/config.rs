//! Configuration management for Kiln
//!
//! Repository-level settings live in `.kiln/config.toml`: the retry policy of the
//! pipeline, build commands, project protection rules and model selection.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{KilnError, Result};

/// Repository-level Kiln configuration
///
/// Loaded from `.kiln/config.toml` in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Retry and concurrency policy
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Build command overrides
    #[serde(default)]
    pub build: BuildConfig,

    /// Project tree settings
    #[serde(default)]
    pub project: ProjectConfig,

    /// Model selection
    #[serde(default)]
    pub models: ModelConfig,
}

/// What a second concurrent run does while the first holds the project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Fail immediately with a busy error
    #[default]
    Reject,
    /// Block until the running pipeline releases the project
    Wait,
}

/// How a file modification's code changes are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationMode {
    /// Concatenate every change body and write it as the whole file.
    /// Line ranges and search patterns are ignored in this mode.
    #[default]
    Replace,
    /// Substitute each change at its line range or search pattern
    Splice,
}

/// Pipeline policy constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Build attempts per run, including the first
    #[serde(default = "default_max_build_attempts")]
    pub max_build_attempts: u32,

    /// Run tests after a successful build even without reference additions
    #[serde(default)]
    pub run_tests: bool,

    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,

    #[serde(default)]
    pub modification_mode: ModificationMode,

    /// Ask the diagnoser about warnings as well as errors
    #[serde(default = "default_true")]
    pub diagnose_warnings: bool,
}

/// Explicit build commands; unset entries are detected from the project language
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub clean: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
}

/// Project tree settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Current project name; defaults to the package name in the manifest
    #[serde(default)]
    pub name: Option<String>,

    /// Files/directories the mutator must never write
    #[serde(default = "default_protected_files")]
    pub protected_files: Vec<String>,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model to use
    #[serde(default = "default_model")]
    pub default: String,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

/// Supported project languages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    DotNet,
}

/// Fully resolved commands for a build driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommands {
    pub clean: Option<String>,
    pub build: String,
    pub test: Option<String>,
}

// Default value providers
fn default_max_build_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_protected_files() -> Vec<String> {
    vec![
        ".git".to_string(),
        ".kiln".to_string(),
        ".env".to_string(),
        "Cargo.lock".to_string(),
        ".secrets".to_string(),
    ]
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    16000
}

impl KilnConfig {
    /// Load configuration from `.kiln/config.toml` or use defaults
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".kiln/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| KilnError::Config(format!("Failed to parse config file: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.kiln/config.toml`
    pub fn write_default(project_root: &Path) -> Result<()> {
        let config_dir = project_root.join(".kiln");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| KilnError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_build_attempts == 0 {
            return Err(KilnError::Config(
                "pipeline.max_build_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Detect the primary language of a project directory
    pub fn detect_language(project_root: &Path) -> Option<Language> {
        if project_root.join("Cargo.toml").exists() {
            return Some(Language::Rust);
        }
        if project_root.join("pyproject.toml").exists() || project_root.join("setup.py").exists()
        {
            return Some(Language::Python);
        }
        if project_root.join("package.json").exists() {
            return Some(Language::JavaScript);
        }

        let has_dotnet_project = std::fs::read_dir(project_root)
            .map(|entries| {
                entries.filter_map(|e| e.ok()).any(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    name.ends_with(".csproj") || name.ends_with(".sln")
                })
            })
            .unwrap_or(false);
        if has_dotnet_project {
            return Some(Language::DotNet);
        }

        None
    }

    /// Default commands for a language
    pub fn default_commands(lang: Language) -> BuildCommands {
        match lang {
            Language::Rust => BuildCommands {
                clean: Some("cargo clean".to_string()),
                build: "cargo build".to_string(),
                test: Some("cargo test".to_string()),
            },
            Language::Python => BuildCommands {
                clean: None,
                build: "python -m compileall -q .".to_string(),
                test: Some("pytest".to_string()),
            },
            Language::JavaScript => BuildCommands {
                clean: None,
                build: "npm run build".to_string(),
                test: Some("npm test".to_string()),
            },
            Language::DotNet => BuildCommands {
                clean: Some("dotnet clean".to_string()),
                build: "dotnet build".to_string(),
                test: Some("dotnet test".to_string()),
            },
        }
    }

    /// Resolve build commands: explicit settings win over language defaults
    pub fn build_commands(&self, project_root: &Path) -> Result<BuildCommands> {
        let detected = Self::detect_language(project_root).map(Self::default_commands);

        let build = self
            .build
            .build
            .clone()
            .or_else(|| detected.as_ref().map(|d| d.build.clone()))
            .ok_or_else(|| {
                KilnError::Config(format!(
                    "No build command configured and no project detected in {}",
                    project_root.display()
                ))
            })?;

        Ok(BuildCommands {
            clean: self
                .build
                .clean
                .clone()
                .or_else(|| detected.as_ref().and_then(|d| d.clean.clone())),
            build,
            test: self
                .build
                .test
                .clone()
                .or_else(|| detected.as_ref().and_then(|d| d.test.clone())),
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_build_attempts: default_max_build_attempts(),
            run_tests: false,
            concurrency: ConcurrencyPolicy::default(),
            modification_mode: ModificationMode::default(),
            diagnose_warnings: default_true(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: None,
            protected_files: default_protected_files(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
        }
    }
}
