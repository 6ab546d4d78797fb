//! Configuration for Reposmith.
//!
//! Settings are read from `.reposmith/reposmith.toml`, then overridden by
//! environment variables, then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! data_dir = ".reposmith/sessions"
//! flush_interval_secs = 5
//!
//! [modules]
//! disabled = ["dockerfile"]
//!
//! [policies]
//! file = ".reposmith/policies.yaml"
//!
//! [audit]
//! dir = ".reposmith/audit"
//!
//! [llm]
//! provider = "claude"
//! model = "claude-sonnet-4-5"
//! max_attempts = 3
//! backoff_secs = [2, 5, 10]
//!
//! [scm]
//! provider = "github"
//! owner = "acme"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::builtin::builtin_module_ids;

/// Directory holding project-level state.
pub const REPOSMITH_DIR: &str = ".reposmith";
/// Config file name inside [`REPOSMITH_DIR`].
pub const CONFIG_FILE: &str = "reposmith.toml";

pub const ENV_FLUSH_INTERVAL: &str = "REPOSMITH_FLUSH_INTERVAL_SECS";
pub const ENV_DISABLED_MODULES: &str = "REPOSMITH_DISABLED_MODULES";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(REPOSMITH_DIR).join("sessions")
}

fn default_flush_interval_secs() -> u64 {
    5
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesSection {
    /// Module ids that never run.
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesSection {
    /// JSON or YAML catalog replacing the built-in policies.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from(REPOSMITH_DIR).join("audit")
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            dir: default_audit_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Claude,
    OpenAi,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Claude => write!(f, "claude"),
            LlmProvider::OpenAi => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> Vec<u64> {
    vec![2, 5, 10]
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: None,
            base_url: None,
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmProviderKind {
    #[default]
    Local,
    GitHub,
}

impl std::fmt::Display for ScmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScmProviderKind::Local => write!(f, "local"),
            ScmProviderKind::GitHub => write!(f, "github"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScmSection {
    /// No provider means no repository steps are planned.
    #[serde(default)]
    pub provider: Option<ScmProviderKind>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

/// Contents of `reposmith.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReposmithToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub modules: ModulesSection,
    #[serde(default)]
    pub policies: PoliciesSection,
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub scm: ScmSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ReposmithToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid reposmith.toml")
    }

    /// Defaults when `<dir>/reposmith.toml` does not exist.
    pub fn load_or_default(reposmith_dir: &Path) -> Result<Self> {
        let path = reposmith_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Problems that do not stop loading but are worth reporting.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let known = builtin_module_ids();
        for id in &self.modules.disabled {
            if !known.contains(&id.as_str()) {
                warnings.push(format!("Unknown module id in modules.disabled: '{}'", id));
            }
        }
        if self.store.flush_interval_secs == 0 {
            warnings.push("store.flush_interval_secs is 0; sessions flush only on shutdown".into());
        }
        if self.llm.max_attempts == 0 {
            warnings.push("llm.max_attempts is 0; treated as 1".into());
        }
        if self.llm.backoff_secs.is_empty() {
            warnings.push("llm.backoff_secs is empty; retries happen immediately".into());
        }
        warnings
    }
}

/// Resolved configuration for one project directory.
#[derive(Debug, Clone)]
pub struct ReposmithConfig {
    pub project_dir: PathBuf,
    pub toml: ReposmithToml,
    pub flush_interval: Duration,
    pub disabled_modules: Vec<String>,
    pub github_token: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl ReposmithConfig {
    /// Load `<project_dir>/.reposmith/reposmith.toml` and apply environment
    /// overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let toml = ReposmithToml::load_or_default(&project_dir.join(REPOSMITH_DIR))?;
        Ok(Self::from_parts(project_dir, toml, |key| std::env::var(key).ok()))
    }

    /// Resolve with an explicit variable lookup.
    pub fn from_parts(
        project_dir: PathBuf,
        toml: ReposmithToml,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let flush_secs = non_empty(ENV_FLUSH_INTERVAL)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(toml.store.flush_interval_secs);

        let mut disabled_modules = toml.modules.disabled.clone();
        if let Some(extra) = non_empty(ENV_DISABLED_MODULES) {
            for id in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !disabled_modules.iter().any(|d| d == id) {
                    disabled_modules.push(id.to_string());
                }
            }
        }

        Self {
            project_dir,
            flush_interval: Duration::from_secs(flush_secs),
            disabled_modules,
            github_token: non_empty(ENV_GITHUB_TOKEN),
            anthropic_api_key: non_empty(ENV_ANTHROPIC_API_KEY),
            openai_api_key: non_empty(ENV_OPENAI_API_KEY),
            toml,
        }
    }

    /// Apply CLI flags on top of file and environment.
    pub fn with_cli_args(mut self, disabled: &[String], log_json: bool) -> Self {
        for id in disabled {
            if !self.disabled_modules.contains(id) {
                self.disabled_modules.push(id.clone());
            }
        }
        if log_json {
            self.toml.logging.json = true;
        }
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn reposmith_dir(&self) -> PathBuf {
        self.project_dir.join(REPOSMITH_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.reposmith_dir().join(CONFIG_FILE)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(&self.toml.store.data_dir)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.resolve(&self.toml.audit.dir)
    }

    /// Root for generated repositories.
    pub fn workspace_root(&self) -> PathBuf {
        self.reposmith_dir().join("workspaces")
    }

    pub fn policy_file(&self) -> Option<PathBuf> {
        self.toml.policies.file.as_deref().map(|p| self.resolve(p))
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.toml.logging.file.as_deref().map(|p| self.resolve(p))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        let known = builtin_module_ids();
        for id in self.disabled_modules.iter().skip(self.toml.modules.disabled.len()) {
            if !known.contains(&id.as_str()) {
                warnings.push(format!("Unknown module id in {}: '{}'", ENV_DISABLED_MODULES, id));
            }
        }
        if let Some(path) = self.policy_file()
            && !path.exists()
        {
            warnings.push(format!("Policy file not found: {}", path.display()));
        }
        if self.toml.scm.provider == Some(ScmProviderKind::GitHub) && self.github_token.is_none() {
            warnings.push(format!("scm.provider is github but {} is not set", ENV_GITHUB_TOKEN));
        }
        warnings
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.data_dir(), self.audit_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = ReposmithToml::parse("").unwrap();
        assert_eq!(config.store.flush_interval_secs, 5);
        assert_eq!(config.store.data_dir, PathBuf::from(".reposmith/sessions"));
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.llm.backoff_secs, vec![2, 5, 10]);
        assert_eq!(config.logging.level, "info");
        assert!(config.scm.provider.is_none());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let config = ReposmithToml::parse(
            r#"
[store]
flush_interval_secs = 30

[modules]
disabled = ["dockerfile"]

[llm]
provider = "openai"
model = "gpt-4o"

[scm]
provider = "github"
owner = "acme"
"#,
        )
        .unwrap();
        assert_eq!(config.store.flush_interval_secs, 30);
        assert_eq!(config.modules.disabled, vec!["dockerfile"]);
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.scm.provider, Some(ScmProviderKind::GitHub));
        assert_eq!(config.scm.owner.as_deref(), Some("acme"));
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(ReposmithToml::parse("[store\nflush = ").is_err());
    }

    #[test]
    fn test_validate_reports_unknown_module_and_zero_interval() {
        let mut config = ReposmithToml::default();
        config.modules.disabled = vec!["readme".into(), "nope".into()];
        config.store.flush_interval_secs = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("nope"));
        assert!(warnings[1].contains("flush_interval_secs"));
    }

    #[test]
    fn test_environment_overrides() {
        let config = ReposmithConfig::from_parts(
            PathBuf::from("/proj"),
            ReposmithToml::default(),
            env(&[
                (ENV_FLUSH_INTERVAL, "12"),
                (ENV_DISABLED_MODULES, "license, dockerfile,"),
                (ENV_GITHUB_TOKEN, "ghp_x"),
                (ENV_OPENAI_API_KEY, "  "),
            ]),
        );
        assert_eq!(config.flush_interval, Duration::from_secs(12));
        assert_eq!(config.disabled_modules, vec!["license", "dockerfile"]);
        assert_eq!(config.github_token.as_deref(), Some("ghp_x"));
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn test_invalid_env_interval_falls_back_to_file() {
        let config = ReposmithConfig::from_parts(
            PathBuf::from("/proj"),
            ReposmithToml::default(),
            env(&[(ENV_FLUSH_INTERVAL, "soon")]),
        );
        assert_eq!(config.flush_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_cli_args_override() {
        let config = ReposmithConfig::from_parts(PathBuf::from("/proj"), ReposmithToml::default(), env(&[]))
            .with_cli_args(&["readme".to_string()], true);
        assert_eq!(config.disabled_modules, vec!["readme"]);
        assert!(config.toml.logging.json);
    }

    #[test]
    fn test_paths_resolve_against_project_dir() {
        let config = ReposmithConfig::from_parts(PathBuf::from("/proj"), ReposmithToml::default(), env(&[]));
        assert_eq!(config.data_dir(), PathBuf::from("/proj/.reposmith/sessions"));
        assert_eq!(config.audit_dir(), PathBuf::from("/proj/.reposmith/audit"));
        assert_eq!(config.config_file(), PathBuf::from("/proj/.reposmith/reposmith.toml"));
        assert!(config.policy_file().is_none());
    }

    #[test]
    fn test_missing_policy_file_warns() {
        let dir = tempdir().unwrap();
        let mut toml = ReposmithToml::default();
        toml.policies.file = Some(PathBuf::from("policies.yaml"));
        let config = ReposmithConfig::from_parts(dir.path().to_path_buf(), toml, env(&[]));
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("Policy file not found")));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".reposmith/reposmith.toml");
        let mut config = ReposmithToml::default();
        config.modules.disabled = vec!["license".into()];
        config.save(&path).unwrap();

        let loaded = ReposmithToml::load_or_default(&dir.path().join(".reposmith")).unwrap();
        assert_eq!(loaded.modules.disabled, vec!["license"]);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = ReposmithToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.store.flush_interval_secs, 5);
    }
}
