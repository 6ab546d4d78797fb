//! `reposmith init`: create the `.reposmith/` directory.
//!
//! ```text
//! .reposmith/
//! ├── reposmith.toml   # Configuration with defaults written out
//! ├── policies.yaml    # Editable copy of the built-in policy catalog
//! ├── sessions/        # Persisted sessions
//! └── audit/           # Per-session JSONL audit trails
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, REPOSMITH_DIR, ReposmithToml};

pub const POLICIES_FILE: &str = "policies.yaml";

/// Sample catalog; mirrors the built-in policies.
pub const SAMPLE_POLICIES: &str = r#"# Policies evaluated against requirements and plans.
# Error severity blocks a plan; warning and info are reported only.
policies:
  - id: naming-convention
    name: Naming convention
    description: Project and repository names must be kebab-case
    severity: error
    category: naming
    rule:
      kind: naming_convention
      pattern: "^[a-z0-9]+(-[a-z0-9]+)*$"
  - id: required-files
    name: Required files
    description: Every repository ships a .gitignore and a README.md
    severity: error
    category: structure
    rule:
      kind: required_files
      files: [.gitignore, README.md]
  - id: required-ci-pipeline
    name: CI pipeline
    description: Repositories should be created with a CI pipeline
    severity: warning
    category: pipeline
    rule:
      kind: required_pipeline
  - id: secret-scan
    name: Secret scan
    description: Requirements must not contain credentials
    severity: error
    category: security
    rule:
      kind: secret_scan
"#;

#[derive(Debug)]
pub struct InitResult {
    pub reposmith_dir: PathBuf,
    /// False when the directory already existed.
    pub created: bool,
}

/// Create or complete `.reposmith/` under `project_dir`. Existing files are
/// never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let reposmith_dir = project_dir.join(REPOSMITH_DIR);
    let created = !reposmith_dir.exists();

    let defaults = ReposmithToml::default();
    for dir in [
        reposmith_dir.clone(),
        project_dir.join(&defaults.store.data_dir),
        project_dir.join(&defaults.audit.dir),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_file = reposmith_dir.join(CONFIG_FILE);
    if !config_file.exists() {
        let mut config = defaults;
        config.policies.file = Some(PathBuf::from(REPOSMITH_DIR).join(POLICIES_FILE));
        config.save(&config_file)?;
    }

    let policies_file = reposmith_dir.join(POLICIES_FILE);
    if !policies_file.exists() {
        std::fs::write(&policies_file, SAMPLE_POLICIES).with_context(|| {
            format!("Failed to write policies: {}", policies_file.display())
        })?;
    }

    Ok(InitResult {
        reposmith_dir,
        created,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(REPOSMITH_DIR).join(CONFIG_FILE).exists()
}
