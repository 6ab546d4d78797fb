use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{debug, info};

use super::rules::{KEBAB_CASE_PATTERN, PolicySubject};
use super::{Policy, PolicyCategory, PolicyRule, PolicySeverity, PolicyValidationResult};
use crate::errors::PolicyError;
use crate::session::{ExecutionPlan, ProjectRequirements};

/// Serialization format of a policy catalog file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Json,
    Yaml,
}

impl CatalogFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("json") => Some(Self::Json),
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// A catalog file is either a bare list of policies or `{ policies: [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped { policies: Vec<Policy> },
    List(Vec<Policy>),
}

impl CatalogFile {
    fn into_policies(self) -> Vec<Policy> {
        match self {
            CatalogFile::Wrapped { policies } => policies,
            CatalogFile::List(policies) => policies,
        }
    }
}

/// Evaluates the active policy catalog.
///
/// The catalog is held as an `Arc<Vec<Policy>>` behind a lock; evaluations
/// take a snapshot and never hold the lock while running rules. Reloads
/// parse and validate the new file completely before swapping, so a
/// malformed file leaves the previous catalog in force.
pub struct PolicyEngine {
    catalog: RwLock<Arc<Vec<Policy>>>,
    source: RwLock<Option<PathBuf>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl PolicyEngine {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(policies)),
            source: RwLock::new(None),
        }
    }

    pub fn with_builtin() -> Self {
        Self::new(builtin_policies())
    }

    /// Build an engine whose catalog comes entirely from `path`.
    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let engine = Self::new(Vec::new());
        engine.reload_from_file(path)?;
        Ok(engine)
    }

    /// Snapshot of the active catalog.
    pub fn policies(&self) -> Result<Arc<Vec<Policy>>, PolicyError> {
        self.catalog
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| PolicyError::LockPoisoned)
    }

    pub fn get(&self, id: &str) -> Result<Option<Policy>, PolicyError> {
        Ok(self.policies()?.iter().find(|p| p.id == id).cloned())
    }

    pub fn source(&self) -> Option<PathBuf> {
        self.source.read().ok().and_then(|s| s.clone())
    }

    /// Enable or disable a policy by id. Returns false if the id is unknown.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, PolicyError> {
        let mut guard = self.catalog.write().map_err(|_| PolicyError::LockPoisoned)?;
        let mut next = guard.as_ref().clone();
        let Some(policy) = next.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        policy.enabled = enabled;
        *guard = Arc::new(next);
        Ok(true)
    }

    /// Replace the catalog with the contents of `path`.
    ///
    /// Returns the number of policies loaded. On any read, parse or
    /// validation error the existing catalog is left untouched.
    pub fn reload_from_file(&self, path: &Path) -> Result<usize, PolicyError> {
        let format = CatalogFormat::from_path(path).ok_or_else(|| {
            PolicyError::UnsupportedFormat {
                path: path.to_path_buf(),
            }
        })?;
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let policies = parse_catalog(&content, format).map_err(|message| PolicyError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        let count = self.swap(policies)?;
        if let Ok(mut source) = self.source.write() {
            *source = Some(path.to_path_buf());
        }
        info!(path = %path.display(), count, "policy catalog reloaded");
        Ok(count)
    }

    /// Replace the catalog from in-memory content.
    pub fn reload_from_str(&self, content: &str, format: CatalogFormat) -> Result<usize, PolicyError> {
        let policies = parse_catalog(content, format).map_err(|message| PolicyError::Parse {
            path: PathBuf::from("<inline>"),
            message,
        })?;
        self.swap(policies)
    }

    fn swap(&self, policies: Vec<Policy>) -> Result<usize, PolicyError> {
        let count = policies.len();
        let mut guard = self.catalog.write().map_err(|_| PolicyError::LockPoisoned)?;
        *guard = Arc::new(policies);
        Ok(count)
    }

    /// Evaluate enabled policies against requirements (pre-plan).
    pub fn validate_requirements(
        &self,
        requirements: &ProjectRequirements,
    ) -> Result<Vec<PolicyValidationResult>, PolicyError> {
        self.evaluate(PolicySubject::Requirements(requirements))
    }

    /// Evaluate enabled policies against a full plan (post-plan).
    pub fn validate_plan(
        &self,
        plan: &ExecutionPlan,
    ) -> Result<Vec<PolicyValidationResult>, PolicyError> {
        self.evaluate(PolicySubject::Plan(plan))
    }

    fn evaluate(&self, subject: PolicySubject<'_>) -> Result<Vec<PolicyValidationResult>, PolicyError> {
        let catalog = self.policies()?;
        let results: Vec<PolicyValidationResult> = catalog
            .iter()
            .filter(|p| p.enabled)
            .filter_map(|p| p.rule.evaluate(p, subject))
            .collect();
        debug!(
            evaluated = results.len(),
            failed = results.iter().filter(|r| !r.passed).count(),
            "policies evaluated"
        );
        Ok(results)
    }
}

/// Parse and validate a catalog. Nothing is returned unless every policy is
/// well-formed and ids are unique.
pub fn parse_catalog(content: &str, format: CatalogFormat) -> Result<Vec<Policy>, String> {
    let file: CatalogFile = match format {
        CatalogFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string())?,
        CatalogFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string())?,
    };
    let policies = file.into_policies();

    let mut seen = HashSet::new();
    for policy in &policies {
        if policy.id.trim().is_empty() {
            return Err("policy with empty id".to_string());
        }
        if !seen.insert(policy.id.as_str()) {
            return Err(format!("duplicate policy id '{}'", policy.id));
        }
        policy
            .rule
            .validate()
            .map_err(|e| format!("policy '{}': {}", policy.id, e))?;
    }
    Ok(policies)
}

/// The default catalog.
pub fn builtin_policies() -> Vec<Policy> {
    vec![
        Policy {
            id: "naming-convention".into(),
            name: "Naming convention".into(),
            description: "Project and repository names must be kebab-case".into(),
            severity: PolicySeverity::Error,
            category: PolicyCategory::Naming,
            enabled: true,
            rule: PolicyRule::NamingConvention {
                pattern: KEBAB_CASE_PATTERN.into(),
            },
        },
        Policy {
            id: "required-files".into(),
            name: "Required files".into(),
            description: "Every repository ships a .gitignore and a README.md".into(),
            severity: PolicySeverity::Error,
            category: PolicyCategory::Structure,
            enabled: true,
            rule: PolicyRule::RequiredFiles {
                files: vec![".gitignore".into(), "README.md".into()],
            },
        },
        Policy {
            id: "required-ci-pipeline".into(),
            name: "CI pipeline".into(),
            description: "Repositories should be created with a CI pipeline".into(),
            severity: PolicySeverity::Warning,
            category: PolicyCategory::Pipeline,
            enabled: true,
            rule: PolicyRule::RequiredPipeline,
        },
        Policy {
            id: "secret-scan".into(),
            name: "Secret scan".into(),
            description: "Requirements must not contain credentials".into(),
            severity: PolicySeverity::Error,
            category: PolicyCategory::Security,
            enabled: true,
            rule: PolicyRule::SecretScan { patterns: vec![] },
        },
    ]
}
