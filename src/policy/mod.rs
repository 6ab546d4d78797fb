//! Policy engine: named, severity-tagged rules evaluated against requirements
//! (before planning) or a full execution plan (after planning).
//!
//! A failing `Error`-severity result blocks the session from reaching
//! `AwaitingApproval`; `Warning` and `Info` failures are reported but do not
//! block. The catalog can be replaced at runtime from a JSON or YAML file;
//! see [`PolicyEngine::reload_from_file`].

pub mod engine;
pub mod rules;

use serde::{Deserialize, Serialize};

pub use engine::{CatalogFormat, PolicyEngine};
pub use rules::PolicyRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySeverity {
    Error,
    Warning,
    Info,
}

impl PolicySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl std::fmt::Display for PolicySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy category. Unrecognized names in a catalog file map to `Other`
/// instead of failing the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum PolicyCategory {
    Naming,
    Structure,
    Pipeline,
    Security,
    Other,
}

impl PolicyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naming => "naming",
            Self::Structure => "structure",
            Self::Pipeline => "pipeline",
            Self::Security => "security",
            Self::Other => "other",
        }
    }
}

impl From<String> for PolicyCategory {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "naming" => Self::Naming,
            "structure" => Self::Structure,
            "pipeline" | "ci" => Self::Pipeline,
            "security" => Self::Security,
            "other" => Self::Other,
            unknown => {
                tracing::warn!(category = %unknown, "unknown policy category, using 'other'");
                Self::Other
            }
        }
    }
}

impl std::fmt::Display for PolicyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

/// A single named policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub severity: PolicySeverity,
    pub category: PolicyCategory,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub rule: PolicyRule,
}

/// Outcome of evaluating one policy. Produced fresh on every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyValidationResult {
    pub policy_id: String,
    pub policy_name: String,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<PolicySeverity>,
}

impl PolicyValidationResult {
    pub fn pass(policy: &Policy, message: impl Into<String>) -> Self {
        Self {
            policy_id: policy.id.clone(),
            policy_name: policy.name.clone(),
            passed: true,
            message: message.into(),
            severity: Some(policy.severity),
        }
    }

    pub fn fail(policy: &Policy, message: impl Into<String>) -> Self {
        Self {
            policy_id: policy.id.clone(),
            policy_name: policy.name.clone(),
            passed: false,
            message: message.into(),
            severity: Some(policy.severity),
        }
    }

    /// A failure that prevents the session from leaving `Planning`.
    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity == Some(PolicySeverity::Error)
    }
}

impl std::fmt::Display for PolicyValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = self.severity.map(|s| s.as_str()).unwrap_or("-");
        write!(
            f,
            "[{}] {}: {}",
            severity, self.policy_name, self.message
        )
    }
}

/// True unless at least one result failed with `Error` severity.
pub fn all_policies_passed(results: &[PolicyValidationResult]) -> bool {
    !results.iter().any(PolicyValidationResult::is_blocking)
}

/// Blocking failures formatted for display.
pub fn blocking_failures(results: &[PolicyValidationResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| r.is_blocking())
        .map(|r| r.to_string())
        .collect()
}
