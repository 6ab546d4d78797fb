//! Built-in rule kinds and their evaluation.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Policy, PolicyValidationResult};
use crate::session::{ExecutionPlan, ProjectRequirements};

pub const KEBAB_CASE_PATTERN: &str = "^[a-z0-9]+(-[a-z0-9]+)*$";

/// Patterns that look like credentials pasted into requirements.
pub const DEFAULT_SECRET_PATTERNS: &[&str] = &[
    r"AKIA[0-9A-Z]{16}",
    r"gh[pousr]_[A-Za-z0-9]{20,}",
    r"github_pat_[A-Za-z0-9_]{20,}",
    r"sk-[A-Za-z0-9_-]{20,}",
    r"(?i)(password|passwd|secret|api[_-]?key|token)\s*[:=]\s*\S{6,}",
    r"-----BEGIN [A-Z ]*PRIVATE KEY-----",
];

fn default_naming_pattern() -> String {
    KEBAB_CASE_PATTERN.to_string()
}

/// What a policy checks. Serialized with a `kind` tag in catalog files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyRule {
    /// Project and repository names must match `pattern`.
    NamingConvention {
        #[serde(default = "default_naming_pattern")]
        pattern: String,
    },
    /// Every listed path must appear in the plan's planned files.
    RequiredFiles { files: Vec<String> },
    /// The plan must define a CI pipeline.
    RequiredPipeline,
    /// Free-text requirement fields must not contain credential-like strings.
    SecretScan {
        #[serde(default)]
        patterns: Vec<String>,
    },
}

/// What a policy is evaluated against.
#[derive(Debug, Clone, Copy)]
pub enum PolicySubject<'a> {
    Requirements(&'a ProjectRequirements),
    Plan(&'a ExecutionPlan),
}

impl<'a> PolicySubject<'a> {
    fn requirements(&self) -> &'a ProjectRequirements {
        match self {
            PolicySubject::Requirements(req) => req,
            PolicySubject::Plan(plan) => &plan.requirements,
        }
    }
}

impl PolicyRule {
    /// Reject rules whose patterns do not compile.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PolicyRule::NamingConvention { pattern } => {
                Regex::new(pattern).map(|_| ()).map_err(|e| e.to_string())
            }
            PolicyRule::SecretScan { patterns } => patterns
                .iter()
                .try_for_each(|p| Regex::new(p).map(|_| ()).map_err(|e| e.to_string())),
            PolicyRule::RequiredFiles { files } if files.is_empty() => {
                Err("required_files rule lists no files".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Evaluate the rule. Returns `None` when the rule does not apply to the
    /// subject (file and pipeline rules only apply to plans).
    pub fn evaluate(
        &self,
        policy: &Policy,
        subject: PolicySubject<'_>,
    ) -> Option<PolicyValidationResult> {
        match self {
            PolicyRule::NamingConvention { pattern } => {
                Some(check_naming(policy, pattern, subject.requirements()))
            }
            PolicyRule::RequiredFiles { files } => match subject {
                PolicySubject::Plan(plan) => Some(check_required_files(policy, files, plan)),
                PolicySubject::Requirements(_) => None,
            },
            PolicyRule::RequiredPipeline => match subject {
                PolicySubject::Plan(plan) => Some(check_pipeline(policy, plan)),
                PolicySubject::Requirements(_) => None,
            },
            PolicyRule::SecretScan { patterns } => {
                Some(check_secrets(policy, patterns, subject.requirements()))
            }
        }
    }
}

fn check_naming(policy: &Policy, pattern: &str, req: &ProjectRequirements) -> PolicyValidationResult {
    let regex = match Regex::new(pattern) {
        Ok(r) => r,
        Err(e) => {
            return PolicyValidationResult::fail(policy, format!("invalid pattern: {}", e));
        }
    };

    let mut names = vec![req.project_name.as_str()];
    if let Some(ref repo) = req.repository_name {
        names.push(repo.as_str());
    }
    let offenders: Vec<&str> = names.into_iter().filter(|n| !regex.is_match(n)).collect();

    if offenders.is_empty() {
        PolicyValidationResult::pass(policy, "names follow the naming convention")
    } else {
        PolicyValidationResult::fail(
            policy,
            format!(
                "'{}' does not match {}",
                offenders.join("', '"),
                pattern
            ),
        )
    }
}

fn check_required_files(
    policy: &Policy,
    files: &[String],
    plan: &ExecutionPlan,
) -> PolicyValidationResult {
    let missing: Vec<&str> = files
        .iter()
        .filter(|f| !plan.planned_files.iter().any(|p| p == *f))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        PolicyValidationResult::pass(policy, "all required files are planned")
    } else {
        PolicyValidationResult::fail(policy, format!("missing {}", missing.join(", ")))
    }
}

fn check_pipeline(policy: &Policy, plan: &ExecutionPlan) -> PolicyValidationResult {
    match plan.pipeline {
        Some(ref pipeline) if plan.planned_files.contains(&pipeline.file_path) => {
            PolicyValidationResult::pass(policy, format!("pipeline '{}' planned", pipeline.name))
        }
        Some(ref pipeline) => PolicyValidationResult::fail(
            policy,
            format!("pipeline file {} is not generated", pipeline.file_path),
        ),
        None => PolicyValidationResult::fail(policy, "no CI pipeline defined"),
    }
}

fn check_secrets(
    policy: &Policy,
    patterns: &[String],
    req: &ProjectRequirements,
) -> PolicyValidationResult {
    let regexes: Vec<Regex> = if patterns.is_empty() {
        DEFAULT_SECRET_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    } else {
        patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
    };

    let mut fields: Vec<(&str, &str)> = vec![
        ("name", req.project_name.as_str()),
        ("description", req.description.as_str()),
    ];
    fields.extend(req.features.iter().map(|f| ("features", f.as_str())));
    fields.extend(req.extra.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let flagged: Vec<&str> = fields
        .iter()
        .filter(|(_, text)| regexes.iter().any(|r| r.is_match(text)))
        .map(|(field, _)| *field)
        .collect();

    if flagged.is_empty() {
        PolicyValidationResult::pass(policy, "no secrets detected")
    } else {
        PolicyValidationResult::fail(
            policy,
            format!("possible secret in field(s): {}", flagged.join(", ")),
        )
    }
}
