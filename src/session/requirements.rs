//! Project requirements and their extraction from conversation history.
//!
//! Understanding free-form language is out of scope; the default
//! `KeyValueExtractor` accepts either an embedded JSON object or
//! `key: value` lines, merging later messages over earlier ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Message, Role};
use crate::util::extract_json_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectRequirements {
    pub project_name: String,
    pub description: String,
    pub language: String,
    pub framework: Option<String>,
    pub project_type: String,
    pub repository_name: Option<String>,
    pub visibility: Visibility,
    pub include_ci: bool,
    pub include_docker: bool,
    pub include_tests: bool,
    pub features: Vec<String>,
    pub extra: BTreeMap<String, String>,
}

impl Default for ProjectRequirements {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            description: String::new(),
            language: String::new(),
            framework: None,
            project_type: "application".to_string(),
            repository_name: None,
            visibility: Visibility::Private,
            include_ci: true,
            include_docker: false,
            include_tests: true,
            features: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl ProjectRequirements {
    pub fn named(project_name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            language: language.into(),
            ..Self::default()
        }
    }

    /// Enough has been gathered to start planning.
    pub fn is_sufficient(&self) -> bool {
        !self.project_name.trim().is_empty() && !self.language.trim().is_empty()
    }

    pub fn repository_name(&self) -> &str {
        self.repository_name
            .as_deref()
            .unwrap_or(self.project_name.as_str())
    }

    /// Names that are missing before planning can start.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.project_name.trim().is_empty() {
            missing.push("name");
        }
        if self.language.trim().is_empty() {
            missing.push("language");
        }
        missing
    }

    /// Apply one `key: value` pair. Returns false when the key is unknown
    /// and was stored in `extra` instead.
    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        let key = key.trim().to_lowercase().replace([' ', '-'], "_");
        let value = value.trim();
        match key.as_str() {
            "name" | "project" | "project_name" => self.project_name = value.to_string(),
            "description" | "summary" => self.description = value.to_string(),
            "language" | "lang" => self.language = value.to_lowercase(),
            "framework" => self.framework = Some(value.to_string()),
            "type" | "project_type" => self.project_type = value.to_lowercase(),
            "repo" | "repository" | "repository_name" => {
                self.repository_name = Some(value.to_string())
            }
            "visibility" => {
                self.visibility = if value.eq_ignore_ascii_case("public") {
                    Visibility::Public
                } else {
                    Visibility::Private
                }
            }
            "private" => {
                self.visibility = if parse_flag(value) {
                    Visibility::Private
                } else {
                    Visibility::Public
                }
            }
            "ci" | "include_ci" => self.include_ci = parse_flag(value),
            "docker" | "include_docker" => self.include_docker = parse_flag(value),
            "tests" | "include_tests" => self.include_tests = parse_flag(value),
            "features" => {
                self.features = value
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect()
            }
            _ => {
                self.extra.insert(key, value.to_string());
                return false;
            }
        }
        true
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "yes" | "y" | "true" | "1" | "on" | "enabled"
    )
}

/// Turns conversation history into project requirements.
pub trait RequirementsExtractor: Send + Sync {
    /// Returns `None` when nothing recognizable has been said yet.
    fn extract(&self, messages: &[Message]) -> Option<ProjectRequirements>;
}

/// Reads JSON objects or `key: value` / `key = value` lines from user messages.
#[derive(Debug, Default, Clone)]
pub struct KeyValueExtractor;

impl RequirementsExtractor for KeyValueExtractor {
    fn extract(&self, messages: &[Message]) -> Option<ProjectRequirements> {
        let mut requirements = ProjectRequirements::default();
        let mut found = false;

        for message in messages.iter().filter(|m| m.role == Role::User) {
            if let Some(json) = extract_json_object(&message.content)
                && let Ok(serde_json::Value::Object(map)) =
                    serde_json::from_str::<serde_json::Value>(&json)
            {
                for (key, value) in map {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Array(items) => items
                            .iter()
                            .map(|v| v.as_str().map(str::to_string).unwrap_or(v.to_string()))
                            .collect::<Vec<_>>()
                            .join(","),
                        other => other.to_string(),
                    };
                    requirements.apply(&key, &text);
                    found = true;
                }
                continue;
            }

            for line in message.content.lines() {
                let line = line.trim().trim_start_matches(['-', '*']).trim();
                let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('='))
                else {
                    continue;
                };
                if key.trim().is_empty() || key.contains(char::is_whitespace) && key.len() > 24 {
                    continue;
                }
                requirements.apply(key, value);
                found = true;
            }
        }

        found.then_some(requirements)
    }
}
