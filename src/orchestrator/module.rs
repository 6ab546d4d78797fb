use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::ProjectContext;

/// A pluggable generation or configuration unit.
#[async_trait]
pub trait ScaffoldModule: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Lower runs first. Ties keep registration order.
    fn order(&self) -> i32;

    fn is_applicable(&self, ctx: &ProjectContext) -> bool;

    /// Files the module expects to create, for plan previews.
    fn planned_files(&self, _ctx: &ProjectContext) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, ctx: &ProjectContext) -> Result<ModuleOutput>;
}

/// What a module reports back on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleOutput {
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
}

impl ModuleOutput {
    pub fn created(files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            files_created: files.into_iter().map(Into::into).collect(),
            files_modified: Vec::new(),
        }
    }
}

/// Outcome of one module in one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub module_id: String,
    pub success: bool,
    #[serde(default)]
    pub files_created: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration: Duration,
}

impl ModuleResult {
    pub fn succeeded(module_id: &str, output: ModuleOutput, duration: Duration) -> Self {
        Self {
            module_id: module_id.to_string(),
            success: true,
            files_created: output.files_created,
            files_modified: output.files_modified,
            error_message: None,
            duration,
        }
    }

    pub fn failed(module_id: &str, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            module_id: module_id.to_string(),
            success: false,
            files_created: Vec::new(),
            files_modified: Vec::new(),
            error_message: Some(message.into()),
            duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Running,
    Completed,
    Failed,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress sink invoked with `(module_id, status)`. Invoked best-effort:
/// a panicking callback is caught and logged.
pub type ProgressCallback = Arc<dyn Fn(&str, ModuleStatus) + Send + Sync>;
