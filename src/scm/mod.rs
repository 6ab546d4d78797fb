//! Source control provider contract.
//!
//! The workflow creates repositories, pushes generated files, protects the
//! default branch and registers CI pipelines through [`SourceControlProvider`]
//! only. Platform bindings live in submodules.

pub mod github;
pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::{PipelineDefinition, RepositoryTarget};

pub use github::GitHubProvider;
pub use local::{LocalScmProvider, ScmCall};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    pub url: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    pub path: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl PipelineStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[async_trait]
pub trait SourceControlProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Check that the provider is reachable and the credentials work.
    async fn validate_connection(&self) -> Result<bool>;

    async fn authenticated_user(&self) -> Result<String>;

    async fn create_repository(
        &self,
        target: &RepositoryTarget,
        description: &str,
    ) -> Result<RepositoryInfo>;

    async fn push_files(
        &self,
        repo: &RepositoryInfo,
        files: &[RepoFile],
        message: &str,
    ) -> Result<()>;

    async fn configure_branch_protection(&self, repo: &RepositoryInfo, branch: &str) -> Result<()>;

    async fn create_pipeline(
        &self,
        repo: &RepositoryInfo,
        pipeline: &PipelineDefinition,
    ) -> Result<PipelineInfo>;

    async fn trigger_pipeline(
        &self,
        repo: &RepositoryInfo,
        pipeline: &PipelineInfo,
        branch: &str,
    ) -> Result<PipelineRun>;

    async fn pipeline_status(&self, repo: &RepositoryInfo, run: &PipelineRun)
    -> Result<PipelineStatus>;
}
