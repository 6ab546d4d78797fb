use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use super::{
    PipelineInfo, PipelineRun, PipelineStatus, RepoFile, RepositoryInfo, SourceControlProvider,
};
use crate::fs::{FileSystem, LocalFileSystem, single_segment};
use crate::session::{PipelineDefinition, RepositoryTarget};

/// A call made against [`LocalScmProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScmCall {
    CreateRepository { name: String, private: bool },
    PushFiles { repo: String, files: Vec<String> },
    ConfigureBranchProtection { repo: String, branch: String },
    CreatePipeline { repo: String, file_path: String },
    TriggerPipeline { repo: String, pipeline: String },
}

impl ScmCall {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateRepository { .. } => "create_repository",
            Self::PushFiles { .. } => "push_files",
            Self::ConfigureBranchProtection { .. } => "configure_branch_protection",
            Self::CreatePipeline { .. } => "create_pipeline",
            Self::TriggerPipeline { .. } => "trigger_pipeline",
        }
    }
}

/// Offline provider.
///
/// Records every call. With a root directory, pushed files are mirrored to
/// `<root>/<repo-name>/`. Individual operations can be told to fail, which
/// the workflow tests use to exercise failure paths.
#[derive(Debug, Default)]
pub struct LocalScmProvider {
    root: Option<PathBuf>,
    owner: String,
    calls: Mutex<Vec<ScmCall>>,
    failing: Mutex<HashSet<String>>,
}

impl LocalScmProvider {
    pub fn new() -> Self {
        Self {
            owner: "local".to_string(),
            ..Self::default()
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::new()
        }
    }

    /// Make every later call of `operation` (e.g. `"create_repository"`) fail.
    pub fn fail_on(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation.to_string());
        }
    }

    pub fn calls(&self) -> Vec<ScmCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: ScmCall) -> Result<()> {
        let operation = call.operation();
        if self
            .failing
            .lock()
            .map(|f| f.contains(operation))
            .unwrap_or(false)
        {
            bail!("Simulated {} failure", operation);
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        Ok(())
    }

    fn repo_url(&self, name: &str) -> String {
        match &self.root {
            Some(root) => format!("file://{}", root.join(name).display()),
            None => format!("local://{}/{}", self.owner, name),
        }
    }
}

#[async_trait]
impl SourceControlProvider for LocalScmProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn validate_connection(&self) -> Result<bool> {
        Ok(true)
    }

    async fn authenticated_user(&self) -> Result<String> {
        Ok(self.owner.clone())
    }

    async fn create_repository(
        &self,
        target: &RepositoryTarget,
        _description: &str,
    ) -> Result<RepositoryInfo> {
        let name = single_segment(&target.name)?;
        self.record(ScmCall::CreateRepository {
            name: target.name.clone(),
            private: target.private,
        })?;
        if let Some(root) = &self.root {
            let dir = root.join(name);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let owner = target.owner.clone().unwrap_or_else(|| self.owner.clone());
        Ok(RepositoryInfo {
            name: target.name.clone(),
            full_name: format!("{}/{}", owner, target.name),
            url: self.repo_url(&target.name),
            default_branch: target.default_branch.clone(),
        })
    }

    async fn push_files(
        &self,
        repo: &RepositoryInfo,
        files: &[RepoFile],
        _message: &str,
    ) -> Result<()> {
        let name = single_segment(&repo.name)?;
        self.record(ScmCall::PushFiles {
            repo: repo.full_name.clone(),
            files: files.iter().map(|f| f.path.clone()).collect(),
        })?;
        if let Some(root) = &self.root {
            let mirror = LocalFileSystem::new(root.join(name));
            for file in files {
                mirror.write_bytes(&file.path, &file.content).await?;
            }
        }
        Ok(())
    }

    async fn configure_branch_protection(&self, repo: &RepositoryInfo, branch: &str) -> Result<()> {
        self.record(ScmCall::ConfigureBranchProtection {
            repo: repo.full_name.clone(),
            branch: branch.to_string(),
        })
    }

    async fn create_pipeline(
        &self,
        repo: &RepositoryInfo,
        pipeline: &PipelineDefinition,
    ) -> Result<PipelineInfo> {
        self.record(ScmCall::CreatePipeline {
            repo: repo.full_name.clone(),
            file_path: pipeline.file_path.clone(),
        })?;
        Ok(PipelineInfo {
            id: pipeline.file_path.clone(),
            name: pipeline.name.clone(),
            url: Some(format!("{}/pipelines/{}", repo.url, pipeline.name)),
        })
    }

    async fn trigger_pipeline(
        &self,
        repo: &RepositoryInfo,
        pipeline: &PipelineInfo,
        _branch: &str,
    ) -> Result<PipelineRun> {
        self.record(ScmCall::TriggerPipeline {
            repo: repo.full_name.clone(),
            pipeline: pipeline.id.clone(),
        })?;
        Ok(PipelineRun {
            id: format!("{}-run-1", pipeline.name),
            url: pipeline.url.clone(),
        })
    }

    async fn pipeline_status(
        &self,
        _repo: &RepositoryInfo,
        _run: &PipelineRun,
    ) -> Result<PipelineStatus> {
        Ok(PipelineStatus::Succeeded)
    }
}
