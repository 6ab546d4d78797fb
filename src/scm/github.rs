use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{
    PipelineInfo, PipelineRun, PipelineStatus, RepoFile, RepositoryInfo, SourceControlProvider,
};
use crate::session::{PipelineDefinition, RepositoryTarget};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "reposmith";

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: String,
    full_name: String,
    html_url: String,
    #[serde(default)]
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubWorkflow {
    id: u64,
    name: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRuns {
    #[serde(default)]
    workflow_runs: Vec<GitHubRun>,
}

#[derive(Debug, Deserialize)]
struct GitHubRun {
    id: u64,
    html_url: String,
    status: Option<String>,
    conclusion: Option<String>,
}

/// Known GitHub token prefixes.
const GITHUB_TOKEN_PREFIXES: &[&str] = &["ghp_", "github_pat_", "gho_", "ghu_", "ghs_", "ghr_"];

/// Format check only; does not verify the token is active.
pub fn is_valid_github_token(token: &str) -> bool {
    !token.is_empty() && GITHUB_TOKEN_PREFIXES.iter().any(|p| token.starts_with(p))
}

/// Map a workflow run's `status`/`conclusion` pair.
pub fn map_run_status(status: Option<&str>, conclusion: Option<&str>) -> PipelineStatus {
    match (status, conclusion) {
        (Some("completed"), Some("success")) => PipelineStatus::Succeeded,
        (Some("completed"), Some("cancelled")) => PipelineStatus::Cancelled,
        (Some("completed"), Some(_)) => PipelineStatus::Failed,
        (Some("queued" | "waiting" | "requested" | "pending"), _) => PipelineStatus::Queued,
        (Some("in_progress"), _) => PipelineStatus::InProgress,
        _ => PipelineStatus::Unknown,
    }
}

/// GitHub REST binding.
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    http: reqwest::Client,
    token: String,
    api_url: String,
    /// Organization to create repositories under; the user account when unset.
    owner: Option<String>,
}

impl GitHubProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            owner: None,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        self.request(reqwest::Method::GET, path)
            .send()
            .await
            .with_context(|| format!("Failed to send GET {} to GitHub", path))?
            .error_for_status()
            .with_context(|| format!("GitHub GET {} returned error status", path))?
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse GitHub response for {}", path))
    }
}

#[async_trait]
impl SourceControlProvider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    async fn validate_connection(&self) -> Result<bool> {
        let resp = self
            .request(reqwest::Method::GET, "/user")
            .send()
            .await
            .context("Failed to reach GitHub")?;
        Ok(resp.status().is_success())
    }

    async fn authenticated_user(&self) -> Result<String> {
        let user: GitHubUser = self.get_json("/user").await?;
        Ok(user.login)
    }

    async fn create_repository(
        &self,
        target: &RepositoryTarget,
        description: &str,
    ) -> Result<RepositoryInfo> {
        let owner = target.owner.clone().or_else(|| self.owner.clone());
        let path = match &owner {
            Some(org) => format!("/orgs/{}/repos", org),
            None => "/user/repos".to_string(),
        };
        let repo: GitHubRepo = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({
                "name": target.name,
                "description": description,
                "private": target.private,
                "auto_init": false,
            }))
            .send()
            .await
            .context("Failed to send create-repository request to GitHub")?
            .error_for_status()
            .context("GitHub rejected the create-repository request")?
            .json()
            .await
            .context("Failed to parse create-repository response from GitHub")?;

        info!(repo = %repo.full_name, "Created GitHub repository");
        Ok(RepositoryInfo {
            name: repo.name,
            full_name: repo.full_name,
            url: repo.html_url,
            default_branch: repo
                .default_branch
                .unwrap_or_else(|| target.default_branch.clone()),
        })
    }

    async fn push_files(
        &self,
        repo: &RepositoryInfo,
        files: &[RepoFile],
        message: &str,
    ) -> Result<()> {
        for file in files {
            let path = format!("/repos/{}/contents/{}", repo.full_name, file.path);
            let encoded = base64::engine::general_purpose::STANDARD.encode(&file.content);
            self.request(reqwest::Method::PUT, &path)
                .json(&json!({
                    "message": message,
                    "content": encoded,
                    "branch": repo.default_branch,
                }))
                .send()
                .await
                .with_context(|| format!("Failed to push {} to GitHub", file.path))?
                .error_for_status()
                .with_context(|| format!("GitHub rejected {}", file.path))?;
            debug!(repo = %repo.full_name, file = %file.path, "Pushed file");
        }
        Ok(())
    }

    async fn configure_branch_protection(&self, repo: &RepositoryInfo, branch: &str) -> Result<()> {
        let path = format!("/repos/{}/branches/{}/protection", repo.full_name, branch);
        self.request(reqwest::Method::PUT, &path)
            .json(&json!({
                "required_status_checks": null,
                "enforce_admins": true,
                "required_pull_request_reviews": { "required_approving_review_count": 1 },
                "restrictions": null,
            }))
            .send()
            .await
            .context("Failed to send branch protection request to GitHub")?
            .error_for_status()
            .context("GitHub rejected the branch protection request")?;
        Ok(())
    }

    /// GitHub Actions workflows exist once their file is pushed; this looks
    /// the workflow up by file name.
    async fn create_pipeline(
        &self,
        repo: &RepositoryInfo,
        pipeline: &PipelineDefinition,
    ) -> Result<PipelineInfo> {
        let Some(file_name) = pipeline.file_path.rsplit('/').next() else {
            bail!("Pipeline file path is empty");
        };
        let workflow: GitHubWorkflow = self
            .get_json(&format!(
                "/repos/{}/actions/workflows/{}",
                repo.full_name, file_name
            ))
            .await?;
        Ok(PipelineInfo {
            id: workflow.id.to_string(),
            name: workflow.name,
            url: Some(workflow.html_url),
        })
    }

    async fn trigger_pipeline(
        &self,
        repo: &RepositoryInfo,
        pipeline: &PipelineInfo,
        branch: &str,
    ) -> Result<PipelineRun> {
        let path = format!(
            "/repos/{}/actions/workflows/{}/dispatches",
            repo.full_name, pipeline.id
        );
        self.request(reqwest::Method::POST, &path)
            .json(&json!({ "ref": branch }))
            .send()
            .await
            .context("Failed to dispatch GitHub workflow")?
            .error_for_status()
            .context("GitHub rejected the workflow dispatch")?;

        let runs: GitHubRuns = self
            .get_json(&format!(
                "/repos/{}/actions/workflows/{}/runs?per_page=1",
                repo.full_name, pipeline.id
            ))
            .await?;
        let run = runs
            .workflow_runs
            .into_iter()
            .next()
            .context("Workflow was dispatched but no run is visible yet")?;
        Ok(PipelineRun {
            id: run.id.to_string(),
            url: Some(run.html_url),
        })
    }

    async fn pipeline_status(
        &self,
        repo: &RepositoryInfo,
        run: &PipelineRun,
    ) -> Result<PipelineStatus> {
        let run: GitHubRun = self
            .get_json(&format!("/repos/{}/actions/runs/{}", repo.full_name, run.id))
            .await?;
        Ok(map_run_status(
            run.status.as_deref(),
            run.conclusion.as_deref(),
        ))
    }
}
