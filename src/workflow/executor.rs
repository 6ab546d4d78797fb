use anyhow::{Context, Result, anyhow, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::{AuditLogEntry, AuditResult, AuditTrail};
use crate::decisions::{DECISION_LOG_PATH, render_markdown};
use crate::orchestrator::{ModuleOrchestrator, ModuleResult, ProgressCallback, ProjectContext};
use crate::scm::{RepoFile, RepositoryInfo, SourceControlProvider};
use crate::session::{DeliveryResult, ExecutionPlan, ExecutionStep, SessionStatus, StepOperation};

/// Commit message used for the initial push.
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial scaffold";

/// State carried from step to step within one execution.
pub struct ExecutionState {
    pub ctx: ProjectContext,
    pub repository: Option<RepositoryInfo>,
    pub delivery: DeliveryResult,
}

impl ExecutionState {
    pub fn new(ctx: ProjectContext) -> Self {
        Self {
            ctx,
            repository: None,
            delivery: DeliveryResult::default(),
        }
    }

    fn repository(&self) -> Result<&RepositoryInfo> {
        self.repository
            .as_ref()
            .ok_or_else(|| anyhow!("Repository has not been created yet"))
    }
}

/// Runs single plan steps against the collaborators.
pub struct StepRunner<'a> {
    pub plan: &'a ExecutionPlan,
    pub orchestrator: &'a ModuleOrchestrator,
    pub scm: Option<&'a dyn SourceControlProvider>,
    pub audit: &'a AuditTrail,
    pub progress: Option<&'a ProgressCallback>,
}

impl StepRunner<'_> {
    fn scm(&self) -> Result<&dyn SourceControlProvider> {
        self.scm
            .ok_or_else(|| anyhow!("No source control provider is configured"))
    }

    /// Run one step, returning its result text.
    pub async fn run(
        &self,
        step: &ExecutionStep,
        state: &mut ExecutionState,
        cancel: &CancellationToken,
    ) -> Result<String> {
        match step.operation {
            StepOperation::CreateWorkspace => {
                state
                    .ctx
                    .fs
                    .create_workspace()
                    .await
                    .context("Failed to create workspace")?;
                Ok("workspace ready".to_string())
            }
            StepOperation::GenerateFiles => self.generate_files(state, cancel).await,
            StepOperation::CreateRepository => {
                let description = &self.plan.requirements.description;
                let repo = self
                    .scm()?
                    .create_repository(&self.plan.repository, description)
                    .await?;
                let summary = format!("created {}", repo.url);
                state.delivery.repository_url = Some(repo.url.clone());
                state.repository = Some(repo);
                Ok(summary)
            }
            StepOperation::PushFiles => {
                let repo = state.repository()?;
                let mut files = Vec::with_capacity(state.ctx.generated_files.len());
                for path in &state.ctx.generated_files {
                    let content = state
                        .ctx
                        .fs
                        .read_bytes(path)
                        .await
                        .with_context(|| format!("Failed to read generated file {}", path))?;
                    files.push(RepoFile {
                        path: path.clone(),
                        content,
                    });
                }
                self.scm()?
                    .push_files(repo, &files, INITIAL_COMMIT_MESSAGE)
                    .await?;
                Ok(format!("pushed {} file(s)", files.len()))
            }
            StepOperation::ConfigureBranchProtection => {
                let repo = state.repository()?;
                let branch = repo.default_branch.clone();
                self.scm()?.configure_branch_protection(repo, &branch).await?;
                Ok(format!("protected {}", branch))
            }
            StepOperation::CreatePipeline => {
                let Some(definition) = &self.plan.pipeline else {
                    bail!("Plan has a pipeline step but no pipeline definition");
                };
                let repo = state.repository()?;
                let pipeline = self.scm()?.create_pipeline(repo, definition).await?;
                state.delivery.pipeline_url = pipeline.url.clone();
                Ok(format!("pipeline {} registered", pipeline.name))
            }
            StepOperation::WriteDecisionLog => {
                let records = state.ctx.decisions.records();
                let markdown = render_markdown(&self.plan.requirements.project_name, &records);
                state
                    .ctx
                    .fs
                    .write_text(DECISION_LOG_PATH, &markdown)
                    .await
                    .context("Failed to write decision log")?;
                state.ctx.record_files(&[DECISION_LOG_PATH.to_string()]);
                Ok(format!("{} decision(s) recorded", records.len()))
            }
        }
    }

    /// Module failures are recorded but do not fail the step; only
    /// cancellation does.
    async fn generate_files(
        &self,
        state: &mut ExecutionState,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let run = self
            .orchestrator
            .execute_all(&mut state.ctx, self.progress, cancel)
            .await;

        for result in &run.results {
            self.audit.record(module_entry(&state.ctx.session_id, result));
        }
        let failed = run.failures().count();
        state.delivery.module_results.extend(run.results.iter().cloned());

        if run.cancelled {
            bail!("cancelled");
        }
        if failed > 0 {
            warn!(
                session_id = %state.ctx.session_id,
                failed,
                "Some modules failed; continuing"
            );
        }
        info!(
            session_id = %state.ctx.session_id,
            modules = run.results.len(),
            files = state.ctx.generated_files.len(),
            "Files generated"
        );
        Ok(format!(
            "{} module(s) run, {} failed, {} file(s) generated",
            run.results.len(),
            failed,
            state.ctx.generated_files.len()
        ))
    }
}

fn module_entry(session_id: &str, result: &ModuleResult) -> AuditLogEntry {
    let outcome = if result.success {
        AuditResult::Success
    } else {
        AuditResult::Failure
    };
    AuditLogEntry::new(
        session_id,
        "module_executed",
        SessionStatus::Executing.as_str(),
        outcome,
    )
    .agent(result.module_id.clone())
    .detail(result.error_message.clone().unwrap_or_else(|| {
        format!("{} file(s) created", result.files_created.len())
    }))
    .duration(result.duration)
    .param("module", &result.module_id)
}
