use crate::decisions::DECISION_LOG_PATH;
use crate::orchestrator::builtin::CI_WORKFLOW_PATH;
use crate::orchestrator::{ModuleOrchestrator, ProjectContext};
use crate::session::{
    ExecutionPlan, PipelineDefinition, ProjectRequirements, RepositoryTarget, StepOperation,
    Visibility,
};
use crate::util::slugify;

pub const DEFAULT_BRANCH: &str = "main";

/// Builds execution plans from requirements.
#[derive(Debug, Clone)]
pub struct Planner {
    /// Whether a source control provider is configured. Without one the
    /// repository, push, protection and pipeline steps are left out.
    pub scm_enabled: bool,
    /// Owner used for the repository target when the requirements name none.
    pub owner: Option<String>,
    pub default_branch: String,
}

impl Default for Planner {
    fn default() -> Self {
        Self {
            scm_enabled: false,
            owner: None,
            default_branch: DEFAULT_BRANCH.to_string(),
        }
    }
}

/// Template id from language, framework and project type, e.g. `rust-cli`
/// or `python-fastapi-service`.
pub fn select_template(requirements: &ProjectRequirements) -> String {
    let mut parts = vec![slugify(&requirements.language, 24)];
    if let Some(framework) = &requirements.framework {
        let framework = slugify(framework, 24);
        if !framework.is_empty() {
            parts.push(framework);
        }
    }
    parts.push(slugify(&requirements.project_type, 24));
    parts.retain(|p| !p.is_empty());
    if parts.is_empty() {
        "generic".to_string()
    } else {
        parts.join("-")
    }
}

impl Planner {
    pub fn new(scm_enabled: bool) -> Self {
        Self {
            scm_enabled,
            ..Self::default()
        }
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    /// Build plan `revision` for `requirements`.
    ///
    /// Planned files and module order come from the orchestrator's dry run
    /// against a scratch context, so the preview matches what will execute.
    /// Policy results are left empty for the caller to fill in.
    pub fn build(
        &self,
        requirements: &ProjectRequirements,
        orchestrator: &ModuleOrchestrator,
        revision: u32,
    ) -> ExecutionPlan {
        let template = select_template(requirements);
        let mut preview = ProjectContext::preview(requirements.clone());
        preview.template = template.clone();
        let modules: Vec<String> = orchestrator
            .applicable_modules(&preview)
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        let mut planned_files = orchestrator.planned_files(&preview);
        if !planned_files.iter().any(|f| f == DECISION_LOG_PATH) {
            planned_files.push(DECISION_LOG_PATH.to_string());
        }

        let repository = RepositoryTarget {
            name: requirements.repository_name().to_string(),
            owner: self.owner.clone(),
            private: requirements.visibility == Visibility::Private,
            default_branch: self.default_branch.clone(),
        };

        let pipeline = (requirements.include_ci
            && planned_files.iter().any(|f| f == CI_WORKFLOW_PATH))
        .then(|| PipelineDefinition {
            name: "ci".to_string(),
            file_path: CI_WORKFLOW_PATH.to_string(),
            triggers: vec!["push".to_string(), "pull_request".to_string()],
        });

        let operations = self.operations(requirements, &modules, &repository, pipeline.is_some());
        let mut plan = ExecutionPlan::new(
            revision,
            requirements.clone(),
            template,
            planned_files,
            modules,
            repository,
            pipeline,
            operations,
        );
        plan.summary = plan.render_summary();
        plan
    }

    fn operations(
        &self,
        requirements: &ProjectRequirements,
        modules: &[String],
        repository: &RepositoryTarget,
        has_pipeline: bool,
    ) -> Vec<(StepOperation, String)> {
        let mut ops = vec![
            (
                StepOperation::CreateWorkspace,
                format!("Create workspace for {}", requirements.project_name),
            ),
            (
                StepOperation::GenerateFiles,
                format!("Run {} scaffolding module(s)", modules.len()),
            ),
        ];
        if self.scm_enabled {
            ops.push((
                StepOperation::CreateRepository,
                format!("Create repository {}", repository.name),
            ));
            ops.push((
                StepOperation::PushFiles,
                format!("Push generated files to {}", repository.default_branch),
            ));
            ops.push((
                StepOperation::ConfigureBranchProtection,
                format!("Protect branch {}", repository.default_branch),
            ));
            if has_pipeline {
                ops.push((StepOperation::CreatePipeline, "Register CI pipeline".to_string()));
            }
        }
        ops.push((
            StepOperation::WriteDecisionLog,
            format!("Write decision log to {}", DECISION_LOG_PATH),
        ));
        ops
    }
}
