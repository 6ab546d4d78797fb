use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::requirements::ProjectRequirements;
use crate::policy::PolicyValidationResult;

/// Named operation performed by an execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOperation {
    CreateWorkspace,
    GenerateFiles,
    CreateRepository,
    PushFiles,
    ConfigureBranchProtection,
    CreatePipeline,
    WriteDecisionLog,
}

impl StepOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateWorkspace => "create_workspace",
            Self::GenerateFiles => "generate_files",
            Self::CreateRepository => "create_repository",
            Self::PushFiles => "push_files",
            Self::ConfigureBranchProtection => "configure_branch_protection",
            Self::CreatePipeline => "create_pipeline",
            Self::WriteDecisionLog => "write_decision_log",
        }
    }
}

impl std::fmt::Display for StepOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// 1-based position; defines execution order.
    pub number: u32,
    pub description: String,
    pub operation: StepOperation,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryTarget {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub private: bool,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    /// Path of the pipeline definition file inside the repository.
    pub file_path: String,
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    /// Incremented each time a rejected plan is replaced.
    pub revision: u32,
    pub requirements: ProjectRequirements,
    pub template: String,
    pub planned_files: Vec<String>,
    /// Module ids that will run, in execution order.
    pub modules: Vec<String>,
    pub repository: RepositoryTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineDefinition>,
    pub policy_results: Vec<PolicyValidationResult>,
    pub approved: bool,
    pub steps: Vec<ExecutionStep>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// Build a plan whose steps are numbered contiguously from 1 in the
    /// order given.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        revision: u32,
        requirements: ProjectRequirements,
        template: impl Into<String>,
        planned_files: Vec<String>,
        modules: Vec<String>,
        repository: RepositoryTarget,
        pipeline: Option<PipelineDefinition>,
        operations: Vec<(StepOperation, String)>,
    ) -> Self {
        let steps = operations
            .into_iter()
            .enumerate()
            .map(|(i, (operation, description))| ExecutionStep {
                number: i as u32 + 1,
                description,
                operation,
                completed: false,
                result: None,
            })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            revision,
            requirements,
            template: template.into(),
            planned_files,
            modules,
            repository,
            pipeline,
            policy_results: Vec::new(),
            approved: false,
            steps,
            summary: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_step(&self, operation: StepOperation) -> bool {
        self.steps.iter().any(|s| s.operation == operation)
    }

    /// Check that step numbers run 1..=n without gaps.
    pub fn steps_are_contiguous(&self) -> bool {
        self.steps
            .iter()
            .enumerate()
            .all(|(i, step)| step.number == i as u32 + 1)
    }

    pub fn next_pending_step(&self) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| !s.completed)
    }

    pub fn all_steps_completed(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.completed).count()
    }

    /// Mark step `number` as completed with a result string.
    ///
    /// Completion is monotonic: completing an already-completed step fails
    /// and leaves the recorded result untouched.
    pub fn complete_step(&mut self, number: u32, result: impl Into<String>) -> Result<()> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.number == number)
            .ok_or_else(|| anyhow::anyhow!("Step {} does not exist in plan", number))?;
        if step.completed {
            bail!("Step {} is already completed", number);
        }
        step.completed = true;
        step.result = Some(result.into());
        Ok(())
    }

    /// Record a failure message on a step without marking it completed.
    pub fn record_step_failure(&mut self, number: u32, message: impl Into<String>) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.number == number)
            && !step.completed
        {
            step.result = Some(message.into());
        }
    }

    /// Failing policy results, formatted for display.
    pub fn policy_failures(&self) -> Vec<String> {
        self.policy_results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.to_string())
            .collect()
    }

    pub fn render_summary(&self) -> String {
        let req = &self.requirements;
        let mut out = format!(
            "Plan r{} for '{}' ({} / template {})\n",
            self.revision, req.project_name, req.language, self.template
        );
        out.push_str(&format!(
            "Repository: {}{} ({})\n",
            self.repository
                .owner
                .as_ref()
                .map(|o| format!("{}/", o))
                .unwrap_or_default(),
            self.repository.name,
            if self.repository.private {
                "private"
            } else {
                "public"
            }
        ));
        if let Some(ref pipeline) = self.pipeline {
            out.push_str(&format!("Pipeline: {} ({})\n", pipeline.name, pipeline.file_path));
        }
        out.push_str(&format!("Modules: {}\n", self.modules.join(", ")));
        out.push_str(&format!("Files: {}\n", self.planned_files.len()));
        out.push_str("Steps:\n");
        for step in &self.steps {
            out.push_str(&format!("  {}. {}\n", step.number, step.description));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_plan() -> ExecutionPlan {
        ExecutionPlan::new(
            1,
            ProjectRequirements::named("demo-app", "rust"),
            "rust-cli",
            vec![".gitignore".into(), "README.md".into()],
            vec!["gitignore".into(), "readme".into()],
            RepositoryTarget {
                name: "demo-app".into(),
                owner: Some("acme".into()),
                private: true,
                default_branch: "main".into(),
            },
            None,
            vec![
                (StepOperation::CreateWorkspace, "Create workspace".into()),
                (StepOperation::GenerateFiles, "Generate files".into()),
                (StepOperation::WriteDecisionLog, "Write decisions".into()),
            ],
        )
    }

    #[test]
    fn test_steps_numbered_from_one() {
        let plan = make_plan();
        let numbers: Vec<u32> = plan.steps.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(plan.steps_are_contiguous());
        assert!(!plan.approved);
    }

    #[test]
    fn test_complete_step_is_monotonic() {
        let mut plan = make_plan();
        plan.complete_step(1, "ok").unwrap();
        assert!(plan.complete_step(1, "again").is_err());
        assert_eq!(plan.steps[0].result.as_deref(), Some("ok"));
        assert_eq!(plan.completed_count(), 1);
        assert_eq!(plan.next_pending_step().map(|s| s.number), Some(2));
    }

    #[test]
    fn test_complete_unknown_step_fails() {
        let mut plan = make_plan();
        assert!(plan.complete_step(9, "x").is_err());
    }

    #[test]
    fn test_record_failure_keeps_step_pending() {
        let mut plan = make_plan();
        plan.record_step_failure(2, "boom");
        assert!(!plan.steps[1].completed);
        assert_eq!(plan.steps[1].result.as_deref(), Some("boom"));
    }

    #[test]
    fn test_all_steps_completed() {
        let mut plan = make_plan();
        for n in 1..=3 {
            plan.complete_step(n, "done").unwrap();
        }
        assert!(plan.all_steps_completed());
        assert!(plan.next_pending_step().is_none());
    }

    #[test]
    fn test_render_summary_lists_steps() {
        let plan = make_plan();
        let summary = plan.render_summary();
        assert!(summary.contains("acme/demo-app"));
        assert!(summary.contains("1. Create workspace"));
        assert!(summary.contains("3. Write decisions"));
    }
}
