//! Session lifecycle driver.
//!
//! [`WorkflowService`] moves sessions through
//! `Intake → Planning → AwaitingApproval → Executing → Delivering → Completed`
//! (or `Failed`). Each operation:
//!
//! 1. takes the per-session async lock, so two calls for the same session
//!    never interleave,
//! 2. checks the transition against the state machine before touching
//!    anything,
//! 3. applies the change through the store (which marks it dirty), and
//! 4. writes an audit entry for the transition.

pub mod executor;
pub mod planner;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::{AuditLogEntry, AuditResult, AuditTrail};
use crate::errors::WorkflowError;
use crate::fs::{FileSystem, LocalFileSystem, single_segment};
use crate::llm::{ChatMessage, LlmClient};
use crate::orchestrator::{ModuleOrchestrator, ProgressCallback, ProjectContext, builtin_modules};
use crate::policy::{PolicyEngine, all_policies_passed, blocking_failures};
use crate::scm::SourceControlProvider;
use crate::session::{
    ExecutionPlan, KeyValueExtractor, ProjectRequirements, RequirementsExtractor, Role, Session,
    SessionStatus,
};
use crate::store::SessionStore;

pub use executor::{ExecutionState, StepRunner};
pub use planner::{Planner, select_template};

/// Reason recorded when execution is cancelled by the caller.
pub const CANCELLED_REASON: &str = "cancelled";

const INTAKE_SYSTEM_PROMPT: &str = "You help turn a project idea into scaffolding requirements. \
Ask for anything missing from: project_name, language, framework, project_type, description, \
visibility, include_ci, include_docker, include_tests. Reply briefly and list known values as \
`key: value` lines.";

/// Where generated files are written.
#[derive(Clone)]
pub enum Workspace {
    /// One directory per repository under this root.
    LocalRoot(PathBuf),
    /// Every session writes into the same file system (dry runs, tests).
    Shared(Arc<dyn FileSystem>),
}

impl Workspace {
    /// File system for `repository_name`, which must be a single path
    /// segment so a local workspace stays under its root.
    pub fn open(&self, repository_name: &str) -> Result<Arc<dyn FileSystem>, WorkflowError> {
        let name = repository_dir_name(repository_name)?;
        Ok(match self {
            Workspace::LocalRoot(root) => Arc::new(LocalFileSystem::new(root.join(name))),
            Workspace::Shared(fs) => Arc::clone(fs),
        })
    }
}

fn repository_dir_name(name: &str) -> Result<String, WorkflowError> {
    single_segment(name)
        .map_err(|e| WorkflowError::Validation(format!("invalid repository name: {}", e)))
}

/// Holds a session's lock. On drop the map entry is removed when no other
/// caller holds or waits on it, so the map only tracks sessions in use.
struct SessionGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    id: String,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct WorkflowService {
    store: Arc<SessionStore>,
    policies: Arc<PolicyEngine>,
    audit: Arc<AuditTrail>,
    orchestrator: ModuleOrchestrator,
    planner: Planner,
    workspace: Workspace,
    scm: Option<Arc<dyn SourceControlProvider>>,
    llm: Option<Arc<dyn LlmClient>>,
    extractor: Arc<dyn RequirementsExtractor>,
    progress: Option<ProgressCallback>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkflowService {
    /// Service with the built-in modules and policies, an in-memory audit
    /// trail and no source control provider.
    pub fn new(store: Arc<SessionStore>, workspace: Workspace) -> Self {
        Self {
            store,
            policies: Arc::new(PolicyEngine::with_builtin()),
            audit: Arc::new(AuditTrail::new()),
            orchestrator: ModuleOrchestrator::with_modules(builtin_modules()),
            planner: Planner::default(),
            workspace,
            scm: None,
            llm: None,
            extractor: Arc::new(KeyValueExtractor),
            progress: None,
            locks: DashMap::new(),
        }
    }

    pub fn with_policies(mut self, policies: Arc<PolicyEngine>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: ModuleOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_scm(mut self, scm: Arc<dyn SourceControlProvider>, owner: Option<String>) -> Self {
        self.scm = Some(scm);
        self.planner = Planner::new(true).with_owner(owner);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn RequirementsExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn policies(&self) -> &Arc<PolicyEngine> {
        &self.policies
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn orchestrator(&self) -> &ModuleOrchestrator {
        &self.orchestrator
    }

    async fn lock_session(&self, id: &str) -> SessionGuard<'_> {
        let lock = self.locks.entry(id.to_string()).or_default().clone();
        SessionGuard {
            guard: Some(lock.lock_owned().await),
            locks: &self.locks,
            id: id.to_string(),
        }
    }

    fn require(&self, id: &str) -> Result<Session, WorkflowError> {
        self.store
            .get(id)
            .ok_or_else(|| WorkflowError::SessionNotFound { id: id.to_string() })
    }

    fn record(&self, entry: AuditLogEntry) {
        self.audit.record(entry);
    }

    /// Apply a transition through the store and audit it.
    fn transition(
        &self,
        id: &str,
        next: SessionStatus,
        detail: impl Into<String>,
    ) -> Result<Session, WorkflowError> {
        let detail = detail.into();
        let (previous, session) = self.store.update(id, |session| {
            let previous = session.transition_to(next)?;
            Ok((previous, session.clone()))
        })?;
        info!(session_id = %id, from = %previous, to = %next, "Session transition");
        self.record(
            AuditLogEntry::new(id, "transition", next.as_str(), AuditResult::Success)
                .detail(detail)
                .param("from", previous)
                .param("to", next),
        );
        Ok(session)
    }

    // ── Operations ─────────────────────────────────────────────────────

    pub fn create_session(&self, owner_id: Option<String>) -> Session {
        let session = self.store.create(owner_id);
        info!(session_id = %session.id, "Session created");
        self.record(AuditLogEntry::new(
            &session.id,
            "session_created",
            SessionStatus::Intake.as_str(),
            AuditResult::Success,
        ));
        session
    }

    pub fn get_session(&self, id: &str) -> Result<Session, WorkflowError> {
        self.require(id)
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.store.list()
    }

    pub async fn remove_session(&self, id: &str) -> Result<bool, WorkflowError> {
        let _guard = self.lock_session(id).await;
        let removed = self
            .store
            .remove(id)
            .await
            .map_err(|e| WorkflowError::Other(e.into()))?;
        if removed {
            self.record(AuditLogEntry::new(
                id,
                "session_removed",
                "removed",
                AuditResult::Success,
            ));
        }
        Ok(removed)
    }

    /// Append a user message and update requirements from the conversation.
    ///
    /// With an LLM configured, its reply is appended as an assistant message.
    /// Once the extracted requirements are sufficient an `Intake` session
    /// moves to `Planning`.
    pub async fn post_message(&self, id: &str, content: &str) -> Result<Session, WorkflowError> {
        let _guard = self.lock_session(id).await;
        let session = self.require(id)?;
        if session.status.is_terminal() {
            return Err(WorkflowError::TerminalState {
                status: session.status,
            });
        }
        if content.trim().is_empty() {
            return Err(WorkflowError::Validation("message is empty".to_string()));
        }

        self.store.append_message(id, Role::User, content)?;

        if let Some(llm) = &self.llm {
            let session = self.require(id)?;
            let history: Vec<ChatMessage> = session.messages.iter().map(ChatMessage::from).collect();
            match llm.complete(INTAKE_SYSTEM_PROMPT, &history).await {
                Ok(reply) if !reply.trim().is_empty() => {
                    self.store.append_message(id, Role::Assistant, reply)?;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(session_id = %id, error = %e, "LLM reply failed");
                    self.record(
                        AuditLogEntry::new(id, "llm_reply", session.status.as_str(), AuditResult::Failure)
                            .agent(llm.name())
                            .detail(e.to_string()),
                    );
                    return Err(WorkflowError::Other(e.into()));
                }
            }
        }

        let session = self.require(id)?;
        let Some(requirements) = self.extractor.extract(&session.messages) else {
            return Ok(session);
        };
        if !matches!(
            session.status,
            SessionStatus::Intake | SessionStatus::Planning
        ) {
            return Ok(session);
        }

        let sufficient = requirements.is_sufficient();
        let status = session.status;
        let session = self.store.update(id, |s| {
            s.requirements = Some(requirements.clone());
            s.touch();
            Ok(s.clone())
        })?;

        if status == SessionStatus::Intake && sufficient {
            let results = self
                .policies
                .validate_requirements(&requirements)
                .map_err(|e| WorkflowError::Other(e.into()))?;
            let passed = all_policies_passed(&results);
            self.record(
                AuditLogEntry::new(
                    id,
                    "requirements_validated",
                    SessionStatus::Intake.as_str(),
                    if passed {
                        AuditResult::Success
                    } else {
                        AuditResult::Failure
                    },
                )
                .detail(blocking_failures(&results).join("; "))
                .param("results", results.len()),
            );
            return self.transition(id, SessionStatus::Planning, "requirements gathered");
        }
        if !sufficient {
            info!(
                session_id = %id,
                missing = %requirements.missing_fields().join(", "),
                "Requirements incomplete"
            );
        }
        Ok(session)
    }

    /// Build and policy-check a plan for a `Planning` session.
    ///
    /// The plan is stored either way. Without blocking failures the session
    /// moves to `AwaitingApproval`; otherwise it stays in `Planning` and
    /// `PolicyBlocked` is returned.
    pub async fn generate_plan(&self, id: &str) -> Result<Session, WorkflowError> {
        let _guard = self.lock_session(id).await;
        let session = self.require(id)?;
        session
            .status
            .check_transition(SessionStatus::AwaitingApproval)?;
        let requirements = session.requirements.clone().ok_or_else(|| {
            WorkflowError::Validation("session has no requirements yet".to_string())
        })?;

        let revision = session.plan.as_ref().map(|p| p.revision + 1).unwrap_or(1);
        let plan = self.build_plan(&requirements, revision)?;
        let passed = all_policies_passed(&plan.policy_results);
        let failures = blocking_failures(&plan.policy_results);

        self.store.update(id, |s| {
            s.plan = Some(plan.clone());
            s.touch();
            Ok(())
        })?;
        self.record(
            AuditLogEntry::new(
                id,
                "plan_generated",
                SessionStatus::Planning.as_str(),
                if passed {
                    AuditResult::Success
                } else {
                    AuditResult::Failure
                },
            )
            .detail(if passed {
                plan.summary.clone()
            } else {
                failures.join("; ")
            })
            .param("revision", plan.revision)
            .param("steps", plan.steps.len()),
        );

        if !passed {
            warn!(session_id = %id, failures = failures.len(), "Plan blocked by policy");
            return Err(WorkflowError::PolicyBlocked { failures });
        }
        self.transition(
            id,
            SessionStatus::AwaitingApproval,
            format!("plan r{} ready", plan.revision),
        )
    }

    /// Plan for requirements without a session, for previews.
    pub fn preview_plan(&self, requirements: &ProjectRequirements) -> Result<ExecutionPlan, WorkflowError> {
        self.build_plan(requirements, 1)
    }

    fn build_plan(
        &self,
        requirements: &ProjectRequirements,
        revision: u32,
    ) -> Result<ExecutionPlan, WorkflowError> {
        repository_dir_name(requirements.repository_name())?;
        let mut plan = self.planner.build(requirements, &self.orchestrator, revision);
        plan.policy_results = self
            .policies
            .validate_plan(&plan)
            .map_err(|e| WorkflowError::Other(e.into()))?;
        Ok(plan)
    }

    /// Approve or reject the pending plan.
    pub async fn approve(&self, id: &str, approved: bool) -> Result<Session, WorkflowError> {
        let _guard = self.lock_session(id).await;
        let session = self.require(id)?;
        let next = if approved {
            SessionStatus::Executing
        } else {
            SessionStatus::Planning
        };
        session.status.check_transition(next)?;
        if session.plan.is_none() {
            return Err(WorkflowError::NoPlan { id: id.to_string() });
        }

        self.store.update(id, |s| {
            if let Some(plan) = s.plan.as_mut() {
                plan.approved = approved;
            }
            Ok(())
        })?;
        let detail = if approved {
            "plan approved"
        } else {
            "plan rejected; revising"
        };
        self.transition(id, next, detail)
    }

    /// Execute the approved plan step by step.
    ///
    /// Step failures and cancellation do not error this call: the session
    /// comes back `Failed` with the reason recorded. Errors are returned for
    /// unknown sessions and illegal states only.
    pub async fn execute(&self, id: &str, cancel: &CancellationToken) -> Result<Session, WorkflowError> {
        let _guard = self.lock_session(id).await;
        let session = self.require(id)?;
        if session.status.is_terminal() {
            return Err(WorkflowError::TerminalState {
                status: session.status,
            });
        }
        if session.status != SessionStatus::Executing {
            return Err(WorkflowError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Delivering,
            });
        }
        let plan = session
            .plan
            .clone()
            .ok_or_else(|| WorkflowError::NoPlan { id: id.to_string() })?;
        if !plan.approved {
            return Err(WorkflowError::Validation("plan has not been approved".to_string()));
        }

        let fs = self.workspace.open(&plan.repository.name)?;
        let ctx = ProjectContext::new(id, plan.requirements.clone(), plan.template.clone(), fs);
        let mut state = ExecutionState::new(ctx);
        let runner = StepRunner {
            plan: &plan,
            orchestrator: &self.orchestrator,
            scm: self.scm.as_deref(),
            audit: &self.audit,
            progress: self.progress.as_ref(),
        };

        for step in plan.steps.iter().filter(|s| !s.completed) {
            let started = std::time::Instant::now();
            let outcome = if cancel.is_cancelled() {
                Err(anyhow::anyhow!(CANCELLED_REASON))
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(anyhow::anyhow!(CANCELLED_REASON)),
                    outcome = runner.run(step, &mut state, cancel) => outcome,
                }
            };

            match outcome {
                Ok(result) => {
                    info!(session_id = %id, step = step.number, operation = %step.operation, "Step completed");
                    self.record(
                        AuditLogEntry::new(
                            id,
                            step.operation.as_str(),
                            SessionStatus::Executing.as_str(),
                            AuditResult::Success,
                        )
                        .detail(result.clone())
                        .duration(started.elapsed())
                        .param("step", step.number),
                    );
                    let number = step.number;
                    self.store.update(id, |s| {
                        if let Some(plan) = s.plan.as_mut() {
                            plan.complete_step(number, result)?;
                        }
                        Ok(())
                    })?;
                }
                Err(e) => {
                    let cancelled = cancel.is_cancelled();
                    let reason = if cancelled {
                        CANCELLED_REASON.to_string()
                    } else {
                        format!("step {} ({}) failed: {:#}", step.number, step.operation, e)
                    };
                    warn!(session_id = %id, step = step.number, error = %reason, "Execution failed");
                    self.record(
                        AuditLogEntry::new(
                            id,
                            step.operation.as_str(),
                            SessionStatus::Executing.as_str(),
                            AuditResult::Failure,
                        )
                        .detail(reason.clone())
                        .duration(started.elapsed())
                        .param("step", step.number),
                    );
                    return self.fail_locked(id, &reason, step.number, state);
                }
            }
        }

        self.transition(id, SessionStatus::Delivering, "all steps completed")?;
        let mut delivery = state.delivery;
        delivery.files_written = state.ctx.generated_files.clone();
        delivery.completed_at = Some(Utc::now());
        let failed_modules = delivery.failed_modules().len();
        self.store.update(id, |s| {
            s.delivery = Some(delivery);
            Ok(())
        })?;
        self.transition(
            id,
            SessionStatus::Completed,
            format!("delivered; {} module failure(s)", failed_modules),
        )
    }

    fn fail_locked(
        &self,
        id: &str,
        reason: &str,
        step_number: u32,
        state: ExecutionState,
    ) -> Result<Session, WorkflowError> {
        let mut delivery = state.delivery;
        delivery.files_written = state.ctx.generated_files;
        let (previous, session) = self.store.update(id, |s| {
            if let Some(plan) = s.plan.as_mut() {
                plan.record_step_failure(step_number, reason);
            }
            s.delivery = Some(delivery);
            let previous = s.fail(reason)?;
            Ok((previous, s.clone()))
        })?;
        self.record(
            AuditLogEntry::new(id, "transition", SessionStatus::Failed.as_str(), AuditResult::Failure)
                .detail(reason)
                .param("from", previous)
                .param("to", SessionStatus::Failed),
        );
        Ok(session)
    }

    /// Mark a session `Failed` from any non-terminal state.
    pub async fn fail(&self, id: &str, reason: &str) -> Result<Session, WorkflowError> {
        let _guard = self.lock_session(id).await;
        let (previous, session) = self.store.update(id, |s| {
            let previous = s.fail(reason)?;
            Ok((previous, s.clone()))
        })?;
        warn!(session_id = %id, from = %previous, reason, "Session failed");
        self.record(
            AuditLogEntry::new(id, "transition", SessionStatus::Failed.as_str(), AuditResult::Failure)
                .detail(reason)
                .param("from", previous)
                .param("to", SessionStatus::Failed),
        );
        Ok(session)
    }
}
