//! End-to-end workflow tests against the library API.

use std::sync::Arc;

use reposmith::audit::export::{parse_csv, to_csv};
use reposmith::audit::{AuditResult, AuditTrail};
use reposmith::errors::WorkflowError;
use reposmith::fs::{FileSystem, MemoryFileSystem};
use reposmith::policy::PolicyEngine;
use reposmith::scm::{LocalScmProvider, ScmCall, SourceControlProvider};
use reposmith::session::{SessionStatus, StepOperation};
use reposmith::store::{JsonFileBackend, SessionStore};
use reposmith::workflow::{CANCELLED_REASON, WorkflowService, Workspace};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const REQUIREMENTS: &str =
    "project_name: billing-api\nlanguage: python\nframework: fastapi\nproject_type: service";

struct Harness {
    service: WorkflowService,
    fs: Arc<MemoryFileSystem>,
    scm: Arc<LocalScmProvider>,
}

fn harness() -> Harness {
    let fs = Arc::new(MemoryFileSystem::new());
    let scm = Arc::new(LocalScmProvider::new());
    let provider: Arc<dyn SourceControlProvider> = scm.clone();
    let service = WorkflowService::new(
        Arc::new(SessionStore::in_memory()),
        Workspace::Shared(fs.clone()),
    )
    .with_scm(provider, Some("acme".to_string()));
    Harness { service, fs, scm }
}

async fn planned_and_approved(service: &WorkflowService) -> String {
    let id = service.create_session(Some("dev".into())).id;
    let session = service.post_message(&id, REQUIREMENTS).await.unwrap();
    assert_eq!(session.status, SessionStatus::Planning);
    let session = service.generate_plan(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::AwaitingApproval);
    service.approve(&id, true).await.unwrap();
    id
}

#[tokio::test]
async fn test_scaffold_with_source_control_completes() {
    let h = harness();
    let id = planned_and_approved(&h.service).await;

    let session = h
        .service
        .execute(&id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    let plan = session.plan.as_ref().unwrap();
    assert!(plan.steps.iter().all(|s| s.completed));
    assert!(plan
        .steps
        .iter()
        .any(|s| s.operation == StepOperation::CreateRepository));
    assert_eq!(plan.template, "python-fastapi-service");

    let delivery = session.delivery.as_ref().unwrap();
    assert!(delivery.repository_url.as_deref().unwrap().contains("billing-api"));
    assert!(delivery.completed_at.is_some());
    assert!(delivery.files_written.iter().any(|f| f == "README.md"));

    assert!(h.fs.exists("docs/DECISIONS.md").await);
    let calls = h.scm.calls();
    assert!(matches!(
        calls.first(),
        Some(ScmCall::CreateRepository { name, .. }) if name == "billing-api"
    ));
    assert!(calls
        .iter()
        .any(|c| matches!(c, ScmCall::PushFiles { files, .. } if files.iter().any(|f| f == "README.md"))));

    let actions: Vec<String> = h
        .service
        .audit()
        .entries_for(&id)
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions.first().map(String::as_str), Some("session_created"));
    assert!(actions.iter().any(|a| a == "plan_generated"));
    assert!(actions.iter().any(|a| a == "push_files"));
}

#[tokio::test]
async fn test_push_failure_fails_session_and_keeps_progress() {
    let h = harness();
    h.scm.fail_on("push_files");
    let id = planned_and_approved(&h.service).await;

    let session = h
        .service
        .execute(&id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    let reason = session.failure_reason.as_deref().unwrap();
    assert!(reason.contains("push_files"));

    let plan = session.plan.as_ref().unwrap();
    let create_repo = plan
        .steps
        .iter()
        .find(|s| s.operation == StepOperation::CreateRepository)
        .unwrap();
    assert!(create_repo.completed);
    let push = plan
        .steps
        .iter()
        .find(|s| s.operation == StepOperation::PushFiles)
        .unwrap();
    assert!(!push.completed);

    let failure = h
        .service
        .audit()
        .entries_for(&id)
        .into_iter()
        .find(|e| e.action == "push_files")
        .unwrap();
    assert_eq!(failure.result, AuditResult::Failure);

    let err = h
        .service
        .execute(&id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::TerminalState { .. }));
}

#[tokio::test]
async fn test_policy_blocked_plan_stays_in_planning() {
    let h = harness();
    let id = h.service.create_session(None).id;
    h.service
        .post_message(&id, "project_name: Bad Name\nlanguage: rust")
        .await
        .unwrap();

    let err = h.service.generate_plan(&id).await.unwrap_err();
    let failures = match err {
        WorkflowError::PolicyBlocked { failures } => failures,
        other => panic!("expected PolicyBlocked, got {other:?}"),
    };
    assert!(!failures.is_empty());

    let session = h.service.get_session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Planning);
    assert!(session.plan.is_some());

    let err = h.service.approve(&id, true).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_rejected_plan_is_revised() {
    let h = harness();
    let id = h.service.create_session(None).id;
    h.service.post_message(&id, REQUIREMENTS).await.unwrap();
    h.service.generate_plan(&id).await.unwrap();

    let session = h.service.approve(&id, false).await.unwrap();
    assert_eq!(session.status, SessionStatus::Planning);
    assert!(!session.plan.as_ref().unwrap().approved);

    h.service
        .post_message(&id, "include_docker: yes")
        .await
        .unwrap();
    let session = h.service.generate_plan(&id).await.unwrap();
    let plan = session.plan.as_ref().unwrap();
    assert_eq!(plan.revision, 2);
    assert!(plan.planned_files.iter().any(|f| f == "Dockerfile"));
}

#[tokio::test]
async fn test_cancelled_execution_fails_session() {
    let h = harness();
    let id = planned_and_approved(&h.service).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let session = h.service.execute(&id, &cancel).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure_reason.as_deref(), Some(CANCELLED_REASON));
    assert!(h.scm.calls().is_empty());
}

#[tokio::test]
async fn test_audit_trail_persists_and_exports() {
    let dir = TempDir::new().unwrap();
    let audit_dir = dir.path().join("audit");
    let service = WorkflowService::new(
        Arc::new(SessionStore::in_memory()),
        Workspace::Shared(Arc::new(MemoryFileSystem::new())),
    )
    .with_audit(Arc::new(AuditTrail::with_dir(&audit_dir)));

    let id = planned_and_approved(&service).await;
    service.execute(&id, &CancellationToken::new()).await.unwrap();
    let in_memory = service.audit().entries_for(&id);

    let reloaded = AuditTrail::with_dir(&audit_dir).history(&id).unwrap();
    assert_eq!(reloaded.len(), in_memory.len());
    assert_eq!(reloaded.last().unwrap().action, "transition");
    assert_eq!(reloaded.last().unwrap().phase, "Completed");

    let parsed = parse_csv(&to_csv(&reloaded)).unwrap();
    assert_eq!(parsed.len(), reloaded.len());
    assert_eq!(parsed[0].id, reloaded[0].id);
    assert_eq!(parsed[0].action, "session_created");
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let sessions_dir = dir.path().join("sessions");

    let store = SessionStore::open(Arc::new(JsonFileBackend::new(&sessions_dir))).unwrap();
    let handle = Arc::new(store).start_flush_task(std::time::Duration::from_secs(60));
    let service = WorkflowService::new(
        Arc::clone(handle.store()),
        Workspace::Shared(Arc::new(MemoryFileSystem::new())),
    );
    let id = service.create_session(Some("dev".into())).id;
    service.post_message(&id, REQUIREMENTS).await.unwrap();
    drop(service);
    let report = handle.shutdown().await;
    assert!(report.is_clean());

    let reopened = SessionStore::open(Arc::new(JsonFileBackend::new(&sessions_dir))).unwrap();
    let session = reopened.get(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Planning);
    assert_eq!(session.owner_id.as_deref(), Some("dev"));
    assert_eq!(
        session.requirements.as_ref().unwrap().project_name,
        "billing-api"
    );
}

#[tokio::test]
async fn test_local_workspace_stays_under_root_with_empty_catalog() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nested").join("workspaces");
    let service = WorkflowService::new(
        Arc::new(SessionStore::in_memory()),
        Workspace::LocalRoot(root.clone()),
    )
    .with_policies(Arc::new(PolicyEngine::new(Vec::new())));

    let id = service.create_session(None).id;
    service
        .post_message(&id, "project_name: demo\nlanguage: rust\nrepo: ../../escaped")
        .await
        .unwrap();
    let err = service.generate_plan(&id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
    assert!(!dir.path().join("escaped").exists());

    service.post_message(&id, "repo: demo").await.unwrap();
    service.generate_plan(&id).await.unwrap();
    service.approve(&id, true).await.unwrap();
    let session = service.execute(&id, &CancellationToken::new()).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(root.join("demo").join("README.md").is_file());
}
