//! Scaffold execution: `reposmith run` and `reposmith plan`.

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reposmith::audit::AuditTrail;
use reposmith::config::ReposmithConfig;
use reposmith::errors::WorkflowError;
use reposmith::fs::MemoryFileSystem;
use reposmith::gates::{ApprovalGate, GateDecision};
use reposmith::session::{
    KeyValueExtractor, Message, ProjectRequirements, RequirementsExtractor, Role, SessionStatus,
};
use reposmith::store::SessionStore;
use reposmith::ui::ScaffoldUI;
use reposmith::ui::progress::{print_outcome, print_plan};
use reposmith::workflow::{Planner, WorkflowService, Workspace};

use super::super::Cli;
use super::{build_llm, build_orchestrator, build_scm, load_policies, open_store};

fn read_requirements_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read requirements file: {}", path.display()))
}

/// Requirements from a file's contents, rejecting anything insufficient.
pub fn parse_requirements(content: &str) -> Result<ProjectRequirements> {
    let messages = [Message::new(Role::User, content)];
    let Some(requirements) = KeyValueExtractor.extract(&messages) else {
        bail!("No requirements found. Use `key: value` lines or a JSON object.");
    };
    if !requirements.is_sufficient() {
        bail!(
            "Requirements are incomplete; missing: {}",
            requirements.missing_fields().join(", ")
        );
    }
    Ok(requirements)
}

pub fn cmd_plan(config: ReposmithConfig, requirements_file: &Path) -> Result<()> {
    let requirements = parse_requirements(&read_requirements_file(requirements_file)?)?;
    let orchestrator = build_orchestrator(&config);
    let policies = load_policies(&config)?;

    let planner = Planner::new(config.toml.scm.provider.is_some()).with_owner(config.toml.scm.owner.clone());
    let mut plan = planner.build(&requirements, &orchestrator, 1);
    plan.policy_results = policies.validate_plan(&plan)?;
    print_plan(&plan);
    println!();
    Ok(())
}

pub async fn cmd_run(
    cli: &Cli,
    config: ReposmithConfig,
    requirements_file: &Path,
    dry_run: bool,
) -> Result<()> {
    let content = read_requirements_file(requirements_file)?;
    parse_requirements(&content)?;

    let ui = Arc::new(ScaffoldUI::new(0));
    let store = if dry_run {
        SessionStore::in_memory()
    } else {
        config.ensure_directories()?;
        open_store(&config)?
    };
    let handle = Arc::new(store).start_flush_task(config.flush_interval);

    let mut service = if dry_run {
        WorkflowService::new(
            Arc::clone(handle.store()),
            Workspace::Shared(Arc::new(MemoryFileSystem::new())),
        )
    } else {
        WorkflowService::new(
            Arc::clone(handle.store()),
            Workspace::LocalRoot(config.workspace_root()),
        )
        .with_audit(Arc::new(AuditTrail::with_dir(&config.audit_dir())))
    };
    service = service
        .with_policies(Arc::new(load_policies(&config)?))
        .with_orchestrator(build_orchestrator(&config))
        .with_progress(ui.progress_callback());
    if !dry_run {
        if let Some(scm) = build_scm(&config)? {
            service = service.with_scm(scm, config.toml.scm.owner.clone());
        }
        if let Some(llm) = build_llm(&config)? {
            service = service.with_llm(llm);
        }
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling");
            ctrl_c.cancel();
        }
    });

    let gate = ApprovalGate::new(cli.yes);
    let outcome = drive(&service, &ui, &gate, &content, &cancel).await;

    let report = handle.shutdown().await;
    if !report.is_clean() {
        warn!(failed = report.failed.len(), "Some sessions were not saved");
    }
    outcome
}

async fn drive(
    service: &WorkflowService,
    ui: &ScaffoldUI,
    gate: &ApprovalGate,
    content: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let owner = std::env::var("USER").ok();
    let id = service.create_session(owner).id;
    info!(session_id = %id, "Session started");
    println!("Session {}", console::style(&id).dim());

    let session = service.post_message(&id, content).await?;
    if session.status != SessionStatus::Planning {
        bail!("Requirements were not accepted; session is {}", session.status);
    }

    let plan = match service.generate_plan(&id).await {
        Ok(session) => session.plan.context("Plan missing after planning")?,
        Err(WorkflowError::PolicyBlocked { failures }) => {
            if let Some(plan) = service.get_session(&id)?.plan {
                print_plan(&plan);
            }
            service.fail(&id, "plan blocked by policy").await?;
            bail!("Plan blocked by policy:\n  {}", failures.join("\n  "));
        }
        Err(e) => return Err(e.into()),
    };

    print_plan(&plan);
    println!();
    match gate.check_plan(&plan)? {
        GateDecision::Approved => {
            service.approve(&id, true).await?;
        }
        GateDecision::Rejected => {
            service.approve(&id, false).await?;
            service.fail(&id, "plan rejected").await?;
            println!("Plan rejected. Edit the requirements file and run again.");
            return Ok(());
        }
        GateDecision::Aborted => {
            service.fail(&id, "aborted").await?;
            println!("Aborted.");
            return Ok(());
        }
    }

    ui.set_total(plan.modules.len() as u64);
    let session = service.execute(&id, cancel).await?;
    ui.finish(&session);

    if session.status == SessionStatus::Failed {
        bail!(
            "Scaffold failed: {}",
            session.failure_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    if session.status != SessionStatus::Completed {
        print_outcome(&session);
    }
    Ok(())
}
