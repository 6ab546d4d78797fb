//! Read-mostly commands: sessions, audit export, policies and modules.

use anyhow::{Context, Result, bail};
use console::style;
use std::path::Path;

use reposmith::audit::export::export;
use reposmith::audit::{AuditExportFormat, AuditTrail};
use reposmith::config::ReposmithConfig;
use reposmith::orchestrator::ProjectContext;
use reposmith::policy::CatalogFormat;
use reposmith::policy::engine::parse_catalog;
use reposmith::session::ProjectRequirements;

use super::super::{AuditCommands, PoliciesCommands, SessionsCommands};
use super::{build_orchestrator, load_policies, open_store};

pub async fn cmd_sessions(config: ReposmithConfig, command: Option<SessionsCommands>) -> Result<()> {
    let store = open_store(&config)?;

    match command {
        None | Some(SessionsCommands::List) => {
            let sessions = store.list();
            if sessions.is_empty() {
                println!("No sessions found in {}", config.data_dir().display());
                return Ok(());
            }
            println!();
            println!("{:<38} {:<18} {:<24} Updated", "Session", "Status", "Project");
            println!("{:<38} {:<18} {:<24} -------", "-------", "------", "-------");
            for session in sessions {
                let project = session
                    .requirements
                    .as_ref()
                    .map(|r| r.project_name.as_str())
                    .unwrap_or("-");
                println!(
                    "{:<38} {:<18} {:<24} {}",
                    session.id,
                    session.status.as_str(),
                    project,
                    session.last_activity.format("%Y-%m-%d %H:%M")
                );
            }
            println!();
        }
        Some(SessionsCommands::Show { id }) => {
            let session = store
                .get(&id)
                .with_context(|| format!("Session {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        Some(SessionsCommands::Remove { id }) => {
            if store.remove(&id).await? {
                println!("Removed session {}", id);
            } else {
                bail!("Session {} not found", id);
            }
        }
    }
    Ok(())
}

pub fn cmd_audit(config: ReposmithConfig, command: AuditCommands) -> Result<()> {
    match command {
        AuditCommands::Export {
            session,
            format,
            output,
        } => {
            let format: AuditExportFormat = format.parse()?;
            let trail = AuditTrail::with_dir(&config.audit_dir());
            let entries = trail.history(&session)?;
            if entries.is_empty() {
                bail!("No audit entries for session {}", session);
            }
            let rendered = export(&entries, format)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} entries to {}", entries.len(), path.display());
                }
                None => print!("{}", rendered),
            }
        }
    }
    Ok(())
}

pub fn cmd_policies(config: ReposmithConfig, command: Option<PoliciesCommands>) -> Result<()> {
    match command {
        None | Some(PoliciesCommands::List) => {
            let engine = load_policies(&config)?;
            let source = engine
                .source()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "built-in".to_string());
            println!();
            println!("Policies ({})", style(source).dim());
            println!();
            println!("{:<24} {:<9} {:<10} {:<8} Name", "Id", "Severity", "Category", "Enabled");
            for policy in engine.policies()?.iter() {
                println!(
                    "{:<24} {:<9} {:<10} {:<8} {}",
                    policy.id,
                    policy.severity.as_str(),
                    policy.category.as_str(),
                    policy.enabled,
                    policy.name
                );
            }
            println!();
        }
        Some(PoliciesCommands::Check { file }) => check_catalog(&file)?,
    }
    Ok(())
}

fn check_catalog(path: &Path) -> Result<()> {
    let format = CatalogFormat::from_path(path).with_context(|| {
        format!("Unsupported policy file {}; expected .json, .yaml or .yml", path.display())
    })?;
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match parse_catalog(&content, format) {
        Ok(policies) => {
            println!("{} is valid ({} policies)", path.display(), policies.len());
            Ok(())
        }
        Err(message) => bail!("{} is invalid: {}", path.display(), message),
    }
}

pub fn cmd_modules(config: ReposmithConfig) -> Result<()> {
    let orchestrator = build_orchestrator(&config);
    // Applicability shown for default requirements.
    let ctx = ProjectContext::preview(ProjectRequirements::named("example", "rust"));
    let applicable: Vec<String> = orchestrator
        .applicable_modules(&ctx)
        .iter()
        .map(|m| m.id().to_string())
        .collect();

    println!();
    println!("{:<16} {:<6} {:<28} Status", "Id", "Order", "Name");
    for module in orchestrator.catalog() {
        let status = if orchestrator.is_disabled(module.id()) {
            style("disabled").red().to_string()
        } else if applicable.iter().any(|id| id == module.id()) {
            style("applicable").green().to_string()
        } else {
            style("not applicable").dim().to_string()
        };
        println!(
            "{:<16} {:<6} {:<28} {}",
            module.id(),
            module.order(),
            module.name(),
            status
        );
    }
    println!();
    Ok(())
}
