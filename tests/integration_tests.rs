//! CLI integration tests for reposmith.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const REQUIREMENTS: &str = "project_name: demo-service\nlanguage: rust\nproject_type: service\ninclude_docker: yes\n";

fn reposmith() -> Command {
    let mut cmd = cargo_bin_cmd!("reposmith");
    for var in [
        "GITHUB_TOKEN",
        "ANTHROPIC_API_KEY",
        "OPENAI_API_KEY",
        "REPOSMITH_DISABLED_MODULES",
        "REPOSMITH_FLUSH_INTERVAL_SECS",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir) {
    reposmith()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn write_requirements(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("requirements.txt");
    fs::write(&path, content).unwrap();
    path
}

fn session_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let sessions = dir.join(".reposmith/sessions");
    match fs::read_dir(&sessions) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

// =============================================================================
// Basic CLI
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        reposmith()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("sessions"));
    }

    #[test]
    fn test_version() {
        reposmith().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized reposmith project"));

        assert!(dir.path().join(".reposmith/reposmith.toml").is_file());
        assert!(dir.path().join(".reposmith/policies.yaml").is_file());
        assert!(dir.path().join(".reposmith/sessions").is_dir());
        assert!(dir.path().join(".reposmith/audit").is_dir());
    }

    #[test]
    fn test_init_twice() {
        let dir = create_temp_project();
        init_project(&dir);
        reposmith()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_unknown_command_fails() {
        reposmith().arg("nope").assert().failure();
    }
}

// =============================================================================
// Config
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_show_without_config_uses_defaults() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("flush_interval_secs = 5"));
    }

    #[test]
    fn test_validate_after_init() {
        let dir = create_temp_project();
        init_project(&dir);
        reposmith()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_validate_reports_unknown_module() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".reposmith")).unwrap();
        fs::write(
            dir.path().join(".reposmith/reposmith.toml"),
            "[modules]\ndisabled = [\"nonexistent\"]\n",
        )
        .unwrap();
        reposmith()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("nonexistent"));
    }

    #[test]
    fn test_config_init_writes_file_once() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created reposmith.toml"));
        reposmith()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_invalid_config_fails() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".reposmith")).unwrap();
        fs::write(dir.path().join(".reposmith/reposmith.toml"), "[store\n").unwrap();
        reposmith()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Modules and policies
// =============================================================================

mod catalog {
    use super::*;

    #[test]
    fn test_modules_lists_builtins_in_order() {
        let dir = create_temp_project();
        let output = reposmith()
            .current_dir(dir.path())
            .arg("modules")
            .output()
            .unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        let gitignore = stdout.find("gitignore").unwrap();
        let readme = stdout.find("readme").unwrap();
        let tests = stdout.find("tests-scaffold").unwrap();
        assert!(gitignore < readme && readme < tests);
    }

    #[test]
    fn test_disable_module_flag() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["modules", "--disable-module", "license"])
            .assert()
            .success()
            .stdout(predicate::str::contains("disabled"));
    }

    #[test]
    fn test_policies_list_builtin() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["policies", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("naming-convention"))
            .stdout(predicate::str::contains("built-in"));
    }

    #[test]
    fn test_policies_check_valid_file() {
        let dir = create_temp_project();
        init_project(&dir);
        reposmith()
            .current_dir(dir.path())
            .args(["policies", "check", "--file", ".reposmith/policies.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("is valid (4 policies)"));
    }

    #[test]
    fn test_policies_check_invalid_file() {
        let dir = create_temp_project();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"[{"id": "x", "name": "X", "severity": "fatal"}]"#).unwrap();
        reposmith()
            .current_dir(dir.path())
            .args(["policies", "check", "--file"])
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("is invalid"));
    }

    #[test]
    fn test_policies_check_unsupported_extension() {
        let dir = create_temp_project();
        let path = dir.path().join("policies.txt");
        fs::write(&path, "policies: []").unwrap();
        reposmith()
            .current_dir(dir.path())
            .args(["policies", "check", "--file"])
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unsupported policy file"));
    }
}

// =============================================================================
// Plan and run
// =============================================================================

mod scaffold {
    use super::*;

    #[test]
    fn test_plan_preview() {
        let dir = create_temp_project();
        let req = write_requirements(dir.path(), REQUIREMENTS);
        reposmith()
            .current_dir(dir.path())
            .args(["plan", "--requirements"])
            .arg(&req)
            .assert()
            .success()
            .stdout(predicate::str::contains("Plan r1"))
            .stdout(predicate::str::contains("Dockerfile"))
            .stdout(predicate::str::contains("docs/DECISIONS.md"));
    }

    #[test]
    fn test_plan_incomplete_requirements() {
        let dir = create_temp_project();
        let req = write_requirements(dir.path(), "project_name: demo\n");
        reposmith()
            .current_dir(dir.path())
            .args(["plan", "-r"])
            .arg(&req)
            .assert()
            .failure()
            .stderr(predicate::str::contains("language"));
    }

    #[test]
    fn test_plan_missing_file() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["plan", "-r", "missing.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read requirements file"));
    }

    #[test]
    fn test_dry_run_persists_nothing() {
        let dir = create_temp_project();
        let req = write_requirements(dir.path(), REQUIREMENTS);
        reposmith()
            .current_dir(dir.path())
            .args(["run", "--yes", "--dry-run", "-r"])
            .arg(&req)
            .assert()
            .success()
            .stdout(predicate::str::contains("Scaffold delivered"));
        assert!(!dir.path().join(".reposmith").exists());
    }

    #[test]
    fn test_policy_blocked_run_fails() {
        let dir = create_temp_project();
        let req = write_requirements(dir.path(), "project_name: Bad Name\nlanguage: rust\n");
        reposmith()
            .current_dir(dir.path())
            .args(["run", "--yes", "--dry-run", "-r"])
            .arg(&req)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Plan blocked by policy"));
    }

    #[test]
    fn test_run_writes_workspace_sessions_and_audit() {
        let dir = create_temp_project();
        init_project(&dir);
        let req = write_requirements(dir.path(), REQUIREMENTS);
        reposmith()
            .current_dir(dir.path())
            .args(["run", "--yes", "-r"])
            .arg(&req)
            .assert()
            .success()
            .stdout(predicate::str::contains("Scaffold delivered"));

        let workspace = dir.path().join(".reposmith/workspaces/demo-service");
        assert!(workspace.join("README.md").is_file());
        assert!(workspace.join(".gitignore").is_file());
        assert!(workspace.join("Dockerfile").is_file());
        assert!(workspace.join("docs/DECISIONS.md").is_file());

        let sessions = session_files(dir.path());
        assert_eq!(sessions.len(), 1);
        let saved = fs::read_to_string(&sessions[0]).unwrap();
        assert!(saved.contains("\"Completed\""));

        let id = sessions[0].file_stem().unwrap().to_string_lossy().to_string();
        assert!(dir.path().join(format!(".reposmith/audit/{}.jsonl", id)).is_file());

        reposmith()
            .current_dir(dir.path())
            .args(["sessions", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains(id.as_str()))
            .stdout(predicate::str::contains("demo-service"));

        reposmith()
            .current_dir(dir.path())
            .args(["audit", "export", id.as_str(), "--format", "csv"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("id,timestamp,session_id"))
            .stdout(predicate::str::contains("session_created"));
    }

    #[test]
    fn test_run_with_local_scm_mirrors_repository() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".reposmith/reposmith.toml"),
            "[scm]\nprovider = \"local\"\n",
        )
        .unwrap();

        let req = write_requirements(dir.path(), REQUIREMENTS);
        reposmith()
            .current_dir(dir.path())
            .args(["run", "--yes", "-r"])
            .arg(&req)
            .assert()
            .success()
            .stdout(predicate::str::contains("Repository: file://"));

        let mirror = dir.path().join(".reposmith/remotes/demo-service");
        assert!(mirror.join("README.md").is_file());
        assert!(mirror.join(".github/workflows/ci.yml").is_file());
    }
}

// =============================================================================
// Sessions and audit
// =============================================================================

mod sessions {
    use super::*;

    #[test]
    fn test_list_empty() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["sessions", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No sessions found"));
    }

    #[test]
    fn test_show_unknown_session() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["sessions", "show", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn test_remove_unknown_session() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["sessions", "remove", "nope"])
            .assert()
            .failure();
    }

    #[test]
    fn test_audit_export_unknown_session() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["audit", "export", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No audit entries"));
    }

    #[test]
    fn test_audit_export_rejects_path_in_session_id() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".reposmith/audit")).unwrap();
        fs::write(
            dir.path().join(".reposmith/leak.jsonl"),
            r#"{"not": "an audit entry"}"#,
        )
        .unwrap();
        reposmith()
            .current_dir(dir.path())
            .args(["audit", "export", "../leak"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid audit session id"));
    }

    #[test]
    fn test_audit_export_bad_format() {
        let dir = create_temp_project();
        reposmith()
            .current_dir(dir.path())
            .args(["audit", "export", "x", "--format", "xml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown export format"));
    }
}
