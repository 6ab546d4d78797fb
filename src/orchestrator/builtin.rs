//! Built-in scaffolding modules.
//!
//! Generated contents are deliberately small placeholders; the interesting
//! part is the ordering and the decisions each module records.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::context::ProjectContext;
use super::module::{ModuleOutput, ScaffoldModule};
use crate::decisions::{DecisionCategory, DecisionRecord};

pub const GITIGNORE_PATH: &str = ".gitignore";
pub const README_PATH: &str = "README.md";
pub const LICENSE_PATH: &str = "LICENSE";
pub const DOCKERFILE_PATH: &str = "Dockerfile";
pub const CI_WORKFLOW_PATH: &str = ".github/workflows/ci.yml";

/// The default catalog in registration order.
pub fn builtin_modules() -> Vec<Arc<dyn ScaffoldModule>> {
    vec![
        Arc::new(GitignoreModule),
        Arc::new(ReadmeModule),
        Arc::new(LicenseModule),
        Arc::new(DockerfileModule),
        Arc::new(CiPipelineModule),
        Arc::new(TestsScaffoldModule),
    ]
}

/// Ids of the built-in modules, used to validate `modules.disabled`.
pub fn builtin_module_ids() -> Vec<&'static str> {
    vec![
        "gitignore",
        "readme",
        "license",
        "dockerfile",
        "ci-pipeline",
        "tests-scaffold",
    ]
}

fn language_key(ctx: &ProjectContext) -> String {
    ctx.language().trim().to_lowercase()
}

// ── gitignore ──────────────────────────────────────────────────────────

pub struct GitignoreModule;

fn gitignore_entries(language: &str) -> &'static [&'static str] {
    match language {
        "rust" => &["/target", "**/*.rs.bk"],
        "python" => &["__pycache__/", "*.pyc", ".venv/", "dist/"],
        "typescript" | "javascript" | "node" => &["node_modules/", "dist/", "coverage/"],
        "go" => &["/bin", "*.test", "*.out"],
        "csharp" | "c#" | "dotnet" => &["bin/", "obj/", "*.user"],
        "java" | "kotlin" => &["build/", "target/", ".gradle/", "*.class"],
        _ => &["build/", "dist/"],
    }
}

#[async_trait]
impl ScaffoldModule for GitignoreModule {
    fn id(&self) -> &str {
        "gitignore"
    }

    fn name(&self) -> &str {
        "Git ignore rules"
    }

    fn order(&self) -> i32 {
        100
    }

    fn is_applicable(&self, _ctx: &ProjectContext) -> bool {
        true
    }

    fn planned_files(&self, _ctx: &ProjectContext) -> Vec<String> {
        vec![GITIGNORE_PATH.to_string()]
    }

    async fn execute(&self, ctx: &ProjectContext) -> Result<ModuleOutput> {
        let language = language_key(ctx);
        let mut content = String::from(".env\n.DS_Store\n*.log\n");
        for entry in gitignore_entries(&language) {
            content.push_str(entry);
            content.push('\n');
        }
        ctx.fs.write_text(GITIGNORE_PATH, &content).await?;

        ctx.decisions.record(
            DecisionRecord::new(
                "Ignore build output and local secrets",
                format!("Use the {} ignore set plus .env files", language),
                DecisionCategory::Tooling,
            )
            .rationale("Keeps generated artifacts and credentials out of history")
            .related_file(GITIGNORE_PATH),
        );
        Ok(ModuleOutput::created([GITIGNORE_PATH]))
    }
}

// ── readme ─────────────────────────────────────────────────────────────

pub struct ReadmeModule;

#[async_trait]
impl ScaffoldModule for ReadmeModule {
    fn id(&self) -> &str {
        "readme"
    }

    fn name(&self) -> &str {
        "README"
    }

    fn order(&self) -> i32 {
        200
    }

    fn is_applicable(&self, _ctx: &ProjectContext) -> bool {
        true
    }

    fn planned_files(&self, _ctx: &ProjectContext) -> Vec<String> {
        vec![README_PATH.to_string()]
    }

    async fn execute(&self, ctx: &ProjectContext) -> Result<ModuleOutput> {
        let req = &ctx.requirements;
        let mut content = format!("# {}\n\n", req.project_name);
        if !req.description.is_empty() {
            content.push_str(&req.description);
            content.push_str("\n\n");
        }
        content.push_str(&format!("- Language: {}\n", req.language));
        if let Some(framework) = &req.framework {
            content.push_str(&format!("- Framework: {}\n", framework));
        }
        content.push_str(&format!("- Type: {}\n", req.project_type));
        if !req.features.is_empty() {
            content.push_str("\n## Features\n\n");
            for feature in &req.features {
                content.push_str(&format!("- {}\n", feature));
            }
        }
        if !ctx.generated_files.is_empty() {
            content.push_str("\n## Layout\n\n");
            for file in &ctx.generated_files {
                content.push_str(&format!("- `{}`\n", file));
            }
        }
        ctx.fs.write_text(README_PATH, &content).await?;
        Ok(ModuleOutput::created([README_PATH]))
    }
}

// ── license ────────────────────────────────────────────────────────────

pub struct LicenseModule;

impl LicenseModule {
    fn license_id(ctx: &ProjectContext) -> String {
        ctx.requirements
            .extra
            .get("license")
            .cloned()
            .unwrap_or_else(|| "MIT".to_string())
    }
}

#[async_trait]
impl ScaffoldModule for LicenseModule {
    fn id(&self) -> &str {
        "license"
    }

    fn name(&self) -> &str {
        "License"
    }

    fn order(&self) -> i32 {
        300
    }

    fn is_applicable(&self, _ctx: &ProjectContext) -> bool {
        true
    }

    fn planned_files(&self, _ctx: &ProjectContext) -> Vec<String> {
        vec![LICENSE_PATH.to_string()]
    }

    async fn execute(&self, ctx: &ProjectContext) -> Result<ModuleOutput> {
        let license = Self::license_id(ctx);
        let content = format!(
            "{} License\n\nCopyright (c) {} {} contributors\n",
            license,
            chrono::Utc::now().format("%Y"),
            ctx.project_name()
        );
        ctx.fs.write_text(LICENSE_PATH, &content).await?;

        ctx.decisions.record(
            DecisionRecord::new(
                "Project license",
                format!("License the project under {}", license),
                DecisionCategory::Process,
            )
            .alternative("Apache-2.0")
            .related_file(LICENSE_PATH),
        );
        Ok(ModuleOutput::created([LICENSE_PATH]))
    }
}

// ── dockerfile ─────────────────────────────────────────────────────────

pub struct DockerfileModule;

fn base_image(language: &str) -> &'static str {
    match language {
        "rust" => "rust:1-slim",
        "python" => "python:3.12-slim",
        "typescript" | "javascript" | "node" => "node:20-alpine",
        "go" => "golang:1.22-alpine",
        "csharp" | "c#" | "dotnet" => "mcr.microsoft.com/dotnet/sdk:8.0",
        "java" | "kotlin" => "eclipse-temurin:21",
        _ => "debian:stable-slim",
    }
}

#[async_trait]
impl ScaffoldModule for DockerfileModule {
    fn id(&self) -> &str {
        "dockerfile"
    }

    fn name(&self) -> &str {
        "Dockerfile"
    }

    fn order(&self) -> i32 {
        400
    }

    fn is_applicable(&self, ctx: &ProjectContext) -> bool {
        ctx.requirements.include_docker
    }

    fn planned_files(&self, _ctx: &ProjectContext) -> Vec<String> {
        vec![DOCKERFILE_PATH.to_string()]
    }

    async fn execute(&self, ctx: &ProjectContext) -> Result<ModuleOutput> {
        let image = base_image(&language_key(ctx));
        let content = format!("FROM {}\nWORKDIR /app\nCOPY . .\n", image);
        ctx.fs.write_text(DOCKERFILE_PATH, &content).await?;

        ctx.decisions.record(
            DecisionRecord::new(
                "Container base image",
                format!("Build from {}", image),
                DecisionCategory::Architecture,
            )
            .context("The project asked for a container image")
            .related_file(DOCKERFILE_PATH),
        );
        Ok(ModuleOutput::created([DOCKERFILE_PATH]))
    }
}

// ── ci-pipeline ────────────────────────────────────────────────────────

pub struct CiPipelineModule;

fn ci_commands(language: &str) -> (&'static str, &'static str) {
    match language {
        "rust" => ("cargo build --locked", "cargo test"),
        "python" => ("pip install -e .", "pytest"),
        "typescript" | "javascript" | "node" => ("npm ci", "npm test"),
        "go" => ("go build ./...", "go test ./..."),
        "csharp" | "c#" | "dotnet" => ("dotnet build", "dotnet test"),
        "java" | "kotlin" => ("./gradlew build", "./gradlew test"),
        _ => ("make", "make test"),
    }
}

#[async_trait]
impl ScaffoldModule for CiPipelineModule {
    fn id(&self) -> &str {
        "ci-pipeline"
    }

    fn name(&self) -> &str {
        "CI pipeline"
    }

    fn order(&self) -> i32 {
        500
    }

    fn is_applicable(&self, ctx: &ProjectContext) -> bool {
        ctx.requirements.include_ci
    }

    fn planned_files(&self, _ctx: &ProjectContext) -> Vec<String> {
        vec![CI_WORKFLOW_PATH.to_string()]
    }

    async fn execute(&self, ctx: &ProjectContext) -> Result<ModuleOutput> {
        let (build, test) = ci_commands(&language_key(ctx));
        let mut content = String::from(
            "name: CI\n\non:\n  push:\n    branches: [main]\n  pull_request:\n\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v4\n",
        );
        content.push_str(&format!("      - run: {}\n", build));
        if ctx.requirements.include_tests {
            content.push_str(&format!("      - run: {}\n", test));
        }
        if ctx.has_file(DOCKERFILE_PATH) {
            content.push_str("      - run: docker build .\n");
        }
        ctx.fs.write_text(CI_WORKFLOW_PATH, &content).await?;

        ctx.decisions.record(
            DecisionRecord::new(
                "Continuous integration",
                "Run build and tests on every push to main and on pull requests",
                DecisionCategory::Process,
            )
            .alternative("Nightly builds only")
            .consequence("Broken builds are visible before merge")
            .related_file(CI_WORKFLOW_PATH),
        );
        Ok(ModuleOutput::created([CI_WORKFLOW_PATH]))
    }
}

// ── tests-scaffold ─────────────────────────────────────────────────────

pub struct TestsScaffoldModule;

fn test_file(language: &str) -> (&'static str, &'static str) {
    match language {
        "rust" => (
            "tests/smoke_test.rs",
            "#[test]\nfn smoke() {\n    assert_eq!(2 + 2, 4);\n}\n",
        ),
        "python" => ("tests/test_smoke.py", "def test_smoke():\n    assert 2 + 2 == 4\n"),
        "typescript" => (
            "tests/smoke.test.ts",
            "test('smoke', () => {\n  expect(2 + 2).toBe(4);\n});\n",
        ),
        "javascript" | "node" => (
            "tests/smoke.test.js",
            "test('smoke', () => {\n  expect(2 + 2).toBe(4);\n});\n",
        ),
        "go" => (
            "smoke_test.go",
            "package main\n\nimport \"testing\"\n\nfunc TestSmoke(t *testing.T) {}\n",
        ),
        _ => ("tests/README.md", "Tests live here.\n"),
    }
}

#[async_trait]
impl ScaffoldModule for TestsScaffoldModule {
    fn id(&self) -> &str {
        "tests-scaffold"
    }

    fn name(&self) -> &str {
        "Test scaffold"
    }

    fn order(&self) -> i32 {
        600
    }

    fn is_applicable(&self, ctx: &ProjectContext) -> bool {
        ctx.requirements.include_tests
    }

    fn planned_files(&self, ctx: &ProjectContext) -> Vec<String> {
        vec![test_file(&language_key(ctx)).0.to_string()]
    }

    async fn execute(&self, ctx: &ProjectContext) -> Result<ModuleOutput> {
        let (path, content) = test_file(&language_key(ctx));
        ctx.fs.write_text(path, content).await?;
        Ok(ModuleOutput::created([path]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemoryFileSystem};
    use crate::orchestrator::ModuleOrchestrator;
    use crate::session::ProjectRequirements;
    use tokio_util::sync::CancellationToken;

    fn context(requirements: ProjectRequirements) -> (ProjectContext, Arc<MemoryFileSystem>) {
        let fs = Arc::new(MemoryFileSystem::new());
        let ctx = ProjectContext::new("s", requirements, "rust-cli", fs.clone());
        (ctx, fs)
    }

    #[test]
    fn test_catalog_ids_match_modules() {
        let ids: Vec<String> = builtin_modules().iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, builtin_module_ids());
    }

    #[test]
    fn test_applicability_follows_flags() {
        let mut req = ProjectRequirements::named("demo", "rust");
        req.include_ci = false;
        req.include_docker = true;
        req.include_tests = false;
        let (ctx, _) = context(req);

        let orchestrator = ModuleOrchestrator::with_modules(builtin_modules());
        let ids: Vec<String> = orchestrator
            .applicable_modules(&ctx)
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        assert_eq!(ids, vec!["gitignore", "readme", "license", "dockerfile"]);
    }

    #[tokio::test]
    async fn test_full_builtin_run_writes_planned_files() {
        let mut req = ProjectRequirements::named("demo", "rust");
        req.include_docker = true;
        let (mut ctx, fs) = context(req);

        let orchestrator = ModuleOrchestrator::with_modules(builtin_modules());
        let planned = orchestrator.planned_files(&ctx);
        let run = orchestrator
            .execute_all(&mut ctx, None, &CancellationToken::new())
            .await;

        assert!(!run.has_failures(), "{:?}", run.results);
        assert_eq!(ctx.generated_files, planned);
        for file in &planned {
            assert!(fs.exists(file).await, "{} missing", file);
        }
        assert!(!ctx.decisions.is_empty());
    }

    #[tokio::test]
    async fn test_readme_lists_files_from_earlier_modules() {
        let (mut ctx, fs) = context(ProjectRequirements::named("demo", "python"));
        let orchestrator = ModuleOrchestrator::with_modules(builtin_modules());
        orchestrator
            .execute_all(&mut ctx, None, &CancellationToken::new())
            .await;

        let readme = fs.read_text(README_PATH).await.unwrap();
        assert!(readme.contains("`.gitignore`"));
        assert!(!readme.contains("`LICENSE`"));
    }

    #[tokio::test]
    async fn test_ci_workflow_builds_docker_when_present() {
        let mut req = ProjectRequirements::named("demo", "go");
        req.include_docker = true;
        let (mut ctx, fs) = context(req);
        let orchestrator = ModuleOrchestrator::with_modules(builtin_modules());
        orchestrator
            .execute_all(&mut ctx, None, &CancellationToken::new())
            .await;

        let workflow = fs.read_text(CI_WORKFLOW_PATH).await.unwrap();
        assert!(workflow.contains("go test ./..."));
        assert!(workflow.contains("docker build ."));
    }
}
