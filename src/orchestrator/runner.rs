use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::ProjectContext;
use super::module::{ModuleResult, ModuleStatus, ProgressCallback, ScaffoldModule};

/// Results of one `execute_all` call, in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestrationRun {
    pub results: Vec<ModuleResult>,
    /// True when the caller's token fired before every module ran.
    pub cancelled: bool,
}

impl OrchestrationRun {
    pub fn failures(&self) -> impl Iterator<Item = &ModuleResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn files_created(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.files_created.iter().cloned())
            .collect()
    }
}

/// Runs registered modules sequentially against a shared context.
#[derive(Default, Clone)]
pub struct ModuleOrchestrator {
    modules: Vec<Arc<dyn ScaffoldModule>>,
    disabled: HashSet<String>,
}

impl ModuleOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modules(modules: Vec<Arc<dyn ScaffoldModule>>) -> Self {
        Self {
            modules,
            disabled: HashSet::new(),
        }
    }

    pub fn with_disabled<I, S>(mut self, disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = disabled.into_iter().map(Into::into).collect();
        self
    }

    pub fn register(&mut self, module: Arc<dyn ScaffoldModule>) {
        self.modules.push(module);
    }

    /// Every registered module in registration order.
    pub fn catalog(&self) -> &[Arc<dyn ScaffoldModule>] {
        &self.modules
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled.contains(id)
    }

    pub fn disabled(&self) -> &HashSet<String> {
        &self.disabled
    }

    /// Enabled and applicable modules, sorted by `order`.
    ///
    /// The sort is stable, so equal orders keep registration order. This has
    /// no side effects and returns exactly the order `execute_all` uses.
    pub fn applicable_modules(&self, ctx: &ProjectContext) -> Vec<Arc<dyn ScaffoldModule>> {
        let mut selected: Vec<Arc<dyn ScaffoldModule>> = self
            .modules
            .iter()
            .filter(|m| !self.disabled.contains(m.id()))
            .filter(|m| m.is_applicable(ctx))
            .cloned()
            .collect();
        selected.sort_by_key(|m| m.order());
        selected
    }

    /// Files the applicable modules expect to create, in execution order.
    pub fn planned_files(&self, ctx: &ProjectContext) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for module in self.applicable_modules(ctx) {
            for file in module.planned_files(ctx) {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        files
    }

    /// Run every applicable module in order.
    ///
    /// A module error or panic becomes a failed `ModuleResult` and the loop
    /// continues. Files created by each module are merged into `ctx` before
    /// the next one starts. Cancellation stops the run between modules or
    /// abandons the module in flight.
    pub async fn execute_all(
        &self,
        ctx: &mut ProjectContext,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> OrchestrationRun {
        let selected = self.applicable_modules(ctx);
        info!(
            session_id = %ctx.session_id,
            modules = selected.len(),
            "Starting module orchestration"
        );

        let mut run = OrchestrationRun::default();
        for module in selected {
            if cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }

            let id = module.id().to_string();
            notify(progress, &id, ModuleStatus::Running);
            debug!(module = %id, order = module.order(), "Running module");

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(module = %id, "Module run cancelled");
                    run.cancelled = true;
                    break;
                }
                outcome = AssertUnwindSafe(module.execute(ctx)).catch_unwind() => outcome,
            };
            let elapsed = started.elapsed();

            let result = match outcome {
                Ok(Ok(output)) => ModuleResult::succeeded(&id, output, elapsed),
                Ok(Err(e)) => ModuleResult::failed(&id, format!("{:#}", e), elapsed),
                Err(panic) => ModuleResult::failed(&id, panic_message(panic.as_ref()), elapsed),
            };

            ctx.record_files(&result.files_created);

            if result.success {
                info!(
                    module = %id,
                    files = result.files_created.len(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Module completed"
                );
                notify(progress, &id, ModuleStatus::Completed);
            } else {
                warn!(
                    module = %id,
                    error = result.error_message.as_deref().unwrap_or(""),
                    "Module failed"
                );
                notify(progress, &id, ModuleStatus::Failed);
            }
            run.results.push(result);
        }

        run
    }
}

fn notify(progress: Option<&ProgressCallback>, module_id: &str, status: ModuleStatus) {
    let Some(callback) = progress else {
        return;
    };
    let call = std::panic::catch_unwind(AssertUnwindSafe(|| callback(module_id, status)));
    if call.is_err() {
        warn!(module = %module_id, status = %status, "Progress callback panicked");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("module panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("module panicked: {}", s)
    } else {
        "module panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemoryFileSystem};
    use crate::orchestrator::ModuleOutput;
    use crate::session::ProjectRequirements;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Behavior {
        Create(&'static str),
        RequireFile(&'static str),
        Fail,
        Panic,
        WaitForCancel,
    }

    struct TestModule {
        id: &'static str,
        order: i32,
        applicable: bool,
        behavior: Behavior,
    }

    impl TestModule {
        fn arc(id: &'static str, order: i32, behavior: Behavior) -> Arc<dyn ScaffoldModule> {
            Arc::new(Self {
                id,
                order,
                applicable: true,
                behavior,
            })
        }
    }

    #[async_trait]
    impl ScaffoldModule for TestModule {
        fn id(&self) -> &str {
            self.id
        }

        fn name(&self) -> &str {
            self.id
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn is_applicable(&self, _ctx: &ProjectContext) -> bool {
            self.applicable
        }

        fn planned_files(&self, _ctx: &ProjectContext) -> Vec<String> {
            match self.behavior {
                Behavior::Create(path) => vec![path.to_string()],
                _ => Vec::new(),
            }
        }

        async fn execute(&self, ctx: &ProjectContext) -> Result<ModuleOutput> {
            match self.behavior {
                Behavior::Create(path) => {
                    ctx.fs.write_text(path, self.id).await?;
                    Ok(ModuleOutput::created([path]))
                }
                Behavior::RequireFile(path) => {
                    if !ctx.has_file(path) {
                        bail!("{} has not been generated", path);
                    }
                    Ok(ModuleOutput::default())
                }
                Behavior::Fail => bail!("boom"),
                Behavior::Panic => panic!("module exploded"),
                Behavior::WaitForCancel => {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok(ModuleOutput::default())
                }
            }
        }
    }

    fn context() -> ProjectContext {
        ProjectContext::new(
            "session-1",
            ProjectRequirements::named("demo", "rust"),
            "rust-cli",
            Arc::new(MemoryFileSystem::new()),
        )
    }

    fn ids(modules: &[Arc<dyn ScaffoldModule>]) -> Vec<String> {
        modules.iter().map(|m| m.id().to_string()).collect()
    }

    fn result_ids(run: &OrchestrationRun) -> Vec<String> {
        run.results.iter().map(|r| r.module_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_preview_order_matches_execution_order() {
        let orchestrator = ModuleOrchestrator::with_modules(vec![
            TestModule::arc("c", 300, Behavior::Create("c.txt")),
            TestModule::arc("a1", 100, Behavior::Create("a1.txt")),
            TestModule::arc("b", 200, Behavior::Create("b.txt")),
            TestModule::arc("a2", 100, Behavior::Create("a2.txt")),
        ])
        .with_disabled(["b"]);

        let mut ctx = context();
        let preview = ids(&orchestrator.applicable_modules(&ctx));
        assert_eq!(preview, vec!["a1", "a2", "c"]);

        let run = orchestrator
            .execute_all(&mut ctx, None, &CancellationToken::new())
            .await;
        assert_eq!(result_ids(&run), preview);
    }

    #[tokio::test]
    async fn test_preview_has_no_side_effects() {
        let fs = Arc::new(MemoryFileSystem::new());
        let ctx = ProjectContext::new(
            "s",
            ProjectRequirements::named("demo", "rust"),
            "rust-cli",
            fs.clone(),
        );
        let orchestrator =
            ModuleOrchestrator::with_modules(vec![TestModule::arc("a", 1, Behavior::Create("a.txt"))]);

        assert_eq!(orchestrator.planned_files(&ctx), vec!["a.txt"]);
        assert!(fs.paths().is_empty());
        assert!(ctx.generated_files.is_empty());
    }

    #[tokio::test]
    async fn test_later_module_sees_earlier_files() {
        let orchestrator = ModuleOrchestrator::with_modules(vec![
            TestModule::arc("b", 200, Behavior::RequireFile("a.txt")),
            TestModule::arc("a", 100, Behavior::Create("a.txt")),
        ]);
        let mut ctx = context();
        let run = orchestrator
            .execute_all(&mut ctx, None, &CancellationToken::new())
            .await;

        assert!(run.results.iter().all(|r| r.success), "{:?}", run.results);
        assert!(ctx.has_file("a.txt"));
        assert!(ctx.fs.exists("a.txt").await);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let orchestrator = ModuleOrchestrator::with_modules(vec![
            TestModule::arc("first", 1, Behavior::Create("1.txt")),
            TestModule::arc("broken", 2, Behavior::Fail),
            TestModule::arc("exploding", 3, Behavior::Panic),
            TestModule::arc("last", 4, Behavior::Create("4.txt")),
        ]);
        let mut ctx = context();
        let run = orchestrator
            .execute_all(&mut ctx, None, &CancellationToken::new())
            .await;

        assert_eq!(result_ids(&run), vec!["first", "broken", "exploding", "last"]);
        let success: Vec<bool> = run.results.iter().map(|r| r.success).collect();
        assert_eq!(success, vec![true, false, false, true]);
        assert_eq!(run.results[1].error_message.as_deref(), Some("boom"));
        assert!(
            run.results[2]
                .error_message
                .as_deref()
                .unwrap()
                .contains("module exploded")
        );
        assert!(run.has_failures());
        assert_eq!(ctx.generated_files, vec!["1.txt", "4.txt"]);
    }

    #[tokio::test]
    async fn test_disabled_module_never_runs_even_if_applicable() {
        let orchestrator = ModuleOrchestrator::with_modules(vec![
            TestModule::arc("keep", 1, Behavior::Create("keep.txt")),
            TestModule::arc("skip", 2, Behavior::Create("skip.txt")),
        ])
        .with_disabled(["skip"]);
        let mut ctx = context();

        assert!(!ids(&orchestrator.applicable_modules(&ctx)).contains(&"skip".to_string()));
        let run = orchestrator
            .execute_all(&mut ctx, None, &CancellationToken::new())
            .await;
        assert_eq!(result_ids(&run), vec!["keep"]);
        assert!(!ctx.fs.exists("skip.txt").await);
    }

    #[tokio::test]
    async fn test_inapplicable_module_is_skipped() {
        let mut orchestrator = ModuleOrchestrator::new();
        orchestrator.register(Arc::new(TestModule {
            id: "never",
            order: 1,
            applicable: false,
            behavior: Behavior::Create("never.txt"),
        }));
        let ctx = context();
        assert!(orchestrator.applicable_modules(&ctx).is_empty());
        assert_eq!(orchestrator.catalog().len(), 1);
    }

    #[tokio::test]
    async fn test_progress_callback_events_and_panics() {
        let events: Arc<Mutex<Vec<(String, ModuleStatus)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: ProgressCallback = Arc::new(move |id, status| {
            sink.lock().unwrap().push((id.to_string(), status));
            if status == ModuleStatus::Running {
                panic!("ui went away");
            }
        });

        let orchestrator = ModuleOrchestrator::with_modules(vec![
            TestModule::arc("ok", 1, Behavior::Create("ok.txt")),
            TestModule::arc("bad", 2, Behavior::Fail),
        ]);
        let mut ctx = context();
        let run = orchestrator
            .execute_all(&mut ctx, Some(&callback), &CancellationToken::new())
            .await;

        assert_eq!(run.results.len(), 2);
        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("ok".to_string(), ModuleStatus::Running),
                ("ok".to_string(), ModuleStatus::Completed),
                ("bad".to_string(), ModuleStatus::Running),
                ("bad".to_string(), ModuleStatus::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_in_flight_module() {
        let orchestrator = ModuleOrchestrator::with_modules(vec![
            TestModule::arc("first", 1, Behavior::Create("first.txt")),
            TestModule::arc("slow", 2, Behavior::WaitForCancel),
            TestModule::arc("after", 3, Behavior::Create("after.txt")),
        ]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut ctx = context();
        let run = orchestrator.execute_all(&mut ctx, None, &cancel).await;
        assert!(run.cancelled);
        assert_eq!(result_ids(&run), vec!["first"]);
        assert!(!ctx.has_file("after.txt"));
    }

    #[tokio::test]
    async fn test_precancelled_token_runs_nothing() {
        let orchestrator =
            ModuleOrchestrator::with_modules(vec![TestModule::arc("a", 1, Behavior::Create("a.txt"))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = context();
        let run = orchestrator.execute_all(&mut ctx, None, &cancel).await;
        assert!(run.cancelled);
        assert!(run.results.is_empty());
    }
}
