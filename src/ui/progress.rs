use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::orchestrator::{ModuleStatus, ProgressCallback};
use crate::policy::{PolicySeverity, PolicyValidationResult};
use crate::session::{ExecutionPlan, Session, SessionStatus};
use crate::ui::icons::{
    BLOCKER, CHECK, CROSS, FILE_NEW, FOLDER, POLICY, RUNNING, SKIPPED, SPARKLE, WARNING,
};

/// Terminal output for a scaffold run, rendered with `indicatif`.
///
/// Two bars are stacked: a module bar counting finished modules and a
/// spinner naming the module currently running.
pub struct ScaffoldUI {
    multi: MultiProgress,
    module_bar: ProgressBar,
    spinner: ProgressBar,
}

impl ScaffoldUI {
    pub fn new(total_modules: u64) -> Self {
        let multi = MultiProgress::new();

        let bar_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let module_bar = multi.add(ProgressBar::new(total_modules));
        module_bar.set_style(bar_style);
        module_bar.set_prefix("Modules");

        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let spinner = multi.add(ProgressBar::new_spinner());
        spinner.set_style(spinner_style);
        spinner.set_prefix("      ");

        Self {
            multi,
            module_bar,
            spinner,
        }
    }

    pub fn set_total(&self, total_modules: u64) {
        self.module_bar.set_length(total_modules);
    }

    /// Print through the multiplexer, falling back to stderr.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Callback for the orchestrator's module events.
    pub fn progress_callback(self: &Arc<Self>) -> ProgressCallback {
        let ui = Arc::clone(self);
        Arc::new(move |module_id: &str, status: ModuleStatus| ui.module_event(module_id, status))
    }

    pub fn module_event(&self, module_id: &str, status: ModuleStatus) {
        match status {
            ModuleStatus::Running => {
                self.spinner
                    .set_message(format!("{}{}", RUNNING, style(module_id).cyan()));
                self.spinner.enable_steady_tick(Duration::from_millis(100));
            }
            ModuleStatus::Completed => {
                self.module_bar.inc(1);
                self.print_line(format!("  {}{}", CHECK, module_id));
            }
            ModuleStatus::Failed => {
                self.module_bar.inc(1);
                self.print_line(format!("  {}{}", CROSS, style(module_id).red()));
            }
        }
    }

    /// Stop both bars and print the final session outcome.
    pub fn finish(&self, session: &Session) {
        self.spinner.finish_and_clear();
        self.module_bar.finish_and_clear();
        print_outcome(session);
    }
}

/// Print a plan with its steps, files and policy results.
pub fn print_plan(plan: &ExecutionPlan) {
    println!();
    println!(
        "{}{} {}",
        SPARKLE,
        style(format!("Plan r{}", plan.revision)).bold(),
        style(format!("({})", plan.template)).dim()
    );
    println!("  {}{}", FOLDER, plan.repository.name);
    println!();
    for step in &plan.steps {
        let marker = if step.completed {
            style("✓").green()
        } else {
            style("·").dim()
        };
        println!("  {} {}. {}", marker, step.number, step.description);
    }
    println!();
    println!("  {}", style("Files").bold());
    for file in &plan.planned_files {
        println!("    {}{}", FILE_NEW, file);
    }
    if !plan.policy_results.is_empty() {
        println!();
        print_policy_results(&plan.policy_results);
    }
}

pub fn print_policy_results(results: &[PolicyValidationResult]) {
    println!("  {}{}", POLICY, style("Policies").bold());
    for result in results {
        let icon = if result.passed {
            CHECK
        } else if result.is_blocking() {
            BLOCKER
        } else if result.severity == Some(PolicySeverity::Info) {
            SKIPPED
        } else {
            WARNING
        };
        println!(
            "    {}{} {}",
            icon,
            style(&result.policy_name).bold(),
            style(&result.message).dim()
        );
    }
}

pub fn print_outcome(session: &Session) {
    println!();
    match session.status {
        SessionStatus::Completed => {
            println!("{}{}", CHECK, style("Scaffold delivered").green().bold());
            if let Some(delivery) = &session.delivery {
                if let Some(url) = &delivery.repository_url {
                    println!("  Repository: {}", style(url).cyan());
                }
                if let Some(url) = &delivery.pipeline_url {
                    println!("  Pipeline:   {}", style(url).cyan());
                }
                println!("  Files:      {}", delivery.files_written.len());
                for failed in delivery.failed_modules() {
                    println!(
                        "  {}{} {}",
                        WARNING,
                        failed.module_id,
                        style(failed.error_message.as_deref().unwrap_or("failed")).dim()
                    );
                }
            }
        }
        SessionStatus::Failed => {
            println!("{}{}", CROSS, style("Scaffold failed").red().bold());
            if let Some(reason) = &session.failure_reason {
                println!("  {}", reason);
            }
        }
        other => println!("Session {} is {}", session.id, other),
    }
}
