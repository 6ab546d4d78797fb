use std::sync::Arc;

use crate::decisions::DecisionCollector;
use crate::fs::{FileSystem, MemoryFileSystem};
use crate::session::ProjectRequirements;

/// Mutable state handed from module to module within one run.
///
/// Only the orchestrator mutates it, and only between module invocations;
/// modules receive a shared borrow.
#[derive(Clone)]
pub struct ProjectContext {
    pub session_id: String,
    pub requirements: ProjectRequirements,
    /// Template chosen by the planner (e.g. `rust-cli`).
    pub template: String,
    /// Every file created so far in this run, in creation order.
    pub generated_files: Vec<String>,
    pub decisions: DecisionCollector,
    pub fs: Arc<dyn FileSystem>,
}

impl ProjectContext {
    pub fn new(
        session_id: impl Into<String>,
        requirements: ProjectRequirements,
        template: impl Into<String>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            requirements,
            template: template.into(),
            generated_files: Vec::new(),
            decisions: DecisionCollector::new(),
            fs,
        }
    }

    /// Scratch context over an in-memory file system, for dry runs.
    pub fn preview(requirements: ProjectRequirements) -> Self {
        Self::new("preview", requirements, "preview", Arc::new(MemoryFileSystem::new()))
    }

    pub fn project_name(&self) -> &str {
        &self.requirements.project_name
    }

    pub fn language(&self) -> &str {
        &self.requirements.language
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.generated_files.iter().any(|f| f == path)
    }

    /// Append files to the cumulative list, skipping duplicates.
    pub fn record_files<'a>(&mut self, files: impl IntoIterator<Item = &'a String>) {
        for file in files {
            if !self.has_file(file) {
                self.generated_files.push(file.clone());
            }
        }
    }
}

impl std::fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectContext")
            .field("session_id", &self.session_id)
            .field("project_name", &self.requirements.project_name)
            .field("template", &self.template)
            .field("generated_files", &self.generated_files)
            .field("decisions", &self.decisions.len())
            .finish()
    }
}
