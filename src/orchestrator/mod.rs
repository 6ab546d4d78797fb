//! Module orchestration engine.
//!
//! A module is an independently pluggable unit of work (generate a
//! `.gitignore`, write a CI workflow, ...) with an integer `order` and an
//! applicability predicate. The [`ModuleOrchestrator`] keeps modules that are
//! enabled and applicable, stable-sorts them by `order`, and runs them one
//! at a time against a shared [`ProjectContext`]. Files created by a module
//! are merged into the context before the next module starts, and a failing
//! module is recorded as a failed [`ModuleResult`] without stopping the run.

pub mod builtin;
pub mod context;
pub mod module;
pub mod runner;

pub use builtin::builtin_modules;
pub use context::ProjectContext;
pub use module::{ModuleOutput, ModuleResult, ModuleStatus, ProgressCallback, ScaffoldModule};
pub use runner::{ModuleOrchestrator, OrchestrationRun};
