pub mod audit;
pub mod config;
pub mod decisions;
pub mod errors;
pub mod fs;
pub mod gates;
pub mod init;
pub mod llm;
pub mod orchestrator;
pub mod policy;
pub mod scm;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod ui;
pub mod util;
pub mod workflow;
