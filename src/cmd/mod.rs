//! CLI command implementations.
//!
//! | Module     | Commands handled                      |
//! |------------|---------------------------------------|
//! | `project`  | `Init`                                |
//! | `run`      | `Run`, `Plan`                         |
//! | `inspect`  | `Sessions`, `Audit`, `Policies`, `Modules` |
//! | `config`   | `Config`                              |

pub mod config;
pub mod inspect;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use inspect::{cmd_audit, cmd_modules, cmd_policies, cmd_sessions};
pub use project::cmd_init;
pub use run::{cmd_plan, cmd_run};

use std::sync::Arc;

use anyhow::{Context, Result};
use reposmith::config::{LlmProvider, ReposmithConfig, ScmProviderKind};
use reposmith::llm::{ClaudeClient, LlmClient, OpenAiClient, RetryPolicy, RetryingLlmClient};
use reposmith::orchestrator::{ModuleOrchestrator, builtin_modules};
use reposmith::policy::PolicyEngine;
use reposmith::scm::SourceControlProvider;
use reposmith::scm::github::{GitHubProvider, is_valid_github_token};
use reposmith::scm::local::LocalScmProvider;
use reposmith::store::{JsonFileBackend, SessionStore};

pub fn load_policies(config: &ReposmithConfig) -> Result<PolicyEngine> {
    match config.policy_file() {
        Some(path) if path.exists() => PolicyEngine::from_file(&path)
            .with_context(|| format!("Failed to load policies from {}", path.display())),
        _ => Ok(PolicyEngine::with_builtin()),
    }
}

pub fn build_orchestrator(config: &ReposmithConfig) -> ModuleOrchestrator {
    ModuleOrchestrator::with_modules(builtin_modules()).with_disabled(config.disabled_modules.iter().cloned())
}

pub fn open_store(config: &ReposmithConfig) -> Result<SessionStore> {
    let backend = JsonFileBackend::new(config.data_dir());
    SessionStore::open(Arc::new(backend))
        .with_context(|| format!("Failed to open session store at {}", config.data_dir().display()))
}

pub fn build_scm(config: &ReposmithConfig) -> Result<Option<Arc<dyn SourceControlProvider>>> {
    let scm = &config.toml.scm;
    let provider: Arc<dyn SourceControlProvider> = match scm.provider {
        None => return Ok(None),
        Some(ScmProviderKind::Local) => {
            Arc::new(LocalScmProvider::with_root(config.reposmith_dir().join("remotes")))
        }
        Some(ScmProviderKind::GitHub) => {
            let token = config
                .github_token
                .clone()
                .context("scm.provider is github but GITHUB_TOKEN is not set")?;
            if !is_valid_github_token(&token) {
                tracing::warn!("GITHUB_TOKEN does not look like a GitHub token");
            }
            let mut provider = GitHubProvider::new(token).with_owner(scm.owner.clone());
            if let Some(url) = &scm.api_url {
                provider = provider.with_api_url(url.clone());
            }
            Arc::new(provider)
        }
    };
    Ok(Some(provider))
}

/// LLM client for the configured provider, when its API key is present.
pub fn build_llm(config: &ReposmithConfig) -> Result<Option<Arc<dyn LlmClient>>> {
    let llm = &config.toml.llm;
    let policy = RetryPolicy::from_secs(llm.max_attempts, &llm.backoff_secs);
    let client: Arc<dyn LlmClient> = match llm.provider {
        LlmProvider::Claude => {
            let Some(key) = &config.anthropic_api_key else {
                return Ok(None);
            };
            let mut client = ClaudeClient::new(key.clone())?;
            if let Some(model) = &llm.model {
                client = client.with_model(model.clone());
            }
            if let Some(url) = &llm.base_url {
                client = client.with_base_url(url.clone());
            }
            Arc::new(RetryingLlmClient::new(client, policy))
        }
        LlmProvider::OpenAi => {
            let Some(key) = &config.openai_api_key else {
                return Ok(None);
            };
            let mut client = OpenAiClient::new(key.clone())?;
            if let Some(model) = &llm.model {
                client = client.with_model(model.clone());
            }
            if let Some(url) = &llm.base_url {
                client = client.with_base_url(url.clone());
            }
            Arc::new(RetryingLlmClient::new(client, policy))
        }
    };
    Ok(Some(client))
}
