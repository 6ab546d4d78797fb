//! Configuration view and validation commands: `reposmith config`.

use anyhow::Result;

use reposmith::config::{ReposmithConfig, ReposmithToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: ReposmithConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Reposmith Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No reposmith.toml found at {}; using defaults.", config_path.display());
            }
            println!();

            let toml = &config.toml;
            println!("[store]");
            println!("  data_dir = \"{}\"", toml.store.data_dir.display());
            println!("  flush_interval_secs = {}", toml.store.flush_interval_secs);
            println!();
            println!("[modules]");
            println!("  disabled = {:?}", toml.modules.disabled);
            println!();
            println!("[policies]");
            match &toml.policies.file {
                Some(file) => println!("  file = \"{}\"", file.display()),
                None => println!("  (built-in catalog)"),
            }
            println!();
            println!("[llm]");
            println!("  provider = \"{}\"", toml.llm.provider);
            if let Some(model) = &toml.llm.model {
                println!("  model = \"{}\"", model);
            }
            println!("  max_attempts = {}", toml.llm.max_attempts);
            println!("  backoff_secs = {:?}", toml.llm.backoff_secs);
            println!();
            println!("[scm]");
            match toml.scm.provider {
                Some(provider) => println!("  provider = \"{}\"", provider),
                None => println!("  (none; repository steps are skipped)"),
            }
            if let Some(owner) = &toml.scm.owner {
                println!("  owner = \"{}\"", owner);
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  flush_interval = {}s", config.flush_interval.as_secs());
            println!("  disabled_modules = {:?}", config.disabled_modules);
            println!("  github_token = {}", set_or_unset(config.github_token.is_some()));
            println!(
                "  anthropic_api_key = {}",
                set_or_unset(config.anthropic_api_key.is_some())
            );
            println!(
                "  openai_api_key = {}",
                set_or_unset(config.openai_api_key.is_some())
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("reposmith.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            ReposmithToml::default().save(&config_path)?;
            println!("Created reposmith.toml at {}", config_path.display());
        }
    }

    Ok(())
}

fn set_or_unset(set: bool) -> &'static str {
    if set { "set" } else { "unset" }
}
