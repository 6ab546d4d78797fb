//! `reposmith init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use reposmith::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized reposmith project at {}",
            result.reposmith_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .reposmith/");
        println!("  ├── reposmith.toml   # Configuration");
        println!("  ├── policies.yaml    # Policy catalog");
        println!("  ├── sessions/        # Persisted sessions");
        println!("  └── audit/           # Audit trail");
        println!();
        println!("Next steps:");
        println!("  1. Write a requirements file (project_name, language, ...)");
        println!("  2. Run `reposmith plan -r <file>` to preview");
        println!("  3. Run `reposmith run -r <file>` to scaffold");
    } else {
        println!(
            "Reposmith project already initialized at {}",
            result.reposmith_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
