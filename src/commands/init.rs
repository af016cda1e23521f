//! Implementation of the `prpflow init` command.
//!
//! Creates `.prpflow/` in the current directory (or the project that
//! already holds one) with:
//! - `config.yaml`: every tunable at its default
//! - `agents.yaml`: a commented example agent profile
//! - `logs/` and `prompts/` for agent runs
//!
//! Re-running is safe: existing files are kept unless `--force` is given.

use crate::cli::InitArgs;
use crate::config::Config;
use crate::context::{FlowContext, STATE_DIR};
use crate::error::{FlowError, Result};
use crate::fs::atomic_write_file;
use std::fs;
use std::path::Path;

const AGENTS_TEMPLATE: &str = r#"# Agent profiles for prpflow.
#
# Each profile serves one capability (the profile name unless `capability`
# is set). Commands are templates; available variables include
# {prompt_file}, {task_id}, {feature_id}, {agent_id}, {attempt} and
# {project_root}. The command reports back on stdout with lines like
#   ARTIFACT: src/login.rs
#   CRITERION: Login endpoint returns a session token
#   METRIC: coverage=0.92
#   FINDING: warning flaky test quarantined
#   APPROACH: extended the session middleware
#
# agents:
#   coder:
#     command: "claude -p {prompt_file}"
#     instances: 2
#   tester:
#     command: "./scripts/run-tests.sh {task_id}"
#     timeout_seconds: 1200

agents: {}
"#;

pub fn cmd_init(args: InitArgs) -> Result<()> {
    let ctx = FlowContext::resolve()?;

    for dir in [ctx.state_dir.clone(), ctx.logs_dir(), ctx.prompts_dir()] {
        fs::create_dir_all(&dir).map_err(|e| {
            FlowError::UserError(format!("failed to create '{}': {}", dir.display(), e))
        })?;
    }

    let config_written = write_unless_present(
        &ctx.config_path(),
        &Config::default().to_yaml()?,
        args.force,
    )?;
    let agents_written = write_unless_present(&ctx.agents_path(), AGENTS_TEMPLATE, args.force)?;

    println!("Initialized prpflow in {}", ctx.project_root.display());
    println!();
    for (name, written) in [("config.yaml", config_written), ("agents.yaml", agents_written)] {
        let note = if written { "written" } else { "kept existing" };
        println!("  {}/{:<12} {}", STATE_DIR, name, note);
    }
    println!("  {}/logs/", STATE_DIR);
    println!("  {}/prompts/", STATE_DIR);
    println!();
    println!("Add agent profiles to {}/agents.yaml, then `prpflow run <feature.yaml>`.", STATE_DIR);

    Ok(())
}

fn write_unless_present(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    atomic_write_file(path, content)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentsConfig;
    use crate::test_support::DirGuard;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_init_scaffolds_state_dir() {
        let temp = TempDir::new().unwrap();
        let _guard = DirGuard::new(temp.path());

        cmd_init(InitArgs { force: false }).unwrap();

        let state = temp.path().join(STATE_DIR);
        assert!(state.join("logs").is_dir());
        assert!(state.join("prompts").is_dir());
        let config = Config::load(state.join("config.yaml")).unwrap();
        assert_eq!(config.coordinator.max_attempts, 3);
        let agents = AgentsConfig::load(state.join("agents.yaml")).unwrap().unwrap();
        assert!(agents.agents.is_empty());
    }

    #[test]
    #[serial]
    fn test_init_is_idempotent_and_keeps_edits() {
        let temp = TempDir::new().unwrap();
        let _guard = DirGuard::new(temp.path());
        cmd_init(InitArgs { force: false }).unwrap();

        let config_path = temp.path().join(STATE_DIR).join("config.yaml");
        let mut config = Config::load(&config_path).unwrap();
        config.coordinator.max_attempts = 7;
        fs::write(&config_path, config.to_yaml().unwrap()).unwrap();

        cmd_init(InitArgs { force: false }).unwrap();
        assert_eq!(Config::load(&config_path).unwrap().coordinator.max_attempts, 7);

        cmd_init(InitArgs { force: true }).unwrap();
        assert_eq!(Config::load(&config_path).unwrap().coordinator.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_init_from_subdirectory_reuses_project() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(STATE_DIR)).unwrap();
        let nested = temp.path().join("crates").join("api");
        fs::create_dir_all(&nested).unwrap();
        let _guard = DirGuard::new(&nested);

        cmd_init(InitArgs { force: false }).unwrap();

        assert!(temp.path().join(STATE_DIR).join("config.yaml").exists());
        assert!(!nested.join(STATE_DIR).exists());
    }
}
