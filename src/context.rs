//! Resolution of the `.prpflow/` state directory.
//!
//! Every command locates state through [`FlowContext`], so running from a
//! subdirectory of a project targets the same state as running from its root.

use crate::config::Config;
use crate::error::{FlowError, Result};
use std::env;
use std::path::{Path, PathBuf};

/// State directory name, relative to the project root.
pub const STATE_DIR: &str = ".prpflow";

/// Resolved paths of one project. All paths are absolute.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
}

impl FlowContext {
    /// Resolve from the current working directory.
    pub fn resolve() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| {
            FlowError::UserError(format!("failed to get current working directory: {}", e))
        })?;
        Self::resolve_from(&cwd)
    }

    /// Resolve from `cwd`: the nearest ancestor holding `.prpflow/`, or
    /// `cwd` itself when no ancestor does (as `init` expects).
    pub fn resolve_from<P: AsRef<Path>>(cwd: P) -> Result<Self> {
        let cwd = cwd.as_ref();
        let cwd = if cwd.is_absolute() {
            cwd.to_path_buf()
        } else {
            env::current_dir()
                .map_err(|e| {
                    FlowError::UserError(format!("failed to get current working directory: {}", e))
                })?
                .join(cwd)
        };

        let project_root = cwd
            .ancestors()
            .find(|dir| dir.join(STATE_DIR).is_dir())
            .unwrap_or(&cwd)
            .to_path_buf();

        Ok(Self {
            state_dir: project_root.join(STATE_DIR),
            project_root,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state_dir.is_dir()
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        Err(FlowError::UserError(format!(
            "prpflow is not initialized in '{}'.\n\nFix: run `prpflow init` first.",
            self.project_root.display()
        )))
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    pub fn agents_path(&self) -> PathBuf {
        self.state_dir.join("agents.yaml")
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.state_dir.join("knowledge.ndjson")
    }

    pub fn events_path(&self) -> PathBuf {
        self.state_dir.join("events.ndjson")
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.state_dir.join("prompts")
    }

    /// Configuration from `config.yaml`, or defaults when the file is absent.
    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_path();
        if path.exists() {
            Config::load(path)
        } else {
            Ok(Config::default())
        }
    }
}

/// Resolve the context and fail unless `prpflow init` has run.
pub fn require_initialized() -> Result<FlowContext> {
    let ctx = FlowContext::resolve()?;
    ctx.ensure_initialized()?;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::DirGuard;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_without_state_dir_uses_cwd() {
        let dir = TempDir::new().unwrap();
        let ctx = FlowContext::resolve_from(dir.path()).unwrap();
        assert_eq!(ctx.project_root, dir.path());
        assert!(!ctx.is_initialized());
        assert!(ctx.ensure_initialized().unwrap_err().to_string().contains("prpflow init"));
    }

    #[test]
    fn test_resolve_from_subdirectory_finds_state_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = FlowContext::resolve_from(&nested).unwrap();
        assert_eq!(ctx.project_root, dir.path());
        assert!(ctx.is_initialized());
        assert_eq!(ctx.events_path(), dir.path().join(".prpflow/events.ndjson"));
        assert_eq!(ctx.knowledge_path(), dir.path().join(".prpflow/knowledge.ndjson"));
    }

    #[test]
    fn test_load_config_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let ctx = FlowContext::resolve_from(dir.path()).unwrap();
        let config = ctx.load_config().unwrap();
        assert_eq!(config.prp.top_k, Config::default().prp.top_k);
    }

    #[test]
    #[serial]
    fn test_require_initialized_uses_cwd() {
        let dir = TempDir::new().unwrap();
        let _guard = DirGuard::new(dir.path());
        assert!(require_initialized().is_err());

        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        let ctx = require_initialized().unwrap();
        assert_eq!(
            ctx.state_dir.canonicalize().unwrap(),
            dir.path().join(STATE_DIR).canonicalize().unwrap()
        );
    }
}
