use crate::agent::{AgentRuntime, ExecutionContext};
use crate::config::Config;
use crate::context::STATE_DIR;
use crate::error::FlowError;
use crate::prp::{AgentPrp, ExecutionResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

static CWD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub(crate) struct DirGuard {
    original: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl DirGuard {
    pub(crate) fn new(new_dir: &Path) -> Self {
        // The working directory is process-global; hold the lock even if a
        // #[serial] annotation is missed.
        let lock = CWD_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(new_dir).unwrap();
        Self {
            original,
            _lock: lock,
        }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.original);
    }
}

/// Temp project with an initialized `.prpflow/` holding the default config.
pub(crate) fn create_flow_dir() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let state = temp_dir.path().join(STATE_DIR);
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(state.join("config.yaml"), Config::default().to_yaml().unwrap()).unwrap();
    temp_dir
}

/// Timings small enough for tests to finish in milliseconds.
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.knowledge.embedding_dimension = 64;
    config.knowledge.persist = false;
    config.coordinator.retry_backoff_base_ms = 1;
    config.coordinator.retry_backoff_max_ms = 5;
    config.coordinator.sweep_interval_ms = 10;
    config.agents.heartbeat_interval_secs = 1;
    config.learner.backoff_base_ms = 1;
    config
}

/// What a [`ScriptedAgent`] does on one execution.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Attest every criterion.
    Succeed,
    /// Report an execution failure.
    Fail(String),
    /// Report success without attesting anything, so gates fail.
    SkipCriteria,
    /// Sleep, then succeed.
    Slow(Duration),
    /// Block until the execution is cancelled.
    Hang,
}

/// Runtime that follows a script, then keeps succeeding.
pub(crate) struct ScriptedAgent {
    capability: String,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub(crate) fn new(capability: &str, script: Vec<Step>) -> Self {
        Self {
            capability: capability.to_string(),
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn succeeding(capability: &str) -> Self {
        Self::new(capability, Vec::new())
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Task ids in execution order.
    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedAgent {
    fn capability(&self) -> &str {
        &self.capability
    }

    async fn execute(&self, prp: &AgentPrp, ctx: &ExecutionContext) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(prp.task_id.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed);

        let attest = |mut result: ExecutionResult| {
            for criterion in &prp.validation_criteria {
                result = result.with_criterion(criterion.clone());
            }
            result
        };

        match step {
            Step::Succeed => attest(ExecutionResult::success(&prp.task_id, &ctx.agent_id)),
            Step::Fail(msg) => ExecutionResult::failure(
                &prp.task_id,
                &ctx.agent_id,
                &FlowError::ExecutionFailure(msg),
            ),
            Step::SkipCriteria => ExecutionResult::success(&prp.task_id, &ctx.agent_id),
            Step::Slow(delay) => {
                tokio::time::sleep(delay).await;
                attest(ExecutionResult::success(&prp.task_id, &ctx.agent_id))
            }
            Step::Hang => {
                ctx.cancel.cancelled().await;
                ExecutionResult::failure(
                    &prp.task_id,
                    &ctx.agent_id,
                    &FlowError::Cancelled("hung agent released".into()),
                )
            }
        }
    }
}
