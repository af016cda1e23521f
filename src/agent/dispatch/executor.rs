//! Subprocess execution for [`CommandAgent`].

use crate::agent::config::{AgentProfile, AgentsConfig};
use crate::agent::prompt::{PromptContext, generate_and_write_prompt, render_template, sanitize};
use crate::agent::{AgentRuntime, ExecutionContext};
use crate::context::FlowContext;
use crate::error::{FlowError, Result};
use crate::prp::{AgentPrp, ExecutionResult, Severity};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, info, warn};

/// Runs an external command per PRP.
///
/// Stdout report protocol, one fact per line:
///
/// ```text
/// ARTIFACT: src/limiter.rs
/// CRITERION: unit tests pass
/// METRIC: coverage=0.82
/// FINDING: warning public API changed
/// APPROACH: token bucket per API key
/// ```
///
/// Other lines are logged and ignored. Exit status 0 means success.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    name: String,
    capability: String,
    command: String,
    environment: Vec<(String, String)>,
    timeout: Duration,
    template_name: String,
    template: String,
    project_root: PathBuf,
    prompts_dir: PathBuf,
    logs_dir: PathBuf,
}

/// How long stdout may stay open once the command has exited or been killed.
const STDOUT_DRAIN: Duration = Duration::from_millis(500);

enum Exit {
    Status(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

impl CommandAgent {
    pub fn new(
        name: &str,
        profile: &AgentProfile,
        agents: &AgentsConfig,
        flow: &FlowContext,
    ) -> Result<Self> {
        let template_name = profile.effective_prompt_template(&agents.defaults);
        let template = agents.prompt_template(template_name).ok_or_else(|| {
            FlowError::UserError(format!(
                "agent '{}' references unknown prompt_template '{}'",
                name, template_name
            ))
        })?;

        let mut environment: Vec<(String, String)> = profile
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        environment.sort();

        Ok(Self {
            name: name.to_string(),
            capability: profile.capability(name).to_string(),
            command: profile.command.clone(),
            environment,
            timeout: Duration::from_secs(profile.effective_timeout(&agents.defaults)),
            template_name: template_name.to_string(),
            template: template.to_string(),
            project_root: flow.project_root.clone(),
            prompts_dir: flow.prompts_dir(),
            logs_dir: flow.logs_dir(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, prp: &AgentPrp, ctx: &ExecutionContext) -> Result<ExecutionResult> {
        let prompt_ctx = PromptContext::new(prp, ctx, &self.capability);
        let prompt = generate_and_write_prompt(
            &self.prompts_dir,
            &prompt_ctx,
            &self.template,
            &self.template_name,
        )?;

        let mut vars = prompt_ctx.to_template_vars();
        vars.insert(
            "prompt_file".to_string(),
            prompt.path.to_string_lossy().into_owned(),
        );
        vars.insert(
            "project_root".to_string(),
            self.project_root.to_string_lossy().into_owned(),
        );

        let command_str = render_template(&self.command, &vars)
            .map_err(|e| e.in_template(&format!("command of agent '{}'", self.name)))?;
        let args = shell_words::split(&command_str).map_err(|e| {
            FlowError::UserError(format!(
                "failed to parse agent command '{}': {}\n\nFix: check for unmatched quotes or invalid escape sequences.",
                command_str, e
            ))
        })?;
        let Some((program, rest)) = args.split_first() else {
            return Err(FlowError::UserError(format!(
                "agent command is empty after parsing: '{}'",
                command_str
            )));
        };

        let log_base = self
            .logs_dir
            .join(sanitize(&ctx.feature_id))
            .join(format!("{}-attempt-{}", sanitize(&ctx.task_id), ctx.attempt));
        let stdout_path = log_base.with_extension("stdout.log");
        let stderr_path = log_base.with_extension("stderr.log");
        if let Some(parent) = log_base.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlowError::UserError(format!(
                    "failed to create agent logs directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let stderr_file = std::fs::File::create(&stderr_path).map_err(|e| {
            FlowError::UserError(format!(
                "failed to create stderr log '{}': {}",
                stderr_path.display(),
                e
            ))
        })?;

        let mut command = Command::new(program);
        command
            .args(rest)
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true)
            .envs(self.environment.iter().map(|(k, v)| (k, v)));

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            FlowError::ExecutionFailure(format!(
                "failed to execute agent command '{}': {}\n\nFix: ensure the command is installed and in PATH.",
                program, e
            ))
        })?;
        info!(agent = %ctx.agent_id, task = %ctx.task_id, command = %command_str, "agent command started");

        let report = Arc::new(Mutex::new(ExecutionResult::success(&ctx.task_id, &ctx.agent_id)));
        let mut reader = tokio::spawn(read_report(
            child.stdout.take(),
            stdout_path.clone(),
            Arc::clone(&report),
        ));

        let exit = tokio::select! {
            status = child.wait() => Exit::Status(status.map_err(|e| {
                FlowError::ExecutionFailure(format!("failed to wait for agent command: {}", e))
            })?),
            _ = tokio::time::sleep(self.timeout) => Exit::TimedOut,
            _ = ctx.cancel.cancelled() => Exit::Cancelled,
        };
        if !matches!(exit, Exit::Status(_)) {
            let _ = child.kill().await;
        }

        // A grandchild can keep stdout open after the command itself is gone.
        match tokio::time::timeout(STDOUT_DRAIN, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(FlowError::ExecutionFailure(format!("stdout reader failed: {}", e)));
            }
            Err(_) => {
                reader.abort();
                warn!(agent = %ctx.agent_id, task = %ctx.task_id, "agent stdout still open after the command ended; ignoring the rest");
            }
        }
        let mut result = {
            let mut report = report.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *report, ExecutionResult::success(&ctx.task_id, &ctx.agent_id))
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        match exit {
            Exit::Status(status) if status.success() => {}
            Exit::Status(status) => result.fail(&FlowError::ExecutionFailure(format!(
                "agent command exited with {}; see {}",
                status,
                stderr_path.display()
            ))),
            Exit::TimedOut => result.fail(&FlowError::ExecutionFailure(format!(
                "agent command timed out after {}s",
                self.timeout.as_secs()
            ))),
            Exit::Cancelled => result.fail(&FlowError::Cancelled(format!(
                "task '{}' was cancelled while its command ran",
                ctx.task_id
            ))),
        }
        debug!(agent = %ctx.agent_id, task = %ctx.task_id, success = result.success, "agent command finished");
        Ok(result)
    }
}

#[async_trait]
impl AgentRuntime for CommandAgent {
    fn capability(&self) -> &str {
        &self.capability
    }

    async fn execute(&self, prp: &AgentPrp, ctx: &ExecutionContext) -> ExecutionResult {
        match self.run(prp, ctx).await {
            Ok(result) => result,
            Err(err) => {
                warn!(agent = %ctx.agent_id, task = %ctx.task_id, error = %err, "agent command could not run");
                let err = match err {
                    FlowError::UserError(msg) => FlowError::ExecutionFailure(msg),
                    other => other,
                };
                ExecutionResult::failure(&ctx.task_id, &ctx.agent_id, &err)
            }
        }
    }
}

/// Copy stdout to its log while folding report lines into `result`.
async fn read_report(stdout: Option<ChildStdout>, log_path: PathBuf, result: Arc<Mutex<ExecutionResult>>) {
    let Some(stdout) = stdout else {
        return;
    };
    let mut log = open_log(&log_path).await;
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(file) = log.as_mut()
                    && let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await
                {
                    warn!(path = %log_path.display(), error = %e, "failed to write agent log");
                    log = None;
                }
                apply_report_line(&mut result.lock().unwrap_or_else(|e| e.into_inner()), &line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read agent stdout");
                break;
            }
        }
    }
    if let Some(mut file) = log {
        let _ = file.flush().await;
    }
}

async fn open_log(path: &Path) -> Option<tokio::fs::File> {
    match tokio::fs::File::create(path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to create stdout log");
            None
        }
    }
}

/// Fold one stdout line of the report protocol into `result`.
pub fn apply_report_line(result: &mut ExecutionResult, line: &str) {
    let line = line.trim();
    let Some((key, value)) = line.split_once(':') else {
        return;
    };
    let value = value.trim();

    match key.trim() {
        "ARTIFACT" if !value.is_empty() => result.artifacts.push(value.to_string()),
        "CRITERION" if !value.is_empty() => result.satisfied_criteria.push(value.to_string()),
        "APPROACH" if !value.is_empty() => result.approach = Some(value.to_string()),
        "METRIC" => match value.split_once('=') {
            Some((name, number)) => match number.trim().parse::<f64>() {
                Ok(n) => {
                    result.metrics.insert(name.trim().to_string(), n);
                }
                Err(_) => push_finding(result, Severity::Warning, format!("unparseable metric '{}'", value)),
            },
            None => push_finding(result, Severity::Warning, format!("unparseable metric '{}'", value)),
        },
        "FINDING" => {
            let (first, rest) = value.split_once(' ').unwrap_or((value, ""));
            match Severity::from_str(first) {
                Some(severity) => push_finding(result, severity, rest.trim().to_string()),
                None => push_finding(result, Severity::Info, value.to_string()),
            }
        }
        _ => {}
    }
}

fn push_finding(result: &mut ExecutionResult, severity: Severity, message: String) {
    result.findings.push(crate::prp::Finding { severity, message });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeStore;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn agent(dir: &TempDir, command: &str, timeout_seconds: u64) -> CommandAgent {
        let yaml = format!(
            "agents:\n  coder:\n    command: '{}'\n    timeout_seconds: {}\n    environment:\n      GREETING: hi\n",
            command, timeout_seconds
        );
        let agents = AgentsConfig::from_yaml(&yaml).unwrap();
        let flow = FlowContext::resolve_from(dir.path()).unwrap();
        CommandAgent::new("coder", agents.get("coder").unwrap(), &agents, &flow).unwrap()
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            agent_id: "coder-1".into(),
            feature_id: "f1".into(),
            task_id: "implement".into(),
            correlation_id: "c1".into(),
            attempt: 1,
            knowledge: Arc::new(KnowledgeStore::new(4)),
            cancel: CancellationToken::new(),
        }
    }

    fn prp() -> AgentPrp {
        AgentPrp {
            task_id: "implement".into(),
            goal: "Implement limiter".into(),
            validation_criteria: vec!["unit tests pass".into()],
            ..AgentPrp::default()
        }
    }

    #[test]
    fn test_report_protocol() {
        let mut result = ExecutionResult::success("t", "a");
        for line in [
            "ARTIFACT: src/limiter.rs",
            "CRITERION: unit tests pass",
            "METRIC: coverage = 0.82",
            "METRIC: broken",
            "FINDING: error unsafe block",
            "FINDING: something odd",
            "APPROACH: token bucket",
            "just chatter",
        ] {
            apply_report_line(&mut result, line);
        }
        assert_eq!(result.artifacts, vec!["src/limiter.rs"]);
        assert_eq!(result.satisfied_criteria, vec!["unit tests pass"]);
        assert_eq!(result.metrics.get("coverage"), Some(&0.82));
        assert_eq!(result.approach.as_deref(), Some("token bucket"));
        assert_eq!(result.findings.len(), 3);
        assert_eq!(result.findings[1].severity, Severity::Error);
        assert_eq!(result.findings[1].message, "unsafe block");
        assert_eq!(result.findings[2].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_runs_command_and_parses_stdout() {
        let dir = TempDir::new().unwrap();
        let agent = agent(
            &dir,
            "sh -c \"echo ARTIFACT: out.txt; echo CRITERION: $GREETING {task_id}; cat {prompt_file} >/dev/null\"",
            10,
        );
        let result = agent.execute(&prp(), &ctx()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.artifacts, vec!["out.txt"]);
        assert_eq!(result.satisfied_criteria, vec!["hi implement"]);

        let prompt = dir.path().join(".prpflow/prompts/f1/implement-attempt-1.md");
        assert!(std::fs::read_to_string(prompt).unwrap().contains("Implement limiter"));
        let log = dir.path().join(".prpflow/logs/f1/implement-attempt-1.stdout.log");
        assert!(std::fs::read_to_string(log).unwrap().contains("ARTIFACT: out.txt"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_failure() {
        let dir = TempDir::new().unwrap();
        let result = agent(&dir, "sh -c \"echo ARTIFACT: partial; exit 3\"", 10)
            .execute(&prp(), &ctx())
            .await;
        assert!(!result.success);
        assert_eq!(result.artifacts, vec!["partial"]);
        assert_eq!(result.failure_kind(), Some(crate::error::FailureKind::Execution));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let dir = TempDir::new().unwrap();
        let started = Instant::now();
        let result = agent(&dir, "sleep 30", 1).execute(&prp(), &ctx()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().message.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_holds_when_grandchild_keeps_stdout_open() {
        let dir = TempDir::new().unwrap();
        let started = Instant::now();
        let result = agent(&dir, "sh -c \"echo ARTIFACT: early; sleep 6; echo late\"", 1)
            .execute(&prp(), &ctx())
            .await;

        assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
        assert!(!result.success);
        assert!(result.error.unwrap().message.contains("timed out"));
        assert_eq!(result.artifacts, vec!["early"]);
    }

    #[tokio::test]
    async fn test_cancellation_kills_command() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let result = agent(&dir, "sleep 30", 60).execute(&prp(), &ctx).await;
        assert_eq!(result.failure_kind(), Some(crate::error::FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_program_fails_the_task() {
        let dir = TempDir::new().unwrap();
        let result = agent(&dir, "nonexistent_command_xyz_123", 10)
            .execute(&prp(), &ctx())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().message.contains("failed to execute"));
    }
}
