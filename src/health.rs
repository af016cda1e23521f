//! Agent liveness and task progress.

use crate::coordinator::Coordinator;
use crate::task::TaskState;
use crate::transport::{AgentStatus, Heartbeat, MessageBus, MessageKind, Subscription, topics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub capability: String,
    pub status: AgentStatus,
    pub alive: bool,
    pub current_task: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub feature_id: String,
    pub task_id: String,
    pub state: TaskState,
    pub attempts: u32,
    pub claimant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub agents: Vec<AgentHealth>,
    pub tasks: Vec<TaskProgress>,
}

impl HealthReport {
    pub fn alive_agents(&self) -> usize {
        self.agents.iter().filter(|a| a.alive).count()
    }
}

struct Seen {
    beat: Heartbeat,
    at: DateTime<Utc>,
    instant: Instant,
}

/// Latest heartbeat per agent.
pub struct HealthMonitor {
    liveness_timeout: Duration,
    agents: Mutex<BTreeMap<String, Seen>>,
}

impl HealthMonitor {
    pub fn new(liveness_timeout: Duration) -> Self {
        Self {
            liveness_timeout,
            agents: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Seen>> {
        self.agents.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, beat: Heartbeat) {
        let seen = Seen {
            at: Utc::now(),
            instant: Instant::now(),
            beat,
        };
        self.lock().insert(seen.beat.agent_id.clone(), seen);
    }

    /// Subscribe to heartbeats now and consume them in the background.
    pub fn start(self: &Arc<Self>, bus: &MessageBus, shutdown: CancellationToken) -> JoinHandle<()> {
        let inbox = bus.subscribe(topics::HEARTBEAT);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(inbox, shutdown).await })
    }

    async fn run(&self, mut inbox: Subscription, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) if message.message_type == MessageKind::Heartbeat => {
                        match message.payload_as::<Heartbeat>() {
                            Ok(beat) => self.record(beat),
                            Err(e) => debug!(error = %e, "ignoring malformed heartbeat"),
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    }

    /// Agents in id order; an agent that said it is stopping is never alive.
    pub fn agents(&self) -> Vec<AgentHealth> {
        let now = Instant::now();
        self.lock()
            .values()
            .map(|seen| AgentHealth {
                agent_id: seen.beat.agent_id.clone(),
                capability: seen.beat.capability.clone(),
                status: seen.beat.status,
                alive: seen.beat.status != AgentStatus::Stopping
                    && now.saturating_duration_since(seen.instant) <= self.liveness_timeout,
                current_task: seen.beat.task_id.clone(),
                last_seen: seen.at,
            })
            .collect()
    }

    pub fn report(&self, coordinator: &Coordinator) -> HealthReport {
        let tasks = coordinator
            .snapshots()
            .into_iter()
            .flat_map(|feature| {
                let feature_id = feature.feature_id;
                feature.tasks.into_iter().map(move |task| TaskProgress {
                    feature_id: feature_id.clone(),
                    task_id: task.id,
                    state: task.state,
                    attempts: task.attempts,
                    claimant: task.claimant,
                })
            })
            .collect();

        HealthReport {
            agents: self.agents(),
            tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beat(agent: &str, status: AgentStatus, task: Option<&str>) -> Heartbeat {
        Heartbeat {
            agent_id: agent.into(),
            capability: "coder".into(),
            status,
            task_id: task.map(str::to_string),
            progress: None,
        }
    }

    #[test]
    fn test_latest_heartbeat_wins() {
        let monitor = HealthMonitor::new(Duration::from_secs(60));
        monitor.record(beat("coder-1", AgentStatus::Idle, None));
        monitor.record(beat("coder-1", AgentStatus::Busy, Some("implement")));
        monitor.record(beat("coder-2", AgentStatus::Idle, None));

        let agents = monitor.agents();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].agent_id, "coder-1");
        assert_eq!(agents[0].status, AgentStatus::Busy);
        assert_eq!(agents[0].current_task.as_deref(), Some("implement"));
        assert!(agents.iter().all(|a| a.alive));
    }

    #[test]
    fn test_stopping_agents_are_not_alive() {
        let monitor = HealthMonitor::new(Duration::from_secs(60));
        monitor.record(beat("coder-1", AgentStatus::Stopping, None));
        assert!(!monitor.agents()[0].alive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_agents_expire() {
        let monitor = HealthMonitor::new(Duration::from_secs(5));
        monitor.record(beat("coder-1", AgentStatus::Idle, None));
        tokio::time::advance(Duration::from_secs(6)).await;
        monitor.record(beat("coder-2", AgentStatus::Idle, None));

        let agents = monitor.agents();
        assert!(!agents[0].alive);
        assert!(agents[1].alive);
    }
}
