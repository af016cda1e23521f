//! Message transport: ordered-per-publisher, at-least-once publish/subscribe.
//!
//! Every inter-agent interaction travels as an [`AgentMessage`] over the
//! [`MessageBus`]. Consumers must tolerate duplicates; [`Deduplicator`]
//! remembers `(correlation_id, message_id)` pairs for that purpose.

mod backoff;
mod bus;
mod dedup;
mod message;
mod payload;
#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use bus::{BusStats, MessageBus, PublishReceipt, Subscription};
pub use dedup::Deduplicator;
pub use message::{AgentMessage, MessageKind};
pub use payload::{AgentStatus, DeadLetter, Heartbeat, TaskAssignment, TaskReport};

/// Well-known topic names.
pub mod topics {
    /// Execution reports from agents to the coordinator and the learner.
    pub const RESULTS: &str = "tasks.results";

    /// Agent liveness and task progress.
    pub const HEARTBEAT: &str = "system.heartbeat";

    /// Messages that exhausted their delivery attempts.
    pub const DEAD_LETTER: &str = "system.dead_letter";

    /// Feature-level outcomes.
    pub const FEATURE_OUTCOMES: &str = "features.outcomes";

    /// Assignment topic for one capability tag.
    pub fn assignments(capability: &str) -> String {
        format!("tasks.{}", capability)
    }
}
