//! Consumes execution reports and writes patterns back to the store.

use super::extract::{PatternDraft, PatternExtractor};
use crate::config::LearnerConfig;
use crate::error::Result;
use crate::events::{Event, EventAction, EventLog};
use crate::knowledge::{Embedder, KnowledgeEntry, KnowledgeStore};
use crate::transport::{
    AgentMessage, Backoff, Deduplicator, MessageBus, MessageKind, Subscription, TaskReport, topics,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Listens on the results topic and turns each report into a pattern entry.
///
/// Learning never blocks or fails a feature: writes are retried with
/// backoff a bounded number of times and then dropped with an error log.
pub struct OutcomeLearner {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn PatternExtractor>,
    events: Arc<EventLog>,
    backoff: Backoff,
    max_attempts: u32,
    dedup: Deduplicator,
}

impl OutcomeLearner {
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn PatternExtractor>,
        config: &LearnerConfig,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            events,
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_base_ms),
                2.0,
                Duration::from_secs(5),
            )
            .with_jitter(),
            max_attempts: config.max_store_attempts.max(1),
            dedup: Deduplicator::new(4096),
        }
    }

    pub fn subscribe(&self, bus: &MessageBus) -> Subscription {
        bus.subscribe(topics::RESULTS)
    }

    /// Spawn the learner loop on an existing subscription.
    pub fn spawn(self, mut inbox: Subscription, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("outcome learner started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = inbox.recv() => match message {
                        Some(message) => self.on_message(message).await,
                        None => break,
                    },
                }
            }
            inbox.cancel();
            info!("outcome learner stopped");
        })
    }

    async fn on_message(&self, message: AgentMessage) {
        if message.message_type != MessageKind::TaskResult || !self.dedup.first_delivery(&message) {
            return;
        }
        match message.payload_as::<TaskReport>() {
            Ok(report) => {
                self.learn(&report).await;
            }
            Err(e) => warn!(error = %e, "learner dropping malformed report"),
        }
    }

    /// Extract and store a pattern for `report`. Returns the new entry id.
    pub async fn learn(&self, report: &TaskReport) -> Option<String> {
        let draft = self.extractor.extract(report)?;

        for attempt in 0..self.max_attempts {
            match self.persist(&draft).await {
                Ok(id) => {
                    debug!(id = %id, task = %report.task.id, source = %draft.source_type, "stored pattern");
                    self.events.record(
                        Event::new(EventAction::PatternStore)
                            .with_feature(&report.feature_id)
                            .with_task(&report.task.id)
                            .with_details(json!({
                                "entry_id": id,
                                "source_type": draft.source_type,
                                "attempt": attempt + 1,
                            })),
                    );
                    return Some(id);
                }
                Err(e) if attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        task = %report.task.id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "pattern store failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        task = %report.task.id,
                        attempts = self.max_attempts,
                        error = %e,
                        "giving up on storing pattern"
                    );
                }
            }
        }
        None
    }

    async fn persist(&self, draft: &PatternDraft) -> Result<String> {
        let embedding = self.embedder.embed(&draft.content).await?;
        let mut entry = KnowledgeEntry::new(&draft.content, embedding, draft.source_type);
        entry.tags = draft.tags.clone();
        entry.metadata = draft.metadata.clone();

        if let Some(signature) = draft.signature()
            && let Some(previous) = self
                .store
                .find_by_metadata("signature", &json!(signature))
                .into_iter()
                .find(|e| e.source_type == draft.source_type)
        {
            entry = entry.superseding(&previous.id);
        }

        self.store.store(entry)
    }
}
