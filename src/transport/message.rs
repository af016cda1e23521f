//! Wire envelope for transport traffic.

use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TaskAssignment,
    TaskResult,
    Error,
    Heartbeat,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::TaskAssignment => "task_assignment",
            MessageKind::TaskResult => "task_result",
            MessageKind::Error => "error",
            MessageKind::Heartbeat => "heartbeat",
        };
        f.write_str(s)
    }
}

/// Envelope for all transport traffic.
///
/// The correlation id is fixed at construction and has no setter; messages
/// caused by another message are built with [`AgentMessage::reply`] or
/// [`AgentMessage::correlated`] so the id carries over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub message_type: MessageKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    correlation_id: String,
}

impl AgentMessage {
    /// Start a new correlation chain.
    pub fn new(
        kind: MessageKind,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::correlated(kind, sender, recipient, payload, Uuid::new_v4().to_string())
    }

    /// Build a message belonging to an existing correlation chain.
    pub fn correlated(
        kind: MessageKind,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender.into(),
            recipient_id: recipient.into(),
            message_type: kind,
            payload,
            timestamp: Utc::now(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Answer this message; the reply goes back to the sender under the same
    /// correlation id.
    pub fn reply(
        &self,
        kind: MessageKind,
        sender: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::correlated(
            kind,
            sender,
            self.sender_id.clone(),
            payload,
            self.correlation_id.clone(),
        )
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Key consumers use to drop duplicate deliveries.
    pub fn dedup_key(&self) -> (String, String) {
        (self.correlation_id.clone(), self.id.clone())
    }

    /// Serialize a typed payload.
    pub fn encode<T: Serialize>(payload: &T) -> Result<serde_json::Value> {
        serde_json::to_value(payload)
            .map_err(|e| FlowError::Transport(format!("failed to encode payload: {}", e)))
    }

    /// Deserialize the payload into its kind-specific type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            FlowError::Transport(format!(
                "malformed {} payload in message {}: {}",
                self.message_type, self.id, e
            ))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| FlowError::Transport(format!("failed to serialize message: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FlowError::Transport(format!("failed to parse message: {}", e)))
    }
}
