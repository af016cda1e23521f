//! Task coordinator: decomposes features into a dependency graph of tasks,
//! publishes assignments as dependencies complete, arbitrates claims, and
//! applies the retry, timeout and cancellation policy.
//!
//! # Task lifecycle
//!
//! ```text
//! pending -> queued -> claimed -> in_progress -> completed
//!                                             -> failed (retryable: back to pending)
//! any non-terminal state -> cancelled
//! ```
//!
//! All state lives behind one lock in [`Coordinator`]; transitions compute
//! the messages to publish and the lock is released before publishing.

mod claims;
mod decompose;
mod graph;
mod service;
mod state;

pub use claims::{ClaimArbiter, ClaimGrant};
pub use decompose::decompose;
pub use graph::TaskGraph;
pub use service::{Coordinator, Plan};
pub use state::{FeatureOutcome, FeatureSnapshot, FeatureStatus, TaskSnapshot};
