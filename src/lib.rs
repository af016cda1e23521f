//! prpflow: multi-agent task coordination with knowledge-augmented PRPs.
//!
//! A [`task::FeatureRequest`] is decomposed into dependent tasks. The
//! [`coordinator::Coordinator`] publishes each ready task on the
//! [`transport::MessageBus`]; exactly one [`agent::AgentWorker`] claims it,
//! the [`prp::PrpProcessor`] validates it, enriches it from the
//! [`knowledge::KnowledgeStore`] and gates the agent's result, and the
//! [`learner::OutcomeLearner`] turns every report into a stored pattern that
//! later enrichment retrieves.
//!
//! [`system::Swarm`] wires all of it together:
//!
//! ```no_run
//! use prpflow::agent::DryRunAgent;
//! use prpflow::config::Config;
//! use prpflow::system::Swarm;
//! use prpflow::task::FeatureRequest;
//! use std::sync::Arc;
//!
//! # async fn demo() -> prpflow::error::Result<()> {
//! let swarm = ["coder", "tester", "reviewer", "devops"]
//!     .into_iter()
//!     .fold(Swarm::builder(Config::default()), |b, cap| {
//!         b.runtime(Arc::new(DryRunAgent::new(cap)), 1)
//!     })
//!     .build()?;
//! let request = FeatureRequest::new("CSV export", "Export reports as CSV", Vec::new());
//! let (_, outcome) = swarm.run_feature(request, None).await?;
//! assert!(outcome.success);
//! swarm.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod health;
pub mod knowledge;
pub mod learner;
pub mod prp;
pub mod system;
pub mod task;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
