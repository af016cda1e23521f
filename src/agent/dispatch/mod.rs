//! Command-driven agents.
//!
//! A [`CommandAgent`] renders the PRP into a prompt file, runs the profile's
//! command as a subprocess (timeout, cancellation, log capture) and turns the
//! report lines on its stdout into an `ExecutionResult`.

mod executor;

pub use executor::{CommandAgent, apply_report_line};
