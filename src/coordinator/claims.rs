//! Task claim arbitration.

use crate::error::Result;
use tokio_util::sync::CancellationToken;

/// Grants exclusive ownership of a queued task attempt.
///
/// The arbiter compares and swaps under its own lock: of any number of
/// concurrent claims for the same attempt, exactly one succeeds and the rest
/// get [`FlowError::AlreadyClaimed`](crate::error::FlowError::AlreadyClaimed).
pub trait ClaimArbiter: Send + Sync {
    fn claim(
        &self,
        feature_id: &str,
        task_id: &str,
        correlation_id: &str,
        agent_id: &str,
    ) -> Result<ClaimGrant>;
}

/// Proof of a successful claim.
#[derive(Debug, Clone)]
pub struct ClaimGrant {
    /// Fires when the feature is cancelled or the claim times out.
    pub cancel: CancellationToken,
}
