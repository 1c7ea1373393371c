//! Claim DTOs for serializing launcher access to a context

use serde::{Deserialize, Serialize};

/// Request to claim a data context for exclusive processing.
///
/// The archive grants at most one live claim per context; a claim
/// expires on its own after `lease_seconds` so a crashed launcher
/// never wedges a context forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Identity of the launcher asking for the claim.
    pub owner: String,
    /// How long the claim stays valid without a release.
    pub lease_seconds: u64,
}

/// Archive verdict on a claim request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    /// True when the claim was granted to this owner.
    pub claimed: bool,
}

/// Request to release a claim before its lease runs out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub owner: String,
}
