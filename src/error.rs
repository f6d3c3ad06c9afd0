use thiserror::Error;

use crate::types::Rung;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("bandit has no arms configured")]
    NoArms,
    #[error("snapshot encode/decode failed: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error(transparent)]
    Ladder(#[from] LadderError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    #[error("maximum rung reached ({rung})")]
    MaxRungReached { rung: Rung },
}
