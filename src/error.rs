// Typed error taxonomy for the auction engine.
//
// Every variant is recoverable by the caller; none is fatal to the service.
// `Conflict` in particular means an optimistic-concurrency precondition
// failed and the caller should re-read and retry.

use thiserror::Error;

use crate::model::Collection;

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("{collection} entity `{id}` not found")]
    NotFound { collection: Collection, id: String },

    #[error("write conflict on {collection} `{id}`: expected version {expected}, found {found}")]
    Conflict {
        collection: Collection,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("insufficient budget: team `{team_id}` has {remaining} remaining, sale price is {price}")]
    InsufficientBudget {
        team_id: String,
        remaining: u64,
        price: u64,
    },

    #[error("player `{player_id}` is already sold")]
    AlreadySold { player_id: String },

    #[error("player `{player_id}` is not eligible: {reason}")]
    PlayerNotEligible { player_id: String, reason: String },

    #[error("player `{player_id}` is still assigned to a team roster; unsell it first")]
    PlayerStillAssigned { player_id: String },

    #[error("invalid transition: {message}")]
    InvalidTransition { message: String },

    #[error("operation `{operation}` requires the admin role")]
    Forbidden { operation: &'static str },

    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl AuctionError {
    /// Stable machine-readable code for wire payloads. UI clients map each
    /// code to a specific message; `conflict` additionally triggers an
    /// automatic read-retry before surfacing.
    pub fn code(&self) -> &'static str {
        match self {
            AuctionError::NotFound { .. } => "not_found",
            AuctionError::Conflict { .. } => "conflict",
            AuctionError::InsufficientBudget { .. } => "insufficient_budget",
            AuctionError::AlreadySold { .. } => "already_sold",
            AuctionError::PlayerNotEligible { .. } => "player_not_eligible",
            AuctionError::PlayerStillAssigned { .. } => "player_still_assigned",
            AuctionError::InvalidTransition { .. } => "invalid_transition",
            AuctionError::Forbidden { .. } => "forbidden",
            AuctionError::Validation { .. } => "validation",
            AuctionError::Storage(_) => "storage",
        }
    }

    /// Whether a caller should re-read fresh state and retry the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuctionError::Conflict { .. })
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, AuctionError>;
