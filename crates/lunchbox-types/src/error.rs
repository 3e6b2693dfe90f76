use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Which business rule a `Conflict` violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The round is closed and accepts no further mutation.
    RoundClosed,
    /// `close` was requested for a round that is already closed.
    AlreadyClosed,
    /// `close` was requested before anyone proposed anything.
    NoProposals,
}

/// Every outcome a round operation can fail with.
///
/// Callers match on the variant; the edge layer owns the mapping to
/// transport status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoundError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{message}")]
    Conflict { kind: ConflictKind, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("An unexpected error occurred. Please contact support with correlation id {correlation_id}")]
    Internal { correlation_id: String },
}

pub type Result<T> = std::result::Result<T, RoundError>;

impl RoundError {
    pub fn round_not_found(round_id: Uuid) -> Self {
        Self::NotFound(format!("Round not found: {}", round_id))
    }

    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an unclassified fault. The fault itself is logged here together
    /// with the correlation id handed back to the caller.
    pub fn internal(fault: impl std::fmt::Display) -> Self {
        let correlation_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        error!("[{}] Unexpected error: {}", correlation_id, fault);
        Self::Internal { correlation_id }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict { .. } => "conflict",
            Self::Validation(_) => "validation",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            Self::Conflict { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
