use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConflictKind;
use crate::events::Priority;
use crate::models::{Proposal, Round, RoundStatus, UserId};

// -- JWT Claims --

/// JWT claims minted by the identity service. `sub` is the user id every
/// round operation acts as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Rounds --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenRoundRequest {
    #[serde(default)]
    pub invitee_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposeRequest {
    pub label: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoundResponse {
    pub id: Uuid,
    pub opener_id: UserId,
    pub status: RoundStatus,
    pub participants: Vec<UserId>,
    pub proposals: Vec<Proposal>,
    pub selected_proposal: Option<Proposal>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&Round> for RoundResponse {
    fn from(round: &Round) -> Self {
        Self {
            id: round.id,
            opener_id: round.opener_id.clone(),
            status: round.status,
            participants: round.participants.clone(),
            proposals: round.proposals.clone(),
            selected_proposal: round.selected_proposal().cloned(),
            created_at: round.created_at,
            closed_at: round.closed_at,
        }
    }
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnouncementRequest {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Result of delivering to one channel target.
#[derive(Debug, Serialize, Deserialize)]
pub struct TargetReport {
    pub channel: String,
    pub delivered_to: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchReport {
    pub event_id: String,
    pub targets: Vec<TargetReport>,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Set for conflicts only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConflictKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}
