use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConflictKind, Result, RoundError};

/// Users are owned by the identity service; we only ever see their ids.
pub type UserId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Open,
    Closed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One candidate option, owned by exactly one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub round_id: Uuid,
    pub label: String,
    pub location: Option<String>,
    pub note: Option<String>,
    pub submitted_by: UserId,
}

/// Proposal input as submitted, before sanitization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewProposal {
    pub label: String,
    pub location: Option<String>,
    pub note: Option<String>,
    pub submitted_by: UserId,
}

/// One decision round.
///
/// The mutating methods are the only transitions the round supports; each
/// one re-checks the state it depends on so the invariants hold no matter
/// who calls them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    pub opener_id: UserId,
    pub status: RoundStatus,
    /// Insertion order, no duplicates, opener first.
    pub participants: Vec<UserId>,
    pub proposals: Vec<Proposal>,
    pub selected_proposal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn open(opener_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            participants: vec![opener_id.clone()],
            opener_id,
            status: RoundStatus::Open,
            proposals: Vec::new(),
            selected_proposal_id: None,
            created_at: now,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == RoundStatus::Open
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn selected_proposal(&self) -> Option<&Proposal> {
        let id = self.selected_proposal_id?;
        self.proposals.iter().find(|p| p.id == id)
    }

    /// Returns `false` when the user was already a participant.
    pub fn add_participant(&mut self, user_id: &str) -> Result<bool> {
        if !self.is_open() {
            return Err(RoundError::conflict(
                ConflictKind::RoundClosed,
                "Cannot join a round that has already closed",
            ));
        }
        if self.is_participant(user_id) {
            return Ok(false);
        }
        self.participants.push(user_id.to_string());
        Ok(true)
    }

    /// Whether `user_id` may propose right now.
    pub fn ensure_can_propose(&self, user_id: &str) -> Result<()> {
        if !self.is_open() {
            return Err(RoundError::conflict(
                ConflictKind::RoundClosed,
                "Cannot propose to a closed round",
            ));
        }
        if !self.is_participant(user_id) {
            return Err(RoundError::Unauthorized(
                "User must join the round before proposing".into(),
            ));
        }
        Ok(())
    }

    pub fn add_proposal(&mut self, proposal: Proposal) -> Result<&Proposal> {
        self.ensure_can_propose(&proposal.submitted_by)?;
        if proposal.round_id != self.id {
            return Err(RoundError::Validation(format!(
                "Proposal belongs to round {}, not {}",
                proposal.round_id, self.id
            )));
        }
        self.proposals.push(proposal);
        Ok(&self.proposals[self.proposals.len() - 1])
    }

    /// Close the round, selecting the proposal at the index returned by
    /// `pick`. `pick` receives the number of proposals (always >= 1).
    pub fn close(
        &mut self,
        closed_by: &str,
        now: DateTime<Utc>,
        pick: impl FnOnce(usize) -> usize,
    ) -> Result<&Proposal> {
        if self.opener_id != closed_by {
            return Err(RoundError::Unauthorized(
                "Only the round opener can close the round".into(),
            ));
        }
        if !self.is_open() {
            return Err(RoundError::conflict(
                ConflictKind::AlreadyClosed,
                "Round is already closed",
            ));
        }
        if self.proposals.is_empty() {
            return Err(RoundError::conflict(
                ConflictKind::NoProposals,
                "No proposals have been submitted",
            ));
        }

        let index = pick(self.proposals.len()).min(self.proposals.len() - 1);
        self.selected_proposal_id = Some(self.proposals[index].id);
        self.status = RoundStatus::Closed;
        self.closed_at = Some(now);
        Ok(&self.proposals[index])
    }
}
