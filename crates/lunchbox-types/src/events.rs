use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Address of the single system-wide channel.
pub const GLOBAL_ADDRESS: &str = "/topic/global";

/// One of the three addressing schemes a notification can be routed through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelTarget {
    /// Every live connection of one user.
    Personal { user_id: String },
    /// Every connection currently subscribed to one round.
    Round { round_id: Uuid },
    /// Every live connection.
    Global,
}

impl ChannelTarget {
    pub fn personal(user_id: impl Into<String>) -> Self {
        Self::Personal {
            user_id: user_id.into(),
        }
    }

    pub fn round(round_id: Uuid) -> Self {
        Self::Round { round_id }
    }

    /// Routable address rendered into the notification's `channel` field.
    pub fn address(&self) -> String {
        match self {
            Self::Personal { user_id } => format!("/user/{}/notifications", user_id),
            Self::Round { round_id } => format!("/topic/rounds/{}", round_id),
            Self::Global => GLOBAL_ADDRESS.to_string(),
        }
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Personal { user_id } => write!(f, "PERSONAL:{}", user_id),
            Self::Round { round_id } => write!(f, "ROUND:{}", round_id),
            Self::Global => write!(f, "GLOBAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Invitation,
    RoundOpened,
    UserJoined,
    ProposalAdded,
    RoundClosed,
    Announcement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Transient notification handed to the live transport. Never persisted.
///
/// `id` identifies the logical event: every notification produced by the
/// same round operation carries the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Filled in by the dispatcher with the address of the target it is
    /// being delivered to.
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub payload: HashMap<String, Value>,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
}

pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

impl Notification {
    fn base(
        event_id: &str,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: event_id.to_string(),
            kind,
            channel: String::new(),
            round_id: None,
            user_id: None,
            title: title.into(),
            message: message.into(),
            payload: HashMap::new(),
            priority,
            timestamp: Utc::now(),
        }
    }

    fn with_payload<const N: usize>(mut self, entries: [(&str, Value); N]) -> Self {
        self.payload
            .extend(entries.into_iter().map(|(k, v)| (k.to_string(), v)));
        self
    }

    pub fn invitation(event_id: &str, round_id: Uuid, invitee_id: &str, inviter_name: &str) -> Self {
        let mut n = Self::base(
            event_id,
            NotificationType::Invitation,
            "Round Invitation",
            format!("{} invited you to join a lunch round", inviter_name),
            Priority::High,
        )
        .with_payload([
            ("inviterName", json!(inviter_name)),
            ("roundId", json!(round_id)),
            ("action", json!("join")),
        ]);
        n.round_id = Some(round_id);
        n.user_id = Some(invitee_id.to_string());
        n
    }

    pub fn round_opened(event_id: &str, round_id: Uuid, opener_name: &str) -> Self {
        let mut n = Self::base(
            event_id,
            NotificationType::RoundOpened,
            "New Round Available",
            format!("{} opened a new lunch round", opener_name),
            Priority::Normal,
        )
        .with_payload([
            ("roundId", json!(round_id)),
            ("openerName", json!(opener_name)),
        ]);
        n.round_id = Some(round_id);
        n
    }

    pub fn user_joined(event_id: &str, round_id: Uuid, username: &str, participant_count: usize) -> Self {
        let mut n = Self::base(
            event_id,
            NotificationType::UserJoined,
            "User Joined",
            format!("{} joined the round ({} participants)", username, participant_count),
            Priority::Normal,
        )
        .with_payload([
            ("username", json!(username)),
            ("totalParticipants", json!(participant_count)),
        ]);
        n.round_id = Some(round_id);
        n
    }

    pub fn proposal_added(
        event_id: &str,
        round_id: Uuid,
        username: &str,
        label: &str,
        total_proposals: usize,
    ) -> Self {
        let mut n = Self::base(
            event_id,
            NotificationType::ProposalAdded,
            "Place Suggested",
            format!("{} suggested {} ({} total)", username, label, total_proposals),
            Priority::Normal,
        )
        .with_payload([
            ("username", json!(username)),
            ("label", json!(label)),
            ("totalProposals", json!(total_proposals)),
        ]);
        n.round_id = Some(round_id);
        n
    }

    /// Round-scoped announcement of the outcome.
    pub fn round_closed(event_id: &str, round_id: Uuid, label: &str, location: Option<&str>) -> Self {
        let mut n = Self::base(
            event_id,
            NotificationType::RoundClosed,
            "Round Closed!",
            format!("Selected place: {}", label),
            Priority::High,
        )
        .with_payload([
            ("label", json!(label)),
            ("location", json!(location.unwrap_or("N/A"))),
        ]);
        n.round_id = Some(round_id);
        n
    }

    /// Personal copy of the outcome for one participant.
    pub fn round_decided(
        event_id: &str,
        round_id: Uuid,
        participant_id: &str,
        label: &str,
        location: Option<&str>,
    ) -> Self {
        let mut n = Self::base(
            event_id,
            NotificationType::RoundClosed,
            "Lunch Decided!",
            format!("Your group is going to {}", label),
            Priority::High,
        )
        .with_payload([
            ("label", json!(label)),
            ("location", json!(location.unwrap_or("N/A"))),
            ("roundId", json!(round_id)),
        ]);
        n.round_id = Some(round_id);
        n.user_id = Some(participant_id.to_string());
        n
    }

    pub fn announcement(event_id: &str, title: &str, message: &str, priority: Priority) -> Self {
        Self::base(event_id, NotificationType::Announcement, title, message, priority)
    }
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: String, username: String },

    /// A notification routed to this connection
    Notification(Notification),

    /// Round subscription acknowledged
    Subscribed { round_id: Uuid },

    Unsubscribed { round_id: Uuid },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving round-scoped notifications for a round.
    /// Subscribing does not make the user a participant.
    SubscribeRound { round_id: Uuid },

    UnsubscribeRound { round_id: Uuid },
}
