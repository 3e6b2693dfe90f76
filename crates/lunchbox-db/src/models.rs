//! Database row types. These map directly to SQLite rows and are kept
//! separate from the lunchbox-types models so the storage layout can change
//! without touching the domain.

pub struct RoundRow {
    pub id: String,
    pub opener_id: String,
    pub status: String,
    pub selected_proposal_id: Option<String>,
    pub created_at: String,
    pub closed_at: Option<String>,
}

pub struct ParticipantRow {
    pub round_id: String,
    pub user_id: String,
}

pub struct ProposalRow {
    pub id: String,
    pub round_id: String,
    pub label: String,
    pub location: Option<String>,
    pub note: Option<String>,
    pub submitted_by: String,
}
