use std::collections::HashSet;
use std::sync::Arc;

use crate::orchestrator::RoundOrchestrator;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub orchestrator: RoundOrchestrator,
    pub jwt_secret: String,
    /// User ids allowed to post announcements.
    pub admins: HashSet<String>,
}
