use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::info;
use uuid::Uuid;

use lunchbox_gateway::DeliveryOutcome;
use lunchbox_types::api::{AnnouncementRequest, Claims, DispatchReport, TargetReport};
use lunchbox_types::error::RoundError;
use lunchbox_types::events::{ChannelTarget, Notification, new_event_id};

use crate::error::ApiError;
use crate::state::{AppState, AppStateInner};

pub async fn announce_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AnnouncementRequest>,
) -> Result<Json<DispatchReport>, ApiError> {
    announce(&state, &claims, ChannelTarget::personal(user_id), req)
}

pub async fn announce_to_round(
    State(state): State<AppState>,
    Path(round_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AnnouncementRequest>,
) -> Result<Json<DispatchReport>, ApiError> {
    state.orchestrator.get_round(round_id)?;
    announce(&state, &claims, ChannelTarget::round(round_id), req)
}

pub async fn announce_global(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AnnouncementRequest>,
) -> Result<Json<DispatchReport>, ApiError> {
    announce(&state, &claims, ChannelTarget::Global, req)
}

fn announce(
    state: &AppStateInner,
    claims: &Claims,
    target: ChannelTarget,
    req: AnnouncementRequest,
) -> Result<Json<DispatchReport>, ApiError> {
    if !state.admins.contains(&claims.sub) {
        return Err(RoundError::Unauthorized("Only administrators can post announcements".into()).into());
    }
    let title = req.title.trim();
    let message = req.message.trim();
    if title.is_empty() || message.is_empty() {
        return Err(RoundError::Validation("Title and message are required".into()).into());
    }

    let event_id = new_event_id();
    info!("{} announcing '{}' to {}", claims.username, title, target);
    let notification = Notification::announcement(&event_id, title, message, req.priority);
    let outcome = state.orchestrator.dispatcher().dispatch_one(&notification, target);

    Ok(Json(DispatchReport {
        event_id,
        targets: vec![report(outcome)],
    }))
}

fn report(outcome: DeliveryOutcome) -> TargetReport {
    TargetReport {
        channel: outcome.target.address(),
        delivered_to: outcome.delivered(),
        error: outcome.result.err().map(|e| e.to_string()),
    }
}
