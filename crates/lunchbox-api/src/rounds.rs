use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use lunchbox_types::api::{Claims, OpenRoundRequest, ProposeRequest, RoundResponse};
use lunchbox_types::models::NewProposal;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn open_round(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenRoundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let round = state
        .orchestrator
        .open_round(&claims.sub, &req.invitee_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(RoundResponse::from(&round))))
}

pub async fn list_open_rounds(State(state): State<AppState>) -> Json<Vec<RoundResponse>> {
    let rounds = state.orchestrator.list_open_rounds();
    Json(rounds.iter().map(|r| RoundResponse::from(r.as_ref())).collect())
}

pub async fn get_round(
    State(state): State<AppState>,
    Path(round_id): Path<Uuid>,
) -> Result<Json<RoundResponse>, ApiError> {
    let round = state.orchestrator.get_round(round_id)?;
    Ok(Json(RoundResponse::from(round.as_ref())))
}

pub async fn join_round(
    State(state): State<AppState>,
    Path(round_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<RoundResponse>, ApiError> {
    let round = state.orchestrator.join_round(round_id, &claims.sub).await?;
    Ok(Json(RoundResponse::from(&round)))
}

pub async fn propose(
    State(state): State<AppState>,
    Path(round_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ProposeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let proposal = state
        .orchestrator
        .propose(
            round_id,
            NewProposal {
                label: req.label,
                location: req.location,
                note: req.note,
                submitted_by: claims.sub,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

pub async fn list_proposals(
    State(state): State<AppState>,
    Path(round_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.list_proposals(round_id)?))
}

pub async fn close_round(
    State(state): State<AppState>,
    Path(round_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<RoundResponse>, ApiError> {
    let round = state.orchestrator.close_round(round_id, &claims.sub).await?;
    Ok(Json(RoundResponse::from(&round)))
}

pub async fn delete_round(
    State(state): State<AppState>,
    Path(round_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete_round(round_id, &claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
