//! HTTP surface of lunchbox: the round orchestrator, its identity client,
//! and the axum handlers in front of them.

pub mod error;
pub mod identity;
pub mod middleware;
pub mod notifications;
pub mod orchestrator;
pub mod rounds;
pub mod state;

#[cfg(test)]
mod testing;

use axum::{
    Router,
    routing::{get, post},
};

pub use orchestrator::RoundOrchestrator;
pub use state::{AppState, AppStateInner};

/// REST routes. Everything but `/health` requires a bearer token.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/rounds", post(rounds::open_round).get(rounds::list_open_rounds))
        .route("/rounds/{round_id}", get(rounds::get_round).delete(rounds::delete_round))
        .route("/rounds/{round_id}/join", post(rounds::join_round))
        .route(
            "/rounds/{round_id}/proposals",
            post(rounds::propose).get(rounds::list_proposals),
        )
        .route("/rounds/{round_id}/close", post(rounds::close_round))
        .route("/notifications/users/{user_id}", post(notifications::announce_to_user))
        .route("/notifications/rounds/{round_id}", post(notifications::announce_to_round))
        .route("/notifications/global", post(notifications::announce_global))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(protected)
}
