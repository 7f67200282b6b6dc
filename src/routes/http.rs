//! HTTP endpoint handlers. Read-only views over the curriculum and stored progress.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument};

use crate::protocol::{outline, to_out, ErrorOut, HealthOut, ProgressOut};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut {
    ok: true,
    curriculum: state.curriculum.id.clone(),
    challenges: state.curriculum.all_challenges().count(),
    oracle_online: state.oracle.is_online(),
  })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_curriculum(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(outline(&state.curriculum))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_progress(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let progress = state.ledger.current(&state.curriculum);
  info!(target: "progress", xp = progress.current_xp, completed = progress.completed_concepts.len(), "HTTP progress served");
  Json(ProgressOut { stats: progress.stats(), progress })
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_challenge(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
  let Some(concept) = state.curriculum.find_concept(&id) else {
    info!(target: "curriculum", %id, "HTTP challenge not found");
    return (StatusCode::NOT_FOUND, Json(ErrorOut { message: format!("challenge '{id}' not found") })).into_response();
  };
  let progress = state.ledger.current(&state.curriculum);
  Json(to_out(&state.curriculum, &concept.challenge, &progress)).into_response()
}
