//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
  cors::{Any, CorsLayer},
  services::{ServeDir, ServeFile},
  trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws` (one learning session per connection)
/// - read-only API under `/api/v1/...`
/// - static SPA from the configured directory with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
  let static_dir = &state.config.server.static_dir;
  let static_service = ServeDir::new(static_dir)
    .append_index_html_on_directories(true)
    .not_found_service(ServeFile::new(static_dir.join("index.html")));

  Router::new()
    .route("/ws", get(ws::ws_upgrade))
    .route("/api/v1/health", get(http::http_health))
    .route("/api/v1/curriculum", get(http::http_get_curriculum))
    .route("/api/v1/progress", get(http::http_get_progress))
    .route("/api/v1/challenge/:id", get(http::http_get_challenge))
    .with_state(state)
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .layer(
      TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
    .fallback_service(static_service)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::curriculum::fixtures;
  use crate::state::test_state;
  use axum::body::{to_bytes, Body};
  use axum::http::{Request, StatusCode};
  use serde_json::Value;
  use tower::ServiceExt;

  async fn get_json(path: &str) -> (StatusCode, Value) {
    let app = build_router(Arc::new(test_state(fixtures::small())));
    let res = app.oneshot(Request::builder().uri(path).body(Body::empty()).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), 1 << 20).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn health_reports_curriculum_and_oracle() {
    let (status, body) = get_json("/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["challenges"], 6);
    assert_eq!(body["oracleOnline"], false);
  }

  #[tokio::test]
  async fn curriculum_outline_is_served() {
    let (status, body) = get_json("/api/v1/curriculum").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "test");
    assert_eq!(body["mainTopics"][2]["subTopics"][0]["concepts"][0]["challengeId"], "d");
  }

  #[tokio::test]
  async fn progress_defaults_for_a_new_learner() {
    let (status, body) = get_json("/api/v1/progress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["level"], 1);
    assert_eq!(body["progress"]["completedConcepts"], serde_json::json!(["i1", "i2"]));
  }

  #[tokio::test]
  async fn challenge_lookup() {
    let (status, body) = get_json("/api/v1/challenge/b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Title b");
    assert_eq!(body["mainTopicId"], "m1");

    let (status, body) = get_json("/api/v1/challenge/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "challenge 'nope' not found");
  }
}
