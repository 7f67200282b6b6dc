//! Code Conquest · JavaScript Learning Backend
//!
//! - Axum HTTP + WebSocket API; one learning session per socket
//! - Sandboxed interpreter for submitted solutions
//! - Player progress persisted as JSON under a single storage key
//! - Optional OpenAI-backed hint/analysis oracle
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000, overrides the config file)
//!   CONQUEST_CONFIG_PATH  : path to TOML config (server, storage, curriculum, session, prompts)
//!   OPENAI_API_KEY        : enables the online oracle if present
//!   OPENAI_BASE_URL       : default "https://api.openai.com/v1"
//!   OPENAI_MODEL          : default "gpt-4o-mini"
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod script;
mod criteria;
mod evaluation;
mod curriculum;
mod visuals;
mod feedback;
mod progress;
mod storage;
mod oracle;
mod session;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::config::load_app_config_from_env;
use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = load_app_config_from_env();
  let port = config.server.port;

  // Curriculum, progress store, oracle and interpreter shared by every session.
  let state = Arc::new(AppState::from_config(config)?);
  info!(
    target: "conquest_backend",
    curriculum = %state.curriculum.id,
    challenges = state.curriculum.all_challenges().count(),
    oracle_online = state.oracle.is_online(),
    "State initialized"
  );

  let app = build_router(state.clone());

  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "conquest_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "conquest_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "conquest_backend", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
}
