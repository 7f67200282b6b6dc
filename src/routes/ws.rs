//! WebSocket upgrade + message loop. Each connection owns one `SessionController`;
//! every client message is applied to it and answered with the new session view.
//! Slow actions (evaluation, oracle requests) answer twice: once with the
//! in-flight phase and again when they finish.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::session::{LoadTicket, SessionController};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "conquest_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state), fields(conn = %Uuid::new_v4()))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "conquest_backend", "WebSocket connected");
  let mut session = SessionController::new(state.session_deps());

  // Pending challenge load; fires after its display delay unless replaced.
  let load_timer = sleep(Duration::ZERO);
  tokio::pin!(load_timer);
  let mut pending = schedule(session.start(), load_timer.as_mut());
  if send(&mut socket, &view_of(&session)).await.is_err() {
    return;
  }

  loop {
    tokio::select! {
      () = &mut load_timer, if pending.is_some() => {
        if let Some(ticket) = pending.take() {
          session.finish_load(ticket);
        }
        if send(&mut socket, &view_of(&session)).await.is_err() {
          break;
        }
      }
      msg = socket.recv() => {
        let reply = match msg {
          Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
            Ok(incoming) => {
              debug!(target: "session", "WS received: {:?}", &incoming);
              let (reply, follow) = apply(&mut session, incoming);
              match follow {
                Some(FollowUp::Load(ticket)) => {
                  pending = schedule(Some(ticket), load_timer.as_mut());
                  reply
                }
                Some(work) => {
                  if send(&mut socket, &reply).await.is_err() {
                    break;
                  }
                  work.run(&mut session).await;
                  view_of(&session)
                }
                None => reply,
              }
            }
            Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
          },
          Some(Ok(Message::Ping(payload))) => {
            let _ = socket.send(Message::Pong(payload)).await;
            continue;
          }
          Some(Ok(Message::Close(_))) | None => break,
          Some(Err(e)) => {
            error!(target: "conquest_backend", error = %e, "WS receive error");
            break;
          }
          Some(Ok(_)) => continue,
        };
        if send(&mut socket, &reply).await.is_err() {
          break;
        }
      }
    }
  }
  info!(
    target: "conquest_backend",
    challenge = session.active_challenge_id().unwrap_or("-"),
    xp = session.progress().current_xp,
    "WebSocket disconnected"
  );
}

fn schedule(ticket: Option<LoadTicket>, timer: std::pin::Pin<&mut tokio::time::Sleep>) -> Option<LoadTicket> {
  if let Some(t) = ticket {
    timer.reset(Instant::now() + t.delay);
  }
  ticket
}

fn view_of(session: &SessionController) -> ServerWsMessage {
  ServerWsMessage::Session { view: Box::new(session.view()) }
}

/// Work left over after a client message has been applied.
#[derive(Debug, PartialEq)]
enum FollowUp {
  Load(LoadTicket),
  Evaluate,
  Hint,
  Analysis,
}

impl FollowUp {
  async fn run(self, session: &mut SessionController) {
    match self {
      FollowUp::Load(ticket) => {
        session.load(ticket).await;
      }
      FollowUp::Evaluate => session.finish_submit().await,
      FollowUp::Hint => session.finish_hint().await,
      FollowUp::Analysis => session.finish_analysis().await,
    }
  }
}

/// Apply the immediate part of one client message. Returns the reply and
/// whatever still has to happen.
fn apply(session: &mut SessionController, msg: ClientWsMessage) -> (ServerWsMessage, Option<FollowUp>) {
  let follow = match msg {
    ClientWsMessage::Ping => return (ServerWsMessage::Pong, None),
    ClientWsMessage::Hello => None,
    ClientWsMessage::SelectChallenge { challenge_id } => session.select(&challenge_id).map(FollowUp::Load),
    ClientWsMessage::EditSource { source } => {
      session.edit(source);
      None
    }
    ClientWsMessage::Submit => session.begin_submit().then_some(FollowUp::Evaluate),
    ClientWsMessage::Advance => session.advance().map(FollowUp::Load),
    ClientWsMessage::RequestHint => session.begin_hint().then_some(FollowUp::Hint),
    ClientWsMessage::RequestAnalysis => session.begin_analysis().then_some(FollowUp::Analysis),
  };
  (view_of(session), follow)
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> Result<(), axum::Error> {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  socket.send(Message::Text(out)).await.map_err(|e| {
    error!(target: "conquest_backend", error = %e, "WS send error");
    e
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::curriculum::fixtures;
  use crate::session::Phase;
  use crate::state::test_state;

  fn session() -> SessionController {
    SessionController::new(test_state(fixtures::small()).session_deps())
  }

  fn phase_of(reply: &ServerWsMessage) -> Option<Phase> {
    match reply {
      ServerWsMessage::Session { view } => Some(view.phase),
      _ => None,
    }
  }

  #[tokio::test]
  async fn messages_drive_the_session() {
    let mut s = session();
    let t = s.start().unwrap();
    s.finish_load(t);

    let (reply, follow) = apply(&mut s, ClientWsMessage::EditSource { source: "let answer = 42;".into() });
    assert!(follow.is_none());
    assert!(matches!(reply, ServerWsMessage::Session { ref view } if view.source == "let answer = 42;"));

    let (reply, follow) = apply(&mut s, ClientWsMessage::Submit);
    assert_eq!(phase_of(&reply), Some(Phase::Evaluating));
    assert_eq!(follow, Some(FollowUp::Evaluate));
    follow.unwrap().run(&mut s).await;
    assert_eq!(s.phase(), Phase::Completed);

    let (_, follow) = apply(&mut s, ClientWsMessage::Advance);
    let Some(FollowUp::Load(ticket)) = follow else { panic!("expected a load, got {follow:?}") };
    assert!(s.finish_load(ticket));
    assert_eq!(s.active_challenge_id(), Some("b"));
  }

  #[tokio::test]
  async fn hint_requests_report_the_waiting_phase_first() {
    let mut s = session();
    let t = s.start().unwrap();
    s.finish_load(t);

    let (reply, follow) = apply(&mut s, ClientWsMessage::RequestHint);
    assert_eq!(phase_of(&reply), Some(Phase::RequestingHint));
    follow.unwrap().run(&mut s).await;
    assert_eq!(s.phase(), Phase::Ready);

    let (reply, follow) = apply(&mut s, ClientWsMessage::RequestAnalysis);
    assert_eq!(phase_of(&reply), Some(Phase::Ready));
    assert!(follow.is_none());
  }

  #[tokio::test]
  async fn ping_gets_pong_without_a_view() {
    let mut s = session();
    let (reply, follow) = apply(&mut s, ClientWsMessage::Ping);
    assert!(matches!(reply, ServerWsMessage::Pong));
    assert!(follow.is_none());
  }
}
