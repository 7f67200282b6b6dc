//! Public protocol structs for the WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::curriculum::Curriculum;
use crate::domain::{Challenge, Difficulty};
use crate::progress::{PlayerProgress, PlayerStats};
use crate::session::{ChallengeView, SessionView};
use crate::visuals::VisualKind;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
  /// Ask for the current session view.
  Hello,
  Ping,
  SelectChallenge {
    #[serde(rename = "challengeId")]
    challenge_id: String,
  },
  EditSource {
    source: String,
  },
  Submit,
  Advance,
  RequestHint,
  RequestAnalysis,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
  Session { view: Box<SessionView> },
  Pong,
  Error { message: String },
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
  pub ok: bool,
  pub curriculum: String,
  pub challenges: usize,
  #[serde(rename = "oracleOnline")]
  pub oracle_online: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
  pub message: String,
}

/// Curriculum outline for navigation: no starter code, no criteria.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumOut {
  pub id: String,
  pub name: String,
  pub intro_topic: Option<String>,
  pub main_topics: Vec<MainTopicOut>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MainTopicOut {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub sub_topics: Vec<SubTopicOut>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTopicOut {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub concepts: Vec<ConceptOut>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptOut {
  pub id: String,
  pub name: String,
  pub challenge_id: String,
  pub title: String,
  pub difficulty: Difficulty,
  pub placeholder: bool,
}

#[derive(Debug, Serialize)]
pub struct ProgressOut {
  pub stats: PlayerStats,
  pub progress: PlayerProgress,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeOut {
  #[serde(flatten)]
  pub view: ChallengeView,
  pub starter_code: String,
  pub visual: Option<VisualKind>,
}

pub fn outline(curriculum: &Curriculum) -> CurriculumOut {
  CurriculumOut {
    id: curriculum.id.clone(),
    name: curriculum.name.clone(),
    intro_topic: curriculum.intro_topic_id().map(str::to_string),
    main_topics: curriculum
      .main_topics()
      .iter()
      .map(|mt| MainTopicOut {
        id: mt.id.clone(),
        name: mt.name.clone(),
        description: mt.description.clone(),
        sub_topics: mt
          .sub_topics
          .iter()
          .map(|st| SubTopicOut {
            id: st.id.clone(),
            name: st.name.clone(),
            description: st.description.clone(),
            concepts: st
              .concepts
              .iter()
              .map(|c| ConceptOut {
                id: c.id.clone(),
                name: c.name.clone(),
                challenge_id: c.challenge.id.clone(),
                title: c.challenge.title.clone(),
                difficulty: c.challenge.difficulty,
                placeholder: c.challenge.placeholder,
              })
              .collect(),
          })
          .collect(),
      })
      .collect(),
  }
}

pub fn to_out(curriculum: &Curriculum, challenge: &Challenge, progress: &PlayerProgress) -> ChallengeOut {
  ChallengeOut {
    view: ChallengeView::of(curriculum, challenge, progress),
    starter_code: challenge.starter_code.clone(),
    visual: challenge.visual,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::curriculum::fixtures;
  use serde_json::json;

  #[test]
  fn client_messages_use_type_tags() {
    let m: ClientWsMessage = serde_json::from_str(r#"{"type":"select_challenge","challengeId":"c1"}"#).unwrap();
    assert!(matches!(m, ClientWsMessage::SelectChallenge { challenge_id } if challenge_id == "c1"));
    let m: ClientWsMessage = serde_json::from_str(r#"{"type":"edit_source","source":"let x;"}"#).unwrap();
    assert!(matches!(m, ClientWsMessage::EditSource { .. }));
    assert!(serde_json::from_str::<ClientWsMessage>(r#"{"type":"new_challenge"}"#).is_err());
  }

  #[test]
  fn server_errors_serialize_flat() {
    let v = serde_json::to_value(ServerWsMessage::Error { message: "bad".into() }).unwrap();
    assert_eq!(v, json!({"type": "error", "message": "bad"}));
    assert_eq!(serde_json::to_value(ServerWsMessage::Pong).unwrap(), json!({"type": "pong"}));
  }

  #[test]
  fn outline_mirrors_the_tree() {
    let c = fixtures::small();
    let out = serde_json::to_value(outline(&c)).unwrap();
    assert_eq!(out["mainTopics"].as_array().unwrap().len(), 3);
    assert_eq!(out["mainTopics"][1]["subTopics"][0]["concepts"][1]["challengeId"], "b");
    assert_eq!(out["mainTopics"][1]["subTopics"][0]["concepts"][1]["difficulty"], 2);
    assert_eq!(out["introTopic"], "mt_intro");
  }

  #[test]
  fn challenge_out_flattens_the_view() {
    let c = fixtures::small();
    let ch = c.find_challenge("a").unwrap();
    let v = serde_json::to_value(to_out(&c, ch, &PlayerProgress::default())).unwrap();
    assert_eq!(v["id"], "a");
    assert_eq!(v["subTopicId"], "s1");
    assert_eq!(v["starterCode"], "// start a\n");
    assert_eq!(v["completed"], false);
    assert!(v.get("criteria").is_none());
  }
}
