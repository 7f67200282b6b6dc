//! Progress engine: the unlock/completion state machine over a curriculum.
//!
//! `PlayerProgress` is a value. Transitions take `&self` and hand back a new
//! snapshot, so a reader holding the old one never sees a half-applied change.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::curriculum::{Curriculum, Position};
use crate::domain::{CriteriaResult, MainTopic, SubTopic};
use crate::feedback::FeedbackKind;

pub const XP_PER_LEVEL: u32 = 100;

pub const PATH_COMPLETE: &str =
  "All known trials on this path are complete, or perhaps the stars align for a greater revelation soon!";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressError {
  #[error("challenge '{0}' is not part of this curriculum")]
  UnknownChallenge(String),
  #[error("challenge '{0}' is behind a sealed topic")]
  Locked(String),
  #[error("challenge '{0}' is a placeholder and cannot be completed")]
  Placeholder(String),
  #[error("challenge '{0}' was not passed")]
  NotPassed(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Snapshot", into = "Snapshot")]
pub struct PlayerProgress {
  pub completed_concepts: BTreeSet<String>,
  pub current_xp: u32,
  pub unlocked_main_topics: BTreeSet<String>,
  pub unlocked_sub_topics: BTreeSet<String>,
  pub last_submitted_code: BTreeMap<String, String>,
  pub last_successful_evaluation_value: BTreeMap<String, Json>,
}

/// Persisted shape: sets as id arrays, maps as `[key, value]` pairs.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Snapshot {
  completed_concepts: Vec<String>,
  current_xp: u32,
  unlocked_main_topics: Vec<String>,
  unlocked_sub_topics: Vec<String>,
  last_submitted_code: Vec<(String, String)>,
  last_successful_evaluation_value: Vec<(String, Json)>,
}

impl Default for Snapshot {
  fn default() -> Self {
    PlayerProgress::default().into()
  }
}

impl From<Snapshot> for PlayerProgress {
  fn from(s: Snapshot) -> Self {
    Self {
      completed_concepts: s.completed_concepts.into_iter().collect(),
      current_xp: s.current_xp,
      unlocked_main_topics: s.unlocked_main_topics.into_iter().collect(),
      unlocked_sub_topics: s.unlocked_sub_topics.into_iter().collect(),
      last_submitted_code: s.last_submitted_code.into_iter().collect(),
      last_successful_evaluation_value: s.last_successful_evaluation_value.into_iter().collect(),
    }
  }
}

impl From<PlayerProgress> for Snapshot {
  fn from(p: PlayerProgress) -> Self {
    Self {
      completed_concepts: p.completed_concepts.into_iter().collect(),
      current_xp: p.current_xp,
      unlocked_main_topics: p.unlocked_main_topics.into_iter().collect(),
      unlocked_sub_topics: p.unlocked_sub_topics.into_iter().collect(),
      last_submitted_code: p.last_submitted_code.into_iter().collect(),
      last_successful_evaluation_value: p.last_successful_evaluation_value.into_iter().collect(),
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
  pub text: String,
  pub kind: FeedbackKind,
}

/// Outcome of a completion transition.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
  pub target: Option<String>,
  pub notices: Vec<Notice>,
  pub xp_awarded: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
  pub xp: u32,
  pub level: u32,
  pub xp_into_level: u32,
  pub xp_per_level: u32,
  pub concepts_mastered: usize,
  pub topics_unlocked: usize,
}

/// What follows a concept in curriculum order.
enum Successor {
  Concept(Position),
  SubTopic(Position),
  MainTopic { main: usize, first: Option<Position> },
  End,
}

fn successor(curriculum: &Curriculum, pos: Position) -> Successor {
  let mains = curriculum.main_topics();
  let Some(mt) = mains.get(pos.main) else { return Successor::End };
  let Some(st) = mt.sub_topics.get(pos.sub) else { return Successor::End };
  if pos.concept + 1 < st.concepts.len() {
    return Successor::Concept(Position { concept: pos.concept + 1, ..pos });
  }
  if pos.sub + 1 < mt.sub_topics.len() {
    return Successor::SubTopic(Position { main: pos.main, sub: pos.sub + 1, concept: 0 });
  }
  match mains.get(pos.main + 1) {
    Some(next) => Successor::MainTopic {
      main: pos.main + 1,
      first: next
        .sub_topics
        .first()
        .filter(|st| !st.concepts.is_empty())
        .map(|_| Position { main: pos.main + 1, sub: 0, concept: 0 }),
    },
    None => Successor::End,
  }
}

fn challenge_id_at(curriculum: &Curriculum, pos: Position) -> Option<String> {
  curriculum.concept_at(pos).map(|c| c.challenge.id.clone())
}

/// The challenge that follows `challenge_id`: structural order first, then the
/// challenge's own `next_challenge_id`.
pub fn next_target(curriculum: &Curriculum, challenge_id: &str) -> Option<String> {
  let pos = curriculum.position(challenge_id)?;
  let structural = match successor(curriculum, pos) {
    Successor::Concept(p) | Successor::SubTopic(p) => challenge_id_at(curriculum, p),
    Successor::MainTopic { first, .. } => first.and_then(|p| challenge_id_at(curriculum, p)),
    Successor::End => None,
  };
  structural.or_else(|| curriculum.find_challenge(challenge_id)?.next_challenge_id.clone())
}

impl PlayerProgress {
  /// Fresh learner: the intro topic is open and every intro concept counts as read.
  pub fn default_for(curriculum: &Curriculum) -> Self {
    let mut p = Self::default();
    let Some(intro) = curriculum.intro_topic_id() else { return p };
    let Some(mt) = curriculum.main_topics().iter().find(|mt| mt.id == intro) else { return p };
    p.unlocked_main_topics.insert(mt.id.clone());
    for st in &mt.sub_topics {
      p.unlocked_sub_topics.insert(st.id.clone());
      for c in &st.concepts {
        let id = c.challenge.id.clone();
        p.completed_concepts.insert(id.clone());
        p.last_submitted_code.insert(id.clone(), c.challenge.starter_code.clone());
        p.last_successful_evaluation_value.insert(id, Json::Bool(true));
      }
    }
    p
  }

  pub fn is_completed(&self, challenge_id: &str) -> bool {
    self.completed_concepts.contains(challenge_id)
  }

  fn is_open(&self, mt: &MainTopic, st: &SubTopic) -> bool {
    self.unlocked_main_topics.contains(&mt.id) && self.unlocked_sub_topics.contains(&st.id)
  }

  /// Both ancestors of `challenge_id` are unlocked.
  pub fn is_reachable(&self, curriculum: &Curriculum, challenge_id: &str) -> bool {
    match (curriculum.parent_main_topic(challenge_id), curriculum.parent_sub_topic(challenge_id)) {
      (Some(mt), Some(st)) => self.is_open(mt, st),
      _ => false,
    }
  }

  /// Fold in another snapshot of the same learner. Sets union, XP takes the
  /// larger total, and recorded code or values already present here are kept.
  pub fn absorb(&mut self, other: &PlayerProgress) {
    self.completed_concepts.extend(other.completed_concepts.iter().cloned());
    self.unlocked_main_topics.extend(other.unlocked_main_topics.iter().cloned());
    self.unlocked_sub_topics.extend(other.unlocked_sub_topics.iter().cloned());
    self.current_xp = self.current_xp.max(other.current_xp);
    for (id, code) in &other.last_submitted_code {
      self.last_submitted_code.entry(id.clone()).or_insert_with(|| code.clone());
    }
    for (id, value) in &other.last_successful_evaluation_value {
      self.last_successful_evaluation_value.entry(id.clone()).or_insert_with(|| value.clone());
    }
  }

  pub fn stats(&self) -> PlayerStats {
    PlayerStats {
      xp: self.current_xp,
      level: self.current_xp / XP_PER_LEVEL + 1,
      xp_into_level: self.current_xp % XP_PER_LEVEL,
      xp_per_level: XP_PER_LEVEL,
      concepts_mastered: self.completed_concepts.len(),
      topics_unlocked: self.unlocked_main_topics.len() + self.unlocked_sub_topics.len(),
    }
  }

  /// Pick the challenge to show on a cold start, unlocking topics when nothing
  /// open is left to do.
  #[instrument(level = "debug", target = "progress", skip_all)]
  pub fn initial_focus(&self, curriculum: &Curriculum) -> (PlayerProgress, Option<String>) {
    for mt in curriculum.main_topics() {
      for st in mt.sub_topics.iter().filter(|st| self.is_open(mt, st)) {
        let open = |c: &&crate::domain::Concept| !self.is_completed(&c.challenge.id);
        let pick = st
          .concepts
          .iter()
          .filter(open)
          .find(|c| !c.challenge.placeholder)
          .or_else(|| st.concepts.iter().find(open));
        if let Some(c) = pick {
          debug!(target: "progress", focus = %c.challenge.id, "focus on open challenge");
          return (self.clone(), Some(c.challenge.id.clone()));
        }
      }
    }

    let mut next = self.clone();
    let intro = curriculum.intro_topic_id();
    for mt in curriculum.main_topics().iter().filter(|mt| Some(mt.id.as_str()) != intro) {
      next.unlocked_main_topics.insert(mt.id.clone());
      for st in &mt.sub_topics {
        next.unlocked_sub_topics.insert(st.id.clone());
        let pick = st.concepts.iter().find(|c| !c.challenge.placeholder).or_else(|| st.concepts.first());
        if let Some(c) = pick {
          info!(target: "progress", focus = %c.challenge.id, main_topic = %mt.id, "unlocked next topic for focus");
          return (next, Some(c.challenge.id.clone()));
        }
      }
    }

    let first = curriculum
      .main_topics()
      .first()
      .and_then(|mt| mt.sub_topics.first().map(|st| (mt, st)))
      .and_then(|(mt, st)| st.concepts.first().map(|c| (mt, st, c)));
    match first {
      Some((mt, st, c)) => {
        next.unlocked_main_topics.insert(mt.id.clone());
        next.unlocked_sub_topics.insert(st.id.clone());
        (next, Some(c.challenge.id.clone()))
      }
      None => (next, None),
    }
  }

  /// Where to go when a requested challenge does not exist: the first open,
  /// non-intro subtopic's first incomplete concept (or its first concept).
  pub fn recovery_target(&self, curriculum: &Curriculum) -> Option<String> {
    let intro = curriculum.intro_topic_id();
    let mt = curriculum
      .main_topics()
      .iter()
      .find(|mt| Some(mt.id.as_str()) != intro && self.unlocked_main_topics.contains(&mt.id))?;
    let st = mt.sub_topics.iter().find(|st| self.unlocked_sub_topics.contains(&st.id))?;
    st.concepts
      .iter()
      .find(|c| !self.is_completed(&c.challenge.id))
      .or_else(|| st.concepts.first())
      .map(|c| c.challenge.id.clone())
  }

  /// Record a passing verdict for `challenge_id` and unlock what comes next.
  ///
  /// XP is awarded only the first time a challenge is completed.
  #[instrument(level = "info", target = "progress", skip(self, curriculum, verdict, submitted), fields(xp = self.current_xp))]
  pub fn complete(
    &self,
    curriculum: &Curriculum,
    challenge_id: &str,
    verdict: &CriteriaResult,
    submitted: &str,
  ) -> Result<(PlayerProgress, Completion), ProgressError> {
    let unknown = || ProgressError::UnknownChallenge(challenge_id.to_string());
    let pos = curriculum.position(challenge_id).ok_or_else(unknown)?;
    let mt = curriculum.main_topics().get(pos.main).ok_or_else(unknown)?;
    let st = mt.sub_topics.get(pos.sub).ok_or_else(unknown)?;
    let challenge = &st.concepts.get(pos.concept).ok_or_else(unknown)?.challenge;

    if challenge.placeholder {
      return Err(ProgressError::Placeholder(challenge_id.to_string()));
    }
    if !verdict.passed {
      return Err(ProgressError::NotPassed(challenge_id.to_string()));
    }
    if !self.is_open(mt, st) {
      return Err(ProgressError::Locked(challenge_id.to_string()));
    }

    let mut next = self.clone();
    let xp_awarded = if next.completed_concepts.insert(challenge_id.to_string()) { challenge.difficulty.xp() } else { 0 };
    next.current_xp = next.current_xp.saturating_add(xp_awarded);
    let code = verdict.updated_player_code.clone().unwrap_or_else(|| submitted.to_string());
    next.last_submitted_code.insert(challenge_id.to_string(), code);
    if let Some(value) = &verdict.evaluated_value {
      next.last_successful_evaluation_value.insert(challenge_id.to_string(), value.clone());
    }

    let mut notices = Vec::new();
    let structural = match successor(curriculum, pos) {
      Successor::Concept(p) => challenge_id_at(curriculum, p),
      Successor::SubTopic(p) => {
        let sub = &mt.sub_topics[p.sub];
        if next.unlocked_sub_topics.insert(sub.id.clone()) {
          notices.push(Notice {
            text: format!("A new path unfolds: \"{}\" is now accessible!", sub.name),
            kind: FeedbackKind::Info,
          });
        }
        challenge_id_at(curriculum, p)
      }
      Successor::MainTopic { main, first } => {
        let next_mt = &curriculum.main_topics()[main];
        if next.unlocked_main_topics.insert(next_mt.id.clone()) {
          notices.push(Notice {
            text: format!("A new domain of knowledge awaits: \"{}\" has been revealed!", next_mt.name),
            kind: FeedbackKind::Success,
          });
        }
        if let Some(first_st) = next_mt.sub_topics.first() {
          next.unlocked_sub_topics.insert(first_st.id.clone());
        }
        first.and_then(|p| challenge_id_at(curriculum, p))
      }
      Successor::End => None,
    };

    let target = structural.or_else(|| challenge.next_challenge_id.clone());
    if target.is_none() {
      notices.push(Notice { text: PATH_COMPLETE.to_string(), kind: FeedbackKind::Info });
    }

    info!(
      target: "progress",
      challenge = %challenge_id,
      xp_awarded,
      total_xp = next.current_xp,
      next = target.as_deref().unwrap_or("-"),
      "challenge completed"
    );
    Ok((next, Completion { target, notices, xp_awarded }))
  }
}
