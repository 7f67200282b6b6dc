//! Core domain types: the curriculum tree and evaluation verdicts.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::criteria::SolutionCriteria;
use crate::visuals::VisualKind;

/// Difficulty tier. Ordinal, 1 through 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Difficulty {
  Novice = 1,
  Adept = 2,
  Master = 3,
}

impl Difficulty {
  /// XP granted the first time a challenge of this tier is passed.
  pub fn xp(self) -> u32 {
    u32::from(u8::from(self)) * 10
  }
}

impl From<Difficulty> for u8 {
  fn from(d: Difficulty) -> u8 {
    d as u8
  }
}

impl TryFrom<u8> for Difficulty {
  type Error = String;
  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      1 => Ok(Difficulty::Novice),
      2 => Ok(Difficulty::Adept),
      3 => Ok(Difficulty::Master),
      other => Err(format!("difficulty must be 1, 2 or 3 (got {other})")),
    }
  }
}

/// One executable exercise. Immutable once the curriculum is loaded.
#[derive(Clone)]
pub struct Challenge {
  pub id: String,
  pub title: String,
  pub description: String,
  pub difficulty: Difficulty,
  pub starter_code: String,
  pub hint: Option<String>,
  pub explanation: Option<String>,
  pub visual: Option<VisualKind>,
  /// Fallback link, used only when structural order yields nothing.
  pub next_challenge_id: Option<String>,
  pub placeholder: bool,
  pub criteria: Arc<dyn SolutionCriteria>,
}

impl fmt::Debug for Challenge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Challenge")
      .field("id", &self.id)
      .field("title", &self.title)
      .field("difficulty", &self.difficulty)
      .field("placeholder", &self.placeholder)
      .field("criteria", &self.criteria)
      .finish_non_exhaustive()
  }
}

#[derive(Clone, Debug)]
pub struct Concept {
  pub id: String,
  pub name: String,
  pub challenge: Challenge,
}

#[derive(Clone, Debug)]
pub struct SubTopic {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub concepts: Vec<Concept>,
}

#[derive(Clone, Debug)]
pub struct MainTopic {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub sub_topics: Vec<SubTopic>,
}

/// Verdict of one solution check.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaResult {
  pub passed: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  /// Source to record instead of the raw submission.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub updated_player_code: Option<String>,
  /// Value kept for replaying visual feedback without re-running code.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub evaluated_value: Option<serde_json::Value>,
}

impl CriteriaResult {
  pub fn pass(message: impl Into<String>) -> Self {
    Self { passed: true, message: Some(message.into()), ..Default::default() }
  }

  pub fn fail(message: impl Into<String>) -> Self {
    Self { passed: false, message: Some(message.into()), ..Default::default() }
  }

  pub fn with_value(mut self, value: serde_json::Value) -> Self {
    self.evaluated_value = Some(value);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn xp_scales_with_tier() {
    assert_eq!(Difficulty::Novice.xp(), 10);
    assert_eq!(Difficulty::Adept.xp(), 20);
    assert_eq!(Difficulty::Master.xp(), 30);
  }

  #[test]
  fn difficulty_deserializes_from_integers_only_in_range() {
    let d: Difficulty = serde_json::from_str("3").unwrap();
    assert_eq!(d, Difficulty::Master);
    assert!(serde_json::from_str::<Difficulty>("4").is_err());
    assert_eq!(serde_json::to_string(&Difficulty::Adept).unwrap(), "2");
  }
}
