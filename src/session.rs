//! Session controller: one learner's interaction state machine.
//!
//! Every user action is a method on `SessionController`. The controller keeps
//! a `PlayerProgress` snapshot for display; every change goes through the
//! shared `ProgressLedger`, which applies it to the latest stored record and
//! persists it before returning. Errors never escape; they end up in the
//! feedback list.
//!
//! Loading a challenge is split in two: `begin_load` hands out a `LoadTicket`
//! and `finish_load` applies it after the display delay. Only the newest ticket
//! takes effect.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::{Handle, RuntimeFlavor};
use serde_json::Value as Json;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::curriculum::Curriculum;
use crate::domain::{Challenge, Difficulty};
use crate::evaluation::Evaluator;
use crate::feedback::{FeedbackKind, Message, MessageLog};
use crate::oracle::HintOracle;
use crate::progress::{next_target, PlayerProgress, PlayerStats};
use crate::script::ScriptRuntime;
use crate::storage::ProgressLedger;
use crate::visuals::{Scene, SceneInput};

const EMPTY_LIBRARY: &str = "The library of wisdom is empty or no path is chosen.";
const NO_CHALLENGES: &str = "No further challenges found on the current path.";
const STUB_SUBMIT: &str = "This challenge's full magic is still being woven by the scribes. Please try another.";
const ALREADY_MASTERED: &str = "This trial is already mastered; its scroll is sealed for reading only.";
const CASTING: &str = "Thy spell is cast upon the winds...";
const VICTORY: &str = "Victory! Thy challenge is overcome!";
const FIZZLE: &str = "Thy spell fizzles... The path remains obscured. Try again!";
const MISSING_NEXT: &str = "The next scroll seems to be missing from the archives!";
const END_OF_PATH: &str = "Thou art at the end of this path, or the next is yet to be revealed. Choose another from the scrolls!";
const HINT_PENDING: &str = "The Oracle whispers... seeking ancient wisdom for thee...";
const NO_GUIDANCE: &str = "The Oracle finds no guidance for this trial at present.";
const ANALYSIS_PENDING: &str = "The Oracle peers into the weave of thy failed spell...";
const TOO_LONG: &str = "This spell is too vast for the weave to hold. Shorten it and cast again.";
const NO_ANALYSIS: &str = "The patterns of thy spell are too complex or faint for the Oracle to analyze now.";

/// Largest source, in bytes, the session will evaluate.
const MAX_SOURCE_LEN: usize = 32 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Loading,
  Ready,
  /// The active challenge was just mastered and a next target exists.
  Completed,
  Evaluating,
  RequestingHint,
  RequestingAnalysis,
}

impl Phase {
  fn is_busy(self) -> bool {
    matches!(self, Phase::Loading | Phase::Evaluating | Phase::RequestingHint | Phase::RequestingAnalysis)
  }
}

/// Collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
  pub curriculum: Arc<Curriculum>,
  pub ledger: Arc<ProgressLedger>,
  pub oracle: Arc<dyn HintOracle>,
  pub runtime: Arc<dyn ScriptRuntime>,
  pub settings: SessionConfig,
}

/// A pending challenge load. Stale tickets are ignored by `finish_load`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
  pub generation: u64,
  pub delay: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
  pub id: String,
  pub title: String,
  pub description: String,
  pub difficulty: Difficulty,
  pub main_topic_id: Option<String>,
  pub sub_topic_id: Option<String>,
  pub placeholder: bool,
  pub completed: bool,
  pub has_hint: bool,
  /// Revealed once the challenge is mastered.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub explanation: Option<String>,
}

impl ChallengeView {
  pub fn of(curriculum: &Curriculum, challenge: &Challenge, progress: &PlayerProgress) -> Self {
    let completed = progress.is_completed(&challenge.id);
    Self {
      id: challenge.id.clone(),
      title: challenge.title.clone(),
      description: challenge.description.clone(),
      difficulty: challenge.difficulty,
      main_topic_id: curriculum.parent_main_topic(&challenge.id).map(|m| m.id.clone()),
      sub_topic_id: curriculum.parent_sub_topic(&challenge.id).map(|s| s.id.clone()),
      placeholder: challenge.placeholder,
      completed,
      has_hint: challenge.hint.is_some(),
      explanation: if completed { challenge.explanation.clone() } else { None },
    }
  }
}

/// Everything a client needs to render the session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
  pub phase: Phase,
  pub challenge: Option<ChallengeView>,
  pub source: String,
  pub read_only: bool,
  pub feedback: Vec<Message>,
  pub console: Vec<Message>,
  pub stats: PlayerStats,
  pub scene: Option<Scene>,
  pub last_evaluation_passed: Option<bool>,
  pub can_submit: bool,
  pub can_request_hint: bool,
  pub can_request_analysis: bool,
  pub can_advance: bool,
  pub unlocked_main_topics: Vec<String>,
  pub unlocked_sub_topics: Vec<String>,
  pub completed_concepts: Vec<String>,
}

pub struct SessionController {
  curriculum: Arc<Curriculum>,
  ledger: Arc<ProgressLedger>,
  oracle: Arc<dyn HintOracle>,
  evaluator: Evaluator,
  load_delay: Duration,
  submit_delay: Duration,

  progress: PlayerProgress,
  phase: Phase,
  active: Option<String>,
  source: String,
  read_only: bool,
  log: MessageLog,
  last_passed: Option<bool>,
  last_message: Option<String>,
  last_value: Option<Json>,
  show_analysis: bool,
  load_generation: u64,
  /// Phase to return to once an oracle request finishes.
  resume: Phase,
}

impl SessionController {
  /// Restore progress from the store and pick the first challenge to show.
  #[instrument(level = "info", target = "session", skip_all)]
  pub fn new(deps: SessionDeps) -> Self {
    let curriculum = Arc::clone(&deps.curriculum);
    let (progress, focus) = deps.ledger.update(&curriculum, None, |stored| stored.initial_focus(&curriculum));
    info!(target: "session", focus = focus.as_deref().unwrap_or("-"), xp = progress.current_xp, "session created");
    Self {
      evaluator: Evaluator::new(deps.runtime),
      curriculum: deps.curriculum,
      ledger: deps.ledger,
      oracle: deps.oracle,
      load_delay: Duration::from_millis(deps.settings.load_delay_ms),
      submit_delay: Duration::from_millis(deps.settings.submit_delay_ms),
      progress,
      phase: Phase::Loading,
      active: focus,
      source: String::new(),
      read_only: false,
      log: MessageLog::default(),
      last_passed: None,
      last_message: None,
      last_value: None,
      show_analysis: false,
      load_generation: 0,
      resume: Phase::Ready,
    }
  }

  pub fn progress(&self) -> &PlayerProgress {
    &self.progress
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn active_challenge_id(&self) -> Option<&str> {
    self.active.as_deref()
  }

  /// Load whatever challenge the session was created on.
  pub fn start(&mut self) -> Option<LoadTicket> {
    self.begin_load()
  }

  /// Resolve the active challenge and schedule it for display. Unknown ids
  /// are redirected to the first open challenge.
  #[instrument(level = "debug", target = "session", skip(self), fields(active = ?self.active))]
  pub fn begin_load(&mut self) -> Option<LoadTicket> {
    self.progress = self.ledger.refreshed(&self.progress);
    let Some(id) = self.active.clone() else {
      self.log.push_feedback(EMPTY_LIBRARY, FeedbackKind::Error);
      self.phase = Phase::Ready;
      return None;
    };

    if self.curriculum.find_challenge(&id).is_none() {
      match self.progress.recovery_target(&self.curriculum) {
        Some(target) => {
          warn!(target: "session", requested = %id, %target, "unknown challenge; recovering");
          self.active = Some(target);
        }
        None => {
          warn!(target: "session", requested = %id, "unknown challenge and nothing to recover to");
          self.log.push_feedback(NO_CHALLENGES, FeedbackKind::Error);
          self.active = None;
          self.phase = Phase::Ready;
          return None;
        }
      }
    }

    self.load_generation += 1;
    self.phase = Phase::Loading;
    Some(LoadTicket { generation: self.load_generation, delay: self.load_delay })
  }

  /// Apply a load ticket. Returns false when a newer load superseded it.
  #[instrument(level = "debug", target = "session", skip(self))]
  pub fn finish_load(&mut self, ticket: LoadTicket) -> bool {
    if ticket.generation != self.load_generation {
      debug!(target: "session", current = self.load_generation, "stale load ignored");
      return false;
    }
    let curriculum = Arc::clone(&self.curriculum);
    let Some(challenge) = self.active.as_deref().and_then(|id| curriculum.find_challenge(id)) else {
      self.phase = Phase::Ready;
      return false;
    };

    let completed = self.progress.is_completed(&challenge.id);
    self.log.clear_console();
    if completed {
      let mastered = format!("This trial, \"{}\", has been mastered.", challenge.title);
      self.source = self
        .progress
        .last_submitted_code
        .get(&challenge.id)
        .cloned()
        .unwrap_or_else(|| challenge.starter_code.clone());
      self.log.reset_feedback(format!("Challenge: {}. (Status: Mastered)", challenge.title), FeedbackKind::Info);
      self.log.push_console(mastered.clone(), FeedbackKind::Success);
      self.last_passed = Some(true);
      self.last_message = Some(mastered);
      self.last_value = self.progress.last_successful_evaluation_value.get(&challenge.id).cloned();
      self.show_analysis = false;
    } else {
      self.source = challenge.starter_code.clone();
      self.log.reset_feedback(format!("Challenge: {}. {}", challenge.title, challenge.description), FeedbackKind::Info);
      self.last_passed = None;
      self.last_message = None;
      self.last_value = None;
    }
    self.read_only = completed;
    self.phase = Phase::Ready;
    info!(target: "session", id = %challenge.id, completed, "challenge loaded");
    true
  }

  /// Wait out the display delay, then apply the ticket.
  pub async fn load(&mut self, ticket: LoadTicket) -> bool {
    tokio::time::sleep(ticket.delay).await;
    self.finish_load(ticket)
  }

  /// Switch to another challenge if its topics are open.
  #[instrument(level = "info", target = "session", skip(self))]
  pub fn select(&mut self, challenge_id: &str) -> Option<LoadTicket> {
    self.progress = self.ledger.refreshed(&self.progress);
    let curriculum = Arc::clone(&self.curriculum);
    let parents = (curriculum.parent_main_topic(challenge_id), curriculum.parent_sub_topic(challenge_id));
    if let (Some(_), Some(st)) = parents {
      if !self.progress.is_reachable(&curriculum, challenge_id) {
        info!(target: "session", %challenge_id, "selection refused: sealed");
        self.log.push_feedback(
          format!("The path to \"{}\" is currently sealed. Complete prior scrolls to unlock it.", st.name),
          FeedbackKind::Error,
        );
        return None;
      }
    }
    self.active = Some(challenge_id.to_string());
    self.show_analysis = false;
    self.begin_load()
  }

  pub fn edit(&mut self, source: String) {
    if self.read_only {
      debug!(target: "session", "edit ignored on mastered challenge");
      return;
    }
    self.source = source;
    self.show_analysis = false;
  }

  /// Evaluate the current source against the active challenge.
  pub async fn submit(&mut self) {
    if self.begin_submit() {
      self.finish_submit().await;
    }
  }

  /// Validate a submission and enter `Evaluating`. Returns false when the
  /// submission was refused.
  #[instrument(level = "info", target = "session", skip(self), fields(active = ?self.active, source_len = self.source.len()))]
  pub fn begin_submit(&mut self) -> bool {
    let Some(challenge) = self.active.as_deref().and_then(|id| self.curriculum.find_challenge(id)) else {
      return false;
    };
    if self.phase.is_busy() {
      debug!(target: "session", phase = ?self.phase, "submit refused while busy");
      return false;
    }
    if challenge.placeholder {
      self.log.push_feedback(STUB_SUBMIT, FeedbackKind::Info);
      return false;
    }
    if self.read_only {
      self.log.push_feedback(ALREADY_MASTERED, FeedbackKind::Info);
      return false;
    }
    if self.source.len() > MAX_SOURCE_LEN {
      info!(target: "session", source_len = self.source.len(), "submission refused: too long");
      self.log.push_feedback(TOO_LONG, FeedbackKind::Error);
      return false;
    }

    self.phase = Phase::Evaluating;
    self.show_analysis = false;
    self.log.clear_console();
    self.log.clear_feedback();
    self.log.push_console(CASTING, FeedbackKind::Info);
    true
  }

  /// Run the evaluation started by `begin_submit` and record the outcome.
  #[instrument(level = "info", target = "session", skip(self), fields(active = ?self.active))]
  pub async fn finish_submit(&mut self) {
    if self.phase != Phase::Evaluating {
      return;
    }
    let curriculum = Arc::clone(&self.curriculum);
    let Some(challenge) = self.active.as_deref().and_then(|id| curriculum.find_challenge(id)) else {
      self.phase = Phase::Ready;
      return;
    };
    tokio::time::sleep(self.submit_delay).await;

    let source = self.source.clone();
    let evaluator = &self.evaluator;
    let evaluation = off_the_reactor(|| evaluator.evaluate(challenge, &source));
    for line in evaluation.output {
      self.log.push_console(line, FeedbackKind::Info);
    }
    if let Some(fault) = &evaluation.fault {
      self.log.push_console(fault.clone(), FeedbackKind::Error);
    }

    let verdict = evaluation.result;
    if verdict.passed {
      self.log.push_feedback(verdict.message.clone().unwrap_or_else(|| VICTORY.into()), FeedbackKind::Success);
      let mut has_target = false;
      let (next, outcome) = self.ledger.update(&curriculum, Some(&self.progress), |latest| {
        match latest.complete(&curriculum, &challenge.id, &verdict, &source) {
          Ok((next, completion)) => (next, Ok(completion)),
          Err(e) => (latest.clone(), Err(e)),
        }
      });
      self.progress = next;
      match outcome {
        Ok(completion) => {
          for notice in completion.notices {
            self.log.push_feedback(notice.text, notice.kind);
          }
          has_target = completion.target.is_some();
        }
        Err(e) => {
          warn!(target: "session", id = %challenge.id, error = %e, "passing verdict not recorded");
          self.log.push_feedback(format!("The scribes could not record this victory: {e}"), FeedbackKind::Info);
        }
      }
      if let Some(code) = verdict.updated_player_code {
        self.source = code;
      }
      self.last_passed = Some(true);
      self.last_message = verdict.message;
      self.last_value = verdict.evaluated_value;
      self.read_only = self.progress.is_completed(&challenge.id);
      self.phase = if has_target { Phase::Completed } else { Phase::Ready };
    } else {
      self.log.push_feedback(verdict.message.clone().unwrap_or_else(|| FIZZLE.into()), FeedbackKind::Error);
      self.last_passed = Some(false);
      self.last_message = verdict.message;
      self.last_value = None;
      self.show_analysis = true;
      self.phase = Phase::Ready;
    }
  }

  /// Move on after a success.
  #[instrument(level = "info", target = "session", skip(self), fields(active = ?self.active))]
  pub fn advance(&mut self) -> Option<LoadTicket> {
    if self.phase != Phase::Completed {
      debug!(target: "session", phase = ?self.phase, "advance ignored");
      return None;
    }
    let target = self.active.as_deref().and_then(|id| next_target(&self.curriculum, id));
    match target {
      Some(id) if self.curriculum.find_challenge(&id).is_some() => {
        self.active = Some(id);
        self.show_analysis = false;
        self.begin_load()
      }
      Some(id) => {
        warn!(target: "session", %id, "next challenge does not exist");
        self.log.push_feedback(MISSING_NEXT, FeedbackKind::Error);
        self.phase = Phase::Ready;
        None
      }
      None => {
        self.log.push_feedback(END_OF_PATH, FeedbackKind::Info);
        self.phase = Phase::Ready;
        None
      }
    }
  }

  fn can_consult(&self) -> bool {
    !self.phase.is_busy()
      && self.active.as_deref().and_then(|id| self.curriculum.find_challenge(id)).is_some_and(|c| !c.placeholder)
  }

  fn can_analyze(&self) -> bool {
    self.can_consult() && self.show_analysis && self.last_passed == Some(false) && self.last_message.is_some()
  }

  pub async fn request_hint(&mut self) {
    if self.begin_hint() {
      self.finish_hint().await;
    }
  }

  /// Enter `RequestingHint`. Returns false when no hint can be asked for now.
  #[instrument(level = "info", target = "session", skip(self), fields(active = ?self.active))]
  pub fn begin_hint(&mut self) -> bool {
    if !self.can_consult() {
      debug!(target: "session", phase = ?self.phase, "hint refused");
      return false;
    }
    self.resume = self.phase;
    self.phase = Phase::RequestingHint;
    self.log.push_feedback(HINT_PENDING, FeedbackKind::Info);
    true
  }

  pub async fn finish_hint(&mut self) {
    if self.phase != Phase::RequestingHint {
      return;
    }
    let curriculum = Arc::clone(&self.curriculum);
    let Some(challenge) = self.active.as_deref().and_then(|id| curriculum.find_challenge(id)) else {
      self.phase = self.resume;
      return;
    };
    let hint = self
      .oracle
      .request_hint(&challenge.title, &challenge.description, &self.source, challenge.hint.as_deref())
      .await;
    match (hint, &challenge.hint) {
      (Some(text), _) => self.log.push_feedback(format!("Oracle's Counsel: {text}"), FeedbackKind::Hint),
      (None, Some(fallback)) => {
        self.log.push_feedback(format!("From an ancient scroll (Hint): {fallback}"), FeedbackKind::Hint)
      }
      (None, None) => self.log.push_feedback(NO_GUIDANCE, FeedbackKind::Info),
    }
    self.phase = self.resume;
  }

  pub async fn request_analysis(&mut self) {
    if self.begin_analysis() {
      self.finish_analysis().await;
    }
  }

  /// Enter `RequestingAnalysis`. Only offered while the last failure is current.
  #[instrument(level = "info", target = "session", skip(self), fields(active = ?self.active))]
  pub fn begin_analysis(&mut self) -> bool {
    if !self.can_analyze() {
      debug!(target: "session", phase = ?self.phase, "analysis refused");
      return false;
    }
    self.resume = self.phase;
    self.phase = Phase::RequestingAnalysis;
    self.log.push_feedback(ANALYSIS_PENDING, FeedbackKind::Info);
    true
  }

  pub async fn finish_analysis(&mut self) {
    if self.phase != Phase::RequestingAnalysis {
      return;
    }
    let curriculum = Arc::clone(&self.curriculum);
    let Some(challenge) = self.active.as_deref().and_then(|id| curriculum.find_challenge(id)) else {
      self.phase = self.resume;
      return;
    };
    let failure = self.last_message.clone().unwrap_or_default();
    let analysis = self.oracle.request_analysis(&challenge.title, &challenge.description, &self.source, &failure).await;
    match analysis {
      Some(text) => self.log.push_feedback(format!("Oracle's Scrutiny: {text}"), FeedbackKind::Analysis),
      None => self.log.push_feedback(NO_ANALYSIS, FeedbackKind::Info),
    }
    self.phase = self.resume;
  }

  pub fn view(&self) -> SessionView {
    let challenge = self.active.as_deref().and_then(|id| self.curriculum.find_challenge(id));
    let scene = challenge.and_then(|c| c.visual).map(|kind| {
      kind.scene(SceneInput {
        passed: self.last_passed,
        message: self.last_message.as_deref(),
        value: self.last_value.as_ref(),
      })
    });
    let idle = !self.phase.is_busy();
    SessionView {
      phase: self.phase,
      challenge: challenge.map(|c| ChallengeView::of(&self.curriculum, c, &self.progress)),
      source: self.source.clone(),
      read_only: self.read_only,
      feedback: self.log.feedback().cloned().collect(),
      console: self.log.console().cloned().collect(),
      stats: self.progress.stats(),
      scene,
      last_evaluation_passed: self.last_passed,
      can_submit: idle && !self.read_only && challenge.is_some_and(|c| !c.placeholder),
      can_request_hint: self.can_consult(),
      can_request_analysis: self.can_analyze(),
      can_advance: self.phase == Phase::Completed,
      unlocked_main_topics: self.progress.unlocked_main_topics.iter().cloned().collect(),
      unlocked_sub_topics: self.progress.unlocked_sub_topics.iter().cloned().collect(),
      completed_concepts: self.progress.completed_concepts.iter().cloned().collect(),
    }
  }
}

/// Run CPU-bound work without stalling the other tasks on this worker.
fn off_the_reactor<R>(work: impl FnOnce() -> R) -> R {
  match Handle::try_current() {
    Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => tokio::task::block_in_place(work),
    _ => work(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::curriculum::fixtures::{self, concept, main, sub};
  use crate::oracle::OfflineOracle;
  use crate::script::Interpreter;
  use crate::storage::{MemoryStore, ProgressStore};
  use async_trait::async_trait;
  use pretty_assertions::assert_eq;

  fn deps(curriculum: Arc<Curriculum>, store: Arc<MemoryStore>, oracle: Arc<dyn HintOracle>) -> SessionDeps {
    shared_deps(curriculum, Arc::new(ProgressLedger::new(store)), oracle)
  }

  fn shared_deps(curriculum: Arc<Curriculum>, ledger: Arc<ProgressLedger>, oracle: Arc<dyn HintOracle>) -> SessionDeps {
    SessionDeps {
      curriculum,
      ledger,
      oracle,
      runtime: Arc::new(Interpreter::default()),
      settings: SessionConfig::default(),
    }
  }

  async fn started(curriculum: Arc<Curriculum>) -> (SessionController, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let mut s = SessionController::new(deps(curriculum, store.clone(), Arc::new(OfflineOracle::new("test"))));
    if let Some(t) = s.start() {
      assert!(s.load(t).await);
    }
    (s, store)
  }

  fn feedback(s: &SessionController) -> Vec<(String, FeedbackKind)> {
    s.view().feedback.into_iter().map(|m| (m.text, m.kind)).collect()
  }

  fn console(s: &SessionController) -> Vec<String> {
    s.view().console.into_iter().map(|m| m.text).collect()
  }

  struct Canned;

  #[async_trait]
  impl HintOracle for Canned {
    async fn request_hint(&self, _: &str, _: &str, _: &str, _: Option<&str>) -> Option<String> {
      Some("Look closer at the number.".into())
    }
    async fn request_analysis(&self, _: &str, _: &str, _: &str, failure: &str) -> Option<String> {
      Some(format!("It failed because: {failure}"))
    }
    fn is_online(&self) -> bool {
      true
    }
  }

  #[tokio::test(start_paused = true)]
  async fn fresh_session_opens_first_real_challenge() {
    let (s, store) = started(fixtures::small()).await;
    let v = s.view();
    assert_eq!(v.phase, Phase::Ready);
    assert_eq!(v.challenge.as_ref().map(|c| c.id.as_str()), Some("a"));
    assert_eq!(v.source, "// start a\n");
    assert_eq!(feedback(&s), vec![("Challenge: Title a. Describe a".to_string(), FeedbackKind::Info)]);
    assert!(v.can_submit && !v.can_request_analysis && !v.can_advance);
    assert!(store.raw().unwrap().contains("\"m1\""));
  }

  #[tokio::test(start_paused = true)]
  async fn passing_submission_unlocks_and_advances() {
    let (mut s, store) = started(fixtures::small()).await;
    s.edit("let answer = 42;".into());
    s.submit().await;

    assert_eq!(s.phase(), Phase::Completed);
    assert_eq!(s.progress().current_xp, 10);
    assert!(s.view().read_only);
    assert_eq!(console(&s)[0], CASTING);
    assert!(store.raw().unwrap().contains("\"completedConcepts\":[\"a\""));

    let t = s.advance().unwrap();
    assert!(s.load(t).await);
    assert_eq!(s.active_challenge_id(), Some("b"));
    assert_eq!(s.phase(), Phase::Ready);
    assert!(!s.view().read_only);
  }

  #[tokio::test(start_paused = true)]
  async fn finishing_a_subtopic_announces_the_next() {
    let (mut s, _) = started(fixtures::small()).await;
    s.edit("let answer = 42;".into());
    s.submit().await;
    let t = s.advance().unwrap();
    s.load(t).await;
    s.edit("let answer = 42;".into());
    s.submit().await;

    let texts: Vec<String> = feedback(&s).into_iter().map(|(t, _)| t).collect();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], "A new path unfolds: \"Sub s2\" is now accessible!");
    assert!(texts[1].starts_with("Thy spell is true!"));
    assert_eq!(s.progress().current_xp, 30);

    let t = s.advance().unwrap();
    s.load(t).await;
    assert_eq!(s.active_challenge_id(), Some("c"));
  }

  #[tokio::test(start_paused = true)]
  async fn failing_submission_offers_analysis_until_edited() {
    let (mut s, _) = started(fixtures::small()).await;
    s.edit("let answer = 41;".into());
    s.submit().await;
    let v = s.view();
    assert_eq!(v.phase, Phase::Ready);
    assert_eq!(v.last_evaluation_passed, Some(false));
    assert_eq!(feedback(&s)[0].1, FeedbackKind::Error);
    assert!(v.can_request_analysis);

    s.request_analysis().await;
    let fb = feedback(&s);
    assert_eq!(fb[0], (NO_ANALYSIS.to_string(), FeedbackKind::Info));
    assert_eq!(fb[1], (ANALYSIS_PENDING.to_string(), FeedbackKind::Info));

    s.edit("let answer = 40;".into());
    assert!(!s.view().can_request_analysis);
    let before = feedback(&s).len();
    s.request_analysis().await;
    assert_eq!(feedback(&s).len(), before);
  }

  #[tokio::test(start_paused = true)]
  async fn syntax_errors_fail_with_a_themed_message() {
    let (mut s, _) = started(fixtures::small()).await;
    s.edit("let answer = ;".into());
    s.submit().await;
    let fb = feedback(&s);
    assert_eq!(fb[0].1, FeedbackKind::Error);
    assert!(fb[0].0.starts_with("A magical disturbance! Execution Error:"));
    assert_eq!(s.progress().current_xp, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn crashed_checks_are_logged_to_the_console() {
    let d = crate::domain::Difficulty::Novice;
    let mut echo = concept("echo", d, false);
    let spec: crate::criteria::CriteriaSpec = toml::from_str("kind = \"output\"\nexpect = [\"hi\"]").unwrap();
    echo.challenge.criteria = spec.build();
    let c = Arc::new(
      Curriculum::from_parts(
        "x",
        "X",
        None,
        vec![main("intro", vec![sub("si", vec![concept("i", d, false)])]), main("m", vec![sub("s", vec![echo])])],
      )
      .unwrap(),
    );
    let (mut s, _) = started(c).await;
    s.edit("console.log('trying'); missing();".into());
    s.submit().await;
    let lines = console(&s);
    assert_eq!(lines[0], CASTING);
    assert_eq!(lines[1], "trying");
    assert_eq!(lines[2], "A critical flaw in the weave! missing is not defined");
    assert_eq!(feedback(&s)[0], (lines[2].clone(), FeedbackKind::Error));
    assert!(s.view().can_request_analysis);
  }

  #[tokio::test(start_paused = true)]
  async fn program_output_is_shown_in_order() {
    let (mut s, _) = started(fixtures::small()).await;
    s.edit("console.log('one'); console.log('two'); let answer = 42;".into());
    s.submit().await;
    assert_eq!(console(&s), vec![CASTING.to_string(), "one".into(), "two".into()]);
  }

  #[tokio::test(start_paused = true)]
  async fn sealed_selection_only_adds_a_notice() {
    let (mut s, _) = started(fixtures::small()).await;
    let before = s.view();
    assert_eq!(s.select("c"), None);
    let after = s.view();
    assert_eq!(
      after.feedback[0].text,
      "The path to \"Sub s2\" is currently sealed. Complete prior scrolls to unlock it."
    );
    assert_eq!(after.feedback[0].kind, FeedbackKind::Error);
    assert_eq!(SessionView { feedback: before.feedback.clone(), ..after }, before);
  }

  #[tokio::test(start_paused = true)]
  async fn offline_hint_uses_the_static_scroll() {
    let d = crate::domain::Difficulty::Novice;
    let mut hinted = concept("h", d, false);
    hinted.challenge.hint = Some("Numbers need no quotes.".into());
    let c = Arc::new(
      Curriculum::from_parts(
        "x",
        "X",
        None,
        vec![
          main("intro", vec![sub("si", vec![concept("i", d, false)])]),
          main("m", vec![sub("s", vec![hinted, concept("plain", d, false)])]),
        ],
      )
      .unwrap(),
    );
    let (mut s, _) = started(c).await;
    assert_eq!(s.active_challenge_id(), Some("h"));
    s.request_hint().await;
    let fb = feedback(&s);
    assert_eq!(fb[0], ("From an ancient scroll (Hint): Numbers need no quotes.".to_string(), FeedbackKind::Hint));
    assert_eq!(fb[1], (HINT_PENDING.to_string(), FeedbackKind::Info));
    assert_eq!(s.phase(), Phase::Ready);

    let t = s.select("plain").unwrap();
    s.load(t).await;
    s.request_hint().await;
    assert_eq!(feedback(&s)[0], (NO_GUIDANCE.to_string(), FeedbackKind::Info));
  }

  #[tokio::test(start_paused = true)]
  async fn online_oracle_text_is_prefixed() {
    let store = Arc::new(MemoryStore::default());
    let mut s = SessionController::new(deps(fixtures::small(), store, Arc::new(Canned)));
    let t = s.start().unwrap();
    s.load(t).await;
    s.request_hint().await;
    assert_eq!(feedback(&s)[0].0, "Oracle's Counsel: Look closer at the number.");
    s.edit("let answer = 1;".into());
    s.submit().await;
    s.request_analysis().await;
    let fb = feedback(&s);
    assert_eq!(fb[0].1, FeedbackKind::Analysis);
    assert!(fb[0].0.starts_with("Oracle's Scrutiny: It failed because: The ancient scrolls whisper"));
  }

  #[tokio::test(start_paused = true)]
  async fn stubs_cannot_be_submitted() {
    let d = crate::domain::Difficulty::Novice;
    let c = Arc::new(
      Curriculum::from_parts(
        "x",
        "X",
        None,
        vec![main("intro", vec![sub("si", vec![concept("i", d, false)])]), main("m", vec![sub("s", vec![])])],
      )
      .unwrap(),
    );
    let (mut s, _) = started(c).await;
    assert_eq!(s.active_challenge_id(), Some("c_s_fundamentals"));
    assert!(!s.view().can_submit);
    s.submit().await;
    assert_eq!(feedback(&s)[0], (STUB_SUBMIT.to_string(), FeedbackKind::Info));
    assert!(console(&s).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn mastered_challenges_reload_read_only() {
    let (mut s, _) = started(fixtures::small()).await;
    s.edit("let answer = 42; // mine".into());
    s.submit().await;
    let t = s.advance().unwrap();
    s.load(t).await;

    let t = s.select("a").unwrap();
    s.load(t).await;
    let v = s.view();
    assert!(v.read_only);
    assert_eq!(v.source, "let answer = 42; // mine");
    assert_eq!(v.feedback[0].text, "Challenge: Title a. (Status: Mastered)");
    assert_eq!(console(&s), vec!["This trial, \"Title a\", has been mastered.".to_string()]);

    s.edit("tampered".into());
    s.submit().await;
    assert_eq!(s.view().source, "let answer = 42; // mine");
    assert_eq!(feedback(&s)[0].0, ALREADY_MASTERED);
    assert_eq!(s.progress().current_xp, 10);
  }

  #[tokio::test(start_paused = true)]
  async fn latest_load_wins() {
    let (mut s, _) = started(fixtures::small()).await;
    s.progress.unlocked_sub_topics.insert("s2".into());
    let first = s.select("b").unwrap();
    let second = s.select("c").unwrap();
    assert!(!s.finish_load(first));
    assert_eq!(s.phase(), Phase::Loading);
    assert!(s.load(second).await);
    assert_eq!(s.view().challenge.unwrap().id, "c");
  }

  #[tokio::test(start_paused = true)]
  async fn unknown_challenge_recovers_to_open_work() {
    let (mut s, _) = started(fixtures::small()).await;
    let t = s.select("does-not-exist").unwrap();
    s.load(t).await;
    assert_eq!(s.active_challenge_id(), Some("a"));
  }

  #[tokio::test(start_paused = true)]
  async fn end_of_path_stays_ready() {
    let (mut s, _) = started(fixtures::small()).await;
    s.progress.unlocked_main_topics.insert("m2".into());
    s.progress.unlocked_sub_topics.insert("s3".into());
    let t = s.select("d").unwrap();
    s.load(t).await;
    s.edit("let answer = 42;".into());
    s.submit().await;
    assert_eq!(s.phase(), Phase::Ready);
    assert_eq!(feedback(&s)[0].0, crate::progress::PATH_COMPLETE);
    assert_eq!(s.advance(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn sessions_sharing_a_store_never_erase_each_other() {
    let store = Arc::new(MemoryStore::default());
    let ledger = Arc::new(ProgressLedger::new(store.clone()));
    let open = |ledger: &Arc<ProgressLedger>| {
      SessionController::new(shared_deps(fixtures::small(), Arc::clone(ledger), Arc::new(OfflineOracle::new("test"))))
    };
    let mut first = open(&ledger);
    let mut second = open(&ledger);
    for s in [&mut first, &mut second] {
      let t = s.start().unwrap();
      s.load(t).await;
    }

    first.edit("let answer = 42;".into());
    first.submit().await;
    let t = first.advance().unwrap();
    first.load(t).await;
    first.edit("let answer = 42;".into());
    first.submit().await;

    second.edit("let answer = 42;".into());
    second.submit().await;

    let stored = store.load().unwrap().unwrap();
    assert!(stored.is_completed("a") && stored.is_completed("b"));
    assert!(stored.unlocked_sub_topics.contains("s2"));
    assert_eq!(stored.current_xp, 30);
    assert_eq!(second.progress(), &stored);
  }

  #[tokio::test(start_paused = true)]
  async fn selection_sees_unlocks_from_other_sessions() {
    let store = Arc::new(MemoryStore::default());
    let ledger = Arc::new(ProgressLedger::new(store));
    let oracle: Arc<dyn HintOracle> = Arc::new(OfflineOracle::new("test"));
    let mut first = SessionController::new(shared_deps(fixtures::small(), Arc::clone(&ledger), Arc::clone(&oracle)));
    let mut second = SessionController::new(shared_deps(fixtures::small(), ledger, oracle));
    let t = first.start().unwrap();
    first.load(t).await;
    for _ in 0..2 {
      first.edit("let answer = 42;".into());
      first.submit().await;
      let t = first.advance().unwrap();
      first.load(t).await;
    }
    assert_eq!(first.active_challenge_id(), Some("c"));

    let t = second.select("c").unwrap();
    assert!(second.load(t).await);
    assert_eq!(second.active_challenge_id(), Some("c"));
  }

  #[tokio::test(start_paused = true)]
  async fn oversized_source_is_refused() {
    let (mut s, _) = started(fixtures::small()).await;
    s.edit(format!("let answer = {}1;", "1+".repeat(MAX_SOURCE_LEN)));
    s.submit().await;
    assert_eq!(feedback(&s)[0], (TOO_LONG.to_string(), FeedbackKind::Error));
    assert_eq!(s.phase(), Phase::Ready);
    assert!(console(&s).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn long_expression_chain_fails_without_crashing() {
    let (mut s, _) = started(fixtures::small()).await;
    s.edit(format!("let answer = {}1;", "1+".repeat(5_000)));
    s.submit().await;
    let fb = feedback(&s);
    assert_eq!(fb[0].1, FeedbackKind::Error);
    assert!(fb[0].0.contains("Code is nested too deeply"));
    assert_eq!(s.progress().current_xp, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn submission_is_visible_while_evaluating() {
    let (mut s, _) = started(fixtures::small()).await;
    s.edit("let answer = 42;".into());
    assert!(s.begin_submit());
    let v = s.view();
    assert_eq!(v.phase, Phase::Evaluating);
    assert!(!v.can_submit && !v.can_request_hint);
    assert_eq!(console(&s), vec![CASTING.to_string()]);
    assert!(!s.begin_submit());

    s.finish_submit().await;
    assert_eq!(s.phase(), Phase::Completed);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn evaluation_runs_on_a_multi_thread_runtime() {
    let mut settings = SessionConfig::default();
    settings.load_delay_ms = 0;
    settings.submit_delay_ms = 0;
    let mut d = deps(fixtures::small(), Arc::new(MemoryStore::default()), Arc::new(OfflineOracle::new("test")));
    d.settings = settings;
    let mut s = SessionController::new(d);
    let t = s.start().unwrap();
    s.load(t).await;
    s.edit("let answer = 42;".into());
    s.submit().await;
    assert_eq!(s.phase(), Phase::Completed);
  }

  #[tokio::test(start_paused = true)]
  async fn empty_library_is_reported() {
    let (s, _) = started(Arc::new(Curriculum::from_parts("x", "X", None, vec![]).unwrap())).await;
    assert_eq!(feedback(&s), vec![(EMPTY_LIBRARY.to_string(), FeedbackKind::Error)]);
    assert!(s.view().challenge.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn load_waits_for_the_display_delay() {
    let store = Arc::new(MemoryStore::default());
    let mut s = SessionController::new(deps(fixtures::small(), store, Arc::new(OfflineOracle::new("test"))));
    let t = s.start().unwrap();
    assert_eq!(t.delay, Duration::from_millis(500));
    let start = tokio::time::Instant::now();
    s.load(t).await;
    assert!(start.elapsed() >= Duration::from_millis(500));
  }
}
