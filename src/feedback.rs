//! Learner-facing message channels: a short feedback list and a console tail.

use std::collections::VecDeque;

use serde::Serialize;
use uuid::Uuid;

pub const FEEDBACK_LIMIT: usize = 5;
pub const CONSOLE_LIMIT: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
  Success,
  Error,
  Info,
  Hint,
  Analysis,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
  pub id: String,
  pub text: String,
  pub kind: FeedbackKind,
}

impl Message {
  pub fn new(text: impl Into<String>, kind: FeedbackKind) -> Self {
    Self { id: Uuid::new_v4().to_string(), text: text.into(), kind }
  }
}

/// Feedback is most-recent-first, capped at five. Hint and analysis messages
/// replace their predecessors of the same kind; success and error wipe the list.
/// The console keeps the ten newest lines in arrival order.
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
  feedback: VecDeque<Message>,
  console: VecDeque<Message>,
}

impl MessageLog {
  pub fn feedback(&self) -> impl Iterator<Item = &Message> {
    self.feedback.iter()
  }

  pub fn console(&self) -> impl Iterator<Item = &Message> {
    self.console.iter()
  }

  pub fn push_feedback(&mut self, text: impl Into<String>, kind: FeedbackKind) {
    match kind {
      FeedbackKind::Success | FeedbackKind::Error => self.feedback.clear(),
      FeedbackKind::Hint | FeedbackKind::Analysis => self.feedback.retain(|m| m.kind != kind),
      FeedbackKind::Info => {}
    }
    self.feedback.push_front(Message::new(text, kind));
    self.feedback.truncate(FEEDBACK_LIMIT);
  }

  pub fn push_console(&mut self, text: impl Into<String>, kind: FeedbackKind) {
    self.console.push_back(Message::new(text, kind));
    while self.console.len() > CONSOLE_LIMIT {
      self.console.pop_front();
    }
  }

  /// Replace the feedback list with a single message, without the eviction rules.
  pub fn reset_feedback(&mut self, text: impl Into<String>, kind: FeedbackKind) {
    self.feedback.clear();
    self.feedback.push_front(Message::new(text, kind));
  }

  pub fn clear_feedback(&mut self) {
    self.feedback.clear();
  }

  pub fn clear_console(&mut self) {
    self.console.clear();
  }
}
