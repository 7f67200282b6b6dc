//! Evaluation engine: runs a challenge's solution check with output captured
//! and every failure folded into a failed verdict.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::domain::{Challenge, CriteriaResult};
use crate::script::{Bindings, OutputSink, ScriptError, ScriptRuntime};

/// Process-side output channel. Lines written while a capture is installed
/// go to the innermost capture; otherwise they only reach the log.
#[derive(Default)]
pub struct Console {
  captures: RefCell<Vec<Vec<String>>>,
}

impl Console {
  pub fn capture(&self) -> CaptureGuard<'_> {
    let mut stack = self.captures.borrow_mut();
    stack.push(Vec::new());
    CaptureGuard { console: self, depth: stack.len(), done: false }
  }

  #[cfg(test)]
  pub fn is_capturing(&self) -> bool {
    !self.captures.borrow().is_empty()
  }

  fn current_lines(&self) -> Vec<String> {
    self.captures.borrow().last().cloned().unwrap_or_default()
  }
}

impl OutputSink for Console {
  fn write_line(&self, line: String) {
    match self.captures.borrow_mut().last_mut() {
      Some(top) => top.push(line),
      None => debug!(target: "evaluation", %line, "output outside capture"),
    }
  }
}

/// Restores the previous output channel when finished or dropped.
pub struct CaptureGuard<'a> {
  console: &'a Console,
  depth: usize,
  done: bool,
}

impl CaptureGuard<'_> {
  pub fn finish(mut self) -> Vec<String> {
    self.restore()
  }

  fn restore(&mut self) -> Vec<String> {
    if self.done {
      return Vec::new();
    }
    self.done = true;
    let mut stack = self.console.captures.borrow_mut();
    let lines = stack.get(self.depth - 1).cloned().unwrap_or_default();
    stack.truncate(self.depth - 1);
    lines
  }
}

impl Drop for CaptureGuard<'_> {
  fn drop(&mut self) {
    self.restore();
  }
}

/// What a solution check may use while it runs.
pub struct EvalEnv<'a> {
  runtime: &'a dyn ScriptRuntime,
  console: &'a Console,
}

impl<'a> EvalEnv<'a> {
  #[cfg(test)]
  pub fn for_tests(runtime: &'a dyn ScriptRuntime, console: &'a Console) -> Self {
    Self { runtime, console }
  }

  /// Execute source in the sandbox; its prints land in the active capture.
  pub fn run(&self, source: &str) -> Result<Bindings, ScriptError> {
    self.runtime.evaluate(source, self.console)
  }

  /// Lines captured so far during this evaluation.
  pub fn captured(&self) -> Vec<String> {
    self.console.current_lines()
  }
}

/// Verdict plus everything the session needs to show for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
  pub result: CriteriaResult,
  /// Captured output, in program order.
  pub output: Vec<String>,
  /// Set when the check itself failed (script error or crash) rather than returning a verdict.
  pub fault: Option<String>,
}

pub struct Evaluator {
  runtime: Arc<dyn ScriptRuntime>,
  console: Console,
}

impl Evaluator {
  pub fn new(runtime: Arc<dyn ScriptRuntime>) -> Self {
    Self { runtime, console: Console::default() }
  }

  pub fn console(&self) -> &Console {
    &self.console
  }

  #[instrument(level = "info", target = "evaluation", skip(self, challenge, source), fields(challenge_id = %challenge.id, source_len = source.len()))]
  pub fn evaluate(&self, challenge: &Challenge, source: &str) -> Evaluation {
    let guard = self.console.capture();
    let env = EvalEnv { runtime: self.runtime.as_ref(), console: &self.console };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| challenge.criteria.check(source, &env)));
    let output = guard.finish();

    let (result, fault) = match outcome {
      Ok(Ok(result)) => (result, None),
      Ok(Err(e)) => {
        let message = format!("A critical flaw in the weave! {}", e.message());
        (CriteriaResult::fail(message.clone()), Some(message))
      }
      Err(payload) => {
        let message = format!("A critical flaw in the weave! {}", panic_message(payload.as_ref()));
        warn!(target: "evaluation", id = %challenge.id, "solution check panicked");
        (CriteriaResult::fail(message.clone()), Some(message))
      }
    };
    info!(target: "evaluation", id = %challenge.id, passed = result.passed, lines = output.len(), "evaluation finished");
    Evaluation { result, output, fault }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown failure".to_string()
  }
}
