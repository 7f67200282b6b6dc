//! Sandboxed interpreter for the JavaScript subset learners write.
//!
//! The rest of the crate only sees the `ScriptRuntime` capability: run a
//! source text, get back the top-level bindings or an error. Print calls go
//! to an `OutputSink` supplied by the caller.

mod interp;
mod lexer;
mod parser;
mod value;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

pub use interp::Interpreter;

/// Default cap on executed statements and loop iterations per run.
pub const DEFAULT_STEP_BUDGET: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("SyntaxError: {message} ({line}:{col})")]
    Syntax { message: String, line: usize, col: usize },
    #[error("ReferenceError: {message} ({line}:{col})")]
    Reference { message: String, line: usize, col: usize },
    #[error("TypeError: {message} ({line}:{col})")]
    Type { message: String, line: usize, col: usize },
    #[error("RangeError: {message}")]
    Range { message: String },
    /// A value raised with `throw`.
    #[error("Uncaught {message} ({line}:{col})")]
    Thrown { message: String, line: usize, col: usize },
    #[error("Execution halted after {budget} steps; is there a loop that never ends?")]
    StepBudget { budget: u64 },
}

impl ScriptError {
    pub(crate) fn syntax(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self::Syntax { message: message.into(), line, col }
    }

    /// The message alone, as a script's `e.message` would read.
    pub fn message(&self) -> String {
        match self {
            Self::Syntax { message, .. }
            | Self::Reference { message, .. }
            | Self::Type { message, .. }
            | Self::Range { message }
            | Self::Thrown { message, .. } => message.clone(),
            Self::StepBudget { .. } => self.to_string(),
        }
    }

    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            Self::Syntax { line, col, .. }
            | Self::Reference { line, col, .. }
            | Self::Type { line, col, .. }
            | Self::Thrown { line, col, .. } => {
                Some((*line, *col))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

/// A top-level name as it stood when the script finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub kind: DeclKind,
    /// Result of `typeof` on the value.
    pub type_of: &'static str,
    pub value: serde_json::Value,
}

pub type Bindings = BTreeMap<String, Binding>;

/// Destination for print-like calls made by a running script.
pub trait OutputSink {
    fn write_line(&self, line: String);
}

/// Capability to execute untrusted source text.
pub trait ScriptRuntime: Send + Sync {
    fn evaluate(&self, source: &str, output: &dyn OutputSink) -> Result<Bindings, ScriptError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::OutputSink;

    #[derive(Default)]
    pub struct VecSink(pub RefCell<Vec<String>>);

    impl OutputSink for VecSink {
        fn write_line(&self, line: String) {
            self.0.borrow_mut().push(line);
        }
    }

    impl VecSink {
        pub fn lines(&self) -> Vec<String> {
            self.0.borrow().clone()
        }
    }
}
