//! Solution checks. Each challenge carries one `SolutionCriteria`, chosen by
//! the `criteria` table of its curriculum entry.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::domain::CriteriaResult;
use crate::evaluation::EvalEnv;
use crate::script::{Binding, ScriptError};
use crate::util::json_eq;

pub trait SolutionCriteria: Send + Sync + fmt::Debug {
  /// Judge a submission. Errors are turned into failed verdicts by the caller.
  fn check(&self, source: &str, env: &EvalEnv<'_>) -> Result<CriteriaResult, ScriptError>;
}

/// `typeof` names a binding check can expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsType {
  String,
  Number,
  Boolean,
  Object,
}

impl JsType {
  fn as_str(self) -> &'static str {
    match self {
      JsType::String => "string",
      JsType::Number => "number",
      JsType::Boolean => "boolean",
      JsType::Object => "object",
    }
  }
}

/// Declarative form of a check, as written in curriculum content.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriteriaSpec {
  Acknowledge {
    message: String,
  },
  Binding {
    name: String,
    #[serde(rename = "type")]
    ty: JsType,
    #[serde(default)]
    equals: Option<Json>,
    #[serde(default)]
    requires: Option<String>,
    #[serde(default)]
    requires_message: Option<String>,
  },
  Array {
    name: String,
    equals: Vec<Json>,
    pass_message: String,
    fail_message: String,
  },
  Output {
    expect: Vec<String>,
    #[serde(default)]
    pass_message: Option<String>,
    #[serde(default)]
    fail_message: Option<String>,
  },
}

impl CriteriaSpec {
  pub fn build(self) -> Arc<dyn SolutionCriteria> {
    match self {
      CriteriaSpec::Acknowledge { message } => Arc::new(Acknowledge { message }),
      CriteriaSpec::Binding { name, ty, equals, requires, requires_message } => {
        let requirement = requires.map(|needle| {
          let message = requires_message.unwrap_or_else(|| format!("Make sure you use '{needle}' in your spell."));
          (needle, message)
        });
        Arc::new(BindingCheck { name, ty, equals, requirement })
      }
      CriteriaSpec::Array { name, equals, pass_message, fail_message } => {
        Arc::new(ArrayCheck { name, equals, pass_message, fail_message })
      }
      CriteriaSpec::Output { expect, pass_message, fail_message } => {
        Arc::new(OutputCheck { expect, pass_message, fail_message })
      }
    }
  }
}

/// Informational content: always passes.
#[derive(Debug)]
pub struct Acknowledge {
  message: String,
}

impl SolutionCriteria for Acknowledge {
  fn check(&self, _source: &str, _env: &EvalEnv<'_>) -> Result<CriteriaResult, ScriptError> {
    Ok(CriteriaResult::pass(self.message.clone()))
  }
}

/// Stand-in for content that has not been authored yet. Always fails.
#[derive(Debug)]
pub struct Pending {
  concept_name: String,
}

impl Pending {
  pub fn new(concept_name: impl Into<String>) -> Arc<dyn SolutionCriteria> {
    Arc::new(Self { concept_name: concept_name.into() })
  }
}

impl SolutionCriteria for Pending {
  fn check(&self, _source: &str, _env: &EvalEnv<'_>) -> Result<CriteriaResult, ScriptError> {
    Ok(CriteriaResult::fail(format!(
      "The scrolls for \"{}\" are ancient and their full meaning is not yet deciphered in this game. Solution criteria pending.",
      self.concept_name
    )))
  }
}

/// A top-level binding must exist with a given type and, optionally, value.
#[derive(Debug)]
pub struct BindingCheck {
  name: String,
  ty: JsType,
  equals: Option<Json>,
  requirement: Option<(String, String)>,
}

impl BindingCheck {
  /// Run the source and read the binding. Script errors become a verdict here,
  /// so the learner sees the themed message instead of a crash notice.
  fn read(&self, source: &str, env: &EvalEnv<'_>) -> Result<Binding, CriteriaResult> {
    let bindings = env.run(source).map_err(|e| {
      CriteriaResult::fail(format!(
        "A magical disturbance! Execution Error: {}. Check the runes of your syntax.",
        e.message()
      ))
    })?;
    let v = &self.name;
    let binding = match bindings.get(v) {
      Some(b) if b.type_of != "undefined" => b.clone(),
      _ => {
        return Err(CriteriaResult::fail(format!(
          "Halt, adventurer! The variable '{v}' has not been declared in this realm."
        )))
      }
    };
    if binding.type_of != self.ty.as_str() {
      return Err(CriteriaResult::fail(format!(
        "The fates decree '{v}' should be a {}, but it appears as a mystical {}!",
        self.ty.as_str(),
        binding.type_of
      )));
    }
    Ok(binding)
  }
}

impl SolutionCriteria for BindingCheck {
  fn check(&self, source: &str, env: &EvalEnv<'_>) -> Result<CriteriaResult, ScriptError> {
    if let Some((needle, message)) = &self.requirement {
      if !source.contains(needle.as_str()) {
        return Ok(CriteriaResult::fail(message.clone()));
      }
    }
    let binding = match self.read(source, env) {
      Ok(b) => b,
      Err(verdict) => return Ok(verdict),
    };
    let v = &self.name;
    if let Some(expected) = &self.equals {
      if !json_eq(expected, &binding.value) {
        return Ok(CriteriaResult::fail(format!(
          "The ancient scrolls whisper that '{v}' should be {expected}, yet your spell reveals {}.",
          binding.value
        )));
      }
    }
    Ok(
      CriteriaResult::pass(format!("Thy spell is true! '{v}' is correctly woven with the value {}.", binding.value))
        .with_value(binding.value),
    )
  }
}

/// A named array must hold exactly the expected items, in order.
#[derive(Debug)]
pub struct ArrayCheck {
  name: String,
  equals: Vec<Json>,
  pass_message: String,
  fail_message: String,
}

impl SolutionCriteria for ArrayCheck {
  fn check(&self, source: &str, env: &EvalEnv<'_>) -> Result<CriteriaResult, ScriptError> {
    let reader = BindingCheck { name: self.name.clone(), ty: JsType::Object, equals: None, requirement: None };
    let binding = match reader.read(source, env) {
      Ok(b) => b,
      Err(verdict) => return Ok(verdict),
    };
    let matches = match &binding.value {
      Json::Array(items) => items.len() == self.equals.len() && items.iter().zip(&self.equals).all(|(a, b)| json_eq(a, b)),
      _ => false,
    };
    let verdict = if matches {
      CriteriaResult::pass(self.pass_message.clone())
    } else {
      CriteriaResult::fail(self.fail_message.clone())
    };
    // The value is kept on failure too; visuals replay partial progress.
    Ok(verdict.with_value(binding.value))
  }
}

/// Printed output must match line for line.
#[derive(Debug)]
pub struct OutputCheck {
  expect: Vec<String>,
  pass_message: Option<String>,
  fail_message: Option<String>,
}

impl SolutionCriteria for OutputCheck {
  fn check(&self, source: &str, env: &EvalEnv<'_>) -> Result<CriteriaResult, ScriptError> {
    env.run(source)?;
    let seen = env.captured();
    let value = Json::from(seen.clone());
    if seen == self.expect {
      let msg = self.pass_message.clone().unwrap_or_else(|| "The echoes match the prophecy!".into());
      Ok(CriteriaResult::pass(msg).with_value(value))
    } else {
      let msg = self.fail_message.clone().unwrap_or_else(|| {
        format!("The echoes should read {:?}, yet the winds carried {:?}.", self.expect, seen)
      });
      Ok(CriteriaResult::fail(msg).with_value(value))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::evaluation::Console;
  use crate::script::Interpreter;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  fn check(spec: &str, source: &str) -> CriteriaResult {
    let spec: CriteriaSpec = toml::from_str(spec).unwrap();
    let criteria = spec.build();
    let runtime = Interpreter::default();
    let console = Console::default();
    let _guard = console.capture();
    let env = EvalEnv::for_tests(&runtime, &console);
    criteria.check(source, &env).unwrap()
  }

  const QUEST: &str = r#"
    kind = "binding"
    name = "questName"
    type = "string"
    equals = "The Lost Artifact"
    requires = "let questName"
    requires_message = "Make sure you use 'let questName' to declare the variable."
  "#;

  #[test]
  fn binding_pass_records_value() {
    let r = check(QUEST, "let questName = 'The Lost Artifact';");
    assert_eq!(
      r,
      CriteriaResult {
        passed: true,
        message: Some("Thy spell is true! 'questName' is correctly woven with the value \"The Lost Artifact\".".into()),
        updated_player_code: None,
        evaluated_value: Some(json!("The Lost Artifact")),
      }
    );
  }

  #[test]
  fn binding_failure_messages() {
    let r = check(QUEST, "var questName = 'The Lost Artifact';");
    assert_eq!(r.message.as_deref(), Some("Make sure you use 'let questName' to declare the variable."));

    let r = check(QUEST, "let questName;");
    assert_eq!(r.message.as_deref(), Some("Halt, adventurer! The variable 'questName' has not been declared in this realm."));

    let r = check(QUEST, "let questName = 7;");
    assert_eq!(r.message.as_deref(), Some("The fates decree 'questName' should be a string, but it appears as a mystical number!"));

    let r = check(QUEST, "let questName = 'The Found Artifact';");
    assert_eq!(
      r.message.as_deref(),
      Some("The ancient scrolls whisper that 'questName' should be \"The Lost Artifact\", yet your spell reveals \"The Found Artifact\".")
    );

    let r = check(QUEST, "let questName = 'x' +;");
    assert!(!r.passed);
    assert!(r.message.unwrap().starts_with("A magical disturbance! Execution Error: Unexpected"));
  }

  #[test]
  fn numbers_compare_by_value() {
    let spec = "kind = \"binding\"\nname = \"maxMana\"\ntype = \"number\"\nequals = 100";
    assert!(check(spec, "const maxMana = 50 * 2;").passed);
    assert!(!check(spec, "const maxMana = '100';").passed);
  }

  #[test]
  fn array_check_keeps_value_on_failure() {
    let spec = r#"
      kind = "array"
      name = "heistBag"
      equals = ["Golden Scepter", "Dragon's Eye Orb"]
      pass_message = "ok"
      fail_message = "wrong order"
    "#;
    let r = check(spec, "const heistBag = [];\nheistBag.push(\"Dragon's Eye Orb\");\nheistBag.push('Golden Scepter');");
    assert!(!r.passed);
    assert_eq!(r.message.as_deref(), Some("wrong order"));
    assert_eq!(r.evaluated_value, Some(json!(["Dragon's Eye Orb", "Golden Scepter"])));

    let r = check(spec, "const heistBag = ['Golden Scepter'];\nheistBag.push(\"Dragon's Eye Orb\");");
    assert!(r.passed);

    let r = check(spec, "const heistBag = 'Golden Scepter';");
    assert_eq!(r.message.as_deref(), Some("The fates decree 'heistBag' should be a object, but it appears as a mystical string!"));
  }

  #[test]
  fn output_check_reads_captured_lines() {
    let spec = "kind = \"output\"\nexpect = [\"Hello, realm!\"]";
    assert!(check(spec, "console.log('Hello, realm!');").passed);
    assert!(!check(spec, "console.log('Hello');").passed);
  }

  #[test]
  fn pending_always_fails() {
    let console = Console::default();
    let runtime = Interpreter::default();
    let env = EvalEnv::for_tests(&runtime, &console);
    let r = Pending::new("Closures").check("anything", &env).unwrap();
    assert!(!r.passed);
    assert!(r.message.unwrap().ends_with("Solution criteria pending."));
  }

  #[test]
  fn acknowledge_always_passes() {
    let r = check("kind = \"acknowledge\"\nmessage = \"known\"", "// nothing");
    assert_eq!(r, CriteriaResult::pass("known"));
  }
}
