//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Remove markdown code fences (```javascript / ```) a model may wrap around its answer.
pub fn strip_code_fences(s: &str) -> String {
  s.replace("```javascript", "").replace("```", "").trim().to_string()
}

/// Log-safe truncation for large strings. Cuts on a char boundary.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) { end -= 1; }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

/// Compare two JSON values the way a strict equality on plain data would,
/// treating `100` and `100.0` as the same number.
pub fn json_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
  use serde_json::Value as J;
  match (a, b) {
    (J::Number(x), J::Number(y)) => match (x.as_f64(), y.as_f64()) {
      (Some(x), Some(y)) => x == y,
      _ => x == y,
    },
    (J::Array(xs), J::Array(ys)) => xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y)),
    (J::Object(xs), J::Object(ys)) => {
      xs.len() == ys.len() && xs.iter().all(|(k, x)| ys.get(k).map_or(false, |y| json_eq(x, y)))
    }
    _ => a == b,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn fills_all_occurrences() {
    let out = fill_template("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]);
    assert_eq!(out, "x and y and x");
  }

  #[test]
  fn strips_fences_and_trims() {
    assert_eq!(strip_code_fences("```javascript\nlet a = 1;\n```\n"), "let a = 1;");
    assert_eq!(strip_code_fences("  plain  "), "plain");
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    let s = "ééééé";
    let t = trunc_for_log(s, 3);
    assert!(t.starts_with('é'));
    assert!(t.contains("10 bytes total"));
  }

  #[test]
  fn numbers_compare_by_value() {
    assert!(json_eq(&json!(100), &json!(100.0)));
    assert!(json_eq(&json!(["a", 1]), &json!(["a", 1.0])));
    assert!(!json_eq(&json!("100"), &json!(100)));
    assert!(!json_eq(&json!([1, 2]), &json!([2, 1])));
  }
}
