//! Runtime values and their conversions.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value as Json;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
/// Objects keep insertion order, like property enumeration does.
pub type ObjectRef = Rc<RefCell<Vec<(String, Value)>>>;

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Native(Native),
}

/// Built-in functions reachable from scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    ConsoleLog,
    MathMax,
    MathMin,
    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    MathSqrt,
    StringFn,
    NumberFn,
    BooleanFn,
    ParseInt,
    ParseFloat,
    IsArray,
    ErrorCtor,
}

impl Native {
    pub fn name(self) -> &'static str {
        match self {
            Native::ConsoleLog => "log",
            Native::MathMax => "max",
            Native::MathMin => "min",
            Native::MathFloor => "floor",
            Native::MathCeil => "ceil",
            Native::MathRound => "round",
            Native::MathAbs => "abs",
            Native::MathSqrt => "sqrt",
            Native::StringFn => "String",
            Native::NumberFn => "Number",
            Native::BooleanFn => "Boolean",
            Native::ParseInt => "parseInt",
            Native::ParseFloat => "parseFloat",
            Native::IsArray => "isArray",
            Native::ErrorCtor => "Error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularStructure;

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(props: Vec<(String, Value)>) -> Self {
        Value::Object(Rc::new(RefCell::new(props)))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Native(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Native(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => string_to_number(&items[0].to_js_string()),
                    _ => f64::NAN,
                }
            }
            Value::Object(_) | Value::Native(_) => f64::NAN,
        }
    }

    /// `String(value)`.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => join_items(&items.borrow(), ","),
            Value::Object(_) => "[object Object]".into(),
            Value::Native(f) => format!("function {}() {{ [native code] }}", f.name()),
        }
    }

    /// How a console call renders one argument: objects as JSON, the rest as `String(v)`.
    pub fn to_console_string(&self) -> Result<String, CircularStructure> {
        match self {
            Value::Null | Value::Array(_) | Value::Object(_) => Ok(self.to_json(&mut Vec::new())?.to_string()),
            other => Ok(other.to_js_string()),
        }
    }

    /// `JSON.stringify`-compatible conversion. `undefined` and functions
    /// become `null` inside arrays and are dropped from objects.
    pub fn to_json(&self, seen: &mut Vec<*const ()>) -> Result<Json, CircularStructure> {
        match self {
            Value::Undefined | Value::Null | Value::Native(_) => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(*b)),
            Value::Number(n) => Ok(number_to_json(*n)),
            Value::Str(s) => Ok(Json::String(s.to_string())),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.contains(&ptr) {
                    return Err(CircularStructure);
                }
                seen.push(ptr);
                let out = items.borrow().iter().map(|v| v.to_json(seen)).collect::<Result<Vec<_>, _>>();
                seen.pop();
                Ok(Json::Array(out?))
            }
            Value::Object(props) => {
                let ptr = Rc::as_ptr(props) as *const ();
                if seen.contains(&ptr) {
                    return Err(CircularStructure);
                }
                seen.push(ptr);
                let mut map = serde_json::Map::new();
                let mut result = Ok(());
                for (k, v) in props.borrow().iter() {
                    if matches!(v, Value::Undefined | Value::Native(_)) {
                        continue;
                    }
                    match v.to_json(seen) {
                        Ok(j) => {
                            map.insert(k.clone(), j);
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                seen.pop();
                result.map(|_| Json::Object(map))
            }
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => self.to_number() == other.to_number(),
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                if std::mem::discriminant(self) == std::mem::discriminant(other) {
                    self.strict_equals(other)
                } else {
                    self.to_number() == other.to_number()
                }
            }
            (Value::Array(_) | Value::Object(_), Value::Number(_) | Value::Str(_)) => {
                Value::str(self.to_js_string()).loose_equals(other)
            }
            (Value::Number(_) | Value::Str(_), Value::Array(_) | Value::Object(_)) => {
                self.loose_equals(&Value::str(other.to_js_string()))
            }
            _ => self.strict_equals(other),
        }
    }
}

pub fn join_items(items: &[Value], sep: &str) -> String {
    items
        .iter()
        .map(|v| match v {
            Value::Undefined | Value::Null => String::new(),
            other => other.to_js_string(),
        })
        .collect::<Vec<_>>()
        .join(sep)
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{n}")
    }
}

fn number_to_json(n: f64) -> Json {
    if n == n.trunc() && n.abs() <= 9_007_199_254_740_991.0 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}

fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if t.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')) => {
            t.parse::<f64>().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

/// `parseFloat`/`parseInt` read the longest numeric prefix.
pub fn parse_numeric_prefix(s: &str, integer: bool) -> f64 {
    let t = s.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in t.char_indices() {
        let ok = c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+')) || (!integer && c == '.' && !seen_dot);
        if !ok {
            break;
        }
        if c == '.' {
            seen_dot = true;
        }
        end = i + c.len_utf8();
    }
    let n = t[..end].parse::<f64>().unwrap_or(f64::NAN);
    if integer { n.trunc() } else { n }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typeof_matches_js() {
        assert_eq!(Value::Null.type_of(), "object");
        assert_eq!(Value::array(vec![]).type_of(), "object");
        assert_eq!(Value::Native(Native::ConsoleLog).type_of(), "function");
        assert_eq!(Value::str("x").type_of(), "string");
    }

    #[test]
    fn number_formatting() {
        assert_eq!(number_to_string(100.0), "100");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn console_rendering_uses_json_for_objects() {
        let arr = Value::array(vec![Value::str("Golden Scepter"), Value::Number(2.0), Value::Undefined]);
        assert_eq!(arr.to_console_string().unwrap(), r#"["Golden Scepter",2,null]"#);
        assert_eq!(Value::Null.to_console_string().unwrap(), "null");
        assert_eq!(Value::Bool(true).to_console_string().unwrap(), "true");
        let obj = Value::object(vec![("a".into(), Value::Number(1.0)), ("b".into(), Value::Undefined)]);
        assert_eq!(obj.to_json(&mut Vec::new()).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn detects_cycles() {
        let arr = Value::array(vec![]);
        if let Value::Array(inner) = &arr {
            inner.borrow_mut().push(arr.clone());
        }
        assert_eq!(arr.to_json(&mut Vec::new()), Err(CircularStructure));
    }

    #[test]
    fn equality_rules() {
        assert!(Value::Number(1.0).loose_equals(&Value::str("1")));
        assert!(!Value::Number(1.0).strict_equals(&Value::str("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        let a = Value::array(vec![]);
        assert!(a.strict_equals(&a.clone()));
        assert!(!a.strict_equals(&Value::array(vec![])));
    }

    #[test]
    fn numeric_conversions() {
        assert_eq!(Value::str(" 42 ").to_number(), 42.0);
        assert!(Value::str("4x").to_number().is_nan());
        assert_eq!(Value::str("").to_number(), 0.0);
        assert_eq!(parse_numeric_prefix("42px", true), 42.0);
        assert_eq!(parse_numeric_prefix("3.75 mana", false), 3.75);
        assert!(parse_numeric_prefix("mana", false).is_nan());
    }
}
