//! Tree-walking interpreter over the parsed program.

use std::collections::HashMap;

use tracing::{debug, instrument};

use super::parser::{parse_program, BinOp, Declarator, Expr, LogicOp, Pos, Stmt, TemplateSeg, UnaryOp};
use super::value::{join_items, number_to_string, parse_numeric_prefix, ArrayRef, CircularStructure, Native, Value};
use super::{Binding, Bindings, DeclKind, OutputSink, ScriptError, ScriptRuntime, DEFAULT_STEP_BUDGET};

const MAX_STRING_LEN: usize = 1 << 20;
const MAX_ARRAY_LEN: usize = 100_000;

/// The default `ScriptRuntime`: a fresh global scope per run, bounded by a step budget.
#[derive(Debug, Clone)]
pub struct Interpreter {
    step_budget: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self { step_budget: DEFAULT_STEP_BUDGET }
    }
}

impl Interpreter {
    pub fn with_step_budget(step_budget: u64) -> Self {
        Self { step_budget }
    }
}

impl ScriptRuntime for Interpreter {
    #[instrument(level = "debug", target = "evaluation", skip_all, fields(source_len = source.len()))]
    fn evaluate(&self, source: &str, output: &dyn OutputSink) -> Result<Bindings, ScriptError> {
        let program = parse_program(source)?;
        let mut run = Run::new(self.step_budget, output);
        run.exec_program(&program)?;
        debug!(target: "evaluation", steps = run.steps, "script finished");
        Ok(run.bindings())
    }
}

struct Slot {
    kind: DeclKind,
    /// `None` until the declaration runs (temporal dead zone).
    value: Option<Value>,
}

#[derive(Debug, Clone, Copy)]
enum Flow {
    Normal,
    Break(Pos),
    Continue(Pos),
}

enum Place {
    Var(String, Pos),
    Prop(Value, String, Pos),
    Elem(Value, Value, Pos),
}

struct Run<'o> {
    scopes: Vec<HashMap<String, Slot>>,
    output: &'o dyn OutputSink,
    steps: u64,
    budget: u64,
}

impl<'o> Run<'o> {
    fn new(budget: u64, output: &'o dyn OutputSink) -> Self {
        Self { scopes: vec![HashMap::new()], output, steps: 0, budget }
    }

    fn exec_program(&mut self, program: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in program {
            self.hoist_vars(stmt)?;
        }
        self.hoist_lexical(program)?;
        match self.exec_list(program)? {
            Flow::Normal => Ok(()),
            Flow::Break(pos) => Err(ScriptError::syntax("Illegal break statement", pos.line, pos.col)),
            Flow::Continue(pos) => Err(ScriptError::syntax(
                "Illegal continue statement: no surrounding iteration statement",
                pos.line,
                pos.col,
            )),
        }
    }

    fn bindings(&self) -> Bindings {
        let mut out = Bindings::new();
        for (name, slot) in &self.scopes[0] {
            if let Some(v) = &slot.value {
                let value = v.to_json(&mut Vec::new()).unwrap_or(serde_json::Value::Null);
                out.insert(name.clone(), Binding { kind: slot.kind, type_of: v.type_of(), value });
            }
        }
        out
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > self.budget {
            return Err(ScriptError::StepBudget { budget: self.budget });
        }
        Ok(())
    }

    // ---- declarations ----

    fn hoist_vars(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        match stmt {
            Stmt::Decl { kind: DeclKind::Var, decls } => {
                for d in decls {
                    match self.scopes[0].get(&d.name) {
                        Some(slot) if slot.kind != DeclKind::Var => return Err(redeclared(d)),
                        Some(_) => {}
                        None => {
                            self.scopes[0].insert(d.name.clone(), Slot { kind: DeclKind::Var, value: Some(Value::Undefined) });
                        }
                    }
                }
                Ok(())
            }
            Stmt::If { then, otherwise, .. } => {
                self.hoist_vars(then)?;
                if let Some(o) = otherwise {
                    self.hoist_vars(o)?;
                }
                Ok(())
            }
            Stmt::While { body, .. } => self.hoist_vars(body),
            Stmt::For { init, body, .. } => {
                if let Some(i) = init {
                    self.hoist_vars(i)?;
                }
                self.hoist_vars(body)
            }
            Stmt::Block(stmts) => stmts.iter().try_for_each(|s| self.hoist_vars(s)),
            _ => Ok(()),
        }
    }

    fn hoist_lexical(&mut self, stmts: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in stmts {
            if let Stmt::Decl { kind: kind @ (DeclKind::Let | DeclKind::Const), decls } = stmt {
                for d in decls {
                    let scope = self.current_scope();
                    if scope.contains_key(&d.name) {
                        return Err(redeclared(d));
                    }
                    scope.insert(d.name.clone(), Slot { kind: *kind, value: None });
                }
            }
        }
        Ok(())
    }

    fn current_scope(&mut self) -> &mut HashMap<String, Slot> {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ScriptError>) -> Result<T, ScriptError> {
        self.scopes.push(HashMap::new());
        let out = f(self);
        self.scopes.pop();
        out
    }

    // ---- statements ----

    fn exec_list(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Decl { kind, decls } => {
                for d in decls {
                    self.exec_declarator(*kind, d)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(e) => {
                self.eval(e)?;
                Ok(Flow::Normal)
            }
            Stmt::If { test, then, otherwise } => {
                if self.eval(test)?.truthy() {
                    self.exec_stmt(then)
                } else if let Some(o) = otherwise {
                    self.exec_stmt(o)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(test)?.truthy() {
                        break;
                    }
                    if let Flow::Break(_) = self.exec_stmt(body)? {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { init, test, update, body } => self.scoped(|run| {
                if let Some(init) = init {
                    if let Stmt::Decl { .. } = init.as_ref() {
                        run.hoist_lexical(std::slice::from_ref(init.as_ref()))?;
                    }
                    run.exec_stmt(init)?;
                }
                loop {
                    run.tick()?;
                    if let Some(t) = test {
                        if !run.eval(t)?.truthy() {
                            break;
                        }
                    }
                    if let Flow::Break(_) = run.exec_stmt(body)? {
                        break;
                    }
                    if let Some(u) = update {
                        run.eval(u)?;
                    }
                }
                Ok(Flow::Normal)
            }),
            Stmt::Block(stmts) => self.scoped(|run| {
                run.hoist_lexical(stmts)?;
                run.exec_list(stmts)
            }),
            Stmt::Throw(e, pos) => {
                let raised = self.eval(e)?;
                let message = match &raised {
                    Value::Object(_) => get_property(&raised, "message", *pos)?.to_js_string(),
                    other => other.to_js_string(),
                };
                Err(ScriptError::Thrown { message, line: pos.line, col: pos.col })
            }
            Stmt::Break(pos) => Ok(Flow::Break(*pos)),
            Stmt::Continue(pos) => Ok(Flow::Continue(*pos)),
            Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_declarator(&mut self, kind: DeclKind, d: &Declarator) -> Result<(), ScriptError> {
        match kind {
            DeclKind::Var => {
                if let Some(init) = &d.init {
                    let v = self.eval(init)?;
                    self.scopes[0].insert(d.name.clone(), Slot { kind, value: Some(v) });
                }
            }
            DeclKind::Let | DeclKind::Const => {
                let v = match &d.init {
                    Some(init) => self.eval(init)?,
                    None => Value::Undefined,
                };
                self.current_scope().insert(d.name.clone(), Slot { kind, value: Some(v) });
            }
        }
        Ok(())
    }

    // ---- expressions ----

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::str(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(segs) => {
                let mut out = String::new();
                for seg in segs {
                    match seg {
                        TemplateSeg::Text(t) => out.push_str(t),
                        TemplateSeg::Expr(e) => out.push_str(&self.eval(e)?.to_js_string()),
                    }
                }
                checked_string(out)
            }
            Expr::Array(items) => {
                let values = items.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::array(values))
            }
            Expr::Object(props) => {
                let mut out: Vec<(String, Value)> = Vec::with_capacity(props.len());
                for (k, e) in props {
                    let v = self.eval(e)?;
                    match out.iter_mut().find(|(key, _)| key == k) {
                        Some(slot) => slot.1 = v,
                        None => out.push((k.clone(), v)),
                    }
                }
                Ok(Value::object(out))
            }
            Expr::Ident(name, pos) => self.lookup(name, *pos),
            Expr::Member { object, property, pos } => {
                let obj = self.eval(object)?;
                get_property(&obj, property, *pos)
            }
            Expr::Index { object, index, pos } => {
                let obj = self.eval(object)?;
                let key = self.eval(index)?;
                get_element(&obj, &key, *pos)
            }
            Expr::Call { callee, args, pos } => self.eval_call(callee, args, *pos),
            Expr::Unary { op, operand, pos } => self.eval_unary(*op, operand, *pos),
            Expr::Binary { op, lhs, rhs, pos } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary(*op, &l, &r, *pos)
            }
            Expr::Logical { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                match (op, l.truthy()) {
                    (LogicOp::And, false) | (LogicOp::Or, true) => Ok(l),
                    _ => self.eval(rhs),
                }
            }
            Expr::Conditional { test, then, otherwise } => {
                if self.eval(test)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Assign { op, target, value, pos } => {
                let place = self.resolve_place(target)?;
                let v = match op {
                    None => self.eval(value)?,
                    Some(op) => {
                        let current = self.read_place(&place)?;
                        let rhs = self.eval(value)?;
                        binary(*op, &current, &rhs, *pos)?
                    }
                };
                self.write_place(&place, v.clone())?;
                Ok(v)
            }
            Expr::Update { increment, prefix, target, .. } => {
                let place = self.resolve_place(target)?;
                let old = self.read_place(&place)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_place(&place, Value::Number(new))?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, _pos: Pos) -> Result<Value, ScriptError> {
        if op == UnaryOp::TypeOf {
            if let Expr::Ident(name, _) = operand {
                if self.find_slot(name).is_none() && global(name).is_none() {
                    return Ok(Value::str("undefined"));
                }
            }
            return Ok(Value::str(self.eval(operand)?.type_of()));
        }
        let v = self.eval(operand)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!v.truthy()),
            UnaryOp::Neg => Value::Number(-v.to_number()),
            UnaryOp::Plus | UnaryOp::TypeOf => Value::Number(v.to_number()),
        })
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], pos: Pos) -> Result<Value, ScriptError> {
        if let Expr::Member { object, property, .. } = callee {
            let recv = self.eval(object)?;
            let args = self.eval_args(args)?;
            return self.call_method(&recv, property, args, pos, &describe(object));
        }
        let f = self.eval(callee)?;
        let args = self.eval_args(args)?;
        match f {
            Value::Native(n) => self.call_native(n, args, pos),
            _ => Err(type_error(format!("{} is not a function", describe(callee)), pos)),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn call_method(&mut self, recv: &Value, name: &str, args: Vec<Value>, pos: Pos, recv_desc: &str) -> Result<Value, ScriptError> {
        let not_a_function = || type_error(format!("{recv_desc}.{name} is not a function"), pos);
        match recv {
            Value::Object(_) => match get_property(recv, name, pos)? {
                Value::Native(n) => self.call_native(n, args, pos),
                _ => Err(not_a_function()),
            },
            Value::Array(items) => array_method(items, name, args).unwrap_or_else(|| Err(not_a_function())),
            Value::Str(s) => string_method(s, name, &args).unwrap_or_else(|| Err(not_a_function())),
            Value::Number(n) if name == "toFixed" => {
                let digits = args.first().map(|d| d.to_number()).unwrap_or(0.0);
                if !(0.0..=100.0).contains(&digits) {
                    return Err(ScriptError::Range { message: "toFixed() digits argument must be between 0 and 100".into() });
                }
                Ok(Value::str(format!("{:.*}", digits as usize, n)))
            }
            Value::Number(_) | Value::Bool(_) if name == "toString" => Ok(Value::str(recv.to_js_string())),
            Value::Undefined | Value::Null => Err(type_error(
                format!("Cannot read properties of {} (reading '{name}')", recv.to_js_string()),
                pos,
            )),
            _ => Err(not_a_function()),
        }
    }

    fn call_native(&mut self, f: Native, args: Vec<Value>, pos: Pos) -> Result<Value, ScriptError> {
        let first = args.first().cloned().unwrap_or(Value::Undefined);
        let num = |v: &Value| Value::Number(v.to_number());
        Ok(match f {
            Native::ConsoleLog => {
                let parts = args
                    .iter()
                    .map(|a| a.to_console_string())
                    .collect::<Result<Vec<_>, CircularStructure>>()
                    .map_err(|_| type_error("Converting circular structure to JSON", pos))?;
                self.output.write_line(parts.join(" "));
                Value::Undefined
            }
            Native::MathMax => Value::Number(args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, js_max)),
            Native::MathMin => Value::Number(args.iter().map(Value::to_number).fold(f64::INFINITY, js_min)),
            Native::MathFloor => Value::Number(first.to_number().floor()),
            Native::MathCeil => Value::Number(first.to_number().ceil()),
            Native::MathRound => Value::Number((first.to_number() + 0.5).floor()),
            Native::MathAbs => Value::Number(first.to_number().abs()),
            Native::MathSqrt => Value::Number(first.to_number().sqrt()),
            Native::StringFn => Value::str(if args.is_empty() { String::new() } else { first.to_js_string() }),
            Native::NumberFn => {
                if args.is_empty() { Value::Number(0.0) } else { num(&first) }
            }
            Native::BooleanFn => Value::Bool(first.truthy()),
            Native::ParseInt => Value::Number(parse_numeric_prefix(&first.to_js_string(), true)),
            Native::ParseFloat => Value::Number(parse_numeric_prefix(&first.to_js_string(), false)),
            Native::IsArray => Value::Bool(matches!(first, Value::Array(_))),
            Native::ErrorCtor => {
                let message = if matches!(first, Value::Undefined) { String::new() } else { first.to_js_string() };
                Value::object(vec![("name".into(), Value::str("Error")), ("message".into(), Value::str(message))])
            }
        })
    }

    // ---- names and places ----

    fn find_slot(&self, name: &str) -> Option<&Slot> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn find_slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(name))
    }

    fn lookup(&self, name: &str, pos: Pos) -> Result<Value, ScriptError> {
        match self.find_slot(name) {
            Some(Slot { value: Some(v), .. }) => Ok(v.clone()),
            Some(Slot { value: None, .. }) => Err(reference_error(format!("Cannot access '{name}' before initialization"), pos)),
            None => global(name).ok_or_else(|| reference_error(format!("{name} is not defined"), pos)),
        }
    }

    fn resolve_place(&mut self, target: &Expr) -> Result<Place, ScriptError> {
        match target {
            Expr::Ident(name, pos) => Ok(Place::Var(name.clone(), *pos)),
            Expr::Member { object, property, pos } => Ok(Place::Prop(self.eval(object)?, property.clone(), *pos)),
            Expr::Index { object, index, pos } => {
                let obj = self.eval(object)?;
                let key = self.eval(index)?;
                Ok(Place::Elem(obj, key, *pos))
            }
            _ => Err(ScriptError::syntax("Invalid left-hand side in assignment", 0, 0)),
        }
    }

    fn read_place(&self, place: &Place) -> Result<Value, ScriptError> {
        match place {
            Place::Var(name, pos) => self.lookup(name, *pos),
            Place::Prop(obj, key, pos) => get_property(obj, key, *pos),
            Place::Elem(obj, key, pos) => get_element(obj, key, *pos),
        }
    }

    fn write_place(&mut self, place: &Place, v: Value) -> Result<(), ScriptError> {
        match place {
            Place::Var(name, pos) => match self.find_slot_mut(name) {
                Some(Slot { kind: DeclKind::Const, value: Some(_) }) => {
                    Err(type_error("Assignment to constant variable.", *pos))
                }
                Some(Slot { value: None, .. }) => {
                    Err(reference_error(format!("Cannot access '{name}' before initialization"), *pos))
                }
                Some(slot) => {
                    slot.value = Some(v);
                    Ok(())
                }
                None => Err(reference_error(format!("{name} is not defined"), *pos)),
            },
            Place::Prop(obj, key, pos) => set_property(obj, key, v, *pos),
            Place::Elem(obj, key, pos) => match (obj, array_index(key)) {
                (Value::Array(items), Some(i)) => {
                    if i >= MAX_ARRAY_LEN {
                        return Err(ScriptError::Range { message: "Invalid array length".into() });
                    }
                    let mut items = items.borrow_mut();
                    if i >= items.len() {
                        items.resize(i + 1, Value::Undefined);
                    }
                    items[i] = v;
                    Ok(())
                }
                _ => set_property(obj, &key.to_js_string(), v, *pos),
            },
        }
    }
}

fn global(name: &str) -> Option<Value> {
    let f = |n: Native| Value::Native(n);
    Some(match name {
        "console" => Value::object(
            ["log", "info", "warn", "error", "debug"]
                .into_iter()
                .map(|k| (k.to_string(), f(Native::ConsoleLog)))
                .collect(),
        ),
        "Math" => Value::object(vec![
            ("max".into(), f(Native::MathMax)),
            ("min".into(), f(Native::MathMin)),
            ("floor".into(), f(Native::MathFloor)),
            ("ceil".into(), f(Native::MathCeil)),
            ("round".into(), f(Native::MathRound)),
            ("abs".into(), f(Native::MathAbs)),
            ("sqrt".into(), f(Native::MathSqrt)),
            ("PI".into(), Value::Number(std::f64::consts::PI)),
        ]),
        "Array" => Value::object(vec![("isArray".into(), f(Native::IsArray))]),
        "String" => f(Native::StringFn),
        "Number" => f(Native::NumberFn),
        "Boolean" => f(Native::BooleanFn),
        "parseInt" => f(Native::ParseInt),
        "parseFloat" => f(Native::ParseFloat),
        "Error" => f(Native::ErrorCtor),
        "Infinity" => Value::Number(f64::INFINITY),
        "NaN" => Value::Number(f64::NAN),
        _ => return None,
    })
}

fn get_property(obj: &Value, key: &str, pos: Pos) -> Result<Value, ScriptError> {
    Ok(match obj {
        Value::Undefined | Value::Null => {
            return Err(type_error(
                format!("Cannot read properties of {} (reading '{key}')", obj.to_js_string()),
                pos,
            ))
        }
        Value::Str(s) if key == "length" => Value::Number(s.encode_utf16().count() as f64),
        Value::Str(s) => match key.parse::<usize>() {
            Ok(i) => s.chars().nth(i).map(|c| Value::str(c.to_string())).unwrap_or(Value::Undefined),
            Err(_) => Value::Undefined,
        },
        Value::Array(items) if key == "length" => Value::Number(items.borrow().len() as f64),
        Value::Array(items) => match key.parse::<usize>() {
            Ok(i) => items.borrow().get(i).cloned().unwrap_or(Value::Undefined),
            Err(_) => Value::Undefined,
        },
        Value::Object(props) => props
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Undefined),
        Value::Bool(_) | Value::Number(_) | Value::Native(_) => Value::Undefined,
    })
}

fn get_element(obj: &Value, key: &Value, pos: Pos) -> Result<Value, ScriptError> {
    if let (Value::Array(items), Some(i)) = (obj, array_index(key)) {
        return Ok(items.borrow().get(i).cloned().unwrap_or(Value::Undefined));
    }
    get_property(obj, &key.to_js_string(), pos)
}

fn set_property(obj: &Value, key: &str, v: Value, pos: Pos) -> Result<(), ScriptError> {
    match obj {
        Value::Object(props) => {
            let mut props = props.borrow_mut();
            match props.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = v,
                None => props.push((key.to_string(), v)),
            }
            Ok(())
        }
        Value::Array(items) if key == "length" => {
            let n = v.to_number();
            if n < 0.0 || n.fract() != 0.0 || n as usize > MAX_ARRAY_LEN {
                return Err(ScriptError::Range { message: "Invalid array length".into() });
            }
            items.borrow_mut().resize(n as usize, Value::Undefined);
            Ok(())
        }
        Value::Undefined | Value::Null => Err(type_error(
            format!("Cannot set properties of {} (setting '{key}')", obj.to_js_string()),
            pos,
        )),
        // Writes to primitives are silently dropped.
        _ => Ok(()),
    }
}

fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        Value::Str(s) => s.parse::<usize>().ok(),
        _ => None,
    }
}

fn array_method(items: &ArrayRef, name: &str, args: Vec<Value>) -> Option<Result<Value, ScriptError>> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
    let len = items.borrow().len();
    let rel = |v: Value, default: usize| -> usize {
        if let Value::Undefined = v {
            return default;
        }
        let n = v.to_number();
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        if n < 0.0 { (len as f64 + n).max(0.0) as usize } else { (n as usize).min(len) }
    };
    Some(Ok(match name {
        "push" => {
            let mut items = items.borrow_mut();
            if items.len() + args.len() > MAX_ARRAY_LEN {
                return Some(Err(ScriptError::Range { message: "Invalid array length".into() }));
            }
            items.extend(args);
            Value::Number(items.len() as f64)
        }
        "pop" => items.borrow_mut().pop().unwrap_or(Value::Undefined),
        "shift" => {
            let mut items = items.borrow_mut();
            if items.is_empty() { Value::Undefined } else { items.remove(0) }
        }
        "unshift" => {
            let mut items = items.borrow_mut();
            if items.len() + args.len() > MAX_ARRAY_LEN {
                return Some(Err(ScriptError::Range { message: "Invalid array length".into() }));
            }
            items.splice(0..0, args);
            Value::Number(items.len() as f64)
        }
        "includes" => {
            let needle = arg(0);
            let found = items.borrow().iter().any(|v| match (v, &needle) {
                (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
                _ => v.strict_equals(&needle),
            });
            Value::Bool(found)
        }
        "indexOf" => {
            let needle = arg(0);
            let idx = items.borrow().iter().position(|v| v.strict_equals(&needle));
            Value::Number(idx.map(|i| i as f64).unwrap_or(-1.0))
        }
        "join" => {
            let sep = match arg(0) {
                Value::Undefined => ",".to_string(),
                other => other.to_js_string(),
            };
            let joined = join_items(&items.borrow(), &sep);
            return Some(checked_string(joined));
        }
        "slice" => {
            let start = rel(arg(0), 0);
            let end = rel(arg(1), len);
            let out = if start < end { items.borrow()[start..end].to_vec() } else { Vec::new() };
            Value::array(out)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Value::Array(items.clone())
        }
        "toString" => Value::str(join_items(&items.borrow(), ",")),
        "at" => {
            let n = arg(0).to_number().trunc();
            let i = if n < 0.0 { len as f64 + n } else { n };
            if i < 0.0 { Value::Undefined } else { items.borrow().get(i as usize).cloned().unwrap_or(Value::Undefined) }
        }
        _ => return None,
    }))
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Option<Result<Value, ScriptError>> {
    let arg_str = |i: usize| args.get(i).map(Value::to_js_string).unwrap_or_else(|| "undefined".into());
    Some(Ok(match name {
        "toUpperCase" => Value::str(s.to_uppercase()),
        "toLowerCase" => Value::str(s.to_lowercase()),
        "trim" => Value::str(s.trim()),
        "includes" => Value::Bool(s.contains(arg_str(0).as_str())),
        "startsWith" => Value::Bool(s.starts_with(arg_str(0).as_str())),
        "endsWith" => Value::Bool(s.ends_with(arg_str(0).as_str())),
        "indexOf" => {
            let needle = arg_str(0);
            Value::Number(s.find(needle.as_str()).map(|b| s[..b].chars().count() as f64).unwrap_or(-1.0))
        }
        "charAt" => {
            let i = args.first().map(Value::to_number).unwrap_or(0.0);
            let c = if i >= 0.0 { s.chars().nth(i as usize) } else { None };
            Value::str(c.map(|c| c.to_string()).unwrap_or_default())
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::str(s)],
                Some(sep) => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::str).collect()
                    }
                }
            };
            Value::array(parts)
        }
        "repeat" => {
            let n = args.first().map(Value::to_number).unwrap_or(0.0);
            if n < 0.0 || n.is_infinite() {
                return Some(Err(ScriptError::Range { message: format!("Invalid count value: {}", number_to_string(n)) }));
            }
            if s.len().saturating_mul(n as usize) > MAX_STRING_LEN {
                return Some(Err(ScriptError::Range { message: "Invalid string length".into() }));
            }
            Value::str(s.repeat(n as usize))
        }
        "toString" => Value::str(s),
        _ => return None,
    }))
}

fn binary(op: BinOp, l: &Value, r: &Value, _pos: Pos) -> Result<Value, ScriptError> {
    let num = |f: fn(f64, f64) -> f64| Value::Number(f(l.to_number(), r.to_number()));
    Ok(match op {
        BinOp::Add => {
            let stringy = |v: &Value| matches!(v, Value::Str(_) | Value::Array(_) | Value::Object(_) | Value::Native(_));
            if stringy(l) || stringy(r) {
                return checked_string(l.to_js_string() + &r.to_js_string());
            }
            num(|a, b| a + b)
        }
        BinOp::Sub => num(|a, b| a - b),
        BinOp::Mul => num(|a, b| a * b),
        BinOp::Div => num(|a, b| a / b),
        BinOp::Rem => num(|a, b| a % b),
        BinOp::Pow => num(f64::powf),
        BinOp::StrictEq => Value::Bool(l.strict_equals(r)),
        BinOp::StrictNotEq => Value::Bool(!l.strict_equals(r)),
        BinOp::Eq => Value::Bool(l.loose_equals(r)),
        BinOp::NotEq => Value::Bool(!l.loose_equals(r)),
        BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
            let ord = match (l, r) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            let Some(ord) = ord else { return Ok(Value::Bool(false)) };
            Value::Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::LtEq => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
    })
}

fn js_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
}

fn js_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
}

fn checked_string(s: String) -> Result<Value, ScriptError> {
    if s.len() > MAX_STRING_LEN {
        return Err(ScriptError::Range { message: "Invalid string length".into() });
    }
    Ok(Value::str(s))
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name, _) => name.clone(),
        Expr::Member { object, property, .. } => format!("{}.{property}", describe(object)),
        Expr::Index { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".into(),
    }
}

fn redeclared(d: &Declarator) -> ScriptError {
    ScriptError::syntax(format!("Identifier '{}' has already been declared", d.name), d.pos.line, d.pos.col)
}

fn type_error(message: impl Into<String>, pos: Pos) -> ScriptError {
    ScriptError::Type { message: message.into(), line: pos.line, col: pos.col }
}

fn reference_error(message: impl Into<String>, pos: Pos) -> ScriptError {
    ScriptError::Reference { message: message.into(), line: pos.line, col: pos.col }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::testing::VecSink;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(src: &str) -> Result<(Bindings, Vec<String>), ScriptError> {
        let sink = VecSink::default();
        let b = Interpreter::default().evaluate(src, &sink)?;
        Ok((b, sink.lines()))
    }

    fn value_of(src: &str, name: &str) -> serde_json::Value {
        run(src).unwrap().0[name].value.clone()
    }

    #[test]
    fn reads_back_top_level_bindings() {
        let (b, _) = run("let questName = 'The Lost Artifact';\nconst maxMana = 100;").unwrap();
        assert_eq!(b["questName"].type_of, "string");
        assert_eq!(b["questName"].value, json!("The Lost Artifact"));
        assert_eq!(b["maxMana"].kind, DeclKind::Const);
        assert_eq!(b["maxMana"].value, json!(100));
    }

    #[test]
    fn const_arrays_can_grow() {
        let src = "const heistBag = [];\nheistBag.push('Golden Scepter');\nheistBag.push(\"Dragon's Eye Orb\");";
        assert_eq!(value_of(src, "heistBag"), json!(["Golden Scepter", "Dragon's Eye Orb"]));
    }

    #[test]
    fn console_output_keeps_program_order() {
        let (_, out) = run("console.log('a', 1);\nlet xs = [1, 2];\nconsole.log(xs, {k: true}, null);\nconsole.warn(`n=${xs.length}`);").unwrap();
        assert_eq!(out, vec!["a 1", r#"[1,2] {"k":true} null"#, "n=2"]);
    }

    #[test]
    fn control_flow_and_operators() {
        let src = r#"
            let total = 0;
            for (let i = 1; i <= 10; i++) {
                if (i % 2 === 0) continue;
                if (i > 7) break;
                total += i;
            }
            let n = 3;
            let label = n > 2 ? "big" : "small";
            var w = 0;
            while (w < 5) { w = w + 2; }
            let s = "x" + 1 + 2;
            let t = 1 + 2 + "x";
        "#;
        let (b, _) = run(src).unwrap();
        assert_eq!(b["total"].value, json!(16));
        assert_eq!(b["label"].value, json!("big"));
        assert_eq!(b["w"].value, json!(6));
        assert_eq!(b["s"].value, json!("x12"));
        assert_eq!(b["t"].value, json!("3x"));
        assert!(!b.contains_key("i"));
    }

    #[test]
    fn block_scoping_hides_inner_lets() {
        let (b, _) = run("let a = 1; { let a = 2; var v = a; }").unwrap();
        assert_eq!(b["a"].value, json!(1));
        assert_eq!(b["v"].value, json!(2));
    }

    #[test]
    fn js_error_messages() {
        assert_eq!(run("questName = 'x';").unwrap_err().message(), "questName is not defined");
        assert_eq!(run("const a = 1; a = 2;").unwrap_err().message(), "Assignment to constant variable.");
        assert_eq!(run("let a = 1; let a = 2;").unwrap_err().message(), "Identifier 'a' has already been declared");
        assert_eq!(run("console.log(x); let x = 1;").unwrap_err().message(), "Cannot access 'x' before initialization");
        assert_eq!(run("let o = {}; o.fly();").unwrap_err().message(), "o.fly is not a function");
        assert_eq!(run("let u; u.length;").unwrap_err().message(), "Cannot read properties of undefined (reading 'length')");
        assert!(matches!(run("let a = ;"), Err(ScriptError::Syntax { .. })));
    }

    #[test]
    fn thrown_errors_carry_their_message() {
        let err = run("let a = 1;\nthrow new Error(\"boom\");").unwrap_err();
        assert_eq!(err.message(), "boom");
        assert_eq!(err.position(), Some((2, 1)));
        assert_eq!(run("throw 'plain';").unwrap_err().message(), "plain");
    }

    #[test]
    fn typeof_tolerates_undeclared_names() {
        let (b, _) = run("let t = typeof ghost; let u = typeof [];").unwrap();
        assert_eq!(b["t"].value, json!("undefined"));
        assert_eq!(b["u"].value, json!("object"));
    }

    #[test]
    fn runaway_loops_hit_the_budget() {
        let sink = VecSink::default();
        let err = Interpreter::with_step_budget(1_000).evaluate("while (true) {}", &sink).unwrap_err();
        assert_eq!(err, ScriptError::StepBudget { budget: 1_000 });
    }

    #[test]
    fn wide_expressions_fail_instead_of_overflowing() {
        let src = format!("let questName = {}1;", "1+".repeat(200_000));
        assert!(matches!(run(&src), Err(ScriptError::Syntax { .. })));
        let src = format!("let p = {}2;", "2 ** ".repeat(200_000));
        assert!(matches!(run(&src), Err(ScriptError::Syntax { .. })));
        assert_eq!(value_of(&format!("let total = {}1;", "1 + ".repeat(59)), "total"), json!(60));
    }

    #[test]
    fn string_growth_is_bounded() {
        let err = run("let s = 'xx'; for (let i = 0; i < 40; i++) { s += s; }").unwrap_err();
        assert!(matches!(err, ScriptError::Range { .. }));
    }

    #[test]
    fn builtins() {
        let src = r#"
            let big = Math.max(3, 9, 4);
            let up = "mana".toUpperCase();
            let parts = "a,b".split(",");
            let has = [1, 2, 3].includes(2);
            let n = Number("42") + parseInt("8px");
            let joined = ["x", "y"].join("-");
            let fixed = (2.5).toFixed(2);
        "#;
        let (b, _) = run(src).unwrap();
        assert_eq!(b["big"].value, json!(9));
        assert_eq!(b["up"].value, json!("MANA"));
        assert_eq!(b["parts"].value, json!(["a", "b"]));
        assert_eq!(b["has"].value, json!(true));
        assert_eq!(b["n"].value, json!(50));
        assert_eq!(b["joined"].value, json!("x-y"));
        assert_eq!(b["fixed"].value, json!("2.50"));
    }

    #[test]
    fn var_redeclaration_is_allowed_but_not_over_let() {
        assert_eq!(value_of("var a = 1; var a = 2;", "a"), json!(2));
        assert!(run("let a = 1; var a = 2;").is_err());
    }
}
