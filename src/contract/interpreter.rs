//! Tree-walking evaluator for parsed contracts.
//!
//! Values are plain `serde_json::Value`s so that contract state can be stored
//! and returned without conversion. Integer arithmetic is checked; mixing an
//! integer with a float promotes to float.

use super::parser::{BinOp, Expr, Program, Stmt, StmtKind, UnaryOp};
use super::sandbox::LedgerReader;
use chrono::Utc;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Longest string a contract may build.
pub const MAX_STRING_BYTES: usize = 64 * 1024;
/// Longest list a contract may build.
pub const MAX_LIST_LEN: usize = 10_000;
/// Deepest nesting of lists and maps a contract may build.
pub const MAX_VALUE_DEPTH: usize = 64;

const RESERVED: &[&str] = &[
    "blockchain",
    "params",
    "state",
    "sender",
    "now",
    "len",
    "str",
    "num",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExecError {
    /// The watchdog raised the interrupt flag or the deadline passed.
    Interrupted,
    Fault(String),
}

impl ExecError {
    fn at(self, line: usize) -> Self {
        match self {
            ExecError::Fault(msg) => ExecError::Fault(format!("line {}: {}", line, msg)),
            other => other,
        }
    }
}

fn fault<T>(message: impl Into<String>) -> Result<T, ExecError> {
    Err(ExecError::Fault(message.into()))
}

type Eval<T> = Result<T, ExecError>;

/// Final state and the value bound to `result`, if any.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Completed {
    pub state: Map<String, Value>,
    pub result: Option<Value>,
}

pub(crate) struct Interpreter<'a> {
    ledger: &'a dyn LedgerReader,
    params: Value,
    sender: Value,
    state: Value,
    locals: HashMap<String, Value>,
    interrupt: &'a AtomicBool,
    deadline: Instant,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        ledger: &'a dyn LedgerReader,
        params: Map<String, Value>,
        state: Map<String, Value>,
        interrupt: &'a AtomicBool,
        deadline: Instant,
    ) -> Self {
        let sender = params.get("sender").cloned().unwrap_or(Value::Null);
        Self {
            ledger,
            params: Value::Object(params),
            sender,
            state: Value::Object(state),
            locals: HashMap::new(),
            interrupt,
            deadline,
        }
    }

    pub fn run(mut self, program: &Program) -> Eval<Completed> {
        self.exec_block(&program.body)?;
        let state = match self.state {
            Value::Object(map) => map,
            _ => return fault("state was replaced by a non-mapping value"),
        };
        Ok(Completed {
            state,
            result: self.locals.remove("result"),
        })
    }

    fn tick(&self) -> Eval<()> {
        if self.interrupt.load(Ordering::Relaxed) || Instant::now() >= self.deadline {
            return Err(ExecError::Interrupted);
        }
        Ok(())
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Eval<()> {
        for stmt in body {
            self.exec(stmt)?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> Eval<()> {
        self.tick()?;
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Pass => Ok(()),
            StmtKind::Expr(expr) => self.eval(expr).map(drop).map_err(|e| e.at(line)),
            StmtKind::Assign { target, value } => {
                let value = self.eval(value).map_err(|e| e.at(line))?;
                self.assign(target, value).map_err(|e| e.at(line))
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if truthy(&self.eval(cond).map_err(|e| e.at(line))?) {
                    self.exec_block(then_branch)
                } else {
                    self.exec_block(else_branch)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    self.tick()?;
                    if !truthy(&self.eval(cond).map_err(|e| e.at(line))?) {
                        return Ok(());
                    }
                    self.exec_block(body)?;
                }
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Eval<()> {
        let mut keys = Vec::new();
        let mut root = target;
        while let Expr::Index(base, key) = root {
            keys.push(self.eval(key)?);
            root = base;
        }
        keys.reverse();

        let name = match root {
            Expr::Name(name) => name,
            _ => return fault("invalid assignment target"),
        };
        let slot = if keys.is_empty() {
            if RESERVED.contains(&name.as_str()) {
                return fault(format!("'{}' is reserved and cannot be rebound", name));
            }
            self.locals.insert(name.clone(), value);
            return Ok(());
        } else {
            match name.as_str() {
                "state" => &mut self.state,
                "params" | "sender" => return fault(format!("'{}' is read-only", name)),
                other => match self.locals.get_mut(other) {
                    Some(slot) => slot,
                    None => return fault(format!("name '{}' is not defined", other)),
                },
            }
        };

        check_depth(&value, keys.len())?;
        let (last, path) = match keys.split_last() {
            Some(split) => split,
            None => return fault("invalid assignment target"),
        };
        let mut container = slot;
        for key in path {
            container = index_mut(container, key)?;
        }
        store(container, last, value)
    }

    fn lookup(&self, name: &str) -> Eval<&Value> {
        match name {
            "params" => Ok(&self.params),
            "state" => Ok(&self.state),
            "sender" => Ok(&self.sender),
            "blockchain" | "now" | "len" | "str" | "num" => {
                fault(format!("'{}' can only be called", name))
            }
            other => match self.locals.get(other) {
                Some(value) => Ok(value),
                None => fault(format!("name '{}' is not defined", other)),
            },
        }
    }

    fn eval(&self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self.lookup(name).cloned(),
            Expr::List(items) => {
                if items.len() > MAX_LIST_LEN {
                    return fault("list too long");
                }
                let items = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Eval<Vec<_>>>()?;
                let list = Value::Array(items);
                check_depth(&list, 0)?;
                Ok(list)
            }
            Expr::Index(base, key) => {
                let key = self.eval(key)?;
                match base.as_ref() {
                    Expr::Name(name) => index(self.lookup(name)?, &key),
                    other => index(&self.eval(other)?, &key),
                }
            }
            Expr::Attr(_, name) => fault(format!("attribute '{}' must be called", name)),
            Expr::Call(callee, args) => self.call(callee, args),
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => match Num::of(&value) {
                        Some(Num::Int(i)) => match i.checked_neg() {
                            Some(n) => Ok(Value::from(n)),
                            None => fault("integer overflow"),
                        },
                        Some(Num::Float(f)) => float(-f),
                        None => fault(format!("cannot negate {}", type_name(&value))),
                    },
                }
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                let left = self.eval(lhs)?;
                if truthy(&left) {
                    self.eval(rhs)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                let left = self.eval(lhs)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                binary(*op, &left, &right)
            }
        }
    }

    fn call(&self, callee: &Expr, args: &[Expr]) -> Eval<Value> {
        let args = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Eval<Vec<_>>>()?;

        match callee {
            Expr::Name(name) => match (name.as_str(), args.as_slice()) {
                ("now", []) => float(Utc::now().timestamp_micros() as f64 / 1e6),
                ("len", [value]) => match value {
                    Value::String(s) => Ok(Value::from(s.chars().count())),
                    Value::Array(items) => Ok(Value::from(items.len())),
                    Value::Object(map) => Ok(Value::from(map.len())),
                    other => fault(format!("{} has no length", type_name(other))),
                },
                ("str", [value]) => {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    check_len(text).map(Value::String)
                }
                ("num", [value]) => to_number(value),
                ("now" | "len" | "str" | "num", _) => {
                    fault(format!("wrong number of arguments to {}()", name))
                }
                _ => fault(format!("'{}' is not callable", name)),
            },
            Expr::Attr(object, method) => {
                if matches!(object.as_ref(), Expr::Name(n) if n == "blockchain") {
                    return self.ledger_call(method, &args);
                }
                let target = self.eval(object)?;
                match (method.as_str(), &target, args.as_slice()) {
                    ("get", Value::Object(map), [key]) => Ok(lookup_key(map, key)?
                        .cloned()
                        .unwrap_or(Value::Null)),
                    ("get", Value::Object(map), [key, default]) => {
                        Ok(lookup_key(map, key)?.cloned().unwrap_or_else(|| default.clone()))
                    }
                    _ => fault(format!(
                        "{} has no method '{}' taking {} argument(s)",
                        type_name(&target),
                        method,
                        args.len()
                    )),
                }
            }
            _ => fault("expression is not callable"),
        }
    }

    fn ledger_call(&self, method: &str, args: &[Value]) -> Eval<Value> {
        match (method, args) {
            ("get_balance", [Value::String(address)]) => float(self.ledger.get_balance(address)),
            ("get_balance", [other]) => fault(format!(
                "get_balance expects an address string, got {}",
                type_name(other)
            )),
            ("get_block_number", []) => Ok(Value::from(self.ledger.get_block_number())),
            _ => fault(format!("blockchain has no method '{}'", method)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        let n = match value {
            Value::Number(n) => n,
            _ => return None,
        };
        match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn float(f: f64) -> Eval<Value> {
    match Number::from_f64(f) {
        Some(n) => Ok(Value::Number(n)),
        None => fault("arithmetic produced a non-finite number"),
    }
}

fn int(result: Option<i64>) -> Eval<Value> {
    match result {
        Some(n) => Ok(Value::from(n)),
        None => fault("integer overflow"),
    }
}

/// Fault if `value` stored `offset` levels down would nest past
/// [`MAX_VALUE_DEPTH`].
fn check_depth(value: &Value, offset: usize) -> Eval<()> {
    if offset + depth(value) > MAX_VALUE_DEPTH {
        return fault("value nested too deeply");
    }
    Ok(())
}

fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn check_len(s: String) -> Eval<String> {
    if s.len() > MAX_STRING_BYTES {
        return fault("string too long");
    }
    Ok(s)
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn to_number(value: &Value) -> Eval<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::from(*b as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(Value::from(i))
            } else if let Ok(f) = s.parse::<f64>() {
                float(f)
            } else {
                fault(format!("cannot convert '{}' to a number", s))
            }
        }
        other => fault(format!("cannot convert {} to a number", type_name(other))),
    }
}

fn lookup_key<'v>(map: &'v Map<String, Value>, key: &Value) -> Eval<Option<&'v Value>> {
    match key {
        Value::String(k) => Ok(map.get(k)),
        other => fault(format!("mapping keys must be strings, got {}", type_name(other))),
    }
}

fn list_position(len: usize, key: &Value) -> Eval<usize> {
    let i = match Num::of(key) {
        Some(Num::Int(i)) => i,
        _ => return fault(format!("list indices must be integers, got {}", type_name(key))),
    };
    let pos = if i < 0 { i + len as i64 } else { i };
    if pos < 0 || pos >= len as i64 {
        return fault(format!("list index {} out of range", i));
    }
    Ok(pos as usize)
}

fn index(container: &Value, key: &Value) -> Eval<Value> {
    match container {
        Value::Object(map) => match lookup_key(map, key)? {
            Some(value) => Ok(value.clone()),
            None => fault(format!("key {} not found", key)),
        },
        Value::Array(items) => Ok(items[list_position(items.len(), key)?].clone()),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::String(chars[list_position(chars.len(), key)?].to_string()))
        }
        other => fault(format!("{} is not indexable", type_name(other))),
    }
}

fn index_mut<'v>(container: &'v mut Value, key: &Value) -> Eval<&'v mut Value> {
    match container {
        Value::Object(map) => match key {
            Value::String(k) => match map.get_mut(k) {
                Some(value) => Ok(value),
                None => fault(format!("key {} not found", key)),
            },
            other => fault(format!("mapping keys must be strings, got {}", type_name(other))),
        },
        Value::Array(items) => {
            let pos = list_position(items.len(), key)?;
            Ok(&mut items[pos])
        }
        other => fault(format!("{} does not support item assignment", type_name(other))),
    }
}

fn store(container: &mut Value, key: &Value, value: Value) -> Eval<()> {
    match container {
        Value::Object(map) => match key {
            Value::String(k) => {
                map.insert(k.clone(), value);
                Ok(())
            }
            other => fault(format!("mapping keys must be strings, got {}", type_name(other))),
        },
        Value::Array(items) => {
            let pos = list_position(items.len(), key)?;
            items[pos] = value;
            Ok(())
        }
        other => fault(format!("{} does not support item assignment", type_name(other))),
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Eval<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(equals(left, right))),
        BinOp::Ne => return Ok(Value::Bool(!equals(left, right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => return compare(op, left, right),
        _ => {}
    }

    match (op, left, right) {
        (BinOp::Add, Value::String(a), Value::String(b)) => {
            check_len(format!("{}{}", a, b)).map(Value::String)
        }
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            if a.len() + b.len() > MAX_LIST_LEN {
                return fault("list too long");
            }
            Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => match (Num::of(left), Num::of(right)) {
            (Some(a), Some(b)) => arithmetic(op, a, b),
            _ => fault(format!(
                "unsupported operand types for {:?}: {} and {}",
                op,
                type_name(left),
                type_name(right)
            )),
        },
    }
}

fn arithmetic(op: BinOp, a: Num, b: Num) -> Eval<Value> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        match op {
            BinOp::Add => return int(x.checked_add(y)),
            BinOp::Sub => return int(x.checked_sub(y)),
            BinOp::Mul => return int(x.checked_mul(y)),
            BinOp::Rem => {
                if y == 0 {
                    return fault("modulo by zero");
                }
                // Result takes the sign of the divisor.
                return int(x.checked_rem(y).map(|r| {
                    if r != 0 && (r < 0) != (y < 0) {
                        r + y
                    } else {
                        r
                    }
                }));
            }
            _ => {}
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    match op {
        BinOp::Add => float(x + y),
        BinOp::Sub => float(x - y),
        BinOp::Mul => float(x * y),
        BinOp::Div if y == 0.0 => fault("division by zero"),
        BinOp::Div => float(x / y),
        BinOp::Rem if y == 0.0 => fault("modulo by zero"),
        BinOp::Rem => float(x - y * (x / y).floor()),
        _ => fault(format!("{:?} is not an arithmetic operator", op)),
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (Num::of(left), Num::of(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Eval<Value> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => match (Num::of(left), Num::of(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a.partial_cmp(&b),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => {
                return fault(format!(
                    "cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                ))
            }
        },
    };
    let ordering = match ordering {
        Some(ordering) => ordering,
        None => return fault("values are not comparable"),
    };
    Ok(Value::Bool(match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}
