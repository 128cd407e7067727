//! Runtime values of the script language.

use super::ast::FunctionDef;
use super::error::{Exception, ScriptError, ScriptResult};
use super::host::HostFunction;
use serde_json::Value as Json;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Insertion-ordered string-keyed map.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|i| &self.entries[*i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        match self.index.get(&key) {
            Some(i) => self.entries[*i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }
}

/// A user-defined function together with its evaluated defaults.
#[derive(Debug)]
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    /// Enclosing function locals at definition time.
    pub captured: Rc<HashMap<String, Value>>,
}

/// An imported module: a name and its attributes.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub attrs: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Dict>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Closure>),
    /// Builtin function, type or module function, by qualified name.
    Builtin(&'static str),
    Method(Box<Value>, String),
    Host(HostFunction),
    Module(Rc<Module>),
    Exception(Rc<Exception>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Function(_) | Value::Host(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(..) => "method",
            Value::Module(_) => "module",
            Value::Exception(_) => "exception",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Range { .. } => range_len(self) > 0,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Method(..) | Value::Host(_)
        )
    }

    /// `str(value)`
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Exception(e) => e.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        self.repr_depth(0)
    }

    fn repr_depth(&self, depth: usize) -> String {
        if depth > 32 {
            return "...".to_string();
        }
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|v| v.repr_depth(depth + 1))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Dict(dict) => {
                let parts: Vec<String> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", quote_str(k), v.repr_depth(depth + 1)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({}, {})", start, stop)
                } else {
                    format!("range({}, {}, {})", start, stop, step)
                }
            }
            Value::Function(c) => format!("<function {}>", c.def.name),
            Value::Builtin(name) if super::builtins::is_class(name) => {
                format!("<class '{}'>", name)
            }
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::Method(recv, name) => {
                format!("<method {}.{}>", recv.type_name(), name)
            }
            Value::Host(h) => format!("<tool {}>", h.name()),
            Value::Module(m) => format!("<module '{}'>", m.name),
            Value::Exception(e) => format!("{}({})", e.kind, quote_str(&e.message)),
        }
    }

    /// Convert to JSON; functions and modules are not serializable.
    pub fn to_json(&self) -> ScriptResult<Json> {
        self.to_json_depth(0)
    }

    fn to_json_depth(&self, depth: usize) -> ScriptResult<Json> {
        if depth > 128 {
            return Err(ScriptError::value_error("value is nested too deeply to serialize"));
        }
        Ok(match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json_depth(depth + 1))
                    .collect::<ScriptResult<_>>()?,
            ),
            Value::Dict(dict) => {
                let mut map = serde_json::Map::new();
                for (k, v) in dict.borrow().iter() {
                    map.insert(k.clone(), v.to_json_depth(depth + 1)?);
                }
                Json::Object(map)
            }
            Value::Range { .. } => Json::Array(range_items(self).into_iter().map(Json::from).collect()),
            Value::Exception(e) => Json::String(e.to_string()),
            other => {
                return Err(ScriptError::type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )))
            }
        })
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                let mut dict = Dict::new();
                for (k, v) in map {
                    dict.insert(k.clone(), Value::from_json(v));
                }
                Value::dict(dict)
            }
        }
    }

    /// Rough heap footprint, counting each shared container once.
    pub fn estimate_size(&self) -> usize {
        let mut seen = HashSet::new();
        self.estimate_into(&mut seen)
    }

    /// Walks containers with an explicit stack; nesting past
    /// [`MAX_CONTAINER_DEPTH`] saturates to `usize::MAX`.
    pub(crate) fn estimate_into(&self, seen: &mut HashSet<usize>) -> usize {
        let mut total = 0usize;
        let mut pending: Vec<(Value, usize)> = Vec::new();
        total = total.saturating_add(self.shallow_size(seen, &mut pending, 0));
        while let Some((value, depth)) = pending.pop() {
            if depth > MAX_CONTAINER_DEPTH {
                return usize::MAX;
            }
            total = total.saturating_add(value.shallow_size(seen, &mut pending, depth));
        }
        total
    }

    fn shallow_size(
        &self,
        seen: &mut HashSet<usize>,
        pending: &mut Vec<(Value, usize)>,
        depth: usize,
    ) -> usize {
        match self {
            Value::Str(s) => 24 + s.len(),
            Value::List(items) => {
                if !seen.insert(Rc::as_ptr(items) as *const () as usize) {
                    return 8;
                }
                let items = items.borrow();
                let mut size = 24 + 8 * items.len();
                for item in items.iter() {
                    match item {
                        Value::List(_) | Value::Dict(_) | Value::Method(..) => {
                            pending.push((item.clone(), depth + 1))
                        }
                        leaf => size += leaf.shallow_size(seen, pending, depth + 1),
                    }
                }
                size
            }
            Value::Dict(dict) => {
                if !seen.insert(Rc::as_ptr(dict) as *const () as usize) {
                    return 8;
                }
                let dict = dict.borrow();
                let mut size = 48;
                for (key, item) in dict.iter() {
                    size += 32 + key.len();
                    match item {
                        Value::List(_) | Value::Dict(_) | Value::Method(..) => {
                            pending.push((item.clone(), depth + 1))
                        }
                        leaf => size += leaf.shallow_size(seen, pending, depth + 1),
                    }
                }
                size
            }
            Value::Method(recv, _) => 32 + recv.shallow_size(seen, pending, depth + 1),
            _ => 16,
        }
    }
}

/// Deepest container nesting the heap walk accepts.
pub const MAX_CONTAINER_DEPTH: usize = 10_000;

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e16 {
        return format!("{:.1}", f);
    }
    let s = format!("{}", f);
    if s.len() > 20 {
        format!("{:e}", f)
    } else {
        s
    }
}

pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Number of items in a range, `None` when that count does not fit in an i64.
pub fn range_len_checked(value: &Value) -> Option<i64> {
    match value {
        Value::Range { start, stop, step } => {
            let (start, stop, step) = (*start as i128, *stop as i128, *step as i128);
            let len = if step > 0 && start < stop {
                (stop - start + step - 1) / step
            } else if step < 0 && start > stop {
                (start - stop - step - 1) / -step
            } else {
                0
            };
            i64::try_from(len).ok()
        }
        _ => Some(0),
    }
}

/// Number of items in a range, saturating at `i64::MAX`.
pub fn range_len(value: &Value) -> i64 {
    range_len_checked(value).unwrap_or(i64::MAX)
}

/// Item `index` of a range; `index` must be below the range's length.
pub fn range_item(start: i64, step: i64, index: i64) -> i64 {
    (start as i128 + index as i128 * step as i128) as i64
}

pub fn range_items(value: &Value) -> Vec<i64> {
    match value {
        Value::Range { start, step, .. } => {
            (0..range_len(value)).map(|i| range_item(*start, *step, i)).collect()
        }
        _ => Vec::new(),
    }
}

/// Ranges compare by the sequence they produce.
fn ranges_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (
            Value::Range { start: s1, step: t1, .. },
            Value::Range { start: s2, step: t2, .. },
        ) => {
            let len = range_len_checked(a);
            len == range_len_checked(b)
                && match len {
                    Some(0) => true,
                    Some(1) => s1 == s2,
                    _ => s1 == s2 && t1 == t2,
                }
        }
        _ => false,
    }
}

/// `==` semantics.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    equal_depth(a, b, 0)
}

fn equal_depth(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > 64 {
        return false;
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|(p, q)| equal_depth(p, q, depth + 1))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.get(k)
                        .map(|w| equal_depth(v, w, depth + 1))
                        .unwrap_or(false)
                })
        }
        (Value::Range { .. }, Value::Range { .. }) => ranges_equal(a, b),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::Exception(x), Value::Exception(y)) => x == y,
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) if is_numeric(a) && is_numeric(b) => x == y,
            _ => false,
        },
    }
}

fn is_numeric(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

/// Ordering for `<`, `sorted`, `min` and `max`.
pub fn compare_values(a: &Value, b: &Value) -> ScriptResult<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            for (p, q) in x.iter().zip(y.iter()) {
                match compare_values(p, q)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ if is_numeric(a) && is_numeric(b) => {
            let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
            x.partial_cmp(&y)
                .ok_or_else(|| ScriptError::value_error("cannot order NaN"))
        }
        _ => Err(ScriptError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_keeps_structure() {
        let json = json!({"name": "Sea Breeze", "length": 12.5, "berths": [1, 2], "active": true, "owner": null});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json().unwrap(), json);
    }

    #[test]
    fn functions_are_not_serializable() {
        let err = Value::Builtin("len").to_json().unwrap_err();
        assert!(err.to_string().contains("not JSON serializable"));
    }

    #[test]
    fn repr_matches_python_style() {
        let value = Value::from_json(&json!({"a": [1, 2.0, "x"], "b": null}));
        assert_eq!(value.repr(), "{'a': [1, 2.0, 'x'], 'b': None}");
        assert_eq!(Value::Float(0.5).repr(), "0.5");
    }

    #[test]
    fn dict_remove_keeps_order() {
        let mut dict = Dict::new();
        dict.insert("a".into(), Value::Int(1));
        dict.insert("b".into(), Value::Int(2));
        dict.insert("c".into(), Value::Int(3));
        dict.remove("a");
        assert_eq!(dict.keys().cloned().collect::<Vec<_>>(), vec!["b", "c"]);
        assert!(matches!(dict.get("c"), Some(Value::Int(3))));
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(values_equal(&Value::Int(4), &Value::Float(4.0)));
        assert!(!values_equal(&Value::Int(4), &Value::Str("4".into())));
    }

    #[test]
    fn self_referencing_list_estimate_terminates() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert!(list.estimate_size() > 0);
    }

    #[test]
    fn range_length() {
        assert_eq!(range_len(&Value::Range { start: 0, stop: 10, step: 3 }), 4);
        assert_eq!(range_len(&Value::Range { start: 10, stop: 0, step: -2 }), 5);
        assert_eq!(range_len(&Value::Range { start: 5, stop: 0, step: 1 }), 0);
    }

    #[test]
    fn range_length_near_integer_limits() {
        let wide = Value::Range { start: -1, stop: i64::MAX, step: 1 };
        assert_eq!(range_len_checked(&wide), None);
        assert_eq!(range_len(&wide), i64::MAX);

        let full = Value::Range { start: 0, stop: i64::MAX, step: 1 };
        assert_eq!(range_len_checked(&full), Some(i64::MAX));

        let down = Value::Range { start: i64::MAX, stop: i64::MIN, step: i64::MIN };
        assert_eq!(range_len(&down), 2);
        assert_eq!(range_item(i64::MAX, i64::MIN, 1), -1);
    }

    #[test]
    fn ranges_compare_by_items() {
        let a = Value::Range { start: 0, stop: 3, step: 1 };
        let b = Value::Range { start: 0, stop: 3, step: 1 };
        let empty = Value::Range { start: 5, stop: 0, step: 1 };
        let also_empty = Value::Range { start: 9, stop: 9, step: 2 };
        assert!(values_equal(&a, &b));
        assert!(values_equal(&empty, &also_empty));
        assert!(!values_equal(&a, &empty));
        assert!(values_equal(
            &Value::Range { start: 2, stop: 3, step: 1 },
            &Value::Range { start: 2, stop: 10, step: 50 }
        ));
    }
}
