//! The restricted builtin set and string formatting helpers.

use super::error::{Exception, ScriptError, ScriptResult};
use super::interp::{dict_key, Interpreter};
use super::modules;
use super::value::{compare_values, range_len_checked, Dict, Value};
use std::cmp::Ordering;
use std::rc::Rc;

const BUILTINS: &[&str] = &[
    "print", "len", "str", "int", "float", "bool", "list", "dict", "tuple", "range", "abs", "min",
    "max", "sum", "sorted", "reversed", "round", "enumerate", "zip", "any", "all", "isinstance",
    "type", "repr", "format", "map", "filter", "divmod", "pow", "chr", "ord",
];

const EXCEPTION_TYPES: &[&str] = &[
    "Exception",
    "BaseException",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "ImportError",
    "IndexError",
    "KeyError",
    "LookupError",
    "NameError",
    "NotImplementedError",
    "OverflowError",
    "PermissionError",
    "RecursionError",
    "RuntimeError",
    "StatisticsError",
    "TimeoutError",
    "ToolError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

/// Names `type()` can return that are not callable builtins.
const CLASS_ONLY: &[&str] = &[
    "NoneType",
    "function",
    "builtin_function_or_method",
    "method",
    "module",
];

pub(crate) fn lookup(name: &str) -> Option<&'static str> {
    BUILTINS
        .iter()
        .chain(EXCEPTION_TYPES)
        .find(|b| **b == name)
        .copied()
}

pub(crate) fn is_exception_type(name: &str) -> bool {
    EXCEPTION_TYPES.contains(&name)
}

/// Whether a builtin name denotes a type rather than a function.
pub(crate) fn is_class(name: &str) -> bool {
    matches!(
        name,
        "int" | "float" | "str" | "bool" | "list" | "dict" | "tuple" | "range"
    ) || CLASS_ONLY.contains(&name)
        || is_exception_type(name)
}

// ---- argument helpers ----

pub(crate) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> ScriptResult<()> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else if max == usize::MAX {
        format!("at least {}", min)
    } else {
        format!("from {} to {}", min, max)
    };
    Err(ScriptError::type_error(format!(
        "{}() takes {} arguments ({} given)",
        name,
        expected,
        args.len()
    )))
}

pub(crate) fn take_kwarg(kwargs: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
    let pos = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(pos).1)
}

pub(crate) fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> ScriptResult<()> {
    match kwargs.first() {
        Some((key, _)) => Err(ScriptError::type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, key
        ))),
        None => Ok(()),
    }
}

pub(crate) fn int_arg(name: &str, value: &Value) -> ScriptResult<i64> {
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(value.as_int().unwrap_or(0)),
        other => Err(ScriptError::type_error(format!(
            "{}() expected an integer, got {}",
            name,
            other.type_name()
        ))),
    }
}

pub(crate) fn float_arg(name: &str, value: &Value) -> ScriptResult<f64> {
    value.as_float().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{}() expected a number, got {}",
            name,
            value.type_name()
        ))
    })
}

pub(crate) fn str_arg<'a>(name: &str, value: &'a Value) -> ScriptResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ScriptError::type_error(format!(
            "{}() expected a str, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn optional(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !matches!(v, Value::None))
}

// ---- dispatch ----

pub(crate) fn call(
    interp: &mut Interpreter,
    name: &'static str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> ScriptResult<Value> {
    if name.contains('.') {
        return modules::call(interp, name, args, kwargs);
    }
    if is_exception_type(name) {
        no_kwargs(name, &kwargs)?;
        let message = match args.as_slice() {
            [] => String::new(),
            [single] => single.display(),
            many => Value::list(many.to_vec()).repr(),
        };
        return Ok(Value::Exception(Rc::new(Exception::new(name, message))));
    }

    match name {
        "print" => {
            let sep = optional(take_kwarg(&mut kwargs, "sep"))
                .map(|v| v.display())
                .unwrap_or_else(|| " ".to_string());
            let end = optional(take_kwarg(&mut kwargs, "end"))
                .map(|v| v.display())
                .unwrap_or_else(|| "\n".to_string());
            take_kwarg(&mut kwargs, "flush");
            no_kwargs(name, &kwargs)?;
            let mut text = args
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(&sep);
            text.push_str(&end);
            interp.write_stdout(&text);
            Ok(Value::None)
        }
        "len" => {
            arity(name, &args, 1, 1)?;
            no_kwargs(name, &kwargs)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count() as i64,
                Value::List(items) => items.borrow().len() as i64,
                Value::Dict(dict) => dict.borrow().len() as i64,
                range @ Value::Range { .. } => range_len_checked(range).ok_or_else(|| {
                    ScriptError::raise("OverflowError", "range length does not fit in an integer")
                })?,
                other => {
                    return Err(ScriptError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(len))
        }
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(
                args.first().map(Value::display).unwrap_or_default(),
            ))
        }
        "repr" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Str(args[0].repr()))
        }
        "int" => {
            arity(name, &args, 0, 2)?;
            let base = match args.get(1).cloned().or_else(|| take_kwarg(&mut kwargs, "base")) {
                Some(b) => Some(int_arg(name, &b)?),
                None => None,
            };
            no_kwargs(name, &kwargs)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(value) => to_int(value, base).map(Value::Int),
            }
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => s
                    .trim()
                    .replace('_', "")
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| {
                        ScriptError::value_error(format!(
                            "could not convert string to float: {}",
                            Value::Str(s.clone()).repr()
                        ))
                    }),
                Some(value) => float_arg(name, value).map(Value::Float),
            }
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().map(Value::truthy).unwrap_or(false)))
        }
        "list" | "tuple" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::list(Vec::new())),
                Some(value) => Ok(Value::list(interp.collect(value)?)),
            }
        }
        "dict" => {
            arity(name, &args, 0, 1)?;
            let mut dict = Dict::new();
            if let Some(source) = args.first() {
                match source {
                    Value::Dict(other) => {
                        for (k, v) in other.borrow().iter() {
                            dict.insert(k.clone(), v.clone());
                        }
                    }
                    other => {
                        for pair in interp.collect(other)? {
                            let items = interp.collect(&pair)?;
                            if items.len() != 2 {
                                return Err(ScriptError::value_error(
                                    "dictionary update sequence element has wrong length",
                                ));
                            }
                            dict.insert(dict_key(&items[0])?, items[1].clone());
                        }
                    }
                }
            }
            for (k, v) in kwargs {
                dict.insert(k, v);
            }
            Ok(Value::dict(dict))
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            no_kwargs(name, &kwargs)?;
            let ints = args
                .iter()
                .map(|a| int_arg(name, a))
                .collect::<ScriptResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(ScriptError::type_error("range expected 1 to 3 arguments")),
            };
            if step == 0 {
                return Err(ScriptError::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(|| {
                    ScriptError::raise("OverflowError", "integer result too large")
                }),
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(ScriptError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        "min" | "max" => {
            arity(name, &args, 1, usize::MAX)?;
            let key = optional(take_kwarg(&mut kwargs, "key"));
            let default = take_kwarg(&mut kwargs, "default");
            no_kwargs(name, &kwargs)?;
            let items = if args.len() == 1 {
                interp.collect(&args[0])?
            } else {
                args
            };
            extreme(interp, name, items, key, default)
        }
        "sum" => {
            arity(name, &args, 1, 2)?;
            let mut total = args
                .get(1)
                .cloned()
                .or_else(|| take_kwarg(&mut kwargs, "start"))
                .unwrap_or(Value::Int(0));
            no_kwargs(name, &kwargs)?;
            if let Value::Str(_) = total {
                return Err(ScriptError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in interp.collect(&args[0])? {
                total = interp.binary(super::ast::BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "sorted" => {
            arity(name, &args, 1, 1)?;
            let key = optional(take_kwarg(&mut kwargs, "key"));
            let reverse = take_kwarg(&mut kwargs, "reverse")
                .map(|v| v.truthy())
                .unwrap_or(false);
            no_kwargs(name, &kwargs)?;
            let items = interp.collect(&args[0])?;
            Ok(Value::list(sort_values(interp, items, key, reverse)?))
        }
        "reversed" => {
            arity(name, &args, 1, 1)?;
            let mut items = interp.collect(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let digits = match optional(args.get(1).cloned().or_else(|| take_kwarg(&mut kwargs, "ndigits"))) {
                Some(d) => Some(int_arg(name, &d)?),
                None => None,
            };
            no_kwargs(name, &kwargs)?;
            round(&args[0], digits)
        }
        "enumerate" => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).cloned().or_else(|| take_kwarg(&mut kwargs, "start")) {
                Some(s) => int_arg(name, &s)?,
                None => 0,
            };
            no_kwargs(name, &kwargs)?;
            let items = interp.collect(&args[0])?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::list(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            no_kwargs(name, &kwargs)?;
            let columns = args
                .iter()
                .map(|a| interp.collect(a))
                .collect::<ScriptResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows)
                    .map(|r| Value::list(columns.iter().map(|c| c[r].clone()).collect()))
                    .collect(),
            ))
        }
        "any" | "all" => {
            arity(name, &args, 1, 1)?;
            let items = interp.collect(&args[0])?;
            Ok(Value::Bool(if name == "any" {
                items.iter().any(Value::truthy)
            } else {
                items.iter().all(Value::truthy)
            }))
        }
        "isinstance" => {
            arity(name, &args, 2, 2)?;
            let classes = match &args[1] {
                Value::List(items) => items.borrow().clone(),
                single => vec![single.clone()],
            };
            let mut matched = false;
            for class in &classes {
                match class {
                    Value::Builtin(class) => matched |= is_instance(&args[0], class),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "isinstance() arg 2 must be a type, not {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::Bool(matched))
        }
        "type" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Builtin(match &args[0] {
                Value::Exception(exc) => lookup(&exc.kind).unwrap_or("Exception"),
                Value::Host(_) => "function",
                other => other.type_name(),
            }))
        }
        "format" => {
            arity(name, &args, 1, 2)?;
            let spec = match args.get(1) {
                Some(spec) => str_arg(name, spec)?.to_string(),
                None => String::new(),
            };
            format_value(&args[0], &spec).map(Value::Str)
        }
        "map" => {
            arity(name, &args, 2, 2)?;
            let items = interp.collect(&args[1])?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interp.call_value(&args[0], vec![item], Vec::new())?);
            }
            Ok(Value::list(out))
        }
        "filter" => {
            arity(name, &args, 2, 2)?;
            let items = interp.collect(&args[1])?;
            let mut out = Vec::new();
            for item in items {
                let keep = match &args[0] {
                    Value::None => item.truthy(),
                    func => interp.call_value(func, vec![item.clone()], Vec::new())?.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        "divmod" => {
            arity(name, &args, 2, 2)?;
            let q = interp.binary(super::ast::BinOp::FloorDiv, &args[0], &args[1])?;
            let r = interp.binary(super::ast::BinOp::Mod, &args[0], &args[1])?;
            Ok(Value::list(vec![q, r]))
        }
        "pow" => {
            arity(name, &args, 2, 2)?;
            interp.binary(super::ast::BinOp::Pow, &args[0], &args[1])
        }
        "chr" => {
            arity(name, &args, 1, 1)?;
            let code = int_arg(name, &args[0])?;
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| ScriptError::value_error("chr() arg not in range(0x110000)"))
        }
        "ord" => {
            arity(name, &args, 1, 1)?;
            let s = str_arg(name, &args[0])?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(ScriptError::type_error(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            other
        ))),
    }
}

fn to_int(value: &Value, base: Option<i64>) -> ScriptResult<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(*b as i64),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(ScriptError::value_error(format!(
                    "cannot convert float {} to integer",
                    super::value::format_float(*f)
                )));
            }
            let truncated = f.trunc();
            if truncated.abs() >= 9.2e18 {
                return Err(ScriptError::raise("OverflowError", "int too large to convert"));
            }
            Ok(truncated as i64)
        }
        Value::Str(s) => {
            let base = base.unwrap_or(10);
            let cleaned = s.trim().replace('_', "");
            let (negative, digits) = match cleaned.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
            };
            let digits = if base == 16 {
                digits
                    .strip_prefix("0x")
                    .or_else(|| digits.strip_prefix("0X"))
                    .unwrap_or(digits)
            } else {
                digits
            };
            let parsed = u32::try_from(base)
                .ok()
                .filter(|b| (2..=36).contains(b))
                .and_then(|b| i64::from_str_radix(digits, b).ok())
                .filter(|_| !digits.starts_with(['+', '-']));
            match parsed {
                Some(n) => Ok(if negative { -n } else { n }),
                None => Err(ScriptError::value_error(format!(
                    "invalid literal for int() with base {}: {}",
                    base,
                    Value::Str(s.clone()).repr()
                ))),
            }
        }
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn round(value: &Value, digits: Option<i64>) -> ScriptResult<Value> {
    match (value, digits) {
        (Value::Int(_) | Value::Bool(_), _) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (Value::Float(f), None) => to_int(&Value::Float(f.round_ties_even()), None).map(Value::Int),
        (Value::Float(f), Some(n)) => {
            let scale = 10f64.powi(n.clamp(-308, 308) as i32);
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
        (other, _) => Err(ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn is_instance(value: &Value, class: &str) -> bool {
    match class {
        "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
        "float" => matches!(value, Value::Float(_)),
        "str" => matches!(value, Value::Str(_)),
        "bool" => matches!(value, Value::Bool(_)),
        "list" | "tuple" => matches!(value, Value::List(_)),
        "dict" => matches!(value, Value::Dict(_)),
        "range" => matches!(value, Value::Range { .. }),
        "NoneType" => matches!(value, Value::None),
        "function" => matches!(value, Value::Function(_) | Value::Host(_)),
        exc if is_exception_type(exc) => match value {
            Value::Exception(e) => e.matches(exc),
            _ => false,
        },
        _ => false,
    }
}

fn extreme(
    interp: &mut Interpreter,
    name: &str,
    items: Vec<Value>,
    key: Option<Value>,
    default: Option<Value>,
) -> ScriptResult<Value> {
    let wanted = if name == "min" {
        Ordering::Less
    } else {
        Ordering::Greater
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let score = match &key {
            Some(func) => interp.call_value(func, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((_, best_score)) => compare_values(&score, best_score)? == wanted,
        };
        if replace {
            best = Some((item, score));
        }
    }
    match (best, default) {
        (Some((item, _)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ScriptError::value_error(format!(
            "{}() arg is an empty sequence",
            name
        ))),
    }
}

/// Stable sort by an optional key function, as `sorted` and `list.sort` do.
pub(crate) fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> ScriptResult<Vec<Value>> {
    let keys = match &key {
        Some(func) => items
            .iter()
            .map(|item| interp.call_value(func, vec![item.clone()], Vec::new()))
            .collect::<ScriptResult<Vec<_>>>()?,
        None => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match compare_values(&keys[a], &keys[b]) {
        Ok(ordering) if reverse => ordering.reverse(),
        Ok(ordering) => ordering,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

// ---- formatting ----

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> ScriptResult<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let invalid = || ScriptError::value_error(format!("Invalid format specifier '{}'", spec));
    let mut parsed = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().map(is_align).unwrap_or(false) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            parsed.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'#') {
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        parsed.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).map(|c| c.is_ascii_digit()).unwrap_or(false) {
        i += 1;
    }
    if i > start {
        let digits: String = chars[start..i].iter().collect();
        parsed.width = digits.parse().map_err(|_| invalid())?;
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            parsed.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            i += 1;
        }
        if i == start {
            return Err(invalid());
        }
        let digits: String = chars[start..i].iter().collect();
        parsed.precision = Some(digits.parse().map_err(|_| invalid())?);
    }
    if let Some(&c) = chars.get(i) {
        parsed.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid());
    }
    Ok(parsed)
}

/// Apply a format spec (`>10`, `.2f`, `,d`, `08.3f`, `.1%` ...) to a value.
pub(crate) fn format_value(value: &Value, spec: &str) -> ScriptResult<String> {
    if spec.is_empty() {
        return Ok(value.display());
    }
    let spec = parse_spec(spec)?;
    let unknown = |code: char| {
        ScriptError::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            code,
            value.type_name()
        ))
    };

    let (body, numeric) = match (spec.kind, value) {
        (None | Some('s'), Value::Str(s)) => {
            let text = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.clone(),
            };
            (text, false)
        }
        (Some('s'), other) => (other.display(), false),
        (None, Value::Float(f)) if spec.precision.is_some() => {
            (signed(*f < 0.0, general(f.abs(), spec.precision.unwrap_or(6)), &spec), true)
        }
        (None, Value::Int(_) | Value::Float(_)) | (Some('d' | 'n'), Value::Int(_) | Value::Bool(_)) => {
            match value {
                Value::Float(f) => (signed(*f < 0.0, group(&format_float_abs(*f), &spec), &spec), true),
                _ => {
                    let n = value.as_int().unwrap_or(0);
                    (signed(n < 0, group(&n.unsigned_abs().to_string(), &spec), &spec), true)
                }
            }
        }
        (Some(code @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%')), v) if v.as_float().is_some() => {
            let f = v.as_float().unwrap_or(0.0);
            let precision = spec.precision.unwrap_or(6);
            let text = match code {
                'f' | 'F' => group(&format!("{:.*}", precision, f.abs()), &spec),
                'e' | 'E' => exponent(f.abs(), precision, code == 'E'),
                'g' | 'G' => general(f.abs(), precision),
                _ => format!("{}%", group(&format!("{:.*}", precision, f.abs() * 100.0), &spec)),
            };
            (signed(f < 0.0, text, &spec), true)
        }
        (Some(code @ ('x' | 'X' | 'o' | 'b')), Value::Int(_) | Value::Bool(_)) => {
            let n = value.as_int().unwrap_or(0);
            let magnitude = n.unsigned_abs();
            let text = match code {
                'x' => format!("{:x}", magnitude),
                'X' => format!("{:X}", magnitude),
                'o' => format!("{:o}", magnitude),
                _ => format!("{:b}", magnitude),
            };
            (signed(n < 0, text, &spec), true)
        }
        (None, other) => (other.display(), false),
        (Some(code), _) => return Err(unknown(code)),
    };

    Ok(pad(body, numeric, &spec))
}

fn format_float_abs(f: f64) -> String {
    super::value::format_float(f.abs())
}

fn signed(negative: bool, body: String, spec: &FormatSpec) -> String {
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };
    format!("{}{}", sign, body)
}

fn group(digits: &str, spec: &FormatSpec) -> String {
    let Some(sep) = spec.grouping else {
        return digits.to_string();
    };
    let (int_part, rest) = match digits.find('.') {
        Some(pos) => digits.split_at(pos),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(sep);
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

fn exponent(f: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, f);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let text = format!(
        "{}e{}{:02}",
        mantissa,
        if exp < 0 { '-' } else { '+' },
        exp.abs()
    );
    if upper {
        text.to_uppercase()
    } else {
        text
    }
}

fn general(f: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if f == 0.0 {
        return "0".to_string();
    }
    let exp = f.log10().floor() as i32;
    let trim = |s: String| {
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    };
    if exp < -4 || exp >= precision as i32 {
        let text = exponent(f, precision - 1, false);
        let (mantissa, tail) = text.split_once('e').unwrap_or((text.as_str(), ""));
        format!("{}e{}", trim(mantissa.to_string()), tail)
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        trim(format!("{:.*}", decimals, f))
    }
}

fn pad(body: String, numeric: bool, spec: &FormatSpec) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let missing = spec.width - len;
    let (fill, align) = match (spec.align, spec.zero) {
        (Some(align), _) => (spec.fill.unwrap_or(' '), align),
        (None, true) if numeric => ('0', '='),
        (None, _) => (' ', if numeric { '>' } else { '<' }),
    };
    let filler = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{}{}", body, filler(missing)),
        '^' => format!(
            "{}{}{}",
            filler(missing / 2),
            body,
            filler(missing - missing / 2)
        ),
        '=' => {
            let sign_len = body
                .chars()
                .take_while(|c| matches!(c, '+' | '-' | ' '))
                .count();
            let (sign, digits) = body.split_at(sign_len);
            format!("{}{}{}", sign, filler(missing), digits)
        }
        _ => format!("{}{}", filler(missing), body),
    }
}

/// `template % args` with `%s %r %d %i %f %e %g %x %%` conversions.
pub(crate) fn percent_format(template: &str, args: &Value) -> ScriptResult<String> {
    let values = match args {
        Value::List(items) => items.borrow().clone(),
        single => vec![single.clone()],
    };
    let mut values = values.into_iter();
    let mut out = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut flags = String::new();
        let conversion = loop {
            match chars.next() {
                Some(c) if "-+ 0.#".contains(c) || c.is_ascii_digit() => flags.push(c),
                Some(c) => break c,
                None => return Err(ScriptError::value_error("incomplete format")),
            }
        };
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = values.next().ok_or_else(|| {
            ScriptError::type_error("not enough arguments for format string")
        })?;
        let spec = match flags.strip_prefix('-') {
            Some(rest) => format!("<{}", rest),
            None => flags.clone(),
        };
        let text = match conversion {
            's' => format_value(&Value::Str(value.display()), &spec)?,
            'r' => format_value(&Value::Str(value.repr()), &spec)?,
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) => Value::Int(to_int(&Value::Float(*f), None)?),
                    other => other.clone(),
                };
                format_value(&n, &format!("{}d", spec))?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' => {
                format_value(&value, &format!("{}{}", spec, conversion))?
            }
            other => {
                return Err(ScriptError::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&text);
    }
    if values.next().is_some() {
        return Err(ScriptError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

/// `str.format`: `{}`, `{0}`, `{name}` fields with optional `:spec`.
pub(crate) fn format_template(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> ScriptResult<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(ScriptError::value_error(
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }
                let (name, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let value = if name.is_empty() {
                    let value = args.get(auto_index);
                    auto_index += 1;
                    value
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index)
                } else {
                    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
                };
                let value = value.ok_or_else(|| {
                    if name.is_empty() || name.parse::<usize>().is_ok() {
                        ScriptError::raise("IndexError", "Replacement index out of range")
                    } else {
                        ScriptError::raise("KeyError", Value::Str(name.to_string()).repr())
                    }
                })?;
                out.push_str(&format_value(value, spec)?);
            }
            '}' => {
                return Err(ScriptError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Float(-2.5), "08.2f").unwrap(), "-0002.50");
        assert_eq!(format_value(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_value(&Value::str("ab"), "^6").unwrap(), "  ab  ");
        assert_eq!(format_value(&Value::Int(255), "x").unwrap(), "ff");
        assert_eq!(format_value(&Value::Float(12345.678), "e").unwrap(), "1.234568e+04");
    }

    #[test]
    fn unknown_format_code_is_value_error() {
        assert!(format_value(&Value::Float(1.5), "d").is_err());
    }

    #[test]
    fn percent_formatting() {
        let args = Value::list(vec![Value::str("Sea Breeze"), Value::Float(12.345)]);
        assert_eq!(
            percent_format("%s is %.1f m", &args).unwrap(),
            "Sea Breeze is 12.3 m"
        );
        assert_eq!(percent_format("100%%", &Value::list(vec![])).unwrap(), "100%");
        assert!(percent_format("%s %s", &Value::str("one")).is_err());
    }

    #[test]
    fn template_formatting() {
        let out = format_template(
            "{} berths at {port}: {0:>3}",
            &[Value::Int(7)],
            &[("port".to_string(), Value::str("Harbor"))],
        )
        .unwrap();
        assert_eq!(out, "7 berths at Harbor:   7");
    }

    #[test]
    fn int_parsing() {
        assert_eq!(to_int(&Value::str(" -42 "), None).unwrap(), -42);
        assert_eq!(to_int(&Value::str("ff"), Some(16)).unwrap(), 255);
        assert_eq!(to_int(&Value::Float(-3.9), None).unwrap(), -3);
        assert!(to_int(&Value::str("4.5"), None).is_err());
    }

    #[test]
    fn rounding_is_half_even() {
        assert!(matches!(round(&Value::Float(2.5), None).unwrap(), Value::Int(2)));
        assert!(matches!(round(&Value::Float(3.5), None).unwrap(), Value::Int(4)));
    }
}
