//! Methods on `str`, `list` and `dict` values.

use super::builtins::{arity, format_template, int_arg, no_kwargs, sort_values, str_arg, take_kwarg};
use super::error::{ScriptError, ScriptResult};
use super::interp::{dict_key, Interpreter};
use super::value::{values_equal, Dict, Value};

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "find", "index", "count", "format", "title", "capitalize", "isdigit", "isalpha",
    "isalnum", "isspace", "isupper", "islower", "zfill", "center", "ljust", "rjust",
    "splitlines", "partition",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "copy", "clear",
];

pub(crate) fn has_method(value: &Value, name: &str) -> bool {
    match value {
        Value::Str(_) => STR_METHODS.contains(&name),
        Value::List(_) => LIST_METHODS.contains(&name),
        Value::Dict(_) => DICT_METHODS.contains(&name),
        _ => false,
    }
}

pub(crate) fn call(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> ScriptResult<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args, kwargs),
        Value::List(_) => list_method(interp, receiver, name, args, kwargs),
        Value::Dict(_) => dict_method(interp, receiver, name, args, kwargs),
        other => Err(ScriptError::raise(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn char_index(s: &str, byte_index: usize) -> i64 {
    s[..byte_index].chars().count() as i64
}

fn prefixes(name: &str, value: &Value) -> ScriptResult<Vec<String>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::List(items) => items
            .borrow()
            .iter()
            .map(|v| str_arg(name, v).map(str::to_string))
            .collect(),
        other => Err(ScriptError::type_error(format!(
            "{} arg must be str or a tuple of str, not {}",
            name,
            other.type_name()
        ))),
    }
}

fn strip_chars(args: &[Value]) -> ScriptResult<Option<Vec<char>>> {
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(str_arg("strip", v)?.chars().collect())),
    }
}

fn pad_width(interp: &mut Interpreter, name: &str, s: &str, args: &[Value]) -> ScriptResult<(usize, char)> {
    arity(name, args, 1, 2)?;
    let width = int_arg(name, &args[0])?.max(0) as usize;
    interp.guard_alloc(width)?;
    let fill = match args.get(1) {
        Some(v) => {
            let fill = str_arg(name, v)?;
            let mut chars = fill.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(ScriptError::type_error(
                        "The fill character must be exactly one character long",
                    ))
                }
            }
        }
        None => ' ',
    };
    Ok((width.saturating_sub(s.chars().count()), fill))
}

fn split_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit.map(|m| parts.len() >= m).unwrap_or(false) {
            parts.push(Value::str(rest));
            return parts;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn str_method(
    interp: &mut Interpreter,
    s: &str,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> ScriptResult<Value> {
    if name == "format" {
        let text = format_template(s, &args, &kwargs)?;
        interp.guard_alloc(text.len())?;
        return Ok(Value::Str(text));
    }
    let maxsplit = if name == "split" {
        match args.get(1).cloned().or_else(|| take_kwarg(&mut kwargs, "maxsplit")) {
            Some(v) => Some(int_arg(name, &v)?).filter(|m| *m >= 0).map(|m| m as usize),
            None => None,
        }
    } else {
        None
    };
    let sep = if name == "split" {
        take_kwarg(&mut kwargs, "sep").or_else(|| args.first().cloned())
    } else {
        None
    };
    no_kwargs(name, &kwargs)?;

    let text = |t: String| -> ScriptResult<Value> { Ok(Value::Str(t)) };
    let flag = |b: bool| -> ScriptResult<Value> { Ok(Value::Bool(b)) };
    match name {
        "upper" => text(s.to_uppercase()),
        "lower" => text(s.to_lowercase()),
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let chars = strip_chars(&args)?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            text(match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            }
            .to_string())
        }
        "split" => {
            arity(name, &args, 0, 2)?;
            let parts = match sep {
                None | Some(Value::None) => split_whitespace(s, maxsplit),
                Some(sep) => {
                    let sep = str_arg(name, &sep)?;
                    if sep.is_empty() {
                        return Err(ScriptError::value_error("empty separator"));
                    }
                    match maxsplit {
                        Some(m) => s.splitn(m + 1, sep).map(Value::str).collect(),
                        None => s.split(sep).map(Value::str).collect(),
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "splitlines" => Ok(Value::list(s.lines().map(Value::str).collect())),
        "join" => {
            arity(name, &args, 1, 1)?;
            let items = interp.collect(&args[0])?;
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                match item {
                    Value::Str(part) => parts.push(part.as_str()),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            let total = parts.iter().map(|p| p.len()).sum::<usize>()
                + s.len() * parts.len().saturating_sub(1);
            interp.guard_alloc(total)?;
            text(parts.join(s))
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            let count = match args.get(2) {
                Some(v) => int_arg(name, v)?,
                None => -1,
            };
            let hits = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(old).count()
            };
            interp.guard_alloc(s.len() + hits.saturating_mul(new.len()))?;
            text(if count < 0 {
                s.replace(old, new)
            } else {
                s.replacen(old, new, count as usize)
            })
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let options = prefixes(name, &args[0])?;
            flag(options.iter().any(|p| {
                if name == "startswith" {
                    s.starts_with(p.as_str())
                } else {
                    s.ends_with(p.as_str())
                }
            }))
        }
        "find" | "index" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            match s.find(needle) {
                Some(i) => Ok(Value::Int(char_index(s, i))),
                None if name == "find" => Ok(Value::Int(-1)),
                None => Err(ScriptError::value_error("substring not found")),
            }
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(n as i64))
        }
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut boundary = true;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if boundary {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    boundary = false;
                } else {
                    out.push(c);
                    boundary = true;
                }
            }
            text(out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            text(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }
        "isdigit" => flag(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => flag(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isalnum" => flag(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
        "isspace" => flag(!s.is_empty() && s.chars().all(char::is_whitespace)),
        "isupper" => flag(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)),
        "islower" => flag(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase)),
        "zfill" => {
            arity(name, &args, 1, 1)?;
            let (missing, _) = pad_width(interp, name, s, &args)?;
            let (sign, digits) = match s.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                _ => (String::new(), s),
            };
            text(format!("{}{}{}", sign, "0".repeat(missing), digits))
        }
        "center" | "ljust" | "rjust" => {
            let (missing, fill) = pad_width(interp, name, s, &args)?;
            let fill = |n: usize| fill.to_string().repeat(n);
            text(match name {
                "ljust" => format!("{}{}", s, fill(missing)),
                "rjust" => format!("{}{}", fill(missing), s),
                _ => {
                    let left = missing / 2;
                    format!("{}{}{}", fill(left), s, fill(missing - left))
                }
            })
        }
        "partition" => {
            arity(name, &args, 1, 1)?;
            let sep = str_arg(name, &args[0])?;
            if sep.is_empty() {
                return Err(ScriptError::value_error("empty separator"));
            }
            let parts = match s.split_once(sep) {
                Some((before, after)) => [before, sep, after],
                None => [s, "", ""],
            };
            Ok(Value::list(parts.iter().map(|p| Value::str(*p)).collect()))
        }
        other => Err(ScriptError::raise(
            "AttributeError",
            format!("'str' object has no attribute '{}'", other),
        )),
    }
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> ScriptResult<Value> {
    let Value::List(items) = receiver else {
        return Err(ScriptError::type_error("expected a list"));
    };
    let key = if name == "sort" {
        take_kwarg(&mut kwargs, "key").filter(|k| !matches!(k, Value::None))
    } else {
        None
    };
    let reverse = if name == "sort" {
        take_kwarg(&mut kwargs, "reverse")
            .map(|v| v.truthy())
            .unwrap_or(false)
    } else {
        false
    };
    no_kwargs(name, &kwargs)?;

    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            interp.guard_items(1)?;
            let mut args = args;
            items.borrow_mut().push(args.remove(0));
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = interp.collect(&args[0])?;
            interp.guard_items(extra.len())?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let len = items.borrow().len() as i64;
            let index = int_arg(name, &args[0])?;
            let index = if index < 0 { index + len } else { index }.clamp(0, len) as usize;
            interp.guard_items(1)?;
            items.borrow_mut().insert(index, args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::raise("IndexError", "pop from empty list"));
            }
            let len = items.len() as i64;
            let index = match args.first() {
                Some(v) => int_arg(name, v)?,
                None => -1,
            };
            let resolved = if index < 0 { index + len } else { index };
            if resolved < 0 || resolved >= len {
                return Err(ScriptError::raise("IndexError", "pop index out of range"));
            }
            Ok(items.remove(resolved as usize))
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let position = items.borrow().iter().position(|v| values_equal(v, &args[0]));
            match position {
                Some(i) => {
                    items.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None => Err(ScriptError::value_error("list.remove(x): x not in list")),
            }
        }
        "index" => {
            arity(name, &args, 1, 1)?;
            let position = items.borrow().iter().position(|v| values_equal(v, &args[0]));
            position
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| {
                    ScriptError::value_error(format!("{} is not in list", args[0].repr()))
                })
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let n = items
                .borrow()
                .iter()
                .filter(|v| values_equal(v, &args[0]))
                .count();
            Ok(Value::Int(n as i64))
        }
        "sort" => {
            arity(name, &args, 0, 0)?;
            let current = items.borrow().clone();
            let sorted = sort_values(interp, current, key, reverse)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            let copy = items.borrow().clone();
            interp.guard_items(copy.len())?;
            Ok(Value::list(copy))
        }
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(ScriptError::raise(
            "AttributeError",
            format!("'list' object has no attribute '{}'", other),
        )),
    }
}

fn dict_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> ScriptResult<Value> {
    let Value::Dict(dict) = receiver else {
        return Err(ScriptError::type_error("expected a dict"));
    };
    if name != "update" {
        no_kwargs(name, &kwargs)?;
    }

    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            Ok(match &args[0] {
                Value::Str(key) => dict.borrow().get(key).cloned().unwrap_or(default),
                _ => default,
            })
        }
        "keys" => Ok(Value::list(
            dict.borrow().keys().map(|k| Value::Str(k.clone())).collect(),
        )),
        "values" => Ok(Value::list(dict.borrow().values().cloned().collect())),
        "items" => Ok(Value::list(
            dict.borrow()
                .iter()
                .map(|(k, v)| Value::list(vec![Value::Str(k.clone()), v.clone()]))
                .collect(),
        )),
        "pop" => {
            arity(name, &args, 1, 2)?;
            let key = dict_key(&args[0])?;
            let removed = dict.borrow_mut().remove(&key);
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ScriptError::raise("KeyError", args[0].repr())),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let key = dict_key(&args[0])?;
            let existing = dict.borrow().get(&key).cloned();
            match existing {
                Some(value) => Ok(value),
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(key, default.clone());
                    Ok(default)
                }
            }
        }
        "update" => {
            arity(name, &args, 0, 1)?;
            let mut incoming = Dict::new();
            if let Some(source) = args.first() {
                match source {
                    Value::Dict(other) => {
                        for (k, v) in other.borrow().iter() {
                            incoming.insert(k.clone(), v.clone());
                        }
                    }
                    other => {
                        for pair in interp.collect(other)? {
                            let kv = interp.collect(&pair)?;
                            if kv.len() != 2 {
                                return Err(ScriptError::value_error(
                                    "dictionary update sequence element has wrong length",
                                ));
                            }
                            incoming.insert(dict_key(&kv[0])?, kv[1].clone());
                        }
                    }
                }
            }
            for (k, v) in kwargs {
                incoming.insert(k, v);
            }
            let mut dict = dict.borrow_mut();
            for (k, v) in incoming.iter() {
                dict.insert(k.clone(), v.clone());
            }
            Ok(Value::None)
        }
        "copy" => {
            let copy = dict.borrow().clone();
            interp.guard_items(copy.len() * 2)?;
            Ok(Value::dict(copy))
        }
        "clear" => {
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(ScriptError::raise(
            "AttributeError",
            format!("'dict' object has no attribute '{}'", other),
        )),
    }
}
