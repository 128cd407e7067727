//! Importable modules: `math`, `json` and `statistics`.
//!
//! Whether a module may be imported at all is decided by the import gate;
//! this file only knows how to build the ones that exist.

use super::builtins::{arity, float_arg, int_arg, no_kwargs, str_arg, take_kwarg};
use super::error::{ScriptError, ScriptResult};
use super::interp::Interpreter;
use super::value::{compare_values, Module, Value};
use serde_json::Value as Json;
use std::collections::HashMap;

const MATH_FUNCTIONS: &[&str] = &[
    "math.sqrt",
    "math.floor",
    "math.ceil",
    "math.trunc",
    "math.fabs",
    "math.log",
    "math.log10",
    "math.log2",
    "math.exp",
    "math.pow",
    "math.sin",
    "math.cos",
    "math.tan",
    "math.asin",
    "math.acos",
    "math.atan",
    "math.atan2",
    "math.hypot",
    "math.radians",
    "math.degrees",
    "math.isnan",
    "math.isinf",
    "math.isfinite",
    "math.isclose",
    "math.factorial",
    "math.gcd",
    "math.fsum",
];

const JSON_FUNCTIONS: &[&str] = &["json.dumps", "json.loads"];

const STATISTICS_FUNCTIONS: &[&str] = &[
    "statistics.mean",
    "statistics.fmean",
    "statistics.median",
    "statistics.mode",
    "statistics.stdev",
    "statistics.pstdev",
    "statistics.variance",
    "statistics.pvariance",
];

fn module(name: &str, functions: &[&'static str], constants: &[(&str, Value)]) -> Module {
    let mut attrs = HashMap::new();
    for &function in functions {
        let short = function.rsplit('.').next().unwrap_or(function);
        attrs.insert(short.to_string(), Value::Builtin(function));
    }
    for (key, value) in constants {
        attrs.insert(key.to_string(), value.clone());
    }
    Module {
        name: name.to_string(),
        attrs,
    }
}

pub(crate) fn load(name: &str) -> Option<Module> {
    match name {
        "math" => Some(module(
            name,
            MATH_FUNCTIONS,
            &[
                ("pi", Value::Float(std::f64::consts::PI)),
                ("e", Value::Float(std::f64::consts::E)),
                ("tau", Value::Float(std::f64::consts::TAU)),
                ("inf", Value::Float(f64::INFINITY)),
                ("nan", Value::Float(f64::NAN)),
            ],
        )),
        "json" => Some(module(name, JSON_FUNCTIONS, &[])),
        "statistics" => Some(module(name, STATISTICS_FUNCTIONS, &[])),
        _ => None,
    }
}

pub(crate) fn call(
    interp: &mut Interpreter,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> ScriptResult<Value> {
    match name.split_once('.') {
        Some(("math", function)) => {
            no_kwargs(name, &kwargs)?;
            math(interp, function, &args)
        }
        Some(("json", function)) => json(interp, function, args, kwargs),
        Some(("statistics", function)) => {
            no_kwargs(name, &kwargs)?;
            statistics(interp, function, &args)
        }
        _ => Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            name
        ))),
    }
}

fn domain_error() -> ScriptError {
    ScriptError::value_error("math domain error")
}

fn float_to_int(f: f64) -> ScriptResult<Value> {
    if !f.is_finite() {
        return Err(ScriptError::raise(
            "OverflowError",
            "cannot convert float infinity or NaN to integer",
        ));
    }
    if f.abs() >= 9.2e18 {
        return Err(ScriptError::raise("OverflowError", "int too large to convert"));
    }
    Ok(Value::Int(f as i64))
}

fn math(interp: &mut Interpreter, function: &str, args: &[Value]) -> ScriptResult<Value> {
    let unary = |f: fn(f64) -> f64| -> ScriptResult<Value> {
        arity(function, args, 1, 1)?;
        Ok(Value::Float(f(float_arg(function, &args[0])?)))
    };
    match function {
        "sqrt" => {
            arity(function, args, 1, 1)?;
            let x = float_arg(function, &args[0])?;
            if x < 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.sqrt()))
        }
        "floor" | "ceil" | "trunc" => {
            arity(function, args, 1, 1)?;
            if let Value::Int(n) = &args[0] {
                return Ok(Value::Int(*n));
            }
            let x = float_arg(function, &args[0])?;
            float_to_int(match function {
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                _ => x.trunc(),
            })
        }
        "fabs" => unary(f64::abs),
        "exp" => unary(f64::exp),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "atan" => unary(f64::atan),
        "radians" => unary(f64::to_radians),
        "degrees" => unary(f64::to_degrees),
        "asin" | "acos" => {
            arity(function, args, 1, 1)?;
            let x = float_arg(function, &args[0])?;
            if !(-1.0..=1.0).contains(&x) {
                return Err(domain_error());
            }
            Ok(Value::Float(if function == "asin" { x.asin() } else { x.acos() }))
        }
        "log" | "log10" | "log2" => {
            let max = if function == "log" { 2 } else { 1 };
            arity(function, args, 1, max)?;
            let x = float_arg(function, &args[0])?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(match (function, args.get(1)) {
                ("log10", _) => x.log10(),
                ("log2", _) => x.log2(),
                (_, Some(base)) => {
                    let base = float_arg(function, base)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain_error());
                    }
                    x.ln() / base.ln()
                }
                _ => x.ln(),
            }))
        }
        "pow" | "atan2" | "hypot" => {
            arity(function, args, 2, 2)?;
            let x = float_arg(function, &args[0])?;
            let y = float_arg(function, &args[1])?;
            Ok(Value::Float(match function {
                "pow" => x.powf(y),
                "atan2" => x.atan2(y),
                _ => x.hypot(y),
            }))
        }
        "isnan" | "isinf" | "isfinite" => {
            arity(function, args, 1, 1)?;
            let x = float_arg(function, &args[0])?;
            Ok(Value::Bool(match function {
                "isnan" => x.is_nan(),
                "isinf" => x.is_infinite(),
                _ => x.is_finite(),
            }))
        }
        "isclose" => {
            arity(function, args, 2, 2)?;
            let a = float_arg(function, &args[0])?;
            let b = float_arg(function, &args[1])?;
            let tolerance = 1e-9 * a.abs().max(b.abs());
            Ok(Value::Bool(a == b || (a - b).abs() <= tolerance))
        }
        "factorial" => {
            arity(function, args, 1, 1)?;
            let n = int_arg(function, &args[0])?;
            if n < 0 {
                return Err(ScriptError::value_error(
                    "factorial() not defined for negative values",
                ));
            }
            let mut acc: i64 = 1;
            for k in 2..=n {
                interp.tick()?;
                acc = acc.checked_mul(k).ok_or_else(|| {
                    ScriptError::raise("OverflowError", "integer result too large")
                })?;
            }
            Ok(Value::Int(acc))
        }
        "gcd" => {
            arity(function, args, 2, 2)?;
            let (mut a, mut b) = (
                int_arg(function, &args[0])?.unsigned_abs(),
                int_arg(function, &args[1])?.unsigned_abs(),
            );
            while b != 0 {
                (a, b) = (b, a % b);
            }
            Ok(Value::Int(a as i64))
        }
        "fsum" => {
            arity(function, args, 1, 1)?;
            let values = numbers(interp, function, &args[0])?;
            Ok(Value::Float(values.iter().sum()))
        }
        other => Err(ScriptError::raise(
            "AttributeError",
            format!("module 'math' has no attribute '{}'", other),
        )),
    }
}

fn json(
    interp: &mut Interpreter,
    function: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> ScriptResult<Value> {
    match function {
        "dumps" => {
            arity(function, &args, 1, 1)?;
            let indent = match take_kwarg(&mut kwargs, "indent") {
                None | Some(Value::None) => None,
                Some(v) => Some(int_arg(function, &v)?.max(0) as usize),
            };
            let sort_keys = take_kwarg(&mut kwargs, "sort_keys")
                .map(|v| v.truthy())
                .unwrap_or(false);
            no_kwargs(function, &kwargs)?;
            let json = args[0].to_json()?;
            let mut out = String::new();
            write_json(&mut out, &json, indent, sort_keys, 0);
            interp.guard_alloc(out.len())?;
            Ok(Value::Str(out))
        }
        "loads" => {
            arity(function, &args, 1, 1)?;
            no_kwargs(function, &kwargs)?;
            let text = str_arg(function, &args[0])?;
            interp.guard_alloc(text.len().saturating_mul(4))?;
            let parsed: Json = serde_json::from_str(text)
                .map_err(|err| ScriptError::value_error(err.to_string()))?;
            Ok(Value::from_json(&parsed))
        }
        other => Err(ScriptError::raise(
            "AttributeError",
            format!("module 'json' has no attribute '{}'", other),
        )),
    }
}

/// Serialize with the default separators `, ` and `: ` (or newlines when indented).
fn write_json(out: &mut String, value: &Json, indent: Option<usize>, sort_keys: bool, level: usize) {
    let newline = |out: &mut String, level: usize| {
        if let Some(width) = indent {
            out.push('\n');
            out.push_str(&" ".repeat(width * level));
        }
    };
    let item_sep = if indent.is_some() { "," } else { ", " };
    match value {
        Json::Array(items) if !items.is_empty() => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                write_json(out, item, indent, sort_keys, level + 1);
            }
            newline(out, level);
            out.push(']');
        }
        Json::Object(map) if !map.is_empty() => {
            let mut entries: Vec<(&String, &Json)> = map.iter().collect();
            if sort_keys {
                entries.sort_by(|a, b| a.0.cmp(b.0));
            }
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                out.push_str(&Json::String(key.clone()).to_string());
                out.push_str(": ");
                write_json(out, item, indent, sort_keys, level + 1);
            }
            newline(out, level);
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn numbers(interp: &mut Interpreter, function: &str, data: &Value) -> ScriptResult<Vec<f64>> {
    interp
        .collect(data)?
        .iter()
        .map(|v| float_arg(function, v))
        .collect()
}

fn statistics_error(message: impl Into<String>) -> ScriptError {
    ScriptError::raise("StatisticsError", message)
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sum_of_squares(values: &[f64]) -> f64 {
    let mean = mean_of(values);
    values.iter().map(|v| (v - mean).powi(2)).sum()
}

fn statistics(interp: &mut Interpreter, function: &str, args: &[Value]) -> ScriptResult<Value> {
    arity(function, args, 1, 1)?;
    let items = interp.collect(&args[0])?;
    match function {
        "mean" | "fmean" => {
            if items.is_empty() {
                return Err(statistics_error("mean requires at least one data point"));
            }
            if function == "mean" && items.iter().all(|v| matches!(v, Value::Int(_))) {
                let total: i128 = items
                    .iter()
                    .map(|v| v.as_int().unwrap_or(0) as i128)
                    .sum();
                let n = items.len() as i128;
                if total % n == 0 {
                    return Ok(Value::Int((total / n) as i64));
                }
            }
            let values = numbers(interp, function, &args[0])?;
            Ok(Value::Float(mean_of(&values)))
        }
        "median" => {
            if items.is_empty() {
                return Err(statistics_error("no median for empty data"));
            }
            let mut sorted = items;
            let mut failure = None;
            sorted.sort_by(|a, b| {
                compare_values(a, b).unwrap_or_else(|err| {
                    failure.get_or_insert(err);
                    std::cmp::Ordering::Equal
                })
            });
            if let Some(err) = failure {
                return Err(err);
            }
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 1 {
                return Ok(sorted[mid].clone());
            }
            let a = float_arg(function, &sorted[mid - 1])?;
            let b = float_arg(function, &sorted[mid])?;
            Ok(Value::Float((a + b) / 2.0))
        }
        "mode" => {
            let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
            for (i, item) in items.iter().enumerate() {
                counts.entry(item.repr()).or_insert((0, i)).0 += 1;
            }
            let best = counts
                .values()
                .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
                .map(|(_, first)| *first);
            match best {
                Some(i) => Ok(items[i].clone()),
                None => Err(statistics_error("no mode for empty data")),
            }
        }
        "variance" | "stdev" => {
            let values = numbers(interp, function, &args[0])?;
            if values.len() < 2 {
                return Err(statistics_error(format!(
                    "{} requires at least two data points",
                    function
                )));
            }
            let variance = sum_of_squares(&values) / (values.len() - 1) as f64;
            Ok(Value::Float(if function == "stdev" {
                variance.sqrt()
            } else {
                variance
            }))
        }
        "pvariance" | "pstdev" => {
            let values = numbers(interp, function, &args[0])?;
            if values.is_empty() {
                return Err(statistics_error(format!(
                    "{} requires at least one data point",
                    function
                )));
            }
            let variance = sum_of_squares(&values) / values.len() as f64;
            Ok(Value::Float(if function == "pstdev" {
                variance.sqrt()
            } else {
                variance
            }))
        }
        other => Err(ScriptError::raise(
            "AttributeError",
            format!("module 'statistics' has no attribute '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compact_dumps_uses_python_separators() {
        let mut out = String::new();
        write_json(&mut out, &json!({"a": [1, 2], "b": "x"}), None, false, 0);
        assert_eq!(out, r#"{"a": [1, 2], "b": "x"}"#);
    }

    #[test]
    fn indented_dumps() {
        let mut out = String::new();
        write_json(&mut out, &json!({"b": 1, "a": []}), Some(2), true, 0);
        assert_eq!(out, "{\n  \"a\": [],\n  \"b\": 1\n}");
    }

    #[test]
    fn math_module_exposes_constants_and_functions() {
        let math = load("math").unwrap();
        assert!(matches!(math.attrs.get("pi"), Some(Value::Float(_))));
        assert!(matches!(math.attrs.get("sqrt"), Some(Value::Builtin("math.sqrt"))));
        assert!(load("os").is_none());
    }
}
