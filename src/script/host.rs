//! Boundary between script values and host (Rust) functions.
//!
//! Host functions only ever see JSON, so everything crossing this boundary is
//! `Send` and the interpreter's own reference-counted values stay on the worker
//! thread.

use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::Arc;

/// Arguments of a host call, converted to JSON.
#[derive(Debug, Clone, Default)]
pub struct HostCall {
    pub args: Vec<Json>,
    pub kwargs: Map<String, Json>,
}

impl HostCall {
    /// Positional argument `index`, falling back to keyword `name`.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Json> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }

    pub fn str_arg(&self, index: usize, name: &str) -> Result<Option<String>, HostError> {
        match self.arg(index, name) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(HostError::new(
                "TypeError",
                format!("argument '{}' must be a string, got {}", name, other),
            )),
        }
    }

    pub fn required_str(&self, index: usize, name: &str) -> Result<String, HostError> {
        self.str_arg(index, name)?.ok_or_else(|| {
            HostError::new("TypeError", format!("missing required argument '{}'", name))
        })
    }
}

/// What a host function hands back to the script.
#[derive(Clone)]
pub enum HostValue {
    Json(Json),
    Function(HostFunction),
}

impl From<Json> for HostValue {
    fn from(value: Json) -> Self {
        HostValue::Json(value)
    }
}

/// Raised inside the script as an exception of kind `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct HostError {
    pub kind: String,
    pub message: String,
}

impl HostError {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

type HostFn = dyn Fn(HostCall) -> Result<HostValue, HostError> + Send + Sync;

/// A named host function callable from script code.
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    func: Arc<HostFn>,
}

impl HostFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(HostCall) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, call: HostCall) -> Result<HostValue, HostError> {
        (self.func)(call)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("name", &self.name).finish()
    }
}
