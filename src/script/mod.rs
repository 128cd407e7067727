//! Embedded interpreter for the restricted Python subset submitted code is
//! written in.
//!
//! The language has no file, process or network primitives at all; the only
//! way out of the interpreter is through [`HostFunction`]s the embedder binds,
//! and those exchange JSON only.

pub mod ast;
mod builtins;
pub mod error;
pub mod host;
mod interp;
pub mod lexer;
mod methods;
mod modules;
pub mod output;
pub mod parser;
pub mod value;

pub use error::{Exception, ScriptError, ScriptResult};
pub use host::{HostCall, HostError, HostFunction, HostValue};
pub use interp::{Interpreter, InterpreterOptions};
pub use output::{OutputCapture, TRUNCATION_MARKER};
pub use value::Value;
