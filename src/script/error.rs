use std::fmt;
use thiserror::Error;

/// A raised script exception.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: String,
    pub message: String,
    pub line: usize,
    /// Innermost frame last.
    pub trace: Vec<String>,
}

impl Exception {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            line: 0,
            trace: Vec::new(),
        }
    }

    /// Whether an `except <handler>` clause catches this exception.
    pub fn matches(&self, handler: &str) -> bool {
        match handler {
            "Exception" | "BaseException" => true,
            "LookupError" => matches!(self.kind.as_str(), "KeyError" | "IndexError" | "LookupError"),
            "ArithmeticError" => matches!(
                self.kind.as_str(),
                "ZeroDivisionError" | "OverflowError" | "ArithmeticError"
            ),
            other => self.kind == other,
        }
    }

    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in &self.trace {
            out.push_str("  ");
            out.push_str(frame);
            out.push('\n');
        }
        out.push_str(&self.to_string());
        out
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { message: String, line: usize },

    #[error("{0}")]
    Exception(Exception),

    #[error("deadline exceeded")]
    Timeout,

    #[error("{0}")]
    MemoryExceeded(String),
}

impl ScriptError {
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        ScriptError::Syntax {
            message: message.into(),
            line,
        }
    }

    pub fn raise(kind: &str, message: impl Into<String>) -> Self {
        ScriptError::Exception(Exception::new(kind, message))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raise("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::raise("ValueError", message)
    }
}

pub type ScriptResult<T> = Result<T, ScriptError>;
