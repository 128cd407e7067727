//! Static validation of submitted code.
//!
//! Runs before anything executes and rejects:
//!
//! - **Oversized submissions** - longer than `max_code_length`
//! - **Null bytes** - never valid in source text
//! - **Process spawning** - `subprocess`, `os.system`, `os.popen`, ...
//! - **Dynamic evaluation** - `eval(`, `exec(`, `compile(`, `__import__`
//! - **Introspection escapes** - dunder attributes, `globals()`, `getattr(`
//! - **File and network primitives** - `open(`, `socket`, `urllib`, ...
//! - **Host imports** - `import os`, `from sys import ...`
//!
//! The scan is a text heuristic: a match inside a string literal or comment
//! still rejects the submission.

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Family a forbidden construct belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternFamily {
    Process,
    DynamicEval,
    Introspection,
    FileWrite,
    Network,
    HostImport,
}

impl fmt::Display for PatternFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatternFamily::Process => "process spawning",
            PatternFamily::DynamicEval => "dynamic code evaluation",
            PatternFamily::Introspection => "interpreter introspection",
            PatternFamily::FileWrite => "file access",
            PatternFamily::Network => "network access",
            PatternFamily::HostImport => "host module import",
        };
        f.write_str(name)
    }
}

struct ForbiddenPattern {
    family: PatternFamily,
    label: &'static str,
    regex: Regex,
}

fn pattern(family: PatternFamily, label: &'static str, re: &str) -> ForbiddenPattern {
    ForbiddenPattern {
        family,
        label,
        regex: Regex::new(re).expect("forbidden pattern must compile"),
    }
}

static FORBIDDEN: LazyLock<Vec<ForbiddenPattern>> = LazyLock::new(|| {
    use PatternFamily::*;
    vec![
        pattern(Process, "subprocess", r"\bsubprocess\b"),
        pattern(Process, "os.system", r"\bos\s*\.\s*(system|popen|exec\w*|spawn\w*|fork|kill|remove|unlink|rmdir|removedirs|rename)\b"),
        pattern(Process, "pty", r"\bpty\s*\.\s*spawn\b"),
        pattern(DynamicEval, "eval()", r"\beval\s*\("),
        pattern(DynamicEval, "exec()", r"\bexec\s*\("),
        pattern(DynamicEval, "compile()", r"\bcompile\s*\("),
        pattern(DynamicEval, "__import__", r"__import__"),
        pattern(Introspection, "globals()", r"\b(globals|locals|vars)\s*\("),
        pattern(Introspection, "getattr()", r"\b(getattr|setattr|delattr)\s*\("),
        pattern(Introspection, "dunder attribute", r"\.\s*__\w+__"),
        pattern(Introspection, "__builtins__", r"__builtins__"),
        pattern(FileWrite, "open()", r"\bopen\s*\("),
        pattern(FileWrite, "shutil", r"\bshutil\b"),
        pattern(Network, "socket", r"\bsocket\s*\."),
        pattern(Network, "network import", r"(?m)^\s*(import|from)\s+(socket|urllib|http|requests|ftplib|smtplib)\b"),
        pattern(HostImport, "host import", r"(?m)^\s*(import|from)\s+(os|sys|subprocess|ctypes|importlib|builtins|multiprocessing|threading|pickle|inspect)\b"),
    ]
});

/// A single forbidden construct found in submitted code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub family: PatternFamily,
    pub construct: &'static str,
    pub line: usize,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) on line {}", self.family, self.construct, self.line)
    }
}

/// Static pre-execution validator.
#[derive(Debug, Clone)]
pub struct Validator {
    max_code_length: usize,
    allow_network: bool,
    allow_file_write: bool,
}

impl Validator {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            max_code_length: config.max_code_length,
            allow_network: config.allow_network,
            allow_file_write: config.allow_file_write,
        }
    }

    /// Reject the code with an explicit reason, or accept it.
    pub fn validate(&self, code: &str) -> SandboxResult<()> {
        if code.len() > self.max_code_length {
            return Err(SandboxError::ValidationRejected(format!(
                "code length {} exceeds limit of {} bytes",
                code.len(),
                self.max_code_length
            )));
        }
        if code.contains('\0') {
            return Err(SandboxError::ValidationRejected(
                "null byte in code".to_string(),
            ));
        }

        if let Some(violation) = self.scan(code).into_iter().next() {
            return Err(SandboxError::ValidationRejected(format!(
                "forbidden construct: {}",
                violation
            )));
        }
        Ok(())
    }

    /// Every forbidden construct in the code, in pattern order.
    pub fn scan(&self, code: &str) -> Vec<Violation> {
        FORBIDDEN
            .iter()
            .filter(|p| self.applies(p.family))
            .filter_map(|p| {
                p.regex.find(code).map(|m| Violation {
                    family: p.family,
                    construct: p.label,
                    line: line_of(code, m.start()),
                })
            })
            .collect()
    }

    fn applies(&self, family: PatternFamily) -> bool {
        match family {
            PatternFamily::Network => !self.allow_network,
            PatternFamily::FileWrite => !self.allow_file_write,
            _ => true,
        }
    }
}

fn line_of(code: &str, offset: usize) -> usize {
    code[..offset].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::from_config(&SandboxConfig::default())
    }

    #[test]
    fn plain_code_passes() {
        let code = "total = 0\nfor i in range(10):\n    total += i\nresult = total\n";
        assert!(validator().validate(code).is_ok());
    }

    #[test]
    fn tool_execute_is_not_exec() {
        assert!(validator().validate("tool = loadTool('a', 'b')\nresult = tool.execute()").is_ok());
    }

    #[test]
    fn dangerous_constructs_are_rejected() {
        for code in [
            "import os",
            "from subprocess import run",
            "eval('1+1')",
            "exec(code)",
            "x = ().__class__",
            "__import__('os')",
            "f = open('/etc/passwd')",
            "import socket",
            "globals()['x'] = 1",
        ] {
            let err = validator().validate(code).unwrap_err();
            assert!(
                matches!(err, SandboxError::ValidationRejected(_)),
                "expected rejection for {code:?}"
            );
        }
    }

    #[test]
    fn violation_reports_line() {
        let violations = validator().scan("a = 1\nb = 2\neval('a')\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].family, PatternFamily::DynamicEval);
        assert_eq!(violations[0].line, 3);
    }

    #[test]
    fn length_ceiling() {
        let config = SandboxConfig {
            max_code_length: 8,
            ..SandboxConfig::default()
        };
        let err = Validator::from_config(&config).validate("result = 12345").unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn network_flag_relaxes_network_patterns_only() {
        let config = SandboxConfig {
            allow_network: true,
            ..SandboxConfig::default()
        };
        let validator = Validator::from_config(&config);
        assert!(validator.validate("import urllib").is_ok());
        assert!(validator.validate("import os").is_err());
    }
}
