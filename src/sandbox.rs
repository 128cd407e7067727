use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::permissions::ImportGate;
use crate::script::{
    HostFunction, Interpreter, InterpreterOptions, OutputCapture, ScriptError, ScriptResult,
};
use crate::validate::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stack for the interpreter thread; script recursion is bounded separately.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// How long the watchdog waits past the deadline before cancelling the worker.
const WATCHDOG_GRACE: Duration = Duration::from_millis(250);

/// Lifecycle of a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxState {
    /// Ready for the next submission
    Idle,
    /// Running the static checks
    Validating,
    /// Interpreter is running
    Executing,
}

/// How the last submission ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    /// Ran to the end
    Completed,
    /// Refused by the validator, nothing executed
    Rejected,
    /// Deadline expired
    TimedOut,
    /// Heap ceiling hit
    MemoryExceeded,
    /// Uncaught exception or syntax error
    Errored,
}

/// Names bound into the script's global scope before it runs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub variables: Map<String, Json>,
    pub functions: Vec<HostFunction>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: &str, value: Json) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    pub fn with_function(mut self, function: HostFunction) -> Self {
        self.functions.push(function);
        self
    }

    /// Merge `other` in; its entries win on name clashes.
    pub fn extend(&mut self, other: ExecutionContext) {
        self.variables.extend(other.variables);
        for function in other.functions {
            self.functions.retain(|f| f.name() != function.name());
            self.functions.push(function);
        }
    }
}

/// What a finished script produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxOutput {
    /// The script's global `result`, if it assigned one
    pub result: Option<Json>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

/// Executes submitted code under time, memory and output ceilings
#[derive(Debug)]
pub struct SecureSandbox {
    pub id: String,
    config: SandboxConfig,
    validator: Validator,
    gate: ImportGate,
    state: SandboxState,
    last_outcome: Option<ExecutionOutcome>,
    last_output: Option<SandboxOutput>,
    execution_count: usize,
}

impl SecureSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            validator: Validator::from_config(&config),
            gate: ImportGate::from_config(&config),
            config,
            state: SandboxState::Idle,
            last_outcome: None,
            last_output: None,
            execution_count: 0,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn last_outcome(&self) -> Option<ExecutionOutcome> {
        self.last_outcome
    }

    /// Output of the last submission, including the partial output of one that faulted.
    pub fn last_output(&self) -> Option<&SandboxOutput> {
        self.last_output.as_ref()
    }

    pub fn take_last_output(&mut self) -> Option<SandboxOutput> {
        self.last_output.take()
    }

    /// Static checks only.
    pub fn validate(&self, code: &str) -> SandboxResult<()> {
        self.validator.validate(code)
    }

    /// Run the static checks, recording a rejection as this sandbox's outcome.
    pub fn check(&mut self, code: &str) -> SandboxResult<()> {
        self.state = SandboxState::Validating;
        self.last_output = None;
        let verdict = self.validator.validate(code);
        match &verdict {
            Ok(()) => self.state = SandboxState::Idle,
            Err(err) => {
                warn!(sandbox = %self.id, "Rejected submission: {}", err);
                self.finish(ExecutionOutcome::Rejected, SandboxOutput::default());
            }
        }
        verdict
    }

    /// Validate and run `code` with `context` bound, returning the script's
    /// `result` and captured output.
    ///
    /// `timeout` overrides the configured deadline for this call only.
    pub async fn execute(
        &mut self,
        code: &str,
        context: ExecutionContext,
        timeout: Option<Duration>,
    ) -> SandboxResult<SandboxOutput> {
        self.check(code)?;
        self.execute_unchecked(code, context, timeout).await
    }

    /// Run code that has already passed [`check`](Self::check).
    pub async fn execute_unchecked(
        &mut self,
        code: &str,
        context: ExecutionContext,
        timeout: Option<Duration>,
    ) -> SandboxResult<SandboxOutput> {
        self.state = SandboxState::Executing;
        self.last_output = None;
        self.execution_count += 1;
        let limit = timeout.unwrap_or_else(|| self.config.timeout());
        info!(
            sandbox = %self.id,
            timeout_ms = limit.as_millis() as u64,
            bytes = code.len(),
            "Executing submission"
        );

        let output = Arc::new(Mutex::new(OutputCapture::new(self.config.max_output_bytes)));
        let cancel = Arc::new(AtomicBool::new(false));
        let mut opts = InterpreterOptions::new(self.gate.clone(), Arc::clone(&output));
        opts.deadline = Instant::now().checked_add(limit);
        opts.memory_limit = self.config.memory_limit_bytes;
        opts.cancel = Arc::clone(&cancel);

        let (tx, rx) = oneshot::channel();
        let source = code.to_string();
        let spawned = std::thread::Builder::new()
            .name(format!("sandbox-{}", &self.id[..8]))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let verdict = run_script(opts, &source, context);
                // The receiver is gone only if the watchdog already gave up.
                let _ = tx.send(verdict);
            });
        if let Err(err) = spawned {
            self.finish(ExecutionOutcome::Errored, SandboxOutput::default());
            return Err(SandboxError::IoError(err));
        }

        let verdict = match tokio::time::timeout(limit.saturating_add(WATCHDOG_GRACE), rx).await {
            Ok(Ok(verdict)) => verdict.map_err(|err| self.classify(err, limit)),
            Ok(Err(_)) => Err(SandboxError::Execution {
                message: "sandbox worker terminated unexpectedly".to_string(),
                trace: String::new(),
            }),
            Err(_) => {
                warn!(sandbox = %self.id, "Watchdog cancelled a worker past its deadline");
                cancel.store(true, Ordering::Relaxed);
                Err(SandboxError::Timeout { limit })
            }
        };

        let captured = {
            let output = output.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            SandboxOutput {
                result: None,
                stdout: output.stdout().to_string(),
                stderr: output.stderr().to_string(),
                truncated: output.is_truncated(),
            }
        };

        match verdict {
            Ok(result) => {
                let out = SandboxOutput { result, ..captured };
                debug!(sandbox = %self.id, stdout_bytes = out.stdout.len(), "Submission completed");
                self.finish(ExecutionOutcome::Completed, out.clone());
                Ok(out)
            }
            Err(err) => {
                let outcome = match &err {
                    SandboxError::Timeout { .. } => ExecutionOutcome::TimedOut,
                    SandboxError::MemoryExceeded { .. } => ExecutionOutcome::MemoryExceeded,
                    _ => ExecutionOutcome::Errored,
                };
                warn!(sandbox = %self.id, ?outcome, "Submission failed: {}", err);
                self.finish(outcome, captured);
                Err(err)
            }
        }
    }

    fn classify(&self, err: ScriptError, limit: Duration) -> SandboxError {
        match err {
            ScriptError::Timeout => SandboxError::Timeout { limit },
            ScriptError::MemoryExceeded(detail) => SandboxError::MemoryExceeded {
                limit: self.config.memory_limit_bytes,
                detail,
            },
            ScriptError::Syntax { .. } => SandboxError::Execution {
                message: err.to_string(),
                trace: String::new(),
            },
            ScriptError::Exception(exc) => SandboxError::Execution {
                message: exc.to_string(),
                trace: exc.traceback(),
            },
        }
    }

    fn finish(&mut self, outcome: ExecutionOutcome, output: SandboxOutput) {
        self.last_outcome = Some(outcome);
        self.last_output = Some(output);
        self.state = SandboxState::Idle;
    }

    pub fn status(&self) -> SandboxStatus {
        SandboxStatus {
            id: self.id.clone(),
            state: self.state,
            last_outcome: self.last_outcome,
            execution_count: self.execution_count,
            allowed_imports: self.gate.allowed_modules(),
        }
    }
}

/// Runs on the worker thread: the interpreter's values never leave it.
fn run_script(
    opts: InterpreterOptions,
    source: &str,
    context: ExecutionContext,
) -> ScriptResult<Option<Json>> {
    let mut interp = Interpreter::new(opts);
    for (name, value) in &context.variables {
        interp.define_json(name, value);
    }
    for function in context.functions {
        interp.define_host(function);
    }
    interp.run(source)?;
    interp.global("result").map(|value| value.to_json()).transpose()
}

/// Sandbox status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub id: String,
    pub state: SandboxState,
    pub last_outcome: Option<ExecutionOutcome>,
    pub execution_count: usize,
    pub allowed_imports: Vec<String>,
}

impl Default for SecureSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{HostError, HostValue};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sandbox() -> SecureSandbox {
        SecureSandbox::new(SandboxConfig::default().with_timeout(Duration::from_secs(5)))
    }

    async fn run(code: &str) -> SandboxResult<SandboxOutput> {
        sandbox().execute(code, ExecutionContext::new(), None).await
    }

    #[tokio::test]
    async fn returns_assigned_result() {
        let out = run("result = 2 + 2").await.unwrap();
        assert_eq!(out.result, Some(json!(4)));
        assert_eq!(out.stdout, "");
    }

    #[tokio::test]
    async fn missing_result_is_none() {
        let out = run("x = 1\nprint('hi')").await.unwrap();
        assert_eq!(out.result, None);
        assert_eq!(out.stdout, "hi\n");
    }

    #[tokio::test]
    async fn structured_result_converts_to_json() {
        let out = run("result = {'a': [1, 2.5, None], 'b': True}").await.unwrap();
        assert_eq!(out.result, Some(json!({"a": [1, 2.5, null], "b": true})));
    }

    #[tokio::test]
    async fn rejected_code_never_runs() {
        let mut sb = sandbox();
        let err = sb
            .execute("print('x')\nimport os", ExecutionContext::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ValidationRejected(_)));
        assert_eq!(sb.last_outcome(), Some(ExecutionOutcome::Rejected));
        assert_eq!(sb.last_output().map(|o| o.stdout.as_str()), Some(""));
        assert_eq!(sb.state(), SandboxState::Idle);
    }

    #[test_log::test(tokio::test)]
    async fn infinite_loop_times_out() {
        let mut sb = sandbox();
        let started = Instant::now();
        let err = sb
            .execute(
                "print('before')\nwhile True:\n    pass",
                ExecutionContext::new(),
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
        assert!(err.to_string().starts_with("SandboxTimeoutError"));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sb.last_outcome(), Some(ExecutionOutcome::TimedOut));
        assert_eq!(sb.last_output().map(|o| o.stdout.as_str()), Some("before\n"));
    }

    #[tokio::test]
    async fn watchdog_fires_when_a_host_call_blocks() {
        let slow = HostFunction::new("slow", |_| {
            std::thread::sleep(Duration::from_secs(3));
            Ok(HostValue::Json(Json::Null))
        });
        let started = Instant::now();
        let err = sandbox()
            .execute(
                "slow()",
                ExecutionContext::new().with_function(slow),
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn memory_ceiling_is_enforced() {
        let mut sb = SecureSandbox::new(SandboxConfig::default().with_memory_limit(1024 * 1024));
        let err = sb
            .execute(
                "data = []\nwhile True:\n    data.append('x' * 1000)",
                ExecutionContext::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::MemoryExceeded { .. }));
        assert_eq!(sb.last_outcome(), Some(ExecutionOutcome::MemoryExceeded));
    }

    #[tokio::test]
    async fn output_is_truncated_with_marker() {
        let mut sb = SecureSandbox::new(SandboxConfig::default().with_max_output(32));
        let out = sb
            .execute("for i in range(100):\n    print(i)", ExecutionContext::new(), None)
            .await
            .unwrap();
        assert!(out.truncated);
        assert!(out.stdout.ends_with(crate::script::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn uncaught_exception_keeps_partial_output_and_trace() {
        let mut sb = sandbox();
        let err = sb
            .execute("print('partial')\nx = 1 / 0", ExecutionContext::new(), None)
            .await
            .unwrap_err();
        match &err {
            SandboxError::Execution { message, trace } => {
                assert_eq!(message, "ZeroDivisionError: division by zero");
                assert!(trace.contains("line 2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sb.last_outcome(), Some(ExecutionOutcome::Errored));
        assert_eq!(sb.last_output().map(|o| o.stdout.as_str()), Some("partial\n"));
    }

    #[tokio::test]
    async fn imports_follow_the_allow_list() {
        let out = run("import math\nresult = math.sqrt(16)").await.unwrap();
        assert_eq!(out.result, Some(json!(4.0)));

        let out = run("try:\n    import random\nexcept ImportError:\n    result = 'denied'")
            .await
            .unwrap();
        assert_eq!(out.result, Some(json!("denied")));
    }

    #[tokio::test]
    async fn context_binds_variables_and_functions() {
        let double = HostFunction::new("double", |call| {
            let n = call.arg(0, "n").and_then(Json::as_i64).ok_or_else(|| {
                HostError::new("TypeError", "double() needs an integer")
            })?;
            Ok(HostValue::Json(json!(n * 2)))
        });
        let context = ExecutionContext::new()
            .with_variable("base", json!(21))
            .with_function(double);
        let out = sandbox()
            .execute("result = double(base)", context, None)
            .await
            .unwrap();
        assert_eq!(out.result, Some(json!(42)));
    }

    #[tokio::test]
    async fn unserializable_result_is_an_execution_error() {
        let err = run("def f():\n    return 1\nresult = f").await.unwrap_err();
        assert!(matches!(err, SandboxError::Execution { .. }));
    }

    #[test]
    fn context_extend_replaces_functions_by_name() {
        let mut base = ExecutionContext::new()
            .with_function(HostFunction::new("f", |_| Ok(HostValue::Json(json!(1)))));
        base.extend(
            ExecutionContext::new()
                .with_variable("x", json!(1))
                .with_function(HostFunction::new("f", |_| Ok(HostValue::Json(json!(2))))),
        );
        assert_eq!(base.functions.len(), 1);
        assert_eq!(base.variables.len(), 1);
    }
}
