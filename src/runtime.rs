//! Composes tool discovery, the privacy layer and the sandbox into one
//! execution call.

use crate::config::RuntimeConfig;
use crate::error::SandboxResult;
use crate::privacy::{filter_sensitive_data, PrivacyLayer};
use crate::sandbox::{ExecutionContext, SandboxOutput, SandboxStatus, SecureSandbox};
use crate::script::{lexer, HostCall, HostError, HostFunction, HostValue};
use crate::tools::{PluginRegistry, ToolHandle, ToolLoader};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Assumed metadata size of one tool that never had to be shown.
const METADATA_TOKENS_PER_TOOL: u64 = 150;
/// Assumed ratio of intermediate data to the returned result.
const INTERMEDIATE_DATA_RATIO: u64 = 10;

/// Outcome of one `execute` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub success: bool,
    pub result: Option<Json>,
    pub stdout: String,
    pub stderr: String,
    /// `provider/name` of every tool loaded, in first-load order
    pub tools_used: Vec<String>,
    /// Informational estimate only
    pub tokens_saved: u64,
    /// Seconds
    pub execution_time: f64,
    pub executed_at: i64,
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Caller variables and functions; the runtime's own functions win on clashes.
    pub context: Option<ExecutionContext>,
    pub validate: bool,
    pub preserve_privacy: bool,
    /// Overrides the configured deadline.
    pub timeout: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            context: None,
            validate: true,
            preserve_privacy: true,
            timeout: None,
        }
    }
}

impl ExecuteOptions {
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn preserve_privacy(mut self, preserve: bool) -> Self {
        self.preserve_privacy = preserve;
        self
    }
}

/// Runtime status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub id: String,
    pub sandbox: SandboxStatus,
    pub execution_count: usize,
    pub session_keys: Vec<String>,
    pub providers: Vec<String>,
    pub discovered_tools: usize,
    pub pii_tokens: usize,
}

#[derive(Serialize)]
struct SessionSnapshot<'a> {
    session_state: &'a Map<String, Json>,
    execution_history: &'a [ExecutionResult],
}

#[derive(Deserialize)]
struct RestoredSession {
    #[serde(default)]
    session_state: Map<String, Json>,
}

type SessionState = Arc<Mutex<Map<String, Json>>>;
type ToolLog = Arc<Mutex<Vec<String>>>;

/// Runs agent code against lazily discovered tools
#[derive(Debug)]
pub struct ExecutionRuntime {
    pub id: String,
    config: RuntimeConfig,
    loader: Arc<ToolLoader>,
    sandbox: SecureSandbox,
    privacy: Arc<PrivacyLayer>,
    session: SessionState,
    history: Vec<ExecutionResult>,
}

impl ExecutionRuntime {
    pub fn new(config: RuntimeConfig, plugins: PluginRegistry) -> Self {
        let loader = ToolLoader::new(config.tools.root.clone(), plugins);
        Self {
            id: Uuid::new_v4().to_string(),
            sandbox: SecureSandbox::new(config.sandbox.clone()),
            privacy: Arc::new(PrivacyLayer::with_format(config.privacy.preserve_format)),
            loader: Arc::new(loader),
            session: Arc::new(Mutex::new(Map::new())),
            history: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn loader(&self) -> &ToolLoader {
        &self.loader
    }

    pub fn privacy(&self) -> &PrivacyLayer {
        &self.privacy
    }

    pub fn sandbox(&self) -> &SecureSandbox {
        &self.sandbox
    }

    /// Options with privacy following the `[privacy]` config section.
    pub fn default_options(&self) -> ExecuteOptions {
        ExecuteOptions::default().preserve_privacy(self.config.privacy.enabled)
    }

    pub async fn run(&mut self, code: &str) -> ExecutionResult {
        let opts = self.default_options();
        self.execute_with(code, opts).await
    }

    pub async fn execute(
        &mut self,
        code: &str,
        context: Option<ExecutionContext>,
        validate: bool,
        preserve_privacy: bool,
    ) -> ExecutionResult {
        let opts = ExecuteOptions {
            context,
            validate,
            preserve_privacy,
            timeout: None,
        };
        self.execute_with(code, opts).await
    }

    /// Execute `code`; never fails, faults come back as an unsuccessful result.
    pub async fn execute_with(&mut self, code: &str, opts: ExecuteOptions) -> ExecutionResult {
        let started = Instant::now();
        let tools_used: ToolLog = Arc::new(Mutex::new(Vec::new()));
        info!(
            runtime = %self.id,
            validate = opts.validate,
            privacy = opts.preserve_privacy,
            "Starting execution"
        );

        let outcome = self.attempt(code, opts, &tools_used).await;
        let tools_used = lock(&tools_used).clone();

        let mut result = ExecutionResult {
            id: Uuid::new_v4().to_string(),
            success: false,
            result: None,
            stdout: String::new(),
            stderr: String::new(),
            tools_used,
            tokens_saved: 0,
            execution_time: 0.0,
            executed_at: chrono::Utc::now().timestamp(),
        };
        match outcome {
            Ok(output) => {
                result.tokens_saved = self.tokens_saved(&result.tools_used, output.result.as_ref());
                result.success = true;
                result.result = output.result;
                result.stdout = output.stdout;
                result.stderr = output.stderr;
            }
            Err(err) => {
                let partial = self.sandbox.take_last_output().unwrap_or_default();
                let mut stderr = partial.stderr;
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&err.diagnostic());
                result.stdout = partial.stdout;
                result.stderr = stderr;
            }
        }
        result.execution_time = started.elapsed().as_secs_f64();

        info!(
            runtime = %self.id,
            success = result.success,
            tools = result.tools_used.len(),
            seconds = result.execution_time,
            "Execution finished"
        );
        self.history.push(result.clone());
        result
    }

    async fn attempt(
        &mut self,
        code: &str,
        opts: ExecuteOptions,
        tools_used: &ToolLog,
    ) -> SandboxResult<SandboxOutput> {
        if opts.validate {
            self.sandbox.check(code)?;
        }

        let mut context = opts.context.unwrap_or_default();
        let code = if opts.preserve_privacy {
            for value in context.variables.values_mut() {
                *value = self.privacy.tokenize_value(value);
            }
            let tokenized =
                tokenize_literals(&self.privacy, code, self.config.privacy.preserve_format);
            if tokenized != code {
                warn!(runtime = %self.id, "Tokenized sensitive values in submitted code");
            }
            tokenized
        } else {
            code.to_string()
        };
        context.extend(self.bind_functions(opts.preserve_privacy, tools_used));

        self.sandbox
            .execute_unchecked(&code, context, opts.timeout)
            .await
    }

    /// `searchTools`, `loadTool`, `listProviders`, `listTools`, `saveState`, `loadState`.
    fn bind_functions(&self, preserve_privacy: bool, tools_used: &ToolLog) -> ExecutionContext {
        let privacy = preserve_privacy.then(|| Arc::clone(&self.privacy));
        let default_limit = self.config.tools.default_search_limit;

        let loader = Arc::clone(&self.loader);
        let search_tools = HostFunction::new("searchTools", move |call| {
            let query = call.str_arg(0, "query")?.unwrap_or_default();
            let provider = call.str_arg(1, "provider")?;
            let category = call.str_arg(2, "category")?;
            let limit = match call.arg(3, "limit") {
                None | Some(Json::Null) => default_limit,
                Some(value) => value.as_u64().ok_or_else(|| {
                    HostError::new("TypeError", "limit must be a non-negative integer")
                })? as usize,
            };
            let hits = loader.search_tools(&query, provider.as_deref(), category.as_deref(), limit);
            to_host(&hits)
        });

        let loader = Arc::clone(&self.loader);
        let log = Arc::clone(tools_used);
        let tool_privacy = privacy.clone();
        let load_tool = HostFunction::new("loadTool", move |call| {
            let provider = call.required_str(0, "provider")?;
            let name = call.required_str(1, "name")?;
            let handle = loader
                .load_tool_function(&provider, &name)
                .map_err(|err| HostError::new("ToolError", err.to_string()))?;
            let mut used = lock(&log);
            if !used.contains(&handle.id) {
                used.push(handle.id.clone());
            }
            Ok(HostValue::Function(tool_function(handle, tool_privacy.clone())))
        });

        let loader = Arc::clone(&self.loader);
        let list_providers = HostFunction::new("listProviders", move |_| to_host(&loader.list_providers()));

        let loader = Arc::clone(&self.loader);
        let list_tools = HostFunction::new("listTools", move |call| {
            let provider = call.required_str(0, "provider")?;
            let tools = loader
                .list_tools(&provider)
                .map_err(|err| HostError::new("ToolError", err.to_string()))?;
            to_host(&tools)
        });

        let session = Arc::clone(&self.session);
        let state_privacy = privacy.clone();
        let save_state = HostFunction::new("saveState", move |call| {
            let key = call.required_str(0, "key")?;
            let value = call.arg(1, "value").cloned().unwrap_or(Json::Null);
            // Stored in the clear so snapshots stay meaningful to a new instance.
            let value = match &state_privacy {
                Some(privacy) => privacy.detokenize_value(&value),
                None => value,
            };
            lock(&session).insert(key, value);
            Ok(HostValue::Json(Json::Null))
        });

        let session = Arc::clone(&self.session);
        let load_state = HostFunction::new("loadState", move |call| {
            let key = call.required_str(0, "key")?;
            let stored = lock(&session).get(&key).cloned();
            let value = match (stored, &privacy) {
                (Some(value), Some(privacy)) => privacy.tokenize_value(&value),
                (Some(value), None) => value,
                (None, _) => call.arg(1, "default").cloned().unwrap_or(Json::Null),
            };
            Ok(HostValue::Json(value))
        });

        ExecutionContext::new()
            .with_function(search_tools)
            .with_function(load_tool)
            .with_function(list_providers)
            .with_function(list_tools)
            .with_function(save_state)
            .with_function(load_state)
    }

    fn tokens_saved(&self, tools_used: &[String], result: Option<&Json>) -> u64 {
        if tools_used.is_empty() {
            return 0;
        }
        let discovered = self.loader.total_tools() as u64;
        let unloaded = discovered.saturating_sub(tools_used.len() as u64);
        let result_tokens = result.map(|r| r.to_string().len() as u64 / 4).unwrap_or(0);
        unloaded * METADATA_TOKENS_PER_TOOL + result_tokens * (INTERMEDIATE_DATA_RATIO - 1)
    }

    pub fn history(&self) -> &[ExecutionResult] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn session_state(&self) -> Map<String, Json> {
        lock(&self.session).clone()
    }

    /// Write session state and history as one JSON document.
    pub fn snapshot(&self, path: &Path) -> SandboxResult<()> {
        let state = self.session_state();
        let snapshot = SessionSnapshot {
            session_state: &state,
            execution_history: &self.history,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        debug!(path = %path.display(), keys = state.len(), "Session snapshot written");
        Ok(())
    }

    /// Replace session state from a snapshot; history in the file is ignored.
    pub fn restore(&mut self, path: &Path) -> SandboxResult<()> {
        let raw = std::fs::read_to_string(path)?;
        let restored: RestoredSession = serde_json::from_str(&raw)?;
        info!(path = %path.display(), keys = restored.session_state.len(), "Session state restored");
        *lock(&self.session) = restored.session_state;
        Ok(())
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            id: self.id.clone(),
            sandbox: self.sandbox.status(),
            execution_count: self.history.len(),
            session_keys: self.session_state().keys().cloned().collect(),
            providers: self.loader.list_providers(),
            discovered_tools: self.loader.total_tools(),
            pii_tokens: self.privacy.tokens().len(),
        }
    }
}

impl Default for ExecutionRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default(), PluginRegistry::new())
    }
}

/// Tokenize PII inside string literals only; numbers and code structure are
/// left as written so the program still parses to the same values.
fn tokenize_literals(privacy: &PrivacyLayer, code: &str, preserve_format: bool) -> String {
    let mut out = String::with_capacity(code.len());
    let mut copied = 0;
    for span in lexer::string_spans(code) {
        out.push_str(&code[copied..span.start]);
        out.push_str(&privacy.tokenize_pii(&code[span.clone()], preserve_format).0);
        copied = span.end;
    }
    out.push_str(&code[copied..]);
    out
}

/// Wrap a resolved tool as a script-callable function.
fn tool_function(handle: ToolHandle, privacy: Option<Arc<PrivacyLayer>>) -> HostFunction {
    let name = handle.metadata.name.clone();
    HostFunction::new(name, move |call| {
        let mut params = tool_params(call);
        if let Some(privacy) = &privacy {
            params = privacy.detokenize_value(&params);
        }
        debug!(tool = %handle.id, "Invoking tool");
        let output = handle
            .call(params)
            .map_err(|err| HostError::new("ToolError", format!("{}: {}", handle.id, err)))?;
        let output = match &privacy {
            Some(privacy) => privacy.tokenize_value(&filter_sensitive_data(&output)),
            None => output,
        };
        Ok(HostValue::Json(output))
    })
}

/// Keyword arguments become an object; a single positional object absorbs them.
fn tool_params(call: HostCall) -> Json {
    let HostCall { mut args, mut kwargs } = call;
    match args.len() {
        0 => Json::Object(kwargs),
        1 => match args.remove(0) {
            Json::Object(mut map) => {
                map.append(&mut kwargs);
                Json::Object(map)
            }
            single if kwargs.is_empty() => single,
            single => {
                kwargs.insert("args".to_string(), Json::Array(vec![single]));
                Json::Object(kwargs)
            }
        },
        _ if kwargs.is_empty() => Json::Array(args),
        _ => {
            kwargs.insert("args".to_string(), Json::Array(args));
            Json::Object(kwargs)
        }
    }
}

fn to_host<T: Serialize>(value: &T) -> Result<HostValue, HostError> {
    serde_json::to_value(value)
        .map(HostValue::Json)
        .map_err(|err| HostError::new("RuntimeError", err.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ProviderManifest, ProviderPlugin, ToolManifest};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn runtime() -> ExecutionRuntime {
        let manifest = ProviderManifest::new("echo").tool(
            "echo",
            ToolManifest {
                description: "Echo parameters back".to_string(),
                ..ToolManifest::default()
            },
        );
        let plugins = PluginRegistry::new().with(
            ProviderPlugin::new("echo")
                .with_manifest(manifest)
                .entry("echo", Ok),
        );
        ExecutionRuntime::new(RuntimeConfig::default(), plugins)
    }

    #[test]
    fn params_follow_call_shape() {
        let call = |args: Vec<Json>, kwargs: Vec<(&str, Json)>| HostCall {
            args,
            kwargs: kwargs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        };
        assert_eq!(tool_params(call(vec![], vec![("a", json!(1))])), json!({"a": 1}));
        assert_eq!(
            tool_params(call(vec![json!({"a": 1})], vec![("b", json!(2))])),
            json!({"a": 1, "b": 2})
        );
        assert_eq!(tool_params(call(vec![json!("x")], vec![])), json!("x"));
        assert_eq!(tool_params(call(vec![json!(1), json!(2)], vec![])), json!([1, 2]));
    }

    #[tokio::test]
    async fn loaded_tool_round_trips_through_privacy() {
        let mut rt = runtime();
        let out = rt
            .run("echo = loadTool('echo', 'echo')\nresult = echo(contact='dana@dock.io', password='hunter2')")
            .await;
        assert!(out.success, "{}", out.stderr);
        let value = out.result.unwrap();
        assert_eq!(value["password"], json!("[REDACTED]"));
        let contact = value["contact"].as_str().unwrap();
        assert!(contact.starts_with("[EMAIL_") && contact.ends_with("@dock.io"));
        assert_eq!(out.tools_used, vec!["echo/echo"]);
    }

    #[tokio::test]
    async fn tokens_saved_only_counts_when_tools_load() {
        let mut rt = runtime();
        assert_eq!(rt.run("result = searchTools('echo')").await.tokens_saved, 0);
        let out = rt.run("e = loadTool('echo', 'echo')\nresult = e({'n': 1})").await;
        // one tool discovered and loaded; result `{"n":1}` is 7 bytes
        assert_eq!(out.tokens_saved, 9);
    }

    #[tokio::test]
    async fn state_survives_between_executions() {
        let mut rt = runtime();
        assert!(rt.run("saveState('count', 3)").await.success);
        let out = rt.run("result = loadState('count') + loadState('missing', 1)").await;
        assert_eq!(out.result, Some(json!(4)));
        assert_eq!(rt.session_state().get("count"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn failures_keep_partial_stdout() {
        let mut rt = runtime();
        let out = rt.run("print('step 1')\nraise ValueError('bad input')").await;
        assert!(!out.success);
        assert_eq!(out.stdout, "step 1\n");
        assert!(out.stderr.contains("SandboxExecutionError: ValueError: bad input"));
        assert_eq!(out.tokens_saved, 0);
        assert_eq!(rt.history().len(), 1);
    }

    #[test]
    fn only_string_literals_are_tokenized() {
        let privacy = PrivacyLayer::with_format(false);
        let code = "stamp = 1700000000\npi = 3.1415926535\nwho = 'dana@dock.io'  # 415-555-0142";
        let out = tokenize_literals(&privacy, code, false);
        assert!(out.starts_with("stamp = 1700000000\npi = 3.1415926535\nwho = '[EMAIL_"), "{}", out);
        assert!(out.ends_with("]'  # 415-555-0142"), "{}", out);
        assert_eq!(privacy.detokenize(&out), code);
    }

    #[tokio::test]
    async fn late_host_calls_do_not_touch_session() {
        let manifest = ProviderManifest::new("ops").tool("slow", ToolManifest::default());
        let plugins = PluginRegistry::new().with(
            ProviderPlugin::new("ops")
                .with_manifest(manifest)
                .entry("slow", |_| {
                    std::thread::sleep(Duration::from_millis(800));
                    Ok(Json::Null)
                }),
        );
        let mut config = RuntimeConfig::default();
        config.sandbox = config.sandbox.with_timeout(Duration::from_millis(100));
        let mut rt = ExecutionRuntime::new(config, plugins);

        let out = rt
            .run("slow = loadTool('ops', 'slow')\nslow()\nsaveState('after', 1)")
            .await;
        assert!(!out.success);
        assert!(out.stderr.contains("SandboxTimeoutError"), "{}", out.stderr);

        // let the detached worker finish its blocking call
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(rt.session_state().get("after").is_none());
    }
}
