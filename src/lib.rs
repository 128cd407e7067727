//! Codemode Runtime - code execution for AI agents
//!
//! Runs agent-generated code against a lazily discovered set of tools, inside
//! a sandbox with hard time, memory and output ceilings, with sensitive values
//! tokenized on the way in and out.
//!
//! # Features
//!
//! - **Progressive discovery**: agents search tool metadata and load only the
//!   implementations they call
//! - **Secure sandbox**: static validation, an embedded interpreter with no
//!   host primitives, gated imports and a deadline watchdog
//! - **Privacy layer**: reversible PII tokenization and credential redaction
//! - **Session state**: `saveState`/`loadState` across executions, with
//!   snapshot and restore
//!
//! # Quick Start
//!
//! ```no_run
//! use codemode_runtime::{providers, ExecutionRuntime, RuntimeConfig};
//!
//! # async fn demo() {
//! let mut runtime = ExecutionRuntime::new(RuntimeConfig::default(), providers::marina_plugins());
//!
//! let result = runtime
//!     .run("hits = searchTools('vessel')\nresult = [t['name'] for t in hits]")
//!     .await;
//! assert!(result.success);
//! # }
//! ```

pub mod config;
pub mod error;
pub mod permissions;
pub mod privacy;
pub mod providers;
pub mod runtime;
pub mod sandbox;
pub mod script;
pub mod tools;
pub mod validate;

// Re-export main types
pub use config::{LoggingConfig, PrivacyConfig, RuntimeConfig, SandboxConfig, ToolsConfig};
pub use error::{SandboxError, SandboxResult};
pub use permissions::{HostCapability, ImportGate, ModulePermission, PermissionLevel};
pub use privacy::{filter_sensitive_data, PiiCategory, PiiToken, PrivacyLayer, PrivacyReport};
pub use runtime::{ExecuteOptions, ExecutionResult, ExecutionRuntime, RuntimeStatus};
pub use sandbox::{
    ExecutionContext, ExecutionOutcome, SandboxOutput, SandboxState, SandboxStatus, SecureSandbox,
};
pub use tools::{
    PluginRegistry, ProviderManifest, ProviderPlugin, ToolError, ToolHandle, ToolLoader,
    ToolMetadata,
};
pub use validate::{PatternFamily, Validator, Violation};
