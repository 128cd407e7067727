//! Capability discovery and lazy resolution.
//!
//! Metadata is cheap and searchable; implementations are only resolved when
//! code asks for one through [`ToolLoader::load_tool_function`].

mod loader;
mod metadata;
mod registry;

pub use loader::ToolLoader;
pub use metadata::{ProviderInfo, ToolManifest, ToolMetadata, PROVIDER_MANIFEST};
pub use registry::{PluginRegistry, ProviderManifest, ProviderPlugin, ToolHandler, ENTRY_POINT};

use serde_json::Value as Json;
use std::fmt;
use thiserror::Error;

/// Failure reported by a capability handler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ToolError::InvalidArguments(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ToolError::NotFound(message.into())
    }
}

/// A resolved capability, ready to invoke
#[derive(Clone)]
pub struct ToolHandle {
    pub id: String,
    pub metadata: ToolMetadata,
    handler: ToolHandler,
}

impl ToolHandle {
    pub(crate) fn new(metadata: ToolMetadata, handler: ToolHandler) -> Self {
        Self {
            id: metadata.id(),
            metadata,
            handler,
        }
    }

    pub fn call(&self, params: Json) -> Result<Json, ToolError> {
        (self.handler)(params)
    }
}

impl fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolHandle").field("id", &self.id).finish()
    }
}
