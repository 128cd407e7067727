//! Registry of provider plugins.
//!
//! A plugin exports named entry points per capability unit. A unit resolves
//! to its `execute` export if it has one, otherwise to the export named after
//! the unit itself.

use super::metadata::{ProviderInfo, ToolManifest, ToolMetadata};
use super::ToolError;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Export name a unit resolves to first.
pub const ENTRY_POINT: &str = "execute";

pub type ToolHandler = Arc<dyn Fn(Json) -> Result<Json, ToolError> + Send + Sync>;

/// In-code metadata for a provider without a directory on disk
#[derive(Debug, Clone, Default)]
pub struct ProviderManifest {
    pub info: ProviderInfo,
    pub tools: Vec<(String, ToolManifest)>,
}

impl ProviderManifest {
    pub fn new(name: &str) -> Self {
        Self {
            info: ProviderInfo {
                name: name.to_string(),
                ..ProviderInfo::default()
            },
            tools: Vec::new(),
        }
    }

    pub fn category(mut self, category: &str) -> Self {
        self.info.category = Some(category.to_string());
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.info.description = description.to_string();
        self
    }

    pub fn tool(mut self, name: &str, manifest: ToolManifest) -> Self {
        self.tools.push((name.to_string(), manifest));
        self
    }

    pub(crate) fn metadata(&self) -> Vec<ToolMetadata> {
        let source = format!("builtin:{}", self.info.name);
        self.tools
            .iter()
            .map(|(name, manifest)| manifest.clone().into_metadata(name, &self.info, source.clone()))
            .collect()
    }
}

/// One provider's exports, plus optional in-code metadata
#[derive(Clone)]
pub struct ProviderPlugin {
    pub name: String,
    manifest: Option<ProviderManifest>,
    /// unit -> export name -> handler
    exports: HashMap<String, HashMap<String, ToolHandler>>,
}

impl ProviderPlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            manifest: None,
            exports: HashMap::new(),
        }
    }

    pub fn with_manifest(mut self, manifest: ProviderManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Export `symbol` from `unit`.
    pub fn export<F>(mut self, unit: &str, symbol: &str, handler: F) -> Self
    where
        F: Fn(Json) -> Result<Json, ToolError> + Send + Sync + 'static,
    {
        self.exports
            .entry(unit.to_string())
            .or_default()
            .insert(symbol.to_string(), Arc::new(handler));
        self
    }

    /// Export `unit`'s single entry point.
    pub fn entry<F>(self, unit: &str, handler: F) -> Self
    where
        F: Fn(Json) -> Result<Json, ToolError> + Send + Sync + 'static,
    {
        self.export(unit, ENTRY_POINT, handler)
    }

    pub fn manifest(&self) -> Option<&ProviderManifest> {
        self.manifest.as_ref()
    }

    pub fn resolve(&self, unit: &str) -> Option<ToolHandler> {
        let exports = self.exports.get(unit)?;
        exports
            .get(ENTRY_POINT)
            .or_else(|| exports.get(unit))
            .cloned()
    }

    pub fn units(&self) -> Vec<&str> {
        let mut units: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        units.sort_unstable();
        units
    }
}

impl fmt::Debug for ProviderPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderPlugin")
            .field("name", &self.name)
            .field("units", &self.units())
            .finish()
    }
}

/// Registered plugins, in registration order
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<ProviderPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin; a later plugin with the same name replaces it in place.
    pub fn register(&mut self, plugin: ProviderPlugin) {
        match self.plugins.iter_mut().find(|p| p.name == plugin.name) {
            Some(existing) => *existing = plugin,
            None => self.plugins.push(plugin),
        }
    }

    pub fn with(mut self, plugin: ProviderPlugin) -> Self {
        self.register(plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ProviderPlugin> {
        self.plugins.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execute_export_wins_over_named_export() {
        let plugin = ProviderPlugin::new("port")
            .export("port_info", "port_info", |_| Ok(json!("named")))
            .export("port_info", "execute", |_| Ok(json!("entry")));
        let handler = plugin.resolve("port_info").unwrap();
        assert_eq!(handler(json!({})).unwrap(), json!("entry"));
    }

    #[test]
    fn named_export_is_the_fallback() {
        let plugin = ProviderPlugin::new("port").export("port_info", "port_info", |_| Ok(json!(1)));
        assert!(plugin.resolve("port_info").is_some());
    }

    #[test]
    fn unrelated_exports_do_not_resolve() {
        let plugin = ProviderPlugin::new("port").export("port_info", "helper", |_| Ok(json!(1)));
        assert!(plugin.resolve("port_info").is_none());
        assert!(plugin.resolve("missing").is_none());
    }

    #[test]
    fn registration_keeps_order_and_replaces_duplicates() {
        let mut registry = PluginRegistry::new();
        registry.register(ProviderPlugin::new("vessel"));
        registry.register(ProviderPlugin::new("port"));
        registry.register(ProviderPlugin::new("vessel").entry("vessel_tracking", |_| Ok(json!(1))));
        assert_eq!(registry.names(), vec!["vessel", "port"]);
        assert_eq!(registry.get("vessel").map(|p| p.units()), Some(vec!["vessel_tracking"]));
    }

    #[test]
    fn manifest_metadata_is_tagged_builtin() {
        let manifest = ProviderManifest::new("port").category("facilities").tool(
            "port_info",
            ToolManifest {
                description: "Port facility lookup".to_string(),
                ..ToolManifest::default()
            },
        );
        let meta = manifest.metadata();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].source, "builtin:port");
        assert_eq!(meta[0].category.as_deref(), Some("facilities"));
    }
}
