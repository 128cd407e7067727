use super::metadata::{ProviderInfo, ToolManifest, ToolMetadata, PROVIDER_MANIFEST};
use super::registry::PluginRegistry;
use super::ToolHandle;
use crate::error::{SandboxError, SandboxResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default)]
struct Catalog {
    /// Provider names in scan order; `None` until first listed.
    providers: Option<Vec<String>>,
    /// provider -> metadata in scan order, filled one provider at a time.
    scanned: HashMap<String, Vec<ToolMetadata>>,
}

/// Discovers capability metadata and resolves handles on demand
#[derive(Debug)]
pub struct ToolLoader {
    root: Option<PathBuf>,
    registry: PluginRegistry,
    catalog: RwLock<Catalog>,
}

impl ToolLoader {
    /// `root` holds one directory per provider; plugins supply handlers and
    /// in-code manifests.
    pub fn new(root: Option<PathBuf>, registry: PluginRegistry) -> Self {
        Self {
            root,
            registry,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// On-disk providers sorted by directory name, then registered plugins in
    /// registration order.
    pub fn list_providers(&self) -> Vec<String> {
        if let Some(providers) = &self.read().providers {
            return providers.clone();
        }
        let providers = self.discover_providers();
        self.write().providers = Some(providers.clone());
        providers
    }

    pub fn list_tools(&self, provider: &str) -> SandboxResult<Vec<ToolMetadata>> {
        self.scan(provider)
    }

    /// Metadata whose name or description contains `query`, in scan order.
    pub fn search_tools(
        &self,
        query: &str,
        provider: Option<&str>,
        category: Option<&str>,
        limit: usize,
    ) -> Vec<ToolMetadata> {
        let needle = query.to_lowercase();
        let providers = match provider {
            Some(p) => vec![p.to_string()],
            None => self.list_providers(),
        };

        let mut hits = Vec::new();
        for name in providers {
            let Ok(tools) = self.scan(&name) else {
                continue;
            };
            for meta in tools {
                if hits.len() >= limit {
                    return hits;
                }
                let category_ok = match (category, meta.category.as_deref()) {
                    (None, _) => true,
                    (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
                    (Some(_), None) => false,
                };
                if category_ok && meta.matches(&needle) {
                    hits.push(meta);
                }
            }
        }
        hits
    }

    /// Resolve the implementation of `provider/name`.
    pub fn load_tool_function(&self, provider: &str, name: &str) -> SandboxResult<ToolHandle> {
        let tools = self.scan(provider)?;
        let metadata = tools
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| SandboxError::ToolNotFound(format!("{}/{}", provider, name)))?;

        let handler = self
            .registry
            .get(provider)
            .and_then(|plugin| plugin.resolve(name))
            .ok_or_else(|| {
                SandboxError::ToolNotFound(format!(
                    "{}/{} exports neither `execute` nor `{}`",
                    provider, name, name
                ))
            })?;

        debug!(tool = %metadata.id(), source = %metadata.source, "Loaded tool");
        Ok(ToolHandle::new(metadata, handler))
    }

    /// Every tool across every provider.
    pub fn total_tools(&self) -> usize {
        self.list_providers()
            .iter()
            .filter_map(|p| self.scan(p).ok())
            .map(|tools| tools.len())
            .sum()
    }

    /// Drop everything discovered so far.
    pub fn rescan(&self) {
        *self.write() = Catalog::default();
        debug!("Tool catalog cleared");
    }

    fn read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Metadata for one provider, scanning its namespace on first use.
    fn scan(&self, provider: &str) -> SandboxResult<Vec<ToolMetadata>> {
        if let Some(tools) = self.read().scanned.get(provider) {
            return Ok(tools.clone());
        }
        if !self.list_providers().iter().any(|p| p == provider) {
            return Err(SandboxError::ToolNotFound(format!(
                "provider '{}' not found",
                provider
            )));
        }

        let mut tools = Vec::new();
        if let Some(dir) = self.provider_dir(provider) {
            tools.extend(scan_directory(&dir, provider)?);
        }
        if let Some(manifest) = self.registry.get(provider).and_then(|p| p.manifest()) {
            for meta in manifest.metadata() {
                if !tools.iter().any(|t: &ToolMetadata| t.name == meta.name) {
                    tools.push(meta);
                }
            }
        }
        debug!(provider, tools = tools.len(), "Scanned provider");

        self.write()
            .scanned
            .entry(provider.to_string())
            .or_insert_with(|| tools.clone());
        Ok(tools)
    }

    fn provider_dir(&self, provider: &str) -> Option<PathBuf> {
        let dir = self.root.as_ref()?.join(provider);
        dir.is_dir().then_some(dir)
    }

    fn discover_providers(&self) -> Vec<String> {
        let mut providers = Vec::new();
        if let Some(root) = &self.root {
            for entry in WalkDir::new(root)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        providers.push(name.to_string());
                    }
                }
            }
        }
        for name in self.registry.names() {
            if !providers.iter().any(|p| p == name) {
                providers.push(name.to_string());
            }
        }
        providers
    }
}

/// Read every capability manifest in a provider directory, sorted by file name.
fn scan_directory(dir: &Path, provider: &str) -> SandboxResult<Vec<ToolMetadata>> {
    let info = ProviderInfo::load(dir, provider)?;
    let mut tools = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some("toml")
            || entry.file_name() == PROVIDER_MANIFEST
        {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match ToolManifest::load(path) {
            Ok(manifest) => {
                tools.push(manifest.into_metadata(stem, &info, path.display().to_string()))
            }
            Err(err) => warn!(path = %path.display(), "Skipping unreadable tool manifest: {}", err),
        }
    }
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ProviderManifest, ProviderPlugin};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let vessel = dir.path().join("vessel");
        fs::create_dir_all(&vessel).unwrap();
        fs::write(vessel.join("provider.toml"), "category = \"navigation\"\n").unwrap();
        fs::write(
            vessel.join("vessel_tracking.toml"),
            "description = \"Real-time vessel position lookup\"\n[parameters]\nmmsi = \"string\"\n",
        )
        .unwrap();
        let port = dir.path().join("port");
        fs::create_dir_all(&port).unwrap();
        fs::write(
            port.join("port_info.toml"),
            "description = \"Port facility lookup\"\ncategory = \"facilities\"\n",
        )
        .unwrap();
        fs::write(port.join("broken.toml"), "description = [").unwrap();
        dir
    }

    fn loader(dir: &TempDir) -> ToolLoader {
        let registry = PluginRegistry::new()
            .with(ProviderPlugin::new("vessel").entry("vessel_tracking", |p| Ok(json!({"echo": p}))))
            .with(ProviderPlugin::new("port"));
        ToolLoader::new(Some(dir.path().to_path_buf()), registry)
    }

    #[test]
    fn providers_are_sorted_then_registered() {
        let dir = write_tree();
        let registry = PluginRegistry::new()
            .with(ProviderPlugin::new("weather").with_manifest(ProviderManifest::new("weather")))
            .with(ProviderPlugin::new("vessel"));
        let loader = ToolLoader::new(Some(dir.path().to_path_buf()), registry);
        assert_eq!(loader.list_providers(), vec!["port", "vessel", "weather"]);
    }

    #[test]
    fn search_matches_name_and_description() {
        let dir = write_tree();
        let loader = loader(&dir);
        let names: Vec<String> = loader
            .search_tools("vessel", None, None, 10)
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["vessel_tracking"]);
        assert_eq!(loader.search_tools("FACILITY", None, None, 10).len(), 1);
        assert_eq!(loader.search_tools("", None, None, 1).len(), 1);
        assert_eq!(loader.search_tools("", None, Some("navigation"), 10)[0].name, "vessel_tracking");
        assert!(loader.search_tools("lookup", Some("nope"), None, 10).is_empty());
    }

    #[test]
    fn broken_manifest_is_skipped() {
        let dir = write_tree();
        let tools = loader(&dir).list_tools("port").unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "port_info");
    }

    #[test]
    fn load_resolves_registered_handler() {
        let dir = write_tree();
        let handle = loader(&dir).load_tool_function("vessel", "vessel_tracking").unwrap();
        assert_eq!(handle.id, "vessel/vessel_tracking");
        assert_eq!(handle.call(json!({"mmsi": "1"})).unwrap(), json!({"echo": {"mmsi": "1"}}));
    }

    #[test]
    fn missing_pieces_are_tool_not_found() {
        let dir = write_tree();
        let loader = loader(&dir);
        for (provider, name) in [("ghost", "x"), ("vessel", "ghost"), ("port", "port_info")] {
            let err = loader.load_tool_function(provider, name).unwrap_err();
            assert!(matches!(err, SandboxError::ToolNotFound(_)), "{provider}/{name}");
        }
        assert!(matches!(loader.list_tools("ghost"), Err(SandboxError::ToolNotFound(_))));
    }

    #[test]
    fn new_provider_appears_only_after_rescan() {
        let dir = write_tree();
        let loader = loader(&dir);
        assert_eq!(loader.total_tools(), 2);
        let berth = dir.path().join("berth");
        fs::create_dir_all(&berth).unwrap();
        fs::write(berth.join("berth_status.toml"), "description = \"Berth availability\"\n").unwrap();
        assert_eq!(loader.total_tools(), 2);
        loader.rescan();
        assert_eq!(loader.total_tools(), 3);
    }

    #[test]
    fn in_code_manifest_without_directory() {
        let registry = PluginRegistry::new().with(
            ProviderPlugin::new("port")
                .with_manifest(ProviderManifest::new("port").tool(
                    "port_info",
                    ToolManifest {
                        description: "Port facility lookup".to_string(),
                        ..ToolManifest::default()
                    },
                ))
                .export("port_info", "port_info", |_| Ok(json!("ok"))),
        );
        let loader = ToolLoader::new(None, registry);
        let handle = loader.load_tool_function("port", "port_info").unwrap();
        assert_eq!(handle.metadata.source, "builtin:port");
        assert_eq!(handle.call(json!({})).unwrap(), json!("ok"));
    }
}
