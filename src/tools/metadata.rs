use crate::error::SandboxResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::path::Path;

/// File describing a provider directory.
pub const PROVIDER_MANIFEST: &str = "provider.toml";

/// Discovered description of one capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub provider: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Opaque parameter schema, as declared.
    #[serde(default)]
    pub parameters: Map<String, Json>,
    /// Manifest path, or `builtin:<provider>` for in-code manifests.
    pub source: String,
}

impl ToolMetadata {
    /// `provider/name`
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }

    /// Case-insensitive substring match on name and description.
    pub fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }
}

/// `<capability>.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Defaults to the file stem.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub parameters: toml::Table,
}

impl ToolManifest {
    pub fn load(path: &Path) -> SandboxResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub(crate) fn into_metadata(
        self,
        fallback_name: &str,
        provider: &ProviderInfo,
        source: String,
    ) -> ToolMetadata {
        let parameters = match serde_json::to_value(&self.parameters) {
            Ok(Json::Object(map)) => map,
            _ => Map::new(),
        };
        ToolMetadata {
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            provider: provider.name.clone(),
            description: self.description,
            category: self.category.or_else(|| provider.category.clone()),
            parameters,
            source,
        }
    }
}

/// `provider.toml`; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub description: String,
}

impl ProviderInfo {
    /// Read `dir/provider.toml`, defaulting the name to the directory name.
    pub fn load(dir: &Path, dir_name: &str) -> SandboxResult<Self> {
        let path = dir.join(PROVIDER_MANIFEST);
        let mut info = if path.is_file() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str::<ProviderInfo>(&raw)?
        } else {
            ProviderInfo::default()
        };
        // The directory name is the namespace; a manifest cannot rename it.
        info.name = dir_name.to_string();
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn manifest_converts_to_metadata() {
        let manifest: ToolManifest = toml::from_str(
            r#"
            description = "Real-time vessel position lookup"
            [parameters]
            mmsi = { type = "string", required = true }
            "#,
        )
        .unwrap();
        let provider = ProviderInfo {
            name: "vessel".to_string(),
            category: Some("navigation".to_string()),
            description: String::new(),
        };
        let meta = manifest.into_metadata("vessel_tracking", &provider, "x.toml".to_string());
        assert_eq!(meta.id(), "vessel/vessel_tracking");
        assert_eq!(meta.category.as_deref(), Some("navigation"));
        assert_eq!(
            meta.parameters["mmsi"],
            json!({"type": "string", "required": true})
        );
    }

    #[test]
    fn matching_is_case_insensitive_on_name_and_description() {
        let meta = ToolMetadata {
            name: "port_info".to_string(),
            provider: "port".to_string(),
            description: "Port facility lookup".to_string(),
            category: None,
            parameters: Map::new(),
            source: "builtin:port".to_string(),
        };
        assert!(meta.matches("facility"));
        assert!(meta.matches("port_"));
        assert!(meta.matches(""));
        assert!(!meta.matches("vessel"));
    }
}
