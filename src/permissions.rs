use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Permission level for an importable module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PermissionLevel {
    /// Import raises
    #[default]
    Denied,
    /// Import resolves
    Allowed,
}

/// Host capability a module would need beyond the restricted primitive set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HostCapability {
    Network,
    FileWrite,
    /// Process, interpreter or OS internals. Never grantable.
    System,
}

/// Import permission for one module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulePermission {
    pub name: String,
    pub level: PermissionLevel,
    pub requires: Option<HostCapability>,
}

impl ModulePermission {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            level: PermissionLevel::default(),
            requires: None,
        }
    }

    pub fn with_level(mut self, level: PermissionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn requires(mut self, capability: HostCapability) -> Self {
        self.requires = Some(capability);
        self
    }
}

const SYSTEM_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "ctypes",
    "importlib",
    "builtins",
    "pty",
    "signal",
    "multiprocessing",
    "threading",
    "gc",
    "inspect",
    "code",
    "pickle",
];

const NETWORK_MODULES: &[&str] = &[
    "socket", "urllib", "http", "requests", "ftplib", "smtplib", "ssl", "asyncio",
];

const FILE_WRITE_MODULES: &[&str] = &["shutil", "tempfile", "pathlib", "io", "glob"];

/// Allow-list gate consulted by every `import` inside the sandbox
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportGate {
    modules: HashMap<String, ModulePermission>,
    granted: BTreeSet<HostCapability>,
}

impl ImportGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the gate for a sandbox configuration
    pub fn from_config(config: &SandboxConfig) -> Self {
        let mut gate = Self::new();

        if config.allow_network {
            gate.grant(HostCapability::Network);
        }
        if config.allow_file_write {
            gate.grant(HostCapability::FileWrite);
        }

        for name in SYSTEM_MODULES {
            gate.register_module(ModulePermission::new(name).requires(HostCapability::System));
        }
        for name in NETWORK_MODULES {
            gate.register_module(ModulePermission::new(name).requires(HostCapability::Network));
        }
        for name in FILE_WRITE_MODULES {
            gate.register_module(ModulePermission::new(name).requires(HostCapability::FileWrite));
        }

        for name in &config.allowed_imports {
            let requires = gate.modules.get(name.as_str()).and_then(|p| p.requires);
            let mut permission = ModulePermission::new(name).with_level(PermissionLevel::Allowed);
            permission.requires = requires;
            gate.register_module(permission);
        }

        gate
    }

    pub fn register_module(&mut self, permission: ModulePermission) {
        self.modules.insert(permission.name.clone(), permission);
    }

    pub fn grant(&mut self, capability: HostCapability) {
        if capability != HostCapability::System {
            self.granted.insert(capability);
        }
    }

    pub fn is_granted(&self, capability: HostCapability) -> bool {
        self.granted.contains(&capability)
    }

    /// Check an import against the allow-list and granted capabilities
    pub fn check_import(&self, module: &str) -> SandboxResult<PermissionLevel> {
        let root = module.split('.').next().unwrap_or(module);
        let permission = self.modules.get(root).ok_or_else(|| {
            SandboxError::PermissionDenied(format!(
                "module '{}' is not in the import allow-list",
                module
            ))
        })?;

        if permission.level == PermissionLevel::Denied {
            return Err(SandboxError::PermissionDenied(format!(
                "import of '{}' is not allowed",
                module
            )));
        }

        if let Some(capability) = permission.requires {
            if !self.is_granted(capability) {
                return Err(SandboxError::PermissionDenied(format!(
                    "module '{}' requires {:?} access",
                    module, capability
                )));
            }
        }

        Ok(permission.level)
    }

    /// Allowed module names, sorted
    pub fn allowed_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .values()
            .filter(|p| p.level == PermissionLevel::Allowed)
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn get_permission(&self, module: &str) -> Option<&ModulePermission> {
        self.modules.get(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allow_list_resolves() {
        let gate = ImportGate::from_config(&SandboxConfig::default());
        assert_eq!(gate.check_import("math").unwrap(), PermissionLevel::Allowed);
        assert_eq!(gate.allowed_modules(), vec!["json", "math", "statistics"]);
    }

    #[test]
    fn unknown_and_system_modules_are_denied() {
        let gate = ImportGate::from_config(&SandboxConfig::default());
        assert!(matches!(
            gate.check_import("os.path"),
            Err(SandboxError::PermissionDenied(_))
        ));
        assert!(gate.check_import("numpy").is_err());
    }

    #[test]
    fn system_modules_stay_denied_even_when_listed() {
        let config = SandboxConfig::default().allow_import("subprocess");
        let gate = ImportGate::from_config(&config);
        assert!(gate.check_import("subprocess").is_err());
    }

    #[test]
    fn network_modules_need_the_network_flag() {
        let config = SandboxConfig::default().allow_import("urllib");
        assert!(ImportGate::from_config(&config).check_import("urllib").is_err());

        let mut config = config;
        config.allow_network = true;
        let gate = ImportGate::from_config(&config);
        assert!(gate.is_granted(HostCapability::Network));
        assert!(gate.check_import("urllib.request").is_ok());
    }
}
