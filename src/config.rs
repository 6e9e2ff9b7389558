use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::driver::{Capability, HookDriver};
use crate::error::NodeError;
use crate::lock::WaitPolicy;
use crate::node::DEFAULT_HYPERVISOR_TYPE;
use crate::paths;

const MAX_LOCK_TIMEOUT_S: u64 = 3600;

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct Config {
    /// Registry file; defaults to the per-user data directory.
    #[facet(default)]
    pub registry: Option<String>,
    /// Identity recorded in the session lock; defaults to `$USER`.
    #[facet(default)]
    pub identity: Option<String>,
    /// Node types that count as hypervisors; `["hv"]` when unset.
    #[facet(default)]
    pub hypervisor_types: Option<Vec<String>>,
    #[facet(default)]
    pub lock: LockConfig,
    /// Node type → capability name → shell command.
    #[facet(default)]
    pub hooks: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: None,
            identity: None,
            hypervisor_types: None,
            lock: LockConfig::default(),
            hooks: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct LockConfig {
    #[facet(default = true)]
    pub wait: bool,
    #[facet(default = 10)]
    pub timeout_s: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: true,
            timeout_s: 10,
        }
    }
}

impl Config {
    pub fn hypervisor_types(&self) -> Vec<String> {
        self.hypervisor_types
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_HYPERVISOR_TYPE.to_string()])
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(paths::default_registry_path)
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        if self.lock.wait {
            WaitPolicy::Bounded(Duration::from_secs(self.lock.timeout_s))
        } else {
            WaitPolicy::NoWait
        }
    }

    /// Build the hook driver. Capability names were checked by validation.
    pub fn hook_driver(&self) -> Result<HookDriver, NodeError> {
        let mut hooks = BTreeMap::new();
        for (node_type, by_name) in &self.hooks {
            let mut by_cap = BTreeMap::new();
            for (name, command) in by_name {
                by_cap.insert(name.parse::<Capability>()?, command.clone());
            }
            hooks.insert(node_type.clone(), by_cap);
        }
        Ok(HookDriver::new(hooks))
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), NodeError> {
    let hypervisor_types = config.hypervisor_types();
    if hypervisor_types.is_empty() {
        return Err(NodeError::Validation {
            message: "hypervisor_types must list at least one node type".into(),
        });
    }
    if hypervisor_types.iter().any(|t| t.trim().is_empty()) {
        return Err(NodeError::Validation {
            message: "hypervisor_types must not contain empty names".into(),
        });
    }
    if config.lock.timeout_s > MAX_LOCK_TIMEOUT_S {
        return Err(NodeError::Validation {
            message: format!(
                "lock.timeout_s must be at most {MAX_LOCK_TIMEOUT_S} (got {})",
                config.lock.timeout_s
            ),
        });
    }
    if config.registry.as_deref().is_some_and(|r| r.trim().is_empty()) {
        return Err(NodeError::Validation {
            message: "registry must not be empty".into(),
        });
    }

    for (node_type, by_name) in &config.hooks {
        for (name, command) in by_name {
            if name.parse::<Capability>().is_err() {
                let known: Vec<&str> = Capability::ALL.iter().map(|c| c.as_str()).collect();
                return Err(NodeError::Validation {
                    message: format!(
                        "hooks.{node_type}: unknown capability '{name}' (expected one of {})",
                        known.join(", ")
                    ),
                });
            }
            if command.trim().is_empty() {
                return Err(NodeError::Validation {
                    message: format!("hooks.{node_type}.{name}: command must not be empty"),
                });
            }
        }
    }

    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, NodeError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| NodeError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Load from an explicit path (must exist) or the default location
/// (missing file means defaults).
pub fn load_config(explicit: Option<&Path>) -> Result<Config, NodeError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let default = paths::default_config_path();
            if !default.exists() {
                tracing::debug!(path = %default.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            default
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| NodeError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&contents, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Config, NodeError> {
        parse_config(toml, Path::new("test.toml"))
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.hypervisor_types(), ["hv"]);
        assert!(config.lock.wait);
        assert_eq!(config.lock.timeout_s, 10);
        assert_eq!(
            config.wait_policy(),
            WaitPolicy::Bounded(Duration::from_secs(10))
        );
        assert!(config.hooks.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let config = parse(
            r#"
registry = "/var/lib/nodectl/registry.json"
identity = "ops"
hypervisor_types = ["hv", "xen"]

[lock]
wait = false

[hooks.vm]
start = "virsh start \"$NODECTL_NAME\""
shutdown = "virsh shutdown \"$NODECTL_NAME\""

[hooks.hv]
poll = "true"
"#,
        )
        .unwrap();
        assert_eq!(
            config.registry_path(),
            PathBuf::from("/var/lib/nodectl/registry.json")
        );
        assert_eq!(config.identity.as_deref(), Some("ops"));
        assert_eq!(config.hypervisor_types(), ["hv", "xen"]);
        assert_eq!(config.wait_policy(), WaitPolicy::NoWait);
        assert_eq!(config.hooks["vm"].len(), 2);
        config.hook_driver().unwrap();
    }

    #[test]
    fn explicit_empty_hypervisor_types_rejected() {
        let err = parse("hypervisor_types = []").unwrap_err();
        assert!(err.to_string().contains("hypervisor_types"));
    }

    #[test]
    fn unknown_hook_capability_rejected() {
        let err = parse("[hooks.vm]\nreboot = \"true\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown capability 'reboot'"));
    }

    #[test]
    fn empty_hook_command_rejected() {
        let err = parse("[hooks.vm]\nstart = \"  \"\n").unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn oversized_timeout_rejected() {
        let err = parse("[lock]\ntimeout_s = 7200\n").unwrap_err();
        assert!(err.to_string().contains("timeout_s"));
    }

    #[test]
    fn explicit_missing_file_is_load_error() {
        let err = load_config(Some(Path::new("/nonexistent/nodectl.toml"))).unwrap_err();
        assert!(matches!(err, NodeError::ConfigLoad { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodectl.toml");
        std::fs::write(&path, "identity = \"dana\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.identity.as_deref(), Some("dana"));
    }
}
