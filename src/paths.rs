use std::path::{Path, PathBuf};

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("nodectl")
}

/// Default config file: `~/.config/nodectl/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("nodectl")
        .join("config.toml")
}

/// Default registry file: `~/.local/share/nodectl/registry.json`
pub fn default_registry_path() -> PathBuf {
    data_dir().join("registry.json")
}

/// Session lock file sitting next to the registry: `registry.json` → `registry.lock`.
pub fn lock_path(registry: &Path) -> PathBuf {
    registry.with_extension("lock")
}

/// Audit log for mutating commands, next to the registry.
pub fn audit_log_path(registry: &Path) -> PathBuf {
    match registry.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("audit.log"),
        _ => PathBuf::from("audit.log"),
    }
}
