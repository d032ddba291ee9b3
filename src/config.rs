use crate::core::backend::Backend;
use crate::core::executor::{BackendPaths, ExecutorConfig, FailurePolicy};
use crate::core::killswitch::{DEFAULT_VPN_INTERFACE, KillSwitchSettings};
use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

const CONFIG_FILE: &str = "config.json";

/// Persistent defaults for the command line tool. Flags override these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_vpn_interface")]
    pub vpn_interface: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Suppress progress output unless `--verbose` is given
    #[serde(default)]
    pub quiet: bool,
    /// Overrides the default lock file in the state directory
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
    /// Append every mutating operation to the audit log
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    #[serde(default)]
    pub paths: BackendPaths,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            vpn_interface: default_vpn_interface(),
            failure_policy: FailurePolicy::default(),
            quiet: false,
            lock_file: None,
            audit_enabled: true,
            paths: BackendPaths::default(),
        }
    }
}

impl AppConfig {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            quiet: self.quiet,
            failure_policy: self.failure_policy,
            paths: self.paths.clone(),
        }
    }

    pub fn killswitch_settings(&self) -> KillSwitchSettings {
        KillSwitchSettings {
            vpn_interface: self.vpn_interface.clone(),
        }
    }
}

fn default_vpn_interface() -> String {
    DEFAULT_VPN_INTERFACE.to_string()
}

fn default_true() -> bool {
    true
}

fn config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Saves the config to `path` using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
pub async fn save_config_to(config: &AppConfig, path: &Path) -> std::io::Result<()> {
    use tokio::fs::OpenOptions;
    use tokio::io::AsyncWriteExt;

    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("json.tmp");

    // Permissions are set before any data is written
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(&temp_path)
        .await?;

    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Saves the config to the data directory.
pub async fn save_config(config: &AppConfig) -> std::io::Result<()> {
    let path = config_path().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no data directory to save the configuration in",
        )
    })?;
    save_config_to(config, &path).await
}

/// Loads the config from `path`, or returns defaults if it is missing or
/// unreadable.
pub async fn load_config_from(path: &Path) -> AppConfig {
    let Ok(json) = tokio::fs::read_to_string(path).await else {
        return AppConfig::default();
    };
    match serde_json::from_str::<AppConfig>(&json) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring invalid config at {}: {e}", path.display());
            AppConfig::default()
        }
    }
}

/// Loads the config from the data directory.
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}
