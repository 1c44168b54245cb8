//! Application configuration management.
//!
//! Handles config directory resolution (CLI flag > `XDG_CONFIG_HOME` > default)
//! and loading `config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::state::Protocol;

/// User-configurable application settings.
///
/// All fields have sensible defaults. Users can override any subset via
/// `config.toml` in the config directory -- missing fields use defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Event loop tick in milliseconds.
    pub tick_rate_ms: u64,
    /// Quiescence window before a network change is acted upon.
    pub network_debounce_ms: u64,
    /// Connect timeout for `WireGuard`, `IKEv2` and custom configs (seconds).
    pub connect_timeout_secs: u64,
    /// Connect timeout for `OpenVPN`-family protocols (seconds).
    pub openvpn_connect_timeout_secs: u64,
    /// Time a disconnect may take before the tunnel is assumed gone (seconds).
    pub disconnect_timeout_secs: u64,
    /// Automatic-mode protocol order, highest priority first.
    pub protocol_priority: Vec<Protocol>,
    /// Hours after which the last-good protocol is forgotten.
    pub good_protocol_reset_hours: u64,
    /// Every Nth successful connection fires the review prompt (0 disables it).
    pub rate_prompt_interval: u32,
    /// Retry the same protocol on another node before failing over.
    pub retry_next_node_on_timeout: bool,
    /// Minimum log level (`"debug"`, `"info"`, `"warning"`, `"error"`).
    pub log_level: String,
    /// Maximum number of log entries kept in memory.
    pub max_log_entries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_rate_ms: constants::DEFAULT_TICK_RATE_MS,
            network_debounce_ms: constants::DEFAULT_NETWORK_DEBOUNCE_MS,
            connect_timeout_secs: constants::DEFAULT_CONNECT_TIMEOUT_SECS,
            openvpn_connect_timeout_secs: constants::DEFAULT_OPENVPN_CONNECT_TIMEOUT_SECS,
            disconnect_timeout_secs: constants::DEFAULT_DISCONNECT_TIMEOUT_SECS,
            protocol_priority: Protocol::ALL.to_vec(),
            good_protocol_reset_hours: constants::DEFAULT_GOOD_PROTOCOL_RESET_HOURS,
            rate_prompt_interval: constants::DEFAULT_RATE_PROMPT_INTERVAL,
            retry_next_node_on_timeout: false,
            log_level: constants::DEFAULT_LOG_LEVEL.to_string(),
            max_log_entries: constants::DEFAULT_MAX_LOG_ENTRIES,
        }
    }
}

impl AppConfig {
    /// Connect timeout for a candidate using `protocol`.
    #[must_use]
    pub fn connect_timeout(&self, protocol: Protocol) -> Duration {
        if protocol.is_openvpn() {
            Duration::from_secs(self.openvpn_connect_timeout_secs)
        } else {
            Duration::from_secs(self.connect_timeout_secs)
        }
    }

    #[must_use]
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    #[must_use]
    pub fn network_debounce(&self) -> Duration {
        Duration::from_millis(self.network_debounce_ms)
    }

    #[must_use]
    pub fn good_protocol_ttl(&self) -> Duration {
        Duration::from_secs(self.good_protocol_reset_hours.saturating_mul(3600))
    }
}

/// Resolves the config directory path.
///
/// Precedence: CLI flag / `SWITCHBACK_CONFIG_DIR` > `XDG_CONFIG_HOME` > default.
///
/// # Errors
///
/// Returns an error if the config directory cannot be determined or created.
pub fn resolve_config_dir(cli_override: Option<&PathBuf>) -> std::io::Result<PathBuf> {
    let path = if let Some(dir) = cli_override {
        // Relative paths are anchored to the working directory.
        if dir.is_relative() {
            std::env::current_dir()?.join(dir)
        } else {
            dir.clone()
        }
    } else {
        default_config_dir()?
    };

    if !path.exists() {
        std::fs::create_dir_all(&path)?;
    }

    std::fs::canonicalize(&path)
}

/// Computes the default config directory (no CLI override).
fn default_config_dir() -> std::io::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let xdg_path = PathBuf::from(xdg);
        if xdg_path.is_absolute() {
            return Ok(xdg_path.join(constants::APP_NAME));
        }
    }

    let home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "Home directory not found")
    })?;
    Ok(home.join(".config").join(constants::APP_NAME))
}

/// Loads `AppConfig` from `config.toml` in the given directory.
///
/// Returns defaults if the file doesn't exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(config_dir: &Path) -> Result<AppConfig, String> {
    let config_path = config_dir.join(constants::CONFIG_FILE_NAME);

    if !config_path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(&config_path)
        .map_err(|e| format!("Failed to read {}: {e}", config_path.display()))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| format!("Invalid config at {}: {e}", config_path.display()))?;

    if config.protocol_priority.is_empty() {
        return Err(format!(
            "Invalid config at {}: protocol_priority must not be empty",
            config_path.display()
        ));
    }
    Ok(config)
}
