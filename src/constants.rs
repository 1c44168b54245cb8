//! Application-wide constants and configuration values.
//!
//! This module defines the static values used throughout Switchback,
//! including timing defaults, default protocol ports, file names, and
//! user-facing messages.

use std::time::Duration;

// === Application Metadata ===

/// Application name (from Cargo.toml).
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
/// Current application version (from Cargo.toml).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Short technical summary of the application (from Cargo.toml).
pub const APP_SUMMARY: &str = env!("CARGO_PKG_DESCRIPTION");

// === Timing Defaults ===
// Compiled-in defaults. Users can override them via config.toml.

/// Default event loop tick in milliseconds.
pub const DEFAULT_TICK_RATE_MS: u64 = 250;
/// Default quiescence window before a network change is acted upon.
pub const DEFAULT_NETWORK_DEBOUNCE_MS: u64 = 1000;
/// Default connect timeout for `WireGuard` and `IKEv2` candidates (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;
/// Default connect timeout for `OpenVPN`-family candidates (seconds).
pub const DEFAULT_OPENVPN_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Default time allowed for a tunnel teardown (seconds).
pub const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 5;
/// Default lifetime of the last-good protocol (hours).
pub const DEFAULT_GOOD_PROTOCOL_RESET_HOURS: u64 = 12;
/// Every Nth successful connection fires the review prompt.
pub const DEFAULT_RATE_PROMPT_INTERVAL: u32 = 5;
/// Default maximum number of in-memory log entries.
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 1000;
/// Default minimum log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Poll interval used by the simulated tunnel driver while "establishing".
pub const SIMULATED_STEP: Duration = Duration::from_millis(50);

// === Protocol Defaults ===

/// Fallback port when the server-provided port map has nothing for a protocol.
pub const DEFAULT_WIREGUARD_PORT: u16 = 443;
/// Fallback `IKEv2` port.
pub const DEFAULT_IKEV2_PORT: u16 = 500;
/// Fallback port for the `OpenVPN`-family protocols.
pub const DEFAULT_OPENVPN_PORT: u16 = 443;

// === Network Identity ===

/// Name reported for cellular connections.
pub const CELLULAR_NETWORK_NAME: &str = "Cellular";
/// Name the OS reports when the SSID cannot be read.
pub const UNKNOWN_NETWORK_NAME: &str = "Unknown";

// === Path Configuration ===

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "SWITCHBACK_CONFIG_DIR";
/// Environment variable holding a `tracing` filter directive.
pub const LOG_FILTER_ENV: &str = "SWITCHBACK_LOG";
/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Persisted Wi-Fi network records.
pub const NETWORKS_FILE_NAME: &str = "networks.json";
/// Persisted automatic-mode failure counters.
pub const AUTOMATIC_MODE_FILE_NAME: &str = "automatic_mode.json";
/// Persisted preferences.
pub const PREFERENCES_FILE_NAME: &str = "preferences.json";
/// Optional location catalog.
pub const CATALOG_FILE_NAME: &str = "catalog.json";

// === Log Categories ===

pub const CAT_MACHINE: &str = "MACHINE";
pub const CAT_PROTOCOL: &str = "PROTOCOL";
pub const CAT_NETWORK: &str = "NETWORK";
pub const CAT_SELECTION: &str = "SELECTION";
pub const CAT_DRIVER: &str = "DRIVER";
pub const CAT_SESSION: &str = "SESSION";
pub const CAT_STORE: &str = "STORE";

// === Messages ===

/// Shown when a connect intent arrives while another attempt is in flight.
pub const MSG_CONNECTING_IN_PROGRESS: &str = "A connection attempt is already in progress";
/// Shown when connecting with no internet.
pub const MSG_NO_INTERNET: &str = "No internet connection";
/// Generic fallback for errors outside the taxonomy.
pub const MSG_UNABLE_TO_REACH_SERVER: &str = "Unable to reach server. Check your network connection.";

// === CLI Output ===

pub const CLI_MSG_ERROR: &str = "Error: ";
pub const CLI_MSG_NO_NETWORKS: &str = "No known networks.";
pub const CLI_MSG_NETWORK_NOT_FOUND: &str = "Unknown network: ";
/// Log entries printed when a connect run fails.
pub const CLI_LOG_TAIL: usize = 20;
