//! Account session and user preference types.

use serde::{Deserialize, Serialize};

use super::location::{LocationId, SelectedNode};
use super::protocol::{Protocol, ProtocolPort};

/// Account status as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccountStatus {
    #[default]
    Ok,
    OutOfData,
    Banned,
}

impl AccountStatus {
    /// Maps the backend's numeric code (1 ok, 2 out of data, 3 banned).
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Ok),
            2 => Some(Self::OutOfData),
            3 => Some(Self::Banned),
            _ => None,
        }
    }
}

/// Read-only account snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    pub status: AccountStatus,
    pub is_premium: bool,
    pub data_left_bytes: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationOrder {
    #[default]
    Geography,
    Alphabet,
    Latency,
}

/// Persisted user preferences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub connection_mode: ConnectionMode,
    pub selected_protocol: Protocol,
    pub selected_port: u16,
    pub order_locations_by: LocationOrder,
    pub privacy_accepted: bool,
    /// New networks start untrusted when set.
    pub auto_secure_new_networks: bool,
    pub last_selected_location: Option<LocationId>,
    pub last_connected_node: Option<SelectedNode>,
    pub connection_count: u32,
    /// Hostname that overrides weighted node selection when present in the group.
    pub forced_node: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::Auto,
            selected_protocol: Protocol::WireGuard,
            selected_port: Protocol::WireGuard.default_port(),
            order_locations_by: LocationOrder::Geography,
            privacy_accepted: false,
            auto_secure_new_networks: true,
            last_selected_location: None,
            last_connected_node: None,
            connection_count: 0,
            forced_node: None,
        }
    }
}

impl Preferences {
    #[must_use]
    pub const fn manual_candidate(&self) -> ProtocolPort {
        ProtocolPort::new(self.selected_protocol, self.selected_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AccountStatus::from_code(1), Some(AccountStatus::Ok));
        assert_eq!(AccountStatus::from_code(3), Some(AccountStatus::Banned));
        assert_eq!(AccountStatus::from_code(9), None);
    }

    #[test]
    fn test_preferences_tolerate_partial_json() {
        let prefs: Preferences =
            serde_json::from_str(r#"{"connection_mode":"manual","selected_protocol":"TCP"}"#)
                .unwrap();
        assert_eq!(prefs.connection_mode, ConnectionMode::Manual);
        assert_eq!(prefs.selected_protocol, Protocol::Tcp);
        assert!(prefs.auto_secure_new_networks);
    }
}
