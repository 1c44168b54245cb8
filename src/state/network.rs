//! Network identity types: the live snapshot and the persisted per-SSID records.

use serde::{Deserialize, Serialize};

use super::protocol::{Protocol, ProtocolPort};
use crate::constants;

/// OS-level reachability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    Connected,
    #[default]
    Disconnected,
    RequiresVpn,
}

/// Physical network kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NetworkType {
    Cellular,
    Wifi,
    #[default]
    None,
}

/// Snapshot of the current network. Recreated on every change, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AppNetwork {
    pub status: NetworkStatus,
    pub network_type: NetworkType,
    /// SSID for Wi-Fi, carrier label for cellular, `None` when unreadable.
    pub name: Option<String>,
    pub is_vpn: bool,
}

impl AppNetwork {
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status != NetworkStatus::Disconnected && self.network_type != NetworkType::None
    }

    /// Name usable as a record key. Unnamed and `"Unknown"` networks have none.
    #[must_use]
    pub fn known_name(&self) -> Option<&str> {
        if self.network_type == NetworkType::None {
            return None;
        }
        self.name
            .as_deref()
            .filter(|n| !n.is_empty() && *n != constants::UNKNOWN_NETWORK_NAME)
    }
}

/// Persisted record for a network, keyed by SSID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    /// Trusted networks suppress automatic connection.
    pub trusted: bool,
    pub protocol: Protocol,
    pub port: u16,
    pub preferred_protocol_status: bool,
    pub preferred_protocol: Protocol,
    pub preferred_port: u16,
    pub popup_dismiss_count: u32,
    pub dont_ask_again_for_preferred_protocol: bool,
}

impl WifiNetwork {
    #[must_use]
    pub fn new(ssid: &str, trusted: bool, default: ProtocolPort) -> Self {
        Self {
            ssid: ssid.to_string(),
            trusted,
            protocol: default.protocol,
            port: default.port,
            preferred_protocol_status: false,
            preferred_protocol: default.protocol,
            preferred_port: default.port,
            popup_dismiss_count: 0,
            dont_ask_again_for_preferred_protocol: false,
        }
    }

    /// Pinned candidate when the preferred-protocol override is enabled.
    #[must_use]
    pub fn preferred(&self) -> Option<ProtocolPort> {
        self.preferred_protocol_status
            .then(|| ProtocolPort::new(self.preferred_protocol, self.preferred_port))
    }

    pub fn set_preferred(&mut self, candidate: Option<ProtocolPort>) {
        match candidate {
            Some(pp) => {
                self.preferred_protocol_status = true;
                self.preferred_protocol = pp.protocol;
                self.preferred_port = pp.port;
            }
            None => self.preferred_protocol_status = false,
        }
    }
}

/// Per-SSID automatic-mode failure counters.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutomaticMode {
    pub ssid: String,
    pub ikev2_failed: u32,
    pub udp_failed: u32,
    pub tcp_failed: u32,
    pub wg_failed: u32,
    pub ws_tunnel_failed: u32,
    pub stealth_failed: u32,
}

impl AutomaticMode {
    #[must_use]
    pub fn new(ssid: &str) -> Self {
        Self {
            ssid: ssid.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn failures(&self, protocol: Protocol) -> u32 {
        match protocol {
            Protocol::WireGuard => self.wg_failed,
            Protocol::Ikev2 => self.ikev2_failed,
            Protocol::Udp => self.udp_failed,
            Protocol::Tcp => self.tcp_failed,
            Protocol::Stealth => self.stealth_failed,
            Protocol::WsTunnel => self.ws_tunnel_failed,
        }
    }

    pub fn record_failure(&mut self, protocol: Protocol) {
        let counter = match protocol {
            Protocol::WireGuard => &mut self.wg_failed,
            Protocol::Ikev2 => &mut self.ikev2_failed,
            Protocol::Udp => &mut self.udp_failed,
            Protocol::Tcp => &mut self.tcp_failed,
            Protocol::Stealth => &mut self.stealth_failed,
            Protocol::WsTunnel => &mut self.ws_tunnel_failed,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn reset(&mut self) {
        *self = Self::new(&self.ssid);
    }
}
