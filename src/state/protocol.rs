//! Protocol, backend and port types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

/// Supported transport protocols.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Protocol {
    WireGuard,
    Ikev2,
    Udp,
    Tcp,
    Stealth,
    WsTunnel,
}

/// Returned when a protocol name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl Protocol {
    /// Default automatic-mode priority.
    pub const ALL: [Self; 6] = [
        Self::WireGuard,
        Self::Ikev2,
        Self::Udp,
        Self::Tcp,
        Self::Stealth,
        Self::WsTunnel,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WireGuard => "WireGuard",
            Self::Ikev2 => "IKEv2",
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
            Self::Stealth => "Stealth",
            Self::WsTunnel => "WStunnel",
        }
    }

    /// UDP, TCP, Stealth and `WStunnel` all run over `OpenVPN`.
    #[must_use]
    pub const fn is_openvpn(self) -> bool {
        matches!(self, Self::Udp | Self::Tcp | Self::Stealth | Self::WsTunnel)
    }

    #[must_use]
    pub const fn backend(self) -> Backend {
        match self {
            Self::WireGuard => Backend::WireGuard,
            Self::Ikev2 => Backend::Ikev2,
            Self::Udp | Self::Tcp | Self::Stealth | Self::WsTunnel => Backend::OpenVpn,
        }
    }

    /// Port used when the server-provided port map has nothing for this protocol.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::WireGuard => constants::DEFAULT_WIREGUARD_PORT,
            Self::Ikev2 => constants::DEFAULT_IKEV2_PORT,
            Self::Udp | Self::Tcp | Self::Stealth | Self::WsTunnel => {
                constants::DEFAULT_OPENVPN_PORT
            }
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownProtocol(wanted.to_string()))
    }
}

impl TryFrom<String> for Protocol {
    type Error = UnknownProtocol;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Protocol> for String {
    fn from(value: Protocol) -> Self {
        value.name().to_string()
    }
}

/// Tunnel backend family. Each has its own driver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Backend {
    OpenVpn,
    Ikev2,
    WireGuard,
    CustomConfig,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenVpn => write!(f, "OpenVPN"),
            Self::Ikev2 => write!(f, "IKEv2"),
            Self::WireGuard => write!(f, "WireGuard"),
            Self::CustomConfig => write!(f, "Custom config"),
        }
    }
}

/// A single connection candidate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ProtocolPort {
    pub protocol: Protocol,
    pub port: u16,
}

impl ProtocolPort {
    #[must_use]
    pub const fn new(protocol: Protocol, port: u16) -> Self {
        Self { protocol, port }
    }
}

impl fmt::Display for ProtocolPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.port)
    }
}

/// Server-provided ports per protocol.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMap(pub HashMap<Protocol, Vec<u16>>);

impl PortMap {
    /// First advertised port, or the protocol's default when none are listed.
    #[must_use]
    pub fn first_port(&self, protocol: Protocol) -> u16 {
        self.0
            .get(&protocol)
            .and_then(|ports| ports.first().copied())
            .unwrap_or_else(|| protocol.default_port())
    }

    #[must_use]
    pub fn candidate(&self, protocol: Protocol) -> ProtocolPort {
        ProtocolPort::new(protocol, self.first_port(protocol))
    }
}
