//! Location catalog types and the resolved connection target.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::protocol::Protocol;
use crate::error::ConnectionError;

/// A single VPN gateway host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeModel {
    pub hostname: String,
    pub ip: String,
    #[serde(default)]
    pub ip2: Option<String>,
    #[serde(default)]
    pub ip3: Option<String>,
    pub weight: u32,
    #[serde(default)]
    pub force_disconnect: bool,
}

/// City-level group of nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupModel {
    pub id: u32,
    pub city: String,
    pub nick: String,
    #[serde(default)]
    pub premium_only: bool,
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub wg_public_key: Option<String>,
    #[serde(default)]
    pub ovpn_x509: Option<String>,
}

impl GroupModel {
    /// A group can be connected to while at least one node is not force-disconnected.
    #[must_use]
    pub fn can_connect(&self) -> bool {
        self.nodes.iter().any(|n| !n.force_disconnect)
    }
}

/// Country-level server entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerModel {
    pub id: u32,
    pub name: String,
    pub country_code: String,
    pub dns_hostname: String,
    pub groups: Vec<GroupModel>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A dedicated static IP with its own node list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIp {
    pub id: u32,
    pub static_ip: String,
    pub country_code: String,
    pub city: String,
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub wg_public_key: Option<String>,
}

/// A user-imported tunnel configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomConfig {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl CustomConfig {
    #[must_use]
    pub fn missing_credentials(&self) -> bool {
        self.auth_required && self.credentials.is_none()
    }
}

/// String-addressable location choice.
///
/// Forms: `"<group_id>"`, `"static_<id>"`, `"custom_<id>"`, `"best"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LocationId {
    Group(u32),
    Static(u32),
    Custom(String),
    Best,
}

impl LocationId {
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(id) => write!(f, "{id}"),
            Self::Static(id) => write!(f, "static_{id}"),
            Self::Custom(id) => write!(f, "custom_{id}"),
            Self::Best => f.write_str("best"),
        }
    }
}

impl FromStr for LocationId {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "best" {
            return Ok(Self::Best);
        }
        if let Some(rest) = s.strip_prefix("static_") {
            return rest
                .parse()
                .map(Self::Static)
                .map_err(|_| ConnectionError::InvalidLocationType);
        }
        if let Some(rest) = s.strip_prefix("custom_") {
            if rest.is_empty() {
                return Err(ConnectionError::InvalidLocationType);
            }
            return Ok(Self::Custom(rest.to_string()));
        }
        s.parse()
            .map(Self::Group)
            .map_err(|_| ConnectionError::InvalidLocationType)
    }
}

impl TryFrom<String> for LocationId {
    type Error = ConnectionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LocationId> for String {
    fn from(value: LocationId) -> Self {
        value.to_string()
    }
}

/// The concrete endpoint of the next or current connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedNode {
    pub location: LocationId,
    pub country_code: String,
    pub dns_hostname: String,
    pub hostname: String,
    pub server_address: String,
    pub nickname: String,
    pub city_name: String,
    pub group_id: Option<u32>,
    pub premium_only: bool,
    pub static_ip_credentials: Option<Credentials>,
    /// When set, the custom config owns every connection parameter.
    pub custom_config: Option<CustomConfig>,
    pub wg_public_key: Option<String>,
    pub ovpn_x509: Option<String>,
    pub auto_picked: bool,
}

impl SelectedNode {
    #[must_use]
    pub fn is_custom_config(&self) -> bool {
        self.custom_config.is_some()
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(config) = &self.custom_config {
            return config.name.clone();
        }
        if self.nickname.is_empty() {
            self.city_name.clone()
        } else {
            format!("{} {}", self.city_name, self.nickname)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_id_forms() {
        assert_eq!("42".parse::<LocationId>(), Ok(LocationId::Group(42)));
        assert_eq!("static_7".parse::<LocationId>(), Ok(LocationId::Static(7)));
        assert_eq!(
            "custom_abc".parse::<LocationId>(),
            Ok(LocationId::Custom("abc".into()))
        );
        assert_eq!("best".parse::<LocationId>(), Ok(LocationId::Best));
        assert_eq!(
            "static_x".parse::<LocationId>(),
            Err(ConnectionError::InvalidLocationType)
        );
        assert_eq!(LocationId::Static(7).to_string(), "static_7");
    }

    #[test]
    fn test_group_with_all_nodes_force_disconnected_cannot_connect() {
        let node = |force| NodeModel {
            hostname: "h".into(),
            ip: "1.1.1.1".into(),
            ip2: None,
            ip3: None,
            weight: 1,
            force_disconnect: force,
        };
        let mut group = GroupModel {
            id: 1,
            city: "Toronto".into(),
            nick: "Comfort Zone".into(),
            premium_only: false,
            nodes: vec![node(true), node(true)],
            wg_public_key: None,
            ovpn_x509: None,
        };
        assert!(!group.can_connect());
        group.nodes[1].force_disconnect = false;
        assert!(group.can_connect());
        group.nodes.clear();
        assert!(!group.can_connect());
    }
}
