//! Location catalog: servers, static IPs, custom configs and the port map.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::state::{
    CustomConfig, GroupModel, NodeModel, PortMap, Protocol, ServerModel, StaticIp,
};

/// Snapshot of everything the backend says can be connected to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub servers: Vec<ServerModel>,
    pub static_ips: Vec<StaticIp>,
    pub custom_configs: Vec<CustomConfig>,
    pub port_map: PortMap,
    /// Server-provided best group id.
    pub best_location: Option<u32>,
}

impl Catalog {
    /// Loads `catalog.json`; falls back to the built-in demo catalog when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_demo(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::demo());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Finds a group and its server by group id.
    #[must_use]
    pub fn group(&self, id: u32) -> Option<(&ServerModel, &GroupModel)> {
        self.servers
            .iter()
            .find_map(|s| s.groups.iter().find(|g| g.id == id).map(|g| (s, g)))
    }

    #[must_use]
    pub fn static_ip(&self, id: u32) -> Option<&StaticIp> {
        self.static_ips.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn custom_config(&self, id: &str) -> Option<&CustomConfig> {
        self.custom_configs.iter().find(|c| c.id == id)
    }

    /// Small fixed catalog used by the CLI when no catalog file exists.
    #[must_use]
    pub fn demo() -> Self {
        let node = |hostname: &str, ip: &str, weight| NodeModel {
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            ip2: None,
            ip3: None,
            weight,
            force_disconnect: false,
        };
        let group = |id, city: &str, nick: &str, premium_only, nodes| GroupModel {
            id,
            city: city.to_string(),
            nick: nick.to_string(),
            premium_only,
            nodes,
            wg_public_key: Some(format!("wg-key-{id}")),
            ovpn_x509: Some(format!("x509-{id}")),
        };

        let mut ports = HashMap::new();
        ports.insert(Protocol::WireGuard, vec![443, 80, 51820]);
        ports.insert(Protocol::Ikev2, vec![500, 1701]);
        ports.insert(Protocol::Udp, vec![443, 1194]);
        ports.insert(Protocol::Tcp, vec![443, 1194]);
        ports.insert(Protocol::Stealth, vec![443, 8443]);
        ports.insert(Protocol::WsTunnel, vec![443]);

        Self {
            servers: vec![
                ServerModel {
                    id: 1,
                    name: "Canada East".into(),
                    country_code: "CA".into(),
                    dns_hostname: "ca.example.net".into(),
                    groups: vec![
                        group(
                            11,
                            "Toronto",
                            "The 6",
                            false,
                            vec![node("yyz-1", "10.0.11.1", 5), node("yyz-2", "10.0.11.2", 3)],
                        ),
                        group(
                            12,
                            "Montreal",
                            "Bagel Poutine",
                            true,
                            vec![node("yul-1", "10.0.12.1", 1)],
                        ),
                    ],
                },
                ServerModel {
                    id: 2,
                    name: "Germany".into(),
                    country_code: "DE".into(),
                    dns_hostname: "de.example.net".into(),
                    groups: vec![group(
                        21,
                        "Frankfurt",
                        "Castle",
                        false,
                        vec![node("fra-1", "10.0.21.1", 2), node("fra-2", "10.0.21.2", 2)],
                    )],
                },
            ],
            static_ips: Vec::new(),
            custom_configs: Vec::new(),
            port_map: PortMap(ports),
            best_location: Some(11),
        }
    }
}
