//! Plain data types shared across the crate.

mod connection;
mod location;
mod network;
mod protocol;
mod session;
mod trigger;

pub use connection::{ConnectionState, ConnectionType, VpnStatus};
pub use location::{
    Credentials, CustomConfig, GroupModel, LocationId, NodeModel, SelectedNode, ServerModel,
    StaticIp,
};
pub use network::{AppNetwork, AutomaticMode, NetworkStatus, NetworkType, WifiNetwork};
pub use protocol::{Backend, PortMap, Protocol, ProtocolPort, UnknownProtocol};
pub use session::{AccountStatus, ConnectionMode, LocationOrder, Preferences, Session};
pub use trigger::UiTrigger;
