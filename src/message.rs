//! Message system for the connection core.
//!
//! Every change to connection state flows through [`Message`], following the
//! Elm Architecture: user intents, OS signals, account and catalog updates,
//! background driver results and timer ticks all arrive here and are handled
//! one at a time by the state machine.

use crate::core::driver::DriverEvent;
use crate::core::network::NetworkSignal;
use crate::error::ConnectionError;
use crate::state::{ConnectionType, LocationId, ProtocolPort, Session};
use crate::store::Catalog;

#[derive(Debug, Clone)]
pub enum Message {
    // === User intents ===
    /// Connect to `location` (None = last selected, else best).
    EnableConnection {
        location: Option<LocationId>,
        connection_type: ConnectionType,
    },
    /// The user confirmed connecting on a trusted network.
    ConfirmTrustedConnect,
    /// Disconnect; also cancels any automatic retry in flight.
    DisableConnection,
    /// Connect with this protocol/port next (protocol switch screen).
    SelectProtocol(ProtocolPort),
    /// Rebuild the candidate list, optionally reconnecting with it.
    RefreshProtocols { reset: bool, reconnect: bool },

    // === Collaborators ===
    /// Raw connectivity callback; debounced before it has any effect.
    NetworkSignal(NetworkSignal),
    SessionUpdated(Session),
    CatalogUpdated(Box<Catalog>),
    AppForegrounded,

    // === Background results ===
    /// Progress from the connect operation `id`.
    Driver { id: u64, event: DriverEvent },
    /// The connect operation `id` returned.
    ConnectFinished {
        id: u64,
        result: Result<(), ConnectionError>,
    },
    /// The disconnect operation `id` returned.
    DisconnectFinished {
        id: u64,
        result: Result<(), ConnectionError>,
    },

    /// Periodic heartbeat: timeouts, debounce, good-protocol expiry.
    Tick,
}
