//! VPN connection state types.

use std::fmt;

/// VPN connection state machine.
///
/// Exactly one value is current at any time, and only
/// [`ConnectionMachine`](crate::core::machine::ConnectionMachine) changes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No active tunnel.
    #[default]
    Disconnected,
    /// A candidate is being established.
    Connecting,
    /// Tunnel up and validated.
    Connected,
    /// Teardown in progress.
    Disconnecting,
    /// Tunnel up, connectivity test running.
    Testing,
    /// A candidate failed; the next one is about to be tried.
    AutomaticFailed,
    /// Unrecoverable configuration error for the current attempt.
    Invalid,
}

impl ConnectionState {
    /// All seven states, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Disconnecting,
        Self::Testing,
        Self::AutomaticFailed,
        Self::Invalid,
    ];

    /// An attempt is in flight (a new connect intent must be rejected).
    #[must_use]
    pub const fn is_attempting(self) -> bool {
        matches!(self, Self::Connecting | Self::Testing | Self::AutomaticFailed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Testing => "testing",
            Self::AutomaticFailed => "automaticFailed",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connect attempt was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    /// Explicit user intent.
    User,
    /// Reconnect after a network change or catalog update.
    Network,
    /// Foreground recovery; bypasses the in-flight guard.
    Recovery,
    /// Next automatic-mode candidate after a failure.
    Failover,
}

/// Raw status reported by a tunnel driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VpnStatus {
    #[default]
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Reasserting,
    Disconnecting,
}
