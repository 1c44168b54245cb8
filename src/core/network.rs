//! Network identity observer.
//!
//! Normalizes raw OS connectivity signals into [`AppNetwork`] snapshots,
//! debounces them, and joins the current network against the persisted
//! [`WifiNetwork`] records. Time is injected so the debounce is testable.

use std::time::{Duration, Instant};

use crate::constants::{CAT_NETWORK, CELLULAR_NETWORK_NAME};
use crate::state::{AppNetwork, NetworkStatus, NetworkType, ProtocolPort, WifiNetwork};
use crate::store::{Repository, StoreError};
use crate::{log_debug, log_info};

/// Raw connectivity callback from the OS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkSignal {
    pub reachable: bool,
    pub requires_vpn: bool,
    pub network_type: NetworkType,
    /// Wi-Fi SSID, when the OS lets us read it.
    pub ssid: Option<String>,
    pub is_vpn: bool,
}

impl NetworkSignal {
    #[must_use]
    pub fn wifi(ssid: &str) -> Self {
        Self {
            reachable: true,
            requires_vpn: false,
            network_type: NetworkType::Wifi,
            ssid: Some(ssid.to_string()),
            is_vpn: false,
        }
    }

    #[must_use]
    pub fn cellular() -> Self {
        Self {
            reachable: true,
            requires_vpn: false,
            network_type: NetworkType::Cellular,
            ssid: None,
            is_vpn: false,
        }
    }

    #[must_use]
    pub fn offline() -> Self {
        Self {
            reachable: false,
            requires_vpn: false,
            network_type: NetworkType::None,
            ssid: None,
            is_vpn: false,
        }
    }
}

/// Builds the snapshot for a signal.
#[must_use]
pub fn normalize(signal: &NetworkSignal) -> AppNetwork {
    let status = match (signal.reachable, signal.requires_vpn) {
        (false, _) => NetworkStatus::Disconnected,
        (true, true) => NetworkStatus::RequiresVpn,
        (true, false) => NetworkStatus::Connected,
    };
    let name = match signal.network_type {
        NetworkType::Wifi => signal.ssid.clone().filter(|s| !s.trim().is_empty()),
        NetworkType::Cellular => Some(CELLULAR_NETWORK_NAME.to_string()),
        NetworkType::None => None,
    };
    AppNetwork {
        status,
        network_type: signal.network_type,
        name,
        is_vpn: signal.is_vpn,
    }
}

pub struct NetworkObserver {
    debounce: Duration,
    current: AppNetwork,
    pending: Option<(AppNetwork, Instant)>,
    networks: Box<dyn Repository<WifiNetwork>>,
}

impl NetworkObserver {
    #[must_use]
    pub fn new(
        initial: AppNetwork,
        networks: Box<dyn Repository<WifiNetwork>>,
        debounce: Duration,
    ) -> Self {
        Self {
            debounce,
            current: initial,
            pending: None,
            networks,
        }
    }

    /// Latest settled snapshot.
    #[must_use]
    pub fn current(&self) -> &AppNetwork {
        &self.current
    }

    /// Feeds a raw signal. Each differing signal restarts the quiescence window;
    /// returning to the settled value cancels the pending change.
    pub fn observe(&mut self, signal: &NetworkSignal, now: Instant) {
        let network = normalize(signal);
        if network == self.current {
            if self.pending.take().is_some() {
                log_debug!(CAT_NETWORK, "Network flapped back, change dropped");
            }
            return;
        }
        if self.pending.as_ref().is_some_and(|(p, _)| *p == network) {
            return;
        }
        self.pending = Some((network, now));
    }

    /// Settles the pending snapshot once it has been stable for the debounce window.
    pub fn poll(&mut self, now: Instant) -> Option<AppNetwork> {
        let ready = self
            .pending
            .as_ref()
            .is_some_and(|(_, since)| now.saturating_duration_since(*since) >= self.debounce);
        if !ready {
            return None;
        }
        let (network, _) = self.pending.take()?;
        log_info!(
            CAT_NETWORK,
            "Network changed: {:?} {} ({:?})",
            network.network_type,
            network.name.as_deref().unwrap_or("<unnamed>"),
            network.status
        );
        self.current = network.clone();
        Some(network)
    }

    /// Record for the current network. Unnamed networks have none.
    #[must_use]
    pub fn known_network(&self) -> Option<WifiNetwork> {
        self.current
            .known_name()
            .and_then(|name| self.networks.get(name))
    }

    /// Trusted networks block automatic connection.
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.known_network().is_some_and(|n| n.trusted)
    }

    /// Creates a record for the current network the first time it is seen.
    ///
    /// # Errors
    ///
    /// Returns an error if the new record cannot be persisted.
    pub fn remember_current(
        &mut self,
        trusted: bool,
        default: ProtocolPort,
    ) -> Result<Option<WifiNetwork>, StoreError> {
        let Some(name) = self.current.known_name() else {
            return Ok(None);
        };
        if let Some(existing) = self.networks.get(name) {
            return Ok(Some(existing));
        }
        let record = WifiNetwork::new(name, trusted, default);
        log_info!(
            CAT_NETWORK,
            "New network {name} saved (trusted: {trusted}, protocol: {default})"
        );
        self.networks.put(record.clone())?;
        Ok(Some(record))
    }
}
