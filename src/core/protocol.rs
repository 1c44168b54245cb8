//! Protocol/port policy ("automatic mode").
//!
//! Candidate precedence, highest first:
//!
//! 1. the selected custom config's own protocol/port;
//! 2. a protocol the user just picked from the protocol switch screen;
//! 3. the current network's preferred protocol, when enabled;
//! 4. the manual protocol/port in manual connection mode;
//! 5. the configured priority list, stably ordered by per-SSID failure count
//!    and then by the last-good protocol.
//!
//! Steps 1-4 yield a single candidate with no failover.

use std::time::{Duration, Instant};

use crate::constants::CAT_PROTOCOL;
use crate::state::{
    AutomaticMode, ConnectionMode, CustomConfig, NetworkType, PortMap, Preferences, Protocol,
    ProtocolPort, WifiNetwork,
};
use crate::store::Repository;
use crate::{log_debug, log_error, log_info};

/// Inputs the policy reads but does not own.
#[derive(Clone, Copy)]
pub struct ProtocolContext<'a> {
    /// Known record for the current network, if it has a usable name.
    pub network: Option<&'a WifiNetwork>,
    pub preferences: &'a Preferences,
    pub port_map: &'a PortMap,
    /// Custom config of the selected location.
    pub custom_config: Option<&'a CustomConfig>,
}

impl ProtocolContext<'_> {
    fn ssid(&self) -> Option<&str> {
        self.network.map(|n| n.ssid.as_str())
    }
}

/// How a candidate is shown on the protocol list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolViewType {
    Normal,
    Connected,
    NextUp,
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayProtocolPort {
    pub candidate: ProtocolPort,
    pub view_type: ProtocolViewType,
}

pub struct ProtocolManager {
    priority: Vec<Protocol>,
    counters: Box<dyn Repository<AutomaticMode>>,
    good: Option<(ProtocolPort, Instant)>,
    good_ttl: Duration,
    user_selected: Option<ProtocolPort>,
    /// Protocols attempted in the current connect cycle.
    attempted: Vec<Protocol>,
    last_network_type: Option<NetworkType>,
}

impl ProtocolManager {
    #[must_use]
    pub fn new(
        priority: Vec<Protocol>,
        counters: Box<dyn Repository<AutomaticMode>>,
        good_ttl: Duration,
    ) -> Self {
        Self {
            priority,
            counters,
            good: None,
            good_ttl,
            user_selected: None,
            attempted: Vec::new(),
            last_network_type: None,
        }
    }

    #[must_use]
    pub fn good_protocol(&self) -> Option<ProtocolPort> {
        self.good.map(|(pp, _)| pp)
    }

    #[must_use]
    pub fn failures(&self, ssid: &str, protocol: Protocol) -> u32 {
        self.counters
            .get(ssid)
            .map_or(0, |record| record.failures(protocol))
    }

    fn pinned(&self, ctx: &ProtocolContext<'_>) -> Option<ProtocolPort> {
        if let Some(config) = ctx.custom_config {
            return Some(ProtocolPort::new(config.protocol, config.port));
        }
        if let Some(selected) = self.user_selected {
            return Some(selected);
        }
        if let Some(preferred) = ctx.network.and_then(WifiNetwork::preferred) {
            return Some(preferred);
        }
        if ctx.preferences.connection_mode == ConnectionMode::Manual {
            return Some(ctx.preferences.manual_candidate());
        }
        None
    }

    /// Every candidate of the current cycle in attempt order.
    #[must_use]
    pub fn candidates(&self, ctx: &ProtocolContext<'_>) -> Vec<ProtocolPort> {
        if let Some(pinned) = self.pinned(ctx) {
            return vec![pinned];
        }

        let record = ctx.ssid().and_then(|ssid| self.counters.get(ssid));
        let failures = |p: Protocol| record.as_ref().map_or(0, |r| r.failures(p));
        let good = self.good_protocol();

        let mut ordered = self.priority.clone();
        // Stable: equal keys keep declared priority.
        ordered.sort_by_key(|p| (failures(*p), good.map(|g| g.protocol) != Some(*p)));

        ordered
            .into_iter()
            .map(|p| match good {
                Some(g) if g.protocol == p => g,
                _ => ctx.port_map.candidate(p),
            })
            .collect()
    }

    /// Next candidate to attempt.
    pub fn get_protocol(&self, ctx: &ProtocolContext<'_>) -> ProtocolPort {
        let candidates = self.candidates(ctx);
        candidates
            .iter()
            .find(|c| !self.attempted.contains(&c.protocol))
            .or_else(|| candidates.first())
            .copied()
            .unwrap_or_else(|| ctx.port_map.candidate(Protocol::WireGuard))
    }

    /// Records a failed attempt with `failed`.
    ///
    /// Returns true once every candidate of the cycle has been attempted; the
    /// cycle and the last-good protocol are then reset.
    pub fn on_protocol_fail(&mut self, ctx: &ProtocolContext<'_>, failed: ProtocolPort) -> bool {
        log_info!(CAT_PROTOCOL, "{failed} failed to connect");
        if let Some(ssid) = ctx.ssid() {
            let mut record = self
                .counters
                .get(ssid)
                .unwrap_or_else(|| AutomaticMode::new(ssid));
            record.record_failure(failed.protocol);
            if let Err(e) = self.counters.put(record) {
                log_error!(CAT_PROTOCOL, "Failed to save failure counters for {ssid}: {e}");
            }
        }
        if !self.attempted.contains(&failed.protocol) {
            self.attempted.push(failed.protocol);
        }
        self.user_selected = None;

        let exhausted = self
            .candidates(ctx)
            .iter()
            .all(|c| self.attempted.contains(&c.protocol));
        if exhausted {
            log_info!(CAT_PROTOCOL, "No more protocols left to connect");
            self.attempted.clear();
            self.good = None;
        }
        exhausted
    }

    /// Starts a fresh connect cycle.
    pub fn start_cycle(&mut self) {
        self.attempted.clear();
    }

    /// Rebuilds the candidate list. A change of network type (Wi-Fi/cellular)
    /// forgets the good and user-selected protocols. `should_reset` also clears
    /// the cycle and the failure counters of `ssid`.
    pub fn refresh_protocols(
        &mut self,
        should_reset: bool,
        network_type: NetworkType,
        ssid: Option<&str>,
    ) {
        if self
            .last_network_type
            .is_some_and(|previous| previous != network_type)
        {
            log_debug!(CAT_PROTOCOL, "Network type changed, forgetting good protocol");
            self.good = None;
            self.user_selected = None;
        }
        self.last_network_type = Some(network_type);

        if should_reset {
            self.attempted.clear();
            self.user_selected = None;
            if let Some(ssid) = ssid {
                self.reset_failures(ssid);
            }
        }
    }

    /// The user picked `candidate` to connect with next.
    pub fn on_user_select_protocol(&mut self, candidate: ProtocolPort) {
        log_info!(CAT_PROTOCOL, "User selected {candidate} to connect");
        self.user_selected = Some(candidate);
        self.attempted.clear();
    }

    /// A connection with `candidate` succeeded.
    pub fn on_connected(&mut self, ssid: Option<&str>, candidate: ProtocolPort, now: Instant) {
        self.good = Some((candidate, now));
        self.user_selected = None;
        self.attempted.clear();
        if let Some(ssid) = ssid {
            self.reset_failures(ssid);
        }
    }

    /// Forgets the good protocol once it is older than the configured lifetime.
    pub fn reset_good_protocol_if_stale(&mut self, now: Instant) -> bool {
        match self.good {
            Some((pp, since)) if now.saturating_duration_since(since) >= self.good_ttl => {
                log_info!(CAT_PROTOCOL, "Resetting good protocol {pp}");
                self.good = None;
                true
            }
            _ => false,
        }
    }

    /// Candidates annotated for display.
    #[must_use]
    pub fn display_list(
        &self,
        ctx: &ProtocolContext<'_>,
        connected: Option<ProtocolPort>,
    ) -> Vec<DisplayProtocolPort> {
        let (failed, mut rest): (Vec<_>, Vec<_>) = self
            .candidates(ctx)
            .into_iter()
            .partition(|c| self.attempted.contains(&c.protocol));

        if let Some(active) = connected {
            rest.retain(|c| c.protocol != active.protocol);
        }

        let mut list: Vec<DisplayProtocolPort> = Vec::new();
        if let Some(active) = connected {
            list.push(DisplayProtocolPort {
                candidate: active,
                view_type: ProtocolViewType::Connected,
            });
        }
        list.extend(rest.into_iter().enumerate().map(|(i, candidate)| {
            let view_type = if i == 0 && connected.is_none() {
                ProtocolViewType::NextUp
            } else {
                ProtocolViewType::Normal
            };
            DisplayProtocolPort {
                candidate,
                view_type,
            }
        }));
        list.extend(failed.into_iter().map(|candidate| DisplayProtocolPort {
            candidate,
            view_type: ProtocolViewType::Fail,
        }));
        list
    }

    fn reset_failures(&mut self, ssid: &str) {
        if let Some(mut record) = self.counters.get(ssid) {
            record.reset();
            if let Err(e) = self.counters.put(record) {
                log_error!(CAT_PROTOCOL, "Failed to reset failure counters for {ssid}: {e}");
            }
        }
    }
}
