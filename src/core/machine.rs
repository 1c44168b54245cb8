//! Connection state machine.
//!
//! [`ConnectionMachine`] owns the single [`ConnectionState`] and is the only
//! place it changes. It handles one [`Message`] at a time and never blocks:
//! tunnel work is requested as [`Effect`]s, executed by the runtime, and
//! reported back as messages tagged with the operation id. Anything tagged
//! with an outdated id is ignored.

use std::mem;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::AppConfig;
use crate::constants::{
    CAT_MACHINE, MSG_CONNECTING_IN_PROGRESS, MSG_NO_INTERNET, MSG_UNABLE_TO_REACH_SERVER,
};
use crate::core::driver::{CancelToken, ConnectRequest, DriverEvent};
use crate::core::network::{normalize, NetworkObserver, NetworkSignal};
use crate::core::observable::{Subscribers, SubscriptionId};
use crate::core::protocol::{DisplayProtocolPort, ProtocolContext, ProtocolManager};
use crate::core::selection::{relocate_after_downgrade, Selector};
use crate::core::session::{self, SessionChange};
use crate::error::{ConnectionError, ErrorClass};
use crate::message::Message;
use crate::state::{
    AppNetwork, AutomaticMode, Backend, ConnectionState, ConnectionType, LocationId,
    Preferences, Protocol, ProtocolPort, SelectedNode, Session, UiTrigger, WifiNetwork,
};
use crate::store::{Catalog, PreferencesStore, Repository};
use crate::{log_debug, log_error, log_info, log_warning};

/// Work the runtime must perform on the machine's behalf.
#[derive(Debug)]
pub enum Effect {
    /// Run `request` on its backend; report with `id`.
    Connect {
        id: u64,
        request: ConnectRequest,
        cancel: CancelToken,
    },
    /// Tear down whatever `backend` has configured; report with `id`.
    Disconnect { id: u64, backend: Backend },
}

/// Collaborators handed to the machine at startup.
pub struct MachineDeps {
    pub catalog: Catalog,
    pub session: Session,
    /// Connectivity at startup; settles immediately.
    pub network: NetworkSignal,
    pub networks: Box<dyn Repository<WifiNetwork>>,
    pub counters: Box<dyn Repository<AutomaticMode>>,
    pub preferences: Box<dyn PreferencesStore>,
}

/// Why a teardown was started; decides what happens once it completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DisconnectPurpose {
    /// Failed configuration removed; state is left alone.
    Cleanup,
    /// Move on to the next protocol, or give up when exhausted.
    Failover { exhausted: bool },
    /// Same protocol on another node.
    NodeRetry,
    /// Reconnect with whatever is queued.
    Switch,
    /// Attempt abandoned after an error.
    Abort,
    /// Account or network forced the tunnel down.
    Forced,
    User,
}

impl DisconnectPurpose {
    const fn rank(self) -> u8 {
        match self {
            Self::Cleanup => 0,
            Self::Failover { .. } | Self::NodeRetry => 1,
            Self::Switch => 2,
            Self::Abort | Self::Forced | Self::User => 3,
        }
    }

    /// Shown to observers as `Disconnecting`.
    const fn is_visible(self) -> bool {
        self.rank() >= 2
    }
}

#[derive(Debug)]
struct Attempt {
    id: u64,
    request: ConnectRequest,
    started: Instant,
    timeout: Duration,
    cancel: CancelToken,
    connection_type: ConnectionType,
}

#[derive(Clone, Copy, Debug)]
struct DisconnectOp {
    id: u64,
    purpose: DisconnectPurpose,
    started: Instant,
    was_connected: bool,
}

/// A connect intent waiting for a teardown or a confirmation.
#[derive(Clone, Debug)]
struct PendingConnect {
    location: Option<LocationId>,
    connection_type: ConnectionType,
    /// Trusted-network prompt already answered.
    confirmed: bool,
}

pub struct ConnectionMachine {
    config: AppConfig,
    state: ConnectionState,
    protocols: ProtocolManager,
    network: NetworkObserver,
    selector: Selector,
    rng: StdRng,
    catalog: Catalog,
    preferences: Box<dyn PreferencesStore>,
    session: Session,
    selected: Option<SelectedNode>,
    attempt: Option<Attempt>,
    /// Backend that may hold a tunnel configuration.
    tunnel: Option<Backend>,
    connected_candidate: Option<ProtocolPort>,
    disconnect: Option<DisconnectOp>,
    pending_connect: Option<PendingConnect>,
    pending_trusted: Option<PendingConnect>,
    retry_node: Option<SelectedNode>,
    node_retry_used: bool,
    next_id: u64,
    effects: Vec<Effect>,
    state_subscribers: Subscribers<ConnectionState>,
    trigger_subscribers: Subscribers<UiTrigger>,
}

impl ConnectionMachine {
    #[must_use]
    pub fn new(config: AppConfig, deps: MachineDeps) -> Self {
        let protocols = ProtocolManager::new(
            config.protocol_priority.clone(),
            deps.counters,
            config.good_protocol_ttl(),
        );
        let network = NetworkObserver::new(
            normalize(&deps.network),
            deps.networks,
            config.network_debounce(),
        );

        let mut machine = Self {
            config,
            state: ConnectionState::Disconnected,
            protocols,
            network,
            selector: Selector::new(),
            rng: StdRng::from_entropy(),
            catalog: deps.catalog,
            preferences: deps.preferences,
            session: deps.session,
            selected: None,
            attempt: None,
            tunnel: None,
            connected_candidate: None,
            disconnect: None,
            pending_connect: None,
            pending_trusted: None,
            retry_node: None,
            node_retry_used: false,
            next_id: 1,
            effects: Vec::new(),
            state_subscribers: Subscribers::default(),
            trigger_subscribers: Subscribers::default(),
        };

        let current = machine.network.current().clone();
        machine
            .protocols
            .refresh_protocols(false, current.network_type, current.known_name());
        machine.remember_network();

        let prefs = machine.preferences.get();
        if let Some(last) = &prefs.last_connected_node {
            let location = prefs.last_selected_location.unwrap_or(LocationId::Best);
            machine.selected = machine.selector.restore(
                &machine.catalog,
                &location,
                last,
                &machine.session,
            );
        }
        machine
    }

    /// Replaces the node-selection RNG with a seeded one.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // === Observation ===

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Target of the current or last attempt.
    #[must_use]
    pub fn selected(&self) -> Option<&SelectedNode> {
        self.selected.as_ref()
    }

    #[must_use]
    pub fn connected_candidate(&self) -> Option<ProtocolPort> {
        self.connected_candidate
    }

    #[must_use]
    pub fn network(&self) -> &AppNetwork {
        self.network.current()
    }

    #[must_use]
    pub fn protocols(&self) -> &ProtocolManager {
        &self.protocols
    }

    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.preferences.get()
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Candidates for the protocol switch screen.
    #[must_use]
    pub fn protocol_list(&self) -> Vec<DisplayProtocolPort> {
        let known = self.network.known_network();
        let prefs = self.preferences.get();
        let custom = self.selected.as_ref().and_then(|n| n.custom_config.as_ref());
        let ctx = ProtocolContext {
            network: known.as_ref(),
            preferences: &prefs,
            port_map: &self.catalog.port_map,
            custom_config: custom,
        };
        self.protocols.display_list(&ctx, self.connected_candidate)
    }

    /// Every state change from now on, in order.
    pub fn subscribe_state(&mut self) -> (SubscriptionId, mpsc::Receiver<ConnectionState>) {
        self.state_subscribers.subscribe()
    }

    pub fn unsubscribe_state(&mut self, id: SubscriptionId) -> bool {
        self.state_subscribers.unsubscribe(id)
    }

    pub fn subscribe_triggers(&mut self) -> (SubscriptionId, mpsc::Receiver<UiTrigger>) {
        self.trigger_subscribers.subscribe()
    }

    pub fn unsubscribe_triggers(&mut self, id: SubscriptionId) -> bool {
        self.trigger_subscribers.unsubscribe(id)
    }

    /// Drains the effects requested since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        mem::take(&mut self.effects)
    }

    // === Message handling ===

    pub fn handle_message(&mut self, message: Message) {
        self.handle_message_at(message, Instant::now());
    }

    /// Handles `message` as if it arrived at `now`.
    pub fn handle_message_at(&mut self, message: Message, now: Instant) {
        match message {
            Message::EnableConnection {
                location,
                connection_type,
            } => self.enable(
                PendingConnect {
                    location,
                    connection_type,
                    confirmed: false,
                },
                now,
            ),
            Message::ConfirmTrustedConnect => match self.pending_trusted.take() {
                Some(request) => self.enable(
                    PendingConnect {
                        confirmed: true,
                        ..request
                    },
                    now,
                ),
                None => log_debug!(CAT_MACHINE, "Nothing waiting for confirmation"),
            },
            Message::DisableConnection => self.disable(now),
            Message::SelectProtocol(candidate) => self.select_protocol(candidate, now),
            Message::RefreshProtocols { reset, reconnect } => {
                self.refresh_protocols(reset, reconnect, now);
            }
            Message::NetworkSignal(signal) => self.network.observe(&signal, now),
            Message::SessionUpdated(session) => self.on_session(session, now),
            Message::CatalogUpdated(catalog) => self.on_catalog(*catalog, now),
            Message::AppForegrounded => self.on_foreground(now),
            Message::Driver { id, event } => self.on_driver_event(id, event, now),
            Message::ConnectFinished { id, result } => self.on_connect_finished(id, result, now),
            Message::DisconnectFinished { id, result } => {
                self.on_disconnect_finished(id, result, now);
            }
            Message::Tick => self.on_tick(now),
        }
    }

    fn enable(&mut self, request: PendingConnect, now: Instant) {
        if self.state.is_attempting() {
            if request.connection_type == ConnectionType::Recovery {
                log_info!(CAT_MACHINE, "Restarting stuck attempt");
                self.pending_connect = Some(request);
                self.begin_disconnect(DisconnectPurpose::Switch, now);
            } else {
                log_warning!(CAT_MACHINE, "{MSG_CONNECTING_IN_PROGRESS}");
                self.trigger(UiTrigger::ConnectingInProgress);
            }
            return;
        }
        if self.disconnect.is_some() {
            log_debug!(CAT_MACHINE, "Teardown in progress, connect queued");
            self.pending_connect = Some(request);
            return;
        }

        let prefs = self.preferences.get();
        let target = request
            .location
            .clone()
            .or_else(|| prefs.last_selected_location.clone())
            .unwrap_or(LocationId::Best);

        if let Some(block) =
            session::connect_block(&self.session, prefs.privacy_accepted, target.is_custom())
        {
            log_warning!(CAT_MACHINE, "Connect to {target} refused: {block:?}");
            self.trigger(block);
            return;
        }
        if !self.network.current().is_online() {
            log_warning!(CAT_MACHINE, "{MSG_NO_INTERNET}");
            self.trigger(UiTrigger::NoInternet);
            return;
        }
        if !request.confirmed && self.network.is_trusted() {
            let ssid = self
                .network
                .current()
                .known_name()
                .unwrap_or_default()
                .to_string();
            log_info!(CAT_MACHINE, "{ssid} is trusted, asking before connecting");
            self.pending_trusted = Some(request);
            self.trigger(UiTrigger::TrustedNetworkPrompt { ssid });
            return;
        }
        if self.state == ConnectionState::Connected {
            log_info!(CAT_MACHINE, "Switching to {target}");
            self.pending_connect = Some(PendingConnect {
                location: Some(target),
                ..request
            });
            self.begin_disconnect(DisconnectPurpose::Switch, now);
            return;
        }

        let restored = if prefs.forced_node.is_none() {
            prefs.last_connected_node.as_ref().and_then(|last| {
                self.selector
                    .restore(&self.catalog, &target, last, &self.session)
            })
        } else {
            None
        };
        let resolved = match restored {
            Some(node) => {
                log_debug!(CAT_MACHINE, "Reusing last connected node {}", node.hostname);
                Ok(node)
            }
            None => self.selector.resolve(
                &self.catalog,
                &target,
                &self.session,
                prefs.forced_node.as_deref(),
                &mut self.rng,
            ),
        };
        let node = match resolved {
            Ok(node) => node,
            Err(e) => {
                self.handle_error(e, now);
                return;
            }
        };
        self.update_preferences(|p| p.last_selected_location = Some(target));
        if request.connection_type == ConnectionType::User {
            self.protocols.start_cycle();
            self.node_retry_used = false;
        }
        self.start_attempt(node, None, request.connection_type, now);
    }

    fn start_attempt(
        &mut self,
        node: SelectedNode,
        candidate: Option<ProtocolPort>,
        connection_type: ConnectionType,
        now: Instant,
    ) {
        let candidate = candidate.unwrap_or_else(|| self.next_candidate(&node));
        let request = ConnectRequest { node, candidate };
        let id = self.next_operation_id();
        let cancel = CancelToken::new();

        log_info!(
            CAT_MACHINE,
            "Connecting to {} ({}) with {candidate} [{connection_type:?}]",
            request.node.display_name(),
            request.node.hostname
        );
        self.selected = Some(request.node.clone());
        self.tunnel = Some(request.backend());
        self.attempt = Some(Attempt {
            id,
            request: request.clone(),
            started: now,
            timeout: self.config.connect_timeout(candidate.protocol),
            cancel: cancel.clone(),
            connection_type,
        });
        self.set_state(ConnectionState::Connecting);
        self.effects.push(Effect::Connect {
            id,
            request,
            cancel,
        });
    }

    fn disable(&mut self, now: Instant) {
        self.pending_connect = None;
        self.pending_trusted = None;
        self.retry_node = None;

        if self.tunnel.is_none() && self.disconnect.is_none() {
            self.attempt = None;
            if self.state == ConnectionState::Disconnected {
                log_debug!(CAT_MACHINE, "Already disconnected");
            }
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        log_info!(CAT_MACHINE, "User disconnect while {}", self.state);
        self.begin_disconnect(DisconnectPurpose::User, now);
    }

    fn select_protocol(&mut self, candidate: ProtocolPort, now: Instant) {
        self.protocols.on_user_select_protocol(candidate);
        let request = PendingConnect {
            location: None,
            connection_type: ConnectionType::User,
            confirmed: false,
        };
        if self.tunnel.is_some() || self.disconnect.is_some() {
            self.pending_connect = Some(request);
            self.begin_disconnect(DisconnectPurpose::Switch, now);
        } else {
            self.enable(request, now);
        }
    }

    fn refresh_protocols(&mut self, reset: bool, reconnect: bool, now: Instant) {
        let current = self.network.current().clone();
        self.protocols
            .refresh_protocols(reset, current.network_type, current.known_name());
        if reconnect {
            self.reconnect_if_candidate_changed(true, now);
        }
    }

    /// Reconnects when the refreshed list no longer starts with the
    /// connected candidate.
    fn reconnect_if_candidate_changed(&mut self, confirmed: bool, now: Instant) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(node) = self.selected.clone() else {
            return;
        };
        let next = self.next_candidate(&node);
        if Some(next) == self.connected_candidate {
            log_debug!(CAT_MACHINE, "{next} still comes first, keeping the tunnel");
            return;
        }
        log_info!(CAT_MACHINE, "Reconnecting with {next}");
        self.pending_connect = Some(PendingConnect {
            location: None,
            connection_type: ConnectionType::Network,
            confirmed,
        });
        self.begin_disconnect(DisconnectPurpose::Switch, now);
    }

    // === Driver results ===

    fn is_live(&self, id: u64) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(|a| a.id == id && !a.cancel.is_cancelled())
    }

    fn on_driver_event(&mut self, id: u64, event: DriverEvent, now: Instant) {
        if !self.is_live(id) {
            log_debug!(CAT_MACHINE, "Ignoring stale driver event {event:?} (op {id})");
            return;
        }
        match event {
            DriverEvent::Update(text) => log_debug!(CAT_MACHINE, "{text}"),
            DriverEvent::Vpn(status) => log_debug!(CAT_MACHINE, "Tunnel reports {status:?}"),
            DriverEvent::Validating => {
                if self.state == ConnectionState::Connecting {
                    // The connectivity test gets a window of its own.
                    if let Some(attempt) = self.attempt.as_mut() {
                        attempt.started = now;
                    }
                    self.set_state(ConnectionState::Testing);
                }
            }
            DriverEvent::Validated(ip) => self.on_connected(Some(&ip), now),
        }
    }

    fn on_connect_finished(&mut self, id: u64, result: Result<(), ConnectionError>, now: Instant) {
        if !self.is_live(id) {
            log_debug!(CAT_MACHINE, "Ignoring stale ConnectResult (op {id})");
            return;
        }
        match result {
            Ok(()) => {
                if matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Testing
                ) {
                    self.on_connected(None, now);
                }
            }
            Err(e) => self.handle_error(e, now),
        }
    }

    fn on_connected(&mut self, ip: Option<&str>, now: Instant) {
        if self.state == ConnectionState::Connected {
            return;
        }
        let Some((request, connection_type)) = self
            .attempt
            .as_ref()
            .map(|a| (a.request.clone(), a.connection_type))
        else {
            return;
        };

        self.set_state(ConnectionState::Connected);
        let ssid = self.network.current().known_name().map(str::to_string);
        self.protocols
            .on_connected(ssid.as_deref(), request.candidate, now);
        self.connected_candidate = Some(request.candidate);
        self.node_retry_used = false;
        self.selector.clear_failed();
        log_info!(
            CAT_MACHINE,
            "Connected to {} with {} [{connection_type:?}]{}",
            request.node.hostname,
            request.candidate,
            ip.map(|ip| format!(", public IP {ip}")).unwrap_or_default()
        );

        let count = self.update_preferences(|p| {
            p.last_connected_node = Some(request.node.clone());
            p.connection_count = p.connection_count.saturating_add(1);
            p.connection_count
        });
        self.trigger(UiTrigger::RefreshIp);
        if count == 1 {
            self.trigger(UiTrigger::NotificationPermission);
        }
        let interval = self.config.rate_prompt_interval;
        if interval > 0 && count % interval == 0 {
            self.trigger(UiTrigger::RatePrompt);
        }
    }

    fn handle_error(&mut self, error: ConnectionError, now: Instant) {
        let class = error.class();
        if class == ErrorClass::Cancelled {
            log_debug!(CAT_MACHINE, "Attempt cancelled");
            return;
        }
        log_error!(CAT_MACHINE, "Connection failed ({class:?}): {error}");

        if class == ErrorClass::Transport {
            self.on_transport_failure(&error, now);
            return;
        }
        if let Some(trigger) = error_trigger(&error) {
            if trigger == UiTrigger::UnableToReachServer {
                log_warning!(CAT_MACHINE, "{MSG_UNABLE_TO_REACH_SERVER}");
            }
            self.trigger(trigger);
        }
        match class {
            ErrorClass::Configuration | ErrorClass::Catalog | ErrorClass::CustomConfigCredentials => {
                self.fail_invalid(now);
            }
            ErrorClass::Account => self.abandon(DisconnectPurpose::Forced, now),
            _ => self.abandon(DisconnectPurpose::Abort, now),
        }
    }

    fn on_transport_failure(&mut self, error: &ConnectionError, now: Instant) {
        let Some(request) = self.attempt.as_ref().map(|a| a.request.clone()) else {
            return;
        };

        if let Some(config) = &request.node.custom_config {
            log_warning!(CAT_MACHINE, "Custom config {} failed: {error}", config.name);
            self.trigger(if *error == ConnectionError::ConnectionTimeout {
                UiTrigger::UnableToReachServer
            } else {
                UiTrigger::AuthFailure
            });
            self.abandon(DisconnectPurpose::Abort, now);
            return;
        }

        if self.config.retry_next_node_on_timeout
            && !self.node_retry_used
            && *error != ConnectionError::AuthFailure
            && request.node.group_id.is_some()
        {
            let forced = self.preferences.get().forced_node;
            if let Ok(next) = self.selector.select_another_node(
                &self.catalog,
                &request.node,
                forced.as_deref(),
                &mut self.rng,
            ) {
                if next.hostname != request.node.hostname {
                    log_info!(
                        CAT_MACHINE,
                        "Retrying {} on node {}",
                        request.candidate,
                        next.hostname
                    );
                    self.node_retry_used = true;
                    self.retry_node = Some(next);
                    self.set_state(ConnectionState::AutomaticFailed);
                    self.begin_disconnect(DisconnectPurpose::NodeRetry, now);
                    return;
                }
            }
        }

        let exhausted = self.record_protocol_failure(&request.node, request.candidate);
        self.set_state(ConnectionState::AutomaticFailed);
        self.begin_disconnect(DisconnectPurpose::Failover { exhausted }, now);
    }

    /// Unrecoverable for this attempt: clean up and park in `Invalid`.
    fn fail_invalid(&mut self, now: Instant) {
        self.pending_connect = None;
        if self.tunnel.is_some() {
            self.begin_disconnect(DisconnectPurpose::Cleanup, now);
        } else {
            self.attempt = None;
        }
        self.set_state(ConnectionState::Invalid);
    }

    /// Gives up on the attempt and ends `Disconnected`.
    fn abandon(&mut self, purpose: DisconnectPurpose, now: Instant) {
        self.pending_connect = None;
        if self.tunnel.is_some() {
            self.begin_disconnect(purpose, now);
        } else {
            self.attempt = None;
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn force_disconnect(&mut self, now: Instant) {
        self.pending_connect = None;
        self.pending_trusted = None;
        if self.tunnel.is_some() || self.disconnect.is_some() {
            self.begin_disconnect(DisconnectPurpose::Forced, now);
        }
    }

    // === Teardown ===

    fn begin_disconnect(&mut self, purpose: DisconnectPurpose, now: Instant) {
        if let Some(attempt) = &self.attempt {
            attempt.cancel.cancel();
        }

        if let Some(op) = self.disconnect.as_mut() {
            // One teardown at a time; a stronger intent takes over the running one.
            if purpose.rank() > op.purpose.rank() {
                log_debug!(CAT_MACHINE, "Teardown now {purpose:?} (was {:?})", op.purpose);
                op.purpose = purpose;
            }
            if purpose.is_visible() {
                self.set_state(ConnectionState::Disconnecting);
            }
            return;
        }

        let op = DisconnectOp {
            id: self.next_operation_id(),
            purpose,
            started: now,
            was_connected: self.state == ConnectionState::Connected,
        };
        let Some(backend) = self.tunnel else {
            self.finish_disconnect(op, now);
            return;
        };

        log_info!(CAT_MACHINE, "Disconnecting {backend} ({purpose:?})");
        if purpose.is_visible() {
            self.set_state(ConnectionState::Disconnecting);
        }
        self.disconnect = Some(op);
        self.effects.push(Effect::Disconnect { id: op.id, backend });
    }

    fn on_disconnect_finished(
        &mut self,
        id: u64,
        result: Result<(), ConnectionError>,
        now: Instant,
    ) {
        if self.disconnect.as_ref().map(|op| op.id) != Some(id) {
            log_debug!(CAT_MACHINE, "Ignoring stale DisconnectResult (op {id})");
            return;
        }
        let Some(op) = self.disconnect.take() else {
            return;
        };
        if let Err(e) = result {
            log_warning!(CAT_MACHINE, "Teardown reported an error: {e}");
        }
        self.finish_disconnect(op, now);
    }

    fn finish_disconnect(&mut self, op: DisconnectOp, now: Instant) {
        self.tunnel = None;
        self.connected_candidate = None;
        let previous = self.attempt.take().map(|a| a.request);

        match op.purpose {
            DisconnectPurpose::Cleanup => {
                log_debug!(CAT_MACHINE, "Failed configuration removed");
                self.drain_pending(now);
            }
            DisconnectPurpose::Failover { exhausted: true } => {
                log_warning!(CAT_MACHINE, "Every protocol failed, giving up");
                self.set_state(ConnectionState::Disconnected);
                self.trigger(UiTrigger::AllProtocolsFailed);
            }
            DisconnectPurpose::Failover { exhausted: false } => match previous {
                Some(request) => {
                    self.start_attempt(request.node, None, ConnectionType::Failover, now);
                }
                None => self.set_state(ConnectionState::Disconnected),
            },
            DisconnectPurpose::NodeRetry => match (self.retry_node.take(), previous) {
                (Some(node), Some(request)) => {
                    self.start_attempt(
                        node,
                        Some(request.candidate),
                        ConnectionType::Failover,
                        now,
                    );
                }
                _ => self.set_state(ConnectionState::Disconnected),
            },
            DisconnectPurpose::Switch
            | DisconnectPurpose::Abort
            | DisconnectPurpose::Forced
            | DisconnectPurpose::User => {
                self.set_state(ConnectionState::Disconnected);
                if op.was_connected {
                    self.trigger(UiTrigger::RefreshIp);
                    self.trigger(UiTrigger::ResumeLatencyProbe);
                }
                self.drain_pending(now);
            }
        }
    }

    fn drain_pending(&mut self, now: Instant) {
        if let Some(next) = self.pending_connect.take() {
            log_debug!(CAT_MACHINE, "Running queued connect");
            self.enable(next, now);
        }
    }

    // === Collaborator updates ===

    fn on_tick(&mut self, now: Instant) {
        let timed_out = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Testing
        ) && self.attempt.as_ref().is_some_and(|a| {
            !a.cancel.is_cancelled() && now.saturating_duration_since(a.started) >= a.timeout
        });
        if timed_out {
            log_warning!(CAT_MACHINE, "Connect attempt timed out");
            self.handle_error(ConnectionError::ConnectionTimeout, now);
        }

        let teardown_stuck = self.disconnect.as_ref().is_some_and(|op| {
            now.saturating_duration_since(op.started) >= self.config.disconnect_timeout()
        });
        if teardown_stuck {
            if let Some(op) = self.disconnect.take() {
                log_warning!(CAT_MACHINE, "Teardown timed out, assuming the tunnel is down");
                self.finish_disconnect(op, now);
            }
        }

        let previous = self.network.current().clone();
        if let Some(current) = self.network.poll(now) {
            self.on_network_changed(&previous, &current, now);
        }

        self.protocols.reset_good_protocol_if_stale(now);
    }

    fn on_network_changed(&mut self, previous: &AppNetwork, current: &AppNetwork, now: Instant) {
        self.remember_network();

        if !current.is_online() {
            if self.tunnel.is_some() {
                log_warning!(CAT_MACHINE, "{MSG_NO_INTERNET}, dropping the tunnel");
                self.trigger(UiTrigger::NoInternet);
                self.force_disconnect(now);
            }
            return;
        }
        if previous.known_name() == current.known_name()
            && previous.network_type == current.network_type
        {
            return;
        }

        if self.state.is_attempting() {
            log_debug!(CAT_MACHINE, "Network changed mid-attempt, keeping the protocol cycle");
            return;
        }
        self.protocols
            .refresh_protocols(true, current.network_type, current.known_name());
        log_debug!(
            CAT_MACHINE,
            "Network now {}",
            current.known_name().unwrap_or("unknown")
        );
        self.reconnect_if_candidate_changed(false, now);
    }

    fn on_session(&mut self, next: Session, now: Instant) {
        let changes = session::evaluate(&self.session, &next, self.selected.as_ref());
        self.session = next;

        for change in changes {
            match change {
                SessionChange::ForceDisconnect(trigger) => {
                    self.trigger(trigger);
                    self.force_disconnect(now);
                }
                SessionChange::PremiumLost => {
                    let Some(node) = self.selected.clone() else {
                        continue;
                    };
                    let target = relocate_after_downgrade(&self.catalog, &node, &self.session);
                    log_info!(CAT_MACHINE, "Premium lost, selection moved to {target}");
                    let location = target.to_string();
                    self.update_preferences(|p| p.last_selected_location = Some(target));
                    self.trigger(UiTrigger::LocationDowngraded { location });
                    self.force_disconnect(now);
                }
            }
        }
    }

    fn on_catalog(&mut self, catalog: Catalog, now: Instant) {
        self.catalog = catalog;
        log_info!(CAT_MACHINE, "Catalog updated");

        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(node) = self.selected.clone() else {
            return;
        };
        let Some(group_id) = node.group_id else {
            return;
        };
        let Some((_, group)) = self.catalog.group(group_id) else {
            log_warning!(CAT_MACHINE, "Location {group_id} left the catalog");
            self.trigger(UiTrigger::ReloadCatalog {
                location: group_id.to_string(),
            });
            return;
        };
        let retired = group
            .nodes
            .iter()
            .any(|n| n.hostname == node.hostname && n.force_disconnect);
        if !retired {
            return;
        }

        if group.can_connect() {
            log_info!(CAT_MACHINE, "Node {} retired, moving to another node", node.hostname);
            self.selector.mark_failed(&node.hostname);
            self.pending_connect = Some(PendingConnect {
                location: Some(LocationId::Group(group_id)),
                connection_type: ConnectionType::Network,
                confirmed: true,
            });
            self.begin_disconnect(DisconnectPurpose::Switch, now);
        } else {
            log_warning!(CAT_MACHINE, "Every node of {group_id} retired");
            self.force_disconnect(now);
        }
    }

    fn on_foreground(&mut self, now: Instant) {
        let current = self.network.current().clone();
        self.protocols
            .refresh_protocols(false, current.network_type, current.known_name());
        if self.state == ConnectionState::Connecting {
            self.enable(
                PendingConnect {
                    location: None,
                    connection_type: ConnectionType::Recovery,
                    confirmed: true,
                },
                now,
            );
        }
    }

    // === Helpers ===

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        log_info!(CAT_MACHINE, "State {} -> {next}", self.state);
        self.state = next;
        self.state_subscribers.emit(&next);
    }

    fn trigger(&mut self, trigger: UiTrigger) {
        log_debug!(CAT_MACHINE, "Trigger {trigger:?}");
        self.trigger_subscribers.emit(&trigger);
    }

    fn next_operation_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn update_preferences<R>(&mut self, apply: impl FnOnce(&mut Preferences) -> R) -> R {
        let mut prefs = self.preferences.get();
        let out = apply(&mut prefs);
        if let Err(e) = self.preferences.set(prefs) {
            log_error!(CAT_MACHINE, "Failed to save preferences: {e}");
        }
        out
    }

    fn next_candidate(&self, node: &SelectedNode) -> ProtocolPort {
        let known = self.network.known_network();
        let prefs = self.preferences.get();
        let ctx = ProtocolContext {
            network: known.as_ref(),
            preferences: &prefs,
            port_map: &self.catalog.port_map,
            custom_config: node.custom_config.as_ref(),
        };
        self.protocols.get_protocol(&ctx)
    }

    fn record_protocol_failure(&mut self, node: &SelectedNode, failed: ProtocolPort) -> bool {
        let known = self.network.known_network();
        let prefs = self.preferences.get();
        let ctx = ProtocolContext {
            network: known.as_ref(),
            preferences: &prefs,
            port_map: &self.catalog.port_map,
            custom_config: node.custom_config.as_ref(),
        };
        self.protocols.on_protocol_fail(&ctx, failed)
    }

    /// Saves a record for the current network the first time it is seen.
    fn remember_network(&mut self) {
        let prefs = self.preferences.get();
        let first = self
            .config
            .protocol_priority
            .first()
            .copied()
            .unwrap_or(Protocol::WireGuard);
        let default = self.catalog.port_map.candidate(first);
        if let Err(e) = self
            .network
            .remember_current(!prefs.auto_secure_new_networks, default)
        {
            log_error!(CAT_MACHINE, "Failed to save network: {e}");
        }
    }
}

/// Trigger surfaced for a non-transport error.
fn error_trigger(error: &ConnectionError) -> Option<UiTrigger> {
    let trigger = match error {
        ConnectionError::LocationNotFound(id) => UiTrigger::ReloadCatalog {
            location: id.clone(),
        },
        ConnectionError::CustomConfigMissingCredentials(id) => {
            UiTrigger::EditCustomConfigCredentials {
                config_id: id.clone(),
            }
        }
        ConnectionError::AccountBanned => UiTrigger::AccountBanned,
        ConnectionError::AccountExpired => UiTrigger::AccountExpired,
        ConnectionError::UpgradeRequired => UiTrigger::UpgradeRequired,
        ConnectionError::NetworkIsOffline => UiTrigger::NoInternet,
        ConnectionError::PrivacyNotAccepted => UiTrigger::PrivacyConsent,
        ConnectionError::AllProtocolFailed => UiTrigger::AllProtocolsFailed,
        ConnectionError::Unknown(_) => UiTrigger::UnableToReachServer,
        ConnectionError::Cancelled
        | ConnectionError::ConnectionTimeout
        | ConnectionError::AuthFailure
        | ConnectionError::ConnectivityTestFailed => return None,
        other => UiTrigger::ConfigurationError {
            message: other.to_string(),
        },
    };
    Some(trigger)
}
