//! Tunnel driver capability.
//!
//! A driver establishes the OS-level tunnel for one backend. `connect` runs on
//! a background thread, reports progress through `sink`, and must return
//! promptly once its [`CancelToken`] is cancelled.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::constants::{CAT_DRIVER, SIMULATED_STEP};
use crate::error::ConnectionError;
use crate::log_debug;
use crate::state::{Backend, Protocol, ProtocolPort, SelectedNode, VpnStatus};

/// Everything a driver needs to bring a tunnel up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    pub node: SelectedNode,
    pub candidate: ProtocolPort,
}

impl ConnectRequest {
    /// Backend that must handle this request.
    #[must_use]
    pub fn backend(&self) -> Backend {
        if self.node.is_custom_config() {
            Backend::CustomConfig
        } else {
            self.candidate.protocol.backend()
        }
    }
}

/// Progress reported while connecting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    /// Free-form progress text.
    Update(String),
    /// Raw OS tunnel status.
    Vpn(VpnStatus),
    /// Tunnel is up, connectivity test running.
    Validating,
    /// Connectivity confirmed; carries the public IP.
    Validated(String),
}

/// Shared cancellation flag for one operation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait TunnelDriver: Send + Sync {
    fn backend(&self) -> Backend;

    /// Blocks until the tunnel is validated, fails, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error from the connection taxonomy; `Cancelled` when aborted.
    fn connect(
        &self,
        request: &ConnectRequest,
        cancel: &CancelToken,
        sink: &dyn Fn(DriverEvent),
    ) -> Result<(), ConnectionError>;

    /// Tears the tunnel down.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the teardown.
    fn disconnect(&self) -> Result<(), ConnectionError>;

    fn current_status(&self) -> VpnStatus;
}

/// One driver per backend.
#[derive(Clone, Default)]
pub struct DriverSet {
    drivers: HashMap<Backend, Arc<dyn TunnelDriver>>,
}

impl DriverSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, driver: Arc<dyn TunnelDriver>) -> Self {
        self.drivers.insert(driver.backend(), driver);
        self
    }

    /// Driver for `backend`.
    ///
    /// # Errors
    ///
    /// `CustomConfigSupportNotAvailable` for a missing custom-config driver,
    /// `IncorrectVpnManager` for any other missing backend.
    pub fn get(&self, backend: Backend) -> Result<Arc<dyn TunnelDriver>, ConnectionError> {
        self.drivers.get(&backend).cloned().ok_or(match backend {
            Backend::CustomConfig => ConnectionError::CustomConfigSupportNotAvailable,
            _ => ConnectionError::IncorrectVpnManager,
        })
    }

    /// Every backend that currently reports a live tunnel.
    #[must_use]
    pub fn active(&self) -> Vec<Backend> {
        self.drivers
            .values()
            .filter(|d| {
                matches!(
                    d.current_status(),
                    VpnStatus::Connected | VpnStatus::Connecting | VpnStatus::Reasserting
                )
            })
            .map(|d| d.backend())
            .collect()
    }
}

/// How a simulated protocol misbehaves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// Never completes; only the connect timeout or a cancel ends the attempt.
    Hang,
    /// Fails with the given error after one step.
    Error(ConnectionError),
}

/// In-process driver that pretends to bring tunnels up.
pub struct SimulatedDriver {
    backend: Backend,
    step: Duration,
    failures: HashMap<Protocol, SimulatedFailure>,
    status: Mutex<VpnStatus>,
    public_ip: String,
}

impl SimulatedDriver {
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            step: SIMULATED_STEP,
            failures: HashMap::new(),
            status: Mutex::new(VpnStatus::Disconnected),
            public_ip: "198.51.100.7".to_string(),
        }
    }

    #[must_use]
    pub fn failing(mut self, protocols: &HashSet<Protocol>, failure: &SimulatedFailure) -> Self {
        for p in protocols {
            self.failures.insert(*p, failure.clone());
        }
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Drivers for every backend sharing one failure script.
    #[must_use]
    pub fn full_set(protocols: &HashSet<Protocol>, failure: &SimulatedFailure) -> DriverSet {
        [
            Backend::OpenVpn,
            Backend::Ikev2,
            Backend::WireGuard,
            Backend::CustomConfig,
        ]
        .into_iter()
        .fold(DriverSet::new(), |set, backend| {
            set.with(Arc::new(Self::new(backend).failing(protocols, failure)))
        })
    }

    fn set_status(&self, status: VpnStatus, sink: &dyn Fn(DriverEvent)) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
        sink(DriverEvent::Vpn(status));
    }

    /// Sleeps one step; false when cancelled.
    fn wait(&self, cancel: &CancelToken) -> bool {
        thread::sleep(self.step);
        !cancel.is_cancelled()
    }
}

impl TunnelDriver for SimulatedDriver {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn connect(
        &self,
        request: &ConnectRequest,
        cancel: &CancelToken,
        sink: &dyn Fn(DriverEvent),
    ) -> Result<(), ConnectionError> {
        log_debug!(
            CAT_DRIVER,
            "{} driver connecting to {} with {}",
            self.backend,
            request.node.hostname,
            request.candidate
        );
        sink(DriverEvent::Update(format!(
            "Connecting to {}",
            request.node.server_address
        )));
        self.set_status(VpnStatus::Connecting, sink);

        match self.failures.get(&request.candidate.protocol) {
            Some(SimulatedFailure::Hang) => {
                while self.wait(cancel) {}
                self.set_status(VpnStatus::Disconnected, sink);
                return Err(ConnectionError::Cancelled);
            }
            Some(SimulatedFailure::Error(err)) => {
                self.wait(cancel);
                self.set_status(VpnStatus::Disconnected, sink);
                return Err(err.clone());
            }
            None => {}
        }

        if !self.wait(cancel) {
            self.set_status(VpnStatus::Disconnected, sink);
            return Err(ConnectionError::Cancelled);
        }
        self.set_status(VpnStatus::Connected, sink);
        sink(DriverEvent::Validating);
        if !self.wait(cancel) {
            return Err(ConnectionError::Cancelled);
        }
        sink(DriverEvent::Validated(self.public_ip.clone()));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ConnectionError> {
        thread::sleep(self.step);
        if let Ok(mut current) = self.status.lock() {
            *current = VpnStatus::Disconnected;
        }
        Ok(())
    }

    fn current_status(&self) -> VpnStatus {
        self.status.lock().map(|s| *s).unwrap_or_default()
    }
}
