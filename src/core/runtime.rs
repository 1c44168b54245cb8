//! Drives a [`ConnectionMachine`] with real threads.
//!
//! The machine stays single-threaded: messages are handled one at a time on
//! the caller's thread, while connect and disconnect effects run on spawned
//! worker threads that report back through the event channel.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::Result;

use crate::constants::CAT_DRIVER;
use crate::core::driver::{DriverEvent, DriverSet};
use crate::core::machine::{ConnectionMachine, Effect};
use crate::event::EventHandler;
use crate::log_debug;
use crate::message::Message;
use crate::state::Backend;

pub struct Runtime {
    machine: ConnectionMachine,
    drivers: DriverSet,
    events: EventHandler,
}

impl Runtime {
    #[must_use]
    pub fn new(machine: ConnectionMachine, drivers: DriverSet, tick_rate_ms: u64) -> Self {
        Self {
            machine,
            drivers,
            events: EventHandler::new(tick_rate_ms),
        }
    }

    /// Handle for sending messages from any thread.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.events.sender()
    }

    #[must_use]
    pub fn machine(&self) -> &ConnectionMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut ConnectionMachine {
        &mut self.machine
    }

    /// Backends whose driver still reports a live tunnel.
    #[must_use]
    pub fn active_tunnels(&self) -> Vec<Backend> {
        self.drivers.active()
    }

    /// Handles `message` now and starts whatever work it requested.
    pub fn dispatch(&mut self, message: Message) {
        self.machine.handle_message(message);
        for effect in self.machine.take_effects() {
            self.execute(effect);
        }
    }

    /// Waits for the next message and dispatches it.
    ///
    /// # Errors
    ///
    /// Returns an error if the event channel is disconnected.
    pub fn step(&mut self) -> Result<()> {
        let message = self.events.next()?;
        self.dispatch(message);
        Ok(())
    }

    /// Dispatches messages until `done` holds or `limit` elapses.
    ///
    /// Returns whether `done` held.
    ///
    /// # Errors
    ///
    /// Returns an error if the event channel is disconnected.
    pub fn run_until(
        &mut self,
        limit: Duration,
        mut done: impl FnMut(&ConnectionMachine) -> bool,
    ) -> Result<bool> {
        // No deadline when `limit` is past the end of the clock.
        let deadline = Instant::now().checked_add(limit);
        loop {
            let remaining =
                deadline.map_or(limit, |d| d.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                return Ok(done(&self.machine));
            }
            if let Some(message) = self.events.next_timeout(remaining)? {
                self.dispatch(message);
                if done(&self.machine) {
                    return Ok(true);
                }
            }
        }
    }

    fn execute(&self, effect: Effect) {
        let tx = self.events.sender();
        match effect {
            Effect::Connect {
                id,
                request,
                cancel,
            } => {
                let driver = match self.drivers.get(request.backend()) {
                    Ok(driver) => driver,
                    Err(e) => {
                        let _ = tx.send(Message::ConnectFinished { id, result: Err(e) });
                        return;
                    }
                };
                log_debug!(CAT_DRIVER, "Spawning connect op {id} on {}", driver.backend());
                thread::spawn(move || {
                    let progress = tx.clone();
                    let sink = move |event: DriverEvent| {
                        let _ = progress.send(Message::Driver { id, event });
                    };
                    let result = driver.connect(&request, &cancel, &sink);
                    let _ = tx.send(Message::ConnectFinished { id, result });
                });
            }
            Effect::Disconnect { id, backend } => {
                let driver = match self.drivers.get(backend) {
                    Ok(driver) => driver,
                    Err(e) => {
                        let _ = tx.send(Message::DisconnectFinished { id, result: Err(e) });
                        return;
                    }
                };
                log_debug!(CAT_DRIVER, "Spawning disconnect op {id} on {backend}");
                thread::spawn(move || {
                    let result = driver.disconnect();
                    let _ = tx.send(Message::DisconnectFinished { id, result });
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::driver::{SimulatedDriver, SimulatedFailure};
    use crate::core::machine::MachineDeps;
    use crate::core::network::NetworkSignal;
    use crate::error::ConnectionError;
    use crate::state::{
        Backend, ConnectionState, ConnectionType, Preferences, Protocol, ProtocolPort, Session,
        UiTrigger,
    };
    use crate::store::{Catalog, MemoryPreferences, MemoryRepository};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn machine(priority: Vec<Protocol>) -> ConnectionMachine {
        ConnectionMachine::new(
            AppConfig {
                protocol_priority: priority,
                ..AppConfig::default()
            },
            MachineDeps {
                catalog: Catalog::demo(),
                session: Session::default(),
                network: NetworkSignal::wifi("Home"),
                networks: Box::new(MemoryRepository::default()),
                counters: Box::new(MemoryRepository::default()),
                preferences: Box::new(MemoryPreferences::new(Preferences {
                    privacy_accepted: true,
                    ..Preferences::default()
                })),
            },
        )
        .with_seed(3)
    }

    fn drivers(failing: &[Protocol]) -> DriverSet {
        let failing: HashSet<Protocol> = failing.iter().copied().collect();
        [Backend::OpenVpn, Backend::Ikev2, Backend::WireGuard]
            .into_iter()
            .fold(DriverSet::new(), |set, backend| {
                set.with(Arc::new(
                    SimulatedDriver::new(backend)
                        .with_step(Duration::from_millis(1))
                        .failing(
                            &failing,
                            &SimulatedFailure::Error(ConnectionError::ConnectionTimeout),
                        ),
                ))
            })
    }

    fn enable() -> Message {
        Message::EnableConnection {
            location: None,
            connection_type: ConnectionType::User,
        }
    }

    #[test]
    fn test_runtime_fails_over_on_worker_threads() {
        let mut runtime = Runtime::new(
            machine(vec![Protocol::WireGuard, Protocol::Ikev2]),
            drivers(&[Protocol::WireGuard]),
            10,
        );
        runtime.dispatch(enable());

        let connected = runtime
            .run_until(Duration::from_secs(5), |m| {
                m.state() == ConnectionState::Connected
            })
            .unwrap();
        assert!(connected);
        assert_eq!(
            runtime.machine().connected_candidate(),
            Some(ProtocolPort::new(Protocol::Ikev2, 500))
        );
        assert_eq!(runtime.active_tunnels(), vec![Backend::Ikev2]);

        runtime.sender().send(Message::DisableConnection).unwrap();
        let down = runtime
            .run_until(Duration::from_secs(5), |m| {
                m.state() == ConnectionState::Disconnected
            })
            .unwrap();
        assert!(down);
        assert!(runtime.active_tunnels().is_empty());
    }

    #[test]
    fn test_missing_backend_is_a_configuration_error() {
        let wireguard_only = DriverSet::new().with(Arc::new(
            SimulatedDriver::new(Backend::WireGuard).with_step(Duration::from_millis(1)),
        ));
        let mut runtime = Runtime::new(machine(vec![Protocol::Ikev2]), wireguard_only, 10);
        let (_, triggers) = runtime.machine_mut().subscribe_triggers();
        runtime.dispatch(enable());

        let invalid = runtime
            .run_until(Duration::from_secs(5), |m| m.state() == ConnectionState::Invalid)
            .unwrap();
        assert!(invalid);
        assert!(triggers
            .try_iter()
            .any(|t| matches!(t, UiTrigger::ConfigurationError { .. })));
    }
}
