//! Event loop plumbing.
//!
//! Every input of the connection core arrives as a [`Message`] on a single
//! channel: a background thread emits periodic [`Message::Tick`]s, and any
//! number of senders handed out by [`EventHandler::sender`] (driver threads,
//! OS callbacks, front ends) inject the rest.

use color_eyre::Result;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::message::Message;

/// Merges ticks and injected messages into one ordered stream.
pub struct EventHandler {
    sender: mpsc::Sender<Message>,
    receiver: mpsc::Receiver<Message>,
    #[allow(dead_code)]
    handler: thread::JoinHandle<()>,
}

impl EventHandler {
    /// Creates a new event handler with the specified tick rate.
    ///
    /// # Arguments
    ///
    /// * `tick_rate_ms` - Milliseconds between tick messages
    #[must_use]
    pub fn new(tick_rate_ms: u64) -> Self {
        let tick_rate = Duration::from_millis(tick_rate_ms.max(1));
        let (sender, receiver) = mpsc::channel();
        let ticker = sender.clone();

        let handler = thread::spawn(move || {
            let mut last_tick = Instant::now();
            loop {
                let timeout = tick_rate
                    .checked_sub(last_tick.elapsed())
                    .unwrap_or(Duration::ZERO);
                thread::sleep(timeout);

                // Receiver gone: the loop is over.
                if ticker.send(Message::Tick).is_err() {
                    return;
                }
                last_tick = Instant::now();
            }
        });

        Self {
            sender,
            receiver,
            handler,
        }
    }

    /// A handle for injecting messages from other threads.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.sender.clone()
    }

    /// Blocks until the next message is available.
    ///
    /// # Errors
    ///
    /// Returns an error if the message channel is disconnected.
    pub fn next(&self) -> Result<Message> {
        Ok(self.receiver.recv()?)
    }

    /// Like [`next`](Self::next) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message channel is disconnected.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
