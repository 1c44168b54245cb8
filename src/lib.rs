//! Switchback: VPN connection orchestration core.
//!
//! Decides which backend and protocol/port to use, drives the connection
//! state machine, fails over between protocols, and reconnects when the
//! network identity changes.

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod event;
pub mod logger;
pub mod message;
pub mod state;
pub mod store;
