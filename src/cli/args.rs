//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::constants::CONFIG_DIR_ENV;
use crate::state::{ConnectionMode, LocationId, Protocol};

/// Switchback - VPN connection orchestration core
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.toml and the JSON stores
    #[arg(long, global = true, env = CONFIG_DIR_ENV)]
    pub config_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulated connect cycle and print every state change
    Connect {
        /// Location: group id, static_<id>, custom_<id> or best
        #[arg(long)]
        location: Option<LocationId>,
        /// Wi-Fi SSID to pretend to be on (cellular when omitted)
        #[arg(long)]
        network: Option<String>,
        /// Protocol the simulated drivers fail with (repeatable)
        #[arg(long = "fail", value_name = "PROTOCOL")]
        fail: Vec<Protocol>,
        /// Failing protocols hang until the connect timeout instead of erroring
        #[arg(long)]
        hang: bool,
        /// Override the connection mode for this run
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Record privacy policy acceptance before connecting
        #[arg(long)]
        accept_privacy: bool,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 120)]
        max_secs: u64,
    },
    /// Show the protocol list for a network
    Protocols {
        /// Wi-Fi SSID (cellular when omitted)
        #[arg(long)]
        network: Option<String>,
    },
    /// Manage known networks
    Networks {
        #[command(subcommand)]
        action: NetworkAction,
    },
    /// Show config directory, store files and the effective configuration
    Info,
}

#[derive(Subcommand, Debug)]
pub enum NetworkAction {
    /// List known networks
    List,
    /// Mark a network as trusted
    Trust { ssid: String },
    /// Mark a network as untrusted
    Untrust { ssid: String },
    /// Pin a protocol/port on a network
    Prefer {
        ssid: String,
        protocol: Protocol,
        port: u16,
    },
    /// Remove the pinned protocol of a network
    Unprefer { ssid: String },
    /// Count a dismissal of the preferred-protocol popup
    Dismiss { ssid: String },
    /// Never suggest a preferred protocol for this network again
    NeverAsk { ssid: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Auto,
    Manual,
}

impl From<ModeArg> for ConnectionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => Self::Auto,
            ModeArg::Manual => Self::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        let args = Args::try_parse_from([
            "switchback",
            "connect",
            "--location",
            "static_7",
            "--network",
            "Home",
            "--fail",
            "wireguard",
            "--fail",
            "IKEv2",
            "--mode",
            "manual",
        ])
        .unwrap();
        match args.command {
            Commands::Connect {
                location,
                network,
                fail,
                mode,
                ..
            } => {
                assert_eq!(location, Some(LocationId::Static(7)));
                assert_eq!(network.as_deref(), Some("Home"));
                assert_eq!(fail, vec![Protocol::WireGuard, Protocol::Ikev2]);
                assert_eq!(mode, Some(ModeArg::Manual));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_prefer() {
        let args = Args::try_parse_from([
            "switchback",
            "--config-dir",
            "/tmp/sb",
            "networks",
            "prefer",
            "Office",
            "udp",
            "1194",
        ])
        .unwrap();
        assert_eq!(args.config_dir, Some(PathBuf::from("/tmp/sb")));
        assert!(matches!(
            args.command,
            Commands::Networks {
                action: NetworkAction::Prefer { port: 1194, protocol: Protocol::Udp, .. }
            }
        ));
    }

    #[test]
    fn test_bad_protocol_rejected() {
        assert!(Args::try_parse_from(["switchback", "protocols", "--fail", "x"]).is_err());
        assert!(
            Args::try_parse_from(["switchback", "networks", "prefer", "Office", "pptp", "1"])
                .is_err()
        );
    }
}
