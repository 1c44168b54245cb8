//! CLI command handlers.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use color_eyre::eyre::{eyre, Result};

use super::args::{Commands, ModeArg, NetworkAction};
use crate::config::AppConfig;
use crate::constants::{
    self, AUTOMATIC_MODE_FILE_NAME, CATALOG_FILE_NAME, CAT_DRIVER, CLI_LOG_TAIL,
    CLI_MSG_NETWORK_NOT_FOUND,
    CLI_MSG_NO_NETWORKS, CONFIG_FILE_NAME, NETWORKS_FILE_NAME, PREFERENCES_FILE_NAME,
};
use crate::core::driver::{SimulatedDriver, SimulatedFailure};
use crate::core::machine::{ConnectionMachine, MachineDeps};
use crate::core::network::NetworkSignal;
use crate::core::protocol::{ProtocolContext, ProtocolManager, ProtocolViewType};
use crate::core::runtime::Runtime;
use crate::error::ConnectionError;
use crate::log_warning;
use crate::logger::{self, LogEntry};
use crate::message::Message;
use crate::state::{
    AccountStatus, AutomaticMode, ConnectionState, ConnectionType, LocationId, Protocol,
    ProtocolPort, Session, UiTrigger, WifiNetwork,
};
use crate::store::{Catalog, JsonPreferences, JsonRepository, PreferencesStore, Repository};

struct Stores {
    networks: JsonRepository<WifiNetwork>,
    counters: JsonRepository<AutomaticMode>,
    preferences: JsonPreferences,
    catalog: Catalog,
}

fn open_stores(config_dir: &Path) -> Result<Stores> {
    Ok(Stores {
        networks: JsonRepository::open(&config_dir.join(NETWORKS_FILE_NAME))?,
        counters: JsonRepository::open(&config_dir.join(AUTOMATIC_MODE_FILE_NAME))?,
        preferences: JsonPreferences::open(&config_dir.join(PREFERENCES_FILE_NAME))?,
        catalog: Catalog::load_or_demo(&config_dir.join(CATALOG_FILE_NAME))?,
    })
}

/// Runs `command` against the stores in `config_dir`.
///
/// # Errors
///
/// Returns an error if a store cannot be read or written, or if a connect
/// run ends without a tunnel.
pub fn handle_command(command: Commands, config_dir: &Path, config: &AppConfig) -> Result<()> {
    match command {
        Commands::Connect {
            location,
            network,
            fail,
            hang,
            mode,
            accept_privacy,
            max_secs,
        } => connect(
            config_dir,
            config,
            &ConnectOptions {
                location,
                network,
                fail: fail.into_iter().collect(),
                hang,
                mode,
                accept_privacy,
                limit: Duration::from_secs(max_secs),
            },
        ),
        Commands::Protocols { network } => protocols(config_dir, config, network.as_deref()),
        Commands::Networks { action } => networks(config_dir, action),
        Commands::Info => info(config_dir, config),
    }
}

struct ConnectOptions {
    location: Option<LocationId>,
    network: Option<String>,
    fail: HashSet<Protocol>,
    hang: bool,
    mode: Option<ModeArg>,
    accept_privacy: bool,
    limit: Duration,
}

fn signal_for(network: Option<&str>) -> NetworkSignal {
    network.map_or_else(NetworkSignal::cellular, NetworkSignal::wifi)
}

/// Triggers that end a CLI connect run.
fn is_terminal(trigger: &UiTrigger) -> bool {
    !matches!(
        trigger,
        UiTrigger::RefreshIp
            | UiTrigger::ResumeLatencyProbe
            | UiTrigger::RatePrompt
            | UiTrigger::NotificationPermission
            | UiTrigger::ConnectingInProgress
            | UiTrigger::LocationDowngraded { .. }
            | UiTrigger::TrustedNetworkPrompt { .. }
    )
}

fn connect(config_dir: &Path, config: &AppConfig, opts: &ConnectOptions) -> Result<()> {
    let deadline = Instant::now()
        .checked_add(opts.limit)
        .ok_or_else(|| eyre!("--max-secs {} is out of range", opts.limit.as_secs()))?;
    let stores = open_stores(config_dir)?;
    let mut preferences = stores.preferences;
    if opts.accept_privacy || opts.mode.is_some() {
        let mut prefs = preferences.get();
        prefs.privacy_accepted |= opts.accept_privacy;
        if let Some(mode) = opts.mode {
            prefs.connection_mode = mode.into();
        }
        preferences.set(prefs)?;
    }

    let failure = if opts.hang {
        SimulatedFailure::Hang
    } else {
        SimulatedFailure::Error(ConnectionError::ConnectionTimeout)
    };
    let drivers = SimulatedDriver::full_set(&opts.fail, &failure);

    let mut machine = ConnectionMachine::new(
        config.clone(),
        MachineDeps {
            catalog: stores.catalog,
            session: Session {
                status: AccountStatus::Ok,
                is_premium: true,
                data_left_bytes: None,
            },
            network: signal_for(opts.network.as_deref()),
            networks: Box::new(stores.networks),
            counters: Box::new(stores.counters),
            preferences: Box::new(preferences),
        },
    );
    let (_, states) = machine.subscribe_state();
    let (_, triggers) = machine.subscribe_triggers();
    let mut runtime = Runtime::new(machine, drivers, config.tick_rate_ms);

    runtime.dispatch(Message::EnableConnection {
        location: opts.location.clone(),
        connection_type: ConnectionType::User,
    });

    let mut failure: Option<String> = None;
    while Instant::now() < deadline {
        runtime.step()?;
        for state in states.try_iter() {
            println!("  state    {state}");
        }
        for trigger in triggers.try_iter() {
            println!("  trigger  {trigger:?}");
            if let UiTrigger::TrustedNetworkPrompt { ssid } = &trigger {
                println!("  {ssid} is trusted, connecting anyway");
                runtime.dispatch(Message::ConfirmTrustedConnect);
            } else if is_terminal(&trigger) && failure.is_none() {
                failure = Some(format!("{trigger:?}"));
            }
        }
        if failure.is_some()
            || matches!(
                runtime.machine().state(),
                ConnectionState::Connected | ConnectionState::Invalid
            )
        {
            break;
        }
    }

    if runtime.machine().state() != ConnectionState::Connected {
        print_log_tail();
        return Err(eyre!(
            "Connect ended {} ({})",
            runtime.machine().state(),
            failure.unwrap_or_else(|| "timed out".to_string())
        ));
    }

    if let (Some(node), Some(candidate)) = (
        runtime.machine().selected(),
        runtime.machine().connected_candidate(),
    ) {
        println!(
            "\nConnected to {} ({}) with {candidate}",
            node.display_name(),
            node.hostname
        );
    }

    runtime.dispatch(Message::DisableConnection);
    runtime.run_until(config.disconnect_timeout().saturating_mul(2), |m| {
        m.state() == ConnectionState::Disconnected
    })?;
    for state in states.try_iter() {
        println!("  state    {state}");
    }
    let still_up = runtime.active_tunnels();
    if !still_up.is_empty() {
        log_warning!(CAT_DRIVER, "Tunnels still up after disconnect: {still_up:?}");
    }
    Ok(())
}

/// Prints the most recent buffered log entries to stderr.
fn print_log_tail() {
    for line in log_tail(CLI_LOG_TAIL) {
        eprintln!("  {line}");
    }
}

fn log_tail(count: usize) -> Vec<String> {
    let logs = logger::get_logs();
    let skip = logs.len().saturating_sub(count);
    logs.iter().skip(skip).map(LogEntry::format).collect()
}

fn protocols(config_dir: &Path, config: &AppConfig, network: Option<&str>) -> Result<()> {
    let stores = open_stores(config_dir)?;
    let prefs = stores.preferences.get();
    let ssid = signal_for(network)
        .ssid
        .unwrap_or_else(|| constants::CELLULAR_NETWORK_NAME.to_string());
    let known = stores.networks.get(&ssid);
    let manager = ProtocolManager::new(
        config.protocol_priority.clone(),
        Box::new(stores.counters),
        config.good_protocol_ttl(),
    );
    let ctx = ProtocolContext {
        network: known.as_ref(),
        preferences: &prefs,
        port_map: &stores.catalog.port_map,
        custom_config: None,
    };

    println!("Protocols on {ssid} ({:?} mode):", prefs.connection_mode);
    for entry in manager.display_list(&ctx, None) {
        let label = match entry.view_type {
            ProtocolViewType::NextUp => "next",
            ProtocolViewType::Connected => "active",
            ProtocolViewType::Fail => "failed",
            ProtocolViewType::Normal => "",
        };
        println!(
            "  {:<14} {:<7} failures: {}",
            entry.candidate.to_string(),
            label,
            manager.failures(&ssid, entry.candidate.protocol)
        );
    }
    Ok(())
}

fn networks(config_dir: &Path, action: NetworkAction) -> Result<()> {
    let mut repo: JsonRepository<WifiNetwork> =
        JsonRepository::open(&config_dir.join(NETWORKS_FILE_NAME))?;

    let (ssid, edit): (String, Box<dyn FnOnce(&mut WifiNetwork)>) = match action {
        NetworkAction::List => {
            let all = repo.all();
            if all.is_empty() {
                println!("{CLI_MSG_NO_NETWORKS}");
            }
            for n in all {
                let preferred = n
                    .preferred()
                    .map_or_else(|| "-".to_string(), |p| p.to_string());
                println!(
                    "  {:<24} trusted: {:<5} preferred: {:<14} dismissed: {}{}",
                    n.ssid,
                    n.trusted,
                    preferred,
                    n.popup_dismiss_count,
                    if n.dont_ask_again_for_preferred_protocol {
                        " (never ask)"
                    } else {
                        ""
                    }
                );
            }
            return Ok(());
        }
        NetworkAction::Trust { ssid } => {
            (ssid, Box::new(|n: &mut WifiNetwork| n.trusted = true))
        }
        NetworkAction::Untrust { ssid } => {
            (ssid, Box::new(|n: &mut WifiNetwork| n.trusted = false))
        }
        NetworkAction::Prefer {
            ssid,
            protocol,
            port,
        } => (
            ssid,
            Box::new(move |n: &mut WifiNetwork| {
                n.set_preferred(Some(ProtocolPort::new(protocol, port)));
            }),
        ),
        NetworkAction::Unprefer { ssid } => {
            (ssid, Box::new(|n: &mut WifiNetwork| n.set_preferred(None)))
        }
        NetworkAction::Dismiss { ssid } => (
            ssid,
            Box::new(|n: &mut WifiNetwork| {
                n.popup_dismiss_count = n.popup_dismiss_count.saturating_add(1);
            }),
        ),
        NetworkAction::NeverAsk { ssid } => (
            ssid,
            Box::new(|n: &mut WifiNetwork| n.dont_ask_again_for_preferred_protocol = true),
        ),
    };

    let mut record = repo
        .get(&ssid)
        .ok_or_else(|| eyre!("{CLI_MSG_NETWORK_NOT_FOUND}{ssid}"))?;
    edit(&mut record);
    repo.put(record)?;
    println!("Updated {ssid}");
    Ok(())
}

fn info(config_dir: &Path, config: &AppConfig) -> Result<()> {
    println!(
        "{} {} - {}",
        constants::APP_NAME,
        constants::APP_VERSION,
        constants::APP_SUMMARY
    );
    println!("\nConfig directory: {}", config_dir.display());
    for name in [
        CONFIG_FILE_NAME,
        NETWORKS_FILE_NAME,
        AUTOMATIC_MODE_FILE_NAME,
        PREFERENCES_FILE_NAME,
        CATALOG_FILE_NAME,
    ] {
        let status = if config_dir.join(name).exists() {
            "present"
        } else {
            "missing (defaults)"
        };
        println!("  {name:<22} {status}");
    }
    println!("\nEffective configuration:\n{}", toml::to_string_pretty(config)?);
    Ok(())
}
