//! ipconf CLI
//!
//! Early-boot BOOTP/DHCP address configuration

mod config;
mod platform;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use ipconf_core::{ConfigurationResult, InterfaceOutcome, NegotiationConfig, ProtocolMode};
use ipconf_transport::Interface;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::Config;

/// ipconf - acquire IPv4 configuration over BOOTP/DHCP at boot
#[derive(Parser)]
#[command(name = "ipconf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Interfaces to configure, optionally with a hardware address
    #[arg(required = true, value_name = "IFACE[=MAC]")]
    interfaces: Vec<String>,

    /// Protocol variants to try (dhcp, bootp, any)
    #[arg(long, value_name = "MODE")]
    proto: Option<ProtocolMode>,

    /// Global deadline in seconds
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Transmissions per protocol phase
    #[arg(short, long)]
    retries: Option<u32>,

    /// Wait before the first retransmission, in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    initial_timeout: Option<Duration>,

    /// Retransmission interval ceiling, in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    max_backoff: Option<Duration>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// KEY=value blocks
    Text,
    /// JSON array
    Json,
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("not a number: {s}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    // RUST_LOG wins, then -v, then the configured level
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let negotiation = apply_overrides(config.negotiation.to_negotiation(), &cli);
    negotiation.validate()?;

    let interfaces = cli
        .interfaces
        .iter()
        .map(|arg| platform::resolve(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!(
        interfaces = interfaces.len(),
        mode = ?negotiation.mode,
        deadline_secs = negotiation.global_deadline.as_secs(),
        "starting negotiation"
    );

    let outcomes = negotiate(interfaces, negotiation)?;
    report(&outcomes, cli.format)?;

    if outcomes.iter().any(InterfaceOutcome::is_configured) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Command-line values override the file
fn apply_overrides(mut config: NegotiationConfig, cli: &Cli) -> NegotiationConfig {
    if let Some(mode) = cli.proto {
        config.mode = mode;
    }
    if let Some(secs) = cli.timeout {
        config.global_deadline = Duration::from_secs(secs);
    }
    if let Some(retries) = cli.retries {
        config.max_attempts = retries;
    }
    if let Some(initial) = cli.initial_timeout {
        config.initial_timeout = initial;
    }
    if let Some(max) = cli.max_backoff {
        config.max_backoff = max;
    }
    config
}

#[cfg(target_os = "linux")]
fn negotiate(
    interfaces: Vec<Interface>,
    config: NegotiationConfig,
) -> anyhow::Result<Vec<InterfaceOutcome>> {
    use ipconf_core::Coordinator;
    use ipconf_transport::{RawPacketTransport, SystemClock};

    let mut coordinator = Coordinator::new(RawPacketTransport::new(), SystemClock, config)?;
    for interface in interfaces {
        coordinator.add_interface(interface)?;
    }
    Ok(coordinator.run())
}

#[cfg(not(target_os = "linux"))]
fn negotiate(
    _interfaces: Vec<Interface>,
    _config: NegotiationConfig,
) -> anyhow::Result<Vec<InterfaceOutcome>> {
    anyhow::bail!("raw link-layer sockets are only supported on Linux")
}

#[derive(Serialize)]
struct JsonOutcome<'a> {
    interface: &'a str,
    configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a ConfigurationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn report(outcomes: &[InterfaceOutcome], format: OutputFormat) -> anyhow::Result<()> {
    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            tracing::error!(interface = %outcome.interface, "{e}");
        }
    }

    match format {
        OutputFormat::Text => {
            let blocks: Vec<String> = outcomes
                .iter()
                .filter_map(|o| o.result.as_ref().ok())
                .map(ToString::to_string)
                .collect();
            if !blocks.is_empty() {
                println!("{}", blocks.join("\n\n"));
            }
        }
        OutputFormat::Json => {
            let json: Vec<JsonOutcome<'_>> = outcomes
                .iter()
                .map(|o| JsonOutcome {
                    interface: &o.interface,
                    configured: o.is_configured(),
                    config: o.result.as_ref().ok(),
                    error: o.result.as_ref().err().map(ToString::to_string),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}
