//! Packet relay demo.
//!
//! Starts a loopback engine and a host loop, creates a relay output and
//! pushes synthetic encoded packets through it, then prints the delivery
//! statistics as JSON.

mod demo;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_types::RelayConfig;

/// Relay synthetic encoded packets to host callbacks.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about, long_about = None)]
struct Args {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of video frames to relay (overrides the config file).
    #[arg(short, long)]
    packets: Option<u64>,

    /// Delay between frames in milliseconds (overrides the config file).
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Print the effective configuration and exit.
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "relay_app=info,relay_output=debug,relay_engine=info,relay_host=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => RelayConfig::default(),
    };

    if let Some(packets) = args.packets {
        config.demo_packet_count = packets;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.demo_packet_interval_ms = interval_ms;
    }

    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = load_config(&args)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        packets = config.demo_packet_count,
        interval_ms = config.demo_packet_interval_ms,
        "Relay demo starting"
    );

    let report = demo::run(&config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("Relay demo finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from(["relay", "--packets", "12", "--interval-ms", "0"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.demo_packet_count, 12);
        assert_eq!(config.demo_packet_interval_ms, 0);
        assert_eq!(config.host_tick_ms, RelayConfig::default().host_tick_ms);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = Args::parse_from(["relay", "--config", "/nonexistent/relay.json"]);
        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
