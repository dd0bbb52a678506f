//! # hsmpool CLI
//!
//! Command-line front end that builds an [`HsmPool`] over a simulated rack and exercises it:
//! list the units and key groups, allocate a reader and exchange APDUs, or run an
//! allocate/release cycle per group and report the counters.
//!
//! ## Usage
//!
//! ```bash
//! # Identity records of every unit
//! hsmpool-cli units
//!
//! # Key groups available for allocation, as JSON
//! hsmpool-cli --json groups
//!
//! # Allocate a reader for group 1 and send two APDUs
//! hsmpool-cli transmit --group 1 --apdu 0084000008 --apdu 80CA4F0000
//!
//! # Rack described in a settings file
//! hsmpool-cli --config rack.toml stats
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod settings;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hsmpool::{CardReader, HsmPool, HsmReader, PoolPlugin};
use hsmpool_driver::HsmSystem;
use hsmpool_driver::sim::SimulatedSystem;
use serde_json::json;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::{LoggingSettings, Settings};

/// Main CLI application structure
#[derive(Parser, Debug)]
#[command(
    name = "hsmpool-cli",
    version,
    about = "Inspect and exercise a pool of HSM units exposed as virtual SAM readers."
)]
pub struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, env = "HSMPOOL_CONFIG")]
    pub config: Option<PathBuf>,
    /// Emit JSON output
    #[arg(long, global = true)]
    pub json: bool,
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the identity record of every unit
    Units,
    /// Print the key groups available for allocation
    Groups,
    /// Allocate a reader, exchange APDUs over it and release it
    Transmit(TransmitArgs),
    /// Allocate and release one reader per group, then print the pool counters
    Stats,
}

/// Arguments of the `transmit` subcommand
#[derive(Args, Debug, Clone)]
pub struct TransmitArgs {
    /// Key group reference; the configured default group when omitted
    #[arg(long)]
    pub group: Option<String>,
    /// Command APDU in hex, may be repeated
    #[arg(long = "apdu", required = true)]
    pub apdus: Vec<String>,
}

/// Run the CLI application
pub fn run_cli() {
    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: invalid settings: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&settings.logging);

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = execute(&cli, &settings, &mut stdout) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        debug!("tracing subscriber already installed");
    }
}

/// Build the pool described by `settings`, run the command and shut the pool down
pub fn execute(cli: &Cli, settings: &Settings, out: &mut impl Write) -> Result<()> {
    let system: Arc<dyn HsmSystem> = Arc::new(SimulatedSystem::new(settings.rack()));
    let pool = HsmPool::builder(system)
        .config(settings.pool.clone())
        .build()
        .context("failed to build the pool")?;

    let outcome = match &cli.command {
        Commands::Units => cmd_units(&pool, cli.json, out),
        Commands::Groups => cmd_groups(&pool, cli.json, out),
        Commands::Transmit(args) => cmd_transmit(&pool, args, cli.json, out),
        Commands::Stats => cmd_stats(&pool, cli.json, out),
    };

    if let Err(e) = pool.shutdown() {
        warn!("{}", e);
    }
    outcome
}

fn cmd_units(pool: &HsmPool, json: bool, out: &mut impl Write) -> Result<()> {
    if json {
        let units: Vec<_> = pool
            .units()
            .iter()
            .map(|unit| {
                json!({
                    "id": unit.id().position(),
                    "name": unit.display_name(),
                    "info": unit.info(),
                })
            })
            .collect();
        return write_json(out, &json!(units));
    }
    for unit in pool.units() {
        writeln!(out, "{} {}: {}", unit.id(), unit.display_name(), unit.info())?;
    }
    Ok(())
}

fn cmd_groups(pool: &HsmPool, json: bool, out: &mut impl Write) -> Result<()> {
    let groups = pool.reader_group_references();
    if json {
        return write_json(out, &json!(groups));
    }
    for group in groups {
        writeln!(out, "{group}")?;
    }
    Ok(())
}

fn cmd_transmit(
    pool: &HsmPool,
    args: &TransmitArgs,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let apdus = args
        .apdus
        .iter()
        .map(|apdu| hex::decode(apdu).with_context(|| format!("invalid APDU hex '{apdu}'")))
        .collect::<Result<Vec<_>>>()?;

    let mut reader = pool.allocate_reader(args.group.as_deref())?;
    let exchanged = exchange_all(&mut reader, &apdus);
    pool.release_reader(Some(&mut reader))?;
    let responses = exchanged?;

    if json {
        return write_json(
            out,
            &json!({
                "reader": reader.name(),
                "key_group": reader.key_group(),
                "atr": reader.atr().to_hex(),
                "exchanges": args.apdus.iter().zip(&responses).map(|(apdu, response)| {
                    json!({ "command": apdu.to_uppercase(), "response": response })
                }).collect::<Vec<_>>(),
            }),
        );
    }
    writeln!(out, "Reader: {}", reader.name())?;
    writeln!(out, "ATR: {}", reader.atr())?;
    for (apdu, response) in args.apdus.iter().zip(&responses) {
        let response = response.as_deref().unwrap_or("<none>");
        writeln!(out, "> {}", apdu.to_uppercase())?;
        writeln!(out, "< {response}")?;
    }
    Ok(())
}

fn exchange_all(reader: &mut HsmReader, apdus: &[Vec<u8>]) -> Result<Vec<Option<String>>> {
    apdus
        .iter()
        .map(|apdu| {
            let response = reader.transmit_apdu(apdu)?;
            Ok(response.map(hex::encode_upper))
        })
        .collect()
}

fn cmd_stats(pool: &HsmPool, json: bool, out: &mut impl Write) -> Result<()> {
    for group in pool.reader_group_references() {
        let mut reader = pool.allocate_reader(Some(group.as_str()))?;
        pool.release_reader(Some(&mut reader))?;
    }

    let stats = pool.stats();
    if json {
        return write_json(out, &serde_json::to_value(&stats)?);
    }
    writeln!(out, "allocations: {}", stats.allocations)?;
    writeln!(out, "failed_allocations: {}", stats.failed_allocations)?;
    writeln!(out, "fallbacks: {}", stats.fallbacks)?;
    writeln!(out, "releases: {}", stats.releases)?;
    writeln!(out, "failed_releases: {}", stats.failed_releases)?;
    Ok(())
}

fn write_json(out: &mut impl Write, value: &serde_json::Value) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}
