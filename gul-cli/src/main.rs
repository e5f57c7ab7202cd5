// gul-cli/src/main.rs
// ============================================================================
// Module: GUL CLI Entry Point
// Description: Command dispatcher for publisher and client workflows.
// Purpose: Provide key generation, fence authoring, publishing, and sync
//          commands as a thin shell over the library crates.
// Dependencies: clap, gul-core, gul-client, gul-publisher, tokio, tracing
// ============================================================================

//! ## Overview
//! One binary drives both sides of the system: the publisher workflow
//! (keygen, init, fence authoring, publish) and the client workflow (sync,
//! watch, check). All state lives behind the library crates; the CLI only
//! parses arguments, loads the config document, and prints results.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::Parser;
use clap::Subcommand;
use gul_client::ClientConfig;
use gul_client::Syncer;
use gul_core::FenceItem;
use gul_core::KeyPair;
use gul_publisher::Publisher;
use gul_publisher::PublisherConfig;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a config document.
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;
/// Maximum size of a fence JSON input.
const MAX_FENCE_BYTES: u64 = 4 * 1024 * 1024;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Geofence Update Lite command line.
#[derive(Parser, Debug)]
#[command(name = "gul", version, about = "Signed geofence dataset publishing and sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a fresh Ed25519 key pair and print it as hex.
    Keygen,
    /// Reset the authoring store to version 0 with no fences.
    Init {
        /// Path to the config document.
        #[arg(long)]
        config: PathBuf,
    },
    /// Sign a fence described in a JSON file and add it to the store.
    AddFence {
        /// Path to the config document.
        #[arg(long)]
        config: PathBuf,
        /// Path to the fence JSON file.
        file: PathBuf,
    },
    /// Remove a fence from the authoring store.
    RemoveFence {
        /// Path to the config document.
        #[arg(long)]
        config: PathBuf,
        /// Fence identifier.
        id: String,
    },
    /// List fences in the authoring store, highest priority first.
    ListFences {
        /// Path to the config document.
        #[arg(long)]
        config: PathBuf,
    },
    /// Publish the authoring fence set as a new version.
    Publish {
        /// Path to the config document.
        #[arg(long)]
        config: PathBuf,
    },
    /// Run one client sync pass against the configured manifest URL.
    Sync {
        /// Path to the config document.
        #[arg(long)]
        config: PathBuf,
    },
    /// Run the periodic auto-sync loop until interrupted.
    Watch {
        /// Path to the config document.
        #[arg(long)]
        config: PathBuf,
    },
    /// Check whether flight is allowed at a position.
    Check {
        /// Path to the config document.
        #[arg(long)]
        config: PathBuf,
        /// Latitude in degrees.
        #[arg(long)]
        lat: f64,
        /// Longitude in degrees.
        #[arg(long)]
        lon: f64,
        /// Unix second to evaluate at; defaults to now.
        #[arg(long)]
        at: Option<i64>,
    },
}

// ============================================================================
// SECTION: Config Document
// ============================================================================

/// The combined config document: client and/or publisher sections.
#[derive(Debug, Default, Serialize, Deserialize)]
struct GulConfig {
    /// Client settings, for sync/watch/check.
    #[serde(default)]
    client: Option<ClientConfig>,
    /// Publisher settings, for init/authoring/publish.
    #[serde(default)]
    publisher: Option<PublisherConfig>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI-level failures.
#[derive(Debug, Error)]
enum CliError {
    /// Config document problems.
    #[error("config error: {0}")]
    Config(String),
    /// Input file problems.
    #[error("input error: {0}")]
    Input(String),
    /// Client sync failure.
    #[error(transparent)]
    Sync(#[from] gul_client::SyncError),
    /// Publisher failure.
    #[error(transparent)]
    Publish(#[from] gul_publisher::PublishError),
    /// Key generation failure.
    #[error(transparent)]
    Crypto(#[from] gul_core::CryptoError),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches one subcommand.
async fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Keygen => keygen(),
        Command::Init { config } => {
            let config = load_publisher_config(&config)?;
            gul_publisher::initialize(&config)?;
            println!("store initialized at version 0");
            Ok(())
        }
        Command::AddFence { config, file } => add_fence(&config, &file),
        Command::RemoveFence { config, id } => {
            let publisher = open_publisher(&config)?;
            publisher.delete_fence(&id)?;
            println!("removed fence {id}");
            Ok(())
        }
        Command::ListFences { config } => list_fences(&config),
        Command::Publish { config } => publish(&config),
        Command::Sync { config } => sync_once(&config).await,
        Command::Watch { config } => watch(&config).await,
        Command::Check { config, lat, lon, at } => check(&config, lat, lon, at),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Generates and prints a key pair.
fn keygen() -> Result<(), CliError> {
    let pair = KeyPair::generate()?;
    println!("private_key_hex: {}", pair.seed_hex());
    println!("public_key_hex:  {}", pair.public_key().to_hex());
    println!("key_id:          {}", pair.key_id());
    Ok(())
}

/// Signs and stores a fence from a JSON file.
fn add_fence(config: &Path, file: &Path) -> Result<(), CliError> {
    let publisher = open_publisher(config)?;
    let bytes = read_limited(file, MAX_FENCE_BYTES)?;
    let mut fence: FenceItem = serde_json::from_slice(&bytes)
        .map_err(|err| CliError::Input(format!("parse {}: {err}", file.display())))?;
    publisher.sign_and_add(&mut fence)?;
    println!("added fence {} ({})", fence.id, fence.fence_type);
    Ok(())
}

/// Lists fences in the authoring store.
fn list_fences(config: &Path) -> Result<(), CliError> {
    let publisher = open_publisher(config)?;
    let fences = publisher.list_fences()?;
    if fences.is_empty() {
        println!("no fences");
        return Ok(());
    }
    for fence in fences {
        println!(
            "{}  priority={}  type={}  window=[{}, {}]  {}",
            fence.id, fence.priority, fence.fence_type, fence.start_ts, fence.end_ts, fence.name
        );
    }
    Ok(())
}

/// Publishes the authoring fence set.
fn publish(config: &Path) -> Result<(), CliError> {
    let mut publisher = open_publisher(config)?;
    let result = publisher.publish()?;
    println!(
        "published version {} ({} fences, snapshot {} bytes)",
        result.version, result.fences_count, result.snapshot_size
    );
    println!("manifest: {}", result.manifest_path.display());
    println!("serve at: {}", publisher.artifact_url("manifest.json"));
    if let Some(delta) = &result.delta_path {
        println!("delta:    {}", delta.display());
    }
    Ok(())
}

/// Runs one sync pass.
async fn sync_once(config: &Path) -> Result<(), CliError> {
    let mut syncer = open_syncer(config)?;
    let report = syncer.sync().await?;
    if report.up_to_date {
        println!("up to date at version {}", report.version);
    } else {
        println!(
            "synced {} -> {} (+{} -{} ~{} fences, {} bytes, {:?})",
            report.previous_version,
            report.version,
            report.fences_added,
            report.fences_removed,
            report.fences_updated,
            report.bytes_downloaded,
            report.duration
        );
    }
    Ok(())
}

/// Runs auto-sync until interrupted.
async fn watch(config: &Path) -> Result<(), CliError> {
    let syncer = open_syncer(config)?;
    let auto = syncer.start_auto_sync();
    let mut results = auto.results();
    println!("watching for updates; press ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                let outcome = results.borrow().clone();
                match outcome {
                    Some(Ok(report)) if report.up_to_date => {
                        println!("up to date at version {}", report.version);
                    }
                    Some(Ok(report)) => {
                        println!(
                            "synced {} -> {} (+{} -{} ~{})",
                            report.previous_version,
                            report.version,
                            report.fences_added,
                            report.fences_removed,
                            report.fences_updated
                        );
                    }
                    Some(Err(err)) => eprintln!("sync failed: {err}"),
                    None => {}
                }
            }
        }
    }

    auto.stop().await?;
    Ok(())
}

/// Evaluates a point query against the local store.
fn check(config: &Path, lat: f64, lon: f64, at: Option<i64>) -> Result<(), CliError> {
    let syncer = open_syncer(config)?;
    let t = at.unwrap_or_else(unix_now);
    let result = syncer.check(lat, lon, t)?;
    match (result.allowed, result.restriction) {
        (true, None) => println!("allowed"),
        (true, Some(fence)) => println!(
            "allowed with restriction: {} ({}; max_alt={}m max_speed={}m/s)",
            fence.id, fence.fence_type, fence.max_altitude_m, fence.max_speed_mps
        ),
        (false, Some(fence)) => println!("DENIED by {} ({})", fence.id, fence.fence_type),
        (false, None) => println!("DENIED"),
    }
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads the combined config document.
fn load_config(path: &Path) -> Result<GulConfig, CliError> {
    let bytes = read_limited(path, MAX_CONFIG_BYTES)?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CliError::Config(format!("parse {}: {err}", path.display())))
}

/// Loads the publisher section of the config document.
fn load_publisher_config(path: &Path) -> Result<PublisherConfig, CliError> {
    load_config(path)?
        .publisher
        .ok_or_else(|| CliError::Config(format!("{} has no publisher section", path.display())))
}

/// Opens a publisher from the config document.
fn open_publisher(path: &Path) -> Result<Publisher, CliError> {
    Ok(Publisher::open(load_publisher_config(path)?)?)
}

/// Opens a syncer from the config document.
fn open_syncer(path: &Path) -> Result<Syncer, CliError> {
    let config = load_config(path)?
        .client
        .ok_or_else(|| CliError::Config(format!("{} has no client section", path.display())))?;
    Ok(Syncer::open(config)?)
}

/// Reads a file, rejecting anything over the byte limit.
fn read_limited(path: &Path, max_bytes: u64) -> Result<Vec<u8>, CliError> {
    let meta = std::fs::metadata(path)
        .map_err(|err| CliError::Input(format!("stat {}: {err}", path.display())))?;
    if meta.len() > max_bytes {
        return Err(CliError::Input(format!(
            "{} is {} bytes (max {max_bytes})",
            path.display(),
            meta.len()
        )));
    }
    std::fs::read(path).map_err(|err| CliError::Input(format!("read {}: {err}", path.display())))
}

/// Current Unix time in seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
