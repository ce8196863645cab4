//! StakeCraft CLI
//!
//! Command-line interface for the StakeCraft oracle daemon and its on-disk
//! artifacts.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stakecraft_core::{wei_to_eth, Address, BeaconConfig};
use stakecraft_ipc_client::IpcClient;
use stakecraft_records::CheckpointStore;
use stakecraft_rewards::RewardsFile;
use stakecraft_settings::{default_settings_path, Settings};

/// StakeCraft - staking oracle rewards tooling
#[derive(Parser)]
#[command(name = "stakecraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Socket path for daemon communication (defaults to the settings value)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the daemon's record and report status
    Status,

    /// Start an update cycle now
    Trigger,

    /// Inspect rolling record checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Inspect a rewards tree file
    Tree {
        #[command(subcommand)]
        action: TreeAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List indexed checkpoints
    List,
    /// Load every checkpoint and check its checksum
    Verify,
}

#[derive(Subcommand)]
enum TreeAction {
    /// Check stored Merkle proofs against the stored root
    Verify {
        /// Rewards file (JSON)
        file: PathBuf,

        /// Only check this node
        #[arg(short, long)]
        address: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = Settings::load_from(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    let socket = cli.socket.clone().unwrap_or_else(|| settings.paths.socket());

    match cli.command {
        Commands::Status => status(&socket).await?,
        Commands::Trigger => trigger(&socket).await?,
        Commands::Checkpoints { action } => checkpoints(&settings, action)?,
        Commands::Tree { action } => match action {
            TreeAction::Verify { file, address } => verify_tree(&file, address.as_deref())?,
        },
    }

    Ok(())
}

// ============================================================================
// IPC Commands
// ============================================================================

async fn status(socket: &Path) -> Result<()> {
    let client = IpcClient::new(socket.to_path_buf());
    let result = client.status().await?;

    println!("StakeCraft Status");
    println!("=================");
    println!("Update running: {}", result.running);
    println!("Rewards interval: {}", result.record_interval);
    println!(
        "Record: slot {} to {}",
        result.record_start_slot, result.record_last_slot
    );
    if let Some(epoch) = result.finalized_epoch {
        println!("Finalized epoch: {}", epoch);
    }
    if let Some(error) = result.last_error {
        println!("Last error: {}", error);
    }
    if let Some(report) = result.last_report {
        print!("Last report: {} at slot {}", report.kind, report.slot);
        if let Some(interval) = report.interval {
            print!(" (interval {})", interval);
        }
        println!(": {}", report.outcome);
        if let Some(root) = report.merkle_root {
            println!("Merkle root: {}", root);
        }
    }

    Ok(())
}

async fn trigger(socket: &Path) -> Result<()> {
    let client = IpcClient::new(socket.to_path_buf());
    if client.trigger_update().await?.started {
        println!("Update cycle started");
    } else {
        println!("An update cycle is already running");
    }
    Ok(())
}

// ============================================================================
// Local Artifacts
// ============================================================================

fn checkpoints(settings: &Settings, action: CheckpointAction) -> Result<()> {
    let dir = settings.paths.records();
    let store = CheckpointStore::new(
        &dir,
        settings.records.retention_limit,
        BeaconConfig::mainnet(),
    );

    match action {
        CheckpointAction::List => {
            let Some(entries) = store.load_index()? else {
                println!("No checkpoints in {}", dir.display());
                return Ok(());
            };
            for entry in entries {
                println!("{:>10}  epoch {:>8}  {}", entry.slot, entry.epoch, entry.checksum);
            }
        }
        CheckpointAction::Verify => {
            let results = store.verify_all()?;
            let mut failed = 0;
            for (entry, result) in &results {
                match result {
                    Ok(record) => println!(
                        "ok    {}  interval {}, {} minipools",
                        entry.filename,
                        record.rewards_interval,
                        record.validator_index_map.len()
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("FAIL  {}  {}", entry.filename, e);
                    }
                }
            }
            info!("Verified {} checkpoints", results.len());
            if failed > 0 {
                bail!("{} of {} checkpoints failed verification", failed, results.len());
            }
        }
    }
    Ok(())
}

/// Nodes whose proof did not verify
fn check_proofs(file: &RewardsFile, address: Option<Address>) -> Result<Vec<Address>> {
    let addresses: Vec<Address> = match address {
        Some(address) => vec![address],
        None => file.node_rewards.keys().copied().collect(),
    };

    let mut invalid = Vec::new();
    for address in addresses {
        match file.verify_node(&address)? {
            Some(true) => {}
            Some(false) => invalid.push(address),
            None => bail!("node {} is not in the tree", address),
        }
    }
    Ok(invalid)
}

fn verify_tree(path: &Path, address: Option<&str>) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let file = RewardsFile::from_bytes(&bytes)?;
    let address = address
        .map(|a| a.parse::<Address>())
        .transpose()
        .context("invalid node address")?;

    println!(
        "Interval {} on {} ({} interval(s), slots {} to {})",
        file.index,
        file.network,
        file.intervals_passed,
        file.consensus_start_block,
        file.consensus_end_block
    );
    println!("Merkle root: {}", file.merkle_root);
    let totals = &file.total_rewards;
    println!(
        "Collateral RPL: {:.3}, Oracle DAO RPL: {:.3}, pool staker ETH: {:.3}",
        wei_to_eth(&totals.total_collateral_rpl),
        wei_to_eth(&totals.total_oracle_dao_rpl),
        wei_to_eth(&totals.pool_staker_smoothing_pool_eth)
    );

    let invalid = check_proofs(&file, address)?;
    if !invalid.is_empty() {
        for address in &invalid {
            println!("invalid proof: {}", address);
        }
        bail!("{} proof(s) failed", invalid.len());
    }
    println!(
        "All proofs valid ({} node(s))",
        address.map(|_| 1).unwrap_or(file.node_rewards.len())
    );
    Ok(())
}
