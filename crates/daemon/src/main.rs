//! StakeCraft Daemon Binary
//!
//! Keeps the rolling record current, runs the oracle reports on a timer and
//! serves status over the IPC socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stakecraft_beacon::{BeaconClient, HttpBeaconClient, HttpBeaconConfig, MockBeaconClient};
use stakecraft_core::{BeaconConfig, NetworkDetails, ProtocolState, U256};
use stakecraft_daemon::{DaemonError, DaemonService, IpcConfig, IpcServer};
use stakecraft_settings::{default_settings_path, BeaconMode, Settings};
use stakecraft_settlement::{MockProtocol, ProtocolReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Seconds between initialization attempts
const INIT_RETRY_SECS: u64 = 15;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stakecraft=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn settings_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path)
}

fn beacon_client(settings: &Settings) -> Result<Arc<dyn BeaconClient>, DaemonError> {
    Ok(match settings.beacon.mode {
        BeaconMode::Http => Arc::new(HttpBeaconClient::new(HttpBeaconConfig {
            url: settings.beacon.url.clone(),
            timeout: Duration::from_secs(settings.beacon.request_timeout_secs),
        })?),
        BeaconMode::Mock => {
            tracing::warn!("Using the in-memory beacon chain");
            let beacon = MockBeaconClient::new(BeaconConfig::mainnet());
            beacon.insert_block(0, 0);
            Arc::new(beacon)
        }
    })
}

/// Empty protocol at genesis, with 28-day intervals
fn genesis_protocol() -> MockProtocol {
    let config = BeaconConfig::mainnet();
    let protocol = MockProtocol::default();
    protocol.set_state(
        0,
        ProtocolState {
            network: NetworkDetails {
                reward_index: 0,
                interval_start: config.genesis_time,
                interval_duration: 28 * 24 * 60 * 60,
                pending_rpl_rewards: U256::ZERO,
                node_operator_rewards_percent: U256::ZERO,
                trusted_node_operator_rewards_percent: U256::ZERO,
                protocol_dao_rewards_percent: U256::ZERO,
                smoothing_pool_balance: U256::ZERO,
                rpl_price: U256::ZERO,
                min_collateral_fraction: U256::ZERO,
                max_collateral_fraction: U256::ZERO,
                balances_block: 0,
                latest_reportable_balances_block: 0,
                deposit_pool_balance: U256::ZERO,
                reth_contract_balance: U256::ZERO,
                reth_supply: U256::ZERO,
            },
            nodes: vec![],
            minipools: vec![],
            oracle_dao_members: vec![],
        },
    );
    protocol.set_block_time(0, config.genesis_time);
    protocol
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    init_logging();

    tracing::info!("Starting StakeCraft daemon...");

    let settings = Settings::load_from(&settings_path())?;
    let beacon = beacon_client(&settings)?;

    // Execution-layer bindings are provided by the embedding deployment;
    // the standalone binary runs against the in-memory contracts.
    let protocol = Arc::new(genesis_protocol());

    let daemon = loop {
        let archive: Arc<dyn ProtocolReader> = protocol.clone();
        match DaemonService::from_settings(
            &settings,
            beacon.clone(),
            protocol.clone(),
            protocol.clone(),
            |url: &str| -> Result<Arc<dyn ProtocolReader>, DaemonError> {
                tracing::warn!("Using the in-memory contracts for archive {}", url);
                Ok(archive)
            },
        )
        .await
        {
            Ok(daemon) => break daemon,
            Err(e @ DaemonError::InvalidConfig(_)) | Err(e @ DaemonError::Settings(_)) => {
                return Err(e)
            }
            Err(e) => {
                tracing::error!(
                    "Initialization failed: {}; retrying in {}s",
                    e,
                    INIT_RETRY_SECS
                );
                tokio::time::sleep(Duration::from_secs(INIT_RETRY_SECS)).await;
            }
        }
    };

    let config = IpcConfig {
        socket_path: settings.paths.socket(),
    };
    tracing::info!("Daemon starting, will listen on {:?}", config.socket_path);
    let mut ipc = IpcServer::new(config);

    let every = Duration::from_secs(settings.daemon.update_interval_secs);
    let updater = daemon.clone();

    // Run until interrupted
    tokio::select! {
        result = ipc.start(daemon) => {
            if let Err(e) = result {
                tracing::error!("IPC server error: {}", e);
                return Err(e);
            }
        }
        _ = updater.run(every) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            ipc.stop().await;
        }
    }

    tracing::info!("Daemon stopped");
    Ok(())
}
