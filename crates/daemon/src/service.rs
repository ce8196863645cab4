//! Daemon service: update cycles and the IPC surface

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use stakecraft_beacon::BeaconClient;
use stakecraft_core::Address;
use stakecraft_merkle::Cidv0Addresser;
use stakecraft_records::CheckpointStore;
use stakecraft_rewards::ArtifactStore;
use stakecraft_settings::Settings;
use stakecraft_settlement::{OracleWriter, ProtocolReader};
use stakecraft_state::SnapshotProvider;

use crate::ipc::IpcHandler;
use crate::manager::{interval_start_slot, ManagerConfig, RollingRecordManager};
use crate::reports::{find_true_slot, CompletedReport, ReportConfig, Reporter, RewardsDue};
use crate::{DaemonError, Result};

/// Snapshot of the daemon's state for `status` requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// An update cycle is in progress
    pub running: bool,
    pub record_start_slot: u64,
    pub record_last_slot: u64,
    pub record_interval: u64,
    pub finalized_epoch: Option<u64>,
    pub last_error: Option<String>,
    pub last_report: Option<CompletedReport>,
}

#[derive(Debug, Default)]
struct CycleStatus {
    finalized_epoch: Option<u64>,
    last_error: Option<String>,
    last_report: Option<CompletedReport>,
}

enum PendingReport {
    Rewards(RewardsDue),
    Balances,
}

struct Inner {
    provider: SnapshotProvider,
    manager: RollingRecordManager,
    reporter: Reporter,
    running: AtomicBool,
    status: Mutex<CycleStatus>,
}

/// Clears the running flag when the cycle ends, even on panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Archive connector for deployments without an execution client binding
pub fn no_archive(url: &str) -> Result<Arc<dyn ProtocolReader>> {
    Err(DaemonError::InvalidConfig(format!(
        "no archive execution client available for {}",
        url
    )))
}

/// The oracle daemon. Cloning shares the same service.
#[derive(Clone)]
pub struct DaemonService {
    inner: Arc<Inner>,
}

impl DaemonService {
    pub fn new(provider: SnapshotProvider, manager: RollingRecordManager, reporter: Reporter) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                manager,
                reporter,
                running: AtomicBool::new(false),
                status: Mutex::new(CycleStatus::default()),
            }),
        }
    }

    /// Wire up the service from settings and load the starting record.
    ///
    /// The record starts at `records.start_slot` if set, otherwise at the
    /// first slot of the current interval. With `execution.archive_url` set,
    /// `connect_archive` opens the reader that pruned state reads fall back to.
    pub async fn from_settings<F>(
        settings: &Settings,
        beacon: Arc<dyn BeaconClient>,
        protocol: Arc<dyn ProtocolReader>,
        writer: Arc<dyn OracleWriter>,
        connect_archive: F,
    ) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<Arc<dyn ProtocolReader>>,
    {
        settings.validate()?;
        let node_address: Address = settings.oracle.node_address.parse().map_err(|_| {
            DaemonError::InvalidConfig(format!(
                "invalid node address '{}'",
                settings.oracle.node_address
            ))
        })?;

        let config = beacon.eth2_config().await?;
        config.validate()?;
        let mut provider = SnapshotProvider::new(beacon.clone(), protocol.clone(), config);
        if let Some(url) = settings.execution.archive_url.as_deref() {
            info!("Falling back to archive execution client {} for pruned state", url);
            provider = provider.with_archive(connect_archive(url)?);
        }

        let head = beacon.head().await?;
        let head_block = find_true_slot(beacon.as_ref(), head.slot).await?;
        let head_state = provider.get_state_for_slot(head_block.slot).await?;
        let index = head_state.network.reward_index;

        let start_slot = match settings.records.start_slot {
            Some(slot) => slot,
            None if index == 0 => config.slot_at_or_after(head_state.network.interval_start),
            None => {
                let event = protocol
                    .rewards_event(index - 1)
                    .await?
                    .ok_or(DaemonError::MissingEvent(index - 1))?;
                interval_start_slot(beacon.as_ref(), &event, &config).await?
            }
        };
        info!(
            "Interval {} starts at slot {} (epoch {})",
            index,
            start_slot,
            config.epoch_of(start_slot)
        );

        let store = CheckpointStore::new(
            settings.paths.records(),
            settings.records.retention_limit,
            config,
        );
        let manager = RollingRecordManager::load(
            provider.clone(),
            store,
            ManagerConfig {
                checkpoint_interval_epochs: settings.records.checkpoint_interval_epochs,
                thread_limit: settings.records.thread_limit,
            },
            start_slot,
            config.last_slot_of_epoch(head.finalized_epoch),
            index,
        )?;

        let reporter = Reporter::new(
            provider.clone(),
            writer,
            ArtifactStore::new(settings.paths.rewards(), settings.oracle.network.as_str()),
            Arc::new(Cidv0Addresser),
            ReportConfig {
                node_address,
                committee_member: settings.oracle.committee_member,
                network_name: settings.oracle.network.clone(),
            },
        );

        Ok(Self::new(provider, manager, reporter))
    }

    pub fn manager(&self) -> &RollingRecordManager {
        &self.inner.manager
    }

    pub fn reporter(&self) -> &Reporter {
        &self.inner.reporter
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> DaemonStatus {
        let summary = self.inner.manager.summary();
        let status = self.inner.status.lock();
        DaemonStatus {
            running: self.is_running(),
            record_start_slot: summary.start_slot,
            record_last_slot: summary.last_duties_slot,
            record_interval: summary.rewards_interval,
            finalized_epoch: status.finalized_epoch,
            last_error: status.last_error.clone(),
            last_report: status.last_report.clone(),
        }
    }

    /// Start an update cycle on a background task.
    ///
    /// Returns `None` without doing anything if a cycle is already running.
    pub fn trigger_update(&self) -> Option<JoinHandle<()>> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Update cycle already running, ignoring trigger");
            return None;
        }

        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            let _guard = RunningGuard(&inner.running);
            let result = inner.cycle().await;
            let mut status = inner.status.lock();
            match result {
                Ok(()) => status.last_error = None,
                Err(e) => {
                    error!("Update cycle failed: {}", e);
                    status.last_error = Some(e.to_string());
                }
            }
        }))
    }

    /// Trigger a cycle every `every` until the task is dropped
    pub async fn run(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Some(handle) = self.trigger_update() {
                if let Err(e) = handle.await {
                    error!("Update task aborted: {}", e);
                }
            }
        }
    }
}

impl Inner {
    async fn cycle(&self) -> Result<()> {
        let beacon = self.provider.beacon().clone();
        let config = self.provider.beacon_config();

        let head = beacon.head().await?;
        self.status.lock().finalized_epoch = Some(head.finalized_epoch);
        let head_block = find_true_slot(beacon.as_ref(), head.slot).await?;
        let head_state = self.provider.get_state_for_slot(head_block.slot).await?;
        debug!(
            "Head slot {} (finalized epoch {}), interval {}",
            head_block.slot, head.finalized_epoch, head_state.network.reward_index
        );

        self.manager.roll_over(&head_state).await?;

        // Attestations for the target epoch land in the next one
        let finalized = |slot: u64| head.finalized_epoch > config.epoch_of(slot);

        let mut rewards = None;
        if let Some(due) = self.reporter.check_rewards(&head_state).await? {
            if due.already_submitted {
                info!("Rewards for interval {} already submitted", due.interval.index);
            } else if !finalized(due.target_slot) {
                info!(
                    "Interval {} target slot {} (epoch {}) is not finalized yet (finalized epoch {})",
                    due.interval.index,
                    due.target_slot,
                    config.epoch_of(due.target_slot),
                    head.finalized_epoch
                );
            } else {
                rewards = Some(due);
            }
        }

        let mut balances = None;
        if let Some(due) = self.reporter.check_balances(&head_state).await? {
            if due.already_submitted {
                info!("Balances for block {} already submitted", due.block);
            } else if !finalized(due.target_slot) {
                info!(
                    "Balances target slot {} (epoch {}) is not finalized yet",
                    due.target_slot,
                    config.epoch_of(due.target_slot)
                );
            } else {
                balances = Some(due);
            }
        }

        if rewards.is_none() && balances.is_none() {
            return self.update_to_finalized(beacon.as_ref(), head.finalized_epoch).await;
        }

        let mut pending = Vec::with_capacity(2);
        let mut rewards_slot = None;
        if let Some(due) = rewards {
            let slot = find_true_slot(beacon.as_ref(), due.target_slot).await?.slot;
            rewards_slot = Some(slot);
            pending.push((slot, PendingReport::Rewards(due)));
        }
        if let Some(due) = balances {
            let mut slot = find_true_slot(beacon.as_ref(), due.target_slot).await?.slot;
            if let Some(rewards_slot) = rewards_slot.filter(|r| *r < slot) {
                info!(
                    "Reporting balances at the rewards slot {} instead of {}",
                    rewards_slot, slot
                );
                slot = rewards_slot;
            }
            pending.push((slot, PendingReport::Balances));
        }
        pending.sort_by_key(|(slot, _)| *slot);

        for (slot, report) in pending {
            let snapshot = self.provider.get_state_for_slot(slot).await?;
            let record = self.manager.prepare_for_report(&snapshot).await?;
            let completed = match report {
                PendingReport::Rewards(due) => {
                    self.reporter
                        .report_rewards(&snapshot, &record, &due)
                        .await?
                }
                PendingReport::Balances => self.reporter.report_balances(&snapshot, &record).await?,
            };
            info!(
                "{:?} report at slot {}: {:?}",
                completed.kind, completed.slot, completed.outcome
            );
            self.status.lock().last_report = Some(completed);
        }
        Ok(())
    }

    /// Extend the record to the last finalized slot
    async fn update_to_finalized(&self, beacon: &dyn BeaconClient, finalized_epoch: u64) -> Result<()> {
        let config = self.provider.beacon_config();
        let target = config.last_slot_of_epoch(finalized_epoch);
        let block = find_true_slot(beacon, target).await?;

        let summary = self.manager.summary();
        if block.slot <= summary.last_duties_slot || block.slot < summary.start_slot {
            debug!(
                "Record at slot {} is current (finalized slot {})",
                summary.last_duties_slot, block.slot
            );
            return Ok(());
        }

        let snapshot = self.provider.get_state_for_slot(block.slot).await?;
        if snapshot.network.reward_index != summary.rewards_interval {
            warn!(
                "Finalized slot {} is in interval {}, record is for interval {}; waiting",
                block.slot, snapshot.network.reward_index, summary.rewards_interval
            );
            return Ok(());
        }
        self.manager.update_to_slot(&snapshot, block.slot).await
    }
}

impl IpcHandler for DaemonService {
    fn handle(
        &self,
        method: &str,
        _params: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, String>> + Send + '_>>
    {
        let method = method.to_string();
        Box::pin(async move {
            match method.as_str() {
                "status" => serde_json::to_value(self.status()).map_err(|e| e.to_string()),
                "trigger_update" => Ok(serde_json::json!({
                    "started": self.trigger_update().is_some(),
                })),
                _ => Err(format!("Method not found: {}", method)),
            }
        })
    }
}
