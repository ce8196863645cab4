//! Checksummed rolling record checkpoints

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha384};
use tracing::{info, warn};

use stakecraft_core::{BeaconConfig, Result, StakecraftError};

use crate::record::{log_loaded, RollingRecord, MIN_COMPATIBLE_VERSION};

/// Name of the checksum index inside the records directory
pub const INDEX_FILENAME: &str = "checksums.sha384";

const RECORD_SUFFIX: &str = ".json.zst";

/// One line of the checksum index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    /// Hex SHA-384 of the compressed file
    pub checksum: String,
    pub filename: String,
    pub slot: u64,
    pub epoch: u64,
}

impl CheckpointEntry {
    /// Parse `<hex>  <filename>`
    pub fn parse(line: &str) -> Result<Self> {
        let elems: Vec<&str> = line.split("  ").collect();
        if elems.len() != 2 {
            return Err(StakecraftError::Serialization(format!(
                "checkpoint line ({}): expected 2 elements, got {}",
                line,
                elems.len()
            )));
        }
        let (slot, epoch) = parse_filename(elems[1]).ok_or_else(|| {
            StakecraftError::Serialization(format!(
                "checkpoint line ({}): filename does not match {{slot}}-{{epoch}}{}",
                line, RECORD_SUFFIX
            ))
        })?;
        Ok(Self {
            checksum: elems[0].to_string(),
            filename: elems[1].to_string(),
            slot,
            epoch,
        })
    }

    pub fn to_line(&self) -> String {
        format!("{}  {}", self.checksum, self.filename)
    }
}

fn parse_filename(filename: &str) -> Option<(u64, u64)> {
    let stem = filename.strip_suffix(RECORD_SUFFIX)?;
    let (slot, epoch) = stem.split_once('-')?;
    if slot.is_empty() || epoch.is_empty() {
        return None;
    }
    if !slot.bytes().all(|b| b.is_ascii_digit()) || !epoch.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((slot.parse().ok()?, epoch.parse().ok()?))
}

/// On-disk store of rolling record checkpoints.
///
/// The index is kept sorted by slot and capped at `retention_limit` entries.
/// Files beyond the cap are deleted oldest first before the index is
/// rewritten.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    retention_limit: usize,
    beacon: BeaconConfig,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, retention_limit: usize, beacon: BeaconConfig) -> Self {
        Self {
            dir: dir.into(),
            retention_limit: retention_limit.max(1),
            beacon,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILENAME)
    }

    /// Write `record` as a checkpoint and register it in the index
    pub fn save(&self, record: &RollingRecord) -> Result<CheckpointEntry> {
        fs::create_dir_all(&self.dir)?;

        let json = record.serialize()?;
        let compressed = zstd::encode_all(json.as_slice(), zstd::DEFAULT_COMPRESSION_LEVEL)?;
        let checksum = hex::encode(Sha384::digest(&compressed));

        let slot = record.last_duties_slot;
        let epoch = self.beacon.epoch_of(slot);
        let filename = format!("{}-{}{}", slot, epoch, RECORD_SUFFIX);
        write_atomic(&self.dir.join(&filename), &compressed)?;

        let entry = CheckpointEntry {
            checksum,
            filename,
            slot,
            epoch,
        };

        let mut entries = self.load_index()?.unwrap_or_default();
        match entries.iter_mut().find(|e| e.filename == entry.filename) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        entries.sort_by_key(|e| e.slot);

        if entries.len() > self.retention_limit {
            let cull_count = entries.len() - self.retention_limit;
            for old in entries.drain(..cull_count) {
                let path = self.dir.join(&old.filename);
                if !path.exists() {
                    info!(
                        "Checkpoint {} was due for removal but does not exist",
                        old.filename
                    );
                    continue;
                }
                fs::remove_file(&path)?;
                info!("Removed checkpoint {} (retention limit)", old.filename);
            }
        }

        let contents = entries
            .iter()
            .map(CheckpointEntry::to_line)
            .collect::<Vec<_>>()
            .join("\n");
        write_atomic(&self.index_path(), contents.as_bytes())?;

        info!(
            "Saved checkpoint {} ({})",
            entry.filename,
            record.describe(self.beacon.slots_per_epoch)
        );
        Ok(entry)
    }

    /// Parse the index. `None` if there is no index yet.
    pub fn load_index(&self) -> Result<Option<Vec<CheckpointEntry>>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(CheckpointEntry::parse)
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Read, verify and decode one checkpoint
    pub fn load(&self, entry: &CheckpointEntry) -> Result<RollingRecord> {
        let expected = hex::decode(&entry.checksum).map_err(|_| {
            StakecraftError::Serialization(format!(
                "checkpoint line ({}): checksum could not be parsed",
                entry.to_line()
            ))
        })?;
        self.load_verified(&entry.filename, &expected)
    }

    fn load_verified(&self, filename: &str, expected: &[u8]) -> Result<RollingRecord> {
        let compressed = fs::read(self.dir.join(filename))?;
        let actual = Sha384::digest(&compressed);
        if actual.as_slice() != expected {
            return Err(StakecraftError::ChecksumMismatch {
                file: filename.to_string(),
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }

        let json = zstd::decode_all(compressed.as_slice())?;
        RollingRecord::deserialize(&json)
    }

    /// Newest usable checkpoint for the interval that does not go past
    /// `target_slot`, or a fresh record starting at `start_slot`.
    pub fn load_best(
        &self,
        start_slot: u64,
        target_slot: u64,
        rewards_interval: u64,
    ) -> Result<RollingRecord> {
        let Some(entries) = self.load_index()? else {
            info!("No checkpoint index found, starting a new record at slot {}", start_slot);
            return Ok(RollingRecord::new(start_slot, rewards_interval));
        };

        for entry in entries.iter().rev() {
            if entry.slot > target_slot {
                info!("Checkpoint {} is past slot {}, trying an older one", entry.filename, target_slot);
                continue;
            }
            if entry.slot < start_slot {
                warn!(
                    "Checkpoint {} predates start slot {}, no older checkpoint is usable",
                    entry.filename, start_slot
                );
                break;
            }

            let expected = hex::decode(&entry.checksum).map_err(|_| {
                StakecraftError::Serialization(format!(
                    "checkpoint line ({}): checksum could not be parsed",
                    entry.to_line()
                ))
            })?;
            let record = match self.load_verified(&entry.filename, &expected) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Failed to load checkpoint {}: {}, trying an older one", entry.filename, e);
                    continue;
                }
            };

            if record.rewards_interval != rewards_interval {
                info!(
                    "Checkpoint {} is for interval {}, not {}",
                    entry.filename, record.rewards_interval, rewards_interval
                );
                continue;
            }
            if record.start_slot != start_slot {
                info!(
                    "Checkpoint {} starts at slot {}, not {}",
                    entry.filename, record.start_slot, start_slot
                );
                continue;
            }
            if !record.is_compatible() {
                info!(
                    "Checkpoint {} was written by version '{}', older than {}; trying an older one",
                    entry.filename, record.version, MIN_COMPATIBLE_VERSION
                );
                continue;
            }

            log_loaded(&record, &entry.filename, self.beacon.slots_per_epoch);
            return Ok(record);
        }

        warn!(
            "No usable checkpoint for interval {}, starting a new record at slot {}",
            rewards_interval, start_slot
        );
        Ok(RollingRecord::new(start_slot, rewards_interval))
    }

    /// Verify every indexed checkpoint, newest last
    pub fn verify_all(&self) -> Result<Vec<(CheckpointEntry, Result<RollingRecord>)>> {
        Ok(self
            .load_index()?
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                let result = self.load(&entry);
                (entry, result)
            })
            .collect())
    }
}

/// Write via a temporary sibling and rename into place
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
