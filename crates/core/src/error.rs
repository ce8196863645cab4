use thiserror::Error;

#[derive(Error, Debug)]
pub enum StakecraftError {
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Slot {0} has no block")]
    SlotEmpty(u64),

    #[error("State for execution block {0} has been pruned")]
    StatePruned(u64),

    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Record regression: target slot {target} is before last processed slot {last}")]
    RecordRegression { target: u64, last: u64 },

    #[error("Interval mismatch: record is for interval {record}, expected {expected}")]
    IntervalMismatch { record: u64, expected: u64 },

    #[error("Rewards generation failed: {0}")]
    Generation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid beacon chain config: {0}")]
    InvalidBeaconConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StakecraftError {
    /// Errors that may succeed on the next daemon cycle without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Errors caused by the requested chain data not being available
    /// from the configured endpoints.
    pub fn is_data_unavailable(&self) -> bool {
        matches!(
            self,
            Self::SlotEmpty(_) | Self::StatePruned(_) | Self::BlockNotFound(_)
        )
    }

    /// Errors raised when a record would be used or extended inconsistently.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Self::RecordRegression { .. } | Self::IntervalMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for StakecraftError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StakecraftError>;
