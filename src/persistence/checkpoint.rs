//! Atomic checkpoint of the controller's authoritative state.
//!
//! The snapshot is written to a temp file then renamed over the previous
//! checkpoint, so a crash mid-write can never corrupt the last good copy.
//! A checkpoint is "fresh" when its sequence matches the journal tail;
//! anything older forces a replay on recovery.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::domain::ActiveTrade;
use crate::error::{Result, WardenError};
use crate::stops::TrailingState;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
const CHECKPOINT_TMP: &str = "checkpoint.json.tmp";

/// Daily trade-count counters carried across a restart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyCounterSnapshot {
    pub per_symbol: HashMap<String, u32>,
    pub per_strategy: HashMap<String, u32>,
    pub global: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Last journal sequence reflected in this snapshot
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub capital: Decimal,
    pub realized_pnl: Decimal,
    pub trades: Vec<ActiveTrade>,
    pub trailing: HashMap<String, TrailingState>,
    pub day_date: Option<NaiveDate>,
    pub day_realized: Decimal,
    pub halt_reason: Option<String>,
    #[serde(default)]
    pub counters: DailyCounterSnapshot,
}

pub struct CheckpointStore {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl CheckpointStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CHECKPOINT_FILE),
            tmp_path: data_dir.join(CHECKPOINT_TMP),
        }
    }

    /// Write-to-temp then rename. Any failure leaves the previous
    /// checkpoint untouched.
    pub async fn save(&self, data: &CheckpointData) -> Result<()> {
        let json = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&self.tmp_path, &json).await.map_err(|e| {
            WardenError::CheckpointWrite(format!("{}: {e}", self.tmp_path.display()))
        })?;
        tokio::fs::rename(&self.tmp_path, &self.path)
            .await
            .map_err(|e| WardenError::CheckpointWrite(format!("{}: {e}", self.path.display())))?;
        info!(seq = data.seq, trades = data.trades.len(), "checkpoint written");
        Ok(())
    }

    /// Load the latest checkpoint; None when absent or unparseable.
    /// An unreadable checkpoint falls back to journal replay rather than
    /// failing recovery.
    pub fn load(&self) -> Option<CheckpointData> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "checkpoint unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "checkpoint unparseable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(seq: u64) -> CheckpointData {
        CheckpointData {
            seq,
            created_at: Utc::now(),
            capital: dec!(100000),
            realized_pnl: dec!(250),
            trades: Vec::new(),
            trailing: HashMap::new(),
            day_date: None,
            day_realized: dec!(250),
            halt_reason: None,
            counters: DailyCounterSnapshot::default(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&snapshot(7)).await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.seq, 7);
        assert_eq!(loaded.realized_pnl, dec!(250));
        // Temp file never survives a successful save
        assert!(!dir.path().join(CHECKPOINT_TMP).exists());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&snapshot(1)).await.unwrap();
        store.save(&snapshot(2)).await.unwrap();
        assert_eq!(store.load().unwrap().seq, 2);
    }

    #[test]
    fn test_missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CHECKPOINT_FILE), b"{ not json").unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load().is_none());
    }
}
