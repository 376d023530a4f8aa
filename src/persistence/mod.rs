//! Crash-safe persistence: append-only journal, atomic checkpoint, and
//! the replay fold that reconciles the two on startup.

pub mod checkpoint;
pub mod journal;
pub mod replay;

pub use checkpoint::{CheckpointData, CheckpointStore, DailyCounterSnapshot, CHECKPOINT_FILE};
pub use journal::{Journal, JournalEvent, JournalReader, JournalRecord, JOURNAL_FILE};
pub use replay::{replay_records, ReplayState};

use chrono::NaiveTime;
use rust_decimal::Decimal;
use std::path::Path;
use tracing::info;

use crate::error::Result;

/// Recover controller state from disk: adopt the checkpoint when it
/// matches the journal tail, otherwise replay the journal (from the
/// checkpoint's sequence, or from scratch when no checkpoint exists).
pub fn recover(
    data_dir: &Path,
    capital: Decimal,
    risk_per_trade_pct: Decimal,
    session_open: NaiveTime,
    session_close: NaiveTime,
) -> Result<ReplayState> {
    let store = CheckpointStore::new(data_dir);
    let mut state = match store.load() {
        Some(data) => {
            info!(seq = data.seq, trades = data.trades.len(), "checkpoint loaded");
            ReplayState::from_checkpoint(data, risk_per_trade_pct, session_open, session_close)
        }
        None => {
            info!("no checkpoint, starting from empty state");
            ReplayState::new(capital, risk_per_trade_pct, session_open, session_close)
        }
    };

    if let Some(reader) = JournalReader::open(data_dir)? {
        let applied = replay_records(&mut state, reader)?;
        if applied == 0 {
            info!(seq = state.last_seq, "checkpoint fresh, no replay needed");
        }
    }

    Ok(state)
}
