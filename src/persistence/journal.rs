//! Append-only JSONL journal of order, fill and exit events.
//!
//! Single-writer: only the control loop appends. Each record carries a
//! monotonically increasing sequence number; a reopened journal resumes
//! numbering from the last record on disk.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Fill, OrderRequest, TradeRecord};
use crate::error::{Result, WardenError};

pub const JOURNAL_FILE: &str = "journal.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    OrderSubmitted {
        order: OrderRequest,
    },
    OrderFill {
        fill: Fill,
        /// Intent that produced the order; replay re-derives planned risk
        signal_id: Uuid,
        capital: Decimal,
    },
    LevelsSet {
        symbol: String,
        stop: Option<Decimal>,
        target: Option<Decimal>,
    },
    TradeClosed {
        record: TradeRecord,
        exit_price: Decimal,
    },
    SessionHalted {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

pub struct Journal {
    path: PathBuf,
    file: tokio::fs::File,
    next_seq: u64,
}

impl Journal {
    /// Open for appending, resuming the sequence from the existing tail.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(JOURNAL_FILE);
        let last_seq = last_seq_on_disk(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| WardenError::JournalAppend(format!("open {}: {e}", path.display())))?;
        info!(path = %path.display(), resume_seq = last_seq + 1, "journal opened");
        Ok(Self {
            path,
            file,
            next_seq: last_seq + 1,
        })
    }

    /// Append one record and flush it to the OS. Returns the sequence
    /// number assigned.
    pub async fn append(&mut self, event: JournalEvent, now: DateTime<Utc>) -> Result<u64> {
        let record = JournalRecord {
            seq: self.next_seq,
            timestamp: now,
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| WardenError::JournalAppend(format!("{}: {e}", self.path.display())))?;
        self.file
            .flush()
            .await
            .map_err(|e| WardenError::JournalAppend(format!("{}: {e}", self.path.display())))?;
        self.next_seq += 1;
        Ok(record.seq)
    }

    /// Sequence number the next append will receive
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Last sequence number written, 0 when empty
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }
}

/// Iterator over journal records on disk, in write order.
pub struct JournalReader {
    lines: std::io::Lines<std::io::BufReader<std::fs::File>>,
}

impl JournalReader {
    pub fn open(data_dir: &Path) -> Result<Option<Self>> {
        let path = data_dir.join(JOURNAL_FILE);
        match std::fs::File::open(&path) {
            Ok(f) => Ok(Some(Self {
                lines: std::io::BufReader::new(f).lines(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            let line = match line {
                Ok(l) => l,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(WardenError::Json));
        }
        None
    }
}

/// Scan the tail of an existing journal for its last sequence number.
/// A torn final line (crash mid-append) is tolerated and skipped.
fn last_seq_on_disk(path: &Path) -> Result<u64> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut last = 0u64;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalRecord>(&line) {
            Ok(record) => last = record.seq,
            Err(e) => {
                warn!(error = %e, "torn journal line skipped");
            }
        }
    }
    Ok(last)
}
