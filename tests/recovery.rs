//! Crash-restart recovery: the journal on disk is the source of truth,
//! and rebuilding state from it is deterministic regardless of whether
//! a checkpoint exists or how fresh it is.

use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use uuid::Uuid;

use warden::domain::{
    ExitReason, Fill, OrderStatus, QualityTag, Side, TimeBucket, TradeRecord,
};
use warden::persistence::{
    recover, CheckpointData, CheckpointStore, Journal, JournalEvent, JournalReader, ReplayState,
    JOURNAL_FILE,
};

fn session() -> (NaiveTime, NaiveTime) {
    (
        NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
        NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
    )
}

fn fill_event(symbol: &str, side: Side, qty: Decimal, price: Decimal) -> JournalEvent {
    JournalEvent::OrderFill {
        fill: Fill {
            order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            filled_qty: qty,
            fill_price: price,
            status: OrderStatus::Filled,
            strategy: "ema_cross".to_string(),
            timestamp: Utc::now(),
        },
        signal_id: Uuid::new_v4(),
        capital: dec!(100000),
    }
}

fn recover_dir(dir: &Path) -> ReplayState {
    let (open, close) = session();
    recover(dir, dec!(100000), dec!(0.01), open, close).unwrap()
}

fn state_fingerprint(state: &ReplayState) -> Vec<(String, Decimal, Decimal, Decimal)> {
    let mut positions: Vec<_> = state
        .lifecycle
        .active_trades()
        .values()
        .map(|t| (t.symbol.clone(), t.qty, t.entry_price, t.realized_pnl))
        .collect();
    positions.sort();
    positions
}

#[tokio::test]
async fn restart_resumes_sequence_and_rebuilds_positions() {
    let dir = tempfile::tempdir().unwrap();

    // First run: open and scale into a position, then "crash"
    {
        let mut journal = Journal::open(dir.path()).await.unwrap();
        journal
            .append(fill_event("NIFTY", Side::Long, dec!(10), dec!(100)), Utc::now())
            .await
            .unwrap();
        journal
            .append(fill_event("NIFTY", Side::Long, dec!(5), dec!(106)), Utc::now())
            .await
            .unwrap();
    }

    // Second run resumes the sequence and keeps appending
    {
        let mut journal = Journal::open(dir.path()).await.unwrap();
        assert_eq!(journal.next_seq(), 3);
        journal
            .append(fill_event("NIFTY", Side::Short, dec!(5), dec!(110)), Utc::now())
            .await
            .unwrap();
    }

    let state = recover_dir(dir.path());
    assert_eq!(state.last_seq, 3);
    let trade = state.lifecycle.trade("NIFTY").unwrap();
    assert_eq!(trade.qty, dec!(10));
    assert_eq!(trade.entry_price, dec!(102));
    // Partial reduce realized (110 - 102) * 5
    assert_eq!(trade.realized_pnl, dec!(40));
}

#[tokio::test]
async fn recovery_is_deterministic_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut journal = Journal::open(dir.path()).await.unwrap();
        journal
            .append(fill_event("NIFTY", Side::Long, dec!(10), dec!(100)), Utc::now())
            .await
            .unwrap();
        journal
            .append(fill_event("BANKNIFTY", Side::Short, dec!(4), dec!(500)), Utc::now())
            .await
            .unwrap();
        // Reversal: closes the long and leaves a 5-lot short
        journal
            .append(fill_event("NIFTY", Side::Short, dec!(15), dec!(110)), Utc::now())
            .await
            .unwrap();
    }

    let first = recover_dir(dir.path());
    let second = recover_dir(dir.path());

    assert_eq!(state_fingerprint(&first), state_fingerprint(&second));
    assert_eq!(first.last_seq, second.last_seq);
    assert_eq!(first.realized_pnl, second.realized_pnl);
    // The reversed-out long realized (110 - 100) * 10 exactly once
    assert_eq!(first.realized_pnl, dec!(100));
    assert_eq!(first.lifecycle.trade("NIFTY").unwrap().qty, dec!(-5));
}

#[tokio::test]
async fn reversal_journal_recovers_without_error() {
    // A reversal writes the reversing fill and then a close record for
    // the old trade, carrying the live run's trade id. Recovery must
    // replay that sequence verbatim and keep the residual position.
    let dir = tempfile::tempdir().unwrap();
    {
        let mut journal = Journal::open(dir.path()).await.unwrap();
        journal
            .append(fill_event("NIFTY", Side::Long, dec!(10), dec!(100)), Utc::now())
            .await
            .unwrap();
        journal
            .append(fill_event("NIFTY", Side::Short, dec!(15), dec!(110)), Utc::now())
            .await
            .unwrap();
        journal
            .append(
                JournalEvent::TradeClosed {
                    record: TradeRecord {
                        trade_id: Uuid::new_v4(),
                        signal_id: Uuid::new_v4(),
                        symbol: "NIFTY".to_string(),
                        strategy: "ema_cross".to_string(),
                        side: Side::Long,
                        entry_time: Utc::now(),
                        entry_price: dec!(100),
                        exit_time: Utc::now(),
                        exit_price: dec!(110),
                        exit_reason: ExitReason::Reverse,
                        exit_detail: Some("reversal fill SHORT 15".to_string()),
                        initial_size: dec!(10),
                        planned_risk: dec!(1000),
                        realized_pnl: dec!(100),
                        r_multiple: dec!(0.1),
                        mfe: dec!(0),
                        mae: dec!(0),
                        adds: 0,
                        reduces: 1,
                        bars_in_trade: 0,
                        quality: QualityTag::B,
                        time_bucket: TimeBucket::Mid,
                    },
                    exit_price: dec!(110),
                },
                Utc::now(),
            )
            .await
            .unwrap();
    }

    let state = recover_dir(dir.path());
    assert_eq!(state.last_seq, 3);
    assert_eq!(state.realized_pnl, dec!(100));
    let trade = state.lifecycle.trade("NIFTY").unwrap();
    assert_eq!(trade.qty, dec!(-5));

    // Deterministic: a second recovery lands on the same state
    let again = recover_dir(dir.path());
    assert_eq!(state_fingerprint(&state), state_fingerprint(&again));
    assert_eq!(again.realized_pnl, dec!(100));
}

#[tokio::test]
async fn torn_tail_from_crash_mid_append_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut journal = Journal::open(dir.path()).await.unwrap();
        journal
            .append(fill_event("NIFTY", Side::Long, dec!(10), dec!(100)), Utc::now())
            .await
            .unwrap();
    }
    // Crash mid-append leaves a partial final line
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join(JOURNAL_FILE))
        .unwrap();
    f.write_all(b"{\"seq\":2,\"timestamp\":\"2026-0").unwrap();
    drop(f);

    let state = recover_dir(dir.path());
    assert_eq!(state.last_seq, 1);
    assert_eq!(state.lifecycle.trade("NIFTY").unwrap().qty, dec!(10));

    // The reopened journal writes over the torn record's number
    let journal = Journal::open(dir.path()).await.unwrap();
    assert_eq!(journal.next_seq(), 2);
}

#[tokio::test]
async fn checkpoint_plus_tail_matches_pure_replay() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut journal = Journal::open(dir.path()).await.unwrap();
        journal
            .append(fill_event("NIFTY", Side::Long, dec!(10), dec!(100)), Utc::now())
            .await
            .unwrap();
        journal
            .append(fill_event("NIFTY", Side::Long, dec!(10), dec!(110)), Utc::now())
            .await
            .unwrap();
        journal
            .append(fill_event("NIFTY", Side::Short, dec!(8), dec!(112)), Utc::now())
            .await
            .unwrap();
    }

    // Same journal, no checkpoint
    let pure_dir = tempfile::tempdir().unwrap();
    std::fs::copy(
        dir.path().join(JOURNAL_FILE),
        pure_dir.path().join(JOURNAL_FILE),
    )
    .unwrap();
    let pure = recover_dir(pure_dir.path());

    // Checkpoint reflecting only the first record; recovery must replay
    // the tail and land on the same state
    let (open, close) = session();
    let mut partial = ReplayState::new(dec!(100000), dec!(0.01), open, close);
    let reader = JournalReader::open(dir.path()).unwrap().unwrap();
    let first = reader.take(1).next().unwrap().unwrap();
    partial.apply(&first).unwrap();
    let store = CheckpointStore::new(dir.path());
    store
        .save(&CheckpointData {
            seq: 1,
            created_at: Utc::now(),
            capital: partial.capital,
            realized_pnl: partial.realized_pnl,
            trades: partial.lifecycle.active_trades().values().cloned().collect(),
            trailing: partial.trailing.clone(),
            day_date: partial.day_date,
            day_realized: partial.day_realized,
            halt_reason: None,
            counters: Default::default(),
        })
        .await
        .unwrap();
    let mixed = recover_dir(dir.path());

    assert_eq!(state_fingerprint(&pure), state_fingerprint(&mixed));
    assert_eq!(pure.last_seq, mixed.last_seq);
    assert_eq!(pure.realized_pnl, mixed.realized_pnl);
}

#[tokio::test]
async fn halt_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut journal = Journal::open(dir.path()).await.unwrap();
        journal
            .append(
                JournalEvent::SessionHalted {
                    reason: "daily loss limit".to_string(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
    }

    let state = recover_dir(dir.path());
    assert_eq!(state.halt_reason.as_deref(), Some("daily loss limit"));
}
