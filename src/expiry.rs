//! Expiry Risk Adapter
//!
//! Scales or denies new entries as derivative expiry approaches. Exits
//! are never blocked, and any internal inconsistency fails safe to an
//! unscaled pass rather than blocking or amplifying risk.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use tracing::warn;

use crate::config::{parse_hhmm, parse_weekday, ExpiryConfig};
use crate::domain::{ist_offset, ExpiryDecision};

pub struct ExpiryRiskAdapter {
    config: ExpiryConfig,
    session_close: NaiveTime,
    entry_cutoff: Option<NaiveTime>,
    expiry_weekday: Option<Weekday>,
}

impl ExpiryRiskAdapter {
    pub fn new(config: ExpiryConfig, session_close: NaiveTime) -> Self {
        let entry_cutoff = parse_hhmm(&config.entry_cutoff);
        let expiry_weekday = parse_weekday(&config.expiry_weekday);
        Self {
            config,
            session_close,
            entry_cutoff,
            expiry_weekday,
        }
    }

    /// Pure decision for one intent. `is_new_entry = false` (an exit)
    /// always passes.
    pub fn evaluate(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        is_option: bool,
        is_new_entry: bool,
    ) -> ExpiryDecision {
        if !is_new_entry {
            return ExpiryDecision::pass("exit_always_allowed");
        }
        if !self.config.enabled {
            return ExpiryDecision::pass("expiry_risk_disabled");
        }
        let (cutoff, weekday) = match (self.entry_cutoff, self.expiry_weekday) {
            (Some(c), Some(w)) => (c, w),
            _ => {
                // Fail safe; validated config should never reach this
                warn!(symbol, "unparseable expiry config, passing unscaled");
                return ExpiryDecision::pass("expiry_config_unparsed");
            }
        };

        let ist = now.with_timezone(&ist_offset());
        let today = ist.date_naive();
        let clock = ist.time();

        let expiry_date = match monthly_expiry(today, weekday) {
            Some(d) => d,
            None => {
                warn!(symbol, "expiry date underivable, passing unscaled");
                return ExpiryDecision::pass("expiry_date_underivable");
            }
        };

        if today == expiry_date {
            if is_option && clock >= cutoff {
                return ExpiryDecision::deny(format!(
                    "option entry past expiry-day cutoff {}",
                    self.config.entry_cutoff
                ));
            }
            let final_window_start =
                self.session_close - Duration::minutes(self.config.final_window_minutes);
            if clock >= final_window_start {
                return ExpiryDecision::scaled(
                    self.config.final_window_scale,
                    format!(
                        "expiry-day final {} minutes",
                        self.config.final_window_minutes
                    ),
                );
            }
            return ExpiryDecision::scaled(self.config.expiry_day_scale, "expiry day");
        }

        let days_until = (expiry_date - today).num_days();
        if (1..=6).contains(&days_until) {
            return ExpiryDecision::scaled(
                self.config.expiry_week_scale,
                format!("expiry week ({days_until}d to expiry)"),
            );
        }

        ExpiryDecision::pass("outside expiry window")
    }
}

/// The month's contractual expiry: its last occurrence of `weekday`,
/// rolling to next month once passed.
fn monthly_expiry(today: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
    let this_month = last_weekday_of_month(today.year(), today.month(), weekday)?;
    if this_month >= today {
        return Some(this_month);
    }
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    last_weekday_of_month(year, month, weekday)
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let mut day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}
