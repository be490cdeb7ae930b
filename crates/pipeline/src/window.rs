//! Time windows expressed as day offsets, and their absolute counterparts.
//!
//! Callers ask for "from N days ago to M days ago". The scheduler converts
//! every chunk to absolute instants against one anchor captured at the start
//! of a fetch, so consecutive chunks share their boundaries exactly.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Remaining spans below this many days are treated as covered.
pub(crate) const EPSILON_DAYS: f64 = 1e-9;

/// A window in days-ago units; `newest_days < oldest_days`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub newest_days: f64,
    pub oldest_days: f64,
}

impl TimeWindow {
    /// The last `days` days up to now.
    pub fn last_days(days: f64) -> Self {
        Self { newest_days: 0.0, oldest_days: days }
    }

    pub fn between(newest_days: f64, oldest_days: f64) -> Self {
        Self { newest_days, oldest_days }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let ok = self.newest_days.is_finite()
            && self.oldest_days.is_finite()
            && self.newest_days >= 0.0
            && self.oldest_days > self.newest_days;
        if ok {
            Ok(())
        } else {
            Err(PipelineError::InvalidWindow {
                newest_days: self.newest_days,
                oldest_days: self.oldest_days,
            })
        }
    }
}

/// Absolute half-open range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn span_days(&self) -> f64 {
        (self.to - self.from).num_milliseconds() as f64 / MILLIS_PER_DAY
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {})", self.from.to_rfc3339(), self.to.to_rfc3339())
    }
}

/// One chunk of a window, as offsets and as instants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkRange {
    pub newer_days: f64,
    pub older_days: f64,
    pub range: TimeRange,
}

impl ChunkRange {
    pub fn days(&self) -> f64 {
        self.older_days - self.newer_days
    }
}

/// A [`TimeWindow`] pinned to an anchor instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchoredWindow {
    anchor: DateTime<Utc>,
    window: TimeWindow,
}

impl AnchoredWindow {
    pub fn new(anchor: DateTime<Utc>, window: TimeWindow) -> Self {
        Self { anchor, window }
    }

    /// Re-express an absolute range as a window ending at its `to` instant.
    pub fn over(range: TimeRange) -> Self {
        Self {
            anchor: range.to,
            window: TimeWindow::last_days(range.span_days()),
        }
    }

    pub fn newest_days(&self) -> f64 {
        self.window.newest_days
    }

    pub fn oldest_days(&self) -> f64 {
        self.window.oldest_days
    }

    pub fn instant_at(&self, days_ago: f64) -> DateTime<Utc> {
        self.anchor - Duration::milliseconds((days_ago * MILLIS_PER_DAY).round() as i64)
    }

    pub fn chunk(&self, newer_days: f64, older_days: f64) -> ChunkRange {
        ChunkRange {
            newer_days,
            older_days,
            range: TimeRange {
                from: self.instant_at(older_days),
                to: self.instant_at(newer_days),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_validation() {
        assert!(TimeWindow::last_days(7.0).validate().is_ok());
        assert!(TimeWindow::between(2.0, 2.0).validate().is_err());
        assert!(TimeWindow::between(-1.0, 3.0).validate().is_err());
        assert!(TimeWindow::between(0.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn chunks_convert_against_the_anchor() {
        let anchor = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let window = AnchoredWindow::new(anchor, TimeWindow::last_days(7.0));

        let chunk = window.chunk(0.0, 0.5);
        assert_eq!(chunk.range.to, anchor);
        assert_eq!(chunk.range.from, Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap());
        assert_eq!(chunk.days(), 0.5);
    }

    #[test]
    fn range_round_trips_through_anchored_window() {
        let range = TimeRange {
            from: Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2026, 10, 3, 6, 0, 0).unwrap(),
        };
        let window = AnchoredWindow::over(range);
        assert_eq!(window.oldest_days(), 2.25);

        let whole = window.chunk(window.newest_days(), window.oldest_days());
        assert_eq!(whole.range, range);
    }
}
