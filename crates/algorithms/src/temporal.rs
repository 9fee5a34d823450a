//! Date windows for the reference and analysis passes
//!
//! Each pass searches a backward-looking window that ends at its anchor
//! date. The reference anchor sits `lag` weeks before the analysis anchor;
//! the lag is measured between anchors, so wide buffers may overlap.

use chrono::{Datelike, Duration, NaiveDate};
use hexchange_core::{Error, Result};

/// Parameters for [`DateWindows::new`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindowParams {
    /// Weeks between the reference and analysis anchors (default 52)
    pub lag_weeks: i64,
    /// Days searched before each anchor (default 90)
    pub buffer_days: i64,
}

impl Default for DateWindowParams {
    fn default() -> Self {
        Self {
            lag_weeks: 52,
            buffer_days: 90,
        }
    }
}

/// Inclusive date range `[anchor - buffer_days, anchor]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub anchor: NaiveDate,
    pub buffer_days: i64,
}

impl DateWindow {
    pub fn new(anchor: NaiveDate, buffer_days: i64) -> Self {
        Self { anchor, buffer_days }
    }

    pub fn start(&self) -> NaiveDate {
        self.anchor - Duration::days(self.buffer_days)
    }

    /// The `yyyy-mm-dd/yyyy-mm-dd` string sent to the catalog.
    pub fn range(&self) -> String {
        format!(
            "{}/{}",
            self.start().format("%Y-%m-%d"),
            self.anchor.format("%Y-%m-%d")
        )
    }

    /// Column name for this window's zonal means, e.g. `2023_9_mean`.
    pub fn mean_column(&self) -> String {
        format!("{}_{}_mean", self.anchor.year(), self.anchor.month())
    }
}

/// The reference and analysis windows of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindows {
    pub reference: DateWindow,
    pub analysis: DateWindow,
}

impl DateWindows {
    pub fn new(anchor: NaiveDate, params: DateWindowParams) -> Result<Self> {
        if params.buffer_days < 0 {
            return Err(Error::InvalidParameter {
                name: "buffer_days",
                value: params.buffer_days.to_string(),
                reason: "must not be negative".into(),
            });
        }
        if params.lag_weeks <= 0 {
            return Err(Error::InvalidParameter {
                name: "lag_weeks",
                value: params.lag_weeks.to_string(),
                reason: "must be positive".into(),
            });
        }
        let reference_anchor = anchor - Duration::weeks(params.lag_weeks);
        Ok(Self {
            reference: DateWindow::new(reference_anchor, params.buffer_days),
            analysis: DateWindow::new(anchor, params.buffer_days),
        })
    }

    /// Whether the two windows share at least one day.
    pub fn overlap(&self) -> bool {
        self.analysis.start() <= self.reference.anchor
    }
}

/// Parse a `yyyy-mm-dd` anchor date.
pub fn parse_anchor(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| Error::InvalidParameter {
        name: "start",
        value: s.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_anchor(s).unwrap()
    }

    #[test]
    fn test_window_range_exact_days() {
        let w = DateWindow::new(date("2023-09-09"), 90);
        assert_eq!(w.range(), "2023-06-11/2023-09-09");
    }

    #[test]
    fn test_reference_is_lag_weeks_before() {
        let windows = DateWindows::new(date("2023-09-09"), DateWindowParams::default()).unwrap();
        assert_eq!(windows.reference.anchor, date("2022-09-10"));
        assert_eq!(windows.reference.range(), "2022-06-12/2022-09-10");
        assert_eq!(windows.analysis.range(), "2023-06-11/2023-09-09");
        assert!(!windows.overlap());
    }

    #[test]
    fn test_wide_buffer_overlaps() {
        let params = DateWindowParams {
            lag_weeks: 4,
            buffer_days: 60,
        };
        let windows = DateWindows::new(date("2023-03-01"), params).unwrap();
        assert!(windows.overlap());
    }

    #[test]
    fn test_leap_day() {
        let w = DateWindow::new(date("2024-03-01"), 1);
        assert_eq!(w.range(), "2024-02-29/2024-03-01");
    }

    #[test]
    fn test_mean_column_unpadded_month() {
        assert_eq!(DateWindow::new(date("2023-09-09"), 90).mean_column(), "2023_9_mean");
        assert_eq!(DateWindow::new(date("2022-12-31"), 90).mean_column(), "2022_12_mean");
    }

    #[test]
    fn test_malformed_dates() {
        assert!(parse_anchor("2023-13-01").is_err());
        assert!(parse_anchor("09/09/2023").is_err());
        assert!(DateWindows::new(
            date("2023-01-01"),
            DateWindowParams {
                lag_weeks: 52,
                buffer_days: -1
            }
        )
        .is_err());
    }
}
