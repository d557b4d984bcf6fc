// Window resolver: pure function of (WindowSpec, now).
use chrono::{DateTime, Duration, NaiveDate, Utc};
use shared::utils::{end_of_day, start_of_day};

use crate::error::EngineError;
use crate::models::WindowSpec;

/// Longest span a window may cover, inclusive.
pub const MAX_SPAN_DAYS: i64 = 365;

/// A validated, inclusive `[start, end]` interval.
///
/// Only constructible through [`DateWindow::new`], so every instance satisfies
/// `start <= end` and a whole-day span of at most [`MAX_SPAN_DAYS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        // Whole days only: an explicit window ending at 23:59:59.999 on day 365
        // still counts as 365 days.
        let days = (end - start).num_days();
        if days > MAX_SPAN_DAYS {
            return Err(EngineError::RangeTooLarge { days, max_days: MAX_SPAN_DAYS });
        }
        Ok(Self { start, end })
    }

    /// Both calendar days fully included.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Self::new(start_of_day(start), end_of_day(end))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

pub fn resolve(spec: &WindowSpec, now: DateTime<Utc>) -> Result<DateWindow, EngineError> {
    let window = match spec {
        WindowSpec::Shortcut(shortcut) => {
            DateWindow::new(now - Duration::days(shortcut.days()), now)?
        }
        WindowSpec::Explicit { start, end } => DateWindow::from_dates(*start, *end)?,
    };
    tracing::debug!(
        start = %window.start,
        end = %window.end,
        "Resolved aggregation window"
    );
    Ok(window)
}
