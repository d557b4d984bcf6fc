//! Window resolution: turns a shortcut token or explicit date pair into a
//! validated `[start, end]` interval.
//!
//! ```text
//! WindowSpec + now (Clock) → resolve() → DateWindow (start <= end, span <= 365d)
//! ```

pub mod clock;
pub mod resolver;

pub use clock::{Clock, FixedClock, SystemClock};
pub use resolver::{resolve, DateWindow, MAX_SPAN_DAYS};
