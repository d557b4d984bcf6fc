//! Row-store capability.
//!
//! The engine reaches persisted holdings only through [`RowStore`], which
//! takes a fully-formed [`AggregationPlan`] and returns one [`StoreRow`] per
//! distinct group, ordered and paged as the plan asks. Filtering, grouping,
//! summation, ranking and counting all happen on the store's side of this
//! boundary.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::planner::AggregationPlan;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection could not be obtained or the backend is down.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call exceeded {0:?}")]
    Timeout(Duration),

    /// The backend rejected the query (bad plan, schema mismatch).
    #[error("query failed: {0}")]
    Query(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// One aggregated group as returned by a store. Key fields that the plan did
/// not group by are `None`; `sums` follows `plan.sum_columns()` order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRow {
    pub bucket: Option<NaiveDate>,
    pub broker_id: Option<i64>,
    pub symbol: Option<String>,
    pub sums: Vec<Decimal>,
}

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Execute one grouped summation in a single round trip.
    async fn execute_aggregation(&self, plan: &AggregationPlan) -> Result<Vec<StoreRow>, StoreError>;

    /// Number of distinct groups the plan's predicate produces, ignoring its page.
    async fn count_groups(&self, plan: &AggregationPlan) -> Result<u64, StoreError>;
}
