// Plan execution and result shaping.
use rust_decimal::Decimal;
use shared::models::{AggregateRow, GroupKey};
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::EngineError;
use crate::planner::{AggregationPlan, RowOrder, SumColumn};
use crate::store::{RowStore, StoreError, StoreRow};

/// Run `plan` once against `store`, bounded by `timeout`.
///
/// Never retries. A timeout or connectivity failure surfaces as
/// `StoreUnavailable`; anything the store rejects is `StoreQueryError`.
pub async fn execute(
    store: &dyn RowStore,
    plan: &AggregationPlan,
    timeout: Duration,
) -> Result<Vec<AggregateRow>, EngineError> {
    let started = Instant::now();
    let store_rows = bounded(store, timeout, store.execute_aggregation(plan)).await?;
    tracing::debug!(
        store = store.name(),
        groups = store_rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Row-store returned aggregate groups"
    );
    shape(plan, store_rows)
}

/// Count the distinct groups of `plan` with the same single-call, no-retry rules.
pub async fn count(store: &dyn RowStore, plan: &AggregationPlan, timeout: Duration) -> Result<u64, EngineError> {
    bounded(store, timeout, store.count_groups(plan)).await
}

async fn bounded<T, F>(store: &dyn RowStore, timeout: Duration, call: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!(store = store.name(), error_detail = ?e, "Row-store call failed");
            Err(e.into())
        }
        Err(_) => {
            tracing::error!(
                store = store.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Row-store call timed out; not retrying"
            );
            Err(StoreError::Timeout(timeout).into())
        }
    }
}

/// Convert store rows into ordered `AggregateRow`s, rejecting rows whose shape
/// does not match the plan.
pub fn shape(plan: &AggregationPlan, store_rows: Vec<StoreRow>) -> Result<Vec<AggregateRow>, EngineError> {
    let columns = plan.sum_columns();
    let mut rows = Vec::with_capacity(store_rows.len());

    for store_row in store_rows {
        if store_row.sums.len() != columns.len() {
            return Err(EngineError::StoreQueryError(format!(
                "expected {} sum columns, store returned {}",
                columns.len(),
                store_row.sums.len()
            )));
        }
        check_key(plan, GroupKey::TimeBucket, store_row.bucket.is_some())?;
        check_key(plan, GroupKey::BrokerId, store_row.broker_id.is_some())?;
        check_key(plan, GroupKey::Symbol, store_row.symbol.is_some())?;

        let sum_of = |wanted: SumColumn| -> Decimal {
            columns
                .iter()
                .position(|c| *c == wanted)
                .map(|idx| store_row.sums[idx])
                .unwrap_or(Decimal::ZERO)
        };
        rows.push(AggregateRow {
            sum_quantity: sum_of(SumColumn::Quantity),
            sum_turnover: sum_of(SumColumn::Turnover),
            sum_volume: sum_of(SumColumn::Volume),
            broker_id: store_row.broker_id,
            symbol: store_row.symbol,
            bucket: store_row.bucket,
        });
    }

    // Store ordering is not trusted: bucket, then broker, then symbol,
    // after summed quantity for ranked plans.
    let by_keys = |a: &AggregateRow, b: &AggregateRow| {
        a.bucket
            .cmp(&b.bucket)
            .then_with(|| a.broker_id.cmp(&b.broker_id))
            .then_with(|| a.symbol.cmp(&b.symbol))
    };
    match plan.order() {
        RowOrder::Canonical => rows.sort_by(by_keys),
        RowOrder::QuantityDesc => {
            rows.sort_by(|a, b| b.sum_quantity.cmp(&a.sum_quantity).then_with(|| by_keys(a, b)))
        }
    }
    if let Some(slice) = plan.slice() {
        if rows.len() > slice.limit as usize {
            return Err(EngineError::StoreQueryError(format!(
                "store returned {} rows for a page of {}",
                rows.len(),
                slice.limit
            )));
        }
    }
    Ok(rows)
}

fn check_key(plan: &AggregationPlan, key: GroupKey, present: bool) -> Result<(), EngineError> {
    if plan.groups_by(key) == present {
        return Ok(());
    }
    Err(EngineError::StoreQueryError(format!(
        "store row {} '{}' column that the plan {}",
        if present { "has a" } else { "is missing the" },
        key.as_str(),
        if present { "did not group by" } else { "grouped by" },
    )))
}
