// Handler for a single grouped aggregation.
use chrono::{DateTime, Utc};
use shared::models::AggregateRow;
use std::time::Duration;

use crate::error::EngineError;
use crate::executor;
use crate::models::AggregationRequest;
use crate::planner::AggregationPlan;
use crate::store::RowStore;
use crate::window::resolve;

pub async fn handle_aggregate(
    request: &AggregationRequest,
    now: DateTime<Utc>,
    store: &dyn RowStore,
    timeout: Duration,
) -> Result<Vec<AggregateRow>, EngineError> {
    // Validation happens entirely before the store is touched.
    let window = resolve(&request.window, now).map_err(|e| {
        tracing::warn!(window = ?request.window, error_detail = %e, "Rejected aggregation window");
        e
    })?;
    let plan = AggregationPlan::build(window, &request.filters, &request.group_by);

    let rows = executor::execute(store, &plan, timeout).await?;
    tracing::info!(
        start = %window.start(),
        end = %window.end(),
        rows = rows.len(),
        "Aggregation completed"
    );
    Ok(rows)
}
