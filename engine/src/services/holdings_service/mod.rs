// engine/src/services/holdings_service/mod.rs
// The HoldingsService struct and the request entry points. Each operation
// lives in its own sibling module.

use std::sync::Arc;
use std::time::Duration;

use shared::models::{AggregateRow, HoldingsReport};

use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::models::{AggregationRequest, RawParams};
use crate::store::RowStore;
use crate::window::Clock;

pub mod aggregate;
pub mod report;

pub use report::{Page, ReportParams, ReportRequest};

/// Stateless front door of the engine. Cheap to clone and safe to share
/// across tasks; all shared resources sit behind the `RowStore`.
#[derive(Clone)]
pub struct HoldingsService {
    store: Arc<dyn RowStore>,
    clock: Arc<dyn Clock>,
    query_timeout: Duration,
    default_page_limit: u32,
}

impl HoldingsService {
    pub fn new(store: Arc<dyn RowStore>, clock: Arc<dyn Clock>, settings: &EngineSettings) -> Self {
        HoldingsService {
            store,
            clock,
            query_timeout: settings.query_timeout(),
            default_page_limit: settings.default_page_limit,
        }
    }

    /// Resolve → plan → execute → shape, in one store round trip.
    pub async fn aggregate(&self, request: &AggregationRequest) -> Result<Vec<AggregateRow>, EngineError> {
        tracing::info!(
            window = ?request.window,
            broker_id = ?request.filters.broker_id,
            symbol = ?request.filters.symbol,
            group_by = ?request.group_by,
            "Received aggregation request, dispatching to handler."
        );
        aggregate::handle_aggregate(request, self.clock.now(), self.store.as_ref(), self.query_timeout).await
    }

    /// Validate raw named parameters and aggregate.
    pub async fn aggregate_params(&self, params: RawParams) -> Result<Vec<AggregateRow>, EngineError> {
        let request = AggregationRequest::from_params(params).map_err(|e| {
            tracing::warn!(error_detail = %e, "Rejected aggregation parameters");
            e
        })?;
        self.aggregate(&request).await
    }

    /// Dashboard view: summary, daily chart and a paginated entity table.
    pub async fn report(&self, request: &ReportRequest) -> Result<HoldingsReport, EngineError> {
        tracing::info!(
            window = ?request.window,
            entity = ?request.entity,
            limit = request.page.limit(),
            offset = request.page.offset(),
            "Received report request, dispatching to handler."
        );
        report::handle_report(request, self.clock.now(), self.store.as_ref(), self.query_timeout).await
    }

    pub async fn report_params(&self, params: ReportParams) -> Result<HoldingsReport, EngineError> {
        let request = ReportRequest::from_params(params, self.default_page_limit)?;
        self.report(&request).await
    }
}
