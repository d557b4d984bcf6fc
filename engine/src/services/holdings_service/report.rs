// Handler for the dashboard report: summary, daily chart, paginated entity table.
//
// Three pushdown calls over the same window, issued concurrently: the daily
// chart, one ranked page of entities, and the entity count. Ranking and
// pagination happen inside the store, over aggregated rows only.
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::models::{
    AggregateRow, ChartPoint, GroupKey, HoldingsReport, Pagination, ReportEntity, Summary, TableRow,
};
use std::time::Duration;

use crate::config::settings::MAX_PAGE_LIMIT;
use crate::error::EngineError;
use crate::executor;
use crate::models::{Filters, GroupBy, WindowSpec};
use crate::planner::AggregationPlan;
use crate::store::RowStore;
use crate::window::resolve;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    limit: u32,
    offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Result<Self, EngineError> {
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(EngineError::InvalidRequest(format!(
                "limit must be within 1..={}, got {}",
                MAX_PAGE_LIMIT, limit
            )));
        }
        Ok(Page { limit, offset })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

/// Named report parameters as a transport layer would pass them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportParams {
    pub broker_id: Option<i64>,
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub group_by: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub window: WindowSpec,
    pub filters: Filters,
    pub entity: ReportEntity,
    pub page: Page,
}

impl ReportRequest {
    pub fn from_params(params: ReportParams, default_limit: u32) -> Result<Self, EngineError> {
        let window = WindowSpec::from_params(params.timeframe.as_deref(), params.start_date, params.end_date)?;
        let entity = match params.group_by.as_deref().map(str::trim) {
            None | Some("") | Some("broker_id") => ReportEntity::BrokerId,
            Some("symbol") => ReportEntity::Symbol,
            Some(other) => {
                return Err(EngineError::InvalidGroupBy(format!(
                    "report tables group by 'broker_id' or 'symbol', got '{}'",
                    other
                )))
            }
        };
        let page = Page::new(params.limit.unwrap_or(default_limit), params.offset.unwrap_or(0))?;
        let symbol = params.symbol.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Ok(Self {
            window,
            filters: Filters { broker_id: params.broker_id, symbol, positive_quantity_only: true },
            entity,
            page,
        })
    }
}

pub async fn handle_report(
    request: &ReportRequest,
    now: DateTime<Utc>,
    store: &dyn RowStore,
    timeout: Duration,
) -> Result<HoldingsReport, EngineError> {
    let window = resolve(&request.window, now)?;
    let chart_plan = AggregationPlan::build(window, &request.filters, &GroupBy::new([GroupKey::TimeBucket])?);
    let entity_plan = AggregationPlan::build(window, &request.filters, &GroupBy::new([request.entity.group_key()])?);
    let table_plan = entity_plan.clone().ranked_by_quantity(request.page.limit(), request.page.offset());

    let (chart_rows, table_rows, total) = tokio::try_join!(
        executor::execute(store, &chart_plan, timeout),
        executor::execute(store, &table_plan, timeout),
        executor::count(store, &entity_plan, timeout),
    )?;

    let report = build_report(chart_rows, table_rows, total, request.page);
    tracing::info!(
        chart_points = report.chart_data.len(),
        entities = report.pagination.total,
        returned = report.table_data.len(),
        "Report assembled"
    );
    Ok(report)
}

/// `chart_rows` cover every matching row, so they also give the window totals.
fn build_report(chart_rows: Vec<AggregateRow>, table_rows: Vec<AggregateRow>, total: u64, page: Page) -> HoldingsReport {
    let summary = Summary {
        total_volume: chart_rows.iter().map(|r| r.sum_volume).sum::<Decimal>(),
        total_turnover: chart_rows.iter().map(|r| r.sum_turnover).sum::<Decimal>(),
        active_entities: total,
    };

    let chart_data = chart_rows
        .into_iter()
        .filter_map(|r| {
            r.bucket.map(|date| ChartPoint { date, volume: r.sum_volume, turnover: r.sum_turnover })
        })
        .collect();

    // Ranked by summed quantity (entity key on ties) and paged by the store.
    let table_data = table_rows
        .into_iter()
        .map(|r| TableRow {
            broker_id: r.broker_id,
            symbol: r.symbol,
            quantity: r.sum_quantity,
            turnover: r.sum_turnover,
            volume: r.sum_volume,
        })
        .collect();

    HoldingsReport {
        summary,
        chart_data,
        table_data,
        pagination: Pagination { limit: page.limit(), offset: page.offset(), total },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::planner::RowSlice;
    use crate::store::{MemoryStore, StoreError, StoreRow};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use rust_decimal_macros::dec;
    use shared::models::HoldingRecord;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()
    }

    fn record(broker_id: i64, symbol: &str, quantity: Decimal, day: u32) -> HoldingRecord {
        HoldingRecord {
            broker_id,
            symbol: symbol.to_string(),
            quantity,
            turnover: quantity * dec!(10),
            volume: quantity,
            trade_date: Utc.with_ymd_and_hms(2024, 6, day, 10, 0, 0).unwrap(),
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(vec![
            record(1, "PETR4", dec!(5), 10),
            record(2, "PETR4", dec!(20), 10),
            record(3, "VALE3", dec!(5), 11),
            record(1, "VALE3", dec!(1), 12),
            record(4, "ITUB4", dec!(0), 12),
        ])
    }

    fn request(entity: Option<&str>, limit: Option<u32>, offset: Option<u32>) -> ReportRequest {
        let params = ReportParams {
            timeframe: Some("1W".to_string()),
            group_by: entity.map(str::to_string),
            limit,
            offset,
            ..Default::default()
        };
        ReportRequest::from_params(params, 50).unwrap()
    }

    #[tokio::test]
    async fn test_report_by_broker() {
        let report = handle_report(&request(None, None, None), now(), &store(), Duration::from_secs(1))
            .await
            .unwrap();

        // Broker 4 only has a zero-quantity row and is excluded.
        assert_eq!(report.summary.active_entities, 3);
        assert_eq!(report.summary.total_volume, dec!(31));
        assert_eq!(report.summary.total_turnover, dec!(310));

        let brokers: Vec<Option<i64>> = report.table_data.iter().map(|r| r.broker_id).collect();
        assert_eq!(brokers, vec![Some(2), Some(1), Some(3)]);
        assert_eq!(report.table_data[1].quantity, dec!(6));

        let dates: Vec<u32> = report.chart_data.iter().map(|c| chrono::Datelike::day(&c.date)).collect();
        assert_eq!(dates, vec![10, 11, 12]);
        assert_eq!(report.chart_data[0].volume, dec!(25));
        assert_eq!(report.pagination, Pagination { limit: 50, offset: 0, total: 3 });
    }

    #[tokio::test]
    async fn test_report_pagination_by_symbol() {
        let report = handle_report(&request(Some("symbol"), Some(1), Some(1)), now(), &store(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.pagination.total, 2);
        assert_eq!(report.table_data.len(), 1);
        assert_eq!(report.table_data[0].symbol.as_deref(), Some("VALE3"));
        assert_eq!(report.table_data[0].broker_id, None);
    }

    #[tokio::test]
    async fn test_report_offset_past_end_is_empty_page() {
        let report = handle_report(&request(None, Some(10), Some(10)), now(), &store(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(report.table_data.is_empty());
        assert_eq!(report.pagination.total, 3);
        assert_eq!(report.summary.active_entities, 3);
    }

    /// Delegates to a `MemoryStore` and remembers the page each plan asked for.
    struct RecordingStore {
        inner: MemoryStore,
        slices: Mutex<Vec<Option<RowSlice>>>,
        counts: Mutex<usize>,
    }

    #[async_trait]
    impl RowStore for RecordingStore {
        fn name(&self) -> &str {
            "recording"
        }

        async fn execute_aggregation(&self, plan: &AggregationPlan) -> Result<Vec<StoreRow>, StoreError> {
            self.slices.lock().unwrap().push(plan.slice());
            self.inner.execute_aggregation(plan).await
        }

        async fn count_groups(&self, plan: &AggregationPlan) -> Result<u64, StoreError> {
            *self.counts.lock().unwrap() += 1;
            self.inner.count_groups(plan).await
        }
    }

    #[tokio::test]
    async fn test_table_page_is_pushed_to_store() {
        let store = RecordingStore { inner: store(), slices: Mutex::new(Vec::new()), counts: Mutex::new(0) };
        let report = handle_report(&request(None, Some(2), Some(1)), now(), &store, Duration::from_secs(1))
            .await
            .unwrap();

        let mut slices = store.slices.lock().unwrap().clone();
        slices.sort_by_key(|s| s.is_some());
        assert_eq!(slices, vec![None, Some(RowSlice { limit: 2, offset: 1 })]);
        assert_eq!(*store.counts.lock().unwrap(), 1);

        let brokers: Vec<Option<i64>> = report.table_data.iter().map(|r| r.broker_id).collect();
        assert_eq!(brokers, vec![Some(1), Some(3)]);
        assert_eq!(report.pagination, Pagination { limit: 2, offset: 1, total: 3 });
        assert_eq!(report.summary.total_volume, dec!(31));
    }

    #[test]
    fn test_report_params_validation() {
        let bad_entity = ReportParams {
            timeframe: Some("1D".into()),
            group_by: Some("time_bucket".into()),
            ..Default::default()
        };
        assert_eq!(ReportRequest::from_params(bad_entity, 50).unwrap_err().kind(), ErrorKind::InvalidGroupBy);

        let bad_limit = ReportParams { timeframe: Some("1D".into()), limit: Some(5000), ..Default::default() };
        assert_eq!(ReportRequest::from_params(bad_limit, 50).unwrap_err().kind(), ErrorKind::InvalidRequest);

        let zero_limit = ReportParams { timeframe: Some("1D".into()), limit: Some(0), ..Default::default() };
        assert!(ReportRequest::from_params(zero_limit, 50).is_err());
    }
}
