// In-process row-store holding records in a Vec.
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::models::{GroupKey, HoldingRecord};
use std::collections::BTreeMap;

use super::{RowStore, StoreError, StoreRow};
use crate::planner::{AggregationPlan, RowOrder, SumColumn};

type GroupValues = (Option<NaiveDate>, Option<i64>, Option<String>);

/// Evaluates plans against an in-memory table. Grouping and summation happen
/// here, behind the `RowStore` boundary, exactly as a database would do it.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<HoldingRecord>,
}

impl MemoryStore {
    pub fn new(records: Vec<HoldingRecord>) -> Self {
        Self { records }
    }

    fn group_values(plan: &AggregationPlan, record: &HoldingRecord) -> GroupValues {
        (
            plan.groups_by(GroupKey::TimeBucket).then(|| record.trade_date.date_naive()),
            plan.groups_by(GroupKey::BrokerId).then_some(record.broker_id),
            plan.groups_by(GroupKey::Symbol).then(|| record.symbol.clone()),
        )
    }

    fn column_value(record: &HoldingRecord, column: SumColumn) -> Decimal {
        match column {
            SumColumn::Quantity => record.quantity,
            SumColumn::Turnover => record.turnover,
            SumColumn::Volume => record.volume,
        }
    }

    fn groups(&self, plan: &AggregationPlan) -> Result<BTreeMap<GroupValues, Vec<Decimal>>, StoreError> {
        if plan.group_keys().is_empty() {
            return Err(StoreError::Query("plan has no grouping keys".to_string()));
        }
        let columns = plan.sum_columns();
        let mut groups: BTreeMap<GroupValues, Vec<Decimal>> = BTreeMap::new();

        for record in self.records.iter().filter(|r| plan.predicate().matches(r)) {
            let sums = groups
                .entry(Self::group_values(plan, record))
                .or_insert_with(|| vec![Decimal::ZERO; columns.len()]);
            for (sum, column) in sums.iter_mut().zip(columns) {
                *sum += Self::column_value(record, *column);
            }
        }
        Ok(groups)
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn execute_aggregation(&self, plan: &AggregationPlan) -> Result<Vec<StoreRow>, StoreError> {
        let mut rows: Vec<StoreRow> = self
            .groups(plan)?
            .into_iter()
            .map(|((bucket, broker_id, symbol), sums)| StoreRow { bucket, broker_id, symbol, sums })
            .collect();

        if plan.order() == RowOrder::QuantityDesc {
            let idx = plan
                .sum_columns()
                .iter()
                .position(|c| *c == SumColumn::Quantity)
                .ok_or_else(|| StoreError::Query("ranked plan does not sum quantity".to_string()))?;
            // Stable: ties keep the canonical key order from the BTreeMap.
            rows.sort_by(|a, b| b.sums[idx].cmp(&a.sums[idx]));
        }
        if let Some(slice) = plan.slice() {
            rows = rows
                .into_iter()
                .skip(slice.offset as usize)
                .take(slice.limit as usize)
                .collect();
        }
        Ok(rows)
    }

    async fn count_groups(&self, plan: &AggregationPlan) -> Result<u64, StoreError> {
        Ok(self.groups(plan)?.len() as u64)
    }
}
