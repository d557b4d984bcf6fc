//! Aggregation planning.
//!
//! An [`AggregationPlan`] is the store-agnostic description of one grouped
//! summation: a predicate (window + equality filters), the grouping keys in
//! canonical order, the columns to sum and, for ranked tables, the row order
//! and page to return. Store adapters translate it into their own query
//! language; the engine never builds SQL itself.

use rust_decimal::Decimal;
use serde::Serialize;
use shared::models::{GroupKey, HoldingRecord};

use crate::models::{Filters, GroupBy};
use crate::window::DateWindow;

/// Columns summed by every aggregation, in result order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SumColumn {
    Quantity,
    Turnover,
    Volume,
}

impl SumColumn {
    pub fn column_name(&self) -> &'static str {
        match self {
            SumColumn::Quantity => "quantity",
            SumColumn::Turnover => "turnover",
            SumColumn::Volume => "volume",
        }
    }

    pub fn all() -> [SumColumn; 3] {
        [SumColumn::Quantity, SumColumn::Turnover, SumColumn::Volume]
    }
}

/// Order in which a store returns groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowOrder {
    /// Ascending by group keys (bucket, broker, symbol).
    Canonical,
    /// Largest summed quantity first, group keys ascending on ties.
    QuantityDesc,
}

/// Page of ordered groups to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowSlice {
    pub limit: u32,
    pub offset: u32,
}

/// Row restriction pushed down to the store. Window bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub window: DateWindow,
    pub broker_id: Option<i64>,
    pub symbol: Option<String>,
    pub positive_quantity_only: bool,
}

impl Predicate {
    pub fn matches(&self, record: &HoldingRecord) -> bool {
        self.window.contains(record.trade_date)
            && self.broker_id.map_or(true, |id| record.broker_id == id)
            && self.symbol.as_deref().map_or(true, |s| record.symbol == s)
            && (!self.positive_quantity_only || record.quantity > Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationPlan {
    predicate: Predicate,
    group_keys: Vec<GroupKey>,
    sum_columns: Vec<SumColumn>,
    order: RowOrder,
    slice: Option<RowSlice>,
}

impl AggregationPlan {
    pub fn build(window: DateWindow, filters: &Filters, group_by: &GroupBy) -> Self {
        let plan = Self {
            predicate: Predicate {
                window,
                broker_id: filters.broker_id,
                symbol: filters.symbol.clone(),
                positive_quantity_only: filters.positive_quantity_only,
            },
            group_keys: group_by.keys().collect(),
            sum_columns: SumColumn::all().to_vec(),
            order: RowOrder::Canonical,
            slice: None,
        };
        tracing::debug!(
            group_keys = ?plan.group_keys,
            broker_id = ?plan.predicate.broker_id,
            symbol = ?plan.predicate.symbol,
            positive_quantity_only = plan.predicate.positive_quantity_only,
            "Built aggregation plan"
        );
        plan
    }

    /// Rank groups by summed quantity and keep one page of them.
    pub fn ranked_by_quantity(mut self, limit: u32, offset: u32) -> Self {
        self.order = RowOrder::QuantityDesc;
        self.slice = Some(RowSlice { limit, offset });
        self
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Grouping keys in canonical order (bucket, broker, symbol).
    pub fn group_keys(&self) -> &[GroupKey] {
        &self.group_keys
    }

    pub fn groups_by(&self, key: GroupKey) -> bool {
        self.group_keys.contains(&key)
    }

    pub fn sum_columns(&self) -> &[SumColumn] {
        &self.sum_columns
    }

    pub fn order(&self) -> RowOrder {
        self.order
    }

    pub fn slice(&self) -> Option<RowSlice> {
        self.slice
    }
}
