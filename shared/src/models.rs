use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One row of the `holdings` table. Owned by the row-store; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingRecord {
    pub broker_id: i64,
    pub symbol: String,
    pub quantity: Decimal,
    pub turnover: Decimal,
    pub volume: Decimal,
    pub trade_date: DateTime<Utc>,
}

/// Named relative windows ending at "now". Offsets are fixed day counts,
/// never calendar months.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Shortcut {
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "1W")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "6M")]
    SixMonths,
    #[serde(rename = "1Y")]
    OneYear,
}

impl Shortcut {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shortcut::OneDay => "1D",
            Shortcut::OneWeek => "1W",
            Shortcut::OneMonth => "1M",
            Shortcut::ThreeMonths => "3M",
            Shortcut::SixMonths => "6M",
            Shortcut::OneYear => "1Y",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            Shortcut::OneDay => 1,
            Shortcut::OneWeek => 7,
            Shortcut::OneMonth => 30,
            Shortcut::ThreeMonths => 90,
            Shortcut::SixMonths => 180,
            Shortcut::OneYear => 365,
        }
    }

    /// Tokens are matched exactly (`"1m"` is not `"1M"`).
    pub fn from_token(s: &str) -> Option<Self> {
        match s {
            "1D" => Some(Shortcut::OneDay),
            "1W" => Some(Shortcut::OneWeek),
            "1M" => Some(Shortcut::OneMonth),
            "3M" => Some(Shortcut::ThreeMonths),
            "6M" => Some(Shortcut::SixMonths),
            "1Y" => Some(Shortcut::OneYear),
            _ => None,
        }
    }

    pub fn all() -> [Shortcut; 6] {
        [
            Shortcut::OneDay,
            Shortcut::OneWeek,
            Shortcut::OneMonth,
            Shortcut::ThreeMonths,
            Shortcut::SixMonths,
            Shortcut::OneYear,
        ]
    }
}

/// Grouping dimensions. Declaration order is the canonical result order:
/// day bucket first, then broker, then symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    TimeBucket,
    BrokerId,
    Symbol,
}

impl GroupKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKey::TimeBucket => "time_bucket",
            GroupKey::BrokerId => "broker_id",
            GroupKey::Symbol => "symbol",
        }
    }

    pub fn from_token(s: &str) -> Option<Self> {
        match s {
            "time_bucket" => Some(GroupKey::TimeBucket),
            "broker_id" => Some(GroupKey::BrokerId),
            "symbol" => Some(GroupKey::Symbol),
            _ => None,
        }
    }
}

/// One aggregated row; the key fields not requested in the grouping are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<NaiveDate>,
    pub sum_quantity: Decimal,
    pub sum_turnover: Decimal,
    pub sum_volume: Decimal,
}

// Dashboard report types

/// Entity the report table is broken down by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportEntity {
    #[default]
    BrokerId,
    Symbol,
}

impl ReportEntity {
    pub fn group_key(&self) -> GroupKey {
        match self {
            ReportEntity::BrokerId => GroupKey::BrokerId,
            ReportEntity::Symbol => GroupKey::Symbol,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_volume: Decimal,
    pub total_turnover: Decimal,
    pub active_entities: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub volume: Decimal,
    pub turnover: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub quantity: Decimal,
    pub turnover: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsReport {
    pub summary: Summary,
    pub chart_data: Vec<ChartPoint>,
    pub table_data: Vec<TableRow>,
    pub pagination: Pagination,
}
