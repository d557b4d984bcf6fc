//! SQLite row-store adapter.
//!
//! Translates an [`AggregationPlan`] into a single parameterised
//! `SELECT ... WHERE ... GROUP BY ...` statement and runs it on a pooled
//! connection inside `spawn_blocking`, so the async runtime keeps serving
//! other requests while SQLite works.
//!
//! Schema:
//!
//! ```text
//! holdings(id, broker_id, symbol, quantity, turnover, volume, trade_date)
//!   quantity, turnover, volume: INTEGER, units of 10^-4 (exact SUM)
//!   trade_date:                 INTEGER, nanoseconds since the unix epoch, UTC
//!   idx_holdings_trade_date(trade_date)
//!   idx_holdings_broker_id(broker_id)
//!   idx_holdings_symbol(symbol)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, OpenFlags};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use shared::models::{GroupKey, HoldingRecord};
use std::path::Path;
use std::time::{Duration, Instant};

use super::{RowStore, StoreError, StoreRow};
use crate::planner::{AggregationPlan, Predicate, RowOrder};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Decimal places kept for quantity, turnover and volume.
const AMOUNT_SCALE: u32 = 4;
const UNITS_PER_WHOLE: i64 = 10_000;

/// Floor of `trade_date` to whole seconds (also for pre-1970 instants), as a UTC day.
const DAY_BUCKET_SQL: &str =
    "date((trade_date - (((trade_date % 1000000000) + 1000000000) % 1000000000)) / 1000000000, 'unixepoch')";

const CREATE_SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS holdings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        broker_id INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        turnover INTEGER NOT NULL,
        volume INTEGER NOT NULL,
        trade_date INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_holdings_trade_date ON holdings(trade_date);
    CREATE INDEX IF NOT EXISTS idx_holdings_broker_id ON holdings(broker_id);
    CREATE INDEX IF NOT EXISTS idx_holdings_symbol ON holdings(symbol);
";

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Read-only pool over an existing database file.
    pub fn open_read_only(path: &Path, max_size: u32, checkout_timeout: Duration) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Unavailable(format!("database not found: {}", path.display())));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        let manager = SqliteConnectionManager::file(path).with_flags(flags);
        Self::with_manager(manager, max_size, checkout_timeout)
    }

    /// Read-write pool, creating the file if needed. Used for seeding.
    pub fn open_read_write(path: &Path, max_size: u32, checkout_timeout: Duration) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path);
        Self::with_manager(manager, max_size, checkout_timeout)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32, checkout_timeout: Duration) -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(checkout_timeout)
            .build(manager)?;
        Ok(Self { pool })
    }

    pub fn create_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute_batch(CREATE_SCHEMA_SQL)?;
        Ok(())
    }

    /// Bulk insert in one transaction. Returns the number of rows written.
    /// Nothing is written if any record cannot be stored exactly.
    pub fn insert_records(&self, records: &[HoldingRecord]) -> Result<usize, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO holdings (broker_id, symbol, quantity, turnover, volume, trade_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.broker_id,
                    record.symbol,
                    amount_to_units("quantity", record.quantity)?,
                    amount_to_units("turnover", record.turnover)?,
                    amount_to_units("volume", record.volume)?,
                    trade_date_to_nanos(record.trade_date)?,
                ])?;
            }
        }
        tx.commit()?;
        tracing::info!(count = records.len(), "Inserted holdings records");
        Ok(records.len())
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&DbPool) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || job(&pool))
            .await
            .map_err(|e| StoreError::Unavailable(format!("query task failed: {}", e)))?
    }
}

fn amount_to_units(column: &str, value: Decimal) -> Result<i64, StoreError> {
    let units = value
        .checked_mul(Decimal::from(UNITS_PER_WHOLE))
        .ok_or_else(|| StoreError::Query(format!("{} {} exceeds the storable range", column, value)))?;
    if !units.fract().is_zero() {
        return Err(StoreError::Query(format!(
            "{} {} has more than {} decimal places",
            column, value, AMOUNT_SCALE
        )));
    }
    units
        .to_i64()
        .ok_or_else(|| StoreError::Query(format!("{} {} exceeds the storable range", column, value)))
}

fn units_to_amount(units: i64) -> Decimal {
    Decimal::new(units, AMOUNT_SCALE).normalize()
}

fn trade_date_to_nanos(trade_date: DateTime<Utc>) -> Result<i64, StoreError> {
    trade_date
        .timestamp_nanos_opt()
        .ok_or_else(|| StoreError::Query(format!("trade_date {} is outside the storable range", trade_date)))
}

/// Window bound in stored units. Bounds past the representable range clamp,
/// which keeps the comparison exact for every row that can be stored.
fn bound_to_nanos(instant: DateTime<Utc>) -> i64 {
    instant
        .timestamp_nanos_opt()
        .unwrap_or(if instant.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

fn key_expression(key: GroupKey) -> &'static str {
    match key {
        GroupKey::TimeBucket => DAY_BUCKET_SQL,
        GroupKey::BrokerId => "broker_id",
        GroupKey::Symbol => "symbol",
    }
}

fn where_clause(predicate: &Predicate) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = vec!["trade_date >= ?", "trade_date <= ?"];
    let mut values: Vec<Value> = vec![
        Value::Integer(bound_to_nanos(predicate.window.start())),
        Value::Integer(bound_to_nanos(predicate.window.end())),
    ];
    if let Some(broker_id) = predicate.broker_id {
        clauses.push("broker_id = ?");
        values.push(Value::Integer(broker_id));
    }
    if let Some(symbol) = &predicate.symbol {
        clauses.push("symbol = ?");
        values.push(Value::Text(symbol.clone()));
    }
    if predicate.positive_quantity_only {
        clauses.push("quantity > 0");
    }
    (clauses.join(" AND "), values)
}

fn key_list(plan: &AggregationPlan) -> String {
    plan.group_keys()
        .iter()
        .map(|k| key_expression(*k))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a plan as SQL plus its bound parameters. No user input is ever
/// spliced into the statement text.
pub fn build_query(plan: &AggregationPlan) -> (String, Vec<Value>) {
    let keys = key_list(plan);
    let sums: Vec<String> = plan
        .sum_columns()
        .iter()
        .map(|c| format!("COALESCE(SUM({name}), 0) AS sum_{name}", name = c.column_name()))
        .collect();
    let (where_sql, mut values) = where_clause(plan.predicate());

    let order_sql = match plan.order() {
        RowOrder::Canonical => keys.clone(),
        RowOrder::QuantityDesc => format!("SUM(quantity) DESC, {}", keys),
    };
    let mut sql = format!(
        "SELECT {keys}, {sums} FROM holdings WHERE {where_sql} GROUP BY {keys} ORDER BY {order_sql}",
        sums = sums.join(", "),
    );
    if let Some(slice) = plan.slice() {
        sql.push_str(" LIMIT ? OFFSET ?");
        values.push(Value::Integer(i64::from(slice.limit)));
        values.push(Value::Integer(i64::from(slice.offset)));
    }
    (sql, values)
}

/// Distinct group count for the plan's predicate and keys; its page is ignored.
pub fn build_count_query(plan: &AggregationPlan) -> (String, Vec<Value>) {
    let (where_sql, values) = where_clause(plan.predicate());
    let sql = format!(
        "SELECT COUNT(*) FROM (SELECT 1 FROM holdings WHERE {where_sql} GROUP BY {keys})",
        keys = key_list(plan),
    );
    (sql, values)
}

fn run_query(pool: &DbPool, plan: &AggregationPlan, sql: &str, values: &[Value]) -> Result<Vec<StoreRow>, StoreError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let key_count = plan.group_keys().len();
    let sum_count = plan.sum_columns().len();

    let raw_rows = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), |row| {
            let mut bucket: Option<String> = None;
            let mut broker_id = None;
            let mut symbol = None;
            for (idx, key) in plan.group_keys().iter().enumerate() {
                match key {
                    GroupKey::TimeBucket => bucket = Some(row.get::<_, String>(idx)?),
                    GroupKey::BrokerId => broker_id = Some(row.get::<_, i64>(idx)?),
                    GroupKey::Symbol => symbol = Some(row.get::<_, String>(idx)?),
                }
            }
            let mut sums = Vec::with_capacity(sum_count);
            for idx in key_count..key_count + sum_count {
                sums.push(units_to_amount(row.get::<_, i64>(idx)?));
            }
            Ok((bucket, broker_id, symbol, sums))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw_rows
        .into_iter()
        .map(|(bucket, broker_id, symbol, sums)| {
            let bucket = bucket
                .map(|b| {
                    NaiveDate::parse_from_str(&b, "%Y-%m-%d")
                        .map_err(|e| StoreError::Query(format!("bad bucket '{}': {}", b, e)))
                })
                .transpose()?;
            Ok(StoreRow { bucket, broker_id, symbol, sums })
        })
        .collect()
}

fn run_count(pool: &DbPool, sql: &str, values: &[Value]) -> Result<u64, StoreError> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row(sql, rusqlite::params_from_iter(values.iter()), |row| row.get(0))?;
    u64::try_from(count).map_err(|_| StoreError::Query(format!("negative group count {}", count)))
}

#[async_trait]
impl RowStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn execute_aggregation(&self, plan: &AggregationPlan) -> Result<Vec<StoreRow>, StoreError> {
        if plan.group_keys().is_empty() {
            return Err(StoreError::Query("plan has no grouping keys".to_string()));
        }
        let (sql, values) = build_query(plan);
        tracing::debug!(sql = %sql, params = values.len(), "Executing aggregation on SQLite");

        let plan = plan.clone();
        let started = Instant::now();
        let rows = self.run_blocking(move |pool| run_query(pool, &plan, &sql, &values)).await?;

        tracing::debug!(rows = rows.len(), elapsed_ms = started.elapsed().as_millis() as u64, "SQLite aggregation finished");
        Ok(rows)
    }

    async fn count_groups(&self, plan: &AggregationPlan) -> Result<u64, StoreError> {
        if plan.group_keys().is_empty() {
            return Err(StoreError::Query("plan has no grouping keys".to_string()));
        }
        let (sql, values) = build_count_query(plan);
        tracing::debug!(sql = %sql, params = values.len(), "Counting groups on SQLite");
        self.run_blocking(move |pool| run_count(pool, &sql, &values)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Filters, GroupBy};
    use crate::store::MemoryStore;
    use crate::window::DateWindow;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn window() -> DateWindow {
        DateWindow::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn record(broker_id: i64, symbol: &str, turnover: Decimal, day: u32, hour: u32) -> HoldingRecord {
        HoldingRecord {
            broker_id,
            symbol: symbol.to_string(),
            quantity: dec!(10),
            turnover,
            volume: dec!(3),
            trade_date: Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap(),
        }
    }

    fn seeded_store(dir: &tempfile::TempDir, records: &[HoldingRecord]) -> SqliteStore {
        let path = dir.path().join("holdings.db");
        let writer = SqliteStore::open_read_write(&path, 1, Duration::from_secs(1)).unwrap();
        writer.create_schema().unwrap();
        writer.insert_records(records).unwrap();
        drop(writer);
        SqliteStore::open_read_only(&path, 2, Duration::from_secs(1)).unwrap()
    }

    fn plan(window: DateWindow, group_by: &[&str]) -> AggregationPlan {
        AggregationPlan::build(window, &Filters::default(), &GroupBy::parse(group_by).unwrap())
    }

    #[test]
    fn test_build_query_binds_filters() {
        let filters = Filters { broker_id: Some(4), symbol: Some("ITUB4".into()), positive_quantity_only: true };
        let plan = AggregationPlan::build(window(), &filters, &GroupBy::parse(["symbol", "time_bucket"]).unwrap());
        let (sql, values) = build_query(&plan);
        assert!(sql.starts_with(&format!("SELECT {}, symbol, COALESCE(SUM(quantity), 0)", DAY_BUCKET_SQL)));
        assert!(sql.contains("broker_id = ?"));
        assert!(sql.contains("symbol = ?"));
        assert!(sql.contains("quantity > 0"));
        assert!(sql.contains(&format!("GROUP BY {}, symbol", DAY_BUCKET_SQL)));
        assert!(!sql.contains("ITUB4"));
        assert!(!sql.contains("LIMIT"));
        assert_eq!(values.len(), 4);
        assert_eq!(values[2], Value::Integer(4));
        assert_eq!(values[3], Value::Text("ITUB4".into()));
    }

    #[test]
    fn test_build_query_ranked_page() {
        let plan = plan(window(), &["broker_id"]).ranked_by_quantity(25, 50);
        let (sql, values) = build_query(&plan);
        assert!(sql.contains("ORDER BY SUM(quantity) DESC, broker_id"));
        assert!(sql.ends_with("LIMIT ? OFFSET ?"));
        assert_eq!(values[values.len() - 2..], [Value::Integer(25), Value::Integer(50)]);

        let (count_sql, count_values) = build_count_query(&plan);
        assert!(count_sql.starts_with("SELECT COUNT(*) FROM (SELECT 1 FROM holdings WHERE"));
        assert!(!count_sql.contains("LIMIT"));
        assert_eq!(count_values.len(), 2);
    }

    #[test]
    fn test_amount_units_are_exact() {
        assert_eq!(amount_to_units("turnover", dec!(1234567890123.45)).unwrap(), 12_345_678_901_234_500);
        assert_eq!(units_to_amount(12_345_678_901_234_600), dec!(1234567890123.46));
        assert_eq!(amount_to_units("quantity", dec!(-0.0001)).unwrap(), -1);
        assert!(matches!(amount_to_units("quantity", dec!(0.00001)), Err(StoreError::Query(_))));
        assert!(matches!(amount_to_units("turnover", dec!(1000000000000000)), Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn test_sqlite_groups_by_broker() {
        let dir = tempdir().unwrap();
        let store = seeded_store(
            &dir,
            &[
                record(1, "PETR4", dec!(100), 5, 10),
                record(1, "PETR4", dec!(50), 6, 10),
                record(2, "VALE3", dec!(30), 5, 11),
            ],
        );
        let rows = store.execute_aggregation(&plan(window(), &["broker_id"])).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].broker_id, Some(1));
        assert_eq!(rows[0].sums, vec![dec!(20), dec!(150), dec!(6)]);
        assert_eq!(rows[1].broker_id, Some(2));
        assert_eq!(rows[1].sums[1], dec!(30));
    }

    #[tokio::test]
    async fn test_large_turnover_sums_match_memory_store() {
        let records = vec![
            record(1, "PETR4", dec!(1234567890123.45), 5, 10),
            record(1, "PETR4", dec!(0.01), 6, 10),
            record(2, "VALE3", dec!(98765432109876.5432), 7, 10),
            record(2, "VALE3", dec!(0.0001), 7, 11),
        ];
        let dir = tempdir().unwrap();
        let sqlite = seeded_store(&dir, &records);
        let memory = MemoryStore::new(records);
        let plan = plan(window(), &["broker_id"]);

        let from_sqlite = sqlite.execute_aggregation(&plan).await.unwrap();
        let from_memory = memory.execute_aggregation(&plan).await.unwrap();
        assert_eq!(from_sqlite[0].sums[1], dec!(1234567890123.46));
        assert_eq!(from_sqlite[1].sums[1], dec!(98765432109876.5433));
        assert_eq!(from_sqlite, from_memory);
    }

    #[tokio::test]
    async fn test_sum_overflow_is_query_error() {
        let dir = tempdir().unwrap();
        let store = seeded_store(
            &dir,
            &[
                record(1, "PETR4", dec!(900000000000000), 5, 10),
                record(1, "PETR4", dec!(900000000000000), 6, 10),
            ],
        );
        let err = store.execute_aggregation(&plan(window(), &["broker_id"])).await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)), "unexpected error: {err:?}");
    }

    #[test]
    fn test_inexact_amount_rejects_whole_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("holdings.db");
        let writer = SqliteStore::open_read_write(&path, 1, Duration::from_secs(1)).unwrap();
        writer.create_schema().unwrap();
        let err = writer
            .insert_records(&[record(1, "PETR4", dec!(1), 5, 10), record(1, "PETR4", dec!(0.123456), 5, 11)])
            .unwrap_err();
        assert!(err.to_string().contains("decimal places"));
        let count: i64 = writer
            .pool
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM holdings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_sub_second_window_start_matches_predicate() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(700);
        let start = now - chrono::Duration::days(1);
        let window = DateWindow::new(start, now).unwrap();

        let mut before = record(1, "PETR4", dec!(5), 1, 0);
        before.trade_date = start - chrono::Duration::milliseconds(500);
        let mut at_start = record(2, "PETR4", dec!(7), 1, 0);
        at_start.trade_date = start;
        let mut at_end = record(3, "PETR4", dec!(9), 1, 0);
        at_end.trade_date = now;
        let mut after = record(4, "PETR4", dec!(11), 1, 0);
        after.trade_date = now + chrono::Duration::nanoseconds(1);
        let records = vec![before, at_start, at_end, after];

        let dir = tempdir().unwrap();
        let sqlite = seeded_store(&dir, &records);
        let memory = MemoryStore::new(records);
        let plan = plan(window, &["broker_id"]);

        let from_sqlite = sqlite.execute_aggregation(&plan).await.unwrap();
        let brokers: Vec<Option<i64>> = from_sqlite.iter().map(|r| r.broker_id).collect();
        assert_eq!(brokers, vec![Some(2), Some(3)]);
        assert_eq!(from_sqlite, memory.execute_aggregation(&plan).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_day_buckets_and_inclusive_end() {
        let dir = tempdir().unwrap();
        let mut last_instant = record(1, "PETR4", dec!(0.5), 31, 0);
        last_instant.trade_date = shared::utils::end_of_day(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        let store = seeded_store(
            &dir,
            &[
                record(1, "PETR4", dec!(1.25), 31, 23),
                record(1, "PETR4", dec!(2.5), 31, 1),
                record(1, "PETR4", dec!(9), 1, 0),
                last_instant,
            ],
        );
        let rows = store.execute_aggregation(&plan(window(), &["time_bucket"])).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bucket, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(rows[1].bucket, NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(rows[1].sums[1], dec!(4.25));
    }

    #[tokio::test]
    async fn test_pre_epoch_trade_lands_on_its_own_day() {
        let dir = tempdir().unwrap();
        let mut early = record(1, "PETR4", dec!(1), 1, 0);
        early.trade_date = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap() + chrono::Duration::milliseconds(500);
        let store = seeded_store(&dir, &[early]);
        let window = DateWindow::from_dates(
            NaiveDate::from_ymd_opt(1969, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(1970, 1, 31).unwrap(),
        )
        .unwrap();
        let rows = store.execute_aggregation(&plan(window, &["time_bucket"])).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket, NaiveDate::from_ymd_opt(1969, 12, 31));
    }

    #[tokio::test]
    async fn test_ranked_page_and_count() {
        let dir = tempdir().unwrap();
        let mut records = Vec::new();
        for (broker_id, quantity) in [(1, dec!(3)), (2, dec!(9)), (3, dec!(3)), (4, dec!(7))] {
            let mut r = record(broker_id, "PETR4", dec!(1), 5, 10);
            r.quantity = quantity;
            records.push(r);
        }
        let store = seeded_store(&dir, &records);
        let ranked = plan(window(), &["broker_id"]).ranked_by_quantity(2, 1);

        let rows = store.execute_aggregation(&ranked).await.unwrap();
        let brokers: Vec<Option<i64>> = rows.iter().map(|r| r.broker_id).collect();
        assert_eq!(brokers, vec![Some(4), Some(1)]);
        assert_eq!(store.count_groups(&ranked).await.unwrap(), 4);
        assert_eq!(rows, MemoryStore::new(records).execute_aggregation(&ranked).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_table_is_query_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.db");
        SqliteStore::open_read_write(&path, 1, Duration::from_secs(1)).unwrap();
        rusqlite::Connection::open(&path).unwrap().execute_batch("CREATE TABLE other (x INTEGER)").unwrap();
        let store = SqliteStore::open_read_only(&path, 1, Duration::from_secs(1)).unwrap();
        let err = store.execute_aggregation(&plan(window(), &["symbol"])).await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)), "unexpected error: {err:?}");
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let result = SqliteStore::open_read_only(&dir.path().join("nope.db"), 1, Duration::from_secs(1));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
