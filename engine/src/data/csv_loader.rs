use anyhow::{anyhow, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use shared::models::HoldingRecord;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// Field-level parsing for holdings exports.
pub mod holdings_format {
    use anyhow::{anyhow, Result};
    use chrono::{DateTime, NaiveDate, Utc};
    use rust_decimal::Decimal;
    use shared::utils::start_of_day;
    use std::str::FromStr;

    // Plain decimal with '.' as separator, e.g. "1234.56" or "-3".
    pub fn parse_decimal(s: &str) -> Result<Decimal> {
        Decimal::from_str(s.trim()).map_err(|e| anyhow!("Failed to parse decimal '{}': {}", s, e))
    }

    // Accepts RFC 3339 timestamps or bare "YYYY-MM-DD" dates (midnight UTC).
    pub fn parse_trade_date(s: &str) -> Result<DateTime<Utc>> {
        let s = s.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(start_of_day)
            .map_err(|e| anyhow!("Failed to parse trade_date '{}': {}", s, e))
    }

}

pub struct HoldingsCsvLoader;

impl HoldingsCsvLoader {
    // CSV Header: broker_id,symbol,quantity,turnover,volume,trade_date
    // Example Row: 12,PETR4,1500,54321.75,1500,2024-06-14T18:20:00Z
    pub fn load_holdings_from_csv(file_path: &Path) -> Result<Vec<HoldingRecord>> {
        let file = File::open(file_path)
            .map_err(|e| anyhow!("Failed to open CSV file '{}': {}", file_path.display(), e))?;
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(BufReader::new(file));

        let headers = rdr.headers()?.clone();
        let mut records = Vec::new();

        for (idx, result) in rdr.records().enumerate() {
            let line = idx + 2;
            let record = result.map_err(|e| anyhow!("Error reading CSV record at line {}: {}", line, e))?;

            let broker_str = Self::required(&record, &headers, "broker_id", line)?;
            let symbol = Self::required(&record, &headers, "symbol", line)?;
            let quantity_str = Self::required(&record, &headers, "quantity", line)?;
            let turnover_str = Self::required(&record, &headers, "turnover", line)?;
            let volume_str = Self::required(&record, &headers, "volume", line)?;
            let date_str = Self::required(&record, &headers, "trade_date", line)?;

            let broker_id = broker_str
                .parse::<i64>()
                .map_err(|e| anyhow!("Error parsing 'broker_id' at line {}: {}", line, e))?;
            let quantity = holdings_format::parse_decimal(quantity_str)
                .map_err(|e| anyhow!("Error parsing 'quantity' at line {}: {}", line, e))?;
            let turnover = holdings_format::parse_decimal(turnover_str)
                .map_err(|e| anyhow!("Error parsing 'turnover' at line {}: {}", line, e))?;
            let volume = holdings_format::parse_decimal(volume_str)
                .map_err(|e| anyhow!("Error parsing 'volume' at line {}: {}", line, e))?;
            let trade_date = holdings_format::parse_trade_date(date_str)
                .map_err(|e| anyhow!("Error parsing 'trade_date' at line {}: {}", line, e))?;

            if symbol.is_empty() {
                return Err(anyhow!("Empty 'symbol' at line {}", line));
            }

            records.push(HoldingRecord {
                broker_id,
                symbol: symbol.to_string(),
                quantity,
                turnover,
                volume,
                trade_date,
            });
        }
        tracing::info!(path = %file_path.display(), count = records.len(), "Loaded holdings from CSV");
        Ok(records)
    }

    fn required<'a>(record: &'a StringRecord, headers: &StringRecord, name: &str, line: usize) -> Result<&'a str> {
        headers
            .iter()
            .position(|header| header == name)
            .and_then(|pos| record.get(pos))
            .ok_or_else(|| anyhow!("Missing '{}' field in CSV record at line {}", name, line))
    }
}
