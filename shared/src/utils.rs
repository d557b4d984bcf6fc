// Calendar-day helpers shared by the resolver and the row-store adapters.
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// First instant of `date` in UTC.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(date.and_time(NaiveTime::MIN), Utc)
}

/// Last representable instant of `date` in UTC, so a whole day is inclusive.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    // 23:59:59.999999999 always exists; leap seconds are not modelled.
    let last = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN);
    DateTime::from_naive_utc_and_offset(date.and_time(last), Utc)
}
