// Request boundary types: loosely-typed parameters in, validated request out.
use chrono::NaiveDate;
use serde::Deserialize;
use shared::models::{GroupKey, Shortcut};
use std::collections::BTreeSet;

use crate::error::EngineError;

/// Named parameters exactly as a transport layer would hand them over.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParams {
    pub broker_id: Option<i64>,
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub group_by: Vec<String>,
}

/// Exactly one way of describing the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    Shortcut(Shortcut),
    Explicit { start: NaiveDate, end: NaiveDate },
}

impl WindowSpec {
    pub fn from_params(
        timeframe: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self, EngineError> {
        match (timeframe, start, end) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(EngineError::InvalidRequest(
                "give either a timeframe shortcut or start/end dates, not both".to_string(),
            )),
            (Some(token), None, None) => Shortcut::from_token(token.trim())
                .map(WindowSpec::Shortcut)
                .ok_or_else(|| EngineError::InvalidShortcut(token.to_string())),
            (None, Some(start), Some(end)) => Ok(WindowSpec::Explicit { start, end }),
            (None, Some(_), None) => Err(EngineError::InvalidRequest("end_date is required with start_date".to_string())),
            (None, None, Some(_)) => Err(EngineError::InvalidRequest("start_date is required with end_date".to_string())),
            (None, None, None) => Err(EngineError::InvalidRequest(
                "a timeframe shortcut or start/end dates are required".to_string(),
            )),
        }
    }
}

/// Non-empty set of grouping keys, iterated in canonical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBy(BTreeSet<GroupKey>);

impl GroupBy {
    pub fn new<I: IntoIterator<Item = GroupKey>>(keys: I) -> Result<Self, EngineError> {
        let set: BTreeSet<GroupKey> = keys.into_iter().collect();
        if set.is_empty() {
            return Err(EngineError::InvalidGroupBy("at least one grouping key is required".to_string()));
        }
        Ok(GroupBy(set))
    }

    /// Accepts tokens such as `"broker_id"` or comma-joined lists like `"symbol,time_bucket"`.
    pub fn parse<I, S>(tokens: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = Vec::new();
        for token in tokens {
            for part in token.as_ref().split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let key = GroupKey::from_token(part)
                    .ok_or_else(|| EngineError::InvalidGroupBy(format!("unknown grouping key '{}'", part)))?;
                keys.push(key);
            }
        }
        Self::new(keys)
    }

    pub fn keys(&self) -> impl Iterator<Item = GroupKey> + '_ {
        self.0.iter().copied()
    }
}

/// Equality filters pushed down with the window predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub broker_id: Option<i64>,
    pub symbol: Option<String>,
    /// Drop rows with `quantity <= 0` (dashboard behaviour).
    pub positive_quantity_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRequest {
    pub window: WindowSpec,
    pub filters: Filters,
    pub group_by: GroupBy,
}

impl AggregationRequest {
    pub fn from_params(params: RawParams) -> Result<Self, EngineError> {
        let window = WindowSpec::from_params(params.timeframe.as_deref(), params.start_date, params.end_date)?;
        let group_by = GroupBy::parse(&params.group_by)?;
        let symbol = params
            .symbol
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Self {
            window,
            filters: Filters { broker_id: params.broker_id, symbol, positive_quantity_only: false },
            group_by,
        })
    }
}
