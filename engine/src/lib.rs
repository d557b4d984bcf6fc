// Engine library root.
//
// Request parameters → window (resolver) → AggregationPlan (planner)
// → RowStore (pushdown) → ordered AggregateRows (executor).

pub mod config;
pub mod data;
pub mod error;
pub mod executor;
pub mod models;
pub mod planner;
pub mod services;
pub mod store;
pub mod window;

pub use error::{EngineError, ErrorKind};
pub use services::HoldingsService;
