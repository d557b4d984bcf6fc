// Data models shared between the aggregation engine and its consumers.
pub mod models;
pub mod utils;
