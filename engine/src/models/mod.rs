// Engine-side request models. Result models live in the `shared` crate.
pub mod request;

pub use request::{AggregationRequest, Filters, GroupBy, RawParams, WindowSpec};
