// Request-level services exposed by the engine.
pub mod holdings_service;

pub use holdings_service::HoldingsService;
