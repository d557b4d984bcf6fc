// Dev/demo data loading. The engine itself never writes holdings.
pub mod csv_loader;

pub use csv_loader::HoldingsCsvLoader;
