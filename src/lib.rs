// Core modules
pub mod aggregator;
pub mod broker;
pub mod engine;
pub mod execution;
pub mod indicators;
pub mod ingest;
pub mod models;
pub mod persistence;
pub mod tracker;

// Re-export commonly used types
pub use engine::Strategy;
pub use models::*;
pub use tracker::PriceTrackerStore;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
