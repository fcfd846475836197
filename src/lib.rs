// Core modules
pub mod calibration;
pub mod config;
pub mod entry;
pub mod error;
pub mod models;
pub mod performance;
pub mod regime;
pub mod store;
pub mod weighting;

// Re-export commonly used types
pub use crate::config::DecisionConfig;
pub use error::AgentError;
pub use models::{CalibrationPair, MarketCandidate, ModelForecast, ResolutionRecord, TradeSide};
pub use store::Store;

// Error handling
pub type Result<T> = std::result::Result<T, AgentError>;
