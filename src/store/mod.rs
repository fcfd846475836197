// Store adapters over the shared agent tables
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{CalibrationPair, MarketCandidate, ModelForecast, ResolutionRecord};
use crate::Result;
use async_trait::async_trait;

/// Conceptual table names, shared by the adapters and their soft-miss
/// bookkeeping.
pub mod tables {
    pub const PERFORMANCE_LOG: &str = "performance_log";
    pub const MODEL_FORECAST_LOG: &str = "model_forecast_log";
    pub const CALIBRATION_HISTORY: &str = "calibration_history";
    pub const ENGINE_STATE: &str = "engine_state";
    pub const CANDIDATES: &str = "candidates";
}

/// Access to the agent's shared relational store.
///
/// The store is externally owned and may be partially migrated: operations
/// against a table that does not exist yet return empty results (reads) or
/// skip the write, rather than failing. Only genuinely unexpected store
/// failures surface as errors.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append one resolved trade to performance_log.
    ///
    /// The record's `model_forecasts` map is NOT written here; callers split
    /// it into `append_model_forecast` rows.
    async fn append_resolution(&self, record: &ResolutionRecord) -> Result<()>;

    /// Append one per-model forecast row to model_forecast_log.
    async fn append_model_forecast(&self, forecast: &ModelForecast) -> Result<()>;

    /// Append one training pair to calibration_history.
    async fn append_calibration_pair(&self, pair: &CalibrationPair) -> Result<()>;

    /// All resolved trades, oldest first.
    async fn resolutions(&self) -> Result<Vec<ResolutionRecord>>;

    /// The most recent `limit` resolved trades, newest first.
    async fn recent_resolutions(&self, limit: usize) -> Result<Vec<ResolutionRecord>>;

    /// All calibration pairs, oldest first.
    async fn calibration_pairs(&self) -> Result<Vec<CalibrationPair>>;

    /// Per-model forecast rows, oldest first, optionally filtered to one
    /// category.
    async fn model_forecasts(&self, category: Option<&str>) -> Result<Vec<ModelForecast>>;

    /// Distinct categories present in forecast history.
    async fn distinct_categories(&self) -> Result<Vec<String>>;

    /// The most recent `limit` live candidates, newest first.
    async fn recent_candidates(&self, limit: usize) -> Result<Vec<MarketCandidate>>;

    /// Read a checkpoint value from engine_state.
    async fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Upsert a checkpoint value into engine_state.
    async fn put_state(&self, key: &str, value: serde_json::Value) -> Result<()>;
}
