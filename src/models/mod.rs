use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A resolved market outcome together with the trade placed on it.
///
/// Appended once per resolution and never updated. `model_forecasts` maps
/// model name -> that model's probability at forecast time; on write it is
/// split into one model_forecast_log row per entry, so records loaded back
/// from the store carry an empty map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub market_id: String,
    pub question: String,
    pub category: String,
    pub forecast_prob: f64,
    pub actual_outcome: bool,
    pub edge_at_entry: f64,
    pub confidence: f64,
    pub evidence_quality: f64,
    pub stake_usd: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub holding_hours: f64,
    pub resolved_at: DateTime<Utc>,
    #[serde(default)]
    pub model_forecasts: HashMap<String, f64>,
}

/// One model's forecast for one market, joined with the resolved outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelForecast {
    pub model_name: String,
    pub market_id: String,
    pub category: String,
    pub forecast_prob: f64,
    pub actual_outcome: bool,
    pub recorded_at: DateTime<Utc>,
}

/// A (forecast, outcome) training pair for the recalibrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationPair {
    pub forecast_prob: f64,
    pub actual_outcome: bool,
    pub recorded_at: DateTime<Utc>,
    pub market_id: String,
}

/// A live market candidate produced by the scanning layer.
///
/// Read-only from this crate's perspective; the regime detector uses the
/// most recent window as its activity/momentum signal source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCandidate {
    pub market_id: String,
    pub implied_prob: f64, // current YES price
    pub model_prob: f64,   // our blended forecast
    pub edge: f64,
    pub created_at: DateTime<Utc>,
}

/// Which side of a binary market an order targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    BuyYes,
    BuyNo,
}

impl TradeSide {
    /// Sign convention for price adjustments: buying YES benefits from the
    /// YES price dropping before entry, buying NO from it rising.
    pub fn direction(&self) -> f64 {
        match self {
            TradeSide::BuyYes => 1.0,
            TradeSide::BuyNo => -1.0,
        }
    }
}
