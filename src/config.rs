use crate::Result;
use serde::Deserialize;
use std::collections::HashMap;

/// Calibration feedback loop settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub retrain_interval: u32,     // Resolutions between retrain attempts
    pub min_training_pairs: usize, // Pairs required before fitting
    pub min_model_samples: usize,  // Per-model floor for ad hoc weights
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            retrain_interval: 10,
            min_training_pairs: 30,
            min_model_samples: 5,
        }
    }
}

/// Adaptive model weighting settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeightingConfig {
    pub default_weights: HashMap<String, f64>,
    pub min_samples: usize,       // Per-model floor to count as learned
    pub full_trust_samples: usize, // Sample count where blend saturates at 1.0
    pub learned_source_threshold: f64, // Blend above this tags weights "learned"
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            default_weights: HashMap::from([
                ("anthropic".to_string(), 0.35),
                ("openai".to_string(), 0.35),
                ("baseline".to_string(), 0.30),
            ]),
            min_samples: 5,
            full_trust_samples: 50,
            learned_source_threshold: 0.95,
        }
    }
}

/// Performance tracker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub starting_bankroll: f64,   // Equity-curve base for drawdown
    pub trading_days_per_year: f64, // Sharpe annualization
    pub min_brier_samples: usize, // Pairs required to report calibration
    pub short_window_days: i64,
    pub long_window_days: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            starting_bankroll: 1000.0,
            trading_days_per_year: 252.0,
            min_brier_samples: 5,
            short_window_days: 7,
            long_window_days: 30,
        }
    }
}

/// Regime detector thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub trade_lookback: usize,     // Recent trades examined (newest first)
    pub candidate_lookback: usize, // Recent candidates examined
    pub min_trades: usize,         // Below this -> NORMAL, low confidence
    pub volatility_threshold: f64, // PnL stdev (USD) for HIGH_VOLATILITY
    pub spread_threshold: f64,     // Mean |model - implied| dislocation
    pub momentum_threshold: f64,   // Implied-prob drift across the window
    pub oscillation_threshold: f64, // Mean successive implied-prob move
    pub streak_threshold: i32,     // Unbroken run length for TRENDING
    pub win_rate_band: (f64, f64), // Neutral band for MEAN_REVERTING
    pub min_candidates: usize,     // Below this -> LOW_ACTIVITY
    pub stale_after_hours: f64,    // Newest candidate older -> LOW_ACTIVITY
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            trade_lookback: 20,
            candidate_lookback: 50,
            min_trades: 5,
            volatility_threshold: 15.0,
            spread_threshold: 0.12,
            momentum_threshold: 0.04,
            oscillation_threshold: 0.03,
            streak_threshold: 4,
            win_rate_band: (0.45, 0.55),
            min_candidates: 5,
            stale_after_hours: 12.0,
        }
    }
}

/// Smart entry calculator settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    pub market_order_edge: f64,   // |edge| above this -> take the market
    pub urgent_hours: f64,        // Time-to-resolution below this -> market
    pub enter_now_threshold: f64, // Summed score above this -> aggressive plan
    pub patient_threshold: f64,   // Summed score below this -> patient plan
    pub max_improvement: f64,     // Cap on patient price improvement
    pub vwap_scale: f64,          // Gain on VWAP divergence score
    pub momentum_scale: f64,      // Gain on momentum score
    pub depth_weight: f64,        // Weight on orderbook depth imbalance
    pub flow_weight: f64,         // Weight on buy/sell flow imbalance
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            market_order_edge: 0.15,
            urgent_hours: 24.0,
            enter_now_threshold: 0.3,
            patient_threshold: -0.2,
            max_improvement: 0.03,
            vwap_scale: 5.0,
            momentum_scale: 3.0,
            depth_weight: 0.25,
            flow_weight: 0.2,
        }
    }
}

/// Top-level configuration for the decision layer.
///
/// Every section defaults to sane values; `load` layers an optional
/// `decision.toml` and `DECISION_`-prefixed environment variables on top
/// (e.g. `DECISION_REGIME__MIN_TRADES=10`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub feedback: FeedbackConfig,
    pub weighting: WeightingConfig,
    pub tracker: TrackerConfig,
    pub regime: RegimeConfig,
    pub entry: EntryConfig,
}

impl DecisionConfig {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("decision").required(false))
            .add_source(config::Environment::with_prefix("DECISION").separator("__"))
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.feedback.retrain_interval == 0 {
            return Err(crate::AgentError::Config(
                "retrain_interval must be at least 1".to_string(),
            ));
        }
        if self.weighting.full_trust_samples == 0 {
            return Err(crate::AgentError::Config(
                "full_trust_samples must be at least 1".to_string(),
            ));
        }
        if self.entry.enter_now_threshold <= self.entry.patient_threshold {
            return Err(crate::AgentError::Config(
                "enter_now_threshold must exceed patient_threshold".to_string(),
            ));
        }
        let (lo, hi) = self.regime.win_rate_band;
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
            return Err(crate::AgentError::Config(
                "win_rate_band must be an ordered pair within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
