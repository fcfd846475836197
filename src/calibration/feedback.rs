//! Resolution ingestion and calibrator retraining.
//!
//! Every resolved market flows through [`CalibrationFeedbackLoop::record_resolution`],
//! which fans the record out to the performance log, the calibration history
//! and the per-model forecast log, then counts down to the next retrain.

use crate::config::FeedbackConfig;
use crate::models::{CalibrationPair, ModelForecast, ResolutionRecord};
use crate::store::Store;
use crate::weighting::inverse_brier_weights;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::recalibrator::Recalibrator;

/// State key the calibrator checkpoint is persisted under.
pub const CALIBRATOR_STATE_KEY: &str = "calibrator_state";

/// Bump when the checkpoint layout changes; stale versions are discarded on load.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Persisted calibrator coefficients plus fit provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratorCheckpoint {
    pub version: u32,
    pub n_samples: usize,
    pub brier_score: f64,
    pub a: f64,
    pub b: f64,
    pub updated_at: DateTime<Utc>,
}

impl CalibratorCheckpoint {
    /// Coefficients in the form a recalibrator resumes from.
    pub fn stats(&self) -> super::recalibrator::CalibratorStats {
        super::recalibrator::CalibratorStats {
            n_samples: self.n_samples,
            brier_score: self.brier_score,
            a: self.a,
            b: self.b,
        }
    }
}

/// Closes the loop from resolved markets back into forecast calibration.
pub struct CalibrationFeedbackLoop {
    store: Arc<dyn Store>,
    recalibrator: Box<dyn Recalibrator>,
    config: FeedbackConfig,
    resolutions_since_retrain: u32,
}

impl CalibrationFeedbackLoop {
    pub fn new(
        store: Arc<dyn Store>,
        recalibrator: Box<dyn Recalibrator>,
        config: FeedbackConfig,
    ) -> Self {
        Self {
            store,
            recalibrator,
            config,
            resolutions_since_retrain: 0,
        }
    }

    /// Record one resolved market: append to the performance log, the
    /// calibration history and the model forecast log, then retrain the
    /// calibrator if enough resolutions have accumulated since the last
    /// attempt.
    pub async fn record_resolution(&mut self, record: &ResolutionRecord) -> Result<()> {
        self.store.append_resolution(record).await?;

        self.store
            .append_calibration_pair(&CalibrationPair {
                forecast_prob: record.forecast_prob,
                actual_outcome: record.actual_outcome,
                recorded_at: record.resolved_at,
                market_id: record.market_id.clone(),
            })
            .await?;

        for (model_name, forecast_prob) in &record.model_forecasts {
            self.store
                .append_model_forecast(&ModelForecast {
                    model_name: model_name.clone(),
                    market_id: record.market_id.clone(),
                    category: record.category.clone(),
                    forecast_prob: *forecast_prob,
                    actual_outcome: record.actual_outcome,
                    recorded_at: record.resolved_at,
                })
                .await?;
        }

        debug!(
            "📋 Recorded resolution for {} ({}, pnl ${:.2})",
            record.market_id, record.category, record.pnl
        );

        self.resolutions_since_retrain += 1;
        if self.resolutions_since_retrain >= self.config.retrain_interval {
            // Counter resets whether or not the retrain goes ahead, so a
            // string of short-data attempts does not retrain on every
            // subsequent resolution.
            self.resolutions_since_retrain = 0;
            let retrained = self.retrain_calibrator().await?;
            if retrained {
                info!("🎯 Calibrator retrained after {} resolutions", self.config.retrain_interval);
            }
        }

        Ok(())
    }

    /// Refit the calibrator on the full calibration history and persist a
    /// checkpoint. Returns false (leaving prior state untouched) when there
    /// is not enough history or the fit is rejected.
    pub async fn retrain_calibrator(&mut self) -> Result<bool> {
        let pairs = self.store.calibration_pairs().await?;
        if pairs.len() < self.config.min_training_pairs {
            debug!(
                "Skipping retrain: {} calibration pairs, need {}",
                pairs.len(),
                self.config.min_training_pairs
            );
            return Ok(false);
        }

        let samples: Vec<(f64, bool)> = pairs
            .iter()
            .map(|p| (p.forecast_prob, p.actual_outcome))
            .collect();

        if !self.recalibrator.fit(&samples) {
            warn!("Calibrator fit rejected on {} pairs, keeping previous state", samples.len());
            return Ok(false);
        }

        let stats = self.recalibrator.stats();
        let checkpoint = CalibratorCheckpoint {
            version: CHECKPOINT_VERSION,
            n_samples: stats.n_samples,
            brier_score: stats.brier_score,
            a: stats.a,
            b: stats.b,
            updated_at: Utc::now(),
        };
        self.store
            .put_state(CALIBRATOR_STATE_KEY, serde_json::to_value(&checkpoint)?)
            .await?;

        info!(
            "Calibrator fit: {} samples, brier {:.4}, a={:.3} b={:.3}",
            stats.n_samples, stats.brier_score, stats.a, stats.b
        );
        Ok(true)
    }

    /// Ad hoc inverse-Brier weights for one category. Models with fewer than
    /// the configured minimum samples are skipped; an empty map just means
    /// nothing qualifies yet.
    pub async fn get_model_weights(&self, category: &str) -> Result<HashMap<String, f64>> {
        let forecasts = self.store.model_forecasts(Some(category)).await?;

        let mut tallies: HashMap<String, (usize, f64)> = HashMap::new();
        for forecast in &forecasts {
            let prob = if forecast.forecast_prob.is_finite() {
                forecast.forecast_prob
            } else {
                0.0
            };
            let outcome = if forecast.actual_outcome { 1.0 } else { 0.0 };
            let entry = tallies.entry(forecast.model_name.clone()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += (prob - outcome) * (prob - outcome);
        }

        let briers: HashMap<String, f64> = tallies
            .into_iter()
            .filter(|(_, (n, _))| *n >= self.config.min_model_samples)
            .map(|(model, (n, sse))| (model, sse / n as f64))
            .collect();

        Ok(inverse_brier_weights(&briers))
    }

    /// Load the persisted calibrator checkpoint, if one exists and its
    /// version matches.
    pub async fn load_checkpoint(&self) -> Result<Option<CalibratorCheckpoint>> {
        let Some(value) = self.store.get_state(CALIBRATOR_STATE_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<CalibratorCheckpoint>(value) {
            Ok(checkpoint) if checkpoint.version == CHECKPOINT_VERSION => Ok(Some(checkpoint)),
            Ok(checkpoint) => {
                warn!(
                    "Discarding calibrator checkpoint with version {} (expected {})",
                    checkpoint.version, CHECKPOINT_VERSION
                );
                Ok(None)
            }
            Err(e) => {
                warn!("Unreadable calibrator checkpoint, ignoring: {}", e);
                Ok(None)
            }
        }
    }

    /// Apply the current calibrator to a raw forecast probability.
    pub fn recalibrate(&self, prob: f64) -> f64 {
        self.recalibrator.apply(prob)
    }
}
