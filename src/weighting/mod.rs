//! Adaptive per-category model weighting.
//!
//! Ensemble weights start at configured defaults and shift toward learned
//! inverse-Brier weights as per-model evidence accumulates. The blend is
//! driven by the *least*-observed model so that one well-sampled model
//! cannot drag thinly-sampled peers onto learned weights prematurely.
//!
//! ## Blending
//!
//! - `blend = min(1, min_sample_count / full_trust_samples)`
//! - `weight = blend * learned + (1 - blend) * default` per configured model
//! - the final vector is renormalized to sum to 1

use crate::config::WeightingConfig;
use crate::models::ModelForecast;
use crate::store::Store;
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Synthetic category aggregating all forecast history.
pub const ALL_CATEGORY: &str = "ALL";

/// Where a model's weight came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightSource {
    Learned,
    Blended,
    Default,
}

/// One model's weight within a category.
#[derive(Debug, Clone, Serialize)]
pub struct ModelWeight {
    pub model: String,
    pub weight: f64,
    pub source: WeightSource,
    pub brier_score: Option<f64>,
    pub n_samples: usize,
    pub confidence: f64,
}

/// Weight vector for one category.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveWeightResult {
    pub category: String,
    pub weights: HashMap<String, f64>,
    pub detail: Vec<ModelWeight>,
    pub blend_factor: f64,
    pub data_available: bool,
}

/// Inverse-Brier weights: weight ∝ 1 / max(brier, floor), normalized to 1.
///
/// The floor keeps a near-perfect model from absorbing the entire vector.
pub fn inverse_brier_weights(briers: &HashMap<String, f64>) -> HashMap<String, f64> {
    const BRIER_FLOOR: f64 = 0.001;

    let mut weights: HashMap<String, f64> = briers
        .iter()
        .map(|(model, brier)| (model.clone(), 1.0 / brier.max(BRIER_FLOOR)))
        .collect();

    let total: f64 = weights.values().sum();
    if total > 0.0 {
        for weight in weights.values_mut() {
            *weight /= total;
        }
    }
    weights
}

#[derive(Debug, Clone, Copy, Default)]
struct ModelTally {
    n: usize,
    squared_error: f64,
}

impl ModelTally {
    fn brier(&self) -> f64 {
        if self.n == 0 {
            return 0.25;
        }
        self.squared_error / self.n as f64
    }
}

fn tally_forecasts(forecasts: &[ModelForecast]) -> HashMap<String, ModelTally> {
    let mut tallies: HashMap<String, ModelTally> = HashMap::new();
    for forecast in forecasts {
        let prob = if forecast.forecast_prob.is_finite() {
            forecast.forecast_prob
        } else {
            0.0
        };
        let outcome = if forecast.actual_outcome { 1.0 } else { 0.0 };
        let tally = tallies.entry(forecast.model_name.clone()).or_default();
        tally.n += 1;
        tally.squared_error += (prob - outcome) * (prob - outcome);
    }
    tallies
}

/// Blends learned per-model accuracy with configured default weights.
pub struct AdaptiveModelWeighter {
    store: Arc<dyn Store>,
    config: WeightingConfig,
}

impl AdaptiveModelWeighter {
    pub fn new(store: Arc<dyn Store>, config: WeightingConfig) -> Self {
        Self { store, config }
    }

    /// Weight vector for one category (`ALL_CATEGORY` spans all history).
    pub async fn get_weights(&self, category: &str) -> Result<AdaptiveWeightResult> {
        let filter = if category == ALL_CATEGORY {
            None
        } else {
            Some(category)
        };
        let forecasts = self.store.model_forecasts(filter).await?;
        Ok(self.weights_from_history(category, &forecasts))
    }

    /// Weight vectors for every category seen in forecast history, plus the
    /// synthetic ALL aggregate.
    pub async fn get_all_category_weights(&self) -> Result<HashMap<String, AdaptiveWeightResult>> {
        let mut results = HashMap::new();
        for category in self.store.distinct_categories().await? {
            let result = self.get_weights(&category).await?;
            results.insert(category, result);
        }
        results.insert(ALL_CATEGORY.to_string(), self.get_weights(ALL_CATEGORY).await?);
        Ok(results)
    }

    fn weights_from_history(
        &self,
        category: &str,
        forecasts: &[ModelForecast],
    ) -> AdaptiveWeightResult {
        let tallies = tally_forecasts(forecasts);

        let qualified: HashMap<String, ModelTally> = tallies
            .iter()
            .filter(|(_, tally)| tally.n >= self.config.min_samples)
            .map(|(model, tally)| (model.clone(), *tally))
            .collect();

        if qualified.is_empty() {
            tracing::debug!(
                "No model with >= {} samples in {}, using defaults",
                self.config.min_samples,
                category
            );
            return self.default_result(category, &tallies);
        }

        let min_count = qualified.values().map(|t| t.n).min().unwrap_or(0);
        let blend =
            (min_count as f64 / self.config.full_trust_samples.max(1) as f64).min(1.0);

        let briers: HashMap<String, f64> = qualified
            .iter()
            .map(|(model, tally)| (model.clone(), tally.brier()))
            .collect();
        let learned = inverse_brier_weights(&briers);

        let mut raw: Vec<(String, f64, WeightSource, Option<f64>, usize)> = Vec::new();
        for (model, default_weight) in &self.config.default_weights {
            match learned.get(model) {
                Some(learned_weight) => {
                    let weight = blend * learned_weight + (1.0 - blend) * default_weight;
                    let source = if blend >= self.config.learned_source_threshold {
                        WeightSource::Learned
                    } else {
                        WeightSource::Blended
                    };
                    let tally = qualified.get(model).copied().unwrap_or_default();
                    raw.push((model.clone(), weight, source, Some(tally.brier()), tally.n));
                }
                None => {
                    let n = tallies.get(model).map(|t| t.n).unwrap_or(0);
                    raw.push((model.clone(), *default_weight, WeightSource::Default, None, n));
                }
            }
        }

        let total: f64 = raw.iter().map(|(_, w, _, _, _)| *w).sum();
        if total > 0.0 {
            for entry in &mut raw {
                entry.1 /= total;
            }
        }

        let full_trust = self.config.full_trust_samples.max(1) as f64;
        let detail: Vec<ModelWeight> = raw
            .iter()
            .map(|(model, weight, source, brier, n)| ModelWeight {
                model: model.clone(),
                weight: *weight,
                source: *source,
                brier_score: *brier,
                n_samples: *n,
                confidence: (*n as f64 / full_trust).min(1.0),
            })
            .collect();

        AdaptiveWeightResult {
            category: category.to_string(),
            weights: raw.into_iter().map(|(model, weight, ..)| (model, weight)).collect(),
            detail,
            blend_factor: blend,
            data_available: true,
        }
    }

    fn default_result(
        &self,
        category: &str,
        tallies: &HashMap<String, ModelTally>,
    ) -> AdaptiveWeightResult {
        let total: f64 = self.config.default_weights.values().sum();
        let weights: HashMap<String, f64> = self
            .config
            .default_weights
            .iter()
            .map(|(model, weight)| {
                let normalized = if total > 0.0 { weight / total } else { 0.0 };
                (model.clone(), normalized)
            })
            .collect();

        let detail: Vec<ModelWeight> = weights
            .iter()
            .map(|(model, weight)| ModelWeight {
                model: model.clone(),
                weight: *weight,
                source: WeightSource::Default,
                brier_score: None,
                n_samples: tallies.get(model).map(|t| t.n).unwrap_or(0),
                confidence: 0.0,
            })
            .collect();

        AdaptiveWeightResult {
            category: category.to_string(),
            weights,
            detail,
            blend_factor: 0.0,
            data_available: false,
        }
    }
}
