use crate::models::{CalibrationPair, MarketCandidate, ModelForecast, ResolutionRecord};
use crate::store::{tables, Store};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// In-memory store for tests and offline demos.
///
/// Behaves like a fully migrated Postgres store, except that individual
/// tables can be switched off with `without_table` to simulate a partially
/// migrated database: reads against a disabled table come back empty and
/// writes are dropped, mirroring the adapter contract.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    resolutions: Vec<ResolutionRecord>,
    forecasts: Vec<ModelForecast>,
    pairs: Vec<CalibrationPair>,
    candidates: Vec<MarketCandidate>,
    state: HashMap<String, serde_json::Value>,
    disabled: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable a table by name (see `store::tables`).
    pub fn without_table(self, table: &str) -> Self {
        self.lock().disabled.insert(table.to_string());
        self
    }

    /// Seed a live candidate. Candidates are produced by the scanning layer
    /// in production, so the trait has no append for them.
    pub fn insert_candidate(&self, candidate: MarketCandidate) {
        let mut inner = self.lock();
        if inner.disabled.contains(tables::CANDIDATES) {
            return;
        }
        inner.candidates.push(candidate);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enabled(inner: &Inner, table: &str) -> bool {
        !inner.disabled.contains(table)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_resolution(&self, record: &ResolutionRecord) -> Result<()> {
        let mut inner = self.lock();
        if Self::enabled(&inner, tables::PERFORMANCE_LOG) {
            inner.resolutions.push(record.clone());
        } else {
            tracing::debug!("performance_log disabled, dropping write");
        }
        Ok(())
    }

    async fn append_model_forecast(&self, forecast: &ModelForecast) -> Result<()> {
        let mut inner = self.lock();
        if Self::enabled(&inner, tables::MODEL_FORECAST_LOG) {
            inner.forecasts.push(forecast.clone());
        }
        Ok(())
    }

    async fn append_calibration_pair(&self, pair: &CalibrationPair) -> Result<()> {
        let mut inner = self.lock();
        if Self::enabled(&inner, tables::CALIBRATION_HISTORY) {
            inner.pairs.push(pair.clone());
        }
        Ok(())
    }

    async fn resolutions(&self) -> Result<Vec<ResolutionRecord>> {
        let inner = self.lock();
        if !Self::enabled(&inner, tables::PERFORMANCE_LOG) {
            return Ok(Vec::new());
        }
        let mut records = inner.resolutions.clone();
        records.sort_by_key(|r| r.resolved_at);
        Ok(records)
    }

    async fn recent_resolutions(&self, limit: usize) -> Result<Vec<ResolutionRecord>> {
        let inner = self.lock();
        if !Self::enabled(&inner, tables::PERFORMANCE_LOG) {
            return Ok(Vec::new());
        }
        let mut records = inner.resolutions.clone();
        records.sort_by_key(|r| std::cmp::Reverse(r.resolved_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn calibration_pairs(&self) -> Result<Vec<CalibrationPair>> {
        let inner = self.lock();
        if !Self::enabled(&inner, tables::CALIBRATION_HISTORY) {
            return Ok(Vec::new());
        }
        let mut pairs = inner.pairs.clone();
        pairs.sort_by_key(|p| p.recorded_at);
        Ok(pairs)
    }

    async fn model_forecasts(&self, category: Option<&str>) -> Result<Vec<ModelForecast>> {
        let inner = self.lock();
        if !Self::enabled(&inner, tables::MODEL_FORECAST_LOG) {
            return Ok(Vec::new());
        }
        let mut forecasts: Vec<ModelForecast> = inner
            .forecasts
            .iter()
            .filter(|f| category.map_or(true, |c| f.category == c))
            .cloned()
            .collect();
        forecasts.sort_by_key(|f| f.recorded_at);
        Ok(forecasts)
    }

    async fn distinct_categories(&self) -> Result<Vec<String>> {
        let inner = self.lock();
        if !Self::enabled(&inner, tables::MODEL_FORECAST_LOG) {
            return Ok(Vec::new());
        }
        let mut categories: Vec<String> = inner
            .forecasts
            .iter()
            .map(|f| f.category.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        categories.sort();
        Ok(categories)
    }

    async fn recent_candidates(&self, limit: usize) -> Result<Vec<MarketCandidate>> {
        let inner = self.lock();
        if !Self::enabled(&inner, tables::CANDIDATES) {
            return Ok(Vec::new());
        }
        let mut candidates = inner.candidates.clone();
        candidates.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let inner = self.lock();
        if !Self::enabled(&inner, tables::ENGINE_STATE) {
            return Ok(None);
        }
        Ok(inner.state.get(key).cloned())
    }

    async fn put_state(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut inner = self.lock();
        if Self::enabled(&inner, tables::ENGINE_STATE) {
            inner.state.insert(key.to_string(), value);
        }
        Ok(())
    }
}
