use crate::error::is_undefined_table;
use crate::models::{CalibrationPair, MarketCandidate, ModelForecast, ResolutionRecord};
use crate::store::{tables, Store};
use crate::Result;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;

/// Postgres adapter over the shared agent tables.
///
/// The schema belongs to the wider agent, not this crate, and may be
/// partially migrated: undefined-table errors (SQLSTATE 42P01) degrade to
/// empty reads or skipped writes, warned once per table.
pub struct PgStore {
    pool: PgPool,
    warned_missing: Mutex<HashSet<String>>,
}

impl PgStore {
    /// Connect to Postgres.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        tracing::info!("Connected to Postgres");

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool (shared with the rest of the agent).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            warned_missing: Mutex::new(HashSet::new()),
        }
    }

    fn note_missing(&self, table: &str) {
        if let Ok(mut seen) = self.warned_missing.lock() {
            if seen.insert(table.to_string()) {
                tracing::warn!("Table {} does not exist, treating as empty", table);
            }
        }
    }
}

fn row_to_resolution(row: &sqlx::postgres::PgRow) -> ResolutionRecord {
    ResolutionRecord {
        market_id: row.get("market_id"),
        question: row.get("question"),
        category: row.get("category"),
        forecast_prob: row.get("forecast_prob"),
        actual_outcome: row.get("actual_outcome"),
        edge_at_entry: row.get("edge_at_entry"),
        confidence: row.get("confidence"),
        evidence_quality: row.get("evidence_quality"),
        stake_usd: row.get("stake_usd"),
        entry_price: row.get("entry_price"),
        exit_price: row.get("exit_price"),
        pnl: row.get("pnl"),
        holding_hours: row.get("holding_hours"),
        resolved_at: row.get("resolved_at"),
        model_forecasts: HashMap::new(),
    }
}

fn row_to_forecast(row: &sqlx::postgres::PgRow) -> ModelForecast {
    ModelForecast {
        model_name: row.get("model_name"),
        market_id: row.get("market_id"),
        category: row.get("category"),
        forecast_prob: row.get("forecast_prob"),
        actual_outcome: row.get("actual_outcome"),
        recorded_at: row.get("recorded_at"),
    }
}

const RESOLUTION_COLUMNS: &str = r#"
    market_id,
    COALESCE(question, '') AS question,
    COALESCE(category, '') AS category,
    COALESCE(forecast_prob, 0) AS forecast_prob,
    COALESCE(actual_outcome, FALSE) AS actual_outcome,
    COALESCE(edge_at_entry, 0) AS edge_at_entry,
    COALESCE(confidence, 0) AS confidence,
    COALESCE(evidence_quality, 0) AS evidence_quality,
    COALESCE(stake_usd, 0) AS stake_usd,
    COALESCE(entry_price, 0) AS entry_price,
    COALESCE(exit_price, 0) AS exit_price,
    COALESCE(pnl, 0) AS pnl,
    COALESCE(holding_hours, 0) AS holding_hours,
    resolved_at
"#;

const FORECAST_COLUMNS: &str = r#"
    model_name,
    market_id,
    COALESCE(category, '') AS category,
    COALESCE(forecast_prob, 0) AS forecast_prob,
    COALESCE(actual_outcome, FALSE) AS actual_outcome,
    recorded_at
"#;

#[async_trait]
impl Store for PgStore {
    async fn append_resolution(&self, record: &ResolutionRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO performance_log (
                market_id, question, category, forecast_prob, actual_outcome,
                edge_at_entry, confidence, evidence_quality, stake_usd,
                entry_price, exit_price, pnl, holding_hours, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&record.market_id)
        .bind(&record.question)
        .bind(&record.category)
        .bind(record.forecast_prob)
        .bind(record.actual_outcome)
        .bind(record.edge_at_entry)
        .bind(record.confidence)
        .bind(record.evidence_quality)
        .bind(record.stake_usd)
        .bind(record.entry_price)
        .bind(record.exit_price)
        .bind(record.pnl)
        .bind(record.holding_hours)
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!("Saved resolution for {}", record.market_id);
                Ok(())
            }
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::PERFORMANCE_LOG);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_model_forecast(&self, forecast: &ModelForecast) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO model_forecast_log (
                model_name, market_id, category, forecast_prob, actual_outcome, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&forecast.model_name)
        .bind(&forecast.market_id)
        .bind(&forecast.category)
        .bind(forecast.forecast_prob)
        .bind(forecast.actual_outcome)
        .bind(forecast.recorded_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::MODEL_FORECAST_LOG);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_calibration_pair(&self, pair: &CalibrationPair) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO calibration_history (forecast_prob, actual_outcome, recorded_at, market_id)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(pair.forecast_prob)
        .bind(pair.actual_outcome)
        .bind(pair.recorded_at)
        .bind(&pair.market_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::CALIBRATION_HISTORY);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolutions(&self) -> Result<Vec<ResolutionRecord>> {
        let query = format!(
            "SELECT {} FROM performance_log ORDER BY resolved_at ASC",
            RESOLUTION_COLUMNS
        );

        let rows = match sqlx::query(&query).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::PERFORMANCE_LOG);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(rows.iter().map(row_to_resolution).collect())
    }

    async fn recent_resolutions(&self, limit: usize) -> Result<Vec<ResolutionRecord>> {
        let query = format!(
            "SELECT {} FROM performance_log ORDER BY resolved_at DESC LIMIT $1",
            RESOLUTION_COLUMNS
        );

        let rows = match sqlx::query(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::PERFORMANCE_LOG);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(rows.iter().map(row_to_resolution).collect())
    }

    async fn calibration_pairs(&self) -> Result<Vec<CalibrationPair>> {
        let rows = match sqlx::query(
            r#"
            SELECT COALESCE(forecast_prob, 0) AS forecast_prob,
                   COALESCE(actual_outcome, FALSE) AS actual_outcome,
                   recorded_at,
                   market_id
            FROM calibration_history
            ORDER BY recorded_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::CALIBRATION_HISTORY);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(rows
            .iter()
            .map(|row| CalibrationPair {
                forecast_prob: row.get("forecast_prob"),
                actual_outcome: row.get("actual_outcome"),
                recorded_at: row.get("recorded_at"),
                market_id: row.get("market_id"),
            })
            .collect())
    }

    async fn model_forecasts(&self, category: Option<&str>) -> Result<Vec<ModelForecast>> {
        let result = match category {
            Some(cat) => {
                let query = format!(
                    "SELECT {} FROM model_forecast_log WHERE category = $1 ORDER BY recorded_at ASC",
                    FORECAST_COLUMNS
                );
                sqlx::query(&query).bind(cat).fetch_all(&self.pool).await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM model_forecast_log ORDER BY recorded_at ASC",
                    FORECAST_COLUMNS
                );
                sqlx::query(&query).fetch_all(&self.pool).await
            }
        };

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::MODEL_FORECAST_LOG);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(rows.iter().map(row_to_forecast).collect())
    }

    async fn distinct_categories(&self) -> Result<Vec<String>> {
        let rows = match sqlx::query(
            r#"
            SELECT DISTINCT category
            FROM model_forecast_log
            WHERE category IS NOT NULL AND category <> ''
            ORDER BY category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::MODEL_FORECAST_LOG);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(rows.iter().map(|row| row.get("category")).collect())
    }

    async fn recent_candidates(&self, limit: usize) -> Result<Vec<MarketCandidate>> {
        let rows = match sqlx::query(
            r#"
            SELECT market_id,
                   COALESCE(implied_prob, 0) AS implied_prob,
                   COALESCE(model_prob, 0) AS model_prob,
                   COALESCE(edge, 0) AS edge,
                   created_at
            FROM candidates
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::CANDIDATES);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(rows
            .iter()
            .map(|row| MarketCandidate {
                market_id: row.get("market_id"),
                implied_prob: row.get("implied_prob"),
                model_prob: row.get("model_prob"),
                edge: row.get("edge"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = match sqlx::query("SELECT value FROM engine_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::ENGINE_STATE);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(row.map(|r| r.get("value")))
    }

    async fn put_state(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO engine_state (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!("Saved engine state {}", key);
                Ok(())
            }
            Err(e) if is_undefined_table(&e) => {
                self.note_missing(tables::ENGINE_STATE);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn get_test_store() -> PgStore {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/edgebot_test".to_string());

        let store = PgStore::new(&database_url)
            .await
            .expect("Failed to connect to test database");

        ensure_test_schema(&store.pool).await;
        store
    }

    /// The schema is owned by the wider agent; tests create a minimal copy.
    async fn ensure_test_schema(pool: &PgPool) {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS performance_log (
                id BIGSERIAL PRIMARY KEY,
                market_id TEXT NOT NULL,
                question TEXT,
                category TEXT,
                forecast_prob DOUBLE PRECISION,
                actual_outcome BOOLEAN,
                edge_at_entry DOUBLE PRECISION,
                confidence DOUBLE PRECISION,
                evidence_quality DOUBLE PRECISION,
                stake_usd DOUBLE PRECISION,
                entry_price DOUBLE PRECISION,
                exit_price DOUBLE PRECISION,
                pnl DOUBLE PRECISION,
                holding_hours DOUBLE PRECISION,
                resolved_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS model_forecast_log (
                id BIGSERIAL PRIMARY KEY,
                model_name TEXT NOT NULL,
                market_id TEXT NOT NULL,
                category TEXT,
                forecast_prob DOUBLE PRECISION,
                actual_outcome BOOLEAN,
                recorded_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS calibration_history (
                id BIGSERIAL PRIMARY KEY,
                forecast_prob DOUBLE PRECISION,
                actual_outcome BOOLEAN,
                recorded_at TIMESTAMPTZ NOT NULL,
                market_id TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS engine_state (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id BIGSERIAL PRIMARY KEY,
                market_id TEXT NOT NULL,
                implied_prob DOUBLE PRECISION,
                model_prob DOUBLE PRECISION,
                edge DOUBLE PRECISION,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(pool).await.unwrap();
        }
    }

    async fn clear_tables(store: &PgStore) {
        for table in [
            tables::PERFORMANCE_LOG,
            tables::MODEL_FORECAST_LOG,
            tables::CALIBRATION_HISTORY,
            tables::ENGINE_STATE,
            tables::CANDIDATES,
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&store.pool)
                .await
                .unwrap();
        }
    }

    fn sample_resolution(market_id: &str) -> ResolutionRecord {
        ResolutionRecord {
            market_id: market_id.to_string(),
            question: "Test question".to_string(),
            category: "politics".to_string(),
            forecast_prob: 0.6,
            actual_outcome: true,
            edge_at_entry: 0.05,
            confidence: 0.7,
            evidence_quality: 0.5,
            stake_usd: 10.0,
            entry_price: 0.55,
            exit_price: 1.0,
            pnl: 8.2,
            holding_hours: 48.0,
            resolved_at: Utc::now(),
            model_forecasts: HashMap::new(),
        }
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_save_and_load_resolution() {
        let store = get_test_store().await;
        clear_tables(&store).await;

        store.append_resolution(&sample_resolution("mkt-1")).await.unwrap();

        let records = store.resolutions().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].market_id, "mkt-1");
        assert_eq!(records[0].pnl, 8.2);

        clear_tables(&store).await;
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_state_upsert_overwrites() {
        let store = get_test_store().await;
        clear_tables(&store).await;

        store
            .put_state("calibrator_state", serde_json::json!({"version": 1, "a": 0.1}))
            .await
            .unwrap();
        store
            .put_state("calibrator_state", serde_json::json!({"version": 1, "a": 0.2}))
            .await
            .unwrap();

        let value = store.get_state("calibrator_state").await.unwrap().unwrap();
        assert_eq!(value["a"], 0.2);

        clear_tables(&store).await;
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_missing_table_reads_empty() {
        let store = get_test_store().await;
        clear_tables(&store).await;

        sqlx::query("DROP TABLE IF EXISTS candidates")
            .execute(&store.pool)
            .await
            .unwrap();

        let candidates = store.recent_candidates(10).await.unwrap();
        assert!(candidates.is_empty());

        // Second read hits the same soft-miss path without re-warning
        let candidates = store.recent_candidates(10).await.unwrap();
        assert!(candidates.is_empty());

        ensure_test_schema(&store.pool).await;
    }
}
