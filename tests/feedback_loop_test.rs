use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use edgebot::calibration::{CalibrationFeedbackLoop, PlattRecalibrator, CHECKPOINT_VERSION};
use edgebot::config::DecisionConfig;
use edgebot::entry::{EntryStrategy, MarketMicrostructure, SmartEntryCalculator};
use edgebot::models::{MarketCandidate, ResolutionRecord, TradeSide};
use edgebot::performance::PerformanceTracker;
use edgebot::regime::{Regime, RegimeDetector};
use edgebot::store::{MemoryStore, Store};
use edgebot::weighting::{AdaptiveModelWeighter, ALL_CATEGORY};

/// Seeded resolution: every 3rd trade loses, categories alternate, the
/// anthropic model forecasts sharper than openai.
fn seeded_resolution(i: usize, base: chrono::DateTime<Utc>) -> ResolutionRecord {
    let outcome = i % 3 != 0;
    let category = if i % 2 == 0 { "politics" } else { "crypto" };
    let forecast_prob = if outcome {
        0.65 + (i % 10) as f64 * 0.02
    } else {
        0.35 - (i % 5) as f64 * 0.02
    };

    ResolutionRecord {
        market_id: format!("mkt-{}", i),
        question: format!("Will event {} happen?", i),
        category: category.to_string(),
        forecast_prob,
        actual_outcome: outcome,
        edge_at_entry: 0.06,
        confidence: 0.7,
        evidence_quality: 0.6,
        stake_usd: 20.0,
        entry_price: 0.55,
        exit_price: if outcome { 1.0 } else { 0.0 },
        pnl: if outcome { 8.0 } else { -10.0 },
        holding_hours: 24.0,
        resolved_at: base + Duration::hours(i as i64),
        model_forecasts: HashMap::from([
            (
                "anthropic".to_string(),
                if outcome { 0.82 } else { 0.22 },
            ),
            (
                "openai".to_string(),
                if outcome { 0.64 } else { 0.42 },
            ),
        ]),
    }
}

fn balanced_micro(market_id: &str, price: f64) -> MarketMicrostructure {
    MarketMicrostructure {
        market_id: market_id.to_string(),
        current_price: price,
        best_bid: price - 0.01,
        best_ask: price + 0.01,
        vwap: price,
        bid_depth: 1000.0,
        ask_depth: 1000.0,
        recent_buy_volume: 500.0,
        recent_sell_volume: 500.0,
        momentum: 0.0,
        hours_to_resolution: 72.0,
    }
}

#[tokio::test]
async fn test_full_decision_loop() {
    let _ = tracing_subscriber::fmt::try_init();
    println!("=== Full decision loop over one seeded history ===\n");

    let config = DecisionConfig::default();
    let store = Arc::new(MemoryStore::new());
    let mut feedback = CalibrationFeedbackLoop::new(
        store.clone(),
        Box::new(PlattRecalibrator::new()),
        config.feedback.clone(),
    );

    // 1. Record 30 resolutions through the feedback loop
    println!("1. Recording 30 resolutions...");
    let base = Utc::now() - Duration::days(20);
    for i in 0..30 {
        feedback
            .record_resolution(&seeded_resolution(i, base))
            .await
            .unwrap();
    }
    assert_eq!(store.resolutions().await.unwrap().len(), 30);
    assert_eq!(store.calibration_pairs().await.unwrap().len(), 30);
    // Two model forecasts per resolution
    assert_eq!(store.model_forecasts(None).await.unwrap().len(), 60);
    println!("   ✓ 30 performance rows, 30 pairs, 60 model forecasts");

    // 2. The interval retrain at resolution 30 had enough pairs to fit
    println!("\n2. Checking calibrator checkpoint...");
    let checkpoint = feedback
        .load_checkpoint()
        .await
        .unwrap()
        .expect("30 pairs should have produced a checkpoint");
    assert_eq!(checkpoint.version, CHECKPOINT_VERSION);
    assert_eq!(checkpoint.n_samples, 30);
    assert!(checkpoint.brier_score > 0.0 && checkpoint.brier_score < 0.25);
    println!(
        "   ✓ checkpoint v{}: {} samples, brier {:.4}",
        checkpoint.version, checkpoint.n_samples, checkpoint.brier_score
    );

    // 3. Performance snapshot over the same history
    println!("\n3. Computing performance snapshot...");
    let tracker = PerformanceTracker::new(store.clone(), config.tracker.clone());
    let snapshot = tracker.compute().await;
    assert_eq!(snapshot.trade_stats.total_trades, 30);
    // 20 wins / 10 losses
    assert!(snapshot.trade_stats.win_rate >= 0.6 && snapshot.trade_stats.win_rate <= 0.7);
    assert!(snapshot.trade_stats.total_pnl > 0.0);
    assert!(snapshot.sharpe_ratio != 0.0);
    assert_eq!(snapshot.equity_curve.len(), 30);

    // Leaderboard: both categories present, strictly descending, ranks 1..k
    assert_eq!(snapshot.leaderboard.len(), 2);
    for (i, entry) in snapshot.leaderboard.iter().enumerate() {
        assert_eq!(entry.rank, i + 1);
        if i > 0 {
            assert!(entry.score <= snapshot.leaderboard[i - 1].score);
        }
    }
    assert!(snapshot.calibration_brier.is_some());
    println!(
        "   ✓ win rate {:.2}, brier {:.4}, {} leaderboard rows",
        snapshot.trade_stats.win_rate,
        snapshot.calibration_brier.unwrap(),
        snapshot.leaderboard.len()
    );

    // 4. Adaptive weights learned from the forecast log
    println!("\n4. Querying adaptive weights...");
    let weighter = AdaptiveModelWeighter::new(store.clone(), config.weighting.clone());
    let politics = weighter.get_weights("politics").await.unwrap();
    assert!(politics.data_available);
    let total: f64 = politics.weights.values().sum();
    assert!((total - 1.0).abs() < 0.01);
    // 15 samples per model in the category: blend partway to learned
    assert!((politics.blend_factor - 0.3).abs() < 1e-9);
    assert!(politics.weights["anthropic"] > politics.weights["openai"]);

    let per_category = weighter.get_all_category_weights().await.unwrap();
    assert!(per_category.contains_key("politics"));
    assert!(per_category.contains_key("crypto"));
    assert!(per_category.contains_key(ALL_CATEGORY));
    println!("   ✓ weights sum to 1, anthropic favored, ALL aggregate present");

    // Ad hoc inverse-brier weights agree on the ordering
    let adhoc = feedback.get_model_weights("politics").await.unwrap();
    assert!(adhoc["anthropic"] > adhoc["openai"]);

    // 5. Regime over the same history plus a fresh balanced pipeline
    println!("\n5. Detecting regime...");
    for i in 0..8 {
        store.insert_candidate(MarketCandidate {
            market_id: format!("cand-{}", i),
            implied_prob: 0.5,
            model_prob: 0.52,
            edge: 0.02,
            created_at: Utc::now() - Duration::minutes(i * 15),
        });
    }
    let detector = RegimeDetector::new(store.clone(), config.regime.clone());
    let state = detector.detect().await.unwrap();
    assert_eq!(state.signals.trade_count, 20);
    // Calm pnl, healthy win rate, fresh pipeline: nothing should trigger
    assert_eq!(state.regime, Regime::Normal);
    assert!(state.confidence > 0.0 && state.confidence <= 1.0);
    println!(
        "   ✓ {} at {:.0}% confidence",
        state.regime,
        state.confidence * 100.0
    );

    // 6. Entry plans under that regime
    println!("\n6. Planning entries...");
    let calculator = SmartEntryCalculator::new(config.entry.clone());

    let urgent = calculator.calculate_entry(
        &balanced_micro("mkt-urgent", 0.50),
        TradeSide::BuyYes,
        0.20,
        state.multipliers.patience,
    );
    assert_eq!(urgent.strategy, EntryStrategy::Market);
    assert!((urgent.recommended_price - 0.50).abs() < 1e-9);

    let ladder = calculator.calculate_entry(
        &balanced_micro("mkt-calm", 0.50),
        TradeSide::BuyYes,
        0.05,
        state.multipliers.patience,
    );
    assert_eq!(ladder.strategy, EntryStrategy::Neutral);
    assert!(ladder.recommended_price < 0.50);
    println!(
        "   ✓ market plan at 0.500, neutral limit at {:.3}",
        ladder.recommended_price
    );

    println!("\n=== Decision loop complete ===");
}

#[tokio::test]
async fn test_empty_store_is_harmless_everywhere() {
    let config = DecisionConfig::default();
    let store = Arc::new(MemoryStore::new());

    let snapshot = PerformanceTracker::new(store.clone(), config.tracker.clone())
        .compute()
        .await;
    assert_eq!(snapshot.trade_stats.total_trades, 0);
    assert_eq!(snapshot.trade_stats.win_rate, 0.0);
    assert_eq!(snapshot.window_short.pnl, 0.0);
    assert!(snapshot.leaderboard.is_empty());

    let weights = AdaptiveModelWeighter::new(store.clone(), config.weighting.clone())
        .get_weights("politics")
        .await
        .unwrap();
    assert!(!weights.data_available);
    let total: f64 = weights.weights.values().sum();
    assert!((total - 1.0).abs() < 0.01);

    let state = RegimeDetector::new(store.clone(), config.regime.clone())
        .detect()
        .await
        .unwrap();
    assert_eq!(state.regime, Regime::Normal);
    assert!((state.confidence - 0.3).abs() < 1e-9);
    assert!(state.explanation.contains("insufficient data"));

    let mut feedback = CalibrationFeedbackLoop::new(
        store.clone(),
        Box::new(PlattRecalibrator::new()),
        config.feedback.clone(),
    );
    assert!(!feedback.retrain_calibrator().await.unwrap());
    assert!(feedback.get_model_weights("politics").await.unwrap().is_empty());
    assert!(feedback.load_checkpoint().await.unwrap().is_none());
}

#[tokio::test]
async fn test_tables_can_go_missing_mid_flight() {
    // A partially migrated store: candidates table absent
    let config = DecisionConfig::default();
    let store = Arc::new(MemoryStore::new().without_table(edgebot::store::tables::CANDIDATES));

    let base = Utc::now() - Duration::days(5);
    let mut feedback = CalibrationFeedbackLoop::new(
        store.clone(),
        Box::new(PlattRecalibrator::new()),
        config.feedback.clone(),
    );
    for i in 0..6 {
        feedback
            .record_resolution(&seeded_resolution(i, base))
            .await
            .unwrap();
    }

    // Regime detection still classifies, reading zero candidates
    let state = RegimeDetector::new(store.clone(), config.regime.clone())
        .detect()
        .await
        .unwrap();
    assert_eq!(state.signals.candidate_count, 0);

    // Snapshot still reports the trades
    let snapshot = PerformanceTracker::new(store, config.tracker.clone())
        .compute()
        .await;
    assert_eq!(snapshot.trade_stats.total_trades, 6);
}
