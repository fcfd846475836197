//! Decision-layer analysis over the agent's trade history.
//!
//! Reads the shared Postgres tables (or, with --demo, a seeded in-memory
//! history) and prints the performance snapshot, adaptive model weights,
//! current regime, and a sample entry plan for the freshest candidate.

use chrono::{Duration, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

use edgebot::calibration::{CalibrationFeedbackLoop, PlattRecalibrator};
use edgebot::config::DecisionConfig;
use edgebot::entry::{MarketMicrostructure, SmartEntryCalculator};
use edgebot::models::{MarketCandidate, ResolutionRecord, TradeSide};
use edgebot::performance::PerformanceTracker;
use edgebot::regime::RegimeDetector;
use edgebot::store::{MemoryStore, PgStore, Store};
use edgebot::weighting::AdaptiveModelWeighter;

#[derive(Parser, Debug)]
#[command(name = "analyze_performance")]
#[command(about = "Analyze agent performance, weights, regime and entry plans")]
struct Args {
    /// Run against a seeded in-memory history instead of Postgres
    #[arg(long)]
    demo: bool,

    /// Seed for the synthetic demo history
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of synthetic resolutions in demo mode
    #[arg(long, default_value_t = 60)]
    trades: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgebot=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = DecisionConfig::load()?;

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║            DECISION LAYER ANALYSIS                    ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let store: Arc<dyn Store> = if args.demo {
        println!(
            "🧪 Demo mode: seeding {} synthetic resolutions (seed {})",
            args.trades, args.seed
        );
        let store = Arc::new(MemoryStore::new());
        seed_demo_history(store.clone(), &config, args.seed, args.trades).await?;
        store
    } else {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/edgebot".to_string());
        println!("📡 Connecting to Postgres...");
        Arc::new(PgStore::new(&database_url).await?)
    };

    let tracker = PerformanceTracker::new(store.clone(), config.tracker.clone());
    let snapshot = tracker.compute().await;
    snapshot.print_report();

    print_weights(store.clone(), &config).await?;
    let regime = print_regime(store.clone(), &config).await?;
    print_sample_entry_plan(store, &config, regime).await?;

    Ok(())
}

async fn print_weights(store: Arc<dyn Store>, config: &DecisionConfig) -> anyhow::Result<()> {
    let weighter = AdaptiveModelWeighter::new(store, config.weighting.clone());
    let mut all_weights: Vec<_> = weighter
        .get_all_category_weights()
        .await?
        .into_iter()
        .collect();
    all_weights.sort_by(|a, b| a.0.cmp(&b.0));

    println!("🧮 ADAPTIVE MODEL WEIGHTS");
    for (category, result) in all_weights {
        println!(
            "  {:<14} blend {:.2} ({})",
            category,
            result.blend_factor,
            if result.data_available {
                "from history"
            } else {
                "defaults"
            }
        );
        let mut detail = result.detail;
        detail.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        for weight in detail {
            let brier = weight
                .brier_score
                .map(|b| format!("brier {:.4}", b))
                .unwrap_or_else(|| "no qualifying samples".to_string());
            println!(
                "    {:<12} {:.3}  [{:?}] {} ({} samples)",
                weight.model, weight.weight, weight.source, brier, weight.n_samples
            );
        }
    }
    Ok(())
}

async fn print_regime(
    store: Arc<dyn Store>,
    config: &DecisionConfig,
) -> anyhow::Result<edgebot::regime::RegimeState> {
    let detector = RegimeDetector::new(store, config.regime.clone());
    let state = detector.detect().await?;

    println!("\n🌊 CURRENT REGIME");
    println!(
        "  {} at {:.0}% confidence: {}",
        state.regime,
        state.confidence * 100.0,
        state.explanation
    );
    println!(
        "  kelly x{:.2}  edge x{:.2}  size x{:.2}  patience x{:.2}",
        state.multipliers.kelly,
        state.multipliers.edge_threshold,
        state.multipliers.size,
        state.multipliers.patience
    );
    Ok(state)
}

/// Plans an entry for the freshest candidate against an illustrative
/// balanced book around its implied price.
async fn print_sample_entry_plan(
    store: Arc<dyn Store>,
    config: &DecisionConfig,
    regime: edgebot::regime::RegimeState,
) -> anyhow::Result<()> {
    let candidates = store.recent_candidates(1).await?;
    let Some(candidate) = candidates.first() else {
        println!("\n📝 No live candidates, skipping entry plan");
        return Ok(());
    };

    let side = if candidate.edge >= 0.0 {
        TradeSide::BuyYes
    } else {
        TradeSide::BuyNo
    };
    let micro = MarketMicrostructure {
        market_id: candidate.market_id.clone(),
        current_price: candidate.implied_prob,
        best_bid: (candidate.implied_prob - 0.01).max(0.01),
        best_ask: (candidate.implied_prob + 0.01).min(0.99),
        vwap: candidate.implied_prob,
        bid_depth: 1000.0,
        ask_depth: 1000.0,
        recent_buy_volume: 500.0,
        recent_sell_volume: 500.0,
        momentum: 0.0,
        hours_to_resolution: 72.0,
    };

    let calculator = SmartEntryCalculator::new(config.entry.clone());
    let plan = calculator.calculate_entry(&micro, side, candidate.edge, regime.multipliers.patience);

    println!("\n📝 SAMPLE ENTRY PLAN ({})", plan.market_id);
    println!("  Side {:?}, strategy {}, score {:+.3}", plan.side, plan.strategy, plan.score);
    println!("  {}", plan.reasoning);
    for (i, level) in plan.levels.iter().enumerate() {
        println!(
            "  L{}: {:.3} x {:.0}% size (conf {:.2}, {:?}) - {}",
            i + 1,
            level.price,
            level.size_fraction * 100.0,
            level.confidence,
            level.urgency,
            level.note
        );
    }
    println!(
        "  Recommended {:.3} ({:.0} bps improvement)",
        plan.recommended_price, plan.expected_improvement_bps
    );
    Ok(())
}

/// Drives the real feedback loop with plausible overconfident forecasts so
/// the calibrator, weighter and tracker all have something to chew on.
async fn seed_demo_history(
    store: Arc<MemoryStore>,
    config: &DecisionConfig,
    seed: u64,
    trades: usize,
) -> edgebot::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut feedback = CalibrationFeedbackLoop::new(
        store.clone(),
        Box::new(PlattRecalibrator::new()),
        config.feedback.clone(),
    );

    let categories = ["politics", "crypto", "sports"];
    for i in 0..trades {
        let category = categories[i % categories.len()];
        let true_prob: f64 = rng.gen_range(0.2..0.8);
        let outcome = rng.gen_bool(true_prob);
        let forecast =
            (0.5 + (true_prob - 0.5) * 1.6 + rng.gen_range(-0.05..0.05)).clamp(0.05, 0.95);
        let entry_price = (true_prob + rng.gen_range(-0.08..0.08)).clamp(0.05, 0.95);
        let stake = rng.gen_range(10.0..40.0);
        let buys_yes = forecast >= entry_price;
        let pnl = match (buys_yes, outcome) {
            (true, true) => stake * (1.0 - entry_price) / entry_price,
            (true, false) => -stake,
            (false, true) => -stake,
            (false, false) => stake * entry_price / (1.0 - entry_price),
        };

        let record = ResolutionRecord {
            market_id: format!("demo-{}", i),
            question: format!("Demo market {}?", i),
            category: category.to_string(),
            forecast_prob: forecast,
            actual_outcome: outcome,
            edge_at_entry: forecast - entry_price,
            confidence: rng.gen_range(0.5..0.9),
            evidence_quality: rng.gen_range(0.3..0.9),
            stake_usd: stake,
            entry_price,
            exit_price: if outcome { 1.0 } else { 0.0 },
            pnl,
            holding_hours: rng.gen_range(6.0..96.0),
            resolved_at: Utc::now() - Duration::hours(((trades - i) * 12) as i64),
            model_forecasts: HashMap::from([
                (
                    "anthropic".to_string(),
                    (true_prob + rng.gen_range(-0.10..0.10)).clamp(0.02, 0.98),
                ),
                (
                    "openai".to_string(),
                    (true_prob + rng.gen_range(-0.15..0.15)).clamp(0.02, 0.98),
                ),
                (
                    "baseline".to_string(),
                    (0.5 + (true_prob - 0.5) * 0.3).clamp(0.02, 0.98),
                ),
            ]),
        };
        feedback.record_resolution(&record).await?;
    }

    // Live pipeline for the regime detector and entry planner
    for i in 0..12 {
        let implied = (0.5_f64 + rng.gen_range(-0.15..0.15)).clamp(0.05, 0.95);
        let model = (implied + rng.gen_range(-0.08..0.08)).clamp(0.05, 0.95);
        store.insert_candidate(MarketCandidate {
            market_id: format!("cand-{}", i),
            implied_prob: implied,
            model_prob: model,
            edge: model - implied,
            created_at: Utc::now() - Duration::minutes(i as i64 * 30),
        });
    }

    Ok(())
}
