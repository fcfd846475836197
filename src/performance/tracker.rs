//! Read-side performance snapshot over the shared agent tables.
//!
//! Every sub-computation degrades independently: a missing table or failed
//! read is logged and its section of the snapshot comes back empty, so one
//! broken table never takes the whole report down.

use crate::config::TrackerConfig;
use crate::models::{ModelForecast, ResolutionRecord};
use crate::store::Store;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::metrics::{
    brier_score, compute_trade_stats, equity_curve, max_drawdown, sharpe_ratio, sortino_ratio,
    EquityPoint, TradeStats,
};

/// Per-category trade breakdown
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub category: String,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub total_staked: f64,
    pub roi_pct: f64,
}

/// Recent-window P&L summary
#[derive(Debug, Clone, Serialize)]
pub struct RollingWindow {
    pub days: i64,
    pub trades: usize,
    pub pnl: f64,
    pub win_rate: f64,
}

/// Per-(model, category) forecast accuracy
#[derive(Debug, Clone, Serialize)]
pub struct ModelAccuracy {
    pub model: String,
    pub category: String,
    pub n_forecasts: usize,
    pub hit_rate: f64, // forecast >= 0.5 matching the outcome
    pub brier_score: f64,
}

/// One row of the category leaderboard
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub category: String,
    pub score: f64,
    pub roi_pct: f64,
    pub win_rate: f64,
    pub trades: usize,
}

/// Complete performance report
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub generated_at: DateTime<Utc>,

    // Headline numbers
    pub trade_stats: TradeStats,

    // Risk metrics
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,         // fraction of running peak
    pub calmar_ratio: Option<f64>, // only meaningful in drawdown with positive pnl

    // Curves and breakdowns
    pub equity_curve: Vec<EquityPoint>,
    pub category_stats: HashMap<String, CategoryStats>,
    pub calibration_brier: Option<f64>,
    pub window_short: RollingWindow,
    pub window_long: RollingWindow,
    pub model_accuracy: Vec<ModelAccuracy>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Computes [`PerformanceSnapshot`]s from the shared store.
pub struct PerformanceTracker {
    store: Arc<dyn Store>,
    config: TrackerConfig,
}

impl PerformanceTracker {
    pub fn new(store: Arc<dyn Store>, config: TrackerConfig) -> Self {
        Self { store, config }
    }

    /// Build a snapshot from whatever history is readable right now.
    pub async fn compute(&self) -> PerformanceSnapshot {
        let resolutions = or_empty(self.store.resolutions().await, "resolution history");
        let pairs = or_empty(self.store.calibration_pairs().await, "calibration history");
        let forecasts = or_empty(self.store.model_forecasts(None).await, "model forecast log");

        let trade_stats = compute_trade_stats(&resolutions);
        let pnls: Vec<f64> = resolutions.iter().map(|r| r.pnl).collect();

        let curve = equity_curve(&resolutions, self.config.starting_bankroll);
        let drawdown = max_drawdown(&curve, self.config.starting_bankroll);
        let calmar_ratio = if drawdown > 0.0 && trade_stats.total_pnl > 0.0 {
            Some((trade_stats.roi_pct / 100.0) / drawdown)
        } else {
            None
        };

        let category_stats = category_breakdown(&resolutions);
        let leaderboard = build_leaderboard(&category_stats);

        PerformanceSnapshot {
            generated_at: Utc::now(),
            sharpe_ratio: sharpe_ratio(&pnls, self.config.trading_days_per_year),
            sortino_ratio: sortino_ratio(&pnls),
            max_drawdown: drawdown,
            calmar_ratio,
            equity_curve: curve,
            calibration_brier: brier_score(&pairs, self.config.min_brier_samples),
            window_short: rolling_window(&resolutions, self.config.short_window_days),
            window_long: rolling_window(&resolutions, self.config.long_window_days),
            model_accuracy: model_accuracy(&forecasts),
            category_stats,
            leaderboard,
            trade_stats,
        }
    }
}

fn or_empty<T>(result: Result<Vec<T>>, what: &str) -> Vec<T> {
    match result {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Performance snapshot: {} unreadable, reporting empty: {}", what, e);
            Vec::new()
        }
    }
}

fn category_breakdown(records: &[ResolutionRecord]) -> HashMap<String, CategoryStats> {
    let mut stats: HashMap<String, CategoryStats> = HashMap::new();
    for record in records {
        let pnl = if record.pnl.is_finite() { record.pnl } else { 0.0 };
        let stake = if record.stake_usd.is_finite() {
            record.stake_usd
        } else {
            0.0
        };

        let entry = stats
            .entry(record.category.clone())
            .or_insert_with(|| CategoryStats {
                category: record.category.clone(),
                trades: 0,
                wins: 0,
                win_rate: 0.0,
                total_pnl: 0.0,
                total_staked: 0.0,
                roi_pct: 0.0,
            });
        entry.trades += 1;
        if pnl > 0.0 {
            entry.wins += 1;
        }
        entry.total_pnl += pnl;
        entry.total_staked += stake;
    }

    for entry in stats.values_mut() {
        entry.win_rate = entry.wins as f64 / entry.trades as f64;
        entry.roi_pct = if entry.total_staked > 0.0 {
            (entry.total_pnl / entry.total_staked) * 100.0
        } else {
            0.0
        };
    }
    stats
}

fn rolling_window(records: &[ResolutionRecord], days: i64) -> RollingWindow {
    let cutoff = Utc::now() - Duration::days(days);
    let recent: Vec<&ResolutionRecord> = records
        .iter()
        .filter(|r| r.resolved_at >= cutoff)
        .collect();

    let trades = recent.len();
    let wins = recent.iter().filter(|r| r.pnl > 0.0).count();
    let pnl: f64 = recent
        .iter()
        .map(|r| if r.pnl.is_finite() { r.pnl } else { 0.0 })
        .sum();

    RollingWindow {
        days,
        trades,
        pnl,
        win_rate: if trades > 0 {
            wins as f64 / trades as f64
        } else {
            0.0
        },
    }
}

fn model_accuracy(forecasts: &[ModelForecast]) -> Vec<ModelAccuracy> {
    let mut tallies: HashMap<(String, String), (usize, usize, f64)> = HashMap::new();
    for forecast in forecasts {
        let prob = if forecast.forecast_prob.is_finite() {
            forecast.forecast_prob
        } else {
            0.0
        };
        let outcome = if forecast.actual_outcome { 1.0 } else { 0.0 };
        let hit = (prob >= 0.5) == forecast.actual_outcome;

        let entry = tallies
            .entry((forecast.model_name.clone(), forecast.category.clone()))
            .or_insert((0, 0, 0.0));
        entry.0 += 1;
        if hit {
            entry.1 += 1;
        }
        entry.2 += (prob - outcome) * (prob - outcome);
    }

    let mut rows: Vec<ModelAccuracy> = tallies
        .into_iter()
        .map(|((model, category), (n, hits, sse))| ModelAccuracy {
            model,
            category,
            n_forecasts: n,
            hit_rate: hits as f64 / n as f64,
            brier_score: sse / n as f64,
        })
        .collect();
    rows.sort_by(|a, b| a.model.cmp(&b.model).then_with(|| a.category.cmp(&b.category)));
    rows
}

/// Score = roi * 0.4 + win_rate% * 0.3 + volume * 0.3, where volume maxes
/// out at 10 trades. Categories without a single trade are left off.
fn build_leaderboard(categories: &HashMap<String, CategoryStats>) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = categories
        .values()
        .filter(|c| c.trades > 0)
        .map(|c| {
            let volume = (c.trades as f64 / 10.0).min(1.0) * 30.0;
            let score = c.roi_pct * 0.4 + c.win_rate * 100.0 * 0.3 + volume * 0.3;
            LeaderboardEntry {
                rank: 0,
                category: c.category.clone(),
                score,
                roi_pct: c.roi_pct,
                win_rate: c.win_rate,
                trades: c.trades,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    entries
}

impl PerformanceSnapshot {
    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              TRADING PERFORMANCE REPORT               ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        let stats = &self.trade_stats;
        println!("📊 P&L SUMMARY");
        println!("  Total Trades:          {}", stats.total_trades);
        println!(
            "  Win Rate:              {:.1}% ({} W / {} L / {} flat)",
            stats.win_rate * 100.0,
            stats.wins,
            stats.losses,
            stats.breakeven
        );
        println!(
            "  Total P&L:             ${:.2} on ${:.2} staked ({:+.1}% ROI)",
            stats.total_pnl, stats.total_staked, stats.roi_pct
        );
        if stats.profit_factor.is_finite() {
            println!("  Profit Factor:         {:.2}", stats.profit_factor);
        } else {
            println!("  Profit Factor:         inf (no losing trades)");
        }
        println!(
            "  Avg Win / Avg Loss:    ${:.2} / ${:.2}",
            stats.avg_win, stats.avg_loss
        );
        println!(
            "  Current Streak:        {} ({})",
            stats.current_streak.abs(),
            if stats.current_streak >= 0 { "wins" } else { "losses" }
        );

        println!("\n⚠️  RISK METRICS");
        println!("  Sharpe Ratio:          {:.2}", self.sharpe_ratio);
        println!("  Sortino Ratio:         {:.2}", self.sortino_ratio);
        println!("  Max Drawdown:          {:.1}%", self.max_drawdown * 100.0);
        match self.calmar_ratio {
            Some(calmar) => println!("  Calmar Ratio:          {:.2}", calmar),
            None => println!("  Calmar Ratio:          n/a"),
        }

        println!("\n📅 RECENT WINDOWS");
        for window in [&self.window_short, &self.window_long] {
            println!(
                "  Last {:>2} days:          {} trades, ${:.2}, {:.0}% wins",
                window.days,
                window.trades,
                window.pnl,
                window.win_rate * 100.0
            );
        }

        if let Some(brier) = self.calibration_brier {
            println!("\n🎯 CALIBRATION");
            println!("  Brier Score:           {:.4}", brier);
        }

        if !self.leaderboard.is_empty() {
            println!("\n🏆 CATEGORY LEADERBOARD");
            for entry in &self.leaderboard {
                println!(
                    "  #{} {:<16} score {:>6.1}  ({} trades, {:.0}% wins, {:+.1}% ROI)",
                    entry.rank,
                    entry.category,
                    entry.score,
                    entry.trades,
                    entry.win_rate * 100.0,
                    entry.roi_pct
                );
            }
        }

        if !self.model_accuracy.is_empty() {
            println!("\n🤖 MODEL ACCURACY");
            for row in &self.model_accuracy {
                println!(
                    "  {:<12} {:<14} {:>3} forecasts, {:.0}% hit, brier {:.4}",
                    row.model, row.category, row.n_forecasts, row.hit_rate * 100.0, row.brier_score
                );
            }
        }

        println!("\n═══════════════════════════════════════════════════════\n");
    }
}
