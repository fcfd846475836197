use crate::models::{CalibrationPair, ResolutionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate trade statistics over resolved markets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    // Trade counts
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakeven: usize,
    pub win_rate: f64, // fraction of all trades, 0..1

    // P&L
    pub total_pnl: f64,
    pub total_staked: f64,
    pub roi_pct: f64,
    pub gross_profit: f64,
    pub gross_loss: f64, // positive magnitude
    pub profit_factor: f64,

    // P&L distribution
    pub avg_win: f64,
    pub avg_loss: f64, // positive magnitude
    pub largest_win: f64,
    pub largest_loss: f64, // negative or 0

    // Streaks (zero-pnl resolutions neither extend nor break a run)
    pub current_streak: i32, // positive = wins, negative = losses
    pub best_win_streak: u32,
    pub worst_loss_streak: u32,
}

/// One point on the bankroll equity curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Trade statistics from chronological resolution records. Non-finite pnl
/// or stake values are treated as 0.
pub fn compute_trade_stats(records: &[ResolutionRecord]) -> TradeStats {
    let mut stats = TradeStats {
        total_trades: records.len(),
        ..TradeStats::default()
    };
    if records.is_empty() {
        return stats;
    }

    let mut streak: i32 = 0;
    for record in records {
        let pnl = sanitize(record.pnl);
        let stake = sanitize(record.stake_usd);
        stats.total_pnl += pnl;
        stats.total_staked += stake;

        if pnl > 0.0 {
            stats.wins += 1;
            stats.gross_profit += pnl;
            if pnl > stats.largest_win {
                stats.largest_win = pnl;
            }
            streak = if streak > 0 { streak + 1 } else { 1 };
            stats.best_win_streak = stats.best_win_streak.max(streak as u32);
        } else if pnl < 0.0 {
            stats.losses += 1;
            stats.gross_loss += -pnl;
            if pnl < stats.largest_loss {
                stats.largest_loss = pnl;
            }
            streak = if streak < 0 { streak - 1 } else { -1 };
            stats.worst_loss_streak = stats.worst_loss_streak.max((-streak) as u32);
        } else {
            stats.breakeven += 1;
        }
    }
    stats.current_streak = streak;

    stats.win_rate = stats.wins as f64 / stats.total_trades as f64;
    stats.roi_pct = if stats.total_staked > 0.0 {
        (stats.total_pnl / stats.total_staked) * 100.0
    } else {
        0.0
    };
    stats.profit_factor = if stats.gross_loss > 0.0 {
        stats.gross_profit / stats.gross_loss
    } else if stats.gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    stats.avg_win = if stats.wins > 0 {
        stats.gross_profit / stats.wins as f64
    } else {
        0.0
    };
    stats.avg_loss = if stats.losses > 0 {
        stats.gross_loss / stats.losses as f64
    } else {
        0.0
    };

    stats
}

/// Annualized Sharpe ratio over a per-trade pnl series (risk-free rate 0,
/// sample standard deviation). 0 with fewer than two trades or zero variance.
pub fn sharpe_ratio(pnls: &[f64], trading_days_per_year: f64) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let clean: Vec<f64> = pnls.iter().map(|p| sanitize(*p)).collect();
    let mean = clean.iter().sum::<f64>() / clean.len() as f64;
    let variance = clean
        .iter()
        .map(|p| {
            let diff = p - mean;
            diff * diff
        })
        .sum::<f64>()
        / (clean.len() - 1) as f64;
    if variance <= 0.0 {
        return 0.0;
    }
    (mean / variance.sqrt()) * trading_days_per_year.sqrt()
}

/// Sortino ratio: mean pnl over the root-mean-square of losing trades
/// (denominator averaged over losers only). Not annualized. 0 when no trade
/// has lost money.
pub fn sortino_ratio(pnls: &[f64]) -> f64 {
    if pnls.is_empty() {
        return 0.0;
    }
    let clean: Vec<f64> = pnls.iter().map(|p| sanitize(*p)).collect();
    let losses: Vec<f64> = clean.iter().copied().filter(|p| *p < 0.0).collect();
    if losses.is_empty() {
        return 0.0;
    }
    let mean = clean.iter().sum::<f64>() / clean.len() as f64;
    let downside = (losses.iter().map(|p| p * p).sum::<f64>() / losses.len() as f64).sqrt();
    if downside > 0.0 {
        mean / downside
    } else {
        0.0
    }
}

/// Bankroll equity after each chronological resolution.
pub fn equity_curve(records: &[ResolutionRecord], starting_bankroll: f64) -> Vec<EquityPoint> {
    let mut equity = sanitize(starting_bankroll);
    records
        .iter()
        .map(|record| {
            equity += sanitize(record.pnl);
            EquityPoint {
                timestamp: record.resolved_at,
                equity,
            }
        })
        .collect()
}

/// Maximum drawdown as a fraction of the running peak, peak seeded at the
/// starting bankroll.
pub fn max_drawdown(curve: &[EquityPoint], starting_bankroll: f64) -> f64 {
    let mut peak = sanitize(starting_bankroll);
    let mut max_dd: f64 = 0.0;

    for point in curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            let drawdown = (peak - point.equity) / peak;
            if drawdown > max_dd {
                max_dd = drawdown;
            }
        }
    }
    max_dd
}

/// Mean squared error of forecasts against outcomes. None below the sample
/// minimum.
pub fn brier_score(pairs: &[CalibrationPair], min_samples: usize) -> Option<f64> {
    if pairs.len() < min_samples.max(1) {
        return None;
    }
    let sum: f64 = pairs
        .iter()
        .map(|pair| {
            let prob = sanitize(pair.forecast_prob);
            let outcome = if pair.actual_outcome { 1.0 } else { 0.0 };
            (prob - outcome) * (prob - outcome)
        })
        .sum();
    Some(sum / pairs.len() as f64)
}
