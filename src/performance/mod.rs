// Performance metrics and reporting
pub mod metrics;
pub mod tracker;

pub use metrics::{
    brier_score, compute_trade_stats, equity_curve, max_drawdown, sharpe_ratio, sortino_ratio,
    EquityPoint, TradeStats,
};
pub use tracker::{
    CategoryStats, LeaderboardEntry, ModelAccuracy, PerformanceSnapshot, PerformanceTracker,
    RollingWindow,
};
