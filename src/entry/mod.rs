//! Smart entry timing: turns a live market snapshot into a tiered order plan.
//!
//! Four direction-aware microstructure scores (VWAP divergence, depth
//! imbalance, momentum, flow imbalance) are summed into a single urgency
//! score, which selects an aggressive, patient, or neutral ladder. Large
//! edges and imminent resolution skip the ladder and take the market.

use crate::config::EntryConfig;
use crate::models::TradeSide;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Caller-assembled live view of one market's orderbook and tape.
#[derive(Debug, Clone, Serialize)]
pub struct MarketMicrostructure {
    pub market_id: String,
    pub current_price: f64, // YES price
    pub best_bid: f64,
    pub best_ask: f64,
    pub vwap: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub recent_buy_volume: f64,
    pub recent_sell_volume: f64,
    pub momentum: f64, // short-horizon signed price change
    pub hours_to_resolution: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStrategy {
    Market,
    Aggressive,
    Patient,
    Neutral,
}

impl EntryStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            EntryStrategy::Market => "market",
            EntryStrategy::Aggressive => "aggressive",
            EntryStrategy::Patient => "patient",
            EntryStrategy::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for EntryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Immediate,
    Normal,
    Patient,
}

/// One priced, sized tranche of the plan.
#[derive(Debug, Clone, Serialize)]
pub struct EntryLevel {
    pub price: f64,
    pub size_fraction: f64,
    pub confidence: f64,
    pub urgency: Urgency,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmartEntryPlan {
    pub market_id: String,
    pub side: TradeSide,
    pub strategy: EntryStrategy,
    pub levels: Vec<EntryLevel>,
    pub recommended_price: f64,
    pub expected_improvement_bps: f64,
    pub score: f64,
    pub reasoning: String,
    pub generated_at: DateTime<Utc>,
}

/// Rule engine producing [`SmartEntryPlan`]s.
pub struct SmartEntryCalculator {
    config: EntryConfig,
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Shift a YES price in the trade's favorable direction. A negative
/// adjustment improves the entry: buying YES wants the price lower, buying
/// NO wants the YES price higher, so the sign flips per side.
pub fn adjust_price(current: f64, side: TradeSide, adjustment: f64) -> f64 {
    let adjusted = match side {
        TradeSide::BuyYes => current + adjustment,
        TradeSide::BuyNo => current - adjustment,
    };
    adjusted.clamp(0.01, 0.99)
}

impl SmartEntryCalculator {
    pub fn new(config: EntryConfig) -> Self {
        Self { config }
    }

    /// Build an entry plan. `edge` is model probability minus implied,
    /// `patience` scales how deep the patient ladder sits (regime patience
    /// multiplier). Non-finite inputs are treated as 0.
    pub fn calculate_entry(
        &self,
        micro: &MarketMicrostructure,
        side: TradeSide,
        edge: f64,
        patience: f64,
    ) -> SmartEntryPlan {
        let current = sanitize(micro.current_price);
        let edge = sanitize(edge);
        let patience = sanitize(patience).max(0.0);
        let hours_left = sanitize(micro.hours_to_resolution);
        let spread = (sanitize(micro.best_ask) - sanitize(micro.best_bid)).max(0.0);

        // Big edge or imminent resolution: pay the spread and take the market
        if edge.abs() > self.config.market_order_edge {
            return self.market_plan(
                micro,
                side,
                edge,
                format!(
                    "edge {:+.3} beyond market-order threshold {:.3}",
                    edge, self.config.market_order_edge
                ),
            );
        }
        if hours_left < self.config.urgent_hours {
            return self.market_plan(
                micro,
                side,
                edge,
                format!(
                    "resolves in {:.1}h, under the {:.0}h urgency cutoff",
                    hours_left, self.config.urgent_hours
                ),
            );
        }

        let direction = side.direction();
        let vwap = sanitize(micro.vwap);
        let vwap_score = if vwap > 0.0 {
            (direction * (vwap - current) / vwap * self.config.vwap_scale).clamp(-0.3, 0.3)
        } else {
            0.0
        };

        let bid_depth = sanitize(micro.bid_depth);
        let ask_depth = sanitize(micro.ask_depth);
        let total_depth = bid_depth + ask_depth;
        let depth_score = if total_depth > 0.0 {
            direction * (bid_depth - ask_depth) / total_depth * self.config.depth_weight
        } else {
            0.0
        };

        let momentum_score =
            (direction * sanitize(micro.momentum) * self.config.momentum_scale).clamp(-0.3, 0.3);

        let buy_volume = sanitize(micro.recent_buy_volume);
        let sell_volume = sanitize(micro.recent_sell_volume);
        let total_flow = buy_volume + sell_volume;
        let flow_score = if total_flow > 0.0 {
            direction * (buy_volume - sell_volume) / total_flow * self.config.flow_weight
        } else {
            0.0
        };

        let score = vwap_score + depth_score + momentum_score + flow_score;
        let reasoning = format!(
            "entry score {:+.3} (vwap {:+.3}, depth {:+.3}, momentum {:+.3}, flow {:+.3})",
            score, vwap_score, depth_score, momentum_score, flow_score
        );
        debug!("{}: {}", micro.market_id, reasoning);

        let levels = if score > self.config.enter_now_threshold {
            self.aggressive_levels(current, side, spread)
        } else if score < self.config.patient_threshold {
            self.patient_levels(current, side, spread, patience)
        } else {
            self.neutral_levels(current, side, spread)
        };
        let strategy = if score > self.config.enter_now_threshold {
            EntryStrategy::Aggressive
        } else if score < self.config.patient_threshold {
            EntryStrategy::Patient
        } else {
            EntryStrategy::Neutral
        };

        self.finish_plan(micro, side, strategy, levels, score, reasoning)
    }

    fn market_plan(
        &self,
        micro: &MarketMicrostructure,
        side: TradeSide,
        edge: f64,
        reasoning: String,
    ) -> SmartEntryPlan {
        let current = sanitize(micro.current_price);
        let levels = vec![EntryLevel {
            price: current.clamp(0.01, 0.99),
            size_fraction: 1.0,
            confidence: 0.95,
            urgency: Urgency::Immediate,
            note: "market order at current price".to_string(),
        }];
        self.finish_plan(micro, side, EntryStrategy::Market, levels, edge, reasoning)
    }

    /// Two tranches: a limit slightly inside the spread, and a half-size
    /// market fallback in case the limit never fills.
    fn aggressive_levels(&self, current: f64, side: TradeSide, spread: f64) -> Vec<EntryLevel> {
        vec![
            EntryLevel {
                price: adjust_price(current, side, -spread * 0.3),
                size_fraction: 1.0,
                confidence: 0.7,
                urgency: Urgency::Normal,
                note: "limit inside the spread".to_string(),
            },
            EntryLevel {
                price: current.clamp(0.01, 0.99),
                size_fraction: 0.5,
                confidence: 0.5,
                urgency: Urgency::Immediate,
                note: "market fallback".to_string(),
            },
        ]
    }

    /// Three tranches at increasing price improvement, deepest capped so a
    /// wide book cannot push the ladder absurdly far from the touch.
    fn patient_levels(
        &self,
        current: f64,
        side: TradeSide,
        spread: f64,
        patience: f64,
    ) -> Vec<EntryLevel> {
        let cap = self.config.max_improvement.min(spread + 0.005);
        let near = (spread * 0.4 * patience).min(cap);
        let deep = (spread * 0.8 * patience).min(cap);
        vec![
            EntryLevel {
                price: adjust_price(current, side, -near),
                size_fraction: 0.3,
                confidence: 0.6,
                urgency: Urgency::Patient,
                note: "patient limit".to_string(),
            },
            EntryLevel {
                price: adjust_price(current, side, -deep),
                size_fraction: 0.4,
                confidence: 0.5,
                urgency: Urgency::Patient,
                note: "deep patient limit".to_string(),
            },
            EntryLevel {
                price: current.clamp(0.01, 0.99),
                size_fraction: 0.3,
                confidence: 0.4,
                urgency: Urgency::Normal,
                note: "fallback at market".to_string(),
            },
        ]
    }

    fn neutral_levels(&self, current: f64, side: TradeSide, spread: f64) -> Vec<EntryLevel> {
        vec![EntryLevel {
            price: adjust_price(current, side, -spread * 0.2),
            size_fraction: 1.0,
            confidence: 0.6,
            urgency: Urgency::Normal,
            note: "limit just inside the spread".to_string(),
        }]
    }

    fn finish_plan(
        &self,
        micro: &MarketMicrostructure,
        side: TradeSide,
        strategy: EntryStrategy,
        levels: Vec<EntryLevel>,
        score: f64,
        reasoning: String,
    ) -> SmartEntryPlan {
        let current = sanitize(micro.current_price);
        let recommended_price = levels
            .iter()
            .max_by(|a, b| {
                (a.confidence * a.size_fraction)
                    .partial_cmp(&(b.confidence * b.size_fraction))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|level| level.price)
            .unwrap_or(current);

        SmartEntryPlan {
            market_id: micro.market_id.clone(),
            side,
            strategy,
            levels,
            recommended_price,
            expected_improvement_bps: (current - recommended_price).abs() * 10_000.0,
            score,
            reasoning,
            generated_at: Utc::now(),
        }
    }
}
