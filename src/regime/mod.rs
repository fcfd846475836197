// Trading regime detection and strategy multipliers
pub mod detector;

pub use detector::{Regime, RegimeDetector, RegimeSignals, RegimeState, StrategyMultipliers};
