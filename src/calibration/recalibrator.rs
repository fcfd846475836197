//! Probability recalibration over logged (forecast, outcome) pairs.
//!
//! The feedback loop is written against the `Recalibrator` trait; any model
//! that can fit the pairs and report shift/scale coefficients plugs in.

/// Coefficients and fit quality reported after a successful fit.
#[derive(Debug, Clone, Copy)]
pub struct CalibratorStats {
    pub n_samples: usize,
    pub brier_score: f64,
    pub a: f64,
    pub b: f64,
}

pub trait Recalibrator: Send + Sync {
    /// Fit on (forecast_prob, actual_outcome) pairs. Returns false (leaving
    /// the previous fit untouched) when the data cannot support a fit.
    fn fit(&mut self, pairs: &[(f64, bool)]) -> bool;

    /// Stats of the most recent successful fit.
    fn stats(&self) -> CalibratorStats;

    /// Map a raw forecast probability through the fitted correction.
    fn apply(&self, prob: f64) -> f64;
}

/// Platt-style recalibrator: p' = sigmoid(a + b * logit(p)).
///
/// `a` shifts systematic over/under-forecasting, `b` scales over/under-
/// confidence (b < 1 shrinks toward 0.5). Fit by fixed-iteration gradient
/// descent on the logistic loss.
#[derive(Debug, Clone)]
pub struct PlattRecalibrator {
    a: f64,
    b: f64,
    n_samples: usize,
    brier_score: f64,
    fitted: bool,
    iterations: usize,
    learning_rate: f64,
}

impl Default for PlattRecalibrator {
    fn default() -> Self {
        Self {
            a: 0.0,
            b: 1.0,          // Identity transform until fitted
            n_samples: 0,
            brier_score: 0.25, // Prior for coin-flip forecasts
            fitted: false,
            iterations: 500,
            learning_rate: 0.1,
        }
    }
}

impl PlattRecalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from persisted coefficients, e.g. a loaded checkpoint, so a
    /// restarted agent corrects forecasts before its first retrain.
    pub fn from_stats(stats: CalibratorStats) -> Self {
        Self {
            a: stats.a,
            b: stats.b,
            n_samples: stats.n_samples,
            brier_score: stats.brier_score,
            fitted: true,
            ..Self::default()
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

impl Recalibrator for PlattRecalibrator {
    fn fit(&mut self, pairs: &[(f64, bool)]) -> bool {
        if pairs.len() < 2 {
            return false;
        }

        let mut zs = Vec::with_capacity(pairs.len());
        let mut ys = Vec::with_capacity(pairs.len());
        for (prob, outcome) in pairs {
            let prob = if prob.is_finite() { *prob } else { 0.0 };
            zs.push(logit(prob));
            ys.push(if *outcome { 1.0 } else { 0.0 });
        }

        // Single-class outcomes or near-constant forecasts leave the
        // coefficients unidentifiable
        let positives = ys.iter().filter(|y| **y > 0.5).count();
        if positives == 0 || positives == ys.len() {
            tracing::debug!("Calibrator fit skipped: single-class outcomes");
            return false;
        }
        let z_min = zs.iter().cloned().fold(f64::INFINITY, f64::min);
        let z_max = zs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if z_max - z_min < 1e-9 {
            tracing::debug!("Calibrator fit skipped: constant forecasts");
            return false;
        }

        let n = zs.len() as f64;
        let mut a = 0.0;
        let mut b = 1.0;
        for _ in 0..self.iterations {
            let mut grad_a = 0.0;
            let mut grad_b = 0.0;
            for (z, y) in zs.iter().zip(ys.iter()) {
                let err = sigmoid(a + b * z) - y;
                grad_a += err;
                grad_b += err * z;
            }
            a -= self.learning_rate * grad_a / n;
            b -= self.learning_rate * grad_b / n;
        }

        if !a.is_finite() || !b.is_finite() {
            tracing::warn!("Calibrator fit diverged, keeping previous coefficients");
            return false;
        }

        let brier = zs
            .iter()
            .zip(ys.iter())
            .map(|(z, y)| {
                let p = sigmoid(a + b * z);
                (p - y) * (p - y)
            })
            .sum::<f64>()
            / n;

        self.a = a;
        self.b = b;
        self.n_samples = pairs.len();
        self.brier_score = brier;
        self.fitted = true;
        true
    }

    fn stats(&self) -> CalibratorStats {
        CalibratorStats {
            n_samples: self.n_samples,
            brier_score: self.brier_score,
            a: self.a,
            b: self.b,
        }
    }

    fn apply(&self, prob: f64) -> f64 {
        if !self.fitted {
            return prob;
        }
        sigmoid(self.a + self.b * logit(prob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Forecasts that are directionally right but overconfident.
    fn overconfident_pairs() -> Vec<(f64, bool)> {
        let mut pairs = Vec::new();
        for i in 0..20 {
            // Forecast 0.9 but only 70% hit
            pairs.push((0.9, i % 10 < 7));
            // Forecast 0.1 but 30% hit
            pairs.push((0.1, i % 10 < 3));
        }
        pairs
    }

    #[test]
    fn test_fit_requires_two_pairs() {
        let mut calibrator = PlattRecalibrator::new();
        assert!(!calibrator.fit(&[(0.7, true)]));
        assert!(!calibrator.fit(&[]));
    }

    #[test]
    fn test_fit_rejects_single_class() {
        let mut calibrator = PlattRecalibrator::new();
        let pairs: Vec<(f64, bool)> = (0..40).map(|i| (0.3 + 0.01 * i as f64, true)).collect();
        assert!(!calibrator.fit(&pairs));
        assert_eq!(calibrator.stats().n_samples, 0);
    }

    #[test]
    fn test_fit_rejects_constant_forecasts() {
        let mut calibrator = PlattRecalibrator::new();
        let pairs: Vec<(f64, bool)> = (0..40).map(|i| (0.5, i % 2 == 0)).collect();
        assert!(!calibrator.fit(&pairs));
    }

    #[test]
    fn test_identity_before_fit() {
        let calibrator = PlattRecalibrator::new();
        assert_eq!(calibrator.apply(0.42), 0.42);
    }

    #[test]
    fn test_resume_from_stats_applies_immediately() {
        let mut fitted = PlattRecalibrator::new();
        assert!(fitted.fit(&overconfident_pairs()));

        let resumed = PlattRecalibrator::from_stats(fitted.stats());
        assert_eq!(resumed.apply(0.9), fitted.apply(0.9));
        assert_eq!(resumed.stats().n_samples, fitted.stats().n_samples);
    }

    #[test]
    fn test_fit_shrinks_overconfidence() {
        let mut calibrator = PlattRecalibrator::new();
        assert!(calibrator.fit(&overconfident_pairs()));

        let stats = calibrator.stats();
        assert_eq!(stats.n_samples, 40);
        assert!(stats.brier_score < 0.25);
        // Overconfident forecasts should be pulled toward 0.5
        assert!(calibrator.apply(0.9) < 0.9);
        assert!(calibrator.apply(0.1) > 0.1);
        // Direction preserved
        assert!(calibrator.apply(0.9) > 0.5);
        assert!(calibrator.apply(0.1) < 0.5);
    }

    #[test]
    fn test_failed_fit_keeps_previous_coefficients() {
        let mut calibrator = PlattRecalibrator::new();
        assert!(calibrator.fit(&overconfident_pairs()));
        let before = calibrator.stats();

        let degenerate: Vec<(f64, bool)> = (0..10).map(|_| (0.8, true)).collect();
        assert!(!calibrator.fit(&degenerate));

        let after = calibrator.stats();
        assert_eq!(before.a, after.a);
        assert_eq!(before.b, after.b);
        assert_eq!(before.n_samples, after.n_samples);
    }
}
