//! Fold Metrics
//!
//! R² uses the TRAINING-fold mean as baseline:
//!
//! ```text
//! R² = 1 − Σ(y − ŷ)² / Σ(y − ȳ_train)²
//! ```
//!
//! Using the test-fold mean would let test values leak into the denominator.

/// Metrics for one (repeat, fold) at one kernel setting
#[derive(Debug, Clone, PartialEq)]
pub struct FoldMetrics {
    pub repeat: usize,
    pub fold: usize,
    pub n_test: usize,
    pub n_train: usize,
    /// Test species that received a prediction
    pub n_predicted: usize,
    /// Predictions that used the training-fold mean
    pub n_fallback: usize,
    /// `None` when the fold has no spread around the training mean
    pub r2: Option<f64>,
    pub mae: Option<f64>,
}

/// 1 − SSE/SST with SST about `baseline_mean`; `None` if SST is 0 or no pairs
pub fn r_squared(observed: &[f64], predicted: &[f64], baseline_mean: f64) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }
    let sse: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    let sst: f64 = observed.iter().map(|y| (y - baseline_mean).powi(2)).sum();
    (sst > 0.0).then(|| 1.0 - sse / sst)
}

pub fn mean_absolute_error(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }
    let total: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).abs())
        .sum();
    Some(total / observed.len() as f64)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (n − 1); `None` below two values
pub fn sample_sd(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}
