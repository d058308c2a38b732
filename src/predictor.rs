//! Neighbor-Weighted Phylogenetic Predictor (p_phylo)
//!
//! Estimates an indicator value for a target species as a distance-decayed
//! weighted average over donor species with known values:
//!
//! ```text
//! w_i    = 1 / D[i][target]^x          (D > 0 only)
//! p_phylo = Σ w_i · v_i / Σ w_i
//! ```
//!
//! Rules shared by full-data prediction and cross-validation:
//! - the target never donates to itself, and distance 0 is never a valid neighbor
//! - optional k-nearest truncation keeps the k closest eligible donors
//! - if the weight sum falls below `epsilon`, the unweighted donor mean is used
//! - with no donor value at all, the prediction is missing (not zero)

use crate::error::{PhyloError, PhyloResult};
use crate::tree::DistanceMatrix;

pub const DEFAULT_EPSILON: f64 = 1e-9;

/// Kernel parameters for one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    /// Decay exponent x (0 = uniform weights)
    pub exponent: f64,
    /// Keep only the k nearest donors (0 = all)
    pub k_truncate: usize,
    /// Minimum weight sum before falling back to the donor mean
    pub epsilon: f64,
}

impl KernelParams {
    pub fn new(exponent: f64, k_truncate: usize) -> Self {
        Self {
            exponent,
            k_truncate,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn validate(&self) -> PhyloResult<()> {
        if !self.exponent.is_finite() || self.exponent < 0.0 {
            return Err(PhyloError::invalid(
                "exponent",
                format!("must be finite and >= 0, got {}", self.exponent),
            ));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(PhyloError::invalid(
                "epsilon",
                format!("must be finite and > 0, got {}", self.epsilon),
            ));
        }
        Ok(())
    }
}

/// Weight for one donor at `distance`; non-positive distances get 0
#[inline]
pub fn decay_weight(distance: f64, exponent: f64) -> f64 {
    if distance > 0.0 && distance.is_finite() {
        1.0 / distance.powf(exponent)
    } else {
        0.0
    }
}

/// Source of donor → target weights
pub trait NeighborWeights {
    fn weight(&self, donor: usize, target: usize) -> f64;

    /// Whether `donor` may contribute at all (eligibility, before k truncation)
    fn permits(&self, _donor: usize) -> bool {
        true
    }
}

/// Weights computed on the fly from a distance matrix
pub struct DecayKernel<'a> {
    distances: &'a DistanceMatrix,
    exponent: f64,
}

impl<'a> DecayKernel<'a> {
    pub fn new(distances: &'a DistanceMatrix, exponent: f64) -> Self {
        Self {
            distances,
            exponent,
        }
    }
}

impl NeighborWeights for DecayKernel<'_> {
    fn weight(&self, donor: usize, target: usize) -> f64 {
        decay_weight(self.distances.get(donor, target), self.exponent)
    }
}

/// Precomputed weight matrix W[donor][target] over a distance matrix's labels
///
/// Built once per (axis, exponent) and shared read-only across repeats and
/// folds. Fold restriction goes through [`MaskedWeights`], never by editing W.
#[derive(Debug, Clone)]
pub struct WeightMatrix {
    labels: Vec<String>,
    exponent: f64,
    values: Vec<f64>,
}

impl WeightMatrix {
    pub fn from_distances(distances: &DistanceMatrix, exponent: f64) -> Self {
        let n = distances.len();
        let mut values = Vec::with_capacity(n * n);
        for i in 0..n {
            values.extend(distances.row(i).iter().map(|&d| decay_weight(d, exponent)));
        }
        Self {
            labels: distances.labels().to_vec(),
            exponent,
            values,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn exponent(&self) -> f64 {
        self.exponent
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn get(&self, donor: usize, target: usize) -> f64 {
        self.values[donor * self.labels.len() + target]
    }

    /// Restrict donors to `train` (one flag per row)
    pub fn masked<'a>(&'a self, train: &'a [bool]) -> MaskedWeights<'a> {
        debug_assert_eq!(train.len(), self.len());
        MaskedWeights {
            weights: self,
            train,
        }
    }
}

impl NeighborWeights for WeightMatrix {
    fn weight(&self, donor: usize, target: usize) -> f64 {
        self.get(donor, target)
    }
}

/// Read-only view of a weight matrix with every non-training row at 0
pub struct MaskedWeights<'a> {
    weights: &'a WeightMatrix,
    train: &'a [bool],
}

impl NeighborWeights for MaskedWeights<'_> {
    fn weight(&self, donor: usize, target: usize) -> f64 {
        if self.train[donor] {
            self.weights.get(donor, target)
        } else {
            0.0
        }
    }

    fn permits(&self, donor: usize) -> bool {
        self.train[donor]
    }
}

/// How a prediction was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionSource {
    /// Weighted average over this many donors
    Weighted { donors: usize },
    /// Weight sum below epsilon: unweighted mean of donor values
    Fallback,
    /// No donor carried a value
    NoDonors,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborPrediction {
    pub value: Option<f64>,
    pub source: PredictionSource,
}

impl NeighborPrediction {
    pub fn used_fallback(&self) -> bool {
        matches!(self.source, PredictionSource::Fallback)
    }
}

/// Predict `target` from `donors` with weights from the distance matrix
///
/// `values` is indexed like `distances` rows.
pub fn predict(
    target: usize,
    donors: &[usize],
    distances: &DistanceMatrix,
    values: &[Option<f64>],
    params: &KernelParams,
) -> NeighborPrediction {
    let kernel = DecayKernel::new(distances, params.exponent);
    predict_with(target, donors, distances, values, &kernel, params)
}

/// Predict `target` with an explicit weight source
///
/// `distances` decides eligibility (D > 0) and k-nearest ranking; `weights`
/// supplies the weights. Both must share the same row order.
pub fn predict_with<W: NeighborWeights + ?Sized>(
    target: usize,
    donors: &[usize],
    distances: &DistanceMatrix,
    values: &[Option<f64>],
    weights: &W,
    params: &KernelParams,
) -> NeighborPrediction {
    // (distance, donor, value)
    let mut eligible: Vec<(f64, usize, f64)> = donors
        .iter()
        .copied()
        .filter(|&donor| donor != target && weights.permits(donor))
        .filter_map(|donor| {
            let value = values[donor]?;
            let distance = distances.get(donor, target);
            (distance > 0.0 && distance.is_finite()).then_some((distance, donor, value))
        })
        .collect();

    if params.k_truncate > 0 && eligible.len() > params.k_truncate {
        eligible.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        eligible.truncate(params.k_truncate);
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut contributing = 0usize;
    // Distances small enough that 1/d^x overflows
    let mut infinite: Vec<f64> = Vec::new();

    for &(_, donor, value) in &eligible {
        let w = weights.weight(donor, target);
        if w.is_infinite() {
            infinite.push(value);
        } else if w > 0.0 {
            weighted_sum += w * value;
            weight_total += w;
            contributing += 1;
        }
    }

    if !infinite.is_empty() {
        return NeighborPrediction {
            value: Some(infinite.iter().sum::<f64>() / infinite.len() as f64),
            source: PredictionSource::Weighted {
                donors: infinite.len(),
            },
        };
    }

    if weight_total > params.epsilon {
        return NeighborPrediction {
            value: Some(weighted_sum / weight_total),
            source: PredictionSource::Weighted {
                donors: contributing,
            },
        };
    }

    match donor_mean(target, donors, values, weights) {
        Some(mean) => NeighborPrediction {
            value: Some(mean),
            source: PredictionSource::Fallback,
        },
        None => NeighborPrediction {
            value: None,
            source: PredictionSource::NoDonors,
        },
    }
}

/// Unweighted mean over permitted donors with values (target excluded)
fn donor_mean<W: NeighborWeights + ?Sized>(
    target: usize,
    donors: &[usize],
    values: &[Option<f64>],
    weights: &W,
) -> Option<f64> {
    let (sum, count) = donors
        .iter()
        .copied()
        .filter(|&donor| donor != target && weights.permits(donor))
        .filter_map(|donor| values[donor])
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::PhyloTree;
    use approx::assert_relative_eq;

    // Star tree: D(i, j) = len(i) + len(j)
    fn star() -> DistanceMatrix {
        let tree = PhyloTree::from_newick("(A:1,B:2,C:3,D:1,E:2,F:3);").unwrap();
        DistanceMatrix::between_tips(&tree, &["A", "B", "C", "D", "E", "F"]).unwrap()
    }

    fn values() -> Vec<Option<f64>> {
        (1..=6).map(|v| Some(v as f64)).collect()
    }

    #[test]
    fn test_weighted_average_by_hand() {
        let dm = star();
        // A from B, D, F: distances 3, 2, 4
        let p = predict(0, &[1, 3, 5], &dm, &values(), &KernelParams::new(1.0, 0));
        assert_relative_eq!(p.value.unwrap(), 50.0 / 13.0, epsilon = 1e-12);
        assert_eq!(p.source, PredictionSource::Weighted { donors: 3 });
    }

    #[test]
    fn test_self_is_excluded() {
        let dm = star();
        let vals = values();
        let params = KernelParams::new(2.0, 0);
        let with_self = predict(0, &[0, 1, 3, 5], &dm, &vals, &params);
        let without = predict(0, &[1, 3, 5], &dm, &vals, &params);
        assert_eq!(with_self, without);
        assert!(with_self.value.unwrap().is_finite());
    }

    #[test]
    fn test_duplicate_tip_is_not_a_neighbor() {
        let tree = PhyloTree::from_newick("(A:1,B:2);").unwrap();
        let rows = vec![
            ("x".to_string(), "A".to_string()),
            ("x_dup".to_string(), "A".to_string()),
            ("y".to_string(), "B".to_string()),
        ];
        let dm = DistanceMatrix::for_species(&tree, &rows).unwrap();
        let vals = vec![None, Some(100.0), Some(4.0)];
        let p = predict(0, &[1, 2], &dm, &vals, &KernelParams::new(1.0, 0));
        assert_eq!(p.value, Some(4.0));
    }

    #[test]
    fn test_no_donor_values_is_missing() {
        let dm = star();
        let vals = vec![Some(1.0), None, None, None, None, None];
        let p = predict(0, &[1, 2, 3], &dm, &vals, &KernelParams::new(1.0, 0));
        assert_eq!(p.value, None);
        assert_eq!(p.source, PredictionSource::NoDonors);

        let p = predict(0, &[], &dm, &vals, &KernelParams::new(1.0, 0));
        assert_eq!(p.source, PredictionSource::NoDonors);
    }

    #[test]
    fn test_underflow_falls_back_to_donor_mean() {
        let tree =
            PhyloTree::from_newick("(T:1000000,U:1000000,V:1000000,W:2000000);").unwrap();
        let dm = DistanceMatrix::between_tips(&tree, &["T", "U", "V", "W"]).unwrap();
        let vals = vec![Some(9.0), Some(2.0), Some(4.0), Some(9.0)];
        // weights ~ 1/(2e6)^2 and 1/(3e6)^2, total far below 1e-9
        let p = predict(0, &[1, 2, 3], &dm, &vals, &KernelParams::new(2.0, 0));
        assert_eq!(p.source, PredictionSource::Fallback);
        assert_relative_eq!(p.value.unwrap(), 5.0, epsilon = 1e-12);
        assert!(p.used_fallback());
    }

    #[test]
    fn test_weight_monotonicity() {
        for &x in &[0.25, 0.5, 1.0, 1.5, 2.0, 4.0] {
            assert!(decay_weight(1.0, x) > decay_weight(2.0, x));
            assert!(decay_weight(0.1, x) > decay_weight(0.2, x));
        }
        assert_eq!(decay_weight(0.0, 1.0), 0.0);
        assert_eq!(decay_weight(-1.0, 1.0), 0.0);
    }

    #[test]
    fn test_exponent_zero_is_uniform_average() {
        let dm = star();
        let p = predict(0, &[1, 2, 3, 4, 5], &dm, &values(), &KernelParams::new(0.0, 0));
        assert_relative_eq!(p.value.unwrap(), (2.0 + 3.0 + 4.0 + 5.0 + 6.0) / 5.0);
    }

    #[test]
    fn test_k_truncation_keeps_nearest() {
        let dm = star();
        // From A: D at 2, B and E at 3, C and F at 4
        let p = predict(0, &[1, 2, 3, 4, 5], &dm, &values(), &KernelParams::new(1.0, 1));
        assert_eq!(p.value, Some(4.0));
        assert_eq!(p.source, PredictionSource::Weighted { donors: 1 });

        // Ties at distance 3 broken by row order: D, then B
        let p = predict(0, &[1, 2, 3, 4, 5], &dm, &values(), &KernelParams::new(1.0, 2));
        let expected = (4.0 / 2.0 + 2.0 / 3.0) / (1.0 / 2.0 + 1.0 / 3.0);
        assert_relative_eq!(p.value.unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_k_truncation_skips_donors_without_values() {
        let dm = star();
        let mut vals = values();
        vals[3] = None; // D, the nearest, has no value
        let p = predict(0, &[1, 2, 3, 4, 5], &dm, &vals, &KernelParams::new(1.0, 1));
        assert_eq!(p.value, Some(2.0));
    }

    #[test]
    fn test_weight_matrix_matches_kernel() {
        let dm = star();
        let w = WeightMatrix::from_distances(&dm, 1.5);
        let params = KernelParams::new(1.5, 0);
        let vals = values();
        let donors = [1, 2, 3];
        for target in [0, 4, 5] {
            let direct = predict(target, &donors, &dm, &vals, &params);
            let via_matrix = predict_with(target, &donors, &dm, &vals, &w, &params);
            assert_eq!(direct, via_matrix);
        }
        assert_eq!(w.get(2, 2), 0.0);
    }

    #[test]
    fn test_masked_view_zeroes_non_train_rows() {
        let dm = star();
        let w = WeightMatrix::from_distances(&dm, 1.0);
        let train = [false, true, false, true, false, true];
        let masked = w.masked(&train);
        for target in 0..6 {
            for donor in 0..6 {
                if !train[donor] {
                    assert_eq!(masked.weight(donor, target), 0.0);
                } else {
                    assert_eq!(masked.weight(donor, target), w.get(donor, target));
                }
            }
        }
        // Donor list wider than the mask: masked rows cannot contribute
        let vals = values();
        let params = KernelParams::new(1.0, 0);
        let p = predict_with(0, &[1, 2, 3, 4, 5], &dm, &vals, &masked, &params);
        let expected = predict(0, &[1, 3, 5], &dm, &vals, &params);
        assert_eq!(p, expected);
    }

    #[test]
    fn test_validate_params() {
        assert!(KernelParams::new(1.0, 0).validate().is_ok());
        assert!(KernelParams::new(-0.5, 0).validate().is_err());
        assert!(KernelParams::new(f64::NAN, 0).validate().is_err());
    }
}
