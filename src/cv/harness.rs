//! Fold-Safe Cross-Validation Harness
//!
//! For each repeat (seeded independently) species are split into folds. For
//! each fold the test species are predicted from training donors only:
//!
//! 1. W = 1/D^x is built once per exponent over ALL species of the axis,
//!    and dropped before the next exponent.
//! 2. Per fold, W is viewed through a training mask (non-train rows read 0)
//!    and the donor list is the training set. W itself is never modified.
//! 3. The fallback for a test species is the training-fold mean, which is
//!    what the predictor's donor-mean fallback computes over the train set.
//! 4. R² is taken against the training-fold mean.
//!
//! Repeats run in parallel; results are merged in repeat order.

use crate::alignment::Alignment;
use crate::config::CvSettings;
use crate::cv::folds::{assign_folds, repeat_rng};
use crate::cv::metrics::{mean, mean_absolute_error, r_squared, sample_sd, FoldMetrics};
use crate::data::SpeciesTable;
use crate::error::{PhyloError, PhyloResult};
use crate::predictor::{predict_with, KernelParams, NeighborPrediction, WeightMatrix};
use crate::tree::{DistanceMatrix, PhyloTree};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

/// Share of fallback predictions above which an axis is flagged
const FALLBACK_WARN_SHARE: f64 = 0.25;

/// More than a quarter of the predictions used the donor-mean fallback
pub(crate) fn relies_on_fallback(n_fallback: usize, n_predictions: usize) -> bool {
    n_predictions > 0 && n_fallback as f64 > FALLBACK_WARN_SHARE * n_predictions as f64
}

/// One axis ready for evaluation: species with a known value and a tree tip
///
/// `distances` rows are species IDs; `observed[i]` belongs to
/// `distances.labels()[i]`.
#[derive(Debug, Clone)]
pub struct AxisData {
    axis: String,
    distances: DistanceMatrix,
    observed: Vec<f64>,
    donor_values: Vec<Option<f64>>,
}

impl AxisData {
    /// Pair a species-labelled distance matrix with values looked up by label
    pub fn new(
        axis: impl Into<String>,
        distances: DistanceMatrix,
        values: &FxHashMap<&str, f64>,
    ) -> PhyloResult<Self> {
        let observed = distances
            .labels()
            .iter()
            .map(|label| {
                values.get(label.as_str()).copied().ok_or_else(|| {
                    PhyloError::invalid("values", format!("no value for species '{}'", label))
                })
            })
            .collect::<PhyloResult<Vec<f64>>>()?;
        let donor_values = observed.iter().map(|&v| Some(v)).collect();
        Ok(Self {
            axis: axis.into(),
            distances,
            observed,
            donor_values,
        })
    }

    /// Build the axis-context dataset: the tree is pruned to the species that
    /// have both a tip and a known value for `axis`.
    pub fn build(
        tree: &PhyloTree,
        alignment: &Alignment,
        table: &SpeciesTable,
        axis: &str,
    ) -> PhyloResult<Self> {
        if table.axis(axis).is_none() {
            return Err(PhyloError::MissingColumn {
                table: "species table".to_string(),
                column: axis.to_string(),
            });
        }
        let known = table.known_values(axis);
        let rows: Vec<(String, String)> = alignment
            .species_tips()
            .into_iter()
            .filter(|(id, _)| known.contains_key(id.as_str()))
            .collect();
        if rows.len() < 2 {
            return Err(PhyloError::InsufficientSpecies {
                axis: axis.to_string(),
                available: rows.len(),
                required: 2,
            });
        }
        let distances = DistanceMatrix::for_species(tree, &rows)?;
        Self::new(axis, distances, &known)
    }

    pub fn axis(&self) -> &str {
        &self.axis
    }

    pub fn distances(&self) -> &DistanceMatrix {
        &self.distances
    }

    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    pub fn labels(&self) -> &[String] {
        self.distances.labels()
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }
}

/// Predict every species of `fold` from the other folds
///
/// Returns (species index, prediction) for the test species in index order.
pub fn predict_fold(
    data: &AxisData,
    assignment: &[usize],
    fold: usize,
    weights: &WeightMatrix,
    params: &KernelParams,
) -> Vec<(usize, NeighborPrediction)> {
    let train_mask: Vec<bool> = assignment.iter().map(|&f| f != fold).collect();
    let train: Vec<usize> = (0..data.len()).filter(|&i| train_mask[i]).collect();
    let masked = weights.masked(&train_mask);

    (0..data.len())
        .filter(|&i| !train_mask[i])
        .map(|target| {
            let prediction = predict_with(
                target,
                &train,
                &data.distances,
                &data.donor_values,
                &masked,
                params,
            );
            (target, prediction)
        })
        .collect()
}

/// Score every fold of one assignment
pub fn evaluate_split(
    data: &AxisData,
    assignment: &[usize],
    n_folds: usize,
    weights: &WeightMatrix,
    params: &KernelParams,
    repeat: usize,
) -> Vec<FoldMetrics> {
    debug_assert_eq!(weights.exponent(), params.exponent);
    let mut results = Vec::with_capacity(n_folds);

    for fold in 0..n_folds {
        let n_test = assignment.iter().filter(|&&f| f == fold).count();
        if n_test == 0 {
            continue;
        }
        let train_values: Vec<f64> = assignment
            .iter()
            .zip(&data.observed)
            .filter(|(&f, _)| f != fold)
            .map(|(_, &v)| v)
            .collect();

        let predictions = predict_fold(data, assignment, fold, weights, params);
        let n_fallback = predictions.iter().filter(|(_, p)| p.used_fallback()).count();
        let (observed, predicted): (Vec<f64>, Vec<f64>) = predictions
            .iter()
            .filter_map(|(i, p)| p.value.map(|v| (data.observed[*i], v)))
            .unzip();

        let r2 = mean(&train_values).and_then(|m| r_squared(&observed, &predicted, m));
        let mae = mean_absolute_error(&observed, &predicted);

        tracing::debug!(
            axis = %data.axis,
            exponent = params.exponent,
            k = params.k_truncate,
            repeat,
            fold,
            n_test,
            n_fallback,
            ?r2,
            ?mae,
            "fold scored"
        );

        results.push(FoldMetrics {
            repeat,
            fold,
            n_test,
            n_train: train_values.len(),
            n_predicted: observed.len(),
            n_fallback,
            r2,
            mae,
        });
    }

    results
}

/// One row of the CV results table
#[derive(Debug, Clone, PartialEq)]
pub struct CvSummary {
    pub axis: String,
    pub exponent: f64,
    pub k_truncate: usize,
    pub repeats: usize,
    pub folds: usize,
    pub n_species: usize,
    /// Test predictions used in MAE (and R², where defined)
    pub n_predictions: usize,
    pub n_fallback: usize,
    pub r2_mean: Option<f64>,
    pub r2_sd: Option<f64>,
    pub mae_mean: Option<f64>,
    pub mae_sd: Option<f64>,
}

/// Aggregate fold × repeat metrics for one kernel setting
pub fn summarize(
    axis: &str,
    params: &KernelParams,
    repeats: usize,
    folds: usize,
    n_species: usize,
    metrics: &[FoldMetrics],
) -> CvSummary {
    let r2: Vec<f64> = metrics.iter().filter_map(|m| m.r2).collect();
    let mae: Vec<f64> = metrics.iter().filter_map(|m| m.mae).collect();
    CvSummary {
        axis: axis.to_string(),
        exponent: params.exponent,
        k_truncate: params.k_truncate,
        repeats,
        folds,
        n_species,
        n_predictions: metrics.iter().map(|m| m.n_predicted).sum(),
        n_fallback: metrics.iter().map(|m| m.n_fallback).sum(),
        r2_mean: mean(&r2),
        r2_sd: sample_sd(&r2),
        mae_mean: mean(&mae),
        mae_sd: sample_sd(&mae),
    }
}

/// Per-fold detail row
#[derive(Debug, Clone, PartialEq)]
pub struct FoldRecord {
    pub axis: String,
    pub exponent: f64,
    pub k_truncate: usize,
    pub metrics: FoldMetrics,
}

/// Everything produced for one axis
#[derive(Debug, Clone)]
pub struct AxisCvReport {
    pub axis: String,
    pub n_species: usize,
    pub summaries: Vec<CvSummary>,
    pub folds: Vec<FoldRecord>,
}

/// Repeated k-fold evaluation over the settings' kernel grid
pub struct CvHarness {
    settings: CvSettings,
}

impl CvHarness {
    pub fn new(settings: CvSettings) -> PhyloResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &CvSettings {
        &self.settings
    }

    pub fn run_axis(&self, data: &AxisData) -> PhyloResult<AxisCvReport> {
        let settings = &self.settings;
        if data.len() < settings.folds {
            return Err(PhyloError::InsufficientSpecies {
                axis: data.axis.clone(),
                available: data.len(),
                required: settings.folds,
            });
        }

        let grid = settings.kernel_grid();
        tracing::info!(
            axis = %data.axis,
            species = data.len(),
            repeats = settings.repeats,
            folds = settings.folds,
            settings = grid.len(),
            "running cross-validation"
        );

        // Fold assignments depend only on the seed and the values
        let assignments: Vec<Vec<usize>> = (0..settings.repeats)
            .map(|repeat| {
                let mut rng = repeat_rng(settings.seed, repeat);
                assign_folds(&data.observed, settings.folds, settings.stratified, &mut rng)
            })
            .collect();

        let mut summaries = Vec::with_capacity(grid.len());
        let mut folds = Vec::new();

        // Exponent-major grid: one chunk of k values per exponent, so only
        // one n × n weight matrix is alive at a time
        for kernels in grid.chunks(settings.k_truncate.len()) {
            let weights = WeightMatrix::from_distances(&data.distances, kernels[0].exponent);

            // per_repeat[r][kernel] = fold metrics
            let per_repeat: Vec<Vec<Vec<FoldMetrics>>> = assignments
                .par_iter()
                .enumerate()
                .map(|(repeat, assignment)| {
                    kernels
                        .iter()
                        .map(|params| {
                            evaluate_split(
                                data,
                                assignment,
                                settings.folds,
                                &weights,
                                params,
                                repeat,
                            )
                        })
                        .collect()
                })
                .collect();

            for (kernel, params) in kernels.iter().enumerate() {
                let metrics: Vec<FoldMetrics> = per_repeat
                    .iter()
                    .flat_map(|repeat| repeat[kernel].iter().cloned())
                    .collect();

                let summary = summarize(
                    &data.axis,
                    params,
                    settings.repeats,
                    settings.folds,
                    data.len(),
                    &metrics,
                );
                if relies_on_fallback(summary.n_fallback, summary.n_predictions) {
                    tracing::warn!(
                        axis = %data.axis,
                        exponent = params.exponent,
                        k = params.k_truncate,
                        fallback = summary.n_fallback,
                        predictions = summary.n_predictions,
                        "heavy reliance on training-mean fallback; phylogenetic signal may be weak"
                    );
                }
                summaries.push(summary);

                folds.extend(metrics.into_iter().map(|m| FoldRecord {
                    axis: data.axis.clone(),
                    exponent: params.exponent,
                    k_truncate: params.k_truncate,
                    metrics: m,
                }));
            }
        }

        Ok(AxisCvReport {
            axis: data.axis.clone(),
            n_species: data.len(),
            summaries,
            folds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn star_axis(values: [f64; 6]) -> AxisData {
        let tree = PhyloTree::from_newick("(A:1,B:2,C:3,D:1,E:2,F:3);").unwrap();
        let labels = ["A", "B", "C", "D", "E", "F"];
        let dm = DistanceMatrix::between_tips(&tree, &labels).unwrap();
        let map: FxHashMap<&str, f64> = labels.iter().copied().zip(values).collect();
        AxisData::new("L", dm, &map).unwrap()
    }

    #[test]
    fn test_fold_predictions_ignore_other_test_values() {
        let a = star_axis([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        // Only test-fold (A, C, E) values differ
        let b = star_axis([-50.0, 2.0, 99.0, 4.0, 1e6, 6.0]);
        let assignment = [0, 1, 0, 1, 0, 1];
        let params = KernelParams::new(1.0, 0);
        let wa = WeightMatrix::from_distances(a.distances(), 1.0);
        let wb = WeightMatrix::from_distances(b.distances(), 1.0);
        assert_eq!(
            predict_fold(&a, &assignment, 0, &wa, &params),
            predict_fold(&b, &assignment, 0, &wb, &params)
        );
    }

    #[test]
    fn test_manual_split_matches_hand_computation() {
        let data = star_axis([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let assignment = [0, 1, 0, 1, 0, 1];
        let params = KernelParams::new(1.0, 0);
        let w = WeightMatrix::from_distances(data.distances(), 1.0);
        let metrics = evaluate_split(&data, &assignment, 2, &w, &params, 0);
        assert_eq!(metrics.len(), 2);
        assert_relative_eq!(metrics[0].r2.unwrap(), 0.07566554739196651, epsilon = 1e-9);
        assert_relative_eq!(metrics[1].r2.unwrap(), -0.12082419537839595, epsilon = 1e-9);
        assert_relative_eq!(metrics[0].mae.unwrap(), 1.6219017708379406, epsilon = 1e-9);
        assert_eq!(metrics[0].n_fallback, 0);
        assert_eq!((metrics[0].n_test, metrics[0].n_train), (3, 3));
    }

    #[test]
    fn test_empty_fold_is_skipped() {
        let data = star_axis([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let w = WeightMatrix::from_distances(data.distances(), 1.0);
        let params = KernelParams::new(1.0, 0);
        let metrics = evaluate_split(&data, &[0, 0, 0, 2, 2, 2], 3, &w, &params, 0);
        assert_eq!(metrics.iter().map(|m| m.fold).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_run_axis_is_deterministic() {
        let data = star_axis([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let settings = CvSettings {
            exponents: vec![1.0, 2.0],
            k_truncate: vec![0, 2],
            repeats: 4,
            folds: 3,
            ..CvSettings::default()
        };
        let harness = CvHarness::new(settings).unwrap();
        let first = harness.run_axis(&data).unwrap();
        let second = harness.run_axis(&data).unwrap();
        assert_eq!(first.summaries, second.summaries);
        assert_eq!(first.summaries.len(), 4);
        assert_eq!(first.folds.len(), 4 * 4 * 3);
        assert!(first.summaries.iter().all(|s| s.n_predictions == 4 * 6));
        let grid: Vec<(f64, usize)> =
            first.summaries.iter().map(|s| (s.exponent, s.k_truncate)).collect();
        assert_eq!(grid, vec![(1.0, 0), (1.0, 2), (2.0, 0), (2.0, 2)]);
    }

    fn long_branch_axis() -> AxisData {
        let tree = PhyloTree::from_newick("(A:1e6,B:1e6,C:1e6,D:1e6);").unwrap();
        let labels = ["A", "B", "C", "D"];
        let dm = DistanceMatrix::between_tips(&tree, &labels).unwrap();
        let map: FxHashMap<&str, f64> =
            labels.iter().copied().zip([1.0, 2.0, 3.0, 10.0]).collect();
        AxisData::new("L", dm, &map).unwrap()
    }

    #[test]
    fn test_underflowing_weights_fall_back_to_training_mean() {
        // d = 2e6, w = 1/d² = 2.5e-13 per donor: weight sum stays below epsilon
        let data = long_branch_axis();
        let assignment = [0, 1, 0, 1];
        let params = KernelParams::new(2.0, 0);
        let w = WeightMatrix::from_distances(data.distances(), 2.0);
        let metrics = evaluate_split(&data, &assignment, 2, &w, &params, 0);

        // Fold 0: train mean (2 + 10) / 2 = 6, |1 - 6| and |3 - 6|
        // Fold 1: train mean (1 + 3) / 2 = 2, |2 - 2| and |10 - 2|
        for m in &metrics {
            assert_eq!(m.n_fallback, m.n_test);
            assert_eq!(m.n_predicted, 2);
            assert_relative_eq!(m.mae.unwrap(), 4.0);
            assert_relative_eq!(m.r2.unwrap(), 0.0, epsilon = 1e-12);
        }

        let predictions = predict_fold(&data, &assignment, 0, &w, &params);
        assert!(predictions.iter().all(|(_, p)| p.value == Some(6.0)));
    }

    #[test]
    fn test_run_axis_counts_fallback() {
        let data = long_branch_axis();
        let settings = CvSettings {
            exponents: vec![0.0, 2.0],
            repeats: 3,
            folds: 2,
            ..CvSettings::default()
        };
        let report = CvHarness::new(settings).unwrap().run_axis(&data).unwrap();

        let uniform = &report.summaries[0];
        assert_eq!(uniform.n_fallback, 0);
        assert!(!relies_on_fallback(uniform.n_fallback, uniform.n_predictions));

        let steep = &report.summaries[1];
        assert_eq!(steep.n_predictions, 3 * 4);
        assert_eq!(steep.n_fallback, steep.n_predictions);
        assert!(relies_on_fallback(steep.n_fallback, steep.n_predictions));
        assert!(report
            .folds
            .iter()
            .filter(|r| r.exponent == 2.0)
            .all(|r| r.metrics.n_fallback == r.metrics.n_test));
    }

    #[test]
    fn test_fallback_share_threshold() {
        assert!(!relies_on_fallback(0, 0));
        assert!(!relies_on_fallback(1, 4));
        assert!(relies_on_fallback(2, 4));
        assert!(relies_on_fallback(10, 10));
    }

    #[test]
    fn test_too_few_species_for_folds() {
        let data = star_axis([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let harness = CvHarness::new(CvSettings::default()).unwrap();
        assert!(matches!(
            harness.run_axis(&data),
            Err(PhyloError::InsufficientSpecies { available: 6, required: 10, .. })
        ));
    }

    #[test]
    fn test_axis_data_requires_value_for_every_label() {
        let tree = PhyloTree::from_newick("(A:1,B:2);").unwrap();
        let dm = DistanceMatrix::between_tips(&tree, &["A", "B"]).unwrap();
        let mut map = FxHashMap::default();
        map.insert("A", 1.0);
        assert!(AxisData::new("L", dm, &map).is_err());
    }
}
