//! Fold-Safe Cross-Validation
//!
//! - `folds`: seeded (optionally stratified) fold assignment
//! - `metrics`: per-fold R² / MAE and their aggregation
//! - `harness`: repeated k-fold evaluation over an exponent × k grid

pub mod folds;
pub mod harness;
pub mod metrics;

pub use folds::{assign_folds, repeat_rng};
pub use harness::{
    evaluate_split, predict_fold, summarize, AxisCvReport, AxisData, CvHarness, CvSummary,
    FoldRecord,
};
pub use metrics::{mean, mean_absolute_error, r_squared, sample_sd, FoldMetrics};
