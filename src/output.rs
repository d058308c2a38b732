//! Result Tables
//!
//! Converts CV summaries, fold details and predictions into DataFrames and
//! writes them as CSV or Parquet (ZSTD) depending on the file extension.

use crate::cv::{CvSummary, FoldRecord};
use crate::prediction::PhyloPredictions;
use anyhow::{Context, Result};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;

/// Write `df` to `path`, creating parent directories as needed
pub fn write_table(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;

    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"));

    if is_parquet {
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Zstd(None))
            .finish(df)
            .with_context(|| format!("Failed to write parquet: {}", path.display()))?;
    } else {
        CsvWriter::new(file)
            .include_header(true)
            .finish(df)
            .with_context(|| format!("Failed to write CSV: {}", path.display()))?;
    }
    Ok(())
}

fn counts(values: impl Iterator<Item = usize>) -> Vec<u64> {
    values.map(|v| v as u64).collect()
}

/// Short axis name used in prediction columns: `EIVEres-L` -> `L`
pub fn axis_suffix(axis: &str) -> &str {
    axis.rsplit_once('-').map_or(axis, |(_, suffix)| suffix)
}

/// One row per (axis, exponent, k_truncate)
pub fn cv_results_frame(summaries: &[CvSummary]) -> PolarsResult<DataFrame> {
    let s = summaries;
    DataFrame::new(vec![
        Series::new("axis".into(), s.iter().map(|s| s.axis.as_str()).collect::<Vec<_>>()).into(),
        Series::new("exponent".into(), s.iter().map(|s| s.exponent).collect::<Vec<_>>()).into(),
        Series::new("k_truncate".into(), counts(s.iter().map(|s| s.k_truncate))).into(),
        Series::new("repeats".into(), counts(s.iter().map(|s| s.repeats))).into(),
        Series::new("folds".into(), counts(s.iter().map(|s| s.folds))).into(),
        Series::new("n_species".into(), counts(s.iter().map(|s| s.n_species))).into(),
        Series::new("n_predictions".into(), counts(s.iter().map(|s| s.n_predictions))).into(),
        Series::new("n_fallback".into(), counts(s.iter().map(|s| s.n_fallback))).into(),
        Series::new("r2_mean".into(), s.iter().map(|s| s.r2_mean).collect::<Vec<_>>()).into(),
        Series::new("r2_sd".into(), s.iter().map(|s| s.r2_sd).collect::<Vec<_>>()).into(),
        Series::new("mae_mean".into(), s.iter().map(|s| s.mae_mean).collect::<Vec<_>>()).into(),
        Series::new("mae_sd".into(), s.iter().map(|s| s.mae_sd).collect::<Vec<_>>()).into(),
    ])
}

/// One row per (axis, exponent, k_truncate, repeat, fold)
pub fn fold_details_frame(records: &[FoldRecord]) -> PolarsResult<DataFrame> {
    let r = records;
    let metrics: Vec<_> = r.iter().map(|r| &r.metrics).collect();
    let m = &metrics;
    DataFrame::new(vec![
        Series::new("axis".into(), r.iter().map(|r| r.axis.as_str()).collect::<Vec<_>>()).into(),
        Series::new("exponent".into(), r.iter().map(|r| r.exponent).collect::<Vec<_>>()).into(),
        Series::new("k_truncate".into(), counts(r.iter().map(|r| r.k_truncate))).into(),
        Series::new("repeat".into(), counts(m.iter().map(|m| m.repeat))).into(),
        Series::new("fold".into(), counts(m.iter().map(|m| m.fold))).into(),
        Series::new("n_test".into(), counts(m.iter().map(|m| m.n_test))).into(),
        Series::new("n_train".into(), counts(m.iter().map(|m| m.n_train))).into(),
        Series::new("n_predicted".into(), counts(m.iter().map(|m| m.n_predicted))).into(),
        Series::new("n_fallback".into(), counts(m.iter().map(|m| m.n_fallback))).into(),
        Series::new("r2".into(), m.iter().map(|m| m.r2).collect::<Vec<_>>()).into(),
        Series::new("mae".into(), m.iter().map(|m| m.mae).collect::<Vec<_>>()).into(),
    ])
}

/// Per-species predictions: `id_col`, then `p_phylo_{suffix}` and, for
/// blended axes, `p_phylo_{suffix}_blended`
pub fn predictions_frame(predictions: &PhyloPredictions, id_col: &str) -> PolarsResult<DataFrame> {
    let mut columns: Vec<Column> =
        vec![Series::new(id_col.into(), predictions.species_ids.clone()).into()];
    for axis in &predictions.axes {
        let name = format!("p_phylo_{}", axis_suffix(&axis.axis));
        columns.push(Series::new(name.as_str().into(), axis.values.clone()).into());
        if let Some(blended) = &axis.blended {
            let blended_name = format!("{}_blended", name);
            columns.push(Series::new(blended_name.into(), blended.clone()).into());
        }
    }
    DataFrame::new(columns)
}

/// Per-axis coverage report for prediction mode
pub fn coverage_frame(predictions: &PhyloPredictions) -> PolarsResult<DataFrame> {
    let a = &predictions.axes;
    let n_matched = predictions.n_matched;
    DataFrame::new(vec![
        Series::new("axis".into(), a.iter().map(|a| a.axis.as_str()).collect::<Vec<_>>()).into(),
        Series::new("n_species".into(), counts(a.iter().map(|a| a.values.len()))).into(),
        Series::new("n_matched".into(), counts(a.iter().map(|_| n_matched))).into(),
        Series::new("n_donors".into(), counts(a.iter().map(|a| a.n_donors))).into(),
        Series::new("n_predicted".into(), counts(a.iter().map(|a| a.n_predicted()))).into(),
        Series::new("n_fallback".into(), counts(a.iter().map(|a| a.n_fallback))).into(),
        Series::new("coverage".into(), a.iter().map(|a| a.coverage()).collect::<Vec<_>>()).into(),
    ])
}
