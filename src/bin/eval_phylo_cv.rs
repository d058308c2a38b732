//! Phylogenetic Neighbour Predictor Cross-Validation
//!
//! Repeated (stratified) k-fold evaluation of p_phylo per EIVE axis over a
//! grid of decay exponents and k-truncation values. Each axis uses a tree
//! pruned to the species with a known value on that axis.
//!
//! Output: one row per (axis, exponent, k_truncate) with mean/SD of R² and
//! MAE across folds × repeats; optionally a per-fold detail table.
//!
//! Usage:
//!   eval_phylo_cv --input eive.csv --tree tree.nwk --tip-mapping map.csv \
//!       --exponents 0.5,1,2 --repeats 5 --folds 10 --output cv_results.csv

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use eive_phylo_rust::cli::{banner, init_tracing, InputArgs};
use eive_phylo_rust::cv::{AxisData, CvHarness, CvSummary, FoldRecord};
use eive_phylo_rust::output::{cv_results_frame, fold_details_frame, write_table};
use eive_phylo_rust::{CvSettings, PhyloError, SettingsOverrides};

#[derive(Parser)]
#[command(author, version, about = "Fold-safe CV of the phylogenetic neighbour predictor")]
struct Args {
    #[command(flatten)]
    inputs: InputArgs,

    /// JSON settings file; explicit flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Decay exponents, comma separated [default: 0.5,1,1.5,2]
    #[arg(long, value_delimiter = ',')]
    exponents: Option<Vec<f64>>,

    /// k-nearest truncation values, 0 = all donors [default: 0]
    #[arg(long = "k", value_delimiter = ',')]
    k_truncate: Option<Vec<usize>>,

    /// Repeats [default: 5]
    #[arg(long)]
    repeats: Option<usize>,

    /// Folds per repeat [default: 10]
    #[arg(long)]
    folds: Option<usize>,

    /// Random seed [default: 42]
    #[arg(long)]
    seed: Option<u64>,

    /// Plain random folds instead of value-stratified folds
    #[arg(long)]
    no_stratify: bool,

    /// CV results table (CSV or Parquet)
    #[arg(long, default_value = "phylo_cv_results.csv")]
    output: PathBuf,

    /// Optional per-fold detail table
    #[arg(long)]
    fold_details: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            exponents: self.exponents.clone(),
            k_truncate: self.k_truncate.clone(),
            repeats: self.repeats,
            folds: self.folds,
            seed: self.seed,
            no_stratify: self.no_stratify,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    banner("PHYLOGENETIC NEIGHBOUR PREDICTOR: CROSS-VALIDATION");
    let total_start = Instant::now();

    let settings = CvSettings::resolve(args.config.as_deref(), args.overrides())?;
    let harness = CvHarness::new(settings)?;
    let settings = harness.settings();
    println!("\nSettings:");
    println!("  Exponents: {:?}", settings.exponents);
    println!("  k_truncate: {:?}", settings.k_truncate);
    println!(
        "  Repeats: {}  Folds: {}  Seed: {}  Stratified: {}",
        settings.repeats, settings.folds, settings.seed, settings.stratified
    );

    let inputs = args.inputs.load()?;

    let mut summaries: Vec<CvSummary> = Vec::new();
    let mut fold_records: Vec<FoldRecord> = Vec::new();
    let mut axes_evaluated = 0;

    for axis in &args.inputs.axes {
        println!("\n{}", "-".repeat(80));
        println!("Axis: {}", axis);
        let axis_start = Instant::now();

        let data = AxisData::build(&inputs.tree, &inputs.alignment, &inputs.table, axis);
        let report = match data.and_then(|d| harness.run_axis(&d)) {
            Ok(report) => report,
            Err(err @ PhyloError::InsufficientSpecies { .. }) => {
                tracing::warn!(axis = %axis, "skipping axis: {}", err);
                println!("  Skipped: {}", err);
                continue;
            }
            Err(err) => return Err(err).with_context(|| format!("CV failed for axis {}", axis)),
        };

        println!("  Species on tree with values: {}", report.n_species);
        println!(
            "  {:>8} {:>4} {:>10} {:>8} {:>10} {:>8} {:>9}",
            "exponent", "k", "R² mean", "R² SD", "MAE mean", "MAE SD", "fallback"
        );
        for s in &report.summaries {
            println!(
                "  {:>8.2} {:>4} {:>10} {:>8} {:>10} {:>8} {:>9}",
                s.exponent,
                s.k_truncate,
                fmt_opt(s.r2_mean),
                fmt_opt(s.r2_sd),
                fmt_opt(s.mae_mean),
                fmt_opt(s.mae_sd),
                format!("{}/{}", s.n_fallback, s.n_predictions),
            );
        }
        println!("  Time: {:.1}s", axis_start.elapsed().as_secs_f64());

        axes_evaluated += 1;
        summaries.extend(report.summaries);
        fold_records.extend(report.folds);
    }

    if summaries.is_empty() {
        anyhow::bail!("No axis could be evaluated");
    }

    println!("\nWriting results...");
    let mut df = cv_results_frame(&summaries)?;
    write_table(&mut df, &args.output)?;
    println!("  CV results: {} ({} rows)", args.output.display(), df.height());

    if let Some(path) = &args.fold_details {
        let mut details = fold_details_frame(&fold_records)?;
        write_table(&mut details, path)?;
        println!("  Fold details: {} ({} rows)", path.display(), details.height());
    }

    banner("COMPLETE");
    println!("  Axes evaluated: {}/{}", axes_evaluated, args.inputs.axes.len());
    println!("  Result rows: {}", summaries.len());
    println!("  Total time: {:.1}s", total_start.elapsed().as_secs_f64());
    println!("{}", "=".repeat(80));

    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| format!("{:.4}", v))
}
