//! Compute p_phylo for Every Species
//!
//! Each species on the tree is predicted from all other species with a known
//! value on the axis. Species not on the tree get nulls. Optionally blends
//! p_phylo with an external model-prediction table (joined by species ID)
//! using per-axis alpha from a JSON file.
//!
//! Output columns: <id>, p_phylo_<L|M|...>, p_phylo_<letter>_blended (blended
//! axes only). The letter is the part of the axis name after the last '-'.
//!
//! Usage:
//!   compute_phylo_predictor --input eive.csv --tree tree.nwk --tip-mapping map.csv \
//!       --exponent 2 --output p_phylo.parquet \
//!       [--model-preds sem_preds.csv --blend-config alpha.json]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use eive_phylo_rust::cli::{banner, init_tracing, InputArgs};
use eive_phylo_rust::output::{coverage_frame, predictions_frame, write_table};
use eive_phylo_rust::{predict_table, BlendConfig, KernelParams, ModelPredictions};

#[derive(Parser)]
#[command(author, version, about = "Per-species phylogenetic neighbour predictions")]
struct Args {
    #[command(flatten)]
    inputs: InputArgs,

    /// Decay exponent x in w = 1/d^x
    #[arg(long, default_value = "2.0")]
    exponent: f64,

    /// Keep only the k nearest donors (0 = all)
    #[arg(long = "k", default_value = "0")]
    k_truncate: usize,

    /// Independent model predictions to blend with (CSV or Parquet)
    #[arg(long, requires = "blend_config")]
    model_preds: Option<PathBuf>,

    /// ID column of the model prediction table (defaults to --id-col)
    #[arg(long)]
    model_id_col: Option<String>,

    /// Per-axis alpha JSON, e.g. {"EIVEres-L": 0.3}
    #[arg(long, requires = "model_preds")]
    blend_config: Option<PathBuf>,

    /// Prediction table (CSV or Parquet)
    #[arg(long, default_value = "p_phylo_predictions.parquet")]
    output: PathBuf,

    /// Optional per-axis coverage table
    #[arg(long)]
    coverage: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    banner("PHYLOGENETIC NEIGHBOUR PREDICTOR");
    let total_start = Instant::now();

    let params = KernelParams::new(args.exponent, args.k_truncate);
    params.validate()?;
    println!("\nKernel: w = 1/d^{}  k_truncate = {}", params.exponent, params.k_truncate);

    let blending = match (&args.model_preds, &args.blend_config) {
        (Some(preds), Some(config)) => {
            let config = BlendConfig::load(config)?;
            if config.is_empty() {
                tracing::warn!("blend config has no axes; nothing will be blended");
            }
            for axis in config.axes_outside(&args.inputs.axes) {
                tracing::warn!(axis, "blend config names an axis that is not being predicted");
            }
            let id_col = args.model_id_col.as_deref().unwrap_or(&args.inputs.id_col);
            let model = ModelPredictions::load(preds, id_col, &args.inputs.axes)?;
            println!("  Model predictions: {} species", model.len());
            Some((model, config))
        }
        _ => None,
    };

    let inputs = args.inputs.load()?;

    let compute_start = Instant::now();
    let mut predictions = predict_table(
        &inputs.tree,
        &inputs.alignment,
        &inputs.table,
        &args.inputs.axes,
        &params,
    )
    .context("Failed to compute p_phylo")?;
    println!("\nComputed in {:.1}s", compute_start.elapsed().as_secs_f64());

    if let Some((model, config)) = &blending {
        predictions.blend_with(model, config);
    }

    println!("\nCoverage:");
    for axis in &predictions.axes {
        let alpha = blending
            .as_ref()
            .and_then(|(_, config)| config.alpha_for(&axis.axis))
            .map_or_else(|| "-".to_string(), |a| format!("{:.2}", a));
        println!(
            "  {:<12} {}/{} ({:.1}%)  donors: {}  fallback: {}  no donors: {}  alpha: {}",
            axis.axis,
            axis.n_predicted(),
            axis.values.len(),
            axis.coverage() * 100.0,
            axis.n_donors,
            axis.n_fallback,
            axis.n_no_donors,
            alpha,
        );
    }

    println!("\nWriting results...");
    let mut df = predictions_frame(&predictions, &args.inputs.id_col)?;
    write_table(&mut df, &args.output)?;
    println!(
        "  Predictions: {} ({} rows × {} cols)",
        args.output.display(),
        df.height(),
        df.width()
    );

    if let Some(path) = &args.coverage {
        let mut coverage = coverage_frame(&predictions)?;
        write_table(&mut coverage, path)?;
        println!("  Coverage: {}", path.display());
    }

    banner("COMPLETE");
    println!("  Species: {}", predictions.species_ids.len());
    println!("  On tree: {}", predictions.n_matched);
    println!("  Total time: {:.1}s", total_start.elapsed().as_secs_f64());
    println!("{}", "=".repeat(80));

    Ok(())
}
