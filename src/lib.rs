//! Phylogenetic Neighbour Predictor for EIVE Indicator Values
//!
//! Estimates a species' indicator value on each EIVE axis (L, M, R, N, T) as
//! a distance-weighted average of its phylogenetic neighbours' values
//! (p_phylo), and evaluates that estimate with fold-safe repeated k-fold CV.
//!
//! Module layout:
//! - `tree/`: Newick parsing, arena tree, pruning, patristic distances
//! - `alignment`: species → tree tip matching
//! - `data`: species, tip mapping and model prediction tables (Polars)
//! - `predictor`: 1/d^x kernel, masked weights, neighbour-weighted estimate
//! - `cv/`: fold assignment, metrics, the CV harness
//! - `prediction`: p_phylo for every species, optional blending
//! - `blend`: convex model/p_phylo blending with per-axis alpha
//! - `config`, `output`, `cli`: settings, result tables, binary plumbing

pub mod alignment;
pub mod blend;
pub mod cli;
pub mod config;
pub mod cv;
pub mod data;
pub mod error;
pub mod output;
pub mod prediction;
pub mod predictor;
pub mod tree;

// Re-export commonly used types
pub use alignment::{Alignment, MatchStrategy, TipAligner, TipMatch};
pub use blend::{blend, BlendConfig};
pub use config::{CvSettings, SettingsOverrides};
pub use cv::{AxisCvReport, AxisData, CvHarness, CvSummary};
pub use data::{ModelPredictions, SpeciesTable, DEFAULT_AXES};
pub use error::{PhyloError, PhyloResult};
pub use prediction::{predict_table, AxisPrediction, PhyloPredictions};
pub use predictor::{
    predict, predict_with, KernelParams, NeighborPrediction, NeighborWeights, PredictionSource,
    WeightMatrix,
};
pub use tree::{DistanceMatrix, PhyloTree};
