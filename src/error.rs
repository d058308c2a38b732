//! Error taxonomy for the phylogenetic predictor pipeline
//!
//! Only fatal conditions live here. Expected data states (a species without
//! a tree tip, an axis value that is missing, a prediction that had to fall
//! back to the donor mean) are modelled with `Option` and enums instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhyloError {
    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("column '{column}' not found in {table}")]
    MissingColumn { table: String, column: String },

    #[error("newick parse error at byte {position}: {message}")]
    Newick { position: usize, message: String },

    #[error("negative branch length {length} on node '{label}'")]
    NegativeBranchLength { label: String, length: f64 },

    #[error("tip label '{0}' appears more than once in the tree")]
    DuplicateTip(String),

    #[error("tip label '{0}' is not present in the tree")]
    UnknownTip(String),

    #[error("no species matched the tree ({total} species tried)")]
    NoSpeciesMatched { total: usize },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("axis '{axis}' has {available} species with values, need at least {required}")]
    InsufficientSpecies {
        axis: String,
        available: usize,
        required: usize,
    },

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type PhyloResult<T> = std::result::Result<T, PhyloError>;

impl PhyloError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        PhyloError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
