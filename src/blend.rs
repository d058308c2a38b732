//! Model / Phylogenetic Blending
//!
//! ```text
//! blended = (1 − α) · model + α · p_phylo
//! ```
//!
//! α is configured per axis. Axes absent from the configuration are not
//! blended (callers keep the model prediction as is).

use crate::error::{PhyloError, PhyloResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Blend one pair of predictions
///
/// Non-finite inputs count as missing. With one side missing the other is
/// returned unchanged; with both missing the result is `None`.
pub fn blend(model: Option<f64>, phylo: Option<f64>, alpha: f64) -> Option<f64> {
    let model = model.filter(|v| v.is_finite());
    let phylo = phylo.filter(|v| v.is_finite());
    match (model, phylo) {
        (Some(m), Some(p)) => Some((1.0 - alpha) * m + alpha * p),
        (Some(m), None) => Some(m),
        (None, Some(p)) => Some(p),
        (None, None) => None,
    }
}

/// Per-axis blending weights, e.g. `{"EIVEres-L": 0.3, "EIVEres-M": 0.5}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlendConfig {
    alphas: BTreeMap<String, f64>,
}

impl BlendConfig {
    pub fn new(alphas: BTreeMap<String, f64>) -> PhyloResult<Self> {
        let config = Self { alphas };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PhyloError::MissingInput(path.to_path_buf()).into());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read blend config: {:?}", path))?;
        let config: BlendConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse blend config JSON: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PhyloResult<()> {
        for (axis, &alpha) in &self.alphas {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(PhyloError::invalid(
                    "alpha",
                    format!("{} for axis '{}' is outside [0, 1]", alpha, axis),
                ));
            }
        }
        Ok(())
    }

    pub fn alpha_for(&self, axis: &str) -> Option<f64> {
        self.alphas.get(axis).copied()
    }

    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.alphas.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.alphas.is_empty()
    }

    /// Configured axes that are not among `axes` (these never blend)
    pub fn axes_outside<'a>(&'a self, axes: &[String]) -> Vec<&'a str> {
        self.axes().filter(|a| !axes.iter().any(|x| x == a)).collect()
    }

    /// Blend a whole axis column; `None` if the axis is not configured
    pub fn blend_axis(
        &self,
        axis: &str,
        model: &[Option<f64>],
        phylo: &[Option<f64>],
    ) -> Option<Vec<Option<f64>>> {
        let alpha = self.alpha_for(axis)?;
        Some(
            model
                .iter()
                .zip(phylo)
                .map(|(&m, &p)| blend(m, p, alpha))
                .collect(),
        )
    }
}
