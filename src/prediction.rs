//! Prediction Mode
//!
//! p_phylo for every species in the table: each matched species is predicted
//! from all OTHER species with a known value on that axis. Unmatched species
//! get an explicit null. Every output vector follows the species table's row
//! order and is keyed by species ID, so joins downstream go by ID.

use crate::alignment::Alignment;
use crate::blend::BlendConfig;
use crate::cv::harness::relies_on_fallback;
use crate::data::{ModelPredictions, SpeciesTable};
use crate::error::{PhyloError, PhyloResult};
use crate::predictor::{predict_with, KernelParams, PredictionSource, WeightMatrix};
use crate::tree::{DistanceMatrix, PhyloTree};
use rayon::prelude::*;

/// p_phylo for one axis, aligned to the species table rows
#[derive(Debug, Clone)]
pub struct AxisPrediction {
    pub axis: String,
    pub values: Vec<Option<f64>>,
    /// Species on the tree with a known value (the donor pool)
    pub n_donors: usize,
    pub n_fallback: usize,
    /// Matched species that still received no value
    pub n_no_donors: usize,
    /// Set by [`PhyloPredictions::blend_with`] for configured axes
    pub blended: Option<Vec<Option<f64>>>,
}

impl AxisPrediction {
    pub fn n_predicted(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Share of all table species with a p_phylo value
    pub fn coverage(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.n_predicted() as f64 / self.values.len() as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhyloPredictions {
    pub species_ids: Vec<String>,
    pub params: KernelParams,
    pub n_matched: usize,
    pub axes: Vec<AxisPrediction>,
}

impl PhyloPredictions {
    pub fn axis(&self, name: &str) -> Option<&AxisPrediction> {
        self.axes.iter().find(|a| a.axis == name)
    }

    pub fn value(&self, species_id: &str, axis: &str) -> Option<f64> {
        let row = self.species_ids.iter().position(|id| id == species_id)?;
        self.axis(axis)?.values[row]
    }

    /// Blend configured axes with a model table joined by species ID
    ///
    /// Species missing from the model table blend as a missing model value.
    pub fn blend_with(&mut self, model: &ModelPredictions, config: &BlendConfig) {
        for axis in &mut self.axes {
            let model_values: Vec<Option<f64>> = self
                .species_ids
                .iter()
                .map(|id| model.get(id, &axis.axis))
                .collect();
            axis.blended = config.blend_axis(&axis.axis, &model_values, &axis.values);
            if axis.blended.is_none() {
                tracing::debug!(axis = %axis.axis, "no alpha configured; axis not blended");
            }
        }
    }
}

/// Compute p_phylo for every species in `table` and every axis in `axes`
pub fn predict_table(
    tree: &PhyloTree,
    alignment: &Alignment,
    table: &SpeciesTable,
    axes: &[String],
    params: &KernelParams,
) -> PhyloResult<PhyloPredictions> {
    params.validate()?;
    alignment.ensure_any_matched()?;

    let axis_values = axes
        .iter()
        .map(|axis| {
            table.axis(axis).ok_or_else(|| PhyloError::MissingColumn {
                table: "species table".to_string(),
                column: axis.clone(),
            })
        })
        .collect::<PhyloResult<Vec<_>>>()?;

    let rows = alignment.species_tips();
    let distances = DistanceMatrix::for_species(tree, &rows)?;
    let weights = WeightMatrix::from_distances(&distances, params.exponent);

    // matrix row -> table row
    let table_rows: Vec<usize> = distances
        .labels()
        .iter()
        .map(|id| {
            table.row_of(id).ok_or_else(|| {
                PhyloError::invalid("alignment", format!("species '{}' not in table", id))
            })
        })
        .collect::<PhyloResult<_>>()?;

    tracing::info!(
        species = table.len(),
        matched = distances.len(),
        exponent = params.exponent,
        k = params.k_truncate,
        "computing p_phylo"
    );

    let mut predictions = Vec::with_capacity(axes.len());
    for values in axis_values {
        let on_tree: Vec<Option<f64>> = table_rows.iter().map(|&r| values.values[r]).collect();
        let donors: Vec<usize> = (0..on_tree.len()).filter(|&i| on_tree[i].is_some()).collect();

        let results: Vec<_> = (0..on_tree.len())
            .into_par_iter()
            .map(|target| predict_with(target, &donors, &distances, &on_tree, &weights, params))
            .collect();

        let mut out = vec![None; table.len()];
        let mut n_fallback = 0;
        let mut n_no_donors = 0;
        for (target, prediction) in results.iter().enumerate() {
            out[table_rows[target]] = prediction.value;
            match prediction.source {
                PredictionSource::Fallback => n_fallback += 1,
                PredictionSource::NoDonors => n_no_donors += 1,
                PredictionSource::Weighted { .. } => {}
            }
        }

        if relies_on_fallback(n_fallback, results.len()) {
            tracing::warn!(
                axis = %values.name,
                fallback = n_fallback,
                predictions = results.len(),
                "heavy reliance on donor-mean fallback"
            );
        }

        predictions.push(AxisPrediction {
            axis: values.name.clone(),
            values: out,
            n_donors: donors.len(),
            n_fallback,
            n_no_donors,
            blended: None,
        });
    }

    Ok(PhyloPredictions {
        species_ids: table.ids.clone(),
        params: *params,
        n_matched: distances.len(),
        axes: predictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::TipAligner;
    use approx::assert_relative_eq;
    use polars::prelude::*;

    fn fixture() -> (PhyloTree, SpeciesTable) {
        let tree = PhyloTree::from_newick("((Aa_a:1,Bb_b:1):1,(Cc_c:1,Dd_d:3):1);").unwrap();
        let df = df!(
            "id" => ["s1", "s2", "s3", "s4", "s5"],
            "name" => ["Aa a", "Bb b", "Cc c", "Dd d", "Zz z"],
            "L" => [Some(2.0), Some(4.0), None, Some(8.0), Some(1.0)]
        )
        .unwrap();
        let table =
            SpeciesTable::from_dataframe(&df, "species", "id", Some("name"), &["L".to_string()])
                .unwrap();
        (tree, table)
    }

    #[test]
    fn test_every_matched_species_predicted_without_self() {
        let (tree, table) = fixture();
        let alignment = TipAligner::new(&tree).align(&table.ids, &table.names);
        let preds =
            predict_table(&tree, &alignment, &table, &["L".to_string()], &KernelParams::new(1.0, 0))
                .unwrap();
        let axis = preds.axis("L").unwrap();

        // s1: donors s2 (d=2) and s4 (d=6): (4/2 + 8/6) / (1/2 + 1/6)
        let expected = (4.0 / 2.0 + 8.0 / 6.0) / (1.0 / 2.0 + 1.0 / 6.0);
        assert_relative_eq!(preds.value("s1", "L").unwrap(), expected, epsilon = 1e-12);
        // s3 has no value but is on the tree, so it is predicted
        assert!(preds.value("s3", "L").is_some());
        // s5 is not on the tree
        assert_eq!(preds.value("s5", "L"), None);
        assert_eq!(axis.n_donors, 3);
        assert_eq!(preds.n_matched, 4);
        assert_relative_eq!(axis.coverage(), 0.8);
    }

    #[test]
    fn test_missing_axis_is_fatal() {
        let (tree, table) = fixture();
        let alignment = TipAligner::new(&tree).align(&table.ids, &table.names);
        let params = KernelParams::new(1.0, 0);
        let result = predict_table(&tree, &alignment, &table, &["T".to_string()], &params);
        assert!(matches!(result, Err(PhyloError::MissingColumn { .. })));
    }

    #[test]
    fn test_underflowing_axis_falls_back_to_donor_mean() {
        let tree = PhyloTree::from_newick("(a:1e6,b:1e6,c:1e6);").unwrap();
        let df = df!(
            "id" => ["s1", "s2", "s3"],
            "name" => ["a", "b", "c"],
            "L" => [1.0, 2.0, 3.0]
        )
        .unwrap();
        let axes = ["L".to_string()];
        let table = SpeciesTable::from_dataframe(&df, "species", "id", Some("name"), &axes)
            .unwrap();
        let alignment = TipAligner::new(&tree).align(&table.ids, &table.names);
        let preds = predict_table(&tree, &alignment, &table, &axes, &KernelParams::new(2.0, 0))
            .unwrap();
        let axis = preds.axis("L").unwrap();

        assert_eq!(axis.n_donors, 3);
        assert_eq!(axis.n_fallback, 3);
        assert_eq!(axis.n_no_donors, 0);
        // Unweighted mean of the other two species
        assert_relative_eq!(preds.value("s1", "L").unwrap(), 2.5);
        assert_relative_eq!(preds.value("s3", "L").unwrap(), 1.5);
    }

    #[test]
    fn test_single_known_value_leaves_its_owner_without_donors() {
        let tree = PhyloTree::from_newick("((Aa_a:1,Bb_b:1):1,(Cc_c:1,Dd_d:3):1);").unwrap();
        let df = df!(
            "id" => ["s1", "s2", "s3", "s4", "s5"],
            "name" => ["Aa a", "Bb b", "Cc c", "Dd d", "Zz z"],
            "S" => [Some(5.0), None, None, None, None]
        )
        .unwrap();
        let axes = ["S".to_string()];
        let table = SpeciesTable::from_dataframe(&df, "species", "id", Some("name"), &axes)
            .unwrap();
        let alignment = TipAligner::new(&tree).align(&table.ids, &table.names);
        let preds = predict_table(&tree, &alignment, &table, &axes, &KernelParams::new(2.0, 0))
            .unwrap();
        let axis = preds.axis("S").unwrap();

        assert_eq!(axis.n_donors, 1);
        assert_eq!(axis.n_no_donors, 1);
        assert_eq!(axis.n_fallback, 0);
        assert_eq!(preds.value("s1", "S"), None);
        for id in ["s2", "s3", "s4"] {
            assert_relative_eq!(preds.value(id, "S").unwrap(), 5.0);
        }
        assert_eq!(preds.value("s5", "S"), None);
        assert_eq!(axis.n_predicted(), 3);
    }

    #[test]
    fn test_blend_joins_by_id() {
        let (tree, table) = fixture();
        let alignment = TipAligner::new(&tree).align(&table.ids, &table.names);
        let mut preds =
            predict_table(&tree, &alignment, &table, &["L".to_string()], &KernelParams::new(1.0, 0))
                .unwrap();
        // Model rows deliberately in a different order from the species table
        let model = ModelPredictions::from_rows(
            vec!["L".to_string()],
            vec![
                ("s5".to_string(), vec![Some(7.0)]),
                ("s1".to_string(), vec![Some(0.0)]),
            ],
        );
        let config: BlendConfig = serde_json::from_str(r#"{ "L": 0.5 }"#).unwrap();
        preds.blend_with(&model, &config);

        let axis = preds.axis("L").unwrap();
        let blended = axis.blended.as_ref().unwrap();
        let p1 = axis.values[0].unwrap();
        assert_relative_eq!(blended[0].unwrap(), 0.5 * p1);
        // s2 has no model value: raw p_phylo
        assert_eq!(blended[1], axis.values[1]);
        // s5 has no p_phylo: model value
        assert_eq!(blended[4], Some(7.0));
    }
}
