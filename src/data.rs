//! Data Loading and Management
//!
//! Loads the species indicator table, the optional species ID → tree tip
//! mapping and the optional external model-prediction table with Polars.
//! CSV or Parquet is chosen from the file extension.
//!
//! Every table is keyed by species ID. Downstream code joins on that key and
//! never relies on two tables sharing row order.

use crate::error::{PhyloError, PhyloResult};
use anyhow::{Context, Result};
use polars::prelude::*;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::path::Path;

/// Default EIVE axis columns (Light, Moisture, Reaction, Nutrients, Temperature)
pub const DEFAULT_AXES: [&str; 5] =
    ["EIVEres-L", "EIVEres-M", "EIVEres-R", "EIVEres-N", "EIVEres-T"];

/// Read a CSV or Parquet file into a DataFrame
pub fn read_table(path: &Path) -> PhyloResult<DataFrame> {
    if !path.exists() {
        return Err(PhyloError::MissingInput(path.to_path_buf()));
    }

    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"));

    let df = if is_parquet {
        ParquetReader::new(File::open(path)?).finish()?
    } else {
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(10_000))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?
    };
    Ok(df)
}

fn require_column<'a>(df: &'a DataFrame, table: &str, name: &str) -> PhyloResult<&'a Column> {
    df.column(name).map_err(|_| PhyloError::MissingColumn {
        table: table.to_string(),
        column: name.to_string(),
    })
}

/// String view of a column (non-string IDs are cast)
fn string_values(df: &DataFrame, table: &str, name: &str) -> PhyloResult<Vec<Option<String>>> {
    let column = require_column(df, table, name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty() && s != "NA"))
        .collect())
}

/// Numeric view of a column; nulls and non-finite values become `None`
fn float_values(df: &DataFrame, table: &str, name: &str) -> PhyloResult<Vec<Option<f64>>> {
    let column = require_column(df, table, name)?.cast(&DataType::Float64)?;
    Ok(column
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

/// Indicator values for one axis, parallel to `SpeciesTable::ids`
#[derive(Debug, Clone)]
pub struct AxisValues {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl AxisValues {
    pub fn known_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// One row per species: ID, scientific name, up to N indicator axes
#[derive(Debug, Clone)]
pub struct SpeciesTable {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub axes: Vec<AxisValues>,
    index: FxHashMap<String, usize>,
}

impl SpeciesTable {
    /// Load species table
    ///
    /// `name_col` falls back to the ID column when not given. Rows with a
    /// missing ID are dropped; repeated IDs keep the first row.
    pub fn load(
        path: &Path,
        id_col: &str,
        name_col: Option<&str>,
        axis_cols: &[String],
    ) -> Result<Self> {
        let df = read_table(path)
            .with_context(|| format!("Failed to load species table: {}", path.display()))?;
        let table = path.display().to_string();
        Self::from_dataframe(&df, &table, id_col, name_col, axis_cols)
            .with_context(|| format!("Invalid species table: {}", path.display()))
    }

    pub fn from_dataframe(
        df: &DataFrame,
        table: &str,
        id_col: &str,
        name_col: Option<&str>,
        axis_cols: &[String],
    ) -> PhyloResult<Self> {
        let raw_ids = string_values(df, table, id_col)?;
        let raw_names = match name_col {
            Some(col) => string_values(df, table, col)?,
            None => raw_ids.clone(),
        };
        let raw_axes = axis_cols
            .iter()
            .map(|col| float_values(df, table, col).map(|v| (col.clone(), v)))
            .collect::<PhyloResult<Vec<_>>>()?;

        let mut table = SpeciesTable {
            ids: Vec::with_capacity(raw_ids.len()),
            names: Vec::with_capacity(raw_ids.len()),
            axes: raw_axes
                .iter()
                .map(|(name, _)| AxisValues {
                    name: name.clone(),
                    values: Vec::with_capacity(raw_ids.len()),
                })
                .collect(),
            index: FxHashMap::default(),
        };

        for (row, id) in raw_ids.into_iter().enumerate() {
            let Some(id) = id else { continue };
            if table.index.contains_key(&id) {
                continue;
            }
            table.index.insert(id.clone(), table.ids.len());
            let name = raw_names[row].clone().unwrap_or_else(|| id.clone());
            table.ids.push(id);
            table.names.push(name);
            for (axis, (_, values)) in table.axes.iter_mut().zip(&raw_axes) {
                axis.values.push(values[row]);
            }
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn axis(&self, name: &str) -> Option<&AxisValues> {
        self.axes.iter().find(|a| a.name == name)
    }

    pub fn row_of(&self, species_id: &str) -> Option<usize> {
        self.index.get(species_id).copied()
    }

    /// Known values for one axis keyed by species ID
    pub fn known_values(&self, axis: &str) -> FxHashMap<&str, f64> {
        let Some(axis) = self.axis(axis) else {
            return FxHashMap::default();
        };
        self.ids
            .iter()
            .zip(&axis.values)
            .filter_map(|(id, v)| v.map(|v| (id.as_str(), v)))
            .collect()
    }
}

/// Load species ID → tree tip mapping
///
/// Empty and `NA` tips are skipped.
pub fn load_tip_mapping(
    path: &Path,
    id_col: &str,
    tip_col: &str,
) -> Result<FxHashMap<String, String>> {
    let df = read_table(path)
        .with_context(|| format!("Failed to load tip mapping: {}", path.display()))?;
    let table = path.display().to_string();
    let ids = string_values(&df, &table, id_col)?;
    let tips = string_values(&df, &table, tip_col)?;

    let mapping = ids
        .into_iter()
        .zip(tips)
        .filter_map(|(id, tip)| Some((id?, tip?)))
        .collect();
    Ok(mapping)
}

/// Independent model predictions (e.g. SEM / GAM) keyed by species ID
#[derive(Debug, Clone, Default)]
pub struct ModelPredictions {
    by_species: FxHashMap<String, Vec<Option<f64>>>,
    axes: Vec<String>,
}

impl ModelPredictions {
    /// Load a prediction table; each requested axis column must exist
    pub fn load(path: &Path, id_col: &str, axis_cols: &[String]) -> Result<Self> {
        let df = read_table(path)
            .with_context(|| format!("Failed to load model predictions: {}", path.display()))?;
        let table = path.display().to_string();
        let ids = string_values(&df, &table, id_col)?;
        let columns = axis_cols
            .iter()
            .map(|col| float_values(&df, &table, col))
            .collect::<PhyloResult<Vec<_>>>()?;

        let mut by_species: FxHashMap<String, Vec<Option<f64>>> = FxHashMap::default();
        for (row, id) in ids.into_iter().enumerate() {
            let Some(id) = id else { continue };
            let values: Vec<Option<f64>> = columns.iter().map(|c| c[row]).collect();
            by_species.entry(id).or_insert(values);
        }

        Ok(Self {
            by_species,
            axes: axis_cols.to_vec(),
        })
    }

    pub fn from_rows(axes: Vec<String>, rows: Vec<(String, Vec<Option<f64>>)>) -> Self {
        Self {
            by_species: rows.into_iter().collect(),
            axes,
        }
    }

    pub fn get(&self, species_id: &str, axis: &str) -> Option<f64> {
        let col = self.axes.iter().position(|a| a == axis)?;
        self.by_species.get(species_id)?.get(col).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_species.is_empty()
    }
}
