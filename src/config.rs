//! Run Settings
//!
//! Cross-validation settings with documented defaults. A JSON file may
//! override any subset of fields; CLI flags are applied on top by the
//! binaries.
//!
//! ```json
//! { "exponents": [0.5, 1, 2], "k_truncate": [0, 20], "repeats": 10 }
//! ```

use crate::error::{PhyloError, PhyloResult};
use crate::predictor::{KernelParams, DEFAULT_EPSILON};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default decay-exponent grid
pub const DEFAULT_EXPONENTS: [f64; 4] = [0.5, 1.0, 1.5, 2.0];
pub const DEFAULT_REPEATS: usize = 5;
pub const DEFAULT_FOLDS: usize = 10;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CvSettings {
    /// Decay exponents x to evaluate
    pub exponents: Vec<f64>,
    /// k-nearest truncation values (0 = no truncation)
    pub k_truncate: Vec<usize>,
    pub repeats: usize,
    pub folds: usize,
    pub seed: u64,
    /// Stratify folds by the axis value
    pub stratified: bool,
    /// Minimum weight sum before the donor-mean fallback applies
    pub epsilon: f64,
}

/// Values given explicitly on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsOverrides {
    pub exponents: Option<Vec<f64>>,
    pub k_truncate: Option<Vec<usize>>,
    pub repeats: Option<usize>,
    pub folds: Option<usize>,
    pub seed: Option<u64>,
    pub no_stratify: bool,
}

impl Default for CvSettings {
    fn default() -> Self {
        Self {
            exponents: DEFAULT_EXPONENTS.to_vec(),
            k_truncate: vec![0],
            repeats: DEFAULT_REPEATS,
            folds: DEFAULT_FOLDS,
            seed: DEFAULT_SEED,
            stratified: true,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl CvSettings {
    /// Load settings from JSON; absent fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Self::read(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Optional JSON file, then explicit overrides on top; validated once
    /// merged, so a flag may repair an invalid file value
    pub fn resolve(path: Option<&Path>, overrides: SettingsOverrides) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        Ok(settings.with_overrides(overrides)?)
    }

    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PhyloError::MissingInput(path.to_path_buf()).into());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        let settings: CvSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings JSON: {:?}", path))?;
        Ok(settings)
    }

    /// Replace every field the overrides set, then validate
    pub fn with_overrides(mut self, overrides: SettingsOverrides) -> PhyloResult<Self> {
        if let Some(exponents) = overrides.exponents {
            self.exponents = exponents;
        }
        if let Some(k) = overrides.k_truncate {
            self.k_truncate = k;
        }
        if let Some(repeats) = overrides.repeats {
            self.repeats = repeats;
        }
        if let Some(folds) = overrides.folds {
            self.folds = folds;
        }
        if let Some(seed) = overrides.seed {
            self.seed = seed;
        }
        if overrides.no_stratify {
            self.stratified = false;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> PhyloResult<()> {
        if self.folds < 2 {
            return Err(PhyloError::invalid(
                "folds",
                format!("need at least 2, got {}", self.folds),
            ));
        }
        if self.repeats == 0 {
            return Err(PhyloError::invalid("repeats", "need at least 1"));
        }
        if self.exponents.is_empty() {
            return Err(PhyloError::invalid("exponents", "grid is empty"));
        }
        if self.k_truncate.is_empty() {
            return Err(PhyloError::invalid("k_truncate", "grid is empty"));
        }
        for params in self.kernel_grid() {
            params.validate()?;
        }
        Ok(())
    }

    /// Every (exponent, k) combination, exponent-major
    pub fn kernel_grid(&self) -> Vec<KernelParams> {
        self.exponents
            .iter()
            .flat_map(|&exponent| {
                self.k_truncate.iter().map(move |&k| KernelParams {
                    exponent,
                    k_truncate: k,
                    epsilon: self.epsilon,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = CvSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.kernel_grid().len(), 4);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings: CvSettings =
            serde_json::from_str(r#"{ "exponents": [0, 2], "k_truncate": [0, 5], "folds": 4 }"#)
                .unwrap();
        assert_eq!(settings.folds, 4);
        assert_eq!(settings.repeats, DEFAULT_REPEATS);
        let grid = settings.kernel_grid();
        assert_eq!(grid.len(), 4);
        assert_eq!((grid[1].exponent, grid[1].k_truncate), (0.0, 5));
        assert_eq!((grid[2].exponent, grid[2].k_truncate), (2.0, 0));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(serde_json::from_str::<CvSettings>(r#"{ "fold": 4 }"#).is_err());
    }

    #[test]
    fn test_invalid_settings() {
        let mut s = CvSettings::default();
        s.folds = 1;
        assert!(s.validate().is_err());
        let mut s = CvSettings::default();
        s.exponents = vec![1.0, -2.0];
        assert!(s.validate().is_err());
        let mut s = CvSettings::default();
        s.repeats = 0;
        assert!(s.validate().is_err());
    }

    fn settings_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file
    }

    #[test]
    fn test_flags_override_file_values() {
        let file = settings_file(r#"{ "exponents": [0.5, 1], "repeats": 3, "seed": 9 }"#);
        let overrides = SettingsOverrides {
            exponents: Some(vec![2.0]),
            seed: Some(11),
            no_stratify: true,
            ..SettingsOverrides::default()
        };
        let settings = CvSettings::resolve(Some(file.path()), overrides).unwrap();
        assert_eq!(settings.exponents, vec![2.0]);
        assert_eq!(settings.seed, 11);
        assert!(!settings.stratified);
        // Not given on the command line: file value stays
        assert_eq!(settings.repeats, 3);
        // In neither: default
        assert_eq!(settings.folds, DEFAULT_FOLDS);
    }

    #[test]
    fn test_no_overrides_keeps_file() {
        let file = settings_file(r#"{ "k_truncate": [0, 10], "folds": 4 }"#);
        let from_file = CvSettings::load(file.path()).unwrap();
        let resolved =
            CvSettings::resolve(Some(file.path()), SettingsOverrides::default()).unwrap();
        assert_eq!(resolved, from_file);
        assert_eq!(resolved.k_truncate, vec![0, 10]);
    }

    #[test]
    fn test_merged_settings_are_validated() {
        let overrides = SettingsOverrides {
            folds: Some(1),
            ..SettingsOverrides::default()
        };
        assert!(CvSettings::resolve(None, overrides).is_err());

        // A flag can repair an invalid file value
        let file = settings_file(r#"{ "repeats": 0 }"#);
        assert!(CvSettings::load(file.path()).is_err());
        let overrides = SettingsOverrides {
            repeats: Some(2),
            ..SettingsOverrides::default()
        };
        let settings = CvSettings::resolve(Some(file.path()), overrides).unwrap();
        assert_eq!(settings.repeats, 2);

        let overrides = SettingsOverrides {
            exponents: Some(vec![-1.0]),
            ..SettingsOverrides::default()
        };
        assert!(CvSettings::default().with_overrides(overrides).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "repeats": 2, "seed": 7, "stratified": false }}"#).unwrap();
        let settings = CvSettings::load(file.path()).unwrap();
        assert_eq!(settings.repeats, 2);
        assert_eq!(settings.seed, 7);
        assert!(!settings.stratified);
    }
}
