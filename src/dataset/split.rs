//! Deterministic dataset splitting.
//!
//! Cases are shuffled once with a seeded permutation and partitioned into
//! train/validation/test pools (defaults 80/10/10). The same seed always
//! yields the same split, so training and the later predict-only run agree
//! on which cases form the held-out test set.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::loader::CasePair;
use crate::utils::error::{Result, SegError};

/// Configuration for dataset splitting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of cases for the training pool
    pub train_fraction: f64,
    /// Fraction of cases for the validation pool
    pub validation_fraction: f64,
    /// Random seed for the permutation
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.80,
            validation_fraction: 0.10,
            seed: 42,
        }
    }
}

impl SplitConfig {
    /// Create a new split configuration with custom fractions
    pub fn new(train_fraction: f64, validation_fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&train_fraction) {
            return Err(SegError::Config(
                "Train fraction must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&validation_fraction) {
            return Err(SegError::Config(
                "Validation fraction must be between 0.0 and 1.0".to_string(),
            ));
        }
        if train_fraction + validation_fraction >= 1.0 {
            return Err(SegError::Config(
                "Train + validation fractions must leave room for a test set".to_string(),
            ));
        }

        Ok(Self {
            train_fraction,
            validation_fraction,
            seed,
        })
    }

    /// Same fractions, different seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// The three case pools produced by a split
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: Vec<CasePair>,
    pub validation: Vec<CasePair>,
    pub test: Vec<CasePair>,
}

impl DatasetSplits {
    /// Partition cases with a seeded permutation.
    pub fn from_cases(cases: Vec<CasePair>, config: &SplitConfig) -> Result<Self> {
        if cases.is_empty() {
            return Err(SegError::Dataset("cannot split an empty dataset".to_string()));
        }

        let n = cases.len();
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        indices.shuffle(&mut rng);

        let train_end = (n as f64 * config.train_fraction) as usize;
        let val_end = (n as f64 * (config.train_fraction + config.validation_fraction)) as usize;

        let pick = |range: &[usize]| -> Vec<CasePair> {
            range.iter().map(|&i| cases[i].clone()).collect()
        };

        Ok(Self {
            train: pick(&indices[..train_end]),
            validation: pick(&indices[train_end..val_end]),
            test: pick(&indices[val_end..]),
        })
    }
}

impl std::fmt::Display for DatasetSplits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "train: {}, validation: {}, test: {}",
            self.train.len(),
            self.validation.len(),
            self.test.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fake_cases(n: usize) -> Vec<CasePair> {
        (0..n)
            .map(|i| CasePair {
                image: PathBuf::from(format!("img_{i}.nii.gz")),
                mask: PathBuf::from(format!("mask_{i}.nii.gz")),
                case_id: format!("case_{i}"),
            })
            .collect()
    }

    #[test]
    fn test_split_fractions() {
        let splits = DatasetSplits::from_cases(fake_cases(100), &SplitConfig::default()).unwrap();
        assert_eq!(splits.train.len(), 80);
        assert_eq!(splits.validation.len(), 10);
        assert_eq!(splits.test.len(), 10);
    }

    #[test]
    fn test_split_deterministic_for_fixed_seed() {
        let config = SplitConfig::default();
        let a = DatasetSplits::from_cases(fake_cases(40), &config).unwrap();
        let b = DatasetSplits::from_cases(fake_cases(40), &config).unwrap();

        let ids = |s: &[CasePair]| s.iter().map(|c| c.case_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a.train), ids(&b.train));
        assert_eq!(ids(&a.test), ids(&b.test));
    }

    #[test]
    fn test_split_changes_with_seed() {
        let a = DatasetSplits::from_cases(fake_cases(40), &SplitConfig::default()).unwrap();
        let b =
            DatasetSplits::from_cases(fake_cases(40), &SplitConfig::default().with_seed(7)).unwrap();

        let ids = |s: &[CasePair]| s.iter().map(|c| c.case_id.clone()).collect::<Vec<_>>();
        assert_ne!(ids(&a.train), ids(&b.train));
    }

    #[test]
    fn test_split_covers_every_case_once() {
        let splits = DatasetSplits::from_cases(fake_cases(23), &SplitConfig::default()).unwrap();
        let mut all: Vec<String> = splits
            .train
            .iter()
            .chain(&splits.validation)
            .chain(&splits.test)
            .map(|c| c.case_id.clone())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 23);
    }

    #[test]
    fn test_invalid_fractions_rejected() {
        assert!(SplitConfig::new(0.95, 0.10, 42).is_err());
        assert!(SplitConfig::new(1.2, 0.1, 42).is_err());
        assert!(SplitConfig::new(0.8, 0.1, 42).is_ok());
    }

    #[test]
    fn test_empty_dataset_rejected() {
        assert!(DatasetSplits::from_cases(Vec::new(), &SplitConfig::default()).is_err());
    }
}
