//! Metrics Module for Segmentation Evaluation
//!
//! Provides the run-level metric accumulators:
//! - `EpochHistory`: train/validation loss and per-class Dice per epoch
//! - `DiceReport`: formatting for a per-class Dice score vector

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::class_name;
use crate::utils::error::Result;

/// Scalar and per-class metric series accumulated over one training run.
///
/// Mutated once per epoch; persisted to JSON and charts at run end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpochHistory {
    /// Mean training loss per epoch
    pub train_loss: Vec<f64>,
    /// Mean validation loss per epoch
    pub val_loss: Vec<f64>,
    /// Per-class validation Dice scores per epoch
    pub val_dice: Vec<Vec<f64>>,
}

impl EpochHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the metrics of one completed epoch
    pub fn record(&mut self, train_loss: f64, val_loss: f64, dice_scores: Vec<f64>) {
        self.train_loss.push(train_loss);
        self.val_loss.push(val_loss);
        self.val_dice.push(dice_scores);
    }

    /// Number of recorded epochs
    pub fn len(&self) -> usize {
        self.train_loss.len()
    }

    /// Whether any epoch has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.train_loss.is_empty()
    }

    /// Mean Dice score of the given epoch
    pub fn mean_dice(&self, epoch: usize) -> Option<f64> {
        self.val_dice.get(epoch).map(|scores| {
            if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            }
        })
    }

    /// Index of the epoch with the highest mean Dice score
    pub fn best_epoch(&self) -> Option<usize> {
        (0..self.len()).max_by(|&a, &b| {
            let da = self.mean_dice(a).unwrap_or(0.0);
            let db = self.mean_dice(b).unwrap_or(0.0);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Persist the history as pretty-printed JSON
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// A per-class Dice score vector with display helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiceReport {
    /// Per-class scores, ordered by class index
    pub scores: Vec<f64>,
}

impl DiceReport {
    /// Wrap a per-class score vector
    pub fn new(scores: Vec<f64>) -> Self {
        Self { scores }
    }

    /// Mean score over all reported classes
    pub fn mean(&self) -> f64 {
        if self.scores.is_empty() {
            0.0
        } else {
            self.scores.iter().sum::<f64>() / self.scores.len() as f64
        }
    }

    /// Compact comma-separated form, e.g. `0.99, 0.95, 0.81, ...`
    pub fn compact(&self) -> String {
        self.scores
            .iter()
            .map(|s| format!("{:.2}", s))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for DiceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, score) in self.scores.iter().enumerate() {
            let name = class_name(idx).unwrap_or("Class");
            writeln!(f, "  {:12} {:.4}", name, score)?;
        }
        write!(f, "  {:12} {:.4}", "Mean", self.mean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_history_record_and_len() {
        let mut history = EpochHistory::new();
        assert!(history.is_empty());

        history.record(0.9, 0.8, vec![0.5; 6]);
        history.record(0.7, 0.6, vec![0.7; 6]);

        assert_eq!(history.len(), 2);
        assert_eq!(history.train_loss, vec![0.9, 0.7]);
        assert_eq!(history.val_dice[1], vec![0.7; 6]);
    }

    #[test]
    fn test_best_epoch_tracks_mean_dice() {
        let mut history = EpochHistory::new();
        history.record(1.0, 1.0, vec![0.2; 6]);
        history.record(0.8, 0.8, vec![0.9; 6]);
        history.record(0.6, 0.7, vec![0.6; 6]);

        assert_eq!(history.best_epoch(), Some(1));
        assert!((history.mean_dice(1).unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_history_json_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.json");

        let mut history = EpochHistory::new();
        history.record(0.5, 0.4, vec![0.9, 0.8, 0.7, 0.6, 0.5, 0.4]);
        history.save_json(&path).unwrap();

        let loaded: EpochHistory =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.val_dice[0].len(), 6);
    }

    #[test]
    fn test_dice_report_formatting() {
        let report = DiceReport::new(vec![0.991, 0.952, 0.813, 0.724, 0.655, 0.506]);
        assert_eq!(report.compact(), "0.99, 0.95, 0.81, 0.72, 0.66, 0.51");
        assert!((report.mean() - 0.7735).abs() < 1e-9);

        let rendered = format!("{}", report);
        assert!(rendered.contains("Prostate"));
        assert!(rendered.contains("Mean"));
    }
}
