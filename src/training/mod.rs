//! Training module
//!
//! This module provides:
//! - The multi-class Dice coefficient / loss
//! - Train and validation epoch loops with gradient accumulation
//! - Best-model checkpoint tracking
//! - The end-to-end training pipeline

pub mod dice;
pub mod trainer;

// Re-export main types for convenience
pub use dice::{one_hot, DiceLoss, DiceLossConfig};
pub use trainer::{
    checkpoint_file, run_training, train_epoch, validate_epoch, BestCheckpoint, EpochValidation,
    TrainConfig,
};

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 15;

/// Default number of batches per optimizer step
pub const DEFAULT_ACCUMULATION_STEPS: usize = 4;
