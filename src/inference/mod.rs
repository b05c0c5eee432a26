//! Inference module for checkpoint loading and test-set evaluation
//!
//! This module provides:
//! - Loading a trained model record from disk (missing checkpoints are a
//!   recoverable condition, not a crash)
//! - Per-voxel class prediction via argmax over logits
//! - The predict-only evaluation path over the held-out test split

pub mod predictor;

// Re-export main types for convenience
pub use predictor::{load_model, predict_volume, run_prediction};
