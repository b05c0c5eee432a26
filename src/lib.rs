//! # Prostate MRI 3D Segmentation
//!
//! A Rust pipeline for semantic segmentation of 3D prostate MRI volumes
//! using the Burn framework.
//!
//! ## Features
//!
//! - **NIfTI volume loading** for scans and semantic label masks
//! - **Dice loss** with per-class scores, smoothing and optional background
//!   exclusion
//! - **3D U-Net** built with Burn's `Conv3d`/`ConvTranspose3d` modules
//! - **Gradient accumulation** to simulate large effective batch sizes under
//!   limited device memory
//! - **Best-model checkpointing** on mean validation Dice
//!
//! ## Modules
//!
//! - `dataset`: NIfTI discovery/loading, deterministic splits, patch sampling
//!   and batching
//! - `model`: the 3D U-Net architecture
//! - `training`: Dice loss, train/validate epoch loops, checkpoint tracking
//! - `inference`: checkpoint loading and test-set evaluation
//! - `utils`: errors, logging, metrics history, SVG charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use prostate_seg::backend::TrainingBackend;
//! use prostate_seg::training::{run_training, TrainConfig};
//!
//! let config = TrainConfig::default();
//! run_training::<TrainingBackend>("data/semantic_MRs".as_ref(),
//!                                 "data/semantic_labels_only".as_ref(),
//!                                 &config)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::batcher::{MriBatch, MriBatcher, MriItem, PatchLoader, VolumeLoader};
pub use dataset::loader::MriDataset;
pub use dataset::split::{DatasetSplits, SplitConfig};
pub use dataset::{class_name, CLASS_NAMES, NUM_CLASSES};
pub use model::unet3d::{UNet3d, UNet3dConfig};
pub use training::dice::{DiceLoss, DiceLossConfig};
pub use training::trainer::{run_training, BestCheckpoint, TrainConfig};
pub use utils::error::{Result, SegError};
pub use utils::metrics::{DiceReport, EpochHistory};

/// Default edge length of the cubic training patches.
pub const DEFAULT_PATCH_SIZE: usize = 96;

/// File stem of the best-model checkpoint (the recorder adds its extension).
pub const CHECKPOINT_STEM: &str = "best_unet";

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
