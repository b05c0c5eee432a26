//! Prostate MRI Segmentation CLI
//!
//! Entry point for training and evaluating the 3D U-Net prostate MRI
//! segmentation pipeline built on the Burn framework.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use prostate_seg::backend::{backend_name, DefaultBackend, TrainingBackend};
use prostate_seg::dataset::{MriDataset, SplitConfig};
use prostate_seg::training::{run_training, TrainConfig};
use prostate_seg::utils::logging::{init_logging, LogConfig};

/// Prostate MRI 3D Semantic Segmentation
///
/// Trains a 3D U-Net with a multi-class Dice loss on NIfTI prostate MRI
/// volumes and evaluates per-class Dice scores on a held-out split.
#[derive(Parser, Debug)]
#[command(name = "prostate-seg")]
#[command(version)]
#[command(about = "3D prostate MRI segmentation with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the segmentation model
    Train {
        /// Directory of MRI scan volumes (.nii.gz)
        #[arg(long, default_value = "data/semantic_MRs")]
        image_dir: String,

        /// Directory of semantic label masks (.nii.gz)
        #[arg(long, default_value = "data/semantic_labels_only")]
        mask_dir: String,

        /// Number of training epochs
        #[arg(short, long, default_value = "15")]
        epochs: usize,

        /// Patches per mini-batch
        #[arg(short, long, default_value = "2")]
        batch_size: usize,

        /// Learning rate
        #[arg(short, long, default_value = "0.0001")]
        learning_rate: f64,

        /// Batches to accumulate before each optimizer step
        #[arg(long, default_value = "4")]
        accumulation_steps: usize,

        /// Edge length of the cubic training patches (must be divisible by 8)
        #[arg(long, default_value = "96")]
        patch_size: usize,

        /// Patches sampled per case per epoch
        #[arg(long, default_value = "4")]
        samples_per_case: usize,

        /// Score the background class in the training loss
        #[arg(long, default_value = "false")]
        include_background: bool,

        /// Output directory for checkpoints and run artifacts
        #[arg(short, long, default_value = "output")]
        output_dir: String,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Evaluate a trained checkpoint on the held-out test split
    Predict {
        /// Directory of MRI scan volumes (.nii.gz)
        #[arg(long, default_value = "data/semantic_MRs")]
        image_dir: String,

        /// Directory of semantic label masks (.nii.gz)
        #[arg(long, default_value = "data/semantic_labels_only")]
        mask_dir: String,

        /// Checkpoint path stem written by training
        #[arg(short, long, default_value = "output/best_unet")]
        model: String,

        /// Random seed (must match training for the same test split)
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Show dataset statistics
    Stats {
        /// Directory of MRI scan volumes (.nii.gz)
        #[arg(long, default_value = "data/semantic_MRs")]
        image_dir: String,

        /// Directory of semantic label masks (.nii.gz)
        #[arg(long, default_value = "data/semantic_labels_only")]
        mask_dir: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            image_dir,
            mask_dir,
            epochs,
            batch_size,
            learning_rate,
            accumulation_steps,
            patch_size,
            samples_per_case,
            include_background,
            output_dir,
            seed,
        } => {
            let config = TrainConfig {
                epochs,
                batch_size,
                learning_rate,
                accumulation_steps,
                seed,
                patch_size,
                samples_per_case,
                include_background,
                output_dir: PathBuf::from(output_dir),
            };

            info!("starting training on backend: {}", backend_name());
            run_training::<TrainingBackend>(image_dir.as_ref(), mask_dir.as_ref(), &config)?;
        }

        Commands::Predict {
            image_dir,
            mask_dir,
            model,
            seed,
        } => {
            info!("running prediction on backend: {}", backend_name());
            prostate_seg::inference::run_prediction::<DefaultBackend>(
                model.as_ref(),
                image_dir.as_ref(),
                mask_dir.as_ref(),
                seed,
            )?;
        }

        Commands::Stats {
            image_dir,
            mask_dir,
        } => {
            cmd_stats(&image_dir, &mask_dir)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════╗
 ║   Prostate MRI 3D Segmentation                   ║
 ║   3D U-Net + Dice Loss with Burn + Rust          ║
 ╚══════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_stats(image_dir: &str, mask_dir: &str) -> Result<()> {
    info!("computing dataset statistics for {}", image_dir);

    match MriDataset::discover(image_dir.as_ref(), mask_dir.as_ref()) {
        Ok(dataset) => {
            println!("{}", dataset.stats());
            println!();

            let config = SplitConfig::default();
            let total = dataset.len();
            let train = (total as f64 * config.train_fraction) as usize;
            let val =
                (total as f64 * (config.train_fraction + config.validation_fraction)) as usize
                    - train;

            println!("{}", "Split Preview (seed 42):".yellow().bold());
            println!("  Train:      {}", train);
            println!("  Validation: {}", val);
            println!("  Test:       {}", total - train - val);
        }
        Err(e) => {
            println!("{} failed to load dataset: {}", "Error:".red(), e);
            println!();
            println!("Expected directory layout:");
            println!("  {}/<case>_Week<n>_LFOV.nii.gz", image_dir);
            println!("  {}/<case>_Week<n>_SEMANTIC_LFOV.nii.gz", mask_dir);
        }
    }

    Ok(())
}
