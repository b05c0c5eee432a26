//! Prediction and test-set evaluation with a trained checkpoint.

use std::path::Path;
use std::time::Instant;

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::{backend::Backend, Int, Tensor},
};
use colored::Colorize;
use tracing::info;

use crate::dataset::batcher::VolumeLoader;
use crate::dataset::loader::load_case;
use crate::dataset::split::{DatasetSplits, SplitConfig};
use crate::dataset::transform::{center_crop_to_multiple, IntensityRange};
use crate::dataset::{class_name, MriDataset};
use crate::model::unet3d::{UNet3d, UNet3dConfig};
use crate::training::dice::DiceLossConfig;
use crate::training::trainer::{checkpoint_file, validate_epoch};
use crate::utils::charts::{generate_bar_chart, BarData, COLOR_SERIES};
use crate::utils::error::{Result, SegError};
use crate::utils::format_duration;
use crate::utils::metrics::DiceReport;

/// Load a trained U-Net from a checkpoint path stem.
///
/// A missing file is reported as [`SegError::CheckpointMissing`] so callers
/// can treat it as a recoverable condition.
pub fn load_model<B: Backend>(
    stem: &Path,
    config: &UNet3dConfig,
    device: &B::Device,
) -> Result<UNet3d<B>> {
    let file = checkpoint_file(stem);
    if !file.exists() {
        return Err(SegError::CheckpointMissing(file));
    }

    UNet3d::<B>::new(config, device)
        .load_file(stem.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| SegError::Model(format!("failed to load checkpoint: {e:?}")))
}

/// Predicted per-voxel class indices, shape (batch, 1, D, H, W).
pub fn predict_volume<B: Backend>(model: &UNet3d<B>, images: Tensor<B, 5>) -> Tensor<B, 5, Int> {
    model.forward(images).argmax(1)
}

/// Evaluate a saved checkpoint on the held-out test split and report
/// per-class Dice scores.
///
/// The split is re-derived from the dataset with the same seed used for
/// training, so the test pool matches. A missing checkpoint aborts this
/// path with a clear message instead of an error.
pub fn run_prediction<B: Backend>(
    model_stem: &Path,
    image_dir: &Path,
    mask_dir: &Path,
    seed: u64,
) -> Result<()> {
    let device = B::Device::default();
    let model_config = UNet3dConfig::new();

    let model = match load_model::<B>(model_stem, &model_config, &device) {
        Ok(model) => {
            println!("{}", "Model found, loading saved model...".green());
            model
        }
        Err(SegError::CheckpointMissing(path)) => {
            println!(
                "{} no saved model found at {:?}; run `prostate-seg train` first",
                "Note:".yellow(),
                path
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("{}", "Loading Test Split...".cyan());
    let dataset = MriDataset::discover(image_dir, mask_dir)?;
    let splits =
        DatasetSplits::from_cases(dataset.cases.clone(), &SplitConfig::default().with_seed(seed))?;
    if splits.test.is_empty() {
        return Err(SegError::Dataset("test split is empty".to_string()));
    }
    info!("evaluating {} held-out cases", splits.test.len());

    let window = IntensityRange::default();
    let test_cases = splits
        .test
        .iter()
        .map(|pair| {
            let (image, mask) = load_case(pair, &window)?;
            Ok(center_crop_to_multiple(&image, &mask, 8))
        })
        .collect::<Result<Vec<_>>>()?;

    let loader: VolumeLoader<B> = VolumeLoader::new(test_cases, device.clone());
    let criterion = DiceLossConfig::new().init();

    let start = Instant::now();
    let evaluation = validate_epoch(&model, &criterion, &loader)?;
    let elapsed = start.elapsed().as_secs_f64();

    let report = DiceReport::new(evaluation.dice_scores.clone());
    println!();
    println!("Final Dice Coefficients for each class: [{}]", report.compact());
    println!("{}", report);
    println!("Final Dice Loss: {:.4}", evaluation.mean_loss);
    println!("Total test time: {}", format_duration(elapsed));

    if let Some(parent) = model_stem.parent() {
        let bars: Vec<BarData> = evaluation
            .dice_scores
            .iter()
            .enumerate()
            .map(|(class, &score)| BarData {
                label: class_name(class).unwrap_or("Class").to_string(),
                value: score,
                color: COLOR_SERIES[class % COLOR_SERIES.len()].to_string(),
            })
            .collect();
        let chart = parent.join("test_dice.svg");
        generate_bar_chart("Test Dice per Class", "Dice", &bars, &chart)?;
        println!("  Chart written to {:?}", chart);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestBackend = burn::backend::NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_missing_checkpoint_is_recoverable() {
        let temp = TempDir::new().unwrap();
        let stem = temp.path().join("best_unet");

        // No model saved: the predict path reports and returns cleanly
        // before touching any dataset directory.
        let result = run_prediction::<TestBackend>(
            &stem,
            Path::new("does/not/matter"),
            Path::new("does/not/matter"),
            42,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_model_missing_file_error() {
        let temp = TempDir::new().unwrap();
        let stem = temp.path().join("absent");

        let err = load_model::<TestBackend>(&stem, &UNet3dConfig::new(), &device()).unwrap_err();
        assert!(matches!(err, SegError::CheckpointMissing(_)));
    }

    #[test]
    fn test_predict_volume_shape_and_range() {
        let config = UNet3dConfig::new()
            .with_num_classes(6)
            .with_base_filters(2)
            .with_dropout_rate(0.0);
        let model = UNet3d::<TestBackend>::new(&config, &device());

        let input = Tensor::<TestBackend, 5>::zeros([1, 1, 8, 8, 8], &device());
        let prediction = predict_volume(&model, input);

        assert_eq!(prediction.dims(), [1, 1, 8, 8, 8]);

        let values: Vec<i64> = prediction.into_data().to_vec().unwrap();
        assert!(values.iter().all(|&v| (0..6).contains(&v)));
    }
}
