//! Training and validation loops.
//!
//! A custom epoch loop over Burn's optimizer API rather than the high-level
//! learner: forward, Dice loss, gradient accumulation, optimizer step every
//! `accumulation_steps` batches. Validation runs on the inner (non-autodiff)
//! backend and aggregates per-class Dice scores across volumes. The best
//! model so far is tracked by an explicit accumulator object and persisted
//! with Burn's `CompactRecorder`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::{
    module::{AutodiffModule, Module},
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsAccumulator, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion},
};
use chrono::Local;
use colored::Colorize;
use tracing::info;

use crate::dataset::batcher::{PatchLoader, VolumeLoader};
use crate::dataset::loader::load_case;
use crate::dataset::split::{DatasetSplits, SplitConfig};
use crate::dataset::transform::{center_crop_to_multiple, IntensityRange, PatchSampler};
use crate::dataset::MriDataset;
use crate::model::unet3d::{UNet3d, UNet3dConfig};
use crate::training::dice::{DiceLoss, DiceLossConfig};
use crate::utils::charts::{generate_line_chart, DataSeries, COLOR_SERIES};
use crate::utils::error::{Result, SegError};
use crate::utils::metrics::{DiceReport, EpochHistory};
use crate::utils::format_duration;
use crate::{CHECKPOINT_STEM, CLASS_NAMES, DEFAULT_PATCH_SIZE};

/// Configuration for a training run
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Number of training epochs
    pub epochs: usize,
    /// Patches per mini-batch
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Batches to accumulate before each optimizer step
    pub accumulation_steps: usize,
    /// Random seed for splits and augmentation
    pub seed: u64,
    /// Edge length of the cubic training patches
    pub patch_size: usize,
    /// Patches sampled per case per epoch
    pub samples_per_case: usize,
    /// Whether background joins the training loss (validation always
    /// reports all classes)
    pub include_background: bool,
    /// Directory for checkpoints and run artifacts
    pub output_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 15,
            batch_size: 2,
            learning_rate: 1e-4,
            accumulation_steps: 4,
            seed: 42,
            patch_size: DEFAULT_PATCH_SIZE,
            samples_per_case: 4,
            include_background: false,
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Run one training epoch with gradient accumulation.
///
/// The loss fed to backward is scaled by `1/accumulation_steps` so the
/// summed gradients match one large batch; the reported epoch loss is the
/// mean of the *unscaled* batch losses. The loader RNG is reseeded with
/// `epoch_seed` so the epoch's augmentation stream is reproducible.
pub fn train_epoch<B, O>(
    model: UNet3d<B>,
    optimizer: &mut O,
    criterion: &DiceLoss,
    loader: &mut PatchLoader<B>,
    learning_rate: f64,
    accumulation_steps: usize,
    epoch_seed: u64,
) -> Result<(UNet3d<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<UNet3d<B>, B>,
{
    if accumulation_steps == 0 {
        return Err(SegError::Config(
            "accumulation_steps must be positive".to_string(),
        ));
    }

    loader.start_epoch(epoch_seed);

    let mut model = model;
    let mut accumulator = GradientsAccumulator::new();
    let mut pending = 0usize;
    let mut loss_sum = 0.0f64;
    let mut batch_count = 0usize;

    while let Some(batch) = loader.next_batch() {
        let batch = batch?;

        let logits = model.forward(batch.images);
        let loss = criterion.forward(logits, batch.labels)?;

        let loss_value: f64 = loss.clone().into_scalar().elem();
        loss_sum += loss_value;
        batch_count += 1;

        let scaled = loss.div_scalar(accumulation_steps as f64);
        let grads = GradientsParams::from_grads(scaled.backward(), &model);
        accumulator.accumulate(&model, grads);
        pending += 1;

        if pending == accumulation_steps {
            model = optimizer.step(learning_rate, model, accumulator.grads());
            pending = 0;
        }
    }

    // Flush a partial accumulation window at epoch end
    if pending > 0 {
        model = optimizer.step(learning_rate, model, accumulator.grads());
    }

    if batch_count == 0 {
        return Err(SegError::Training(
            "training loader produced no batches".to_string(),
        ));
    }

    Ok((model, loss_sum / batch_count as f64))
}

/// Aggregated metrics of one validation pass
#[derive(Debug, Clone)]
pub struct EpochValidation {
    /// Per-class Dice scores, averaged over batches
    pub dice_scores: Vec<f64>,
    /// Dice loss, averaged over batches
    pub mean_loss: f64,
}

impl EpochValidation {
    /// Mean over the per-class scores
    pub fn mean_dice(&self) -> f64 {
        if self.dice_scores.is_empty() {
            0.0
        } else {
            self.dice_scores.iter().sum::<f64>() / self.dice_scores.len() as f64
        }
    }
}

/// Run one validation pass: no gradients, no parameter updates.
///
/// Per-class scores are averaged across batches (preserving the class
/// dimension); the scalar loss is their complement averaged the same way.
pub fn validate_epoch<B: Backend>(
    model: &UNet3d<B>,
    criterion: &DiceLoss,
    loader: &VolumeLoader<B>,
) -> Result<EpochValidation> {
    let classes = criterion.num_scored_classes();
    let mut score_sums = vec![0.0f64; classes];
    let mut loss_sum = 0.0f64;
    let mut batch_count = 0usize;

    for batch in loader.iter() {
        let batch = batch?;

        let logits = model.forward(batch.images);
        let scores = criterion.dice(logits, batch.labels)?;

        let values: Vec<f32> = scores
            .into_data()
            .to_vec()
            .map_err(|e| SegError::Model(format!("failed to read dice scores: {e:?}")))?;

        let mean: f64 = values.iter().map(|&v| v as f64).sum::<f64>() / classes as f64;
        loss_sum += 1.0 - mean;
        for (sum, value) in score_sums.iter_mut().zip(&values) {
            *sum += *value as f64;
        }
        batch_count += 1;
    }

    if batch_count == 0 {
        return Err(SegError::Training(
            "validation loader produced no batches".to_string(),
        ));
    }

    Ok(EpochValidation {
        dice_scores: score_sums
            .into_iter()
            .map(|s| s / batch_count as f64)
            .collect(),
        mean_loss: loss_sum / batch_count as f64,
    })
}

/// Tracks the best validation metric seen so far and persists the model
/// state whenever it improves. Higher mean Dice wins.
pub struct BestCheckpoint {
    path: PathBuf,
    best_score: f64,
}

impl BestCheckpoint {
    /// Track the best model at the given path stem (the recorder appends
    /// its file extension).
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            best_score: 0.0,
        }
    }

    /// Offer this epoch's model; saves and returns `true` on improvement.
    pub fn observe<B: Backend>(&mut self, model: &UNet3d<B>, mean_dice: f64) -> Result<bool> {
        if mean_dice <= self.best_score {
            return Ok(false);
        }

        self.best_score = mean_dice;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        model
            .clone()
            .save_file(self.path.clone(), &CompactRecorder::new())
            .map_err(|e| SegError::Model(format!("failed to save checkpoint: {e:?}")))?;

        Ok(true)
    }

    /// Best mean Dice seen so far
    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Path stem the checkpoint is written to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Full path of a checkpoint written by [`BestCheckpoint`] / `CompactRecorder`.
pub fn checkpoint_file(stem: &Path) -> PathBuf {
    stem.with_extension("mpk")
}

/// Run the full training pipeline: discover, split, train, validate,
/// checkpoint, then evaluate the best model on the held-out test split.
pub fn run_training<B: AutodiffBackend>(
    image_dir: &Path,
    mask_dir: &Path,
    config: &TrainConfig,
) -> Result<()> {
    if config.epochs == 0 {
        return Err(SegError::Config("epochs must be positive".to_string()));
    }

    let device = B::Device::default();
    let inner_device = <B::InnerBackend as Backend>::Device::default();

    println!("{}", "Initializing Training...".green().bold());
    println!("  Device: {:?}", device);

    std::fs::create_dir_all(&config.output_dir)?;

    println!("{}", "Loading Dataset...".cyan());
    let dataset = MriDataset::discover(image_dir, mask_dir)?;
    println!("{}", dataset.stats());

    let split_config = SplitConfig::default().with_seed(config.seed);
    let splits = DatasetSplits::from_cases(dataset.cases.clone(), &split_config)?;
    println!("  Splits: {}", splits);

    if splits.validation.is_empty() || splits.test.is_empty() {
        return Err(SegError::Dataset(
            "dataset too small to form validation and test splits".to_string(),
        ));
    }

    let window = IntensityRange::default();
    let load_pool = |cases: &[crate::dataset::loader::CasePair],
                     crop: bool|
     -> Result<Vec<(ndarray::Array3<f32>, ndarray::Array3<u8>)>> {
        cases
            .iter()
            .map(|pair| {
                let (image, mask) = load_case(pair, &window)?;
                Ok(if crop {
                    center_crop_to_multiple(&image, &mask, 8)
                } else {
                    (image, mask)
                })
            })
            .collect()
    };

    println!("{}", "Pre-loading Training Volumes...".cyan());
    let train_cases = load_pool(&splits.train, false)?;
    println!("{}", "Pre-loading Validation Volumes...".cyan());
    let val_cases = load_pool(&splits.validation, true)?;

    let sampler = PatchSampler::cubic(config.patch_size, config.samples_per_case);
    let mut train_loader: PatchLoader<B> =
        PatchLoader::new(train_cases, sampler, config.batch_size, device.clone())?;
    let val_loader: VolumeLoader<B::InnerBackend> =
        VolumeLoader::new(val_cases, inner_device.clone());

    println!("{}", "Creating Model...".cyan());
    let model_config = UNet3dConfig::new();
    let mut model = UNet3d::<B>::new(&model_config, &device);

    let mut optimizer = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(1e-4)))
        .init();

    let criterion = DiceLossConfig::new()
        .with_include_background(config.include_background)
        .init();
    // Validation always reports every class
    let report_criterion = DiceLossConfig::new().init();

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Cases (train/val/test): {}", splits);
    println!("  Epochs:              {}", config.epochs);
    println!("  Batch size:          {}", config.batch_size);
    println!("  Accumulation steps:  {}", config.accumulation_steps);
    println!("  Learning rate:       {}", config.learning_rate);
    println!("  Patch size:          {}", config.patch_size);
    println!("  Background in loss:  {}", config.include_background);
    println!();

    let mut history = EpochHistory::new();
    let mut best = BestCheckpoint::new(config.output_dir.join(CHECKPOINT_STEM));
    let train_start = Instant::now();

    for epoch in 0..config.epochs {
        println!(
            "{}",
            format!("Epoch {}/{}", epoch + 1, config.epochs).yellow().bold()
        );

        let epoch_seed = config.seed.wrapping_add(epoch as u64);
        let (updated, train_loss) = train_epoch(
            model,
            &mut optimizer,
            &criterion,
            &mut train_loader,
            config.learning_rate,
            config.accumulation_steps,
            epoch_seed,
        )?;
        model = updated;

        let valid_model = model.valid();
        let validation = validate_epoch(&valid_model, &report_criterion, &val_loader)?;
        let report = DiceReport::new(validation.dice_scores.clone());

        let improved = best.observe(&valid_model, validation.mean_dice())?;
        if improved {
            info!(
                "validation mean Dice improved to {:.4}; checkpoint saved",
                best.best_score()
            );
        }

        println!(
            "  {} Train Loss: {:.4} | Val Loss: {:.4} | Dice: [{}]{}",
            "→".cyan(),
            train_loss,
            validation.mean_loss,
            report.compact(),
            if improved {
                " (best)".green().to_string()
            } else {
                String::new()
            }
        );

        history.record(train_loss, validation.mean_loss, validation.dice_scores);
    }

    let elapsed = train_start.elapsed().as_secs_f64();
    println!();
    println!(
        "{} total training time: {}",
        "Training Complete!".green().bold(),
        format_duration(elapsed)
    );
    println!("  Best validation mean Dice: {:.4}", best.best_score());

    save_run_artifacts(&history, &config.output_dir)?;

    // Evaluate the best checkpoint on the held-out test split
    println!();
    println!("{}", "Evaluating Best Model on Test Split...".cyan().bold());
    let test_cases = load_pool(&splits.test, true)?;
    let test_loader: VolumeLoader<B::InnerBackend> =
        VolumeLoader::new(test_cases, inner_device.clone());

    let best_model = UNet3d::<B::InnerBackend>::new(&model_config, &inner_device)
        .load_file(best.path().to_path_buf(), &CompactRecorder::new(), &inner_device)
        .map_err(|e| SegError::Model(format!("failed to load best checkpoint: {e:?}")))?;

    let final_eval = validate_epoch(&best_model, &report_criterion, &test_loader)?;
    let final_report = DiceReport::new(final_eval.dice_scores.clone());
    println!("Final Dice Coefficients for each class: [{}]", final_report.compact());
    println!("{}", final_report);
    println!("Final Dice Loss: {:.4}", final_eval.mean_loss);

    Ok(())
}

/// Write the JSON history plus loss and per-class Dice charts.
fn save_run_artifacts(history: &EpochHistory, output_dir: &Path) -> Result<()> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");

    history.save_json(&output_dir.join(format!("history_{timestamp}.json")))?;

    let loss_series = vec![
        DataSeries::from_values("Train loss", &history.train_loss, COLOR_SERIES[1]),
        DataSeries::from_values("Val loss", &history.val_loss, COLOR_SERIES[3]),
    ];
    generate_line_chart(
        "Dice Loss",
        "Epoch",
        "Loss",
        &loss_series,
        &output_dir.join(format!("loss_{timestamp}.svg")),
    )?;

    let dice_series: Vec<DataSeries> = CLASS_NAMES
        .iter()
        .enumerate()
        .map(|(class, name)| {
            let values: Vec<f64> = history
                .val_dice
                .iter()
                .map(|epoch| epoch.get(class).copied().unwrap_or(0.0))
                .collect();
            DataSeries::from_values(name, &values, COLOR_SERIES[class % COLOR_SERIES.len()])
        })
        .collect();
    generate_line_chart(
        "Validation Dice per Class",
        "Epoch",
        "Dice",
        &dice_series,
        &output_dir.join(format!("dice_{timestamp}.svg")),
    )?;

    info!("run artifacts written to {:?}", output_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Tensor, TensorData};
    use ndarray::Array3;
    use tempfile::TempDir;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn synthetic_cases(n: usize) -> Vec<(Array3<f32>, Array3<u8>)> {
        (0..n)
            .map(|i| {
                let image =
                    Array3::from_shape_fn((8, 8, 8), |(z, y, x)| (z + y + x + i) as f32 / 32.0);
                let mut label = Array3::<u8>::zeros((8, 8, 8));
                // A small foreground cube per case
                for z in 2..5 {
                    for y in 2..5 {
                        for x in 2..5 {
                            label[[z, y, x]] = 1;
                        }
                    }
                }
                (image, label)
            })
            .collect()
    }

    fn tiny_model_config() -> UNet3dConfig {
        UNet3dConfig::new()
            .with_num_classes(2)
            .with_base_filters(2)
            .with_dropout_rate(0.0)
    }

    fn tiny_loader(batch_size: usize) -> PatchLoader<TestAutodiffBackend> {
        PatchLoader::new(
            synthetic_cases(2),
            PatchSampler::cubic(8, 2),
            batch_size,
            device(),
        )
        .unwrap()
    }

    fn fixed_input(dev: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 5> {
        let data: Vec<f32> = (0..512).map(|i| i as f32 / 512.0).collect();
        Tensor::from_data(TensorData::new(data, [1, 1, 8, 8, 8]), dev)
    }

    #[test]
    fn test_epoch_loss_invariant_to_accumulation_steps() {
        // lr = 0 keeps parameters frozen, isolating the loss accounting
        // from update timing: both runs must report the same mean loss.
        let criterion = DiceLossConfig::new().with_num_classes(2).init();
        let model = UNet3d::<TestAutodiffBackend>::new(&tiny_model_config(), &device());

        let mut losses = Vec::new();
        for accumulation_steps in [1usize, 4] {
            let mut loader = tiny_loader(2);
            let mut optimizer = AdamConfig::new().init();
            let (_, loss) = train_epoch(
                model.clone(),
                &mut optimizer,
                &criterion,
                &mut loader,
                0.0,
                accumulation_steps,
                123,
            )
            .unwrap();
            losses.push(loss);
        }

        assert!(
            (losses[0] - losses[1]).abs() < 1e-5,
            "accumulation changed the reported loss: {:?}",
            losses
        );
    }

    #[test]
    fn test_partial_accumulation_window_still_updates() {
        // 2 batches with accumulation_steps = 4: only the flush applies a
        // step, and it must change the parameters.
        let criterion = DiceLossConfig::new().with_num_classes(2).init();
        let model = UNet3d::<TestAutodiffBackend>::new(&tiny_model_config(), &device());
        let before = model.valid().forward(fixed_input(&device()));

        let mut loader = tiny_loader(2);
        let mut optimizer = AdamConfig::new().init();
        let (model, _) = train_epoch(
            model,
            &mut optimizer,
            &criterion,
            &mut loader,
            0.05,
            4,
            123,
        )
        .unwrap();

        let after = model.valid().forward(fixed_input(&device()));
        let diff: f32 = (before - after).abs().max().into_scalar();
        assert!(diff > 0.0, "flush step left parameters unchanged");
    }

    #[test]
    fn test_zero_accumulation_steps_rejected() {
        let criterion = DiceLossConfig::new().with_num_classes(2).init();
        let model = UNet3d::<TestAutodiffBackend>::new(&tiny_model_config(), &device());
        let mut loader = tiny_loader(2);
        let mut optimizer = AdamConfig::new().init();

        let err = train_epoch(model, &mut optimizer, &criterion, &mut loader, 0.1, 0, 1)
            .unwrap_err();
        assert!(matches!(err, SegError::Config(_)));
    }

    #[test]
    fn test_validate_epoch_aggregates_per_class() {
        let criterion = DiceLossConfig::new().with_num_classes(2).init();
        let model = UNet3d::<TestBackend>::new(&tiny_model_config(), &device());
        let loader: VolumeLoader<TestBackend> = VolumeLoader::new(synthetic_cases(3), device());

        let validation = validate_epoch(&model, &criterion, &loader).unwrap();
        assert_eq!(validation.dice_scores.len(), 2);
        assert!((0.0..=1.0).contains(&validation.mean_loss));
        for score in &validation.dice_scores {
            assert!((0.0..=1.0).contains(score));
        }
    }

    #[test]
    fn test_validate_epoch_empty_loader_is_error() {
        let criterion = DiceLossConfig::new().with_num_classes(2).init();
        let model = UNet3d::<TestBackend>::new(&tiny_model_config(), &device());
        let loader: VolumeLoader<TestBackend> = VolumeLoader::new(Vec::new(), device());

        assert!(validate_epoch(&model, &criterion, &loader).is_err());
    }

    #[test]
    fn test_best_checkpoint_saves_on_improvement_only() {
        let temp = TempDir::new().unwrap();
        let stem = temp.path().join(CHECKPOINT_STEM);
        let mut best = BestCheckpoint::new(stem.clone());

        let model = UNet3d::<TestBackend>::new(&tiny_model_config(), &device());

        assert!(best.observe(&model, 0.5).unwrap());
        assert!(checkpoint_file(&stem).exists());

        assert!(!best.observe(&model, 0.4).unwrap());
        assert!(best.observe(&model, 0.6).unwrap());
        assert!((best.best_score() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_checkpoint_round_trip_reproduces_predictions() {
        let temp = TempDir::new().unwrap();
        let stem = temp.path().join(CHECKPOINT_STEM);

        let config = tiny_model_config();
        let model = UNet3d::<TestBackend>::new(&config, &device());
        let mut best = BestCheckpoint::new(stem.clone());
        best.observe(&model, 0.9).unwrap();

        let reloaded = UNet3d::<TestBackend>::new(&config, &device())
            .load_file(stem, &CompactRecorder::new(), &device())
            .unwrap();

        let input = fixed_input(&device());
        let original = model.forward(input.clone());
        let restored = reloaded.forward(input);

        original
            .into_data()
            .assert_approx_eq(&restored.into_data(), 5);
    }
}
