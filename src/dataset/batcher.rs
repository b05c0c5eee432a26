//! Burn tensor batching and epoch loaders.
//!
//! `MriBatcher` turns sampled patches into the (batch, channel, depth,
//! height, width) tensors the model and loss consume. `PatchLoader` drives a
//! training epoch with lazily materialised, shuffled patch batches (building
//! one batch at a time keeps device memory bounded); `VolumeLoader` yields
//! one whole validation volume per batch.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use ndarray::Array3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::dataset::transform::{foreground_voxels, pad_to_at_least, PatchSampler};
use crate::utils::error::{Result, SegError};

/// A single scan patch (or whole volume) ready for batching.
#[derive(Debug, Clone)]
pub struct MriItem {
    /// Intensities, flattened in (z, y, x) order
    pub image: Vec<f32>,
    /// Class indices, flattened in (z, y, x) order
    pub label: Vec<i64>,
    /// Spatial shape (depth, height, width)
    pub shape: [usize; 3],
}

impl MriItem {
    /// Build an item from a scan/mask array pair of identical shape.
    pub fn from_arrays(image: &Array3<f32>, label: &Array3<u8>) -> Self {
        let (d, h, w) = image.dim();
        Self {
            image: image.iter().copied().collect(),
            label: label.iter().map(|&v| v as i64).collect(),
            shape: [d, h, w],
        }
    }
}

/// A batch of volumes for training or evaluation
#[derive(Clone, Debug)]
pub struct MriBatch<B: Backend> {
    /// Image batch with shape [batch, 1, depth, height, width]
    pub images: Tensor<B, 5>,
    /// Label batch with shape [batch, 1, depth, height, width]
    pub labels: Tensor<B, 5, Int>,
}

/// Batcher assembling `MriItem`s into `MriBatch`es
#[derive(Clone, Debug, Default)]
pub struct MriBatcher;

impl MriBatcher {
    /// Assemble a batch, verifying that every item shares one spatial shape.
    pub fn assemble<B: Backend>(
        &self,
        items: Vec<MriItem>,
        device: &B::Device,
    ) -> Result<MriBatch<B>> {
        let first = items
            .first()
            .ok_or_else(|| SegError::Dataset("cannot assemble an empty batch".to_string()))?;
        let shape = first.shape;

        if let Some(bad) = items.iter().find(|item| item.shape != shape) {
            return Err(SegError::ShapeMismatch {
                expected: format!("{:?}", shape),
                found: format!("{:?}", bad.shape),
            });
        }

        let batch_size = items.len();
        let [d, h, w] = shape;

        let image_data: Vec<f32> = items.iter().flat_map(|i| i.image.iter().copied()).collect();
        let label_data: Vec<i64> = items.iter().flat_map(|i| i.label.iter().copied()).collect();

        let images = Tensor::<B, 5>::from_data(
            TensorData::new(image_data, [batch_size, 1, d, h, w]),
            device,
        );
        let labels = Tensor::<B, 5, Int>::from_data(
            TensorData::new(label_data, [batch_size, 1, d, h, w]),
            device,
        );

        Ok(MriBatch { images, labels })
    }
}

impl<B: Backend> Batcher<B, MriItem, MriBatch<B>> for MriBatcher {
    fn batch(&self, items: Vec<MriItem>, device: &B::Device) -> MriBatch<B> {
        self.assemble(items, device)
            .expect("batch items must share one patch shape")
    }
}

struct LoadedCase {
    image: Array3<f32>,
    label: Array3<u8>,
    foreground: Vec<[usize; 3]>,
}

/// Training loader: shuffled cases, foreground-biased patches, lazy batches.
///
/// The RNG is injected and reseeded per epoch via [`PatchLoader::start_epoch`]
/// so a run is reproducible end to end.
pub struct PatchLoader<B: Backend> {
    cases: Vec<LoadedCase>,
    sampler: PatchSampler,
    batcher: MriBatcher,
    batch_size: usize,
    device: B::Device,
    rng: ChaCha8Rng,
    order: Vec<usize>,
    cursor: usize,
    pending: Vec<MriItem>,
}

impl<B: Backend> PatchLoader<B> {
    /// Create a loader over preloaded (scan, mask) pairs. Volumes smaller
    /// than the patch are zero-padded once, and foreground voxel lists are
    /// precomputed per case.
    pub fn new(
        cases: Vec<(Array3<f32>, Array3<u8>)>,
        sampler: PatchSampler,
        batch_size: usize,
        device: B::Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(SegError::Config("batch size must be positive".to_string()));
        }
        if cases.is_empty() {
            return Err(SegError::Dataset(
                "training loader needs at least one case".to_string(),
            ));
        }

        let cases = cases
            .into_iter()
            .map(|(image, label)| {
                let (image, label) = pad_to_at_least(&image, &label, sampler.patch);
                let foreground = foreground_voxels(&label);
                LoadedCase {
                    image,
                    label,
                    foreground,
                }
            })
            .collect();

        Ok(Self {
            cases,
            sampler,
            batcher: MriBatcher,
            batch_size,
            device,
            rng: ChaCha8Rng::seed_from_u64(0),
            order: Vec::new(),
            cursor: 0,
            pending: Vec::new(),
        })
    }

    /// Reseed the loader and reshuffle the case order for a new epoch.
    pub fn start_epoch(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.order = (0..self.cases.len()).collect();
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
        self.pending.clear();
    }

    /// Produce the next batch of the epoch, or `None` when exhausted.
    pub fn next_batch(&mut self) -> Option<Result<MriBatch<B>>> {
        while self.pending.len() < self.batch_size && self.cursor < self.order.len() {
            let case = &self.cases[self.order[self.cursor]];
            self.cursor += 1;

            let patches =
                self.sampler
                    .sample(&case.image, &case.label, &case.foreground, &mut self.rng);
            self.pending.extend(
                patches
                    .iter()
                    .map(|(image, label)| MriItem::from_arrays(image, label)),
            );
        }

        if self.pending.is_empty() {
            return None;
        }

        let take = self.batch_size.min(self.pending.len());
        let items: Vec<MriItem> = self.pending.drain(..take).collect();
        Some(self.batcher.assemble(items, &self.device))
    }

    /// Number of batches one epoch yields.
    pub fn batches_per_epoch(&self) -> usize {
        let total = self.cases.len() * self.sampler.num_samples;
        total.div_ceil(self.batch_size)
    }

    /// Number of loaded cases.
    pub fn num_cases(&self) -> usize {
        self.cases.len()
    }
}

/// Evaluation loader: one whole volume per batch, in case order.
pub struct VolumeLoader<B: Backend> {
    cases: Vec<(Array3<f32>, Array3<u8>)>,
    batcher: MriBatcher,
    device: B::Device,
}

impl<B: Backend> VolumeLoader<B> {
    /// Create a loader over preloaded (scan, mask) pairs.
    pub fn new(cases: Vec<(Array3<f32>, Array3<u8>)>, device: B::Device) -> Self {
        Self {
            cases,
            batcher: MriBatcher,
            device,
        }
    }

    /// Number of volumes (= batches)
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether the loader holds no volumes
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Iterate single-volume batches.
    pub fn iter(&self) -> impl Iterator<Item = Result<MriBatch<B>>> + '_ {
        self.cases.iter().map(move |(image, label)| {
            self.batcher
                .assemble(vec![MriItem::from_arrays(image, label)], &self.device)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn small_case(fill: u8) -> (Array3<f32>, Array3<u8>) {
        let image = Array3::from_shape_fn((8, 8, 8), |(z, y, x)| (z + y + x) as f32 / 24.0);
        let mut label = Array3::<u8>::zeros((8, 8, 8));
        label[[4, 4, 4]] = fill;
        (image, label)
    }

    #[test]
    fn test_batch_tensor_shapes() {
        let (image, label) = small_case(3);
        let items = vec![
            MriItem::from_arrays(&image, &label),
            MriItem::from_arrays(&image, &label),
        ];

        let batch: MriBatch<TestBackend> = MriBatcher.assemble(items, &device()).unwrap();
        assert_eq!(batch.images.dims(), [2, 1, 8, 8, 8]);
        assert_eq!(batch.labels.dims(), [2, 1, 8, 8, 8]);
    }

    #[test]
    fn test_batch_rejects_mixed_shapes() {
        let (image, label) = small_case(1);
        let other_image = Array3::<f32>::zeros((4, 4, 4));
        let other_label = Array3::<u8>::zeros((4, 4, 4));

        let items = vec![
            MriItem::from_arrays(&image, &label),
            MriItem::from_arrays(&other_image, &other_label),
        ];
        let err = MriBatcher
            .assemble::<TestBackend>(items, &device())
            .unwrap_err();
        assert!(matches!(err, SegError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_batch_rejects_empty() {
        let err = MriBatcher
            .assemble::<TestBackend>(Vec::new(), &device())
            .unwrap_err();
        assert!(matches!(err, SegError::Dataset(_)));
    }

    #[test]
    fn test_patch_loader_epoch_batch_count() {
        let cases = vec![small_case(1), small_case(2), small_case(3)];
        let sampler = PatchSampler::cubic(4, 2);
        let mut loader: PatchLoader<TestBackend> =
            PatchLoader::new(cases, sampler, 4, device()).unwrap();

        assert_eq!(loader.batches_per_epoch(), 2);

        loader.start_epoch(42);
        let mut total_items = 0;
        let mut batches = 0;
        while let Some(batch) = loader.next_batch() {
            let batch = batch.unwrap();
            total_items += batch.images.dims()[0];
            batches += 1;
        }
        assert_eq!(batches, 2);
        assert_eq!(total_items, 6);
    }

    #[test]
    fn test_patch_loader_reproducible_epochs() {
        let make = || {
            let cases = vec![small_case(1), small_case(2)];
            PatchLoader::<TestBackend>::new(cases, PatchSampler::cubic(4, 2), 2, device()).unwrap()
        };

        let mut a = make();
        let mut b = make();
        a.start_epoch(7);
        b.start_epoch(7);

        let batch_a = a.next_batch().unwrap().unwrap();
        let batch_b = b.next_batch().unwrap().unwrap();
        assert_eq!(batch_a.images.into_data(), batch_b.images.into_data());
        assert_eq!(batch_a.labels.into_data(), batch_b.labels.into_data());
    }

    #[test]
    fn test_volume_loader_single_volume_batches() {
        let cases = vec![small_case(1), small_case(2)];
        let loader: VolumeLoader<TestBackend> = VolumeLoader::new(cases, device());

        assert_eq!(loader.len(), 2);
        for batch in loader.iter() {
            let batch = batch.unwrap();
            assert_eq!(batch.images.dims()[0], 1);
        }
    }
}
