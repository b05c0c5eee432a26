//! Volume preprocessing and patch sampling.
//!
//! Mirrors the preprocessing applied to the acquisition data: a fixed
//! intensity window rescaled to [0, 1], and foreground-biased random
//! cropping of fixed-size training patches. Randomness always comes from an
//! injected `ChaCha8Rng`, never a process-global source.

use ndarray::{s, Array3};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Linear intensity rescaling from a source window to a target range.
#[derive(Debug, Clone)]
pub struct IntensityRange {
    pub a_min: f32,
    pub a_max: f32,
    pub b_min: f32,
    pub b_max: f32,
    /// Clamp rescaled values to [b_min, b_max]
    pub clip: bool,
}

impl Default for IntensityRange {
    fn default() -> Self {
        // Window used for the prostate study scans
        Self {
            a_min: -57.0,
            a_max: 164.0,
            b_min: 0.0,
            b_max: 1.0,
            clip: true,
        }
    }
}

impl IntensityRange {
    /// Rescale the volume in place.
    pub fn apply(&self, volume: &mut Array3<f32>) {
        let scale = (self.b_max - self.b_min) / (self.a_max - self.a_min);
        volume.mapv_inplace(|v| {
            let mut out = (v - self.a_min) * scale + self.b_min;
            if self.clip {
                out = out.clamp(self.b_min, self.b_max);
            }
            out
        });
    }
}

/// Foreground-biased random patch sampler.
///
/// Each call draws `num_samples` cubic patches from one volume; a patch is
/// centered on a foreground voxel with probability `pos / (pos + neg)` and
/// on an arbitrary voxel otherwise, with the crop window clamped to the
/// volume bounds.
#[derive(Debug, Clone)]
pub struct PatchSampler {
    /// Patch size in (z, y, x) voxels
    pub patch: [usize; 3],
    /// Relative weight of foreground-centered patches
    pub pos: f64,
    /// Relative weight of unconstrained patches
    pub neg: f64,
    /// Patches drawn per volume per epoch
    pub num_samples: usize,
}

impl Default for PatchSampler {
    fn default() -> Self {
        Self {
            patch: [96, 96, 96],
            pos: 1.0,
            neg: 1.0,
            num_samples: 4,
        }
    }
}

impl PatchSampler {
    /// Cubic patches of the given edge length.
    pub fn cubic(edge: usize, num_samples: usize) -> Self {
        Self {
            patch: [edge, edge, edge],
            num_samples,
            ..Self::default()
        }
    }

    /// Draw patches from a volume whose dimensions are at least the patch
    /// size (see [`pad_to_at_least`]). `foreground` holds the precomputed
    /// non-background voxel coordinates of `label`.
    pub fn sample(
        &self,
        image: &Array3<f32>,
        label: &Array3<u8>,
        foreground: &[[usize; 3]],
        rng: &mut ChaCha8Rng,
    ) -> Vec<(Array3<f32>, Array3<u8>)> {
        let dims = image.dim();
        let dims = [dims.0, dims.1, dims.2];
        debug_assert!(dims.iter().zip(&self.patch).all(|(d, p)| d >= p));

        let p_fg = self.pos / (self.pos + self.neg);

        (0..self.num_samples)
            .map(|_| {
                let center = if !foreground.is_empty() && rng.gen_bool(p_fg) {
                    foreground[rng.gen_range(0..foreground.len())]
                } else {
                    [
                        rng.gen_range(0..dims[0]),
                        rng.gen_range(0..dims[1]),
                        rng.gen_range(0..dims[2]),
                    ]
                };

                let start: Vec<usize> = (0..3)
                    .map(|axis| {
                        center[axis]
                            .saturating_sub(self.patch[axis] / 2)
                            .min(dims[axis] - self.patch[axis])
                    })
                    .collect();

                let window = s![
                    start[0]..start[0] + self.patch[0],
                    start[1]..start[1] + self.patch[1],
                    start[2]..start[2] + self.patch[2]
                ];

                (image.slice(window).to_owned(), label.slice(window).to_owned())
            })
            .collect()
    }
}

/// Coordinates of all non-background voxels in a mask.
pub fn foreground_voxels(label: &Array3<u8>) -> Vec<[usize; 3]> {
    label
        .indexed_iter()
        .filter(|(_, &v)| v != 0)
        .map(|((z, y, x), _)| [z, y, x])
        .collect()
}

/// Zero-pad a scan/mask pair so every dimension reaches at least `min`.
/// Padding voxels get intensity 0 and the background label.
pub fn pad_to_at_least(
    image: &Array3<f32>,
    label: &Array3<u8>,
    min: [usize; 3],
) -> (Array3<f32>, Array3<u8>) {
    let (d, h, w) = image.dim();
    let target = [d.max(min[0]), h.max(min[1]), w.max(min[2])];

    if target == [d, h, w] {
        return (image.clone(), label.clone());
    }

    let mut padded_image = Array3::<f32>::zeros((target[0], target[1], target[2]));
    let mut padded_label = Array3::<u8>::zeros((target[0], target[1], target[2]));
    padded_image.slice_mut(s![..d, ..h, ..w]).assign(image);
    padded_label.slice_mut(s![..d, ..h, ..w]).assign(label);

    (padded_image, padded_label)
}

/// Center-crop a scan/mask pair so every dimension is a multiple of
/// `multiple` (padding first when a dimension is smaller than one multiple).
/// The encoder halves the grid three times, so validation volumes must
/// divide evenly.
pub fn center_crop_to_multiple(
    image: &Array3<f32>,
    label: &Array3<u8>,
    multiple: usize,
) -> (Array3<f32>, Array3<u8>) {
    let (image, label) = pad_to_at_least(image, label, [multiple, multiple, multiple]);
    let (d, h, w) = image.dim();
    let target = [d / multiple * multiple, h / multiple * multiple, w / multiple * multiple];

    if target == [d, h, w] {
        return (image, label);
    }

    let start = [(d - target[0]) / 2, (h - target[1]) / 2, (w - target[2]) / 2];
    let window = s![
        start[0]..start[0] + target[0],
        start[1]..start[1] + target[1],
        start[2]..start[2] + target[2]
    ];

    (image.slice(window).to_owned(), label.slice(window).to_owned())
}
