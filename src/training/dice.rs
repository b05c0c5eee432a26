//! Multi-class Dice coefficient and loss.
//!
//! The Dice coefficient measures set overlap between a predicted and a true
//! segmentation region, `2*|P ∩ T| / (|P| + |T|)`, computed per class over
//! soft (softmax) predictions. The loss is `1 - mean(per-class scores)`,
//! which stays differentiable with respect to the logits.
//!
//! A smoothing constant keeps the ratio defined when a class is absent from
//! both prediction and target (the score then evaluates to 1, i.e. a vacuous
//! perfect match). Background (class 0) can be excluded from scoring so that
//! the dominant background region cannot inflate the aggregate.

use burn::{
    config::Config,
    tensor::{activation::softmax, backend::Backend, ElementConversion, Int, Tensor},
};

use crate::utils::error::{Result, SegError};

/// Configuration for the Dice loss
#[derive(Config, Debug)]
pub struct DiceLossConfig {
    /// Number of segmentation classes
    #[config(default = "6")]
    pub num_classes: usize,

    /// Smoothing constant preventing division by zero for absent classes
    #[config(default = "1e-6")]
    pub smooth: f64,

    /// Whether class 0 participates in scoring
    #[config(default = "true")]
    pub include_background: bool,
}

impl DiceLossConfig {
    /// Initialize the loss from this configuration
    pub fn init(&self) -> DiceLoss {
        DiceLoss {
            num_classes: self.num_classes,
            smooth: self.smooth,
            include_background: self.include_background,
        }
    }
}

/// Multi-class Dice coefficient / loss
#[derive(Debug, Clone)]
pub struct DiceLoss {
    num_classes: usize,
    smooth: f64,
    include_background: bool,
}

impl DiceLoss {
    /// Per-class Dice scores between logits and target labels.
    ///
    /// `logits` is (batch, C, D, H, W) raw scores; `target` is either
    /// (batch, 1, D, H, W) class indices or (batch, C, D, H, W) one-hot.
    /// The returned tensor has one entry per scored class, each in (0, 1].
    ///
    /// Shape mismatches and out-of-range label values are errors, not
    /// silent broadcasts.
    pub fn dice<B: Backend>(
        &self,
        logits: Tensor<B, 5>,
        target: Tensor<B, 5, Int>,
    ) -> Result<Tensor<B, 1>> {
        let target_channels = self.validate::<B>(&logits, &target)?;

        // Per-voxel class probabilities
        let probs = softmax(logits, 1);

        // One-hot along the class axis unless the target already is
        let target = if target_channels == 1 {
            one_hot(target, self.num_classes)
        } else {
            target.float()
        };

        // (B, C, D, H, W) -> (C, B*D*H*W): everything except the class axis
        // is reduced together
        let probs = flatten_per_class(probs);
        let target = flatten_per_class(target);

        let (probs, target) = if self.include_background {
            (probs, target)
        } else {
            (
                probs.slice([1..self.num_classes]),
                target.slice([1..self.num_classes]),
            )
        };

        let intersection = (probs.clone() * target.clone()).sum_dim(1);
        let denominator = probs.sum_dim(1) + target.sum_dim(1);

        let scores = intersection
            .mul_scalar(2.0)
            .add_scalar(self.smooth)
            .div(denominator.add_scalar(self.smooth));

        Ok(scores.reshape([self.num_scored_classes()]))
    }

    /// Dice loss: `1 - mean(per-class scores)`, differentiable w.r.t. logits.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 5>,
        target: Tensor<B, 5, Int>,
    ) -> Result<Tensor<B, 1>> {
        let scores = self.dice(logits, target)?;
        Ok(scores.mean().neg().add_scalar(1.0))
    }

    /// Number of classes that participate in scoring
    pub fn num_scored_classes(&self) -> usize {
        if self.include_background {
            self.num_classes
        } else {
            self.num_classes - 1
        }
    }

    /// Check shapes and label range; returns the target channel count.
    fn validate<B: Backend>(
        &self,
        logits: &Tensor<B, 5>,
        target: &Tensor<B, 5, Int>,
    ) -> Result<usize> {
        let [b, c, d, h, w] = logits.dims();
        let [tb, tc, td, th, tw] = target.dims();

        if c != self.num_classes {
            return Err(SegError::ShapeMismatch {
                expected: format!("{} logit channels", self.num_classes),
                found: format!("{c}"),
            });
        }
        if tb != b || [td, th, tw] != [d, h, w] || (tc != 1 && tc != c) {
            return Err(SegError::ShapeMismatch {
                expected: format!("[{b}, 1|{c}, {d}, {h}, {w}]"),
                found: format!("{:?}", target.dims()),
            });
        }

        let min: i64 = target.clone().min().into_scalar().elem();
        let max: i64 = target.clone().max().into_scalar().elem();
        // A pre-one-hot target may only hold zeros and ones
        let limit = if tc == 1 { self.num_classes as i64 } else { 2 };
        if min < 0 || max >= limit {
            return Err(SegError::InvalidLabels {
                min,
                max,
                num_classes: self.num_classes,
            });
        }

        Ok(tc)
    }
}

/// Expand (B, 1, D, H, W) class indices into (B, C, D, H, W) one-hot floats.
pub fn one_hot<B: Backend>(target: Tensor<B, 5, Int>, num_classes: usize) -> Tensor<B, 5> {
    let channels: Vec<Tensor<B, 5>> = (0..num_classes)
        .map(|class| target.clone().equal_elem(class as i64).float())
        .collect();
    Tensor::cat(channels, 1)
}

/// Move the class axis first and flatten the rest: (B, C, ...) -> (C, N).
fn flatten_per_class<B: Backend>(tensor: Tensor<B, 5>) -> Tensor<B, 2> {
    let [_, c, _, _, _] = tensor.dims();
    tensor.swap_dims(0, 1).reshape([c as i32, -1])
}
