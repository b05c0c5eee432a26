//! 3D U-Net for volumetric semantic segmentation
//!
//! Encoder/decoder with skip connections built from Burn's `Conv3d` modules.
//! Downsampling uses stride-2 convolutions (Burn has no 3D max-pool) and
//! upsampling uses `ConvTranspose3d`; three resolution levels, so input
//! spatial dimensions must be divisible by 8.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv3d, Conv3dConfig, ConvTranspose3d, ConvTranspose3dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig3d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the 3D U-Net
#[derive(Config, Debug)]
pub struct UNet3dConfig {
    /// Number of input channels (1 for MRI intensity)
    #[config(default = "1")]
    pub in_channels: usize,

    /// Number of output classes
    #[config(default = "6")]
    pub num_classes: usize,

    /// Filter count of the first encoder block; doubles per level
    #[config(default = "16")]
    pub base_filters: usize,

    /// Dropout rate applied at the bottleneck
    #[config(default = "0.1")]
    pub dropout_rate: f64,
}

/// Double convolution block: (Conv3d -> BatchNorm -> ReLU) x 2
#[derive(Module, Debug)]
pub struct ConvBlock3d<B: Backend> {
    conv1: Conv3d<B>,
    bn1: BatchNorm<B, 3>,
    conv2: Conv3d<B>,
    bn2: BatchNorm<B, 3>,
    relu: Relu,
}

impl<B: Backend> ConvBlock3d<B> {
    /// Create a new convolutional block
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv1 = Conv3dConfig::new([in_channels, out_channels], [3, 3, 3])
            .with_padding(PaddingConfig3d::Same)
            .init(device);
        let bn1 = BatchNormConfig::new(out_channels).init(device);

        let conv2 = Conv3dConfig::new([out_channels, out_channels], [3, 3, 3])
            .with_padding(PaddingConfig3d::Same)
            .init(device);
        let bn2 = BatchNormConfig::new(out_channels).init(device);

        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            relu: Relu::new(),
        }
    }

    /// Forward pass through the block
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.relu.forward(x);
        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);
        self.relu.forward(x)
    }
}

/// Encoder stage: stride-2 convolution halving the grid, then a conv block
#[derive(Module, Debug)]
pub struct Down3d<B: Backend> {
    down: Conv3d<B>,
    block: ConvBlock3d<B>,
}

impl<B: Backend> Down3d<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let down = Conv3dConfig::new([in_channels, in_channels], [2, 2, 2])
            .with_stride([2, 2, 2])
            .init(device);
        let block = ConvBlock3d::new(in_channels, out_channels, device);
        Self { down, block }
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.block.forward(self.down.forward(x))
    }
}

/// Decoder stage: transpose-conv upsampling, skip concatenation, conv block
#[derive(Module, Debug)]
pub struct Up3d<B: Backend> {
    up: ConvTranspose3d<B>,
    block: ConvBlock3d<B>,
}

impl<B: Backend> Up3d<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let up = ConvTranspose3dConfig::new([in_channels, out_channels], [2, 2, 2])
            .with_stride([2, 2, 2])
            .init(device);
        // Concatenated skip doubles the channel count entering the block
        let block = ConvBlock3d::new(out_channels * 2, out_channels, device);
        Self { up, block }
    }

    pub fn forward(&self, x: Tensor<B, 5>, skip: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.up.forward(x);
        let x = Tensor::cat(vec![skip, x], 1);
        self.block.forward(x)
    }
}

/// 3D U-Net segmentation network
///
/// Maps a (batch, in_channels, D, H, W) volume to (batch, num_classes, D, H, W)
/// logits. D, H and W must each be divisible by 8.
#[derive(Module, Debug)]
pub struct UNet3d<B: Backend> {
    inc: ConvBlock3d<B>,
    down1: Down3d<B>,
    down2: Down3d<B>,
    down3: Down3d<B>,
    dropout: Dropout,
    up1: Up3d<B>,
    up2: Up3d<B>,
    up3: Up3d<B>,
    head: Conv3d<B>,

    num_classes: usize,
}

impl<B: Backend> UNet3d<B> {
    /// Create a new 3D U-Net from configuration
    pub fn new(config: &UNet3dConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        let inc = ConvBlock3d::new(config.in_channels, base, device);
        let down1 = Down3d::new(base, base * 2, device);
        let down2 = Down3d::new(base * 2, base * 4, device);
        let down3 = Down3d::new(base * 4, base * 8, device);

        let dropout = DropoutConfig::new(config.dropout_rate).init();

        let up1 = Up3d::new(base * 8, base * 4, device);
        let up2 = Up3d::new(base * 4, base * 2, device);
        let up3 = Up3d::new(base * 2, base, device);

        let head = Conv3dConfig::new([base, config.num_classes], [1, 1, 1]).init(device);

        Self {
            inc,
            down1,
            down2,
            down3,
            dropout,
            up1,
            up2,
            up3,
            head,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass producing raw class logits
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x1 = self.inc.forward(x);
        let x2 = self.down1.forward(x1.clone());
        let x3 = self.down2.forward(x2.clone());

        let x = self.down3.forward(x3.clone());
        let x = self.dropout.forward(x);

        let x = self.up1.forward(x, x3);
        let x = self.up2.forward(x, x2);
        let x = self.up3.forward(x, x1);

        self.head.forward(x)
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    fn tiny_config() -> UNet3dConfig {
        UNet3dConfig::new()
            .with_base_filters(4)
            .with_dropout_rate(0.0)
    }

    #[test]
    fn test_unet_output_shape() {
        let device = Default::default();
        let model = UNet3d::<TestBackend>::new(&tiny_config(), &device);

        let input = Tensor::<TestBackend, 5>::zeros([2, 1, 16, 16, 16], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 6, 16, 16, 16]);
    }

    #[test]
    fn test_unet_respects_class_config() {
        let device = Default::default();
        let config = tiny_config().with_num_classes(3);
        let model = UNet3d::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 5>::zeros([1, 1, 8, 8, 8], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 3, 8, 8, 8]);
        assert_eq!(model.num_classes(), 3);
    }

    #[test]
    fn test_conv_block_preserves_spatial_dims() {
        let device = Default::default();
        let block = ConvBlock3d::<TestBackend>::new(1, 4, &device);

        let input = Tensor::<TestBackend, 5>::zeros([1, 1, 8, 8, 8], &device);
        let output = block.forward(input);

        assert_eq!(output.dims(), [1, 4, 8, 8, 8]);
    }

    #[test]
    fn test_down_halves_and_up_restores() {
        let device = Default::default();
        let down = Down3d::<TestBackend>::new(4, 8, &device);
        let up = Up3d::<TestBackend>::new(8, 4, &device);

        let input = Tensor::<TestBackend, 5>::zeros([1, 4, 8, 8, 8], &device);
        let skip = input.clone();

        let encoded = down.forward(input);
        assert_eq!(encoded.dims(), [1, 8, 4, 4, 4]);

        let decoded = up.forward(encoded, skip);
        assert_eq!(decoded.dims(), [1, 4, 8, 8, 8]);
    }
}
