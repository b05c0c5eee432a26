//! Model module
//!
//! Holds the 3D U-Net segmentation architecture built with Burn.

pub mod unet3d;

// Re-export main types for convenience
pub use unet3d::{ConvBlock3d, Down3d, UNet3d, UNet3dConfig, Up3d};
