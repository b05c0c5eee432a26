//! NIfTI volume loading.
//!
//! Scans are decoded to `Array3<f32>` intensities and masks to `Array3<u8>`
//! class indices. NIfTI stores volumes as (W, H, z); everything downstream
//! works in (z, H, W), so the axes are permuted on load.

use std::path::Path;

use ndarray::{Array3, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::utils::error::{Result, SegError};

/// Load a 3D MRI scan as float intensities in (z, H, W) order.
pub fn load_scan(path: &Path) -> Result<Array3<f32>> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| SegError::VolumeLoad(path.to_path_buf(), e.to_string()))?;

    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| SegError::VolumeLoad(path.to_path_buf(), e.to_string()))?;

    // [W, H, z] -> [z, H, W]
    let data = data.permuted_axes([2, 1, 0].as_slice());
    let data = data.as_standard_layout().into_owned();

    data.into_dimensionality::<Ix3>()
        .map_err(|e| SegError::VolumeLoad(path.to_path_buf(), format!("not a 3D volume: {e}")))
}

/// Load a 3D label mask as class indices in (z, H, W) order.
pub fn load_mask(path: &Path) -> Result<Array3<u8>> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| SegError::VolumeLoad(path.to_path_buf(), e.to_string()))?;

    let data = obj
        .into_volume()
        .into_ndarray::<u8>()
        .map_err(|e| SegError::VolumeLoad(path.to_path_buf(), e.to_string()))?;

    // [W, H, z] -> [z, H, W]
    let data = data.permuted_axes([2, 1, 0].as_slice());
    let data = data.as_standard_layout().into_owned();

    data.into_dimensionality::<Ix3>()
        .map_err(|e| SegError::VolumeLoad(path.to_path_buf(), format!("not a 3D volume: {e}")))
}

/// Check that a scan and its mask cover the same voxel grid.
pub fn check_pair_shapes(image: &Array3<f32>, mask: &Array3<u8>) -> Result<()> {
    if image.dim() != mask.dim() {
        return Err(SegError::ShapeMismatch {
            expected: format!("{:?}", image.dim()),
            found: format!("{:?}", mask.dim()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_pair_shapes_match() {
        let image = Array3::<f32>::zeros((4, 8, 8));
        let mask = Array3::<u8>::zeros((4, 8, 8));
        assert!(check_pair_shapes(&image, &mask).is_ok());
    }

    #[test]
    fn test_pair_shapes_mismatch() {
        let image = Array3::<f32>::zeros((4, 8, 8));
        let mask = Array3::<u8>::zeros((4, 8, 6));
        let err = check_pair_shapes(&image, &mask).unwrap_err();
        assert!(matches!(err, SegError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_load_scan_missing_file() {
        let err = load_scan(Path::new("does/not/exist.nii.gz")).unwrap_err();
        assert!(matches!(err, SegError::VolumeLoad(..)));
    }
}
