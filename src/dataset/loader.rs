//! Dataset discovery.
//!
//! Scans and semantic masks live in two sibling directories of `.nii.gz`
//! files whose names share a case prefix (e.g. `Case004_Week1_LFOV.nii.gz`
//! and `Case004_Week1_SEMANTIC_LFOV.nii.gz`). Both listings are sorted by
//! the case key and paired positionally.

use std::path::{Path, PathBuf};

use ndarray::Array3;

use crate::dataset::transform::IntensityRange;
use crate::dataset::volume::{check_pair_shapes, load_mask, load_scan};
use crate::utils::error::{Result, SegError};

/// One scan/mask pair on disk.
#[derive(Debug, Clone)]
pub struct CasePair {
    /// Path to the MRI scan volume
    pub image: PathBuf,
    /// Path to the semantic label mask
    pub mask: PathBuf,
    /// Case identifier derived from the image file name
    pub case_id: String,
}

/// Summary statistics for a discovered dataset
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub total_cases: usize,
    pub image_dir: PathBuf,
    pub mask_dir: PathBuf,
}

impl std::fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dataset Statistics:")?;
        writeln!(f, "  Cases:  {}", self.total_cases)?;
        writeln!(f, "  Images: {:?}", self.image_dir)?;
        write!(f, "  Masks:  {:?}", self.mask_dir)
    }
}

/// A discovered prostate MRI dataset: paired scan and mask paths.
#[derive(Debug, Clone)]
pub struct MriDataset {
    /// All discovered scan/mask pairs, sorted by case key
    pub cases: Vec<CasePair>,
    image_dir: PathBuf,
    mask_dir: PathBuf,
}

impl MriDataset {
    /// Discover and pair `.nii.gz` files from the image and mask directories.
    ///
    /// Fails when either directory is empty or the file counts differ —
    /// an unpaired case would silently shift every pairing after it.
    pub fn discover(image_dir: &Path, mask_dir: &Path) -> Result<Self> {
        let mut images = list_nii_files(image_dir)?;
        let mut masks = list_nii_files(mask_dir)?;

        if images.is_empty() {
            return Err(SegError::Dataset(format!(
                "no .nii.gz files found in {:?}",
                image_dir
            )));
        }
        if images.len() != masks.len() {
            return Err(SegError::Dataset(format!(
                "image/mask count mismatch: {} scans vs {} masks",
                images.len(),
                masks.len()
            )));
        }

        images.sort_by_key(|p| case_key(p));
        masks.sort_by_key(|p| case_key(p));

        let cases = images
            .into_iter()
            .zip(masks)
            .map(|(image, mask)| {
                let case_id = image
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .trim_end_matches(".nii")
                    .to_string();
                CasePair {
                    image,
                    mask,
                    case_id,
                }
            })
            .collect();

        Ok(Self {
            cases,
            image_dir: image_dir.to_path_buf(),
            mask_dir: mask_dir.to_path_buf(),
        })
    }

    /// Number of cases
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether the dataset holds no cases
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Summary statistics
    pub fn stats(&self) -> DatasetStats {
        DatasetStats {
            total_cases: self.cases.len(),
            image_dir: self.image_dir.clone(),
            mask_dir: self.mask_dir.clone(),
        }
    }
}

/// Load one case pair from disk and apply the intensity window to the scan.
pub fn load_case(pair: &CasePair, window: &IntensityRange) -> Result<(Array3<f32>, Array3<u8>)> {
    let mut image = load_scan(&pair.image)?;
    let mask = load_mask(&pair.mask)?;
    check_pair_shapes(&image, &mask)?;
    window.apply(&mut image);
    Ok((image, mask))
}

/// Sort key: case token plus the study-week digit, matching the acquisition
/// naming scheme `<case>_Week<n>_...`.
fn case_key(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let mut parts = name.split('_');
    let case = parts.next().unwrap_or_default().to_string();
    let week = parts
        .next()
        .and_then(|p| p.chars().last())
        .map(|c| c.to_string())
        .unwrap_or_default();
    (case, week)
}

fn list_nii_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(SegError::Dataset(format!("not a directory: {:?}", dir)));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if path.is_file() && name.ends_with(".nii.gz") {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_discover_pairs_sorted_by_case_key() {
        let temp = TempDir::new().unwrap();
        let image_dir = temp.path().join("images");
        let mask_dir = temp.path().join("masks");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::create_dir_all(&mask_dir).unwrap();

        touch(&image_dir, "Case010_Week1_LFOV.nii.gz");
        touch(&image_dir, "Case004_Week2_LFOV.nii.gz");
        touch(&image_dir, "Case004_Week1_LFOV.nii.gz");
        touch(&mask_dir, "Case010_Week1_SEMANTIC.nii.gz");
        touch(&mask_dir, "Case004_Week2_SEMANTIC.nii.gz");
        touch(&mask_dir, "Case004_Week1_SEMANTIC.nii.gz");

        let dataset = MriDataset::discover(&image_dir, &mask_dir).unwrap();
        assert_eq!(dataset.len(), 3);

        let ids: Vec<&str> = dataset.cases.iter().map(|c| c.case_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "Case004_Week1_LFOV",
                "Case004_Week2_LFOV",
                "Case010_Week1_LFOV"
            ]
        );
        // Pairing follows the same ordering on the mask side
        assert!(dataset.cases[0]
            .mask
            .to_string_lossy()
            .contains("Case004_Week1"));
    }

    #[test]
    fn test_discover_count_mismatch() {
        let temp = TempDir::new().unwrap();
        let image_dir = temp.path().join("images");
        let mask_dir = temp.path().join("masks");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::create_dir_all(&mask_dir).unwrap();

        touch(&image_dir, "Case001_Week1.nii.gz");
        touch(&image_dir, "Case002_Week1.nii.gz");
        touch(&mask_dir, "Case001_Week1.nii.gz");

        let err = MriDataset::discover(&image_dir, &mask_dir).unwrap_err();
        assert!(matches!(err, SegError::Dataset(_)));
    }

    #[test]
    fn test_discover_empty_dir() {
        let temp = TempDir::new().unwrap();
        let image_dir = temp.path().join("images");
        let mask_dir = temp.path().join("masks");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::create_dir_all(&mask_dir).unwrap();

        assert!(MriDataset::discover(&image_dir, &mask_dir).is_err());
    }

    #[test]
    fn test_case_key() {
        let key = case_key(Path::new("Case004_Week2_LFOV.nii.gz"));
        assert_eq!(key, ("Case004".to_string(), "2".to_string()));
    }
}
