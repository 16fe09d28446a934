//! Model archives and the storage seam used by the engine.
//!
//! An archive holds a `config` group, a `pod` group and a `dmd` group plus
//! top-level attributes. Matrices are stored as named column-major datasets.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use faer::Mat;
use serde::{Deserialize, Serialize};

use crate::config::RomConfig;
use crate::types::{DmdModes, PodModes, RomError, RomPerformance};

/// Archive layout version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Dense matrix stored column-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayDataset {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl ArrayDataset {
    pub fn from_mat(m: &Mat<f64>) -> Self {
        let (rows, cols) = (m.nrows(), m.ncols());
        let mut data = Vec::with_capacity(rows * cols);
        for j in 0..cols {
            for i in 0..rows {
                data.push(m[(i, j)]);
            }
        }
        Self { rows, cols, data }
    }

    pub fn to_mat(&self) -> Result<Mat<f64>, RomError> {
        if self.data.len() != self.rows * self.cols {
            return Err(RomError::InvalidInput(format!(
                "dataset declares {}×{} but holds {} values",
                self.rows,
                self.cols,
                self.data.len()
            )));
        }
        Ok(Mat::from_fn(self.rows, self.cols, |i, j| self.data[i + j * self.rows]))
    }
}

/// Persisted POD state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodGroup {
    pub spatial_modes: ArrayDataset,
    pub temporal_modes: ArrayDataset,
    pub singular_values: Vec<f64>,
    pub mean_field: Vec<f64>,
    pub energy_content: Vec<f64>,
    pub truncation_index: usize,
    pub n_snapshots: usize,
}

impl PodGroup {
    pub fn new(modes: &PodModes, n_snapshots: usize) -> Self {
        Self {
            spatial_modes: ArrayDataset::from_mat(&modes.spatial_modes),
            temporal_modes: ArrayDataset::from_mat(&modes.temporal_modes),
            singular_values: modes.singular_values.clone(),
            mean_field: modes.mean_field.clone(),
            energy_content: modes.energy_content.clone(),
            truncation_index: modes.truncation_index,
            n_snapshots,
        }
    }

    /// Rebuild the basis, checking that every dataset agrees on r and n_dofs.
    pub fn to_modes(&self) -> Result<PodModes, RomError> {
        let spatial_modes = self.spatial_modes.to_mat()?;
        let temporal_modes = self.temporal_modes.to_mat()?;
        let r = self.truncation_index;
        let consistent = spatial_modes.ncols() == r
            && temporal_modes.ncols() == r
            && self.singular_values.len() == r
            && self.energy_content.len() == r
            && self.mean_field.len() == spatial_modes.nrows();
        if !consistent {
            return Err(RomError::InvalidInput(
                "POD group has inconsistent dimensions".into(),
            ));
        }
        Ok(PodModes {
            spatial_modes,
            temporal_modes,
            singular_values: self.singular_values.clone(),
            mean_field: self.mean_field.clone(),
            energy_content: self.energy_content.clone(),
            truncation_index: r,
        })
    }
}

/// Persisted DMD state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmdGroup {
    pub modes: DmdModes,
    /// Sampling interval of the fitted operator.
    pub step: f64,
    pub initial_snapshot: Vec<f64>,
}

impl DmdGroup {
    pub fn validate(&self) -> Result<(), RomError> {
        let k = self.modes.n_modes();
        let consistent = self.modes.amplitudes.len() == k
            && self.modes.frequencies.len() == k
            && self.modes.growth_rates.len() == k
            && self.modes.mode_energies.len() == k
            && self.modes.eigenvectors.iter().all(|row| row.len() == k)
            && self.initial_snapshot.len() == self.modes.n_rows();
        if !consistent {
            return Err(RomError::InvalidInput(
                "DMD group has inconsistent dimensions".into(),
            ));
        }
        if !(self.step > 0.0 && self.step.is_finite()) {
            return Err(RomError::InvalidInput(format!(
                "DMD group has invalid step {}",
                self.step
            )));
        }
        Ok(())
    }
}

/// Everything needed to resume predictions from a trained engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RomModelArchive {
    pub format_version: u32,
    pub is_trained: bool,
    pub config: RomConfig,
    pub pod: Option<PodGroup>,
    pub dmd: Option<DmdGroup>,
    pub performance: Option<RomPerformance>,
}

/// Storage backend for model archives.
pub trait ModelStore: Send + Sync {
    fn save(&self, path: &Path, archive: &RomModelArchive) -> Result<(), RomError>;
    fn load(&self, path: &Path) -> Result<RomModelArchive, RomError>;
}

/// JSON file store.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonModelStore;

impl ModelStore for JsonModelStore {
    fn save(&self, path: &Path, archive: &RomModelArchive) -> Result<(), RomError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, archive)?;
        writer.flush()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<RomModelArchive, RomError> {
        let reader = BufReader::new(File::open(path)?);
        let archive: RomModelArchive = serde_json::from_reader(reader)?;
        if archive.format_version != FORMAT_VERSION {
            return Err(RomError::InvalidInput(format!(
                "unsupported archive version {} (expected {FORMAT_VERSION})",
                archive.format_version
            )));
        }
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_column_major() {
        let m = Mat::from_fn(2, 3, |i, j| (10 * i + j) as f64);
        let ds = ArrayDataset::from_mat(&m);
        assert_eq!(ds.data, vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0]);
        assert_eq!(ds.to_mat().unwrap(), m);
    }

    #[test]
    fn test_dataset_size_mismatch() {
        let ds = ArrayDataset {
            rows: 2,
            cols: 2,
            data: vec![1.0; 3],
        };
        assert!(ds.to_mat().is_err());
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let archive = RomModelArchive {
            format_version: FORMAT_VERSION,
            is_trained: false,
            config: RomConfig {
                max_modes: 7,
                ..Default::default()
            },
            pod: None,
            dmd: None,
            performance: None,
        };
        JsonModelStore.save(&path, &archive).unwrap();
        let loaded = JsonModelStore.load(&path).unwrap();
        assert_eq!(loaded.config, archive.config);
        assert!(!loaded.is_trained);
    }

    #[test]
    fn test_json_store_rejects_other_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let archive = RomModelArchive {
            format_version: FORMAT_VERSION + 1,
            is_trained: false,
            config: RomConfig::default(),
            pod: None,
            dmd: None,
            performance: None,
        };
        JsonModelStore.save(&path, &archive).unwrap();
        assert!(JsonModelStore.load(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = JsonModelStore.load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(RomError::Io(_))));
    }
}
