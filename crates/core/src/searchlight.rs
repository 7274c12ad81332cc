use std::collections::BTreeMap;

use surfing_geometry::GridGeometry;
use tracing::debug;

use crate::error::SurfingError;
use crate::parallel;
use crate::selection::GEOMETRY_METADATA;
use crate::sparse_attributes::{AttributeError, AttributeType, SparseAttributes};
use crate::volume::VolumeImage;

/// Samples × features matrix, each feature tied to a voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    nsamples: usize,
    values: Vec<f64>,
    voxels: Vec<usize>,
    feature_of: BTreeMap<usize, usize>,
}

impl Dataset {
    /// `rows` holds one row per sample, each with one value per entry of
    /// `voxels`.
    pub fn new(rows: Vec<Vec<f64>>, voxels: Vec<usize>) -> Result<Self, SurfingError> {
        let mut feature_of = BTreeMap::new();
        for (feature, &voxel) in voxels.iter().enumerate() {
            if feature_of.insert(voxel, feature).is_some() {
                return Err(SurfingError::Config(format!("voxel {voxel} appears twice")));
            }
        }
        let nsamples = rows.len();
        let mut values = Vec::with_capacity(nsamples * voxels.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != voxels.len() {
                return Err(SurfingError::Config(format!(
                    "sample {i} has {} values for {} features",
                    row.len(),
                    voxels.len()
                )));
            }
            values.extend(row);
        }
        Ok(Self {
            nsamples,
            values,
            voxels,
            feature_of,
        })
    }

    /// One sample per volume (and time point) of `volumes`; features are the
    /// voxels of `grid` selected by `mask`, or all voxels without a mask.
    pub fn from_volumes(
        grid: &GridGeometry,
        volumes: &[VolumeImage],
        mask: Option<&[bool]>,
    ) -> Result<Self, SurfingError> {
        let nvoxels = grid.nvoxels();
        if let Some(mask) = mask {
            if mask.len() != nvoxels {
                return Err(SurfingError::ImageSize {
                    expected: nvoxels,
                    actual: mask.len(),
                });
            }
        }
        let voxels: Vec<usize> = match mask {
            Some(mask) => (0..nvoxels).filter(|&v| mask[v]).collect(),
            None => (0..nvoxels).collect(),
        };

        let mut rows = Vec::new();
        for image in volumes {
            if !image.geometry().same_space(grid) {
                return Err(SurfingError::Config(
                    "volume does not share the dataset grid".to_string(),
                ));
            }
            for t in 0..image.nvolumes() {
                let Some(volume) = image.volume(t) else {
                    continue;
                };
                rows.push(voxels.iter().map(|&v| f64::from(volume[v])).collect());
            }
        }
        Self::new(rows, voxels)
    }

    pub fn nsamples(&self) -> usize {
        self.nsamples
    }

    pub fn nfeatures(&self) -> usize {
        self.voxels.len()
    }

    pub fn voxels(&self) -> &[usize] {
        &self.voxels
    }

    pub fn feature_for_voxel(&self, voxel: usize) -> Option<usize> {
        self.feature_of.get(&voxel).copied()
    }

    pub fn value(&self, sample: usize, feature: usize) -> f64 {
        self.values[sample * self.voxels.len() + feature]
    }

    pub fn view(&self, features: Vec<usize>) -> DatasetView<'_> {
        DatasetView {
            dataset: self,
            features,
        }
    }
}

/// A dataset restricted to some of its features.
#[derive(Debug, Clone)]
pub struct DatasetView<'a> {
    dataset: &'a Dataset,
    features: Vec<usize>,
}

impl<'a> DatasetView<'a> {
    pub fn nsamples(&self) -> usize {
        self.dataset.nsamples
    }

    pub fn nfeatures(&self) -> usize {
        self.features.len()
    }

    pub fn value(&self, sample: usize, feature: usize) -> f64 {
        self.dataset.value(sample, self.features[feature])
    }

    pub fn sample(&self, sample: usize) -> Vec<f64> {
        self.features
            .iter()
            .map(|&f| self.dataset.value(sample, f))
            .collect()
    }

    pub fn feature(&self, feature: usize) -> Vec<f64> {
        let column = self.features[feature];
        (0..self.dataset.nsamples)
            .map(|s| self.dataset.value(s, column))
            .collect()
    }

    pub fn voxel_indices(&self) -> Vec<usize> {
        self.features
            .iter()
            .map(|&f| self.dataset.voxels[f])
            .collect()
    }
}

/// Something computed from the features of one searchlight.
pub trait Measure: Sync {
    fn measure(&self, view: &DatasetView<'_>) -> Result<Vec<f64>, String>;
}

impl<F> Measure for F
where
    F: Fn(&DatasetView<'_>) -> Result<Vec<f64>, String> + Sync,
{
    fn measure(&self, view: &DatasetView<'_>) -> Result<Vec<f64>, String> {
        self(view)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchlightResult {
    pub centers: Vec<usize>,
    pub values: Vec<Vec<f64>>,
}

/// Centre node → voxels, as produced by voxel selection.
#[derive(Debug, Clone)]
pub struct Neighborhood {
    grid: GridGeometry,
    keys: Vec<usize>,
    voxels: BTreeMap<usize, Vec<usize>>,
}

impl Neighborhood {
    pub fn from_selection(selection: &SparseAttributes, label: &str) -> Result<Self, SurfingError> {
        let grid: GridGeometry = selection.metadata_as(GEOMETRY_METADATA)?;
        let mapping = selection.attribute_mapping(label)?;
        let mut voxels = BTreeMap::new();
        for (center, values) in mapping {
            let ids = values.as_int().ok_or_else(|| AttributeError::TypeMismatch {
                label: label.to_string(),
                expected: AttributeType::Int,
                actual: values.data_type(),
            })?;
            let ids = ids
                .iter()
                .map(|&v| {
                    usize::try_from(v)
                        .ok()
                        .filter(|&v| grid.contains_lin(v as i64))
                        .ok_or_else(|| {
                            AttributeError::Corrupt(format!("voxel {v} outside the grid"))
                        })
                })
                .collect::<Result<Vec<usize>, _>>()?;
            voxels.insert(center, ids);
        }
        Ok(Self {
            grid,
            keys: selection.keys().to_vec(),
            voxels,
        })
    }

    pub fn grid(&self) -> &GridGeometry {
        &self.grid
    }

    pub fn keys(&self) -> &[usize] {
        &self.keys
    }

    pub fn voxels(&self, center: usize) -> Option<&[usize]> {
        self.voxels.get(&center).map(Vec::as_slice)
    }

    /// Grid voxels covered by at least one searchlight.
    pub fn mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.grid.nvoxels()];
        for voxels in self.voxels.values() {
            for &v in voxels {
                mask[v] = true;
            }
        }
        mask
    }

    /// Runs `measure` on each centre's voxels (all centres when `centers` is
    /// `None`). Voxels missing from the dataset are left out of the view.
    pub fn searchlight(
        &self,
        dataset: &Dataset,
        measure: &impl Measure,
        centers: Option<&[usize]>,
    ) -> Result<SearchlightResult, SurfingError> {
        let centers = centers.unwrap_or(&self.keys);
        let values = parallel::try_map_heavy(centers, |&center| {
            let voxels = self
                .voxels(center)
                .ok_or(SurfingError::UnknownCenter(center))?;
            let features = voxels
                .iter()
                .filter_map(|&v| dataset.feature_for_voxel(v))
                .collect();
            measure
                .measure(&dataset.view(features))
                .map_err(|message| SurfingError::Measure { center, message })
        })?;
        debug!(centers = centers.len(), "searchlight done");
        Ok(SearchlightResult {
            centers: centers.to_vec(),
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{DISTANCE_LABEL, POSITION_LABEL, VOXEL_LABEL};
    use crate::sparse_attributes::AttributeColumn;

    fn grid() -> GridGeometry {
        GridGeometry::isotropic(&[4, 4, 4], 2.0, [0.0; 3]).expect("grid")
    }

    fn selection() -> SparseAttributes {
        let mut sel =
            SparseAttributes::new([VOXEL_LABEL, DISTANCE_LABEL, POSITION_LABEL]).expect("new");
        for (center, voxels) in [(5usize, vec![0i64, 1, 2]), (2, vec![2, 63]), (7, vec![])] {
            let n = voxels.len();
            sel.add(
                center,
                [
                    (VOXEL_LABEL, AttributeColumn::Int(voxels)),
                    (DISTANCE_LABEL, AttributeColumn::Float(vec![0.0; n])),
                    (POSITION_LABEL, AttributeColumn::Float(vec![0.5; n])),
                ],
            )
            .expect("add");
        }
        sel.add_metadata(GEOMETRY_METADATA, serde_json::to_value(grid()).expect("json"))
            .expect("metadata");
        sel
    }

    fn dataset() -> Dataset {
        let grid = grid();
        let first = VolumeImage::new(grid.clone(), (0..64).map(|v| v as f32).collect()).expect("image");
        let second = VolumeImage::new(grid.clone(), (0..64).map(|v| -(v as f32)).collect()).expect("image");
        Dataset::from_volumes(&grid, &[first, second], None).expect("dataset")
    }

    #[test]
    fn neighborhood_from_selection() {
        let nbhood = Neighborhood::from_selection(&selection(), VOXEL_LABEL).expect("nbhood");
        assert_eq!(nbhood.keys(), &[5, 2, 7]);
        assert_eq!(nbhood.voxels(2), Some(&[2, 63][..]));
        assert_eq!(nbhood.voxels(7), Some(&[][..]));
        assert_eq!(nbhood.voxels(9), None);
        let mask = nbhood.mask();
        assert_eq!(mask.iter().filter(|&&m| m).count(), 4);
        assert!(mask[63]);
        assert!(matches!(
            Neighborhood::from_selection(&selection(), DISTANCE_LABEL),
            Err(SurfingError::Attribute(AttributeError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn views_expose_features_and_samples() {
        let ds = dataset();
        assert_eq!(ds.nsamples(), 2);
        assert_eq!(ds.nfeatures(), 64);
        let view = ds.view(vec![3, 10]);
        assert_eq!(view.nfeatures(), 2);
        assert_eq!(view.sample(0), vec![3.0, 10.0]);
        assert_eq!(view.sample(1), vec![-3.0, -10.0]);
        assert_eq!(view.feature(1), vec![10.0, -10.0]);
        assert_eq!(view.voxel_indices(), vec![3, 10]);
    }

    #[test]
    fn searchlight_runs_measure_per_center() {
        let nbhood = Neighborhood::from_selection(&selection(), VOXEL_LABEL).expect("nbhood");
        let ds = dataset();
        let count = |view: &DatasetView<'_>| -> Result<Vec<f64>, String> {
            let total: f64 = (0..view.nfeatures()).map(|f| view.value(0, f)).sum();
            Ok(vec![view.nfeatures() as f64, total])
        };
        let result = nbhood.searchlight(&ds, &count, None).expect("searchlight");
        assert_eq!(result.centers, vec![5, 2, 7]);
        assert_eq!(result.values, vec![vec![3.0, 3.0], vec![2.0, 65.0], vec![0.0, 0.0]]);

        let subset = nbhood.searchlight(&ds, &count, Some(&[7, 5][..])).expect("searchlight");
        assert_eq!(subset.values, vec![vec![0.0, 0.0], vec![3.0, 3.0]]);
    }

    #[test]
    fn masked_dataset_drops_missing_voxels() {
        let nbhood = Neighborhood::from_selection(&selection(), VOXEL_LABEL).expect("nbhood");
        let grid = grid();
        let image = VolumeImage::new(grid.clone(), vec![1.0; 64]).expect("image");
        let mut mask = vec![false; 64];
        mask[1] = true;
        mask[63] = true;
        let ds = Dataset::from_volumes(&grid, &[image], Some(mask.as_slice())).expect("dataset");
        assert_eq!(ds.voxels(), &[1, 63]);
        let count =
            |view: &DatasetView<'_>| -> Result<Vec<f64>, String> { Ok(vec![view.nfeatures() as f64]) };
        let result = nbhood.searchlight(&ds, &count, None).expect("searchlight");
        assert_eq!(result.values, vec![vec![1.0], vec![1.0], vec![0.0]]);
    }

    #[test]
    fn reports_unknown_centers_and_failures() {
        let nbhood = Neighborhood::from_selection(&selection(), VOXEL_LABEL).expect("nbhood");
        let ds = dataset();
        let ok = |_: &DatasetView<'_>| -> Result<Vec<f64>, String> { Ok(vec![]) };
        assert!(matches!(
            nbhood.searchlight(&ds, &ok, Some(&[5, 11][..])),
            Err(SurfingError::UnknownCenter(11))
        ));
        let failing = |view: &DatasetView<'_>| -> Result<Vec<f64>, String> {
            if view.nfeatures() == 2 {
                Err("too few features".to_string())
            } else {
                Ok(vec![1.0])
            }
        };
        assert!(matches!(
            nbhood.searchlight(&ds, &failing, None),
            Err(SurfingError::Measure { center: 2, .. })
        ));
    }

    #[test]
    fn rejects_mismatched_inputs() {
        let grid = grid();
        let other = GridGeometry::isotropic(&[4, 4, 4], 3.0, [0.0; 3]).expect("grid");
        let image = VolumeImage::empty(other);
        assert!(Dataset::from_volumes(&grid, &[image], None).is_err());
        assert!(Dataset::from_volumes(&grid, &[], Some(&[true; 3][..])).is_err());
        assert!(Dataset::new(vec![vec![1.0]], vec![4, 4]).is_err());
    }
}
