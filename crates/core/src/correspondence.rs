use std::collections::{BTreeMap, BTreeSet};

use surfing_geometry::{GridGeometry, SurfaceMesh};
use tracing::debug;

use crate::config::SamplingParams;
use crate::error::SurfingError;
use crate::parallel;
use crate::volume::VolumeImage;

/// A volume grid together with the inner (white matter) and outer (pial)
/// surfaces bounding the grey matter band.
#[derive(Debug, Clone)]
pub struct VolSurf {
    grid: GridGeometry,
    outer: SurfaceMesh,
    inner: SurfaceMesh,
}

impl VolSurf {
    pub fn new(grid: GridGeometry, outer: SurfaceMesh, inner: SurfaceMesh) -> Result<Self, SurfingError> {
        if !outer.same_topology(&inner) {
            return Err(SurfingError::TopologyMismatch(format!(
                "outer has {} nodes / {} faces, inner has {} nodes / {} faces",
                outer.nvertices(),
                outer.nfaces(),
                inner.nvertices(),
                inner.nfaces()
            )));
        }
        Ok(Self { grid, outer, inner })
    }

    pub fn grid(&self) -> &GridGeometry {
        &self.grid
    }

    pub fn outer(&self) -> &SurfaceMesh {
        &self.outer
    }

    pub fn inner(&self) -> &SurfaceMesh {
        &self.inner
    }

    pub fn nvertices(&self) -> usize {
        self.outer.nvertices()
    }

    /// Node-wise midpoint of the inner and outer surfaces.
    pub fn intermediate_surface(&self) -> Result<SurfaceMesh, SurfingError> {
        Ok(self.inner.lerp(&self.outer, 0.5)?)
    }

    /// Voxels hit by sampling each node's inner→outer segment.
    pub fn node_to_voxels(&self, params: &SamplingParams) -> Result<NodeVoxelMap, SurfingError> {
        params.validate()?;
        let fractions = params.fractions();
        let inner = self.inner.vertices();
        let outer = self.outer.vertices();

        let nodes = parallel::map_indexed(self.nvertices(), |node| {
            let a = inner[node];
            let b = outer[node];
            let mut voxels = BTreeMap::new();
            for &p in &fractions {
                let q = 1.0 - p;
                let point = [
                    q * a[0] + p * b[0],
                    q * a[1] + p * b[1],
                    q * a[2] + p * b[2],
                ];
                if let Some(lin) = self.grid.xyz_to_lin(point) {
                    voxels.entry(lin).or_insert(p);
                }
            }
            voxels
        });

        let map = NodeVoxelMap { nodes };
        debug!(
            nodes = map.nnodes(),
            steps = params.steps,
            selected = map.selection_count(),
            "mapped nodes to voxels"
        );
        Ok(map)
    }

    /// Per voxel, how many nodes claim it.
    pub fn voxel_count_image(&self, map: &NodeVoxelMap) -> Result<VolumeImage, SurfingError> {
        let spatial = GridGeometry::new(&self.grid.shape(), self.grid.affine())?;
        let mut counts = vec![0.0f32; spatial.nvoxels()];
        for (_, voxels) in map.iter() {
            for &lin in voxels.keys() {
                let nvoxels = counts.len();
                let count = counts
                    .get_mut(lin)
                    .ok_or(SurfingError::VoxelOutOfRange { voxel: lin, nvoxels })?;
                *count += 1.0;
            }
        }
        VolumeImage::new(spatial, counts)
    }
}

/// For each node, the voxels it samples, each with the smallest sampled
/// fraction (0 = inner surface) that landed in it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeVoxelMap {
    nodes: Vec<BTreeMap<usize, f64>>,
}

impl NodeVoxelMap {
    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, node: usize) -> Option<&BTreeMap<usize, f64>> {
        self.nodes.get(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BTreeMap<usize, f64>)> {
        self.nodes.iter().enumerate()
    }

    /// Sum over nodes of the number of voxels each node selects.
    pub fn selection_count(&self) -> usize {
        self.nodes.iter().map(BTreeMap::len).sum()
    }

    pub fn voxels(&self) -> BTreeSet<usize> {
        self.nodes
            .iter()
            .flat_map(|voxels| voxels.keys().copied())
            .collect()
    }
}
