use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use surfing_geometry::{freesurfer, DistanceField, MeshError, SurfaceMesh};
use tracing::{debug, warn};

use crate::config::{SamplingParams, SelectionConfig};
use crate::correspondence::{NodeVoxelMap, VolSurf};
use crate::error::SurfingError;
use crate::parallel;
use crate::sparse_attributes::{AttributeColumn, AttributeError, SparseAttributes};
use crate::volume;

pub const VOXEL_LABEL: &str = "lin_vox_idxs";
pub const DISTANCE_LABEL: &str = "center_distances";
pub const POSITION_LABEL: &str = "grey_matter_position";
pub const GEOMETRY_METADATA: &str = "volgeom";

/// How distances between surface nodes are measured.
pub trait NodeDistance {
    fn distance_field(
        &self,
        mesh: &SurfaceMesh,
        src: usize,
        max_distance: f64,
    ) -> Result<DistanceField, MeshError>;

    fn distances(
        &self,
        mesh: &SurfaceMesh,
        src: usize,
        max_distance: f64,
    ) -> Result<BTreeMap<usize, f64>, MeshError> {
        Ok(self.distance_field(mesh, src, max_distance)?.distances)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Shortest path along mesh edges.
    #[default]
    #[serde(alias = "d")]
    Dijkstra,
    #[serde(alias = "e", alias = "euclidian")]
    Euclidean,
}

impl NodeDistance for DistanceMetric {
    fn distance_field(
        &self,
        mesh: &SurfaceMesh,
        src: usize,
        max_distance: f64,
    ) -> Result<DistanceField, MeshError> {
        match self {
            DistanceMetric::Dijkstra => mesh.dijkstra_field(src, max_distance),
            DistanceMetric::Euclidean => mesh.euclidean_field(src, max_distance),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = SurfingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "d" | "dijkstra" => Ok(DistanceMetric::Dijkstra),
            "e" | "euclidean" | "euclidian" => Ok(DistanceMetric::Euclidean),
            other => Err(SurfingError::Config(format!("unknown distance metric {other:?}"))),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Dijkstra => f.write_str("dijkstra"),
            DistanceMetric::Euclidean => f.write_str("euclidean"),
        }
    }
}

/// Size of each searchlight disc.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Radius {
    /// Everything within this metric distance of the centre.
    Distance(f64),
    /// The given number of voxels closest to the centre.
    VoxelCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedVoxel {
    pub voxel: usize,
    pub distance: f64,
    /// Sampled inner→outer fraction at which the nearest node hit the voxel.
    pub position: f64,
}

/// Picks the voxels around one centre node.
#[derive(Debug)]
pub struct VoxelSelector<'a, M = DistanceMetric> {
    radius: Radius,
    surface: &'a SurfaceMesh,
    n2v: &'a NodeVoxelMap,
    metric: M,
}

impl<'a, M: NodeDistance> VoxelSelector<'a, M> {
    pub fn new(
        radius: Radius,
        surface: &'a SurfaceMesh,
        n2v: &'a NodeVoxelMap,
        metric: M,
    ) -> Result<Self, SurfingError> {
        if surface.nvertices() != n2v.nnodes() {
            return Err(SurfingError::TopologyMismatch(format!(
                "surface has {} nodes, voxel mapping has {}",
                surface.nvertices(),
                n2v.nnodes()
            )));
        }
        Ok(Self {
            radius,
            surface,
            n2v,
            metric,
        })
    }

    /// Voxels of the disc around `src`, sorted by distance then voxel index.
    /// A voxel reached through several nodes keeps its smallest distance.
    pub fn disc_voxel_attributes(&self, src: usize) -> Result<Vec<SelectedVoxel>, SurfingError> {
        if src >= self.surface.nvertices() {
            return Err(SurfingError::NodeOutOfRange {
                node: src,
                nvertices: self.surface.nvertices(),
            });
        }

        match self.radius {
            Radius::Distance(radius) => {
                let field = self
                    .metric
                    .distance_field(self.surface, src, radius.max(0.0))?;
                Ok(sorted(self.gather(&field.distances)))
            }
            Radius::VoxelCount(count) => {
                let mut radius = 0.5 + 1.5 * (count as f64).sqrt();
                loop {
                    let field = self.metric.distance_field(self.surface, src, radius)?;
                    let gathered = self.gather(&field.distances);
                    if gathered.len() >= count || field.complete {
                        let mut voxels = sorted(gathered);
                        voxels.truncate(count);
                        return Ok(voxels);
                    }
                    radius *= 1.5;
                }
            }
        }
    }

    fn gather(&self, distances: &BTreeMap<usize, f64>) -> BTreeMap<usize, (f64, f64)> {
        let mut voxels: BTreeMap<usize, (f64, f64)> = BTreeMap::new();
        for (&node, &distance) in distances {
            let Some(node_voxels) = self.n2v.get(node) else {
                continue;
            };
            for (&voxel, &position) in node_voxels {
                match voxels.get(&voxel) {
                    Some(&(best, _)) if best <= distance => {}
                    _ => {
                        voxels.insert(voxel, (distance, position));
                    }
                }
            }
        }
        voxels
    }
}

fn sorted(voxels: BTreeMap<usize, (f64, f64)>) -> Vec<SelectedVoxel> {
    let mut list: Vec<SelectedVoxel> = voxels
        .into_iter()
        .map(|(voxel, (distance, position))| SelectedVoxel {
            voxel,
            distance,
            position,
        })
        .collect();
    list.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.voxel.cmp(&b.voxel))
    });
    list
}

fn validate_radius(radius: Radius) -> Result<(), SurfingError> {
    SelectionConfig {
        radius,
        ..SelectionConfig::default()
    }
    .validate()
}

/// Disc selections for every centre (all nodes when `centers` is `None`),
/// keyed by centre node, with the grid stored as `volgeom` metadata.
pub fn voxel_selection(
    volsurf: &VolSurf,
    radius: Radius,
    centers: Option<&[usize]>,
    metric: DistanceMetric,
    sampling: &SamplingParams,
) -> Result<SparseAttributes, SurfingError> {
    validate_radius(radius)?;
    let n2v = volsurf.node_to_voxels(sampling)?;
    let surface = volsurf.intermediate_surface()?;

    let all: Vec<usize>;
    let centers = match centers {
        Some(centers) => centers,
        None => {
            all = (0..surface.nvertices()).collect();
            all.as_slice()
        }
    };
    if let Some(&node) = centers.iter().find(|&&c| c >= surface.nvertices()) {
        return Err(SurfingError::NodeOutOfRange {
            node,
            nvertices: surface.nvertices(),
        });
    }

    let selector = VoxelSelector::new(radius, &surface, &n2v, metric)?;
    let discs = parallel::try_map_heavy(centers, |&center| selector.disc_voxel_attributes(center))?;

    let mut selection = SparseAttributes::new([VOXEL_LABEL, DISTANCE_LABEL, POSITION_LABEL])?;
    let mut total = 0;
    for (&center, disc) in centers.iter().zip(discs) {
        if disc.is_empty() {
            warn!(center, "center selects no voxels");
        }
        total += disc.len();
        let voxels = disc.iter().map(|v| v.voxel as i64).collect();
        let distances = disc.iter().map(|v| v.distance).collect();
        let positions = disc.iter().map(|v| v.position).collect();
        selection.add(
            center,
            [
                (VOXEL_LABEL, AttributeColumn::Int(voxels)),
                (DISTANCE_LABEL, AttributeColumn::Float(distances)),
                (POSITION_LABEL, AttributeColumn::Float(positions)),
            ],
        )?;
    }
    selection.add_metadata(GEOMETRY_METADATA, serde_json::to_value(volsurf.grid())?)?;

    debug!(
        centers = centers.len(),
        %metric,
        ?radius,
        voxels = total,
        "voxel selection done"
    );
    Ok(selection)
}

pub fn voxel_selection_with(
    volsurf: &VolSurf,
    config: &SelectionConfig,
) -> Result<SparseAttributes, SurfingError> {
    config.validate()?;
    voxel_selection(
        volsurf,
        config.radius,
        config.centers.as_deref(),
        config.metric,
        &config.sampling,
    )
}

/// Loads the grid from a NIfTI file and both surfaces from FreeSurfer ASCII
/// files, then runs [`voxel_selection_with`].
pub fn run_voxel_selection(
    volume_path: impl AsRef<Path>,
    outer_path: impl AsRef<Path>,
    inner_path: impl AsRef<Path>,
    config: &SelectionConfig,
) -> Result<SparseAttributes, SurfingError> {
    let grid = volume::read_geometry(volume_path)?;
    let outer = freesurfer::read(outer_path)?;
    let inner = freesurfer::read(inner_path)?;
    let volsurf = VolSurf::new(grid, outer, inner)?;
    voxel_selection_with(&volsurf, config)
}

/// For every selected voxel, the centre it is closest to. Ties go to the
/// lowest centre id.
pub fn voxel_to_nearest_center(
    selection: &SparseAttributes,
) -> Result<BTreeMap<usize, usize>, SurfingError> {
    let mut centers: Vec<usize> = selection.keys().to_vec();
    centers.sort_unstable();

    let mut nearest: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for center in centers {
        let voxels = selection
            .get(center, VOXEL_LABEL)
            .ok_or_else(|| AttributeError::UnknownLabel(VOXEL_LABEL.to_string()))?;
        let distances = selection
            .get(center, DISTANCE_LABEL)
            .ok_or_else(|| AttributeError::UnknownLabel(DISTANCE_LABEL.to_string()))?;
        let (Some(voxels), Some(distances)) = (voxels.as_int(), distances.as_float()) else {
            return Err(AttributeError::Corrupt(format!(
                "{VOXEL_LABEL} must be int and {DISTANCE_LABEL} float"
            ))
            .into());
        };
        for (&voxel, &distance) in voxels.iter().zip(distances) {
            let voxel = usize::try_from(voxel)
                .map_err(|_| AttributeError::Corrupt(format!("negative voxel index {voxel}")))?;
            match nearest.get(&voxel) {
                Some(&(best, _)) if best <= distance => {}
                _ => {
                    nearest.insert(voxel, (distance, center));
                }
            }
        }
    }
    Ok(nearest
        .into_iter()
        .map(|(voxel, (_, center))| (voxel, center))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DMat4;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::OnceLock;
    use surfing_geometry::{generate_sphere, GridGeometry};

    fn grid() -> GridGeometry {
        GridGeometry::new(&[50, 50, 50], DMat4::IDENTITY).expect("grid")
    }

    fn reference() -> &'static VolSurf {
        static VOLSURF: OnceLock<VolSurf> = OnceLock::new();
        VOLSURF.get_or_init(|| {
            let sphere = generate_sphere(20);
            let outer = &sphere * 25.0 + 15.0;
            let inner = &sphere * 20.0 + 15.0;
            VolSurf::new(grid(), outer, inner).expect("volsurf")
        })
    }

    fn selected_voxels(selection: &SparseAttributes) -> BTreeSet<i64> {
        selection
            .keys()
            .iter()
            .flat_map(|&c| {
                selection
                    .get(c, VOXEL_LABEL)
                    .and_then(|v| v.as_int())
                    .unwrap_or(&[])
                    .to_vec()
            })
            .collect()
    }

    #[test]
    fn parses_metric_names() {
        for name in ["d", "dijkstra", "Dijkstra"] {
            assert_eq!(name.parse::<DistanceMetric>().unwrap(), DistanceMetric::Dijkstra);
        }
        for name in ["e", "euclidean", "euclidian"] {
            assert_eq!(name.parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        }
        assert!(matches!(
            "manhattan".parse::<DistanceMetric>(),
            Err(SurfingError::Config(_))
        ));
        let metric: DistanceMetric = serde_json::from_str("\"euclidian\"").unwrap();
        assert_eq!(metric, DistanceMetric::Euclidean);
    }

    #[test]
    fn reference_union_sizes() {
        let vs = reference();
        let nv = vs.nvertices();
        assert_eq!(nv, 402);
        let cases = [
            (DistanceMetric::Dijkstra, 1.0, 10, 58),
            (DistanceMetric::Dijkstra, 1.0, 50, 198),
            (DistanceMetric::Dijkstra, 1.0, 100, 393),
            (DistanceMetric::Dijkstra, 2.0, 100, 449),
            (DistanceMetric::Euclidean, 2.0, 100, 449),
        ];
        for (metric, radius, ncenters, expected) in cases {
            let centers: Vec<usize> = (0..nv).step_by(nv / ncenters).collect();
            let selection = voxel_selection(
                vs,
                Radius::Distance(radius),
                Some(centers.as_slice()),
                metric,
                &SamplingParams::default(),
            )
            .expect("selection");
            assert_eq!(selection.len(), centers.len());
            assert_eq!(
                selected_voxels(&selection).len(),
                expected,
                "{metric} r={radius} n={ncenters}"
            );
        }
    }

    #[test]
    fn small_voxel_count_covers_band() {
        let vs = reference();
        let selection = voxel_selection(
            vs,
            Radius::VoxelCount(10),
            None,
            DistanceMetric::Dijkstra,
            &SamplingParams::default(),
        )
        .expect("selection");
        assert_eq!(selection.len(), 402);
        assert_eq!(selected_voxels(&selection).len(), 1509);
        for &center in selection.keys() {
            assert_eq!(selection.get(center, VOXEL_LABEL).expect("voxels").len(), 10);
        }
    }

    #[test]
    fn discs_are_sorted_and_deduplicated() {
        let vs = reference();
        let n2v = vs.node_to_voxels(&SamplingParams::default()).expect("n2v");
        let surface = vs.intermediate_surface().expect("surface");
        let selector =
            VoxelSelector::new(Radius::Distance(8.0), &surface, &n2v, DistanceMetric::Dijkstra)
                .expect("selector");
        let disc = selector.disc_voxel_attributes(123).expect("disc");
        assert!(!disc.is_empty());
        assert_eq!(disc[0].distance, 0.0);
        for pair in disc.windows(2) {
            assert!((pair[0].distance, pair[0].voxel) < (pair[1].distance, pair[1].voxel));
        }
        let unique: BTreeSet<usize> = disc.iter().map(|v| v.voxel).collect();
        assert_eq!(unique.len(), disc.len());
        assert!(disc.iter().all(|v| v.distance <= 8.0));
        assert!(disc.iter().all(|v| (0.0..=1.0).contains(&v.position)));
    }

    #[test]
    fn zero_radius_selects_center_voxels() {
        let vs = reference();
        let n2v = vs.node_to_voxels(&SamplingParams::default()).expect("n2v");
        let surface = vs.intermediate_surface().expect("surface");
        for radius in [0.0, -3.0] {
            for metric in [DistanceMetric::Dijkstra, DistanceMetric::Euclidean] {
                let selector = VoxelSelector::new(Radius::Distance(radius), &surface, &n2v, metric)
                    .expect("selector");
                let disc = selector.disc_voxel_attributes(300).expect("disc");
                let own: Vec<usize> = n2v.get(300).expect("node").keys().copied().collect();
                assert!(!own.is_empty());
                let got: Vec<usize> = disc.iter().map(|v| v.voxel).collect();
                assert_eq!(got, own);
                assert!(disc.iter().all(|v| v.distance == 0.0));
            }
        }
    }

    #[test]
    fn voxel_count_takes_nearest() {
        let vs = reference();
        let n2v = vs.node_to_voxels(&SamplingParams::default()).expect("n2v");
        let surface = vs.intermediate_surface().expect("surface");
        for metric in [DistanceMetric::Dijkstra, DistanceMetric::Euclidean] {
            let by_count = VoxelSelector::new(Radius::VoxelCount(40), &surface, &n2v, metric)
                .expect("selector")
                .disc_voxel_attributes(200)
                .expect("disc");
            let wide = VoxelSelector::new(Radius::Distance(30.0), &surface, &n2v, metric)
                .expect("selector")
                .disc_voxel_attributes(200)
                .expect("disc");
            assert_eq!(by_count.len(), 40);
            assert_eq!(by_count.as_slice(), &wide[..40]);
        }
    }

    #[test]
    fn voxel_count_stops_on_disconnected_surface() {
        let sphere = generate_sphere(6);
        let hemisphere = |radius: f64, x: f64| &sphere * radius + [x, 25.0, 25.0];
        let outer = SurfaceMesh::merge(&[hemisphere(5.0, 12.0), hemisphere(5.0, 38.0)]);
        let inner = SurfaceMesh::merge(&[hemisphere(3.0, 12.0), hemisphere(3.0, 38.0)]);
        let vs = VolSurf::new(grid(), outer, inner).expect("volsurf");
        let n2v = vs.node_to_voxels(&SamplingParams::default()).expect("n2v");
        let surface = vs.intermediate_surface().expect("surface");

        let reachable: BTreeSet<usize> = (0..sphere.nvertices())
            .flat_map(|node| n2v.get(node).expect("node").keys().copied())
            .collect();
        let disc = VoxelSelector::new(Radius::VoxelCount(100_000), &surface, &n2v, DistanceMetric::Dijkstra)
            .expect("selector")
            .disc_voxel_attributes(0)
            .expect("disc");
        let got: BTreeSet<usize> = disc.iter().map(|v| v.voxel).collect();
        assert_eq!(got, reachable);
    }

    #[test]
    fn euclidean_disc_contains_geodesic_disc() {
        let vs = reference();
        let centers = [5, 77, 301];
        let select = |metric| {
            voxel_selection(
                vs,
                Radius::Distance(6.0),
                Some(centers.as_slice()),
                metric,
                &SamplingParams::default(),
            )
            .expect("selection")
        };
        let dijkstra = select(DistanceMetric::Dijkstra);
        let euclidean = select(DistanceMetric::Euclidean);
        for center in centers {
            let d: BTreeSet<i64> = dijkstra.get(center, VOXEL_LABEL).unwrap().as_int().unwrap().iter().copied().collect();
            let e: BTreeSet<i64> = euclidean.get(center, VOXEL_LABEL).unwrap().as_int().unwrap().iter().copied().collect();
            assert!(d.is_subset(&e), "center {center}");
        }
    }

    #[test]
    fn empty_centers_give_empty_selection() {
        let vs = reference();
        let selection = voxel_selection(
            vs,
            Radius::Distance(5.0),
            Some(&[][..]),
            DistanceMetric::Dijkstra,
            &SamplingParams::default(),
        )
        .expect("selection");
        assert!(selection.is_empty());
        assert_eq!(selection.labels(), &[VOXEL_LABEL, DISTANCE_LABEL, POSITION_LABEL]);
        let geometry: GridGeometry = selection.metadata_as(GEOMETRY_METADATA).expect("volgeom");
        assert_eq!(&geometry, vs.grid());
    }

    #[test]
    fn rejects_bad_centers_and_radii() {
        let vs = reference();
        let sampling = SamplingParams::default();
        assert!(matches!(
            voxel_selection(vs, Radius::Distance(5.0), Some(&[3, 402][..]), DistanceMetric::Dijkstra, &sampling),
            Err(SurfingError::NodeOutOfRange { node: 402, .. })
        ));
        assert!(matches!(
            voxel_selection(vs, Radius::Distance(f64::INFINITY), Some(&[3][..]), DistanceMetric::Dijkstra, &sampling),
            Err(SurfingError::Config(_))
        ));
        assert!(matches!(
            voxel_selection(vs, Radius::Distance(5.0), Some(&[3, 3][..]), DistanceMetric::Dijkstra, &sampling),
            Err(SurfingError::Attribute(AttributeError::DuplicateKey(3)))
        ));
    }

    #[test]
    fn nearest_center_prefers_lowest_id_on_ties() {
        let mut selection =
            SparseAttributes::new([VOXEL_LABEL, DISTANCE_LABEL, POSITION_LABEL]).expect("new");
        let mut add = |center: usize, voxels: Vec<i64>, distances: Vec<f64>| {
            let positions = vec![0.5; voxels.len()];
            selection
                .add(
                    center,
                    [
                        (VOXEL_LABEL, AttributeColumn::Int(voxels)),
                        (DISTANCE_LABEL, AttributeColumn::Float(distances)),
                        (POSITION_LABEL, AttributeColumn::Float(positions)),
                    ],
                )
                .expect("add");
        };
        add(9, vec![1, 2, 3], vec![0.0, 1.0, 2.0]);
        add(4, vec![3, 2, 7], vec![0.0, 1.0, 3.0]);
        add(6, vec![7], vec![0.5]);
        let nearest = voxel_to_nearest_center(&selection).expect("nearest");
        assert_eq!(
            nearest,
            BTreeMap::from([(1, 9), (2, 4), (3, 4), (7, 6)])
        );
    }

    #[test]
    fn nearest_center_rejects_negative_voxels() {
        let mut selection =
            SparseAttributes::new([VOXEL_LABEL, DISTANCE_LABEL]).expect("new");
        selection
            .add(
                0,
                [
                    (VOXEL_LABEL, AttributeColumn::Int(vec![5, -1])),
                    (DISTANCE_LABEL, AttributeColumn::Float(vec![0.0, 1.0])),
                ],
            )
            .expect("add");
        assert!(matches!(
            voxel_to_nearest_center(&selection),
            Err(SurfingError::Attribute(AttributeError::Corrupt(_)))
        ));
    }

    #[test]
    fn nearest_center_covers_every_selected_voxel() {
        let vs = reference();
        let centers: Vec<usize> = (0..402).step_by(20).collect();
        let selection = voxel_selection(
            vs,
            Radius::Distance(4.0),
            Some(centers.as_slice()),
            DistanceMetric::Dijkstra,
            &SamplingParams::default(),
        )
        .expect("selection");
        let nearest = voxel_to_nearest_center(&selection).expect("nearest");
        let voxels: BTreeSet<usize> = selected_voxels(&selection).into_iter().map(|v| v as usize).collect();
        assert_eq!(nearest.keys().copied().collect::<BTreeSet<_>>(), voxels);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn growing_radius_never_drops_voxels(
            center in 0usize..402,
            r1 in 0.0f64..12.0,
            extra in 0.0f64..12.0,
            euclidean in any::<bool>(),
        ) {
            let vs = reference();
            let metric = if euclidean { DistanceMetric::Euclidean } else { DistanceMetric::Dijkstra };
            let n2v = vs.node_to_voxels(&SamplingParams::default()).unwrap();
            let surface = vs.intermediate_surface().unwrap();
            let disc = |r: f64| -> BTreeSet<usize> {
                VoxelSelector::new(Radius::Distance(r), &surface, &n2v, metric)
                    .unwrap()
                    .disc_voxel_attributes(center)
                    .unwrap()
                    .into_iter()
                    .map(|v| v.voxel)
                    .collect()
            };
            let small = disc(r1);
            let large = disc(r1 + extra);
            prop_assert!(small.is_subset(&large));
        }
    }
}
