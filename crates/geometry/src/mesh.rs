use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::ops::{Add, Mul};
use std::sync::OnceLock;

use glam::{DMat4, DVec3, EulerRot};

use crate::error::MeshError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleUnit {
    Degrees,
    Radians,
}

/// Nodes reached from a source within some maximum distance.
///
/// `complete` is true when no path was cut off by the maximum, i.e. every
/// node reachable from the source is present.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceField {
    pub distances: BTreeMap<usize, f64>,
    pub complete: bool,
}

/// Triangulated surface. Vertices and faces are fixed at construction;
/// transforms return new meshes that share the face list.
#[derive(Debug)]
pub struct SurfaceMesh {
    vertices: Vec<[f64; 3]>,
    faces: Vec<[usize; 3]>,
    neighbors: OnceLock<Vec<Vec<(usize, f64)>>>,
    node_faces: OnceLock<Vec<Vec<usize>>>,
}

impl Clone for SurfaceMesh {
    fn clone(&self) -> Self {
        Self::from_parts(self.vertices.clone(), self.faces.clone())
    }
}

impl PartialEq for SurfaceMesh {
    fn eq(&self, other: &Self) -> bool {
        self.vertices == other.vertices && self.faces == other.faces
    }
}

impl SurfaceMesh {
    pub fn new(vertices: Vec<[f64; 3]>, faces: Vec<[usize; 3]>) -> Result<Self, MeshError> {
        if let Some(node) = vertices
            .iter()
            .position(|v| !v.iter().all(|c| c.is_finite()))
        {
            return Err(MeshError::NonFiniteVertex(node));
        }
        let nvertices = vertices.len();
        for (face, tri) in faces.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i >= nvertices) {
                return Err(MeshError::FaceIndexOutOfRange {
                    face,
                    index,
                    nvertices,
                });
            }
        }
        Ok(Self::from_parts(vertices, faces))
    }

    pub(crate) fn from_parts(vertices: Vec<[f64; 3]>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            neighbors: OnceLock::new(),
            node_faces: OnceLock::new(),
        }
    }

    fn with_vertices(&self, vertices: Vec<[f64; 3]>) -> Self {
        Self::from_parts(vertices, self.faces.clone())
    }

    pub fn nvertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn nfaces(&self) -> usize {
        self.faces.len()
    }

    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    pub fn vertex(&self, node: usize) -> Result<[f64; 3], MeshError> {
        self.check_node(node)?;
        Ok(self.vertices[node])
    }

    pub fn same_topology(&self, other: &SurfaceMesh) -> bool {
        self.nvertices() == other.nvertices() && self.faces == other.faces
    }

    fn check_node(&self, node: usize) -> Result<(), MeshError> {
        if node < self.vertices.len() {
            Ok(())
        } else {
            Err(MeshError::NodeOutOfRange {
                node,
                nvertices: self.vertices.len(),
            })
        }
    }

    /// Per node, its edge neighbours sorted by index, with edge lengths.
    pub fn neighbors(&self) -> &[Vec<(usize, f64)>] {
        self.neighbors.get_or_init(|| {
            let mut adjacency = vec![Vec::new(); self.vertices.len()];
            for &[a, b, c] in &self.faces {
                for (p, q) in [(a, b), (b, c), (c, a)] {
                    if p != q {
                        adjacency[p].push(q);
                        adjacency[q].push(p);
                    }
                }
            }
            adjacency
                .into_iter()
                .enumerate()
                .map(|(node, mut nbrs)| {
                    nbrs.sort_unstable();
                    nbrs.dedup();
                    let origin = DVec3::from(self.vertices[node]);
                    nbrs.into_iter()
                        .map(|n| (n, origin.distance(DVec3::from(self.vertices[n]))))
                        .collect()
                })
                .collect()
        })
    }

    /// Edge length between two nodes, `None` when they share no face edge.
    pub fn neighbor_distance(&self, a: usize, b: usize) -> Option<f64> {
        let nbrs = self.neighbors().get(a)?;
        nbrs.binary_search_by(|&(n, _)| n.cmp(&b))
            .ok()
            .map(|slot| nbrs[slot].1)
    }

    /// Per node, the indices of the faces it belongs to, ascending.
    pub fn node_to_faces(&self) -> &[Vec<usize>] {
        self.node_faces.get_or_init(|| {
            let mut map = vec![Vec::new(); self.vertices.len()];
            for (face, tri) in self.faces.iter().enumerate() {
                for (corner, &node) in tri.iter().enumerate() {
                    if !tri[..corner].contains(&node) {
                        map[node].push(face);
                    }
                }
            }
            map
        })
    }

    pub fn dijkstra_distance(
        &self,
        src: usize,
        max_distance: f64,
    ) -> Result<BTreeMap<usize, f64>, MeshError> {
        Ok(self.dijkstra_field(src, max_distance)?.distances)
    }

    /// Shortest path lengths along mesh edges from `src`, keeping nodes at
    /// most `max_distance` away. Unreachable nodes are absent.
    pub fn dijkstra_field(&self, src: usize, max_distance: f64) -> Result<DistanceField, MeshError> {
        self.check_node(src)?;
        let neighbors = self.neighbors();
        let mut best = vec![f64::INFINITY; self.vertices.len()];
        let mut done = vec![false; self.vertices.len()];
        let mut distances = BTreeMap::new();
        let mut complete = true;
        let mut heap = BinaryHeap::new();

        best[src] = 0.0;
        heap.push(Reverse((Distance(0.0), src)));
        while let Some(Reverse((Distance(d), node))) = heap.pop() {
            if done[node] {
                continue;
            }
            done[node] = true;
            distances.insert(node, d);

            for &(nbr, length) in &neighbors[node] {
                if done[nbr] {
                    continue;
                }
                let candidate = d + length;
                if candidate > max_distance {
                    complete = false;
                    continue;
                }
                if candidate < best[nbr] {
                    best[nbr] = candidate;
                    heap.push(Reverse((Distance(candidate), nbr)));
                }
            }
        }

        Ok(DistanceField {
            distances,
            complete,
        })
    }

    pub fn euclidean_distance(
        &self,
        src: usize,
        max_distance: f64,
    ) -> Result<BTreeMap<usize, f64>, MeshError> {
        Ok(self.euclidean_field(src, max_distance)?.distances)
    }

    /// Straight-line distances from `src` to every node within `max_distance`.
    pub fn euclidean_field(
        &self,
        src: usize,
        max_distance: f64,
    ) -> Result<DistanceField, MeshError> {
        self.check_node(src)?;
        let origin = DVec3::from(self.vertices[src]);
        let distances: BTreeMap<usize, f64> = self
            .vertices
            .iter()
            .enumerate()
            .map(|(node, v)| (node, origin.distance(DVec3::from(*v))))
            .filter(|&(_, d)| d <= max_distance)
            .collect();
        let complete = distances.len() == self.vertices.len();
        Ok(DistanceField {
            distances,
            complete,
        })
    }

    pub fn transformed(&self, matrix: DMat4) -> SurfaceMesh {
        self.with_vertices(
            self.vertices
                .iter()
                .map(|v| matrix.transform_point3(DVec3::from(*v)).to_array())
                .collect(),
        )
    }

    pub fn scaled(&self, factor: f64) -> SurfaceMesh {
        self.scaled_xyz([factor; 3])
    }

    pub fn scaled_xyz(&self, factors: [f64; 3]) -> SurfaceMesh {
        self.transformed(DMat4::from_scale(DVec3::from(factors)))
    }

    pub fn translated(&self, offset: [f64; 3]) -> SurfaceMesh {
        self.transformed(DMat4::from_translation(DVec3::from(offset)))
    }

    /// Rotates about the origin by XYZ Euler angles.
    pub fn rotated(&self, angles: [f64; 3], unit: AngleUnit) -> SurfaceMesh {
        let [a, b, c] = match unit {
            AngleUnit::Degrees => angles.map(f64::to_radians),
            AngleUnit::Radians => angles,
        };
        self.transformed(DMat4::from_euler(EulerRot::XYZ, a, b, c))
    }

    /// Node-wise `(1 - t) * self + t * other`.
    pub fn lerp(&self, other: &SurfaceMesh, t: f64) -> Result<SurfaceMesh, MeshError> {
        if !self.same_topology(other) {
            return Err(MeshError::TopologyMismatch(format!(
                "{} vertices / {} faces vs {} vertices / {} faces",
                self.nvertices(),
                self.nfaces(),
                other.nvertices(),
                other.nfaces()
            )));
        }
        Ok(self.with_vertices(
            self.vertices
                .iter()
                .zip(&other.vertices)
                .map(|(a, b)| (DVec3::from(*a) * (1.0 - t) + DVec3::from(*b) * t).to_array())
                .collect(),
        ))
    }

    /// Concatenates meshes, offsetting face indices of later meshes.
    pub fn merge(meshes: &[SurfaceMesh]) -> SurfaceMesh {
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for mesh in meshes {
            let offset = vertices.len();
            vertices.extend_from_slice(&mesh.vertices);
            faces.extend(mesh.faces.iter().map(|tri| tri.map(|i| i + offset)));
        }
        SurfaceMesh::from_parts(vertices, faces)
    }

    pub fn center_of_mass(&self) -> Option<[f64; 3]> {
        if self.vertices.is_empty() {
            return None;
        }
        let sum: DVec3 = self.vertices.iter().map(|v| DVec3::from(*v)).sum();
        Some((sum / self.vertices.len() as f64).to_array())
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let mut iter = self.vertices.iter();
        let first = iter.next()?;
        let mut min = *first;
        let mut max = *first;

        for p in iter {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }

        Some(Bounds { min, max })
    }

    /// Node closest to `point`; ties go to the lowest index.
    pub fn nearest_node(&self, point: [f64; 3]) -> Option<(usize, f64)> {
        let target = DVec3::from(point);
        let mut best: Option<(usize, f64)> = None;
        for (node, v) in self.vertices.iter().enumerate() {
            let d = target.distance(DVec3::from(*v));
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((node, d));
            }
        }
        best
    }

    /// For every node of `self`, the nearest node of the denser `high` mesh.
    ///
    /// `epsilon` is relative to the mean distance of `high`'s nodes from its
    /// centre of mass; any node further than that from its match is an error.
    pub fn map_to_higher_resolution(
        &self,
        high: &SurfaceMesh,
        epsilon: f64,
    ) -> Result<Vec<usize>, MeshError> {
        if self.vertices.is_empty() {
            return Ok(Vec::new());
        }
        let Some(center) = high.center_of_mass() else {
            return Err(MeshError::ResolutionMismatch {
                node: 0,
                distance: f64::INFINITY,
                tolerance: 0.0,
            });
        };
        let center = DVec3::from(center);
        let mean_radius = high
            .vertices
            .iter()
            .map(|v| center.distance(DVec3::from(*v)))
            .sum::<f64>()
            / high.nvertices() as f64;
        let tolerance = epsilon * mean_radius;

        self.vertices
            .iter()
            .enumerate()
            .map(|(node, v)| {
                let (nearest, distance) = high
                    .nearest_node(*v)
                    .unwrap_or((0, f64::INFINITY));
                if distance > tolerance {
                    Err(MeshError::ResolutionMismatch {
                        node,
                        distance,
                        tolerance,
                    })
                } else {
                    Ok(nearest)
                }
            })
            .collect()
    }
}

impl Mul<f64> for &SurfaceMesh {
    type Output = SurfaceMesh;

    fn mul(self, factor: f64) -> SurfaceMesh {
        self.scaled(factor)
    }
}

impl Mul<f64> for SurfaceMesh {
    type Output = SurfaceMesh;

    fn mul(self, factor: f64) -> SurfaceMesh {
        self.scaled(factor)
    }
}

impl Add<f64> for &SurfaceMesh {
    type Output = SurfaceMesh;

    fn add(self, offset: f64) -> SurfaceMesh {
        self.translated([offset; 3])
    }
}

impl Add<f64> for SurfaceMesh {
    type Output = SurfaceMesh;

    fn add(self, offset: f64) -> SurfaceMesh {
        self.translated([offset; 3])
    }
}

impl Add<[f64; 3]> for &SurfaceMesh {
    type Output = SurfaceMesh;

    fn add(self, offset: [f64; 3]) -> SurfaceMesh {
        self.translated(offset)
    }
}

impl Add<[f64; 3]> for SurfaceMesh {
    type Output = SurfaceMesh;

    fn add(self, offset: [f64; 3]) -> SurfaceMesh {
        self.translated(offset)
    }
}

#[derive(Debug, Clone, Copy)]
struct Distance(f64);

impl PartialEq for Distance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Distance {}

impl PartialOrd for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Distance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
