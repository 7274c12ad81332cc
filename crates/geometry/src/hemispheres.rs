//! Left/right hemisphere utilities: node correspondence between mirrored
//! registration spheres, and side-by-side placement of a hemisphere pair.

use std::str::FromStr;

use tracing::debug;

use crate::error::MeshError;
use crate::mesh::{AngleUnit, SurfaceMesh};

/// Default tolerance for [`sphere_reg_leftrightmapping`], relative to the
/// mean radius of the right sphere.
pub const LEFT_RIGHT_EPSILON: f64 = 0.001;

/// For every node of the `left` registration sphere, the node of `right`
/// that sits at its mirror image across the x = 0 plane.
///
/// Fails when the spheres differ in node count, when a node has no mirror
/// partner within `epsilon` (relative to the mean radius), or when two left
/// nodes claim the same right node.
pub fn sphere_reg_leftrightmapping(
    left: &SurfaceMesh,
    right: &SurfaceMesh,
    epsilon: f64,
) -> Result<Vec<usize>, MeshError> {
    if left.nvertices() != right.nvertices() {
        return Err(MeshError::TopologyMismatch(format!(
            "left has {} nodes, right has {}",
            left.nvertices(),
            right.nvertices()
        )));
    }

    let mirrored = right.scaled_xyz([-1.0, 1.0, 1.0]);
    let l2r = left.map_to_higher_resolution(&mirrored, epsilon)?;

    let mut claimed = vec![false; right.nvertices()];
    for (node, &partner) in l2r.iter().enumerate() {
        if std::mem::replace(&mut claimed[partner], true) {
            return Err(MeshError::TopologyMismatch(format!(
                "left node {node} maps to right node {partner}, which is already taken"
            )));
        }
    }
    debug!(nodes = l2r.len(), "left/right sphere mapping");
    Ok(l2r)
}

/// Side of a hemisphere pair that faces the viewer, who looks down the z
/// axis from above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingSide {
    Anterior,
    Posterior,
    Inferior,
    Superior,
    Medial,
}

impl FacingSide {
    /// XYZ Euler rotations in degrees for the left and right hemisphere.
    fn rotations(self) -> ([f64; 3], [f64; 3]) {
        match self {
            FacingSide::Superior => ([0.0; 3], [0.0; 3]),
            FacingSide::Inferior => ([180.0, 0.0, 0.0], [180.0, 0.0, 0.0]),
            FacingSide::Anterior => ([90.0, 0.0, 0.0], [90.0, 0.0, 0.0]),
            FacingSide::Posterior => ([-90.0, 0.0, 0.0], [-90.0, 0.0, 0.0]),
            // the left medial wall points to +x, the right one to -x
            FacingSide::Medial => ([0.0, -90.0, 0.0], [0.0, 90.0, 0.0]),
        }
    }
}

impl FromStr for FacingSide {
    type Err = MeshError;

    /// Accepts any word whose first letter is one of `a p i s m`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('a') => Ok(FacingSide::Anterior),
            Some('p') => Ok(FacingSide::Posterior),
            Some('i') => Ok(FacingSide::Inferior),
            Some('s') => Ok(FacingSide::Superior),
            Some('m') => Ok(FacingSide::Medial),
            _ => Err(MeshError::UnknownFacingSide(s.to_string())),
        }
    }
}

/// Rotates both hemispheres so `side` faces +z, then lays them out along x
/// (left at negative x) with a gap of `min_distance` between their bounding
/// boxes. The merged pair is centred on the origin.
pub fn hemi_pairs_reposition(
    left: &SurfaceMesh,
    right: &SurfaceMesh,
    side: FacingSide,
    min_distance: f64,
) -> (SurfaceMesh, SurfaceMesh) {
    let (left_angles, right_angles) = side.rotations();
    let left = centred(left).rotated(left_angles, AngleUnit::Degrees);
    let right = centred(right).rotated(right_angles, AngleUnit::Degrees);

    let gap = min_distance.max(0.0) / 2.0;
    let left = match left.bounds() {
        Some(b) => left.translated([-gap - b.max[0], 0.0, 0.0]),
        None => left,
    };
    let right = match right.bounds() {
        Some(b) => right.translated([gap - b.min[0], 0.0, 0.0]),
        None => right,
    };

    let pair = SurfaceMesh::merge(&[left.clone(), right.clone()]);
    match pair.center_of_mass() {
        Some([x, y, z]) => {
            let offset = [-x, -y, -z];
            (left.translated(offset), right.translated(offset))
        }
        None => (left, right),
    }
}

fn centred(mesh: &SurfaceMesh) -> SurfaceMesh {
    match mesh.center_of_mass() {
        Some([x, y, z]) => mesh.translated([-x, -y, -z]),
        None => mesh.clone(),
    }
}
