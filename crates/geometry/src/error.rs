use std::path::PathBuf;

use thiserror::Error;

/// Failures while constructing a [`GridGeometry`](crate::GridGeometry).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("grid shape must have 3 or 4 extents, got {0:?}")]
    InvalidShape(Vec<usize>),
    #[error("grid extent {axis} is zero")]
    ZeroExtent { axis: usize },
    #[error("affine contains non-finite values")]
    NonFiniteAffine,
    #[error("affine bottom row must be [0, 0, 0, 1], got {0:?}")]
    NotAffine([f64; 4]),
    #[error("affine is singular (determinant {0})")]
    SingularAffine(f64),
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("face {face} references vertex {index}, mesh has {nvertices} vertices")]
    FaceIndexOutOfRange {
        face: usize,
        index: usize,
        nvertices: usize,
    },
    #[error("vertex {0} has non-finite coordinates")]
    NonFiniteVertex(usize),
    #[error("node {node} out of range for mesh with {nvertices} vertices")]
    NodeOutOfRange { node: usize, nvertices: usize },
    #[error("meshes differ in topology: {0}")]
    TopologyMismatch(String),
    #[error(
        "node {node} is {distance} from the nearest high resolution node, tolerance is {tolerance}"
    )]
    ResolutionMismatch {
        node: usize,
        distance: f64,
        tolerance: f64,
    },
    #[error("unknown facing side {0:?}, expected one of a, p, i, s, m")]
    UnknownFacingSide(String),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("{0} already exists, refusing to overwrite")]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
