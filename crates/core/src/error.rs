use std::path::PathBuf;

use surfing_geometry::{GeometryError, MeshError};
use thiserror::Error;

use crate::sparse_attributes::AttributeError;

#[derive(Debug, Error)]
pub enum SurfingError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    #[error("inner and outer surfaces differ in topology: {0}")]
    TopologyMismatch(String),
    #[error("center node {0} has no neighborhood")]
    UnknownCenter(usize),
    #[error("node {node} out of range for surface with {nvertices} nodes")]
    NodeOutOfRange { node: usize, nvertices: usize },
    #[error("measure failed at center {center}: {message}")]
    Measure { center: usize, message: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("image data has {actual} values, geometry needs {expected}")]
    ImageSize { expected: usize, actual: usize },
    #[error("voxel {voxel} out of range for grid with {nvoxels} voxels")]
    VoxelOutOfRange { voxel: usize, nvoxels: usize },
    #[error("nifti {path:?}: {message}")]
    Nifti { path: PathBuf, message: String },
    #[error("missing metadata entry {0:?}")]
    MissingMetadata(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
