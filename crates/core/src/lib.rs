mod config;
mod correspondence;
mod error;
mod parallel;
mod searchlight;
mod selection;
mod sparse_attributes;
mod volume;

pub use config::{SamplingParams, SelectionConfig};
pub use correspondence::{NodeVoxelMap, VolSurf};
pub use error::SurfingError;
pub use searchlight::{Dataset, DatasetView, Measure, Neighborhood, SearchlightResult};
pub use selection::{
    run_voxel_selection, voxel_selection, voxel_selection_with, voxel_to_nearest_center,
    DistanceMetric, NodeDistance, Radius, SelectedVoxel, VoxelSelector, DISTANCE_LABEL,
    GEOMETRY_METADATA, POSITION_LABEL, VOXEL_LABEL,
};
pub use sparse_attributes::{
    AttributeColumn, AttributeError, AttributeRef, AttributeType, AttributeValue,
    SparseAttributes,
};
pub use volume::{read_geometry, VolumeImage};

pub use surfing_geometry::{
    freesurfer, generate_cube, generate_sphere, hemi_pairs_reposition,
    sphere_reg_leftrightmapping, AngleUnit, Bounds, DistanceField, FacingSide, GeometryError,
    GridGeometry, Ijk, MeshError, SurfaceMesh, LEFT_RIGHT_EPSILON,
};
