pub mod atomic;
pub mod error;
pub mod freesurfer;
pub mod grid;
pub mod hemispheres;
pub mod mesh;
pub mod primitives;

pub use atomic::write_atomic;
pub use error::{GeometryError, MeshError};
pub use grid::{GridGeometry, Ijk};
pub use hemispheres::{
    hemi_pairs_reposition, sphere_reg_leftrightmapping, FacingSide, LEFT_RIGHT_EPSILON,
};
pub use mesh::{AngleUnit, Bounds, DistanceField, SurfaceMesh};
pub use primitives::{generate_cube, generate_sphere};
