use std::f64::consts::PI;

use crate::mesh::SurfaceMesh;

/// Unit sphere with `density² + 2` nodes and `2 · density²` triangles.
///
/// Node 0 is the north pole and node 1 the south pole. The remaining nodes
/// form `density` rings of `density` nodes, running from south to north, each
/// ring rotated half a step against the previous one. Densities below 3 are
/// raised to 3.
pub fn generate_sphere(density: usize) -> SurfaceMesh {
    let d = density.max(3);
    let index = |ring: usize, column: usize| 2 + ring * d + column % d;

    let mut vertices = Vec::with_capacity(d * d + 2);
    vertices.push([0.0, 0.0, 1.0]);
    vertices.push([0.0, 0.0, -1.0]);
    for ring in 0..d {
        let theta = PI * (ring + 1) as f64 / (d + 1) as f64;
        let z = -theta.cos();
        let radius = theta.sin();
        for column in 0..d {
            let phi = (column as f64 + ring as f64 / 2.0) * 2.0 * PI / d as f64;
            vertices.push([radius * phi.cos(), radius * phi.sin(), z]);
        }
    }

    let mut faces = Vec::with_capacity(2 * d * d);
    for ring in 0..d {
        for step in 0..d {
            let column = (step + d - ring % d) % d;
            let below = if ring == 0 {
                1
            } else {
                index(ring - 1, column + 1)
            };
            let above = if ring == d - 1 {
                0
            } else {
                index(ring + 1, column)
            };
            faces.push([index(ring, column), index(ring, column + 1), below]);
            faces.push([index(ring, column + 1), index(ring, column), above]);
        }
    }

    SurfaceMesh::from_parts(vertices, faces)
}

/// Axis-aligned unit cube centred on the origin.
pub fn generate_cube() -> SurfaceMesh {
    let h = 0.5;
    let vertices = vec![
        [-h, -h, -h],
        [h, -h, -h],
        [h, h, -h],
        [-h, h, -h],
        [-h, -h, h],
        [h, -h, h],
        [h, h, h],
        [-h, h, h],
    ];

    let faces = vec![
        [0, 2, 1],
        [0, 3, 2], // -Z
        [4, 5, 6],
        [4, 6, 7], // +Z
        [0, 1, 5],
        [0, 5, 4], // -Y
        [2, 3, 7],
        [2, 7, 6], // +Y
        [1, 2, 6],
        [1, 6, 5], // +X
        [3, 0, 4],
        [3, 4, 7], // -X
    ];

    SurfaceMesh::from_parts(vertices, faces)
}
