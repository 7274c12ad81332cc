//! FreeSurfer ASCII surfaces: a comment line, `"<nv> <nf>"`, then one
//! `x y z 0` row per vertex and one `a b c 0` row per face.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::info;

use crate::atomic::write_atomic;
use crate::error::MeshError;
use crate::mesh::SurfaceMesh;

pub fn read(path: impl AsRef<Path>) -> Result<SurfaceMesh, MeshError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mesh = parse(&text)?;
    info!(
        path = %path.display(),
        nvertices = mesh.nvertices(),
        nfaces = mesh.nfaces(),
        "read surface"
    );
    Ok(mesh)
}

pub fn parse(text: &str) -> Result<SurfaceMesh, MeshError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let (line, header) = lines.next().ok_or_else(|| MeshError::Parse {
        line: 0,
        message: "missing vertex/face count line".to_string(),
    })?;
    let counts = parse_fields::<usize>(header, line)?;
    let [nv, nf] = counts[..] else {
        return Err(MeshError::Parse {
            line,
            message: format!("expected 2 counts, found {}", counts.len()),
        });
    };

    let mut vertices = Vec::new();
    for _ in 0..nv {
        let (line, row) = next_row(&mut lines, "vertex")?;
        let values = parse_fields::<f64>(row, line)?;
        let [x, y, z, ..] = values[..] else {
            return Err(MeshError::Parse {
                line,
                message: format!("expected vertex coordinates, found {} fields", values.len()),
            });
        };
        vertices.push([x, y, z]);
    }

    let mut faces = Vec::new();
    for _ in 0..nf {
        let (line, row) = next_row(&mut lines, "face")?;
        let values = parse_fields::<usize>(row, line)?;
        let [a, b, c, ..] = values[..] else {
            return Err(MeshError::Parse {
                line,
                message: format!("expected face indices, found {} fields", values.len()),
            });
        };
        faces.push([a, b, c]);
    }

    if let Some((line, _)) = lines.next() {
        return Err(MeshError::Parse {
            line,
            message: "trailing data after last face".to_string(),
        });
    }

    SurfaceMesh::new(vertices, faces)
}

fn next_row<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    what: &str,
) -> Result<(usize, &'a str), MeshError> {
    lines.next().ok_or_else(|| MeshError::Parse {
        line: 0,
        message: format!("unexpected end of file, expected {what} row"),
    })
}

fn parse_fields<T: std::str::FromStr>(row: &str, line: usize) -> Result<Vec<T>, MeshError> {
    row.split_whitespace()
        .map(|field| {
            field.parse::<T>().map_err(|_| MeshError::Parse {
                line,
                message: format!("invalid number {field:?}"),
            })
        })
        .collect()
}

pub fn write(path: impl AsRef<Path>, mesh: &SurfaceMesh, overwrite: bool) -> Result<(), MeshError> {
    let path = path.as_ref();
    write_atomic(path, overwrite, |w| write_to(w, mesh)).map_err(|err| {
        if err.kind() == io::ErrorKind::AlreadyExists {
            MeshError::AlreadyExists(path.to_path_buf())
        } else {
            MeshError::Io(err)
        }
    })?;
    info!(
        path = %path.display(),
        nvertices = mesh.nvertices(),
        nfaces = mesh.nfaces(),
        "wrote surface"
    );
    Ok(())
}

pub fn write_to(w: &mut impl Write, mesh: &SurfaceMesh) -> io::Result<()> {
    writeln!(w, "#!ascii surface")?;
    writeln!(w, "{} {}", mesh.nvertices(), mesh.nfaces())?;
    for [x, y, z] in mesh.vertices() {
        writeln!(w, "{x} {y} {z} 0")?;
    }
    for [a, b, c] in mesh.faces() {
        writeln!(w, "{a} {b} {c} 0")?;
    }
    Ok(())
}
