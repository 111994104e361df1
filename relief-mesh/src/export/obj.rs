//! Wavefront OBJ export.

use crate::delaunay::TerrainMesh;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Write the live triangles of `mesh` as an OBJ file.
///
/// Vertex ids are assigned lazily in first-use order (OBJ indices are
/// 1-based; an id of zero means the vertex was never referenced). Normals
/// are written as stored.
pub fn export_obj(mesh: &mut TerrainMesh, path: &Path) -> io::Result<()> {
    let faces: Vec<[u32; 3]> = mesh.live_triangles().map(|t| t.verts).collect();

    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "o terrain")?;

    let mut next_id = 1u32;
    for face in &faces {
        for &vi in face {
            let vertex = &mut mesh.vertices[vi as usize];
            if vertex.id == 0 {
                vertex.id = next_id;
                next_id += 1;
                let p = vertex.position;
                let n = vertex.normal;
                writeln!(out, "v {} {} {}", p.x, p.y, p.z)?;
                writeln!(out, "vn {} {} {}", n.x, n.y, n.z)?;
            }
        }
    }

    for face in &faces {
        let [a, b, c] = face.map(|vi| mesh.vertices[vi as usize].id);
        writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}")?;
    }
    out.flush()?;

    info!(
        "Exported {} faces / {} vertices to {}",
        faces.len(),
        next_id - 1,
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delaunay::triangulate;
    use glam::DVec3;
    use relief_data::Vertex;
    use std::path::PathBuf;

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("relief_obj_test_{}_{}.obj", tag, std::process::id()))
    }

    #[test]
    fn test_obj_counts_and_indices() {
        let mut mesh = triangulate(&[
            Vertex::new(DVec3::new(0.0, 0.0, 0.0), DVec3::Y),
            Vertex::new(DVec3::new(1.0, 0.0, 0.0), DVec3::Y),
            Vertex::new(DVec3::new(0.0, 0.0, 1.0), DVec3::Y),
            Vertex::new(DVec3::new(1.0, 0.0, 1.0), DVec3::Y),
        ]);

        let path = scratch_path("counts");
        export_obj(&mut mesh, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let v_lines = text.lines().filter(|l| l.starts_with("v ")).count();
        let vn_lines = text.lines().filter(|l| l.starts_with("vn ")).count();
        let f_lines = text.lines().filter(|l| l.starts_with("f ")).count();
        assert_eq!(v_lines, 4);
        assert_eq!(vn_lines, 4);
        assert_eq!(f_lines, 2);

        // Face indices are 1-based and in range.
        for line in text.lines().filter(|l| l.starts_with("f ")) {
            for field in line.split_whitespace().skip(1) {
                let id: u32 = field.split("//").next().unwrap().parse().unwrap();
                assert!(id >= 1 && id <= 4);
            }
        }

        // Every referenced vertex got an id.
        assert!(mesh.vertices.iter().all(|v| v.id != 0));
    }

    #[test]
    fn test_obj_skips_carved_triangles() {
        let mesh = triangulate(&[
            Vertex::new(DVec3::new(0.0, 0.0, 0.0), DVec3::Y),
            Vertex::new(DVec3::new(1.0, 0.0, 0.0), DVec3::Y),
            Vertex::new(DVec3::new(0.0, 0.0, 1.0), DVec3::Y),
            Vertex::new(DVec3::new(1.0, 0.0, 1.0), DVec3::Y),
        ]);
        mesh.triangles[0].try_delete();
        let mut mesh = mesh;

        let path = scratch_path("carved");
        export_obj(&mut mesh, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let f_lines = text.lines().filter(|l| l.starts_with("f ")).count();
        assert_eq!(f_lines, 1);
        // Only the surviving triangle's three vertices are written.
        let v_lines = text.lines().filter(|l| l.starts_with("v ")).count();
        assert_eq!(v_lines, 3);
    }
}
