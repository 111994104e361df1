//! glTF binary (GLB) export.
//!
//! Builds the glTF 2.0 JSON tree with `gltf_json` and wraps it in a GLB
//! container by hand: a 12-byte header, a space-padded JSON chunk, and a
//! zero-padded little-endian BIN chunk holding positions, normals, and
//! indices.

use crate::delaunay::TerrainMesh;
use gltf_json as json;
use json::buffer::Stride;
use json::validation::Checked::Valid;
use json::validation::USize64;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize glTF JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write the live triangles of `mesh` as a GLB file.
///
/// Vertices are compacted to the referenced subset and narrowed to f32;
/// normals pass through as stored.
pub fn export_glb(mesh: &TerrainMesh, path: &Path) -> Result<(), ExportError> {
    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    let mut positions: Vec<f32> = Vec::new();
    let mut normals: Vec<f32> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();

    for tri in mesh.live_triangles() {
        for &vi in &tri.verts {
            if remap[vi as usize] == u32::MAX {
                remap[vi as usize] = (positions.len() / 3) as u32;
                let v = &mesh.vertices[vi as usize];
                positions.extend([v.position.x as f32, v.position.y as f32, v.position.z as f32]);
                normals.extend([v.normal.x as f32, v.normal.y as f32, v.normal.z as f32]);
            }
            indices.push(remap[vi as usize]);
        }
    }

    let vertex_count = positions.len() / 3;
    let positions_bytes: Vec<u8> = positions.iter().flat_map(|f| f.to_le_bytes()).collect();
    let normals_bytes: Vec<u8> = normals.iter().flat_map(|f| f.to_le_bytes()).collect();
    let indices_bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();

    let mut bin = Vec::with_capacity(
        positions_bytes.len() + normals_bytes.len() + indices_bytes.len() + 3,
    );
    bin.extend_from_slice(&positions_bytes);
    bin.extend_from_slice(&normals_bytes);
    bin.extend_from_slice(&indices_bytes);
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let root = build_root(
        vertex_count,
        indices.len(),
        positions_bytes.len(),
        normals_bytes.len(),
        indices_bytes.len(),
        bin.len(),
        position_extents(&positions),
    );

    let mut json_bytes = serde_json::to_vec(&root)?;
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let total = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);
    fs::write(path, &out)?;

    info!(
        "Exported {} triangles / {} vertices to {}",
        indices.len() / 3,
        vertex_count,
        path.display()
    );
    Ok(())
}

fn position_extents(positions: &[f32]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for chunk in positions.chunks_exact(3) {
        for i in 0..3 {
            min[i] = min[i].min(chunk[i]);
            max[i] = max[i].max(chunk[i]);
        }
    }
    (min, max)
}

#[allow(clippy::too_many_arguments)]
fn build_root(
    vertex_count: usize,
    index_count: usize,
    positions_len: usize,
    normals_len: usize,
    indices_len: usize,
    buffer_len: usize,
    (min_pos, max_pos): ([f32; 3], [f32; 3]),
) -> json::Root {
    let buffer = json::Buffer {
        byte_length: USize64::from(buffer_len),
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        uri: None,
    };

    let positions_view = json::buffer::View {
        buffer: json::Index::new(0),
        byte_length: USize64::from(positions_len),
        byte_offset: Some(USize64(0)),
        byte_stride: Some(Stride(12)),
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: Some(Valid(json::buffer::Target::ArrayBuffer)),
    };

    let normals_view = json::buffer::View {
        buffer: json::Index::new(0),
        byte_length: USize64::from(normals_len),
        byte_offset: Some(USize64::from(positions_len)),
        byte_stride: Some(Stride(12)),
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: Some(Valid(json::buffer::Target::ArrayBuffer)),
    };

    let indices_view = json::buffer::View {
        buffer: json::Index::new(0),
        byte_length: USize64::from(indices_len),
        byte_offset: Some(USize64::from(positions_len + normals_len)),
        byte_stride: None,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: Some(Valid(json::buffer::Target::ElementArrayBuffer)),
    };

    let positions_accessor = json::Accessor {
        buffer_view: Some(json::Index::new(0)),
        byte_offset: Some(USize64(0)),
        count: USize64::from(vertex_count),
        component_type: Valid(json::accessor::GenericComponentType(
            json::accessor::ComponentType::F32,
        )),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Valid(json::accessor::Type::Vec3),
        min: Some(json::Value::from(Vec::from(min_pos))),
        max: Some(json::Value::from(Vec::from(max_pos))),
        name: None,
        normalized: false,
        sparse: None,
    };

    let normals_accessor = json::Accessor {
        buffer_view: Some(json::Index::new(1)),
        byte_offset: Some(USize64(0)),
        count: USize64::from(vertex_count),
        component_type: Valid(json::accessor::GenericComponentType(
            json::accessor::ComponentType::F32,
        )),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Valid(json::accessor::Type::Vec3),
        min: None,
        max: None,
        name: None,
        normalized: false,
        sparse: None,
    };

    let indices_accessor = json::Accessor {
        buffer_view: Some(json::Index::new(2)),
        byte_offset: Some(USize64(0)),
        count: USize64::from(index_count),
        component_type: Valid(json::accessor::GenericComponentType(
            json::accessor::ComponentType::U32,
        )),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Valid(json::accessor::Type::Scalar),
        min: None,
        max: None,
        name: None,
        normalized: false,
        sparse: None,
    };

    let primitive = json::mesh::Primitive {
        attributes: {
            let mut map = std::collections::BTreeMap::new();
            map.insert(Valid(json::mesh::Semantic::Positions), json::Index::new(0));
            map.insert(Valid(json::mesh::Semantic::Normals), json::Index::new(1));
            map
        },
        extensions: Default::default(),
        extras: Default::default(),
        indices: Some(json::Index::new(2)),
        material: None,
        mode: Valid(json::mesh::Mode::Triangles),
        targets: None,
    };

    let gltf_mesh = json::Mesh {
        extensions: Default::default(),
        extras: Default::default(),
        name: Some("terrain".to_string()),
        primitives: vec![primitive],
        weights: None,
    };

    let node = json::Node {
        camera: None,
        children: None,
        extensions: Default::default(),
        extras: Default::default(),
        matrix: None,
        mesh: Some(json::Index::new(0)),
        name: None,
        rotation: None,
        scale: None,
        translation: None,
        skin: None,
        weights: None,
    };

    let scene = json::Scene {
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        nodes: vec![json::Index::new(0)],
    };

    json::Root {
        accessors: vec![positions_accessor, normals_accessor, indices_accessor],
        buffers: vec![buffer],
        buffer_views: vec![positions_view, normals_view, indices_view],
        meshes: vec![gltf_mesh],
        nodes: vec![node],
        scenes: vec![scene],
        scene: Some(json::Index::new(0)),
        ..Default::default()
    }
}
