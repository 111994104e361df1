//! Mesh exporters: Wavefront OBJ and glTF binary.

pub mod glb;
pub mod obj;

pub use glb::{export_glb, ExportError};
pub use obj::export_obj;
