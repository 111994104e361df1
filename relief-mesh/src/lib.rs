//! Relief Mesh Crate
//!
//! Surface construction for the relief terrain reconstructor: Delaunay
//! triangulation of accumulated hit points in the XZ plane, a quadtree over
//! triangle bounds, space carving against miss rays, and mesh export.

pub mod carve;
pub mod delaunay;
pub mod export;
pub mod quadtree;

pub use carve::carve;
pub use delaunay::{triangulate, TerrainMesh, Triangle, NO_TRIANGLE};
pub use export::{export_glb, export_obj, ExportError};
pub use quadtree::TriangleQuadtree;
