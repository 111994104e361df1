//! Relief Data Crate
//!
//! Core data model and persistence for the relief terrain reconstructor.
//! This crate is mesh-agnostic and focuses on the sample types, the binary
//! point database, and the spacing-enforcing point index.

pub mod database;
pub mod point_index;
pub mod types;

pub use database::{Database, DatabaseError, DB_VERSION};
pub use point_index::PointIndex;
pub use types::{ray_triangle_intersection, safe_normalize, Bounds, Ray, Vertex};
