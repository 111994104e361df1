//! Space carving: delete triangles contradicted by known-empty rays.

use crate::delaunay::TerrainMesh;
use crate::quadtree::TriangleQuadtree;
use rayon::prelude::*;
use relief_data::{ray_triangle_intersection, Ray};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Intersections closer than this to either segment endpoint are ignored,
/// so a ray does not carve the surface its own endpoints sit on.
const ENDPOINT_BUFFER: f64 = 0.05;

/// Delete every triangle some miss ray passes through. Returns how many
/// triangles were deleted.
///
/// Rays are processed in parallel; the per-triangle delete is
/// first-writer-wins, so the count stays exact when several rays hit the
/// same triangle.
pub fn carve(mesh: &TerrainMesh, tree: &TriangleQuadtree, rays: &[Ray]) -> usize {
    let removed = AtomicUsize::new(0);

    rays.par_iter().for_each(|ray| {
        let dir = ray.direction();
        let length = ray.length();
        let ray_bounds = ray.bounds();

        for idx in tree.query(&ray_bounds) {
            let tri = &mesh.triangles[idx as usize];
            if tri.is_deleted() {
                continue;
            }
            let [a, b, c] = mesh.triangle_positions(tri);
            if let Some(t) = ray_triangle_intersection(ray.start, dir, a, b, c) {
                if t > ENDPOINT_BUFFER && t < length - ENDPOINT_BUFFER && tri.try_delete() {
                    removed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    let count = removed.load(Ordering::Relaxed);
    info!(
        "Carved {} of {} triangles with {} rays",
        count,
        mesh.triangles.len(),
        rays.len()
    );
    count
}
