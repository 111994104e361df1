//! XZ quadtree over triangle bounds for carving candidate lookup.
//!
//! Nodes partition the planform at their XZ midpoint; the Y range passes
//! through unchanged. A triangle straddling a split line is listed in every
//! child it touches, so queries deduplicate through a set. The tree is
//! built once per carving pass and discarded afterward.

use crate::delaunay::TerrainMesh;
use hashbrown::HashSet;
use rayon::prelude::*;
use relief_data::Bounds;
use tracing::debug;

const MAX_DEPTH: usize = 8;
const LEAF_CAPACITY: usize = 50;
/// Children above this depth build as parallel tasks.
const PARALLEL_DEPTH: usize = 3;

/// Spatial index of live triangles by their XZ bounds.
pub struct TriangleQuadtree {
    root: Option<Node>,
}

enum Node {
    Internal {
        bounds: Bounds,
        children: Box<[Node; 4]>,
    },
    Leaf {
        bounds: Bounds,
        triangles: Vec<u32>,
    },
}

impl TriangleQuadtree {
    /// Build a tree over every live triangle of `mesh`.
    pub fn build(mesh: &TerrainMesh) -> Self {
        let mut items: Vec<u32> = Vec::with_capacity(mesh.triangles.len());
        let mut bounds: Option<Bounds> = None;
        for (i, tri) in mesh.triangles.iter().enumerate() {
            if tri.is_deleted() {
                continue;
            }
            items.push(i as u32);
            match &mut bounds {
                Some(b) => {
                    b.encapsulate(tri.bounds.min);
                    b.encapsulate(tri.bounds.max);
                }
                None => bounds = Some(tri.bounds),
            }
        }

        let root = bounds.map(|bounds| {
            debug!("Building quadtree over {} triangles", items.len());
            build_node(mesh, bounds, items, 0)
        });
        Self { root }
    }

    /// Collect every indexed triangle whose bounds intersect `query`.
    ///
    /// The result is deduplicated (straddling triangles appear in several
    /// leaves) and in no particular order.
    pub fn query(&self, query: &Bounds) -> Vec<u32> {
        let Some(root) = &self.root else {
            return Vec::new();
        };

        let mut found: HashSet<u32> = HashSet::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match node {
                Node::Internal { bounds, children } => {
                    if bounds.intersects(query) {
                        stack.extend(children.iter());
                    }
                }
                Node::Leaf { bounds, triangles } => {
                    if bounds.intersects(query) {
                        found.extend(triangles.iter().copied());
                    }
                }
            }
        }
        found.into_iter().collect()
    }
}

fn build_node(mesh: &TerrainMesh, bounds: Bounds, items: Vec<u32>, depth: usize) -> Node {
    if items.len() <= LEAF_CAPACITY || depth >= MAX_DEPTH {
        return Node::Leaf {
            bounds,
            triangles: items,
        };
    }

    let mid = bounds.midpoint();
    // SW, SE, NW, NE in XZ; each child keeps the full Y range.
    let quadrants = [
        Bounds::new(bounds.min, glam::DVec3::new(mid.x, bounds.max.y, mid.z)),
        Bounds::new(
            glam::DVec3::new(mid.x, bounds.min.y, bounds.min.z),
            glam::DVec3::new(bounds.max.x, bounds.max.y, mid.z),
        ),
        Bounds::new(
            glam::DVec3::new(bounds.min.x, bounds.min.y, mid.z),
            glam::DVec3::new(mid.x, bounds.max.y, bounds.max.z),
        ),
        Bounds::new(glam::DVec3::new(mid.x, bounds.min.y, mid.z), bounds.max),
    ];

    let child_items: Vec<(Bounds, Vec<u32>)> = quadrants
        .into_iter()
        .map(|quadrant| {
            let inside: Vec<u32> = items
                .iter()
                .copied()
                .filter(|&t| mesh.triangles[t as usize].bounds.intersects(&quadrant))
                .collect();
            (quadrant, inside)
        })
        .collect();

    let children: Vec<Node> = if depth < PARALLEL_DEPTH {
        child_items
            .into_par_iter()
            .map(|(quadrant, inside)| build_node(mesh, quadrant, inside, depth + 1))
            .collect()
    } else {
        child_items
            .into_iter()
            .map(|(quadrant, inside)| build_node(mesh, quadrant, inside, depth + 1))
            .collect()
    };

    let children: Box<[Node; 4]> = match children.try_into() {
        Ok(array) => Box::new(array),
        Err(_) => unreachable!("quadtree node always has four children"),
    };
    Node::Internal { bounds, children }
}
