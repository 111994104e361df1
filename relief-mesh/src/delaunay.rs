//! Incremental Delaunay triangulation of the terrain planform.
//!
//! The mesher is 2.5D: triangulation and circumcircle tests run on the XZ
//! projection, Y rides along as an attribute. Construction is incremental
//! Bowyer-Watson over a triangle arena with neighbor pointers, located by
//! walking across edges from the last inserted triangle. Overhangs and
//! vertical surfaces cannot be represented; callers slice accordingly.

use glam::DVec3;
use hashbrown::HashSet;
use relief_data::{Bounds, Vertex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Null triangle handle. A neighbor slot holding this marks a boundary edge.
pub const NO_TRIANGLE: u32 = u32::MAX;

/// Planform cell size for the pre-pass deduplication.
const DEDUP_CELL: f64 = 0.01;
const DEDUP_K1: i64 = 73856093;
const DEDUP_K2: i64 = 19349663;

/// Edge-walk hop cap before falling back to a linear scan.
const WALK_LIMIT: usize = 5000;

/// Circumcircle degeneracy threshold on the doubled signed area.
const DEGENERATE_EPSILON: f64 = 1e-9;

/// Strictness bias for circumcircle containment.
const CONTAINMENT_EPSILON: f64 = 1e-10;

/// A finished mesh triangle.
///
/// `verts` index the owning [`TerrainMesh`] vertex list. `neighbors[i]`
/// shares the edge opposite vertex `i` (`neighbors[0]` across BC,
/// `neighbors[1]` across CA, `neighbors[2]` across AB), or [`NO_TRIANGLE`]
/// on a boundary. The deletion flag belongs to the carver and is the only
/// state mutated after triangulation.
#[derive(Debug)]
pub struct Triangle {
    pub verts: [u32; 3],
    pub neighbors: [u32; 3],
    pub centroid: DVec3,
    pub bounds: Bounds,
    deleted: AtomicBool,
}

impl Triangle {
    pub(crate) fn new(verts: [u32; 3], neighbors: [u32; 3], positions: [DVec3; 3]) -> Self {
        let [a, b, c] = positions;
        let mut bounds = Bounds::new(a, a);
        bounds.encapsulate(b);
        bounds.encapsulate(c);
        Self {
            verts,
            neighbors,
            centroid: (a + b + c) / 3.0,
            bounds,
            deleted: AtomicBool::new(false),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Mark the triangle deleted. Returns true only for the first caller,
    /// so concurrent carvers count each triangle once.
    pub(crate) fn try_delete(&self) -> bool {
        self.deleted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A triangulated terrain surface: shared vertices plus the triangle arena.
#[derive(Debug, Default)]
pub struct TerrainMesh {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
}

impl TerrainMesh {
    /// Triangles that survived carving (all of them before a carve pass).
    pub fn live_triangles(&self) -> impl Iterator<Item = &Triangle> {
        self.triangles.iter().filter(|t| !t.is_deleted())
    }

    pub fn live_count(&self) -> usize {
        self.live_triangles().count()
    }

    /// Positions of a triangle's corners.
    pub fn triangle_positions(&self, triangle: &Triangle) -> [DVec3; 3] {
        triangle.verts.map(|v| self.vertices[v as usize].position)
    }
}

/// Triangulate the XZ projection of `points`.
///
/// Input points are deduplicated on a 1 cm planform grid and sorted by x,
/// which together with the tolerance-biased circumcircle test makes the
/// output deterministic for a fixed input set.
pub fn triangulate(points: &[Vertex]) -> TerrainMesh {
    if points.len() < 3 {
        warn!("Not enough points for triangulation (need at least 3)");
        return TerrainMesh::default();
    }

    let survivors = dedup_and_sort(points);
    if survivors.len() < 3 {
        warn!(
            "Only {} distinct planform points after dedup, no surface",
            survivors.len()
        );
        return TerrainMesh {
            vertices: survivors,
            triangles: Vec::new(),
        };
    }
    if survivors.len() < points.len() {
        debug!(
            "Planform dedup dropped {} of {} points",
            points.len() - survivors.len(),
            points.len()
        );
    }

    let mut mesher = Mesher::new(&survivors);
    for i in 0..survivors.len() {
        mesher.insert(i as u32);
    }
    let mesh = mesher.finish(survivors);

    info!(
        "Triangulated {} points into {} triangles (XZ projection)",
        mesh.vertices.len(),
        mesh.triangles.len()
    );
    mesh
}

/// Drop planform duplicates (first occurrence per cell wins), then sort
/// ascending by x for the insertion sweep.
///
/// The cell key is an XOR-combined hash with no collision resolution, so
/// distinct points can collide and be dropped. This matches the persisted
/// behavior of existing meshes.
fn dedup_and_sort(points: &[Vertex]) -> Vec<Vertex> {
    let mut seen: HashSet<i64> = HashSet::with_capacity(points.len());
    let mut survivors: Vec<Vertex> = Vec::with_capacity(points.len());
    for point in points {
        let cx = (point.position.x / DEDUP_CELL).floor() as i64;
        let cz = (point.position.z / DEDUP_CELL).floor() as i64;
        let key = cx.wrapping_mul(DEDUP_K1) ^ cz.wrapping_mul(DEDUP_K2);
        if seen.insert(key) {
            survivors.push(*point);
        }
    }
    survivors.sort_by(|a, b| a.position.x.total_cmp(&b.position.x));
    survivors
}

/// Triangle record during construction. Neighbor slots follow the same
/// opposite-vertex convention as the output type.
struct WorkTri {
    verts: [u32; 3],
    neighbors: [u32; 3],
    bad: bool,
}

/// One boundary edge of a cavity, in canonical (u, v) order with the
/// outside triangle (if any) and the cavity triangle it came from.
struct BoundaryEdge {
    u: u32,
    v: u32,
    outer: u32,
    old_tri: u32,
}

struct Mesher {
    /// Survivor positions followed by the three super-triangle corners.
    positions: Vec<DVec3>,
    /// Count of real (non-super) vertices.
    real_count: u32,
    tris: Vec<WorkTri>,
    /// Walk seed: first triangle created by the previous insertion.
    seed: u32,
}

impl Mesher {
    fn new(survivors: &[Vertex]) -> Self {
        let mut positions: Vec<DVec3> = survivors.iter().map(|v| v.position).collect();
        let real_count = positions.len() as u32;

        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_z = f64::INFINITY;
        let mut max_z = f64::NEG_INFINITY;
        for p in &positions {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_z = min_z.min(p.z);
            max_z = max_z.max(p.z);
        }
        let mid_x = (min_x + max_x) * 0.5;
        let mid_z = (min_z + max_z) * 0.5;
        let m = (max_x - min_x).max(max_z - min_z);

        positions.push(DVec3::new(mid_x - 20.0 * m, 0.0, mid_z - m));
        positions.push(DVec3::new(mid_x, 0.0, mid_z + 20.0 * m));
        positions.push(DVec3::new(mid_x + 20.0 * m, 0.0, mid_z - m));

        let super_tri = WorkTri {
            verts: [real_count, real_count + 1, real_count + 2],
            neighbors: [NO_TRIANGLE; 3],
            bad: false,
        };

        Self {
            positions,
            real_count,
            tris: vec![super_tri],
            seed: 0,
        }
    }

    fn insert(&mut self, point: u32) {
        let p = self.positions[point as usize];

        let start = match self.locate(p) {
            Some(t) if self.circumcircle_contains(t, p) => Some(t),
            _ => self.linear_scan(p),
        };
        let Some(start) = start else {
            // Exactly coincident or pathological input; drop the point.
            debug!("No containing circumcircle for point {point}, skipping");
            return;
        };

        let cavity = self.collect_cavity(start, p);
        let boundary = self.boundary_edges(&cavity);

        let mut created: Vec<u32> = Vec::with_capacity(boundary.len());
        for edge in &boundary {
            let new_idx = self.tris.len() as u32;
            self.tris.push(WorkTri {
                verts: [edge.u, edge.v, point],
                // Edge uv is opposite the inserted point (slot 2).
                neighbors: [NO_TRIANGLE, NO_TRIANGLE, edge.outer],
                bad: false,
            });
            if edge.outer != NO_TRIANGLE {
                let outer = &mut self.tris[edge.outer as usize];
                for slot in &mut outer.neighbors {
                    if *slot == edge.old_tri {
                        *slot = new_idx;
                        break;
                    }
                }
            }
            created.push(new_idx);
        }

        // Stitch the fan: edge (v, p) of one new triangle meets edge (p, u)
        // of the one whose u equals its v. Counts per insertion are small,
        // so the pairwise scan is fine.
        for a in 0..created.len() {
            for b in 0..created.len() {
                if a == b {
                    continue;
                }
                let (ta, tb) = (created[a], created[b]);
                if self.tris[ta as usize].verts[1] == self.tris[tb as usize].verts[0] {
                    self.tris[ta as usize].neighbors[0] = tb;
                    self.tris[tb as usize].neighbors[1] = ta;
                }
            }
        }

        if let Some(&first) = created.first() {
            self.seed = first;
        }
    }

    /// Walk across edges toward `p` from the current seed.
    ///
    /// Returns the triangle the walk settles in, or `None` when the hop cap
    /// is exceeded (degenerate adjacency can cycle).
    fn locate(&self, p: DVec3) -> Option<u32> {
        let mut current = self.seed;
        for _ in 0..WALK_LIMIT {
            let tri = &self.tris[current as usize];
            let [a, b, c] = tri.verts.map(|v| self.positions[v as usize]);

            let step = if orient(b, c, p) > 0.0 {
                tri.neighbors[0]
            } else if orient(c, a, p) > 0.0 {
                tri.neighbors[1]
            } else if orient(a, b, p) > 0.0 {
                tri.neighbors[2]
            } else {
                return Some(current);
            };

            if step == NO_TRIANGLE {
                return Some(current);
            }
            current = step;
        }
        None
    }

    /// Fallback: scan every live triangle for one whose circumcircle
    /// contains `p`.
    fn linear_scan(&self, p: DVec3) -> Option<u32> {
        (0..self.tris.len() as u32)
            .find(|&t| !self.tris[t as usize].bad && self.circumcircle_contains(t, p))
    }

    /// Flood out from `start`, marking every triangle whose circumcircle
    /// contains `p` as part of the cavity.
    fn collect_cavity(&mut self, start: u32, p: DVec3) -> Vec<u32> {
        self.tris[start as usize].bad = true;
        let mut cavity = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(t) = queue.pop_front() {
            for i in 0..3 {
                let n = self.tris[t as usize].neighbors[i];
                if n != NO_TRIANGLE
                    && !self.tris[n as usize].bad
                    && self.circumcircle_contains(n, p)
                {
                    self.tris[n as usize].bad = true;
                    cavity.push(n);
                    queue.push_back(n);
                }
            }
        }
        cavity
    }

    /// Edges of cavity triangles whose far side is outside the cavity, each
    /// in the canonical order given by the opposite-vertex convention.
    fn boundary_edges(&self, cavity: &[u32]) -> Vec<BoundaryEdge> {
        let mut edges = Vec::with_capacity(cavity.len() + 2);
        for &t in cavity {
            let tri = &self.tris[t as usize];
            for i in 0..3 {
                let n = tri.neighbors[i];
                if n == NO_TRIANGLE || !self.tris[n as usize].bad {
                    edges.push(BoundaryEdge {
                        u: tri.verts[(i + 1) % 3],
                        v: tri.verts[(i + 2) % 3],
                        outer: n,
                        old_tri: t,
                    });
                }
            }
        }
        edges
    }

    /// Strict circumcircle containment in the XZ plane, biased so borderline
    /// (cocircular) points stay outside.
    fn circumcircle_contains(&self, t: u32, p: DVec3) -> bool {
        let [a, b, c] = self.tris[t as usize]
            .verts
            .map(|v| self.positions[v as usize]);

        let d = 2.0 * (a.x * (b.z - c.z) + b.x * (c.z - a.z) + c.x * (a.z - b.z));
        if d.abs() < DEGENERATE_EPSILON {
            return false;
        }

        let a2 = a.x * a.x + a.z * a.z;
        let b2 = b.x * b.x + b.z * b.z;
        let c2 = c.x * c.x + c.z * c.z;
        let ux = (a2 * (b.z - c.z) + b2 * (c.z - a.z) + c2 * (a.z - b.z)) / d;
        let uz = (a2 * (c.x - b.x) + b2 * (a.x - c.x) + c2 * (b.x - a.x)) / d;

        let r_sq = (ux - a.x) * (ux - a.x) + (uz - a.z) * (uz - a.z);
        let d_sq = (ux - p.x) * (ux - p.x) + (uz - p.z) * (uz - p.z);
        d_sq < r_sq - CONTAINMENT_EPSILON
    }

    /// Drop cavity scratch and super-triangle remnants, compact the arena,
    /// and remap neighbor handles into the output mesh.
    fn finish(self, vertices: Vec<Vertex>) -> TerrainMesh {
        let keep: Vec<u32> = (0..self.tris.len() as u32)
            .filter(|&t| {
                let tri = &self.tris[t as usize];
                !tri.bad && tri.verts.iter().all(|&v| v < self.real_count)
            })
            .collect();

        let mut remap = vec![NO_TRIANGLE; self.tris.len()];
        for (new_idx, &old_idx) in keep.iter().enumerate() {
            remap[old_idx as usize] = new_idx as u32;
        }

        let triangles = keep
            .iter()
            .map(|&old_idx| {
                let tri = &self.tris[old_idx as usize];
                let neighbors = tri.neighbors.map(|n| {
                    if n == NO_TRIANGLE {
                        NO_TRIANGLE
                    } else {
                        remap[n as usize]
                    }
                });
                let positions = tri.verts.map(|v| self.positions[v as usize]);
                Triangle::new(tri.verts, neighbors, positions)
            })
            .collect();

        TerrainMesh {
            vertices,
            triangles,
        }
    }
}

/// Doubled signed area of (a, b, p) in the XZ plane; positive when `p` is
/// strictly to the right of the directed edge a->b under the mesher's
/// winding.
#[inline]
fn orient(a: DVec3, b: DVec3, p: DVec3) -> f64 {
    (b.x - a.x) * (p.z - a.z) - (b.z - a.z) * (p.x - a.x)
}
