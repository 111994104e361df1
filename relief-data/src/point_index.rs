//! Grid-based point index enforcing a minimum 3D spacing on insertion.
//!
//! Divides space into cells of `4 x min_spacing`. A candidate only needs to
//! be compared against points in its own cell and the 26 neighbors (3x3x3
//! cube): anything within `min_spacing` of the candidate must land in that
//! neighborhood, so the scan is exhaustive and O(1) expected per insert.

use crate::types::Vertex;
use glam::DVec3;
use hashbrown::HashMap;

/// Incremental spatial index over a master vertex list.
///
/// The index owns the master list; accepted vertices are appended in
/// insertion order and never move, so `u32` handles into it stay stable.
pub struct PointIndex {
    cells: HashMap<(i64, i64, i64), Vec<u32>>,
    points: Vec<Vertex>,
    cell_size: f64,
    min_spacing_sq: f64,
}

impl PointIndex {
    /// Create an empty index with the given minimum spacing.
    pub fn new(min_spacing: f64) -> Self {
        Self {
            cells: HashMap::new(),
            points: Vec::new(),
            cell_size: min_spacing * 4.0,
            min_spacing_sq: min_spacing * min_spacing,
        }
    }

    /// Build an index from points that already satisfy the spacing rule.
    ///
    /// Every point is registered without distance checks; use this when
    /// reloading a previously deduplicated database.
    pub fn from_existing(points: Vec<Vertex>, min_spacing: f64) -> Self {
        let mut index = Self::new(min_spacing);
        for (i, point) in points.iter().enumerate() {
            let key = index.cell_coords(point.position);
            index.cells.entry(key).or_default().push(i as u32);
        }
        index.points = points;
        index
    }

    #[inline]
    fn cell_coords(&self, p: DVec3) -> (i64, i64, i64) {
        let discretize = |v: f64| (v / self.cell_size).floor() as i64;
        (discretize(p.x), discretize(p.y), discretize(p.z))
    }

    /// Check the 3x3x3 neighborhood for any point within the spacing.
    fn has_neighbor_within_spacing(&self, p: DVec3) -> bool {
        let (cx, cy, cz) = self.cell_coords(p);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(handles) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) {
                        for &h in handles {
                            let existing = self.points[h as usize].position;
                            if existing.distance_squared(p) < self.min_spacing_sq {
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    /// Insert `candidate` unless an accepted point is already within the
    /// minimum spacing. First-seen wins. Returns whether it was accepted.
    pub fn try_add(&mut self, candidate: Vertex) -> bool {
        if self.has_neighbor_within_spacing(candidate.position) {
            return false;
        }
        let handle = self.points.len() as u32;
        let key = self.cell_coords(candidate.position);
        self.points.push(candidate);
        self.cells.entry(key).or_default().push(handle);
        true
    }

    /// Sequentially `try_add` a batch; returns how many were accepted.
    pub fn add_range(&mut self, batch: impl IntoIterator<Item = Vertex>) -> usize {
        batch.into_iter().filter(|&v| self.try_add(v)).count()
    }

    /// The master list of accepted points, in insertion order.
    pub fn points(&self) -> &[Vertex] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Consume the index, keeping only the master list.
    pub fn into_points(self) -> Vec<Vertex> {
        self.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f64, y: f64, z: f64) -> Vertex {
        Vertex::new(DVec3::new(x, y, z), DVec3::Y)
    }

    #[test]
    fn test_rejects_within_spacing() {
        let mut index = PointIndex::new(0.01);
        assert!(index.try_add(vertex(0.0, 0.0, 0.0)));
        assert!(!index.try_add(vertex(0.005, 0.0, 0.0)));
        assert!(index.try_add(vertex(1.0, 0.0, 0.0)));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_first_seen_wins() {
        let mut index = PointIndex::new(0.5);
        assert!(index.try_add(vertex(0.0, 0.0, 0.0)));
        assert!(!index.try_add(vertex(0.1, 0.0, 0.0)));
        assert_eq!(index.points()[0].position, DVec3::ZERO);
    }

    #[test]
    fn test_spacing_enforced_in_3d() {
        let mut index = PointIndex::new(0.1);
        assert!(index.try_add(vertex(0.0, 0.0, 0.0)));
        // Just under the spacing along the diagonal.
        assert!(!index.try_add(vertex(0.05, 0.05, 0.05)));
        // Just over it.
        assert!(index.try_add(vertex(0.06, 0.06, 0.06)));
    }

    #[test]
    fn test_cell_boundary_neighbors_checked() {
        // Points in adjacent cells but within spacing must still collide.
        let mut index = PointIndex::new(0.1);
        let cell = 0.4;
        assert!(index.try_add(vertex(cell - 0.01, 0.0, 0.0)));
        assert!(!index.try_add(vertex(cell + 0.01, 0.0, 0.0)));
    }

    #[test]
    fn test_spacing_invariant_over_batch() {
        let mut index = PointIndex::new(0.25);
        let mut batch = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                batch.push(vertex(f64::from(i) * 0.1, 0.0, f64::from(j) * 0.1));
            }
        }
        index.add_range(batch);

        let points = index.points();
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                assert!(
                    a.position.distance(b.position) >= 0.25,
                    "accepted points too close: {:?} vs {:?}",
                    a.position,
                    b.position
                );
            }
        }
    }

    #[test]
    fn test_well_separated_batch_order_independent() {
        // All pairwise distances >= 2x spacing: every order accepts them all.
        let spacing = 0.1;
        let batch = vec![
            vertex(0.0, 0.0, 0.0),
            vertex(0.3, 0.0, 0.0),
            vertex(0.0, 0.3, 0.0),
            vertex(0.0, 0.0, 0.3),
            vertex(0.3, 0.3, 0.3),
        ];

        let mut forward = PointIndex::new(spacing);
        assert_eq!(forward.add_range(batch.clone()), batch.len());

        let mut reversed = PointIndex::new(spacing);
        assert_eq!(
            reversed.add_range(batch.iter().rev().copied()),
            batch.len()
        );
    }

    #[test]
    fn test_from_existing_skips_checks_but_indexes() {
        // Bulk load trusts the input, then rejects new points near any of it.
        let points = vec![vertex(0.0, 0.0, 0.0), vertex(1.0, 0.0, 0.0)];
        let mut index = PointIndex::from_existing(points, 0.1);
        assert_eq!(index.len(), 2);
        assert!(!index.try_add(vertex(1.05, 0.0, 0.0)));
        assert!(index.try_add(vertex(2.0, 0.0, 0.0)));
    }
}
