//! Binary point database: load, save, and the on-disk layout.
//!
//! The format is a fixed little-endian layout: an `i32` version tag (= 1),
//! an `i32` point count followed by six `f64` per point (position, normal),
//! then an `i32` ray count followed by six `f64` per ray (start, end).
//! A round trip reproduces the lists bit for bit, in order.

use crate::types::{Ray, Vertex};
use glam::DVec3;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// On-disk format version this build reads and writes.
pub const DB_VERSION: i32 = 1;

/// Errors that can occur while loading or saving a database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Unsupported database version {0} (expected {DB_VERSION})")]
    UnsupportedVersion(i32),

    #[error("Database file is truncated at byte {0}")]
    Truncated(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The persisted sample set: accepted hit points and miss rays.
#[derive(Debug, Clone, Default)]
pub struct Database {
    pub points: Vec<Vertex>,
    pub rays: Vec<Ray>,
}

impl Database {
    pub fn new(points: Vec<Vertex>, rays: Vec<Ray>) -> Self {
        Self { points, rays }
    }

    /// Load a database from `path`.
    ///
    /// A missing file is not an error; it loads as an empty database so a
    /// first run can start from nothing.
    pub fn load(path: &Path) -> Result<Self, DatabaseError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No database at {}, starting empty", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut cursor = Cursor::new(&bytes);
        let version = cursor.read_i32()?;
        if version != DB_VERSION {
            return Err(DatabaseError::UnsupportedVersion(version));
        }

        let point_count = cursor.read_i32()?.max(0) as usize;
        let mut points = Vec::with_capacity(point_count);
        for _ in 0..point_count {
            let position = cursor.read_dvec3()?;
            let normal = cursor.read_dvec3()?;
            points.push(Vertex::new(position, normal));
        }

        let ray_count = cursor.read_i32()?.max(0) as usize;
        let mut rays = Vec::with_capacity(ray_count);
        for _ in 0..ray_count {
            let start = cursor.read_dvec3()?;
            let end = cursor.read_dvec3()?;
            rays.push(Ray::new(start, end));
        }

        debug!(
            "Loaded database {}: {} points, {} rays",
            path.display(),
            points.len(),
            rays.len()
        );
        Ok(Self { points, rays })
    }

    /// Save point and ray lists to `path` atomically.
    ///
    /// The payload is written to a `<path>.tmp` sibling and renamed over the
    /// destination, so a concurrent reader never sees a torn file. When the
    /// rename fails (some filesystems refuse to replace), the destination is
    /// deleted and the rename retried.
    pub fn save(path: &Path, points: &[Vertex], rays: &[Ray]) -> Result<(), DatabaseError> {
        let mut bytes = Vec::with_capacity(12 + 48 * (points.len() + rays.len()));
        write_i32(&mut bytes, DB_VERSION);
        write_i32(&mut bytes, points.len() as i32);
        for point in points {
            write_dvec3(&mut bytes, point.position);
            write_dvec3(&mut bytes, point.normal);
        }
        write_i32(&mut bytes, rays.len() as i32);
        for ray in rays {
            write_dvec3(&mut bytes, ray.start);
            write_dvec3(&mut bytes, ray.end);
        }

        let tmp = tmp_path(path);
        fs::write(&tmp, &bytes)?;
        if let Err(rename_err) = fs::rename(&tmp, path) {
            warn!(
                "Replace of {} failed ({}), retrying with delete",
                path.display(),
                rename_err
            );
            let _ = fs::remove_file(path);
            fs::rename(&tmp, path)?;
        }

        debug!(
            "Saved database {}: {} points, {} rays",
            path.display(),
            points.len(),
            rays.len()
        );
        Ok(())
    }

    /// Save this database's lists to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), DatabaseError> {
        Self::save(path, &self.points, &self.rays)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_dvec3(out: &mut Vec<u8>, v: DVec3) {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DatabaseError> {
        let end = self.offset + len;
        if end > self.bytes.len() {
            return Err(DatabaseError::Truncated(self.offset));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, DatabaseError> {
        let slice = self.take(4)?;
        Ok(i32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64, DatabaseError> {
        let slice = self.take(8)?;
        Ok(f64::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_dvec3(&mut self) -> Result<DVec3, DatabaseError> {
        Ok(DVec3::new(
            self.read_f64()?,
            self.read_f64()?,
            self.read_f64()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scratch_path(tag: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "relief_db_test_{}_{}_{}.bin",
            tag,
            std::process::id(),
            n
        ))
    }

    #[test]
    fn test_round_trip_bit_identical() {
        let points = vec![
            Vertex::new(DVec3::new(12.345, -6.7, 8.9), DVec3::new(0.0, 1.0, 0.0)),
            Vertex::new(DVec3::new(-0.1, 0.25, 1e9), DVec3::new(0.3, -0.4, 0.5)),
            // Values without an exact decimal representation survive too.
            Vertex::new(DVec3::splat(1.0 / 3.0), DVec3::splat(-2.0 / 7.0)),
        ];
        let rays = vec![Ray::new(DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0))];

        let path = scratch_path("round_trip");
        Database::save(&path, &points, &rays).unwrap();
        let loaded = Database::load(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(loaded.points.len(), points.len());
        for (got, want) in loaded.points.iter().zip(&points) {
            assert_eq!(got.position.x.to_bits(), want.position.x.to_bits());
            assert_eq!(got.position.y.to_bits(), want.position.y.to_bits());
            assert_eq!(got.position.z.to_bits(), want.position.z.to_bits());
            assert_eq!(got.normal.x.to_bits(), want.normal.x.to_bits());
            assert_eq!(got.normal.y.to_bits(), want.normal.y.to_bits());
            assert_eq!(got.normal.z.to_bits(), want.normal.z.to_bits());
        }
        assert_eq!(loaded.rays, rays);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let path = scratch_path("missing");
        let db = Database::load(&path).unwrap();
        assert!(db.points.is_empty());
        assert!(db.rays.is_empty());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let path = scratch_path("version");
        let mut bytes = Vec::new();
        write_i32(&mut bytes, 99);
        write_i32(&mut bytes, 0);
        write_i32(&mut bytes, 0);
        fs::write(&path, &bytes).unwrap();

        let err = Database::load(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        match err {
            DatabaseError::UnsupportedVersion(v) => assert_eq!(v, 99),
            other => panic!("expected version error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_file_rejected() {
        let path = scratch_path("truncated");
        let points = vec![Vertex::new(DVec3::ONE, DVec3::Y)];
        Database::save(&path, &points, &[]).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 7);
        fs::write(&path, &bytes).unwrap();

        let err = Database::load(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(matches!(err, DatabaseError::Truncated(_)));
    }

    #[test]
    fn test_save_replaces_existing() {
        let path = scratch_path("replace");
        Database::save(&path, &[Vertex::new(DVec3::ZERO, DVec3::Y)], &[]).unwrap();
        Database::save(&path, &[], &[Ray::new(DVec3::ZERO, DVec3::X)]).unwrap();

        let db = Database::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(db.points.is_empty());
        assert_eq!(db.rays.len(), 1);
        // No temp sibling left behind.
        assert!(!tmp_path(&path).exists());
    }
}
