//! Voxel-grid downsampling.
//!
//! Space is cut into cubes of edge `leaf_size` (indexed by flooring each
//! coordinate); all points falling into one cube are replaced by a single
//! point at their centroid.  The tags are merged as well:
//!
//! - `age` becomes the truncated arithmetic mean of the contributors' ages.
//!   Novelty detection relies on this: a voxel holding mostly old (255)
//!   points stays high, a voxel holding mostly new (0) points drops low.
//! - `covered` is set when any contributor was covered.
//! - `cluster_id` is dropped.
//!
//! Output order is deterministic (ascending voxel key).
//!
//! # Example
//!
//! ```rust
//! use cartos_perception::voxel::VoxelDownsampler;
//! use cartos_types::SurfacePoint;
//!
//! let mut old = SurfacePoint::new(0.05, 0.05, 0.05);
//! old.age = SurfacePoint::AGE_OLD;
//! let new = SurfacePoint::new(0.15, 0.05, 0.05);
//!
//! let merged = VoxelDownsampler::new(1.0).downsample(&[old, new]);
//! assert_eq!(merged.len(), 1);
//! assert_eq!(merged[0].age, 127);
//! ```

use std::collections::BTreeMap;

use cartos_types::{Point3, SurfacePoint};
use tracing::warn;

/// Voxel-grid filter with a cubic leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelDownsampler {
    leaf_size: f32,
}

#[derive(Default)]
struct VoxelAccumulator {
    sum_x: f64,
    sum_y: f64,
    sum_z: f64,
    age_sum: u64,
    count: u64,
    covered: bool,
}

impl VoxelAccumulator {
    fn add(&mut self, p: &SurfacePoint) {
        self.sum_x += f64::from(p.position.x);
        self.sum_y += f64::from(p.position.y);
        self.sum_z += f64::from(p.position.z);
        self.age_sum += u64::from(p.age);
        self.count += 1;
        self.covered |= p.covered;
    }

    fn finish(self) -> SurfacePoint {
        let n = self.count as f64;
        SurfacePoint {
            position: Point3::new(
                (self.sum_x / n) as f32,
                (self.sum_y / n) as f32,
                (self.sum_z / n) as f32,
            ),
            // Mean of u8 values never exceeds u8::MAX.
            age: (self.age_sum / self.count) as u8,
            covered: self.covered,
            cluster_id: None,
        }
    }
}

impl VoxelDownsampler {
    pub fn new(leaf_size: f32) -> Self {
        Self { leaf_size }
    }

    pub fn leaf_size(&self) -> f32 {
        self.leaf_size
    }

    /// Downsample `points` into one point per occupied voxel.
    ///
    /// A non-positive or non-finite leaf size disables the filter: the input
    /// is returned unchanged (with a warning).  Non-finite points are dropped.
    pub fn downsample(&self, points: &[SurfacePoint]) -> Vec<SurfacePoint> {
        if !(self.leaf_size.is_finite() && self.leaf_size > 0.0) {
            warn!(leaf_size = self.leaf_size, "invalid voxel leaf size; cloud left unfiltered");
            return points.to_vec();
        }

        let mut voxels: BTreeMap<(i64, i64, i64), VoxelAccumulator> = BTreeMap::new();
        for p in points.iter().filter(|p| p.position.is_finite()) {
            voxels.entry(self.key(p.position)).or_default().add(p);
        }
        voxels.into_values().map(VoxelAccumulator::finish).collect()
    }

    fn key(&self, p: Point3) -> (i64, i64, i64) {
        let inv = 1.0 / f64::from(self.leaf_size);
        (
            (f64::from(p.x) * inv).floor() as i64,
            (f64::from(p.y) * inv).floor() as i64,
            (f64::from(p.z) * inv).floor() as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aged(x: f32, y: f32, z: f32, age: u8) -> SurfacePoint {
        SurfacePoint {
            age,
            ..SurfacePoint::new(x, y, z)
        }
    }

    #[test]
    fn points_in_one_voxel_merge_to_centroid() {
        let out = VoxelDownsampler::new(1.0).downsample(&[
            SurfacePoint::new(0.2, 0.2, 0.2),
            SurfacePoint::new(0.4, 0.6, 0.8),
        ]);
        assert_eq!(out.len(), 1);
        assert!((out[0].position.x - 0.3).abs() < 1e-6);
        assert!((out[0].position.y - 0.4).abs() < 1e-6);
        assert!((out[0].position.z - 0.5).abs() < 1e-6);
    }

    #[test]
    fn points_in_distinct_voxels_stay_separate() {
        let out = VoxelDownsampler::new(0.5).downsample(&[
            SurfacePoint::new(0.1, 0.0, 0.0),
            SurfacePoint::new(1.1, 0.0, 0.0),
            SurfacePoint::new(-0.1, 0.0, 0.0),
        ]);
        assert_eq!(out.len(), 3);
        // Ascending voxel key order.
        assert!(out[0].position.x < out[1].position.x);
        assert!(out[1].position.x < out[2].position.x);
    }

    #[test]
    fn age_is_truncated_mean() {
        let out = VoxelDownsampler::new(1.0).downsample(&[
            aged(0.1, 0.1, 0.1, 255),
            aged(0.2, 0.1, 0.1, 255),
            aged(0.3, 0.1, 0.1, 255),
            aged(0.4, 0.1, 0.1, 255),
            aged(0.5, 0.1, 0.1, 0),
        ]);
        assert_eq!(out[0].age, 204);
    }

    #[test]
    fn covered_survives_when_any_contributor_covered() {
        let mut covered = SurfacePoint::new(0.1, 0.1, 0.1);
        covered.covered = true;
        let out =
            VoxelDownsampler::new(1.0).downsample(&[covered, SurfacePoint::new(0.2, 0.2, 0.2)]);
        assert!(out[0].covered);
    }

    #[test]
    fn cluster_ids_are_dropped() {
        let mut p = SurfacePoint::new(0.1, 0.1, 0.1);
        p.cluster_id = Some(3);
        let out = VoxelDownsampler::new(1.0).downsample(&[p]);
        assert_eq!(out[0].cluster_id, None);
    }

    #[test]
    fn invalid_leaf_size_passes_cloud_through() {
        let pts = [SurfacePoint::new(0.1, 0.0, 0.0), SurfacePoint::new(0.11, 0.0, 0.0)];
        assert_eq!(VoxelDownsampler::new(0.0).downsample(&pts), pts.to_vec());
        assert_eq!(VoxelDownsampler::new(f32::NAN).downsample(&pts), pts.to_vec());
    }

    #[test]
    fn empty_cloud_yields_empty_cloud() {
        assert!(VoxelDownsampler::new(0.2).downsample(&[]).is_empty());
    }
}
