//! Vertical-surface extraction.
//!
//! Keeps the points that belong to near-vertical structure (walls, poles,
//! frontier faces) and drops flat ground and ceilings.  Each point is
//! projected onto the ground plane and its neighbours within
//! `radius_threshold` are gathered; the point survives when there are at
//! least `neighbor_threshold` of them and their original heights span a range
//! strictly between `z_diff_min` and `z_diff_max`.
//!
//! The same filter runs with two parameter sets: fixed thresholds for
//! keypose clouds, and thresholds scaled from the occupancy-grid resolution
//! for frontier voxels (see [`VerticalSurfaceExtractor::for_grid_resolution`]).

use cartos_types::{Point3, SurfacePoint};

use crate::octree::Octree;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalSurfaceExtractor {
    pub radius_threshold: f32,
    pub z_diff_min: f32,
    pub z_diff_max: f32,
    pub neighbor_threshold: usize,
    /// Optional absolute height band; points outside it are never kept.
    pub z_band: Option<(f32, f32)>,
}

impl Default for VerticalSurfaceExtractor {
    fn default() -> Self {
        Self {
            radius_threshold: 0.2,
            z_diff_min: 0.2,
            z_diff_max: 2.0,
            neighbor_threshold: 2,
            z_band: None,
        }
    }
}

impl VerticalSurfaceExtractor {
    pub fn new(
        radius_threshold: f32,
        z_diff_min: f32,
        z_diff_max: f32,
        neighbor_threshold: usize,
    ) -> Self {
        Self {
            radius_threshold,
            z_diff_min,
            z_diff_max,
            neighbor_threshold,
            z_band: None,
        }
    }

    /// Thresholds for coarse grid voxels: the radius is the largest cell
    /// dimension and the height window spans one to five radii.
    pub fn for_grid_resolution(resolution: Point3) -> Self {
        let radius = resolution.max_component();
        Self::new(radius, radius, radius * 5.0, 2)
    }

    pub fn with_z_band(mut self, z_min: f32, z_max: f32) -> Self {
        self.z_band = Some((z_min, z_max));
        self
    }

    /// Return the subset of `cloud` lying on vertical structure, in input
    /// order.
    pub fn extract(&self, cloud: &[SurfacePoint]) -> Vec<SurfacePoint> {
        if cloud.is_empty() {
            return Vec::new();
        }

        let flat = Octree::from_points(cloud.iter().map(|p| p.position.with_z(0.0)));
        cloud
            .iter()
            .filter(|p| self.keeps(p, cloud, &flat))
            .copied()
            .collect()
    }

    fn keeps(&self, p: &SurfacePoint, cloud: &[SurfacePoint], flat: &Octree) -> bool {
        if let Some((z_min, z_max)) = self.z_band
            && (p.position.z < z_min || p.position.z > z_max)
        {
            return false;
        }

        let neighbours = flat.radius_search(p.position.with_z(0.0), self.radius_threshold);
        if neighbours.len() < self.neighbor_threshold {
            return false;
        }

        let (lo, hi) = neighbours
            .iter()
            .map(|&i| cloud[i].position.z)
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), z| (lo.min(z), hi.max(z)));
        let span = hi - lo;
        span > self.z_diff_min && span < self.z_diff_max
    }
}
