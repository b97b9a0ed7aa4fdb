use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A point in the vehicle's fixed world frame (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    /// Create a new point.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// The world origin.
    pub fn origin() -> Self {
        Self::default()
    }

    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance(self, other: Self) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Copy of this point with `z` replaced.
    pub fn with_z(self, z: f32) -> Self {
        Self::new(self.x, self.y, z)
    }

    /// Largest of the three components.
    pub fn max_component(self) -> f32 {
        self.x.max(self.y).max(self.z)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Point3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<Point3> for [f32; 3] {
    fn from(p: Point3) -> Self {
        [p.x, p.y, p.z]
    }
}

/// A surface sample carried through the planning environment.
///
/// Besides its position every point carries three semantic tags:
///
/// - `age` – density proxy used by novelty detection.  Points that have
///   been seen before are tagged [`SurfacePoint::AGE_OLD`], fresh points
///   [`SurfacePoint::AGE_NEW`]; voxel downsampling averages the tag so a
///   merged voxel's age tells how much of its mass came from old points.
/// - `covered` – coverage flag.  Once set it is never cleared while the
///   point stays in the active planning window.
/// - `cluster_id` – frontier cluster membership, `None` outside frontier
///   clouds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SurfacePoint {
    pub position: Point3,
    pub age: u8,
    pub covered: bool,
    pub cluster_id: Option<u32>,
}

impl SurfacePoint {
    /// Age tag of a point observed for the first time.
    pub const AGE_NEW: u8 = 0;
    /// Age tag of a point already resident in the stacked cloud.
    pub const AGE_OLD: u8 = 255;

    /// Create an untagged point (new, uncovered, unclustered).
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self::at(Point3::new(x, y, z))
    }

    /// Create an untagged point at `position`.
    pub fn at(position: Point3) -> Self {
        Self {
            position,
            age: Self::AGE_NEW,
            covered: false,
            cluster_id: None,
        }
    }

    /// Reset every tag to its canonical "new" value.
    pub fn reset_tags(&mut self) {
        self.age = Self::AGE_NEW;
        self.covered = false;
        self.cluster_id = None;
    }

    /// Copy of this point with every tag reset.
    pub fn untagged(self) -> Self {
        Self::at(self.position)
    }
}

impl From<Point3> for SurfacePoint {
    fn from(position: Point3) -> Self {
        Self::at(position)
    }
}

/// One keypose sweep: the points accumulated by the sensor between two
/// planning keyposes.  Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    points: Vec<SurfacePoint>,
}

impl Sweep {
    pub fn new(points: Vec<SurfacePoint>) -> Self {
        Self { points }
    }

    /// Build a sweep of untagged points from raw positions.
    pub fn from_positions(positions: impl IntoIterator<Item = Point3>) -> Self {
        Self::new(positions.into_iter().map(SurfacePoint::at).collect())
    }

    pub fn points(&self) -> &[SurfacePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<SurfacePoint> {
        self.points
    }
}

impl FromIterator<SurfacePoint> for Sweep {
    fn from_iter<I: IntoIterator<Item = SurfacePoint>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// The ordered stages of one planning-environment update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    RobotPosition,
    SweepIngest,
    Coverage,
    CollisionRebuild,
    FrontierRefresh,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RobotPosition => "robot position update",
            Stage::SweepIngest => "sweep ingestion",
            Stage::Coverage => "coverage marking",
            Stage::CollisionRebuild => "collision index rebuild",
            Stage::FrontierRefresh => "frontier refresh",
        };
        f.write_str(name)
    }
}

/// Errors raised by the planning environment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CartosError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stage order violated: {stage} requires {requires} first")]
    StageOrder { stage: Stage, requires: Stage },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_point_is_new_and_uncovered() {
        let p = SurfacePoint::new(1.0, 2.0, 3.0);
        assert_eq!(p.age, SurfacePoint::AGE_NEW);
        assert!(!p.covered);
        assert_eq!(p.cluster_id, None);
    }

    #[test]
    fn reset_tags_clears_every_tag() {
        let mut p = SurfacePoint {
            position: Point3::new(0.0, 0.0, 1.0),
            age: 200,
            covered: true,
            cluster_id: Some(4),
        };
        p.reset_tags();
        assert_eq!(p, SurfacePoint::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(3.0, 4.0, 12.0);
        assert!((a.distance(b) - 13.0).abs() < 1e-5);
        assert!((a.distance_squared(b) - 169.0).abs() < 1e-3);
    }

    #[test]
    fn max_component_picks_largest_axis() {
        assert_eq!(Point3::new(0.1, 0.3, 0.2).max_component(), 0.3);
    }

    #[test]
    fn sweep_from_positions_keeps_order() {
        let sweep = Sweep::from_positions([Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)]);
        assert_eq!(sweep.len(), 2);
        assert_eq!(sweep.points()[1].position.x, 2.0);
        assert!(!sweep.is_empty());
    }

    #[test]
    fn surface_point_serialization_keeps_tags() {
        let p = SurfacePoint {
            position: Point3::new(1.0, -1.0, 0.5),
            age: 127,
            covered: true,
            cluster_id: Some(2),
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: SurfacePoint = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn stage_order_error_display() {
        let err = CartosError::StageOrder {
            stage: Stage::SweepIngest,
            requires: Stage::RobotPosition,
        };
        let msg = err.to_string();
        assert!(msg.contains("sweep ingestion"));
        assert!(msg.contains("robot position update"));
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::RobotPosition < Stage::SweepIngest);
        assert!(Stage::Coverage < Stage::CollisionRebuild);
        assert!(Stage::CollisionRebuild < Stage::FrontierRefresh);
    }
}
