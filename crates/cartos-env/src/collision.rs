//! Point-in-collision queries against stacked obstacle geometry.
//!
//! The index is rebuilt wholesale from the collision cloud every cycle: the
//! new tree is built off to the side and swapped in, so a query never sees a
//! half-built index.
//!
//! # Missing geometry
//!
//! With no obstacle points at all, [`CollisionIndex::in_collision`] answers
//! `false` and logs a warning.  This is a safety-relevant policy: an empty
//! obstacle map is treated as free space.

use cartos_perception::Octree;
use cartos_types::{Point3, SurfacePoint};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct CollisionIndex {
    radius: f32,
    point_threshold: usize,
    obstacles: Vec<SurfacePoint>,
    tree: Octree,
}

impl CollisionIndex {
    pub fn new(radius: f32, point_threshold: usize) -> Self {
        Self {
            radius,
            point_threshold,
            obstacles: Vec::new(),
            tree: Octree::from_points(std::iter::empty()),
        }
    }

    /// Replace the indexed obstacle cloud.
    pub fn rebuild(&mut self, obstacles: Vec<SurfacePoint>) {
        let tree = Octree::from_points(obstacles.iter().map(|p| p.position));
        debug!(points = obstacles.len(), "collision index rebuilt");
        self.tree = tree;
        self.obstacles = obstacles;
    }

    /// True when strictly more than the point threshold of obstacle points
    /// lie within the check radius of `query`.
    pub fn in_collision(&self, query: Point3) -> bool {
        if self.obstacles.is_empty() {
            warn!(?query, "collision check against empty obstacle cloud; assuming free");
            return false;
        }
        self.tree.count_within(query, self.radius) > self.point_threshold
    }

    pub fn obstacles(&self) -> &[SurfacePoint] {
        &self.obstacles
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn point_threshold(&self) -> usize {
        self.point_threshold
    }
}
