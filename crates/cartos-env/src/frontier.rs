//! Frontier extraction and clustering.
//!
//! 1. Query the occupancy grid for frontier voxels in a box around the robot.
//! 2. Keep near-vertical structure, with filter thresholds scaled from the
//!    grid resolution.
//! 3. Cluster by Euclidean proximity, drop clusters outside the size bounds
//!    and label the survivors with sequential cluster ids (largest cluster
//!    gets id 0).

use cartos_perception::{EuclideanClusterer, VerticalSurfaceExtractor};
use cartos_types::{Point3, SurfacePoint};
use tracing::{debug, warn};

use crate::collaborators::OccupancyGrid;
use crate::config::FrontierConfig;

#[derive(Debug, Clone)]
pub struct FrontierExtractor {
    clusterer: EuclideanClusterer,
    half_extents: Point3,
    frontier: Vec<SurfacePoint>,
    filtered: Vec<SurfacePoint>,
    cluster_count: usize,
}

impl FrontierExtractor {
    pub fn new(config: &FrontierConfig) -> Self {
        Self {
            clusterer: EuclideanClusterer::new(config.cluster_tolerance)
                .with_size_bounds(config.min_cluster_size, config.max_cluster_size),
            half_extents: config.half_extents(),
            frontier: Vec::new(),
            filtered: Vec::new(),
            cluster_count: 0,
        }
    }

    /// Rebuild the frontier clouds around `robot`.  Returns the number of
    /// clusters kept.
    pub fn refresh(&mut self, grid: &dyn OccupancyGrid, robot: Point3) -> usize {
        self.frontier = grid.query_frontier(robot, self.half_extents);
        self.filtered.clear();
        self.cluster_count = 0;

        if self.frontier.is_empty() {
            debug!("no frontier voxels around robot");
            return 0;
        }

        let vertical = VerticalSurfaceExtractor::for_grid_resolution(grid.resolution())
            .extract(&self.frontier);
        if vertical.is_empty() {
            warn!(raw = self.frontier.len(), "frontier filter left no points; clustering skipped");
            return 0;
        }

        let positions: Vec<Point3> = vertical.iter().map(|p| p.position).collect();
        let clusters = self.clusterer.extract(&positions);
        for (id, members) in clusters.iter().enumerate() {
            let id = id as u32;
            self.filtered.extend(members.iter().map(|&i| SurfacePoint {
                cluster_id: Some(id),
                ..vertical[i]
            }));
        }
        self.cluster_count = clusters.len();

        debug!(
            raw = self.frontier.len(),
            vertical = vertical.len(),
            clusters = self.cluster_count,
            kept = self.filtered.len(),
            "frontier refreshed"
        );
        self.cluster_count
    }

    /// Frontier voxels returned by the last query, unfiltered.
    pub fn frontier(&self) -> &[SurfacePoint] {
        &self.frontier
    }

    /// Clustered frontier points, each carrying its cluster id.
    pub fn filtered(&self) -> &[SurfacePoint] {
        &self.filtered
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn clear(&mut self) {
        self.frontier.clear();
        self.filtered.clear();
        self.cluster_count = 0;
    }
}
