//! The planning environment facade.
//!
//! [`PlanningEnv`] owns every cloud stack, spatial index and derived cloud,
//! and sequences the per-cycle stages:
//!
//! ```text
//! robot position ──► sweep ingestion ──► coverage ──► collision ──► frontier
//!   (roll windows)    (stacks, diff,      (flags,      (index        (query,
//!                      planner cloud)      dilation)    rebuild)      cluster)
//! ```
//!
//! Collaborators (grid store, occupancy grid, viewpoint manager, sensor) are
//! borrowed per call, never owned.  [`PlanningEnv::run_cycle`] runs the whole
//! pipeline in order; the granular entry points exist for callers that
//! interleave their own work between stages.
//!
//! # Example
//!
//! ```rust
//! use cartos_env::config::EnvConfig;
//! use cartos_env::env::{MapBackends, PlanningEnv};
//! use cartos_env::sim::{SimGridStore, SimOccupancyGrid};
//! use cartos_types::{Point3, Sweep};
//!
//! let mut env = PlanningEnv::new(EnvConfig::default()).unwrap();
//! let mut grid = SimGridStore::new(10.0, 2);
//! let mut occupancy = SimOccupancyGrid::new(Point3::new(0.3, 0.3, 0.3));
//!
//! let mut maps = MapBackends::new(&mut grid, &mut occupancy);
//! env.update_robot_position(Point3::origin(), &mut maps);
//! let sweep = Sweep::from_positions([Point3::new(1.0, 0.0, 0.0)]);
//! env.ingest_keypose_cloud(&sweep, &mut maps).unwrap();
//! assert_eq!(env.diff_cloud().len(), 1);
//! ```

use cartos_perception::{VerticalSurfaceExtractor, VoxelDownsampler};
use cartos_types::{CartosError, Point3, Stage, SurfacePoint, Sweep};
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{GridStore, OccupancyGrid, SensorModel, ViewpointManager};
use crate::collision::CollisionIndex;
use crate::config::EnvConfig;
use crate::coverage::{CoverageTracker, CoverageUpdate, UncoveredPoint};
use crate::frontier::FrontierExtractor;
use crate::novelty::NoveltyDetector;
use crate::stack::CloudStack;

// ─────────────────────────────────────────────────────────────────────────────
// Call-scoped collaborators and reports
// ─────────────────────────────────────────────────────────────────────────────

/// The two map collaborators whose windows follow the robot.
pub struct MapBackends<'a> {
    pub grid: &'a mut dyn GridStore,
    pub occupancy: &'a mut dyn OccupancyGrid,
}

impl<'a> MapBackends<'a> {
    pub fn new(grid: &'a mut dyn GridStore, occupancy: &'a mut dyn OccupancyGrid) -> Self {
        Self { grid, occupancy }
    }
}

/// Per-sweep statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub sweep_points: usize,
    pub vertical_points: usize,
    pub planner_points: usize,
    pub novel_points: usize,
    pub obstacle_points: usize,
    pub frontier_clusters: usize,
}

/// Result of feeding one keypose sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The sweep was empty; only the diff cloud was cleared.
    Skipped,
    Completed(IngestStats),
}

impl IngestOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, IngestOutcome::Skipped)
    }
}

/// Result of [`PlanningEnv::run_cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub ingest: IngestOutcome,
    /// `None` when the cycle was skipped before coverage.
    pub coverage: Option<CoverageUpdate>,
}

// ─────────────────────────────────────────────────────────────────────────────
// PlanningEnv
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PlanningEnv {
    config: EnvConfig,
    vertical_extractor: VerticalSurfaceExtractor,
    stacked_downsampler: VoxelDownsampler,
    collision_downsampler: VoxelDownsampler,

    surface_stack: CloudStack<SurfacePoint>,
    vertical_stack: CloudStack<SurfacePoint>,
    novelty: NoveltyDetector,
    coverage: CoverageTracker,
    frontier: FrontierExtractor,
    collision: CollisionIndex,

    keypose_cloud: Vec<SurfacePoint>,
    vertical_surface_cloud: Vec<SurfacePoint>,
    stacked_cloud: Vec<SurfacePoint>,
    collision_cloud: Vec<SurfacePoint>,
    planner_cloud: Vec<SurfacePoint>,
    terrain_cloud: Vec<SurfacePoint>,
    coverage_boundary: Vec<Point3>,

    robot_position: Option<Point3>,
    prev_robot_position: Option<Point3>,
}

impl PlanningEnv {
    /// Build an environment from a validated configuration.
    pub fn new(config: EnvConfig) -> Result<Self, CartosError> {
        config.validate()?;
        let vs = &config.vertical_surface;
        Ok(Self {
            vertical_extractor: VerticalSurfaceExtractor::new(
                vs.radius,
                vs.z_diff_min,
                vs.z_diff_max,
                vs.neighbor_threshold,
            ),
            stacked_downsampler: VoxelDownsampler::new(config.stacked_cloud_leaf_size),
            collision_downsampler: VoxelDownsampler::new(config.collision_cloud_leaf_size),
            surface_stack: CloudStack::new(config.stack_depth)?,
            vertical_stack: CloudStack::new(config.stack_depth)?,
            novelty: NoveltyDetector::new(
                config.stacked_cloud_leaf_size,
                config.novelty_age_threshold,
            ),
            coverage: CoverageTracker::new(
                config.planner_cloud_leaf_size,
                config.cover_cloud_z_squeeze_ratio,
                config.vertical_fov_ratio,
            ),
            frontier: FrontierExtractor::new(&config.frontier),
            collision: CollisionIndex::new(
                config.collision_check_radius,
                config.collision_check_point_threshold,
            ),
            keypose_cloud: Vec::new(),
            vertical_surface_cloud: Vec::new(),
            stacked_cloud: Vec::new(),
            collision_cloud: Vec::new(),
            planner_cloud: Vec::new(),
            terrain_cloud: Vec::new(),
            coverage_boundary: Vec::new(),
            robot_position: None,
            prev_robot_position: None,
            config,
        })
    }

    // ── Robot position ──────────────────────────────────────────────────────

    /// Move both map windows to `position` and exchange the occupancy that
    /// crossed their borders.
    ///
    /// Cells entering the grid store's window hand their persisted occupancy
    /// back to the occupancy grid; cells leaving the occupancy grid are
    /// persisted in the grid store.
    #[instrument(skip_all, fields(x = position.x, y = position.y, z = position.z))]
    pub fn update_robot_position(&mut self, position: Point3, maps: &mut MapBackends<'_>) {
        if let Some(rolled_in) = maps.grid.roll_window(position) {
            debug!(rolled_in = rolled_in.len(), "grid store window rolled");
            maps.occupancy.restore_occupancy(&rolled_in);
        }
        maps.occupancy.initialize_origin(maps.grid.window_origin());
        if let Some(rolled_out) = maps.occupancy.roll_window(position) {
            debug!(rolled_out = rolled_out.len(), "occupancy grid rolled");
            maps.grid.store_occupancy(&rolled_out);
        }

        self.prev_robot_position = Some(self.robot_position.unwrap_or(position));
        self.robot_position = Some(position);
    }

    // ── Sweep ingestion ─────────────────────────────────────────────────────

    /// Feed a registered scan to the occupancy grid and ray-trace from the
    /// robot.  Does nothing unless frontier mode is on.
    pub fn update_registered_cloud(
        &mut self,
        cloud: &[SurfacePoint],
        occupancy: &mut dyn OccupancyGrid,
    ) -> Result<(), CartosError> {
        if cloud.is_empty() {
            warn!("registered cloud empty");
            return Ok(());
        }
        if !self.config.frontier.enabled {
            return Ok(());
        }
        let robot = self.require_robot_position(Stage::SweepIngest)?;
        occupancy.ingest_sweep(cloud);
        occupancy.ray_trace(robot);
        Ok(())
    }

    /// Ingest one keypose sweep, then rebuild the collision index and the
    /// frontier clusters.
    ///
    /// An empty sweep skips the cycle: the diff cloud is cleared, everything
    /// else keeps its previous state.
    #[instrument(skip_all, fields(points = sweep.len()))]
    pub fn ingest_keypose_cloud(
        &mut self,
        sweep: &Sweep,
        maps: &mut MapBackends<'_>,
    ) -> Result<IngestOutcome, CartosError> {
        let Some(mut stats) = self.ingest_stage(sweep, &mut *maps.grid)? else {
            return Ok(IngestOutcome::Skipped);
        };
        stats.obstacle_points = self.rebuild_collision();
        stats.frontier_clusters = self.refresh_frontiers(&*maps.occupancy);
        info!(?stats, "keypose cloud ingested");
        Ok(IngestOutcome::Completed(stats))
    }

    /// Run one full cycle: roll the windows, ingest `sweep`, mark coverage,
    /// rebuild the collision index and refresh frontiers, in that order.
    #[instrument(skip_all, fields(points = sweep.len()))]
    pub fn run_cycle(
        &mut self,
        position: Point3,
        sweep: &Sweep,
        maps: &mut MapBackends<'_>,
        sensor: &dyn SensorModel,
        viewpoints: &dyn ViewpointManager,
    ) -> Result<CycleReport, CartosError> {
        self.update_robot_position(position, maps);

        let Some(mut stats) = self.ingest_stage(sweep, &mut *maps.grid)? else {
            return Ok(CycleReport {
                ingest: IngestOutcome::Skipped,
                coverage: None,
            });
        };
        let coverage = self.update_covered_area(sensor, viewpoints, &mut *maps.grid);
        stats.obstacle_points = self.rebuild_collision();
        stats.frontier_clusters = self.refresh_frontiers(&*maps.occupancy);

        info!(?stats, ?coverage, "planning cycle complete");
        Ok(CycleReport {
            ingest: IngestOutcome::Completed(stats),
            coverage: Some(coverage),
        })
    }

    /// Stacks, diff and planner cloud.  `None` when the sweep is empty.
    fn ingest_stage(
        &mut self,
        sweep: &Sweep,
        grid: &mut dyn GridStore,
    ) -> Result<Option<IngestStats>, CartosError> {
        self.require_robot_position(Stage::SweepIngest)?;
        if sweep.is_empty() {
            warn!("keypose cloud empty; cycle skipped");
            self.novelty.clear();
            return Ok(None);
        }

        let keypose: Vec<SurfacePoint> = sweep.points().iter().map(|p| p.untagged()).collect();
        let vertical = self.vertical_extractor.extract(&keypose);

        grid.ingest(&vertical);
        self.planner_cloud = grid.query_active_window();

        // Diff against the sweeps stacked so far, then stack this one.
        let novel_points = self.novelty.detect(&keypose, self.surface_stack.merged()).len();
        let stacked = self.surface_stack.push(keypose.clone());
        self.stacked_cloud = self.stacked_downsampler.downsample(stacked);
        // Walls age out on schedule even when this sweep saw none.
        self.vertical_stack.overwrite(vertical.clone());

        let stats = IngestStats {
            sweep_points: keypose.len(),
            vertical_points: vertical.len(),
            planner_points: self.planner_cloud.len(),
            novel_points,
            ..IngestStats::default()
        };
        self.keypose_cloud = keypose;
        self.vertical_surface_cloud = vertical;
        Ok(Some(stats))
    }

    /// Re-index the stacked vertical surfaces.  Returns the obstacle count.
    fn rebuild_collision(&mut self) -> usize {
        let merged = self.vertical_stack.merged();
        self.collision_cloud = self.collision_downsampler.downsample(merged);
        let obstacles = self.stacked_downsampler.downsample(merged);
        let count = obstacles.len();
        self.collision.rebuild(obstacles);
        count
    }

    fn refresh_frontiers(&mut self, occupancy: &dyn OccupancyGrid) -> usize {
        match self.robot_position {
            Some(robot) if self.config.frontier.enabled => self.frontier.refresh(occupancy, robot),
            _ => 0,
        }
    }

    /// Store the latest terrain cloud.  An empty cloud keeps the previous one.
    pub fn update_terrain_cloud(&mut self, cloud: Vec<SurfacePoint>) {
        if cloud.is_empty() {
            warn!("terrain cloud empty");
            return;
        }
        self.terrain_cloud = cloud;
    }

    pub fn update_coverage_boundary(&mut self, polygon: Vec<Point3>) {
        self.coverage_boundary = polygon;
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// True when the stacked obstacle geometry is dense around `(x, y, z)`.
    /// Free when no obstacles have been stacked yet.
    pub fn in_collision(&self, x: f32, y: f32, z: f32) -> bool {
        self.collision.in_collision(Point3::new(x, y, z))
    }

    /// Mark covered planner-cloud points and report them to `grid`.
    pub fn update_covered_area(
        &mut self,
        sensor: &dyn SensorModel,
        viewpoints: &dyn ViewpointManager,
        grid: &mut dyn GridStore,
    ) -> CoverageUpdate {
        self.coverage
            .update_covered_area(&mut self.planner_cloud, sensor, viewpoints, grid)
    }

    /// Collect uncovered points (and, in frontier mode, uncovered frontier
    /// points) visible from unvisited viewpoints.  Returns both counts.
    pub fn get_uncovered_area(&mut self, viewpoints: &mut dyn ViewpointManager) -> (usize, usize) {
        let frontier = self.config.frontier.enabled.then(|| self.frontier.filtered());
        self.coverage.collect_uncovered(&self.planner_cloud, frontier, viewpoints)
    }

    // ── Settings ────────────────────────────────────────────────────────────

    /// Switch frontier mode.  Turning it off drops the current frontier
    /// clouds.
    pub fn set_use_frontier(&mut self, enabled: bool) {
        self.config.frontier.enabled = enabled;
        if !enabled {
            self.frontier.clear();
        }
    }

    pub fn use_frontier(&self) -> bool {
        self.config.frontier.enabled
    }

    pub fn planner_cloud_resolution(&self) -> f32 {
        self.config.planner_cloud_leaf_size
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn robot_position(&self) -> Option<Point3> {
        self.robot_position
    }

    /// Position before the latest [`update_robot_position`][Self::update_robot_position].
    pub fn prev_robot_position(&self) -> Option<Point3> {
        self.prev_robot_position
    }

    pub fn keypose_cloud(&self) -> &[SurfacePoint] {
        &self.keypose_cloud
    }

    pub fn vertical_surface_cloud(&self) -> &[SurfacePoint] {
        &self.vertical_surface_cloud
    }

    pub fn diff_cloud(&self) -> &[SurfacePoint] {
        self.novelty.diff()
    }

    /// Stacked keypose sweeps, downsampled.
    pub fn stacked_cloud(&self) -> &[SurfacePoint] {
        &self.stacked_cloud
    }

    /// Stacked vertical surfaces as indexed for collision checks.
    pub fn stacked_obstacle_cloud(&self) -> &[SurfacePoint] {
        self.collision.obstacles()
    }

    pub fn collision_cloud(&self) -> &[SurfacePoint] {
        &self.collision_cloud
    }

    pub fn planner_cloud(&self) -> &[SurfacePoint] {
        &self.planner_cloud
    }

    pub fn terrain_cloud(&self) -> &[SurfacePoint] {
        &self.terrain_cloud
    }

    pub fn frontier_cloud(&self) -> &[SurfacePoint] {
        self.frontier.frontier()
    }

    pub fn filtered_frontier_cloud(&self) -> &[SurfacePoint] {
        self.frontier.filtered()
    }

    pub fn uncovered_cloud(&self) -> &[UncoveredPoint] {
        self.coverage.uncovered()
    }

    pub fn uncovered_frontier_cloud(&self) -> &[UncoveredPoint] {
        self.coverage.uncovered_frontier()
    }

    pub fn coverage_boundary(&self) -> &[Point3] {
        &self.coverage_boundary
    }

    fn require_robot_position(&self, stage: Stage) -> Result<Point3, CartosError> {
        self.robot_position.ok_or(CartosError::StageOrder {
            stage,
            requires: Stage::RobotPosition,
        })
    }
}
