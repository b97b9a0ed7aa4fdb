//! Interfaces of the collaborators the planning environment drives but does
//! not own.
//!
//! The environment borrows each collaborator for the duration of a single
//! call; implementations live elsewhere (the robot's mapping stack, or the
//! in-memory stand-ins in [`sim`][crate::sim] for tests).

use cartos_types::{Point3, SurfacePoint};

/// Identifier of a candidate viewpoint inside the viewpoint manager.
pub type ViewpointId = usize;

/// Location of one planner-cloud point inside the grid store: the cell that
/// holds it and its slot within that cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellSlot {
    pub cell: usize,
    pub slot: usize,
}

/// Cell-indexed store holding the planner cloud inside a rolling window
/// around the robot.  Evicted cells (and their coverage) persist inside the
/// store.
pub trait GridStore {
    /// Re-centre the window on `position`.  Returns `None` when the window
    /// did not move; otherwise the occupancy persisted for the cells that
    /// just entered the window, handed over (and forgotten by the store).
    fn roll_window(&mut self, position: Point3) -> Option<Vec<Point3>>;

    /// World position of the window's minimum corner.
    fn window_origin(&self) -> Point3;

    /// Add surface points observed in the latest sweep.
    fn ingest(&mut self, points: &[SurfacePoint]);

    /// Snapshot of every point inside the active window, coverage flags
    /// included.  Point `i` of the snapshot maps to a cell through
    /// [`map_point_to_cell`][Self::map_point_to_cell] until the next call.
    fn query_active_window(&mut self) -> Vec<SurfacePoint>;

    /// Cell and slot of point `index` of the latest snapshot, `None` when the
    /// index is out of range.
    fn map_point_to_cell(&self, index: usize) -> Option<CellSlot>;

    /// Record that the point at `slot` has been covered.
    fn mark_covered(&mut self, slot: CellSlot);

    /// Persist occupancy evicted from the occupancy grid's window.
    fn store_occupancy(&mut self, points: &[Point3]);
}

/// Rolling 3-D occupancy grid with ray tracing and frontier detection.
pub trait OccupancyGrid {
    /// Align the grid's window with `origin`; only the first call has an
    /// effect on most implementations.
    fn initialize_origin(&mut self, origin: Point3);

    /// Re-centre the grid on `position`.  Returns `None` when the grid did
    /// not move; otherwise the occupancy of the cells that left the grid.
    fn roll_window(&mut self, position: Point3) -> Option<Vec<Point3>>;

    /// Re-populate occupancy for cells that re-entered the window.
    fn restore_occupancy(&mut self, points: &[Point3]);

    /// Mark the cells hit by `points` as occupied.
    fn ingest_sweep(&mut self, points: &[SurfacePoint]);

    /// Clear the cells between `origin` and every occupied cell.
    fn ray_trace(&mut self, origin: Point3);

    /// Frontier voxel centres inside the box `center ± half_extents`.
    fn query_frontier(&self, center: Point3, half_extents: Point3) -> Vec<SurfacePoint>;

    /// Cell edge lengths along x, y and z.
    fn resolution(&self) -> Point3;
}

/// Candidate viewpoints with their visibility relations and per-viewpoint
/// coverage bookkeeping.
pub trait ViewpointManager {
    /// Candidate viewpoints, in the manager's preferred order.
    fn candidate_ids(&self) -> &[ViewpointId];

    fn is_visited(&self, id: ViewpointId) -> bool;

    /// True when viewpoint `id` has an unobstructed line of sight to `point`.
    fn can_see(&self, point: Point3, id: ViewpointId) -> bool;

    /// Forget the uncovered (and uncovered-frontier) points registered for
    /// `id`.
    fn reset_coverage_bookkeeping(&mut self, id: ViewpointId);

    /// Register uncovered point `point_ref` (an index into the environment's
    /// uncovered cloud) as visible from `id`.
    fn register_uncovered_point(&mut self, id: ViewpointId, point_ref: usize);

    /// Register uncovered frontier point `point_ref` (an index into the
    /// environment's uncovered frontier cloud) as visible from `id`.
    fn register_uncovered_frontier_point(&mut self, id: ViewpointId, point_ref: usize);

    /// Range of the sensor model used for coverage.
    fn sensor_range(&self) -> f32;

    /// Occlusion tolerance passed to [`SensorModel::is_occluded`].
    fn coverage_occlusion_threshold(&self) -> f32;

    /// Radius of the coverage dilation pass.
    fn coverage_dilation_radius(&self) -> f32;
}

/// The sensor at its current pose.
pub trait SensorModel {
    fn position(&self) -> Point3;

    /// True when the line of sight from the sensor to `point` is blocked.
    fn is_occluded(&self, point: Point3, occlusion_threshold: f32) -> bool;
}
