//! In-memory collaborators for headless tests and demos.
//!
//! Each stand-in implements one of the traits in
//! [`collaborators`][crate::collaborators] with the simplest behaviour that
//! still exercises the environment: the grid store keeps points in cubic
//! cells around a rolling window, the occupancy grid records what it is fed
//! and serves an injected frontier, viewpoints see everything within sensor
//! range, and the sensor is occluded only at listed locations.
//!
//! # Example
//!
//! ```rust
//! use cartos_env::collaborators::GridStore;
//! use cartos_env::sim::SimGridStore;
//! use cartos_types::{Point3, SurfacePoint};
//!
//! let mut grid = SimGridStore::new(10.0, 2);
//! grid.roll_window(Point3::origin());
//! grid.ingest(&[SurfacePoint::new(1.0, 1.0, 0.0)]);
//! assert_eq!(grid.query_active_window().len(), 1);
//! ```

use std::collections::BTreeMap;

use cartos_perception::Aabb;
use cartos_types::{Point3, SurfacePoint};

use crate::collaborators::{
    CellSlot, GridStore, OccupancyGrid, SensorModel, ViewpointId, ViewpointManager,
};

type CellKey = (i64, i64, i64);

fn within(centre: CellKey, key: CellKey, half_width: i64) -> bool {
    (key.0 - centre.0).abs() <= half_width
        && (key.1 - centre.1).abs() <= half_width
        && (key.2 - centre.2).abs() <= half_width
}

// ────────────────────────────────────────────────────────────────────────────
// Grid store
// ────────────────────────────────────────────────────────────────────────────

/// Cubic-cell point store with a window of `2 * half_width + 1` cells per
/// axis centred on the robot's cell.
///
/// Points outside the window stay stored (with their coverage) and come back
/// when the window returns.  Ingested points closer than a millimetre to a
/// stored point of the same cell are dropped.
#[derive(Debug, Clone)]
pub struct SimGridStore {
    cell_size: f32,
    half_width: i64,
    centre: Option<CellKey>,
    cells: BTreeMap<CellKey, Vec<SurfacePoint>>,
    occupancy: BTreeMap<CellKey, Vec<Point3>>,
    cell_ids: BTreeMap<CellKey, usize>,
    cell_keys: Vec<CellKey>,
    snapshot: Vec<CellSlot>,
    covered_marks: usize,
}

impl SimGridStore {
    pub fn new(cell_size: f32, half_width: i64) -> Self {
        Self {
            cell_size,
            half_width,
            centre: None,
            cells: BTreeMap::new(),
            occupancy: BTreeMap::new(),
            cell_ids: BTreeMap::new(),
            cell_keys: Vec::new(),
            snapshot: Vec::new(),
            covered_marks: 0,
        }
    }

    fn cell_key(&self, p: Point3) -> CellKey {
        (
            (p.x / self.cell_size).floor() as i64,
            (p.y / self.cell_size).floor() as i64,
            (p.z / self.cell_size).floor() as i64,
        )
    }

    /// Number of [`GridStore::mark_covered`] calls received.
    pub fn covered_marks(&self) -> usize {
        self.covered_marks
    }

    /// Stored points, inside and outside the window.
    pub fn point_count(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// True when a stored point sits at `position` and is covered.
    pub fn is_covered(&self, position: Point3) -> bool {
        self.cells
            .get(&self.cell_key(position))
            .is_some_and(|cell| {
                cell.iter()
                    .any(|p| p.covered && p.position.distance_squared(position) < 1e-6)
            })
    }

    /// Occupancy points persisted and not yet rolled back in.
    pub fn stored_occupancy(&self) -> usize {
        self.occupancy.values().map(Vec::len).sum()
    }
}

impl GridStore for SimGridStore {
    fn roll_window(&mut self, position: Point3) -> Option<Vec<Point3>> {
        let centre = self.cell_key(position);
        if self.centre == Some(centre) {
            return None;
        }
        let previous = self.centre.replace(centre);
        let hw = self.half_width;
        let was_inside = |key: CellKey| previous.is_some_and(|c| within(c, key, hw));

        let entering: Vec<CellKey> = self
            .occupancy
            .keys()
            .copied()
            .filter(|&k| within(centre, k, hw) && !was_inside(k))
            .collect();
        let mut rolled_in = Vec::new();
        for key in entering {
            if let Some(points) = self.occupancy.remove(&key) {
                rolled_in.extend(points);
            }
        }
        Some(rolled_in)
    }

    fn window_origin(&self) -> Point3 {
        let Some((x, y, z)) = self.centre else {
            return Point3::origin();
        };
        let hw = self.half_width;
        Point3::new(
            (x - hw) as f32 * self.cell_size,
            (y - hw) as f32 * self.cell_size,
            (z - hw) as f32 * self.cell_size,
        )
    }

    fn ingest(&mut self, points: &[SurfacePoint]) {
        for p in points {
            let key = self.cell_key(p.position);
            let cell = self.cells.entry(key).or_default();
            if cell.iter().any(|q| q.position.distance_squared(p.position) < 1e-6) {
                continue;
            }
            cell.push(SurfacePoint::at(p.position));
        }
    }

    fn query_active_window(&mut self) -> Vec<SurfacePoint> {
        self.snapshot.clear();
        let Some(centre) = self.centre else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (key, points) in &self.cells {
            if !within(centre, *key, self.half_width) {
                continue;
            }
            let cell = match self.cell_ids.get(key) {
                Some(&id) => id,
                None => {
                    let id = self.cell_keys.len();
                    self.cell_keys.push(*key);
                    self.cell_ids.insert(*key, id);
                    id
                }
            };
            for (slot, p) in points.iter().enumerate() {
                self.snapshot.push(CellSlot { cell, slot });
                out.push(*p);
            }
        }
        out
    }

    fn map_point_to_cell(&self, index: usize) -> Option<CellSlot> {
        self.snapshot.get(index).copied()
    }

    fn mark_covered(&mut self, slot: CellSlot) {
        self.covered_marks += 1;
        if let Some(key) = self.cell_keys.get(slot.cell)
            && let Some(point) = self.cells.get_mut(key).and_then(|c| c.get_mut(slot.slot))
        {
            point.covered = true;
        }
    }

    fn store_occupancy(&mut self, points: &[Point3]) {
        for &p in points {
            let key = self.cell_key(p);
            self.occupancy.entry(key).or_default().push(p);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Occupancy grid
// ────────────────────────────────────────────────────────────────────────────

/// Occupancy grid stand-in.  Occupied points farther than the window
/// half-extents from the robot roll out whenever the robot moves; frontier
/// voxels are injected with [`set_frontier`][Self::set_frontier].
#[derive(Debug, Clone)]
pub struct SimOccupancyGrid {
    resolution: Point3,
    half_extents: Point3,
    origin: Option<Point3>,
    position: Option<Point3>,
    occupied: Vec<Point3>,
    frontier: Vec<SurfacePoint>,
    ray_trace_origins: Vec<Point3>,
    restored: usize,
}

impl SimOccupancyGrid {
    pub fn new(resolution: Point3) -> Self {
        Self {
            resolution,
            half_extents: Point3::new(40.0, 40.0, 10.0),
            origin: None,
            position: None,
            occupied: Vec::new(),
            frontier: Vec::new(),
            ray_trace_origins: Vec::new(),
            restored: 0,
        }
    }

    pub fn with_half_extents(mut self, half_extents: Point3) -> Self {
        self.half_extents = half_extents;
        self
    }

    pub fn set_frontier(&mut self, frontier: Vec<SurfacePoint>) {
        self.frontier = frontier;
    }

    /// Origin fixed by the first [`OccupancyGrid::initialize_origin`] call.
    pub fn origin(&self) -> Option<Point3> {
        self.origin
    }

    pub fn occupied(&self) -> &[Point3] {
        &self.occupied
    }

    pub fn ray_trace_origins(&self) -> &[Point3] {
        &self.ray_trace_origins
    }

    /// Total points received through [`OccupancyGrid::restore_occupancy`].
    pub fn restored(&self) -> usize {
        self.restored
    }
}

impl OccupancyGrid for SimOccupancyGrid {
    fn initialize_origin(&mut self, origin: Point3) {
        self.origin.get_or_insert(origin);
    }

    fn roll_window(&mut self, position: Point3) -> Option<Vec<Point3>> {
        if self.position == Some(position) {
            return None;
        }
        self.position = Some(position);
        let window = Aabb::around(position, self.half_extents);
        let (kept, rolled_out): (Vec<Point3>, Vec<Point3>) =
            self.occupied.iter().partition(|&&p| window.contains_point(p));
        self.occupied = kept;
        Some(rolled_out)
    }

    fn restore_occupancy(&mut self, points: &[Point3]) {
        self.restored += points.len();
        self.occupied.extend_from_slice(points);
    }

    fn ingest_sweep(&mut self, points: &[SurfacePoint]) {
        self.occupied.extend(points.iter().map(|p| p.position));
    }

    fn ray_trace(&mut self, origin: Point3) {
        self.ray_trace_origins.push(origin);
    }

    fn query_frontier(&self, center: Point3, half_extents: Point3) -> Vec<SurfacePoint> {
        let region = Aabb::around(center, half_extents);
        self.frontier
            .iter()
            .filter(|p| region.contains_point(p.position))
            .copied()
            .collect()
    }

    fn resolution(&self) -> Point3 {
        self.resolution
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Viewpoint manager
// ────────────────────────────────────────────────────────────────────────────

/// Viewpoints that see every point within sensor range.
#[derive(Debug, Clone)]
pub struct SimViewpointManager {
    positions: Vec<Point3>,
    visited: Vec<bool>,
    ids: Vec<ViewpointId>,
    sensor_range: f32,
    occlusion_threshold: f32,
    dilation_radius: f32,
    uncovered: Vec<Vec<usize>>,
    uncovered_frontier: Vec<Vec<usize>>,
}

impl SimViewpointManager {
    pub fn new(sensor_range: f32, dilation_radius: f32) -> Self {
        Self {
            positions: Vec::new(),
            visited: Vec::new(),
            ids: Vec::new(),
            sensor_range,
            occlusion_threshold: 0.1,
            dilation_radius,
            uncovered: Vec::new(),
            uncovered_frontier: Vec::new(),
        }
    }

    /// Add a candidate viewpoint and return its id.
    pub fn add_viewpoint(&mut self, position: Point3, visited: bool) -> ViewpointId {
        let id = self.positions.len();
        self.positions.push(position);
        self.visited.push(visited);
        self.ids.push(id);
        self.uncovered.push(Vec::new());
        self.uncovered_frontier.push(Vec::new());
        id
    }

    pub fn set_visited(&mut self, id: ViewpointId, visited: bool) {
        if let Some(v) = self.visited.get_mut(id) {
            *v = visited;
        }
    }

    pub fn uncovered_points(&self, id: ViewpointId) -> &[usize] {
        self.uncovered.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn uncovered_frontier_points(&self, id: ViewpointId) -> &[usize] {
        self.uncovered_frontier.get(id).map(Vec::as_slice).unwrap_or_default()
    }
}

impl ViewpointManager for SimViewpointManager {
    fn candidate_ids(&self) -> &[ViewpointId] {
        &self.ids
    }

    fn is_visited(&self, id: ViewpointId) -> bool {
        self.visited.get(id).copied().unwrap_or(false)
    }

    fn can_see(&self, point: Point3, id: ViewpointId) -> bool {
        self.positions
            .get(id)
            .is_some_and(|v| v.distance(point) <= self.sensor_range)
    }

    fn reset_coverage_bookkeeping(&mut self, id: ViewpointId) {
        if let Some(list) = self.uncovered.get_mut(id) {
            list.clear();
        }
        if let Some(list) = self.uncovered_frontier.get_mut(id) {
            list.clear();
        }
    }

    fn register_uncovered_point(&mut self, id: ViewpointId, point_ref: usize) {
        if let Some(list) = self.uncovered.get_mut(id) {
            list.push(point_ref);
        }
    }

    fn register_uncovered_frontier_point(&mut self, id: ViewpointId, point_ref: usize) {
        if let Some(list) = self.uncovered_frontier.get_mut(id) {
            list.push(point_ref);
        }
    }

    fn sensor_range(&self) -> f32 {
        self.sensor_range
    }

    fn coverage_occlusion_threshold(&self) -> f32 {
        self.occlusion_threshold
    }

    fn coverage_dilation_radius(&self) -> f32 {
        self.dilation_radius
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor
// ────────────────────────────────────────────────────────────────────────────

/// Sensor at a fixed position; points within the occlusion threshold of a
/// listed location are occluded, everything else is visible.
#[derive(Debug, Clone, Default)]
pub struct SimSensor {
    position: Point3,
    occluded: Vec<Point3>,
}

impl SimSensor {
    pub fn new(position: Point3) -> Self {
        Self {
            position,
            occluded: Vec::new(),
        }
    }

    pub fn with_occluded(mut self, occluded: Vec<Point3>) -> Self {
        self.occluded = occluded;
        self
    }

    pub fn set_position(&mut self, position: Point3) {
        self.position = position;
    }
}

impl SensorModel for SimSensor {
    fn position(&self) -> Point3 {
        self.position
    }

    fn is_occluded(&self, point: Point3, occlusion_threshold: f32) -> bool {
        self.occluded
            .iter()
            .any(|o| o.distance(point) <= occlusion_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_window_hides_far_cells() {
        let mut grid = SimGridStore::new(10.0, 1);
        grid.roll_window(Point3::origin());
        grid.ingest(&[SurfacePoint::new(5.0, 5.0, 0.0), SurfacePoint::new(55.0, 5.0, 0.0)]);
        assert_eq!(grid.point_count(), 2);
        assert_eq!(grid.query_active_window().len(), 1);
    }

    #[test]
    fn grid_roll_is_none_within_same_cell() {
        let mut grid = SimGridStore::new(10.0, 1);
        assert!(grid.roll_window(Point3::new(1.0, 1.0, 0.0)).is_some());
        assert!(grid.roll_window(Point3::new(2.0, 3.0, 0.0)).is_none());
    }

    #[test]
    fn grid_coverage_survives_eviction() {
        let mut grid = SimGridStore::new(10.0, 0);
        grid.roll_window(Point3::origin());
        let p = Point3::new(1.0, 1.0, 1.0);
        grid.ingest(&[SurfacePoint::at(p)]);
        let _ = grid.query_active_window();
        let slot = grid.map_point_to_cell(0).expect("mapped");
        grid.mark_covered(slot);

        assert!(grid.roll_window(Point3::new(100.0, 0.0, 0.0)).is_some());
        assert!(grid.query_active_window().is_empty());

        grid.roll_window(Point3::origin());
        let back = grid.query_active_window();
        assert!(back[0].covered);
        assert!(grid.is_covered(p));
    }

    #[test]
    fn grid_returns_persisted_occupancy_on_reentry() {
        let mut grid = SimGridStore::new(10.0, 0);
        grid.roll_window(Point3::origin());
        grid.store_occupancy(&[Point3::new(101.0, 1.0, 1.0)]);
        assert_eq!(grid.stored_occupancy(), 1);
        let rolled_in = grid.roll_window(Point3::new(105.0, 5.0, 5.0)).expect("moved");
        assert_eq!(rolled_in, vec![Point3::new(101.0, 1.0, 1.0)]);
        assert_eq!(grid.stored_occupancy(), 0);
    }

    #[test]
    fn grid_window_origin_is_min_corner() {
        let mut grid = SimGridStore::new(10.0, 2);
        grid.roll_window(Point3::new(5.0, 5.0, 5.0));
        assert_eq!(grid.window_origin(), Point3::new(-20.0, -20.0, -20.0));
    }

    #[test]
    fn occupancy_rolls_out_far_points() {
        let mut occ = SimOccupancyGrid::new(Point3::new(0.3, 0.3, 0.3))
            .with_half_extents(Point3::new(5.0, 5.0, 5.0));
        occ.ingest_sweep(&[SurfacePoint::new(1.0, 0.0, 0.0), SurfacePoint::new(4.0, 0.0, 0.0)]);
        let rolled_out = occ.roll_window(Point3::new(8.0, 0.0, 0.0)).expect("moved");
        assert_eq!(rolled_out, vec![Point3::new(1.0, 0.0, 0.0)]);
        assert_eq!(occ.occupied(), &[Point3::new(4.0, 0.0, 0.0)]);
        assert!(occ.roll_window(Point3::new(8.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn occupancy_origin_is_set_once() {
        let mut occ = SimOccupancyGrid::new(Point3::new(0.3, 0.3, 0.3));
        occ.initialize_origin(Point3::new(1.0, 1.0, 1.0));
        occ.initialize_origin(Point3::new(2.0, 2.0, 2.0));
        assert_eq!(occ.origin(), Some(Point3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn viewpoint_visibility_follows_range() {
        let mut vm = SimViewpointManager::new(5.0, 1.0);
        let id = vm.add_viewpoint(Point3::origin(), false);
        assert!(vm.can_see(Point3::new(4.0, 0.0, 0.0), id));
        assert!(!vm.can_see(Point3::new(6.0, 0.0, 0.0), id));
        assert!(!vm.can_see(Point3::origin(), id + 1));
        vm.set_visited(id, true);
        assert!(vm.is_visited(id));
    }

    #[test]
    fn sensor_occludes_listed_points_only() {
        let s = SimSensor::new(Point3::origin()).with_occluded(vec![Point3::new(1.0, 0.0, 0.0)]);
        assert!(s.is_occluded(Point3::new(1.05, 0.0, 0.0), 0.1));
        assert!(!s.is_occluded(Point3::new(2.0, 0.0, 0.0), 0.1));
    }
}
