//! Coverage tracking over the planner cloud.
//!
//! A planner-cloud point only ever moves from uncovered to covered.  Each
//! call to [`CoverageTracker::update_covered_area`] runs three passes:
//!
//! 1. **Direct** – a point is covered when the current sensor sees it (cone
//!    test plus occlusion check) or any visited viewpoint sees it.
//! 2. **Dilation** – neighbours of the points covered in pass 1 are covered
//!    too.  The search runs on a copy of the cloud with z divided by the
//!    squeeze ratio, so vertical neighbours are reached more easily.  Only
//!    pass-1 points seed the dilation.
//! 3. **Propagation** – every covered point is reported to the grid store.
//!
//! [`CoverageTracker::collect_uncovered`] is the planner-facing inverse: it
//! lists the uncovered points some unvisited viewpoint could still observe.

use cartos_perception::Octree;
use cartos_types::{Point3, SurfacePoint};
use tracing::{debug, warn};

use crate::collaborators::{GridStore, SensorModel, ViewpointId, ViewpointManager};

/// Horizontal extent of the near field, in planner-cloud voxels.
const NEAR_FIELD_XY_VOXELS: f32 = 1.5 / 0.3;
/// Vertical extent of the near field, in planner-cloud voxels.
const NEAR_FIELD_Z_VOXELS: f32 = 3.0;

/// Statistics of one coverage update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageUpdate {
    /// Points covered by the direct pass this call.
    pub direct: usize,
    /// Points covered only through dilation this call.
    pub dilated: usize,
    /// Covered points in the cloud after the call.
    pub total_covered: usize,
}

/// One uncovered point together with its index in the source cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UncoveredPoint {
    pub position: Point3,
    pub source_index: usize,
}

#[derive(Debug, Clone)]
pub struct CoverageTracker {
    planner_leaf_size: f32,
    z_squeeze_ratio: f32,
    vertical_fov_ratio: f32,
    uncovered: Vec<UncoveredPoint>,
    uncovered_frontier: Vec<UncoveredPoint>,
}

impl CoverageTracker {
    pub fn new(planner_leaf_size: f32, z_squeeze_ratio: f32, vertical_fov_ratio: f32) -> Self {
        Self {
            planner_leaf_size,
            z_squeeze_ratio,
            vertical_fov_ratio,
            uncovered: Vec::new(),
            uncovered_frontier: Vec::new(),
        }
    }

    /// Simplified sensor cone test.
    ///
    /// Points beyond `range` horizontally are outside.  Points in the near
    /// field (a few planner voxels around the sensor) are inside.  Otherwise
    /// the height difference must not exceed the horizontal distance times
    /// the vertical FOV ratio.
    pub fn in_fov_simple(&self, point: Point3, sensor: Point3, range: f32) -> bool {
        let dx = point.x - sensor.x;
        let dy = point.y - sensor.y;
        let dz = (point.z - sensor.z).abs();
        let xy_dist = (dx * dx + dy * dy).sqrt();
        if xy_dist > range {
            return false;
        }
        let near_xy = NEAR_FIELD_XY_VOXELS * self.planner_leaf_size;
        let near_z = NEAR_FIELD_Z_VOXELS * self.planner_leaf_size;
        if xy_dist < near_xy && dz < near_z {
            return true;
        }
        dz <= xy_dist * self.vertical_fov_ratio
    }

    /// Mark covered points of `cloud` in place and report them to `grid`.
    ///
    /// `cloud` must be the latest active-window snapshot of `grid`, so that
    /// its indices map to grid cells.
    ///
    /// # Panics
    ///
    /// Panics when the grid store cannot map a covered point back to a cell;
    /// the snapshot and the store are then out of sync.
    pub fn update_covered_area(
        &self,
        cloud: &mut [SurfacePoint],
        sensor: &dyn SensorModel,
        viewpoints: &dyn ViewpointManager,
        grid: &mut dyn GridStore,
    ) -> CoverageUpdate {
        if cloud.is_empty() {
            warn!("planner cloud empty; coverage not updated");
            return CoverageUpdate::default();
        }

        let sensor_position = sensor.position();
        let range = viewpoints.sensor_range();
        let occlusion_threshold = viewpoints.coverage_occlusion_threshold();
        let max_dz = range * self.vertical_fov_ratio;
        let visited: Vec<ViewpointId> = viewpoints
            .candidate_ids()
            .iter()
            .copied()
            .filter(|&id| viewpoints.is_visited(id))
            .collect();

        // Direct pass.
        let mut seeds = Vec::new();
        for (i, point) in cloud.iter_mut().enumerate() {
            if point.covered {
                continue;
            }
            let p = point.position;
            let seen_now = (p.z - sensor_position.z).abs() < max_dz
                && self.in_fov_simple(p, sensor_position, range)
                && !sensor.is_occluded(p, occlusion_threshold);
            if seen_now || visited.iter().any(|&id| viewpoints.can_see(p, id)) {
                point.covered = true;
                seeds.push(i);
            }
        }

        // Dilation pass, seeded by the direct pass only.
        let squeeze = |p: Point3| Point3::new(p.x, p.y, p.z / self.z_squeeze_ratio);
        let squeezed = Octree::from_points(cloud.iter().map(|p| squeeze(p.position)));
        let radius = viewpoints.coverage_dilation_radius();
        let mut dilated = 0;
        for &seed in &seeds {
            for neighbour in squeezed.radius_search(squeeze(cloud[seed].position), radius) {
                let point = &mut cloud[neighbour];
                if !point.covered {
                    point.covered = true;
                    dilated += 1;
                }
            }
        }

        // Propagation.
        let mut total_covered = 0;
        for (i, point) in cloud.iter().enumerate() {
            if !point.covered {
                continue;
            }
            let Some(slot) = grid.map_point_to_cell(i) else {
                panic!(
                    "planner cloud index {i} has no grid cell (cloud has {} points); \
                     snapshot and grid store are out of sync",
                    cloud.len()
                );
            };
            grid.mark_covered(slot);
            total_covered += 1;
        }

        let update = CoverageUpdate {
            direct: seeds.len(),
            dilated,
            total_covered,
        };
        debug!(?update, cloud = cloud.len(), "coverage updated");
        update
    }

    /// Rebuild the uncovered clouds and register every point against the
    /// unvisited viewpoints that can see it.
    ///
    /// Every candidate's bookkeeping is reset first.  `frontier` is only
    /// scanned when given (frontier mode).  Returns the number of uncovered
    /// points and uncovered frontier points.
    pub fn collect_uncovered(
        &mut self,
        cloud: &[SurfacePoint],
        frontier: Option<&[SurfacePoint]>,
        viewpoints: &mut dyn ViewpointManager,
    ) -> (usize, usize) {
        let candidates: Vec<ViewpointId> = viewpoints.candidate_ids().to_vec();
        for &id in &candidates {
            viewpoints.reset_coverage_bookkeeping(id);
        }
        let unvisited: Vec<ViewpointId> = candidates
            .into_iter()
            .filter(|&id| !viewpoints.is_visited(id))
            .collect();

        self.uncovered.clear();
        for (i, point) in cloud.iter().enumerate() {
            if point.covered {
                continue;
            }
            let slot = self.uncovered.len();
            if register_observers(point.position, slot, &unvisited, viewpoints, false) {
                self.uncovered.push(UncoveredPoint {
                    position: point.position,
                    source_index: i,
                });
            }
        }

        self.uncovered_frontier.clear();
        if let Some(frontier) = frontier {
            for (i, point) in frontier.iter().enumerate() {
                let slot = self.uncovered_frontier.len();
                if register_observers(point.position, slot, &unvisited, viewpoints, true) {
                    self.uncovered_frontier.push(UncoveredPoint {
                        position: point.position,
                        source_index: i,
                    });
                }
            }
        }

        debug!(
            uncovered = self.uncovered.len(),
            uncovered_frontier = self.uncovered_frontier.len(),
            unvisited = unvisited.len(),
            "uncovered area collected"
        );
        (self.uncovered.len(), self.uncovered_frontier.len())
    }

    pub fn uncovered(&self) -> &[UncoveredPoint] {
        &self.uncovered
    }

    pub fn uncovered_frontier(&self) -> &[UncoveredPoint] {
        &self.uncovered_frontier
    }

    pub fn planner_leaf_size(&self) -> f32 {
        self.planner_leaf_size
    }
}

/// Register `point` (as entry `slot` of the output cloud) with every viewpoint
/// in `ids` that can see it.  True when at least one could.
fn register_observers(
    point: Point3,
    slot: usize,
    ids: &[ViewpointId],
    viewpoints: &mut dyn ViewpointManager,
    frontier: bool,
) -> bool {
    let mut observed = false;
    for &id in ids {
        if viewpoints.can_see(point, id) {
            if frontier {
                viewpoints.register_uncovered_frontier_point(id, slot);
            } else {
                viewpoints.register_uncovered_point(id, slot);
            }
            observed = true;
        }
    }
    observed
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::sim::{SimGridStore, SimSensor, SimViewpointManager};

    /// Viewpoint manager that records every `can_see` query it answers.
    struct RecordingViewpoints {
        inner: SimViewpointManager,
        queries: RefCell<Vec<ViewpointId>>,
    }

    impl RecordingViewpoints {
        fn new(inner: SimViewpointManager) -> Self {
            Self {
                inner,
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl ViewpointManager for RecordingViewpoints {
        fn candidate_ids(&self) -> &[ViewpointId] {
            self.inner.candidate_ids()
        }

        fn is_visited(&self, id: ViewpointId) -> bool {
            self.inner.is_visited(id)
        }

        fn can_see(&self, point: Point3, id: ViewpointId) -> bool {
            self.queries.borrow_mut().push(id);
            self.inner.can_see(point, id)
        }

        fn reset_coverage_bookkeeping(&mut self, id: ViewpointId) {
            self.inner.reset_coverage_bookkeeping(id);
        }

        fn register_uncovered_point(&mut self, id: ViewpointId, point_ref: usize) {
            self.inner.register_uncovered_point(id, point_ref);
        }

        fn register_uncovered_frontier_point(&mut self, id: ViewpointId, point_ref: usize) {
            self.inner.register_uncovered_frontier_point(id, point_ref);
        }

        fn sensor_range(&self) -> f32 {
            self.inner.sensor_range()
        }

        fn coverage_occlusion_threshold(&self) -> f32 {
            self.inner.coverage_occlusion_threshold()
        }

        fn coverage_dilation_radius(&self) -> f32 {
            self.inner.coverage_dilation_radius()
        }
    }

    fn tracker() -> CoverageTracker {
        CoverageTracker::new(0.2, 2.0, 0.3)
    }

    /// Grid store holding `points` with a window large enough for all of them.
    fn grid_with(points: &[Point3]) -> (SimGridStore, Vec<SurfacePoint>) {
        let mut grid = SimGridStore::new(10.0, 10);
        grid.roll_window(Point3::origin());
        let cloud: Vec<SurfacePoint> = points.iter().copied().map(SurfacePoint::at).collect();
        grid.ingest(&cloud);
        let snapshot = grid.query_active_window();
        (grid, snapshot)
    }

    #[test]
    fn fov_rejects_beyond_range() {
        let t = tracker();
        assert!(!t.in_fov_simple(Point3::new(11.0, 0.0, 0.0), Point3::origin(), 10.0));
    }

    #[test]
    fn fov_accepts_near_field_above_ratio() {
        let t = tracker();
        // Steep but within the near field (xy < 1.0, dz < 0.6).
        assert!(t.in_fov_simple(Point3::new(0.5, 0.0, 0.5), Point3::origin(), 10.0));
    }

    #[test]
    fn fov_applies_vertical_ratio_far_away() {
        let t = tracker();
        assert!(t.in_fov_simple(Point3::new(5.0, 0.0, 1.4), Point3::origin(), 10.0));
        assert!(!t.in_fov_simple(Point3::new(5.0, 0.0, 1.6), Point3::origin(), 10.0));
    }

    #[test]
    fn empty_cloud_is_a_noop() {
        let mut grid = SimGridStore::new(10.0, 1);
        let vm = SimViewpointManager::new(10.0, 1.0);
        let sensor = SimSensor::new(Point3::origin());
        let update = tracker().update_covered_area(&mut [], &sensor, &vm, &mut grid);
        assert_eq!(update, CoverageUpdate::default());
        assert_eq!(grid.covered_marks(), 0);
    }

    #[test]
    fn visible_points_are_covered_and_propagated() {
        let (mut grid, mut cloud) =
            grid_with(&[Point3::new(2.0, 0.0, 0.0), Point3::new(20.0, 0.0, 0.0)]);
        let vm = SimViewpointManager::new(10.0, 0.5);
        let sensor = SimSensor::new(Point3::origin());
        let update = tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert_eq!(update.direct, 1);
        assert_eq!(update.total_covered, 1);
        assert_eq!(grid.covered_marks(), 1);
        let covered: Vec<_> = cloud.iter().filter(|p| p.covered).map(|p| p.position.x).collect();
        assert_eq!(covered, vec![2.0]);
    }

    #[test]
    fn occluded_points_stay_uncovered() {
        let target = Point3::new(2.0, 0.0, 0.0);
        let (mut grid, mut cloud) = grid_with(&[target]);
        let vm = SimViewpointManager::new(10.0, 0.5);
        let sensor = SimSensor::new(Point3::origin()).with_occluded(vec![target]);
        let update = tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert_eq!(update.total_covered, 0);
        assert!(!cloud[0].covered);
    }

    #[test]
    fn visited_viewpoint_covers_out_of_range_points() {
        let far = Point3::new(30.0, 0.0, 0.0);
        let (mut grid, mut cloud) = grid_with(&[far]);
        let mut vm = SimViewpointManager::new(10.0, 0.5);
        vm.add_viewpoint(Point3::new(28.0, 0.0, 0.0), true);
        let sensor = SimSensor::new(Point3::origin());
        let update = tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert_eq!(update.direct, 1);
        assert!(cloud[0].covered);
    }

    #[test]
    fn occluded_point_in_range_falls_back_to_visited_viewpoint() {
        let target = Point3::new(2.0, 0.0, 0.0);
        let (mut grid, mut cloud) = grid_with(&[target]);
        let mut vm = SimViewpointManager::new(10.0, 0.5);
        vm.add_viewpoint(Point3::new(3.0, 0.0, 0.0), true);
        let sensor = SimSensor::new(Point3::origin()).with_occluded(vec![target]);
        let update = tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert_eq!(update.direct, 1);
        assert!(cloud[0].covered);
    }

    #[test]
    fn point_outside_cone_falls_back_to_visited_viewpoint() {
        // dz 2.0 passes the range gate (10 * 0.3 = 3.0) but not the cone
        // (5.0 * 0.3 = 1.5).
        let steep = Point3::new(5.0, 0.0, 2.0);
        let t = tracker();
        assert!(!t.in_fov_simple(steep, Point3::origin(), 10.0));

        let (mut grid, mut cloud) = grid_with(&[steep]);
        let lone = SimViewpointManager::new(10.0, 0.5);
        t.update_covered_area(&mut cloud, &SimSensor::new(Point3::origin()), &lone, &mut grid);
        assert!(!cloud[0].covered);

        let mut vm = SimViewpointManager::new(10.0, 0.5);
        vm.add_viewpoint(Point3::new(5.0, 0.0, 3.0), true);
        let sensor = SimSensor::new(Point3::origin());
        let update = t.update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert_eq!(update.direct, 1);
        assert!(cloud[0].covered);
    }

    #[test]
    fn visited_viewpoints_are_asked_in_order_until_one_sees() {
        let near = Point3::new(2.0, 0.0, 0.0);
        let far = Point3::new(30.0, 0.0, 0.0);
        let (mut grid, mut cloud) = grid_with(&[near, far]);

        let mut inner = SimViewpointManager::new(10.0, 0.5);
        let blind = inner.add_viewpoint(Point3::new(100.0, 0.0, 0.0), true);
        let first_hit = inner.add_viewpoint(Point3::new(28.0, 0.0, 0.0), true);
        inner.add_viewpoint(Point3::new(29.0, 0.0, 0.0), true);
        inner.add_viewpoint(Point3::new(30.0, 0.0, 0.0), false);
        let vm = RecordingViewpoints::new(inner);

        let sensor = SimSensor::new(Point3::origin());
        let update = tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert_eq!(update.direct, 2);
        // The near point is seen by the sensor and never reaches the viewpoints.
        assert_eq!(*vm.queries.borrow(), vec![blind, first_hit]);
    }

    #[test]
    fn unvisited_viewpoint_does_not_cover() {
        let far = Point3::new(30.0, 0.0, 0.0);
        let (mut grid, mut cloud) = grid_with(&[far]);
        let mut vm = SimViewpointManager::new(10.0, 0.5);
        vm.add_viewpoint(Point3::new(28.0, 0.0, 0.0), false);
        let sensor = SimSensor::new(Point3::origin());
        tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert!(!cloud[0].covered);
    }

    #[test]
    fn dilation_reaches_only_within_radius() {
        let seen = Point3::new(2.0, 0.0, 0.0);
        let hidden_near = Point3::new(2.4, 0.0, 0.0);
        let hidden_far = Point3::new(3.5, 0.0, 0.0);
        let (mut grid, mut cloud) = grid_with(&[seen, hidden_near, hidden_far]);
        let vm = SimViewpointManager::new(10.0, 0.5);
        let sensor = SimSensor::new(Point3::origin()).with_occluded(vec![hidden_near, hidden_far]);

        let update = tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert_eq!(update.direct, 1);
        assert_eq!(update.dilated, 1);
        let covered = |x: f32| cloud.iter().any(|p| p.position.x == x && p.covered);
        assert!(covered(2.0));
        assert!(covered(2.4));
        assert!(!covered(3.5));
    }

    #[test]
    fn dilation_does_not_chain() {
        // Each hop is 0.4 < radius 0.5, but only the seed's neighbours flip.
        let pts = [
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.4, 0.0, 0.0),
            Point3::new(2.8, 0.0, 0.0),
        ];
        let (mut grid, mut cloud) = grid_with(&pts);
        let vm = SimViewpointManager::new(10.0, 0.5);
        let sensor = SimSensor::new(Point3::origin()).with_occluded(vec![pts[1], pts[2]]);
        tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert!(!cloud.iter().any(|p| p.position.x == 2.8 && p.covered));
    }

    #[test]
    fn squeeze_favours_vertical_neighbours() {
        let seen = Point3::new(2.0, 0.0, 0.0);
        // 0.8 above: squeezed to 0.4, inside radius 0.5.
        let above = Point3::new(2.0, 0.0, 0.8);
        let (mut grid, mut cloud) = grid_with(&[seen, above]);
        let vm = SimViewpointManager::new(10.0, 0.5);
        let sensor = SimSensor::new(Point3::origin()).with_occluded(vec![above]);
        let update = tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
        assert_eq!(update.dilated, 1);
    }

    #[test]
    fn coverage_is_monotonic_across_calls() {
        let target = Point3::new(2.0, 0.0, 0.0);
        let (mut grid, mut cloud) = grid_with(&[target]);
        let vm = SimViewpointManager::new(10.0, 0.5);
        let t = tracker();
        t.update_covered_area(&mut cloud, &SimSensor::new(Point3::origin()), &vm, &mut grid);
        assert!(cloud[0].covered);

        // Sensor far away and fully occluded: the flag must survive.
        let blind = SimSensor::new(Point3::new(100.0, 100.0, 0.0)).with_occluded(vec![target]);
        let update = t.update_covered_area(&mut cloud, &blind, &vm, &mut grid);
        assert!(cloud[0].covered);
        assert_eq!(update.direct, 0);
        assert_eq!(update.total_covered, 1);
    }

    #[test]
    #[should_panic(expected = "out of sync")]
    fn unmapped_index_panics() {
        let (mut grid, mut cloud) = grid_with(&[Point3::new(2.0, 0.0, 0.0)]);
        cloud.push(SurfacePoint::new(2.1, 0.0, 0.0));
        let vm = SimViewpointManager::new(10.0, 0.5);
        let sensor = SimSensor::new(Point3::origin());
        tracker().update_covered_area(&mut cloud, &sensor, &vm, &mut grid);
    }

    #[test]
    fn uncovered_points_register_with_unvisited_viewpoints() {
        let mut cloud = vec![
            SurfacePoint::new(1.0, 0.0, 0.0),
            SurfacePoint::new(50.0, 0.0, 0.0),
            SurfacePoint::new(2.0, 0.0, 0.0),
        ];
        cloud[2].covered = true;

        let mut vm = SimViewpointManager::new(10.0, 0.5);
        let a = vm.add_viewpoint(Point3::origin(), false);
        let b = vm.add_viewpoint(Point3::new(3.0, 0.0, 0.0), false);
        let visited = vm.add_viewpoint(Point3::new(1.0, 1.0, 0.0), true);

        let mut t = tracker();
        let (n, nf) = t.collect_uncovered(&cloud, None, &mut vm);
        assert_eq!((n, nf), (1, 0));
        assert_eq!(t.uncovered()[0].source_index, 0);
        assert_eq!(vm.uncovered_points(a), &[0]);
        assert_eq!(vm.uncovered_points(b), &[0]);
        assert!(vm.uncovered_points(visited).is_empty());
    }

    #[test]
    fn uncovered_bookkeeping_is_reset_each_call() {
        let cloud = vec![SurfacePoint::new(1.0, 0.0, 0.0)];
        let mut vm = SimViewpointManager::new(10.0, 0.5);
        let a = vm.add_viewpoint(Point3::origin(), false);
        let mut t = tracker();
        t.collect_uncovered(&cloud, None, &mut vm);
        t.collect_uncovered(&cloud, None, &mut vm);
        assert_eq!(vm.uncovered_points(a), &[0]);
    }

    #[test]
    fn frontier_points_use_separate_channel() {
        let frontier = vec![SurfacePoint::new(4.0, 0.0, 0.0), SurfacePoint::new(90.0, 0.0, 0.0)];
        let mut vm = SimViewpointManager::new(10.0, 0.5);
        let a = vm.add_viewpoint(Point3::origin(), false);
        let mut t = tracker();
        let (n, nf) = t.collect_uncovered(&[], Some(&frontier), &mut vm);
        assert_eq!((n, nf), (0, 1));
        assert!(vm.uncovered_points(a).is_empty());
        assert_eq!(vm.uncovered_frontier_points(a), &[0]);
        assert_eq!(t.uncovered_frontier()[0].source_index, 0);
    }
}
