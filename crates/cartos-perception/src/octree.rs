//! Spatial Query Engine.
//!
//! Partitions 3-D space using a recursive **Octree** so that the planning
//! environment can answer radius queries ("which obstacle points lie within
//! 0.4 m of this pose?") without scanning every point.
//!
//! Every stored point carries the index it had in the cloud the tree was
//! built from, so query results map straight back into that cloud.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Aabb`]     | An axis-aligned bounding box.                           |
//! | [`Octree`]   | Spatial index; bulk-build from a cloud, radius-search.  |
//!
//! # Example
//!
//! ```rust
//! use cartos_perception::octree::Octree;
//! use cartos_types::Point3;
//!
//! let cloud = [
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(0.3, 0.0, 0.0),
//!     Point3::new(5.0, 5.0, 5.0),
//! ];
//! let tree = Octree::from_points(cloud.iter().copied());
//!
//! let mut near = tree.radius_search(Point3::new(0.1, 0.0, 0.0), 0.5);
//! near.sort();
//! assert_eq!(near, vec![0, 1]);
//! assert_eq!(tree.count_within(Point3::new(5.0, 5.0, 5.0), 0.1), 1);
//! ```

use cartos_types::Point3;

/// Leaf capacity used by [`Octree::from_points`].
pub const DEFAULT_CAPACITY: usize = 16;

const DEFAULT_MAX_DEPTH: usize = 10;

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3,
    pub max: Point3,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Box centred on `centre` reaching `half_extents` along each axis.
    pub fn around(centre: Point3, half_extents: Point3) -> Self {
        Self::new(
            Point3::new(
                centre.x - half_extents.x,
                centre.y - half_extents.y,
                centre.z - half_extents.z,
            ),
            Point3::new(
                centre.x + half_extents.x,
                centre.y + half_extents.y,
                centre.z + half_extents.z,
            ),
        )
    }

    /// Smallest box enclosing every finite point, or `None` when there is
    /// none.
    pub fn enclosing(points: impl IntoIterator<Item = Point3>) -> Option<Self> {
        points
            .into_iter()
            .filter(|p| p.is_finite())
            .fold(None, |acc: Option<Aabb>, p| match acc {
                None => Some(Aabb { min: p, max: p }),
                Some(b) => Some(Aabb::new(
                    Point3::new(b.min.x.min(p.x), b.min.y.min(p.y), b.min.z.min(p.z)),
                    Point3::new(b.max.x.max(p.x), b.max.y.max(p.y), b.max.z.max(p.z)),
                )),
            })
    }

    /// Return the centre point of the box.
    pub fn centre(&self) -> Point3 {
        Point3::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
            (self.min.z + self.max.z) * 0.5,
        )
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Squared distance from `p` to the closest point of the box (zero when
    /// `p` is inside).
    pub fn distance_squared_to(&self, p: Point3) -> f32 {
        let dx = (self.min.x - p.x).max(0.0).max(p.x - self.max.x);
        let dy = (self.min.y - p.y).max(0.0).max(p.y - self.max.y);
        let dz = (self.min.z - p.z).max(0.0).max(p.z - self.max.z);
        dx * dx + dy * dy + dz * dz
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Octree
// ────────────────────────────────────────────────────────────────────────────

/// A recursive spatial index that subdivides 3-D space into eight octants.
///
/// Points are stored in the deepest node whose bounding box still contains
/// them.  Subdividing stops when either
/// - the number of points in a node is ≤ `capacity`, or
/// - `max_depth` levels have already been created.
///
/// The depth cap keeps coincident points (which can never be separated by
/// subdivision) in a single leaf.
///
/// The tree is read-only once built: rebuild it whenever the underlying
/// cloud changes.
#[derive(Debug)]
pub struct Octree {
    root: OctreeNode,
    max_depth: usize,
    len: usize,
}

impl Octree {
    /// Create an empty octree covering `bounds`.
    ///
    /// - `capacity` – maximum points per leaf before subdivision is attempted.
    pub fn new(bounds: Aabb, capacity: usize) -> Self {
        Self::with_max_depth(bounds, capacity, DEFAULT_MAX_DEPTH)
    }

    /// Create an empty octree with an explicit maximum subdivision depth.
    pub fn with_max_depth(bounds: Aabb, capacity: usize, max_depth: usize) -> Self {
        Self {
            root: OctreeNode::new(bounds, capacity.max(1)),
            max_depth,
            len: 0,
        }
    }

    /// Bulk-build a tree over `points`; each point is indexed by its position
    /// in the iterator.  Non-finite points are skipped but still consume an
    /// index, so indices always line up with the source cloud.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = Point3>,
        I::IntoIter: Clone,
    {
        let points = points.into_iter();
        let bounds = Aabb::enclosing(points.clone())
            .unwrap_or_else(|| Aabb::new(Point3::origin(), Point3::origin()));
        let mut tree = Self::new(bounds, DEFAULT_CAPACITY);
        for (index, p) in points.enumerate() {
            tree.insert(p, index);
        }
        tree
    }

    /// Insert a point tagged with `index`.
    ///
    /// Returns `false` (and stores nothing) when the point lies outside the
    /// root bounding box.
    pub fn insert(&mut self, point: Point3, index: usize) -> bool {
        let inserted = self.root.insert(Entry { point, index }, self.max_depth, 0);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Return the total number of points stored in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the tree contains no points.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Indices of every point within `radius` of `centre` (boundary
    /// included).  The order of the returned list is unspecified.
    pub fn radius_search(&self, centre: Point3, radius: f32) -> Vec<usize> {
        let mut out = Vec::new();
        if radius >= 0.0 {
            self.root.radius_search(centre, radius * radius, &mut out);
        }
        out
    }

    /// Number of points within `radius` of `centre`, without allocating.
    pub fn count_within(&self, centre: Point3, radius: f32) -> usize {
        if radius < 0.0 {
            return 0;
        }
        self.root.count_within(centre, radius * radius)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OctreeNode – internal implementation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Entry {
    point: Point3,
    index: usize,
}

#[derive(Debug)]
struct OctreeNode {
    bounds: Aabb,
    capacity: usize,
    /// Entries stored at this node (only non-empty when the node is a leaf).
    entries: Vec<Entry>,
    /// Eight children; `None` while this node is a leaf.
    children: Option<Box<[OctreeNode; 8]>>,
}

impl OctreeNode {
    fn new(bounds: Aabb, capacity: usize) -> Self {
        Self {
            bounds,
            capacity,
            entries: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, entry: Entry, max_depth: usize, depth: usize) -> bool {
        if !self.bounds.contains_point(entry.point) {
            return false;
        }

        if let Some(children) = self.children.as_mut() {
            return children
                .iter_mut()
                .find(|c| c.bounds.contains_point(entry.point))
                .is_some_and(|c| c.insert(entry, max_depth, depth + 1));
        }

        self.entries.push(entry);
        if self.entries.len() > self.capacity && depth < max_depth {
            self.subdivide(max_depth, depth);
        }
        true
    }

    fn radius_search(&self, centre: Point3, radius_sq: f32, out: &mut Vec<usize>) {
        if self.bounds.distance_squared_to(centre) > radius_sq {
            return;
        }
        match &self.children {
            None => out.extend(
                self.entries
                    .iter()
                    .filter(|e| e.point.distance_squared(centre) <= radius_sq)
                    .map(|e| e.index),
            ),
            Some(children) => {
                for child in children.iter() {
                    child.radius_search(centre, radius_sq, out);
                }
            }
        }
    }

    fn count_within(&self, centre: Point3, radius_sq: f32) -> usize {
        if self.bounds.distance_squared_to(centre) > radius_sq {
            return 0;
        }
        match &self.children {
            None => self
                .entries
                .iter()
                .filter(|e| e.point.distance_squared(centre) <= radius_sq)
                .count(),
            Some(children) => children
                .iter()
                .map(|c| c.count_within(centre, radius_sq))
                .sum(),
        }
    }

    /// Split this leaf into eight children and redistribute existing entries.
    fn subdivide(&mut self, max_depth: usize, depth: usize) {
        let c = self.bounds.centre();
        let min = self.bounds.min;
        let max = self.bounds.max;

        let octants = [
            Aabb::new(min, c),
            Aabb::new(Point3::new(c.x, min.y, min.z), Point3::new(max.x, c.y, c.z)),
            Aabb::new(Point3::new(min.x, c.y, min.z), Point3::new(c.x, max.y, c.z)),
            Aabb::new(Point3::new(c.x, c.y, min.z), Point3::new(max.x, max.y, c.z)),
            Aabb::new(Point3::new(min.x, min.y, c.z), Point3::new(c.x, c.y, max.z)),
            Aabb::new(Point3::new(c.x, min.y, c.z), Point3::new(max.x, c.y, max.z)),
            Aabb::new(Point3::new(min.x, c.y, c.z), Point3::new(c.x, max.y, max.z)),
            Aabb::new(c, max),
        ];

        let cap = self.capacity;
        let mut children = Box::new(octants.map(|b| OctreeNode::new(b, cap)));

        let entries = std::mem::take(&mut self.entries);
        for e in entries {
            if let Some(child) = children.iter_mut().find(|c| c.bounds.contains_point(e.point)) {
                child.insert(e, max_depth, depth + 1);
            }
        }

        self.children = Some(children);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
