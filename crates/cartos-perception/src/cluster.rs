//! Euclidean cluster extraction.
//!
//! Region growing over radius neighbourhoods: two points belong to the same
//! cluster when a chain of points links them with every hop no longer than
//! `tolerance`.  Clusters outside `[min_size, max_size]` are discarded, the
//! rest are returned largest first.

use std::collections::VecDeque;

use cartos_types::Point3;

use crate::octree::Octree;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EuclideanClusterer {
    pub tolerance: f32,
    pub min_size: usize,
    pub max_size: usize,
}

impl EuclideanClusterer {
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance,
            min_size: 1,
            max_size: usize::MAX,
        }
    }

    pub fn with_size_bounds(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Partition `points` into clusters of point indices.
    ///
    /// Indices inside a cluster are ascending; clusters are sorted by size,
    /// largest first (ties keep discovery order).
    pub fn extract(&self, points: &[Point3]) -> Vec<Vec<usize>> {
        let tree = Octree::from_points(points.iter().copied());
        let mut visited = vec![false; points.len()];
        let mut clusters = Vec::new();

        for seed in 0..points.len() {
            if visited[seed] || !points[seed].is_finite() {
                continue;
            }
            visited[seed] = true;

            let mut members = vec![seed];
            let mut frontier = VecDeque::from([seed]);
            while let Some(current) = frontier.pop_front() {
                for neighbour in tree.radius_search(points[current], self.tolerance) {
                    if !visited[neighbour] {
                        visited[neighbour] = true;
                        members.push(neighbour);
                        frontier.push_back(neighbour);
                    }
                }
            }

            if (self.min_size..=self.max_size).contains(&members.len()) {
                members.sort_unstable();
                clusters.push(members);
            }
        }

        clusters.sort_by(|a, b| b.len().cmp(&a.len()));
        clusters
    }
}
