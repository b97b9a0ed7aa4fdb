//! Novelty (diff) detection by voxel age averaging.
//!
//! Points already resident in the stacked aggregate are tagged old (255), the
//! incoming sweep is tagged new (0), and the union is voxel-downsampled.  Each
//! output voxel's age is the mean of its contributors, so a voxel made mostly
//! of new points ends up low.  Voxels below the age threshold form the diff
//! cloud.
//!
//! The detector is approximate: a voxel needs roughly one new contributor in
//! six before it crosses the default threshold of 40, so mixed voxels lean
//! towards "old".

use cartos_perception::VoxelDownsampler;
use cartos_types::SurfacePoint;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct NoveltyDetector {
    downsampler: VoxelDownsampler,
    age_threshold: u8,
    diff: Vec<SurfacePoint>,
}

impl NoveltyDetector {
    pub fn new(leaf_size: f32, age_threshold: u8) -> Self {
        Self {
            downsampler: VoxelDownsampler::new(leaf_size),
            age_threshold,
            diff: Vec::new(),
        }
    }

    /// Classify `sweep` against `aggregate` (the union of previously stacked
    /// sweeps) and return the novel voxels.
    ///
    /// An empty sweep clears the previous diff and yields nothing.
    pub fn detect(
        &mut self,
        sweep: &[SurfacePoint],
        aggregate: &[SurfacePoint],
    ) -> &[SurfacePoint] {
        self.diff.clear();
        if sweep.is_empty() {
            warn!("empty sweep; diff cloud cleared");
            return &self.diff;
        }

        let tagged: Vec<SurfacePoint> = aggregate
            .iter()
            .map(|p| SurfacePoint {
                age: SurfacePoint::AGE_OLD,
                ..*p
            })
            .chain(sweep.iter().map(|p| p.untagged()))
            .collect();

        let threshold = self.age_threshold;
        self.diff = self
            .downsampler
            .downsample(&tagged)
            .into_iter()
            .filter(|p| p.age < threshold)
            .collect();

        debug!(
            sweep = sweep.len(),
            aggregate = aggregate.len(),
            novel = self.diff.len(),
            "novelty detection done"
        );
        &self.diff
    }

    /// Diff cloud of the latest detection.
    pub fn diff(&self) -> &[SurfacePoint] {
        &self.diff
    }

    pub fn age_threshold(&self) -> u8 {
        self.age_threshold
    }

    pub fn clear(&mut self) {
        self.diff.clear();
    }
}
