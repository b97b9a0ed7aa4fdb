//! `cartos-perception` – point-cloud geometry for the planning environment.
//!
//! Turns raw keypose sweeps and frontier voxels into the structures the
//! planning environment reasons over.
//!
//! # Modules
//!
//! - [`octree`] – [`Octree`][octree::Octree]: indexed spatial partition
//!   answering radius searches, used for collision checks, coverage dilation
//!   and clustering.
//! - [`voxel`] – [`VoxelDownsampler`][voxel::VoxelDownsampler]: voxel-grid
//!   averaging that also averages the age tag, the basis of novelty
//!   detection.
//! - [`vertical`] – [`VerticalSurfaceExtractor`][vertical::VerticalSurfaceExtractor]:
//!   keeps points on near-vertical structure.
//! - [`cluster`] – [`EuclideanClusterer`][cluster::EuclideanClusterer]:
//!   proximity clustering with size bounds.

pub mod cluster;
pub mod octree;
pub mod vertical;
pub mod voxel;

pub use cluster::EuclideanClusterer;
pub use octree::{Aabb, Octree};
pub use vertical::VerticalSurfaceExtractor;
pub use voxel::VoxelDownsampler;
