//! Planning environment configuration – loaded from / saved to TOML.
//!
//! Every field has a default, so a partial file (or none at all) yields a
//! usable [`EnvConfig`].  Selected fields can be overridden from `CARTOS_*`
//! environment variables, see [`apply_env_overrides`].
//!
//! ```toml
//! stack_depth = 5
//! stacked_cloud_leaf_size = 0.2
//!
//! [frontier]
//! enabled = true
//! min_cluster_size = 30
//! ```

use std::fs;
use std::path::Path;

use cartos_types::{CartosError, Point3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while loading or saving a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write config at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Invalid(#[from] CartosError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Config types
// ─────────────────────────────────────────────────────────────────────────────

/// Frontier extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierConfig {
    /// Extract and cluster frontiers every cycle.
    #[serde(default)]
    pub enabled: bool,

    /// Maximum hop distance between two points of one cluster (metres).
    #[serde(default = "default_cluster_tolerance")]
    pub cluster_tolerance: f32,

    /// Clusters with fewer points are discarded.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Clusters with more points are discarded.
    #[serde(default = "default_max_cluster_size")]
    pub max_cluster_size: usize,

    /// Half-extents of the frontier query box around the robot.
    #[serde(default = "default_query_half_extents")]
    pub query_half_extents: [f32; 3],
}

/// Thresholds of the keypose-cloud vertical-surface filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerticalSurfaceConfig {
    #[serde(default = "default_vertical_radius")]
    pub radius: f32,
    #[serde(default = "default_leaf_size")]
    pub z_diff_min: f32,
    #[serde(default = "default_vertical_z_diff_max")]
    pub z_diff_max: f32,
    #[serde(default = "default_neighbor_threshold")]
    pub neighbor_threshold: usize,
}

/// Planning environment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Voxel edge used for the stacked cloud and novelty detection.
    #[serde(default = "default_leaf_size")]
    pub stacked_cloud_leaf_size: f32,

    /// Voxel edge of the planner cloud; also scales the near-field FOV test.
    #[serde(default = "default_leaf_size")]
    pub planner_cloud_leaf_size: f32,

    /// Voxel edge of the exported collision cloud.
    #[serde(default = "default_leaf_size")]
    pub collision_cloud_leaf_size: f32,

    /// Radius of the collision neighbour search.
    #[serde(default = "default_collision_check_radius")]
    pub collision_check_radius: f32,

    /// A query is in collision when strictly more neighbours than this lie
    /// within the check radius.
    #[serde(default = "default_collision_check_point_threshold")]
    pub collision_check_point_threshold: usize,

    /// Number of keypose sweeps kept in each cloud stack.
    #[serde(default = "default_stack_depth")]
    pub stack_depth: usize,

    /// Voxels whose averaged age falls below this are novel.
    #[serde(default = "default_novelty_age_threshold")]
    pub novelty_age_threshold: u8,

    /// z is divided by this before the coverage dilation search.
    #[serde(default = "default_z_squeeze_ratio")]
    pub cover_cloud_z_squeeze_ratio: f32,

    /// Height-over-distance ratio of the sensor's effective vertical FOV.
    #[serde(default = "default_vertical_fov_ratio")]
    pub vertical_fov_ratio: f32,

    #[serde(default)]
    pub frontier: FrontierConfig,

    #[serde(default)]
    pub vertical_surface: VerticalSurfaceConfig,
}

fn default_leaf_size() -> f32 {
    0.2
}
fn default_collision_check_radius() -> f32 {
    0.4
}
fn default_collision_check_point_threshold() -> usize {
    1
}
fn default_stack_depth() -> usize {
    5
}
fn default_novelty_age_threshold() -> u8 {
    40
}
fn default_z_squeeze_ratio() -> f32 {
    2.0
}
fn default_vertical_fov_ratio() -> f32 {
    0.3
}
fn default_cluster_tolerance() -> f32 {
    1.0
}
fn default_min_cluster_size() -> usize {
    30
}
fn default_max_cluster_size() -> usize {
    10_000
}
fn default_query_half_extents() -> [f32; 3] {
    [30.0, 30.0, 3.0]
}
fn default_vertical_radius() -> f32 {
    0.2
}
fn default_vertical_z_diff_max() -> f32 {
    2.0
}
fn default_neighbor_threshold() -> usize {
    2
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cluster_tolerance: default_cluster_tolerance(),
            min_cluster_size: default_min_cluster_size(),
            max_cluster_size: default_max_cluster_size(),
            query_half_extents: default_query_half_extents(),
        }
    }
}

impl FrontierConfig {
    pub fn half_extents(&self) -> Point3 {
        Point3::from(self.query_half_extents)
    }
}

impl Default for VerticalSurfaceConfig {
    fn default() -> Self {
        Self {
            radius: default_vertical_radius(),
            z_diff_min: default_leaf_size(),
            z_diff_max: default_vertical_z_diff_max(),
            neighbor_threshold: default_neighbor_threshold(),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            stacked_cloud_leaf_size: default_leaf_size(),
            planner_cloud_leaf_size: default_leaf_size(),
            collision_cloud_leaf_size: default_leaf_size(),
            collision_check_radius: default_collision_check_radius(),
            collision_check_point_threshold: default_collision_check_point_threshold(),
            stack_depth: default_stack_depth(),
            novelty_age_threshold: default_novelty_age_threshold(),
            cover_cloud_z_squeeze_ratio: default_z_squeeze_ratio(),
            vertical_fov_ratio: default_vertical_fov_ratio(),
            frontier: FrontierConfig::default(),
            vertical_surface: VerticalSurfaceConfig::default(),
        }
    }
}

impl EnvConfig {
    /// Reject values the environment cannot run with.
    pub fn validate(&self) -> Result<(), CartosError> {
        if self.stack_depth == 0 {
            return Err(CartosError::InvalidConfig("stack_depth must be at least 1".into()));
        }
        let positive = [
            ("stacked_cloud_leaf_size", self.stacked_cloud_leaf_size),
            ("planner_cloud_leaf_size", self.planner_cloud_leaf_size),
            ("collision_cloud_leaf_size", self.collision_cloud_leaf_size),
            ("collision_check_radius", self.collision_check_radius),
            ("cover_cloud_z_squeeze_ratio", self.cover_cloud_z_squeeze_ratio),
            ("vertical_fov_ratio", self.vertical_fov_ratio),
            ("frontier.cluster_tolerance", self.frontier.cluster_tolerance),
            ("vertical_surface.radius", self.vertical_surface.radius),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CartosError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if self.frontier.query_half_extents.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(CartosError::InvalidConfig(
                "frontier.query_half_extents must be non-negative".into(),
            ));
        }
        if self.frontier.min_cluster_size > self.frontier.max_cluster_size {
            return Err(CartosError::InvalidConfig(format!(
                "frontier.min_cluster_size {} exceeds max_cluster_size {}",
                self.frontier.min_cluster_size, self.frontier.max_cluster_size
            )));
        }
        let vs = &self.vertical_surface;
        if !(vs.z_diff_min >= 0.0 && vs.z_diff_min < vs.z_diff_max) {
            return Err(CartosError::InvalidConfig(format!(
                "vertical_surface height window ({}, {}) is empty",
                vs.z_diff_min, vs.z_diff_max
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a configuration from TOML text and validate it.
///
/// Environment overrides are not applied; see [`load_from`].
pub fn from_toml_str(raw: &str) -> Result<EnvConfig, ConfigError> {
    let cfg: EnvConfig = toml::from_str(raw)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load the config from `path`, apply `CARTOS_*` overrides and validate.
///
/// Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<EnvConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut cfg: EnvConfig = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Save the config to `path`, creating parent directories as needed.
pub fn save_to(cfg: &EnvConfig, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    fs::write(path, raw).map_err(write_err)
}

/// Apply `CARTOS_*` environment variable overrides to `cfg`.
///
/// Unparsable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `CARTOS_STACK_DEPTH` | `stack_depth` |
/// | `CARTOS_USE_FRONTIER` | `frontier.enabled` |
/// | `CARTOS_STACKED_CLOUD_LEAF_SIZE` | `stacked_cloud_leaf_size` |
/// | `CARTOS_PLANNER_CLOUD_LEAF_SIZE` | `planner_cloud_leaf_size` |
pub fn apply_env_overrides(cfg: &mut EnvConfig) {
    if let Ok(v) = std::env::var("CARTOS_STACK_DEPTH")
        && let Ok(depth) = v.parse::<usize>()
    {
        cfg.stack_depth = depth;
    }
    if let Ok(v) = std::env::var("CARTOS_USE_FRONTIER")
        && let Ok(enabled) = v.parse::<bool>()
    {
        cfg.frontier.enabled = enabled;
    }
    if let Ok(v) = std::env::var("CARTOS_STACKED_CLOUD_LEAF_SIZE")
        && let Ok(leaf) = v.parse::<f32>()
    {
        cfg.stacked_cloud_leaf_size = leaf;
    }
    if let Ok(v) = std::env::var("CARTOS_PLANNER_CLOUD_LEAF_SIZE")
        && let Ok(leaf) = v.parse::<f32>()
    {
        cfg.planner_cloud_leaf_size = leaf;
    }
}
