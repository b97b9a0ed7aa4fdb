//! `cartos-env` – the egocentric planning environment of an exploration
//! robot.
//!
//! Keypose sweeps stream in; the environment keeps a rolling stack of them
//! and derives what the exploration planner needs each cycle:
//!
//! - a **diff cloud** of newly observed geometry ([`novelty`]),
//! - per-point **coverage** of the planner cloud and the uncovered points
//!   unvisited viewpoints could still observe ([`coverage`]),
//! - clustered **frontiers** bordering unknown space ([`frontier`]),
//! - **collision** queries against stacked wall geometry ([`collision`]).
//!
//! [`env::PlanningEnv`] owns all of it and sequences the stages; the map,
//! viewpoint and sensor collaborators it drives are described by the traits
//! in [`collaborators`], with in-memory stand-ins in [`sim`].

pub mod collaborators;
pub mod collision;
pub mod config;
pub mod coverage;
pub mod env;
pub mod frontier;
pub mod novelty;
pub mod sim;
pub mod stack;
pub mod telemetry;

pub use config::{ConfigError, EnvConfig};
pub use env::{CycleReport, IngestOutcome, IngestStats, MapBackends, PlanningEnv};
