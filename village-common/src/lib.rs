//! Shared domain types, configuration, and error catalog for the update
//! pipeline: every type that more than one `village-pipeline` component
//! needs lives here so the components stay decoupled from each other's
//! internals.

pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod model;
pub mod semver_util;

pub use config::PipelineConfig;
pub use errors::{PipelineError, Result};
