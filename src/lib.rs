/// Versioned image generation and annotation editing core
///
/// Image versions are grouped into lineage rows, new versions are produced
/// by generation jobs with optimistic credit accounting, and each image
/// carries an editable vector annotation layer.

pub mod annotate;
pub mod config;
pub mod error;
pub mod generation;
pub mod lineage;
pub mod media;
pub mod state;

pub use config::Config;
pub use error::{EditorError, GenerationError, Result};
