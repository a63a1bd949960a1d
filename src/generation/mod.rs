/// Generation module
///
/// This module drives image generation requests:
/// - Collaborator traits for the model and the mask rasterizer (backend.rs)
/// - Concurrency-aware duration and progress estimates (estimate.rs)
/// - The submission life cycle with optimistic credit accounting (controller.rs)

pub mod backend;
pub mod controller;
pub mod estimate;

pub use backend::{GeneratedImage, GenerationBackend, GenerationRequest, MaskRasterizer, NoMask, SourceImage, Usage};
pub use controller::{GenerationJobController, GenerationOutcome, PendingGeneration, Submission};
pub use estimate::{estimate_duration, progress};
