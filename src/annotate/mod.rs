/// Annotation module
///
/// This module handles per-image vector annotations:
/// - The annotation model, geometry and hit-testing (annotation.rs)
/// - The pointer interaction state machine with undo/redo (engine.rs)

pub mod annotation;
pub mod engine;

pub use annotation::{Annotation, AnnotationId, AnnotationKind, ImageHandle, Point, Shape, ShapeKind};
pub use engine::{AnnotationEngine, EngineSettings, Phase, Style, Tool, Update};
