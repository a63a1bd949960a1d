/// Collaborators consumed by the generation controller
///
/// The model behind `GenerationBackend` and the pixel algorithm behind
/// `MaskRasterizer` live outside this crate.

use std::future::Future;

use crate::annotate::annotation::{Annotation, AnnotationKind, ImageHandle};
use crate::error::GenerationError;
use crate::state::data::QualityTier;

/// Pixels the new version is derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub id: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub source: SourceImage,
    pub prompt: String,
    /// Rasterized mask of the maskable annotations, if any
    pub mask: Option<Vec<u8>>,
    pub references: Vec<ImageHandle>,
    pub quality: QualityTier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    pub usage: Usage,
}

/// Generation-request collaborator. Called exactly once per submission.
pub trait GenerationBackend: Send + Sync + 'static {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<GeneratedImage, GenerationError>> + Send;
}

/// Converts annotations into a single mask image
pub trait MaskRasterizer: Send + Sync {
    /// None when nothing maskable is present
    fn rasterize(&self, annotations: &[Annotation], width: u32, height: u32) -> Option<Vec<u8>>;
}

/// Rasterizer for backends that work from the prompt alone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMask;

impl MaskRasterizer for NoMask {
    fn rasterize(&self, _annotations: &[Annotation], _width: u32, _height: u32) -> Option<Vec<u8>> {
        None
    }
}

/// Reference images attached as chips, in annotation order
pub fn reference_images(annotations: &[Annotation]) -> Vec<ImageHandle> {
    annotations
        .iter()
        .filter_map(|annotation| match &annotation.kind {
            AnnotationKind::Reference { image, .. } => Some(image.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::annotation::Point;

    #[test]
    fn test_reference_images_keep_order() {
        let annotations = vec![
            Annotation {
                id: 1,
                kind: AnnotationKind::Reference {
                    anchor: Point::new(0.0, 0.0),
                    image: ImageHandle::Stored {
                        storage_ref: "first.png".into(),
                    },
                    caption: None,
                },
            },
            Annotation {
                id: 2,
                kind: AnnotationKind::Stamp {
                    anchor: Point::new(1.0, 1.0),
                    text: Some("x".into()),
                    icon: None,
                },
            },
            Annotation {
                id: 3,
                kind: AnnotationKind::Reference {
                    anchor: Point::new(2.0, 2.0),
                    image: ImageHandle::Inline {
                        bytes: vec![1, 2, 3],
                        mime: Some("image/png".into()),
                    },
                    caption: Some("texture".into()),
                },
            },
        ];

        let refs = reference_images(&annotations);
        assert_eq!(refs.len(), 2);
        assert!(matches!(&refs[0], ImageHandle::Stored { storage_ref } if storage_ref == "first.png"));
    }

    #[test]
    fn test_no_mask_is_always_none() {
        assert_eq!(NoMask.rasterize(&[], 100, 100), None);
    }
}
