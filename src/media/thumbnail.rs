use std::io::Cursor;

use image::{imageops::FilterType, ImageFormat, ImageReader};
use tracing::debug;

use crate::error::Result;

/// Downscaled preview plus the real pixel size of the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// PNG-encoded preview
    pub bytes: Vec<u8>,
    pub real_width: u32,
    pub real_height: u32,
}

/// Decode `bytes`, resize to fit `size` x `size` and re-encode as PNG
pub fn derive_thumbnail(bytes: &[u8], size: u32) -> Result<Thumbnail> {
    let img = image::load_from_memory(bytes)?;
    let (real_width, real_height) = (img.width(), img.height());

    // Never upscale small sources
    let thumbnail = if real_width <= size && real_height <= size {
        img
    } else {
        img.resize(size, size, FilterType::Lanczos3)
    };

    let mut out = Cursor::new(Vec::new());
    thumbnail.write_to(&mut out, ImageFormat::Png)?;

    debug!(
        "📸 Generated thumbnail {}x{} from {}x{}",
        thumbnail.width(),
        thumbnail.height(),
        real_width,
        real_height
    );

    Ok(Thumbnail {
        bytes: out.into_inner(),
        real_width,
        real_height,
    })
}

/// Read pixel dimensions from the header without a full decode
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// File extension matching the encoded format, "bin" when unknown
pub fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_fits_box_and_keeps_real_size() {
        let thumb = derive_thumbnail(&sample_png(800, 400), 256).unwrap();
        assert_eq!((thumb.real_width, thumb.real_height), (800, 400));

        let decoded = image::load_from_memory(&thumb.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (256, 128));
    }

    #[test]
    fn test_small_source_is_not_upscaled() {
        let thumb = derive_thumbnail(&sample_png(40, 30), 256).unwrap();
        let decoded = image::load_from_memory(&thumb.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_probe_and_extension() {
        let png = sample_png(12, 7);
        assert_eq!(probe_dimensions(&png).unwrap(), (12, 7));
        assert_eq!(extension_for(&png), "png");
        assert_eq!(extension_for(b"not an image"), "bin");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(derive_thumbnail(b"definitely not pixels", 256).is_err());
    }
}
