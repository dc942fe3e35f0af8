use std::io::Cursor;
use image::{DynamicImage, GenericImageView, ImageFormat};
use crate::entities::Dimensions;
use crate::error::{LibraryError, Result};

/// Longest edge of a generated thumbnail, in pixels.
pub const THUMBNAIL_SIZE: u32 = 400;

pub struct Thumbnail {
    pub bytes: Vec<u8>,
    /// Dimensions of the original image, not of the thumbnail.
    pub source_dimensions: Dimensions,
}

/// Turns uploaded image bytes into a thumbnail and the source dimensions.
/// Runs on a blocking thread.
pub trait Thumbnailer: Send + Sync {
    fn derive(&self, bytes: &[u8], ext: &str) -> Result<Thumbnail>;
}

#[derive(Debug, Clone)]
pub struct ImageThumbnailer {
    pub size: u32,
}

impl Default for ImageThumbnailer {
    fn default() -> Self {
        Self { size: THUMBNAIL_SIZE }
    }
}

impl Thumbnailer for ImageThumbnailer {
    fn derive(&self, bytes: &[u8], ext: &str) -> Result<Thumbnail> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| LibraryError::Upload(format!("cannot decode image: {e}")))?;
        let (width, height) = img.dimensions();
        let thumb = img.thumbnail(self.size, self.size);

        // The thumbnail keeps the library filename, so it is encoded in the same format.
        let format = ImageFormat::from_extension(ext).unwrap_or(ImageFormat::Jpeg);
        let thumb = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(thumb.to_rgb8()),
            _ => thumb,
        };
        let mut out = Cursor::new(Vec::new());
        thumb.write_to(&mut out, format)
            .map_err(|e| LibraryError::Upload(format!("cannot encode thumbnail: {e}")))?;

        Ok(Thumbnail { bytes: out.into_inner(), source_dimensions: Dimensions { width, height } })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{ImageBuffer, Rgb};
    use super::*;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 128u8]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn derives_dimensions_and_small_thumbnail() {
        let thumbnailer = ImageThumbnailer { size: 50 };
        let thumb = thumbnailer.derive(&png_bytes(200, 100), "png").unwrap();
        assert_eq!(thumb.source_dimensions, Dimensions { width: 200, height: 100 });
        let decoded = image::load_from_memory(&thumb.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (50, 25));
    }

    #[test]
    fn jpeg_thumbnails_for_jpeg_names() {
        let thumb = ImageThumbnailer::default().derive(&png_bytes(10, 10), "jpg").unwrap();
        assert_eq!(image::guess_format(&thumb.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn garbage_is_an_upload_error() {
        let result = ImageThumbnailer::default().derive(b"definitely not an image", "png");
        assert!(matches!(result, Err(LibraryError::Upload(_))));
    }
}
