//! Decoded frames and the JPEG/PNG codecs used by the camera and vision endpoints.

use crate::error::CameraError;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;

/// Which decoded representation a consumer wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Color,
    Gray,
}

impl ColorMode {
    pub fn from_is_color(is_color: bool) -> Self {
        if is_color {
            ColorMode::Color
        } else {
            ColorMode::Gray
        }
    }
}

/// A decoded frame shared between caches. The default value holds no image.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame(Option<Arc<DynamicImage>>);

impl DecodedFrame {
    pub fn new(image: DynamicImage) -> Self {
        DecodedFrame(Some(Arc::new(image)))
    }

    pub fn image(&self) -> Option<&Arc<DynamicImage>> {
        self.0.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Decodes JPEG bytes and converts them to the requested representation.
pub fn decode_jpeg(bytes: &[u8], mode: ColorMode) -> Result<DynamicImage, CameraError> {
    if bytes.is_empty() {
        return Err(CameraError::NoFrame);
    }
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    Ok(convert(image, mode))
}

pub fn convert(image: DynamicImage, mode: ColorMode) -> DynamicImage {
    match (mode, &image) {
        (ColorMode::Color, DynamicImage::ImageRgb8(_)) => image,
        (ColorMode::Color, _) => DynamicImage::ImageRgb8(image.to_rgb8()),
        (ColorMode::Gray, DynamicImage::ImageLuma8(_)) => image,
        (ColorMode::Gray, _) => DynamicImage::ImageLuma8(image.to_luma8()),
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CameraError> {
    encode(image, ImageFormat::Png)
}

/// JPEG has no alpha, so anything other than 8-bit gray or RGB is flattened to RGB first.
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, CameraError> {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => {
            encode(image, ImageFormat::Jpeg)
        }
        other => encode(&DynamicImage::ImageRgb8(other.to_rgb8()), ImageFormat::Jpeg),
    }
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, CameraError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), format)
        .map_err(|e| CameraError::Encode(e.to_string()))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, RgbaImage};

    fn sample_jpeg() -> Vec<u8> {
        let image = RgbImage::from_fn(16, 8, |x, _| Rgb([x as u8 * 16, 100, 200]));
        encode_jpeg(&DynamicImage::ImageRgb8(image)).unwrap()
    }

    #[test]
    fn test_decode_modes() {
        let jpeg = sample_jpeg();
        let color = decode_jpeg(&jpeg, ColorMode::Color).unwrap();
        let gray = decode_jpeg(&jpeg, ColorMode::Gray).unwrap();
        assert!(matches!(color, DynamicImage::ImageRgb8(_)));
        assert!(matches!(gray, DynamicImage::ImageLuma8(_)));
        assert_eq!((gray.width(), gray.height()), (16, 8));
    }

    #[test]
    fn test_decode_rejects_empty_and_garbage() {
        assert!(matches!(
            decode_jpeg(&[], ColorMode::Color),
            Err(CameraError::NoFrame)
        ));
        assert!(matches!(
            decode_jpeg(b"not a jpeg", ColorMode::Color),
            Err(CameraError::Decode(_))
        ));
    }

    #[test]
    fn test_encode_jpeg_flattens_alpha() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let jpeg = encode_jpeg(&rgba).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_encode_png_signature() {
        let png = encode_png(&DynamicImage::ImageLuma8(image::GrayImage::new(3, 3))).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
