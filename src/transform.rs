use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageReader, Limits};
use std::io::Cursor;
use thiserror::Error;

use crate::config::{ImageFormat, TargetSize};

pub const JPEG_QUALITY: u8 = 85;
pub const WEBP_QUALITY: f32 = 85.0;

/// Sources wider or taller than this are refused before any pixels are allocated.
pub const MAX_SOURCE_DIMENSION: u32 = 16_384;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unsupported image format: {0}")]
    Unsupported(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("transform task aborted: {0}")]
    Aborted(String),
}

/// A thumbnail ready to be served or cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl TransformedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Decodes raw image bytes, detecting the format from magic bytes.
///
/// # Errors
/// Returns `TransformError::Unsupported` for formats outside the supported
/// families, `TransformError::Decode` for corrupt data.
pub fn decode_image(bytes: &[u8]) -> Result<(DynamicImage, ImageFormat), TransformError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| TransformError::Unsupported(e.to_string()))?;
    let fmt = ImageFormat::from_detected(guessed)
        .ok_or_else(|| TransformError::Unsupported(format!("{:?}", guessed)))?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_DIMENSION);
    limits.max_image_height = Some(MAX_SOURCE_DIMENSION);

    let mut reader = ImageReader::with_format(Cursor::new(bytes), guessed);
    reader.limits(limits);
    let img = reader
        .decode()
        .map_err(|e| TransformError::Decode(e.to_string()))?;

    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(TransformError::EmptyImage);
    }

    Ok((img, fmt))
}

/// Centered region of a `width`×`height` source with the aspect ratio of `target`.
///
/// Returns `(x, y, crop_width, crop_height)`; both extents are at least 1 and
/// never exceed the source.
pub fn fill_region(width: u32, height: u32, target: TargetSize) -> (u32, u32, u32, u32) {
    let (w, h) = (u64::from(width), u64::from(height));
    let (tw, th) = (u64::from(target.width.max(1)), u64::from(target.height.max(1)));

    // Compare w/h against tw/th without floating point
    let (crop_w, crop_h) = if w * th > h * tw {
        ((h * tw / th).max(1).min(w), h)
    } else {
        (w, (w * th / tw).max(1).min(h))
    };

    let x = (w - crop_w) / 2;
    let y = (h - crop_h) / 2;
    (x as u32, y as u32, crop_w as u32, crop_h as u32)
}

/// Center-crops the source to the target aspect ratio, then scales the crop to
/// exactly `target`. Smaller sources are scaled up. Memory stays proportional
/// to the source and target, never to their ratio.
pub fn crop_to_fill(img: &DynamicImage, target: TargetSize) -> DynamicImage {
    let (x, y, crop_w, crop_h) = fill_region(img.width(), img.height(), target);
    let cropped = img.crop_imm(x, y, crop_w, crop_h);
    cropped.resize_exact(target.width, target.height, FilterType::Lanczos3)
}

/// Encodes in the given family. Deterministic for identical input.
pub fn encode_image(img: &DynamicImage, fmt: ImageFormat) -> Result<Vec<u8>, TransformError> {
    let mut out = Vec::new();

    match fmt {
        ImageFormat::jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
        ImageFormat::webp => {
            let (w, h) = img.dimensions();
            let encoded = if img.color().has_alpha() {
                let rgba = img.to_rgba8();
                webp::Encoder::from_rgba(rgba.as_raw(), w, h).encode(WEBP_QUALITY)
            } else {
                let rgb = img.to_rgb8();
                webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode(WEBP_QUALITY)
            };
            out.extend_from_slice(&encoded);
        }
        ImageFormat::png => {
            img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
        ImageFormat::gif => {
            // The GIF encoder only takes 8-bit RGBA
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Gif)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
    }

    Ok(out)
}

/// Decode, crop-then-scale to `target`, and re-encode in the detected family.
///
/// Pure: no I/O, and identical `raw` and `target` always produce identical bytes.
pub fn transform(raw: &[u8], target: TargetSize) -> Result<TransformedImage, TransformError> {
    let (img, format) = decode_image(raw)?;
    let thumb = crop_to_fill(&img, target);
    let bytes = encode_image(&thumb, format)?;

    Ok(TransformedImage {
        bytes,
        format,
        width: thumb.width(),
        height: thumb.height(),
    })
}
