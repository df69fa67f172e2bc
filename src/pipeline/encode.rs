//! Image encoding: PNG re-encoding for storage and base64 `ImageData` for the
//! vision API.
//!
//! PNG everywhere: question snippets are mostly text and line art, where
//! lossless compression is both smaller and crisper than JPEG.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageEncoder};
use tracing::debug;

/// Encode an image as PNG with adaptive filtering.
///
/// Alpha is dropped: rendered pages and crops are opaque, and RGB8 PNGs are
/// roughly a quarter smaller than the RGBA bitmaps pdfium hands back.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    PngEncoder::new_with_quality(&mut buf, CompressionType::Default, FilterType::Adaptive)
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        rgb.width(),
        rgb.height(),
        buf.len()
    );
    Ok(buf)
}

/// Wrap already-encoded PNG bytes for a multimodal request.
///
/// `detail: "high"` keeps small option labels readable for models that
/// downscale images by default.
pub fn png_image_data(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded page → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
