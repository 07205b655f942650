//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! Page images and review crops travel to the VLM as base64 PNG data-URIs.
//! PNG keeps caption text and thin axis lines crisp; JPEG artefacts around
//! them make the model misjudge where a figure ends.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page image or crop as a base64 PNG ready for the VLM API.
///
/// `detail: "high"` lets GPT-4-class models tile the image at full
/// resolution; with `"low"` small captions and figure borders are lost and
/// the reported boxes drift.
pub fn encode_image(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded {}x{} image → {} bytes base64", img.width(), img.height(), b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
