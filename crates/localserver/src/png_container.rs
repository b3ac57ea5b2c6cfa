//! PNG container for the `.png`-suffixed EC-krypto response form (spec.md
//! §4.4 step 9). Bytes are packed into a single-row grayscale image and
//! PNG-encoded; this is a container format choice, not a security property.

use image::{ColorType, ImageEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PngContainerError {
    #[error("png encode failed: {0}")]
    Encode(String),
    #[error("png decode failed: {0}")]
    Decode(String),
}

/// Pack `bytes` as a `len x 1` 8-bit grayscale PNG. `bytes` must be non-empty.
pub fn encode(bytes: &[u8]) -> Result<Vec<u8>, PngContainerError> {
    if bytes.is_empty() {
        return Err(PngContainerError::Encode("cannot encode an empty response".to_string()));
    }
    let width = bytes.len() as u32;
    let mut out = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut out);
    encoder
        .write_image(bytes, width, 1, ColorType::L8)
        .map_err(|e| PngContainerError::Encode(e.to_string()))?;
    Ok(out)
}

/// Recover the original bytes from a container built by [`encode`].
pub fn decode(png_bytes: &[u8]) -> Result<Vec<u8>, PngContainerError> {
    let image = image::load_from_memory(png_bytes).map_err(|e| PngContainerError::Decode(e.to_string()))?;
    Ok(image.into_luma8().into_raw())
}
