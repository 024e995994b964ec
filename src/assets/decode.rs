use std::fmt;
use std::sync::Arc;

use anyhow::Context;

use crate::foundation::error::{EaselError, EaselResult};

/// Decoded raster image in premultiplied RGBA8 form.
#[derive(Debug)]
struct DecodedImage {
    width: u32,
    height: u32,
    rgba8_premul: Vec<u8>,
}

/// Opaque, cheap-to-clone handle to a decoded image.
///
/// Two handles compare equal only when they refer to the same decoded image.
#[derive(Clone)]
pub struct ImageHandle(Arc<DecodedImage>);

impl ImageHandle {
    /// Wrap already premultiplied RGBA8 pixels.
    pub fn from_premul_rgba8(width: u32, height: u32, rgba8_premul: Vec<u8>) -> EaselResult<Self> {
        if width == 0 || height == 0 {
            return Err(EaselError::validation("image dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4);
        if rgba8_premul.len() != expected {
            return Err(EaselError::validation(format!(
                "image byte len {} does not match {width}x{height}",
                rgba8_premul.len()
            )));
        }
        Ok(Self(Arc::new(DecodedImage {
            width,
            height,
            rgba8_premul,
        })))
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.0.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.0.height
    }

    /// Row-major premultiplied RGBA8 bytes.
    pub fn rgba8_premul(&self) -> &[u8] {
        &self.0.rgba8_premul
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageHandle({}x{})", self.0.width, self.0.height)
    }
}

/// Decode encoded image bytes (PNG, JPEG, ...) and convert to premultiplied RGBA8.
pub fn decode_image(bytes: &[u8]) -> EaselResult<ImageHandle> {
    let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut rgba8_premul = rgba.into_raw();
    premultiply_rgba8_in_place(&mut rgba8_premul);

    ImageHandle::from_premul_rgba8(width, height, rgba8_premul)
}

/// Read and decode an image file.
pub fn load_image(path: impl AsRef<std::path::Path>) -> EaselResult<ImageHandle> {
    let path = path.as_ref();
    let bytes =
        std::fs::read(path).with_context(|| format!("read image '{}'", path.display()))?;
    decode_image(&bytes)
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/assets/decode.rs"]
mod tests;
