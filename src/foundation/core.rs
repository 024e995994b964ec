use std::fmt;

use crate::foundation::error::{EaselError, EaselResult};

/// Identity of one loaded generator instance. Never reused within a [`crate::Host`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sequence number of one `generate` call on an instance.
///
/// Strictly increasing per instance; ordering between tasks is decided by this number, never by
/// arrival time of their completions.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {}", self.0)
    }
}

/// Pixel dimensions of a drawable surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SurfaceSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl SurfaceSize {
    /// Create a validated size. Both sides must be in `1..=u16::MAX` (CPU raster limit).
    pub fn new(width: u32, height: u32) -> EaselResult<Self> {
        let max = u32::from(u16::MAX);
        if width == 0 || height == 0 {
            return Err(EaselError::validation("surface size must be non-zero"));
        }
        if width > max || height > max {
            return Err(EaselError::validation(format!(
                "surface size {width}x{height} exceeds {max}x{max}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Number of pixels covered by the surface.
    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Length of a premultiplied RGBA8 buffer of this size.
    pub fn byte_len(self) -> usize {
        self.pixel_count().saturating_mul(4)
    }

    /// Shorter side in pixels.
    pub fn min_side(self) -> u32 {
        self.width.min(self.height)
    }

    pub(crate) fn as_u16(self) -> EaselResult<(u16, u16)> {
        let w: u16 = self
            .width
            .try_into()
            .map_err(|_| EaselError::validation("surface width exceeds u16"))?;
        let h: u16 = self
            .height
            .try_into()
            .map_err(|_| EaselError::validation("surface height exceeds u16"))?;
        Ok((w, h))
    }
}

impl Default for SurfaceSize {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Environment flag telling generators what their output is used for.
///
/// `Export` is the high-resolution, non-interactive capture path: surfaces must keep their drawn
/// contents after `generate` completes so they can be read back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// On-screen, interactive use.
    #[default]
    Interactive,
    /// Offline capture of the final surface contents.
    Export,
}

impl RenderMode {
    /// Whether surfaces built for this mode must retain their contents across frames.
    pub fn requires_retained_contents(self) -> bool {
        matches!(self, Self::Export)
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interactive => f.write_str("interactive"),
            Self::Export => f.write_str("export"),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
