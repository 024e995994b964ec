//! Drawable surfaces handed between host and generators.

pub(crate) mod canvas;
pub(crate) mod frame;

use crate::foundation::core::SurfaceSize;
use crate::foundation::error::EaselResult;
use crate::surface::frame::FrameRGBA;

/// Backend-agnostic drawable target owned by one generator instance.
///
/// The host only ever reads through this trait: it never draws on a surface. Surfaces built for
/// [`crate::RenderMode::Export`] must report `retains_contents() == true` and keep returning the
/// last presented frame from [`RenderSurface::capture`] until something draws again.
pub trait RenderSurface {
    /// Current pixel size.
    fn size(&self) -> SurfaceSize;

    /// Change the pixel size. Contents after a resize are unspecified until the next draw.
    fn resize(&mut self, size: SurfaceSize) -> EaselResult<()>;

    /// Whether presented contents stay readable after the frame that drew them.
    fn retains_contents(&self) -> bool;

    /// Read back the last presented contents.
    fn capture(&self) -> EaselResult<FrameRGBA>;
}
