use std::sync::Arc;

use kurbo::{Affine, BezPath, Circle, PathEl, Point, Rect, Shape};

use crate::assets::decode::ImageHandle;
use crate::foundation::core::SurfaceSize;
use crate::foundation::error::{EaselError, EaselResult};
use crate::settings::color::Color;
use crate::surface::RenderSurface;
use crate::surface::frame::FrameRGBA;

const PATH_TOLERANCE: f64 = 0.1;

/// Host-provided default 2D surface, rasterized on the CPU.
///
/// Draw calls are recorded until [`Canvas2d::present`] rasterizes everything drawn since the last
/// [`Canvas2d::clear`] into the backing pixmap. The pixmap is only replaced by the next `present`,
/// so captured contents survive in both render modes.
pub struct Canvas2d {
    size: SurfaceSize,
    ctx: vello_cpu::RenderContext,
    pixmap: vello_cpu::Pixmap,
    transform: Affine,
}

impl std::fmt::Debug for Canvas2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas2d")
            .field("size", &self.size)
            .field("transform", &self.transform)
            .finish_non_exhaustive()
    }
}

impl Canvas2d {
    /// Transparent canvas of `size`.
    pub fn new(size: SurfaceSize) -> EaselResult<Self> {
        let (w, h) = size.as_u16()?;
        Ok(Self {
            size,
            ctx: vello_cpu::RenderContext::new(w, h),
            pixmap: vello_cpu::Pixmap::new(w, h),
            transform: Affine::IDENTITY,
        })
    }

    /// Width in pixels as `f64`, for layout math.
    pub fn width(&self) -> f64 {
        f64::from(self.size.width)
    }

    /// Height in pixels as `f64`.
    pub fn height(&self) -> f64 {
        f64::from(self.size.height)
    }

    /// Drop every recorded draw call and fill the whole canvas with `color`.
    ///
    /// Resets the transform to identity.
    pub fn clear(&mut self, color: Color) {
        let (w, h) = (self.size.width as u16, self.size.height as u16);
        self.ctx = vello_cpu::RenderContext::new(w, h);
        self.transform = Affine::IDENTITY;
        self.ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        self.ctx.set_paint(paint(color));
        self.ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            self.width(),
            self.height(),
        ));
    }

    /// Transform applied to subsequent draw calls.
    pub fn set_transform(&mut self, transform: Affine) {
        self.transform = transform;
    }

    /// Current transform.
    pub fn transform(&self) -> Affine {
        self.transform
    }

    /// Fill an axis-aligned rectangle.
    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.prepare(color);
        self.ctx.fill_rect(&rect_to_cpu(rect));
    }

    /// Fill a circle.
    pub fn fill_circle(&mut self, center: Point, radius: f64, color: Color) {
        let path = Circle::new(center, radius.max(0.0)).to_path(PATH_TOLERANCE);
        self.fill_path(&path, color);
    }

    /// Fill an arbitrary path (non-zero winding).
    pub fn fill_path(&mut self, path: &BezPath, color: Color) {
        self.prepare(color);
        self.ctx.fill_path(&bezpath_to_cpu(path));
    }

    /// Stroke a path with a line of `width` pixels.
    pub fn stroke_path(&mut self, path: &BezPath, width: f64, color: Color) {
        self.prepare(color);
        self.ctx
            .set_stroke(vello_cpu::kurbo::Stroke::new(width.max(0.0)));
        self.ctx.stroke_path(&bezpath_to_cpu(path));
    }

    /// Draw a decoded image with its top-left corner at the origin of `transform`.
    pub fn draw_image(&mut self, image: &ImageHandle, transform: Affine) -> EaselResult<()> {
        let pixmap = image_to_pixmap(image)?;
        let (w, h) = (f64::from(image.width()), f64::from(image.height()));
        self.ctx
            .set_transform(affine_to_cpu(self.transform * transform));
        self.ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
        self.ctx.set_paint(vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        });
        self.ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, w, h));
        Ok(())
    }

    /// Rasterize everything drawn since the last [`Canvas2d::clear`] into the backing pixmap.
    pub fn present(&mut self) {
        self.pixmap.data_as_u8_slice_mut().fill(0);
        self.ctx.flush();
        self.ctx.render_to_pixmap(&mut self.pixmap);
    }

    fn prepare(&mut self, color: Color) {
        self.ctx.set_transform(affine_to_cpu(self.transform));
        self.ctx.set_paint(paint(color));
    }
}

impl RenderSurface for Canvas2d {
    fn size(&self) -> SurfaceSize {
        self.size
    }

    fn resize(&mut self, size: SurfaceSize) -> EaselResult<()> {
        if size == self.size {
            return Ok(());
        }
        *self = Self::new(size)?;
        Ok(())
    }

    fn retains_contents(&self) -> bool {
        true
    }

    fn capture(&self) -> EaselResult<FrameRGBA> {
        FrameRGBA::new(
            self.size.width,
            self.size.height,
            self.pixmap.data_as_u8_slice().to_vec(),
        )
    }
}

fn paint(color: Color) -> vello_cpu::peniko::Color {
    vello_cpu::peniko::Color::from_rgba8(color.r, color.g, color.b, color.a)
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn point_to_cpu(p: Point) -> vello_cpu::kurbo::Point {
    vello_cpu::kurbo::Point::new(p.x, p.y)
}

fn rect_to_cpu(r: Rect) -> vello_cpu::kurbo::Rect {
    vello_cpu::kurbo::Rect::new(r.x0, r.y0, r.x1, r.y1)
}

fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(point_to_cpu(p)),
            PathEl::LineTo(p) => out.line_to(point_to_cpu(p)),
            PathEl::QuadTo(p1, p2) => out.quad_to(point_to_cpu(p1), point_to_cpu(p2)),
            PathEl::CurveTo(p1, p2, p3) => {
                out.curve_to(point_to_cpu(p1), point_to_cpu(p2), point_to_cpu(p3));
            }
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}

fn image_to_pixmap(image: &ImageHandle) -> EaselResult<vello_cpu::Pixmap> {
    let w: u16 = image
        .width()
        .try_into()
        .map_err(|_| EaselError::validation("image width exceeds u16"))?;
    let h: u16 = image
        .height()
        .try_into()
        .map_err(|_| EaselError::validation("image height exceeds u16"))?;

    let mut may_have_opacities = false;
    let pixels = image
        .rgba8_premul()
        .chunks_exact(4)
        .map(|px| {
            may_have_opacities |= px[3] != 255;
            vello_cpu::peniko::color::PremulRgba8 {
                r: px[0],
                g: px[1],
                b: px[2],
                a: px[3],
            }
        })
        .collect();

    Ok(vello_cpu::Pixmap::from_parts_with_opacity(
        pixels,
        w,
        h,
        may_have_opacities,
    ))
}

#[cfg(test)]
#[path = "../../tests/unit/surface/canvas.rs"]
mod tests;
