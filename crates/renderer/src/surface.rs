//! Software presentation surface.
//!
//! The engine never holds on to pixels between frames: it acquires a
//! [`Canvas`] from a [`PresentationSurface`] through a [`SurfaceFrame`]
//! guard, draws, and the guard hands the canvas back when it goes out of
//! scope, whichever way the frame ends.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops, Pixel, Rgba, RgbaImage};
use settings::Color;

/// Decoded, surface-sized background image.
pub type Bitmap = RgbaImage;

/// RGBA8 drawing target with src-over blending.
#[derive(Debug, Clone)]
pub struct Canvas {
    pixels: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Overwrites every pixel, alpha included.
    pub fn fill(&mut self, color: Color) {
        let value = Rgba(color.to_rgba());
        for pixel in self.pixels.pixels_mut() {
            *pixel = value;
        }
    }

    /// Paints every pixel whose center lies inside the rectangle.
    pub fn fill_rect(&mut self, left: f32, top: f32, right: f32, bottom: f32, color: Color) {
        let Some((x0, x1)) = pixel_span(left, right, self.width()) else {
            return;
        };
        let Some((y0, y1)) = pixel_span(top, bottom, self.height()) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                self.blend(x, y, color, 1.0);
            }
        }
    }

    /// Composites `bitmap` with its top-left corner at (`x`, `y`), unscaled.
    pub fn draw_bitmap(&mut self, bitmap: &Bitmap, x: i64, y: i64) {
        imageops::overlay(&mut self.pixels, bitmap, x, y);
    }

    pub fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Color) {
        if radius <= 0.0 {
            return;
        }
        let Some((x0, x1)) = pixel_span(cx - radius - 1.0, cx + radius + 1.0, self.width()) else {
            return;
        };
        let Some((y0, y1)) = pixel_span(cy - radius - 1.0, cy + radius + 1.0, self.height())
        else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let distance = (dx * dx + dy * dy).sqrt();
                self.blend(x, y, color, radius + 0.5 - distance);
            }
        }
    }

    pub fn draw_line(
        &mut self,
        (x0, y0): (f32, f32),
        (x1, y1): (f32, f32),
        thickness: f32,
        color: Color,
    ) {
        let half = thickness.max(0.0) * 0.5;
        let reach = half + 1.0;
        let Some((px0, px1)) = pixel_span(x0.min(x1) - reach, x0.max(x1) + reach, self.width())
        else {
            return;
        };
        let Some((py0, py1)) = pixel_span(y0.min(y1) - reach, y0.max(y1) + reach, self.height())
        else {
            return;
        };
        for y in py0..py1 {
            for x in px0..px1 {
                let distance =
                    distance_to_segment((x as f32 + 0.5, y as f32 + 0.5), (x0, y0), (x1, y1));
                self.blend(x, y, color, half + 0.5 - distance);
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.pixels
            .get_pixel_checked(x, y)
            .map(|p| Color::from_argb(p[3], p[0], p[1], p[2]))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    fn blend(&mut self, x: u32, y: u32, color: Color, coverage: f32) {
        let alpha = (color.alpha() as f32 * coverage.clamp(0.0, 1.0)).round() as u8;
        if alpha == 0 {
            return;
        }
        let source = Rgba([color.red(), color.green(), color.blue(), alpha]);
        let target = self.pixels.get_pixel_mut(x, y);
        if alpha == u8::MAX {
            *target = source;
        } else {
            target.blend(&source);
        }
    }
}

/// Half-open pixel range whose centers fall inside `[start, end)`, clipped.
fn pixel_span(start: f32, end: f32, limit: u32) -> Option<(u32, u32)> {
    if !(start.is_finite() && end.is_finite()) {
        return None;
    }
    let first = (start - 0.5).ceil().max(0.0);
    let last = (end - 0.5).ceil().min(limit as f32);
    if first >= last {
        None
    } else {
        Some((first as u32, last as u32))
    }
}

fn distance_to_segment(point: (f32, f32), start: (f32, f32), end: (f32, f32)) -> f32 {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq <= f32::EPSILON {
        0.0
    } else {
        (((point.0 - start.0) * dx + (point.1 - start.1) * dy) / length_sq).clamp(0.0, 1.0)
    };
    let (nx, ny) = (start.0 + t * dx - point.0, start.1 + t * dy - point.1);
    (nx * nx + ny * ny).sqrt()
}

/// Pixel buffer the platform lends out one frame at a time.
pub trait PresentationSurface {
    /// Locks the surface for drawing; `None` when it cannot be drawn to now.
    fn acquire(&mut self) -> Option<Canvas>;
    /// Unlocks the surface and presents `canvas`.
    fn release(&mut self, canvas: Canvas);
}

/// Scoped lock on a [`PresentationSurface`]; releases on drop.
pub struct SurfaceFrame<'a, S: PresentationSurface + ?Sized> {
    surface: &'a mut S,
    canvas: Canvas,
}

impl<'a, S: PresentationSurface + ?Sized> SurfaceFrame<'a, S> {
    pub fn acquire(surface: &'a mut S) -> Option<Self> {
        let canvas = surface.acquire()?;
        Some(Self { surface, canvas })
    }
}

impl<S: PresentationSurface + ?Sized> Deref for SurfaceFrame<'_, S> {
    type Target = Canvas;

    fn deref(&self) -> &Canvas {
        &self.canvas
    }
}

impl<S: PresentationSurface + ?Sized> DerefMut for SurfaceFrame<'_, S> {
    fn deref_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }
}

impl<S: PresentationSurface + ?Sized> Drop for SurfaceFrame<'_, S> {
    fn drop(&mut self) {
        let canvas = std::mem::replace(&mut self.canvas, Canvas::new(0, 0));
        self.surface.release(canvas);
    }
}

/// In-memory surface used for headless rendering and exports.
#[derive(Debug, Default)]
pub struct SoftwareSurface {
    canvas: Option<Canvas>,
    locked: bool,
    presented: u64,
}

impl SoftwareSurface {
    pub fn new(width: u32, height: u32) -> Self {
        let mut surface = Self::default();
        surface.resize(width, height);
        surface
    }

    /// Reallocates the backing buffer; a zero dimension leaves no buffer.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.canvas = (width > 0 && height > 0).then(|| Canvas::new(width, height));
        self.locked = false;
    }

    pub fn size(&self) -> (u32, u32) {
        self.canvas
            .as_ref()
            .map(|canvas| (canvas.width(), canvas.height()))
            .unwrap_or((0, 0))
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    /// Last presented contents, `None` while locked or unsized.
    pub fn snapshot(&self) -> Option<&RgbaImage> {
        self.canvas.as_ref().map(Canvas::image)
    }

    pub fn export_png(&self, path: &Path) -> Result<()> {
        let image = self
            .snapshot()
            .ok_or_else(|| anyhow::anyhow!("surface has no presented frame to export"))?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| {
                format!("failed to prepare export directory {}", dir.display())
            })?;
        }
        image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to write frame to {}", path.display()))?;
        Ok(())
    }
}

impl PresentationSurface for SoftwareSurface {
    fn acquire(&mut self) -> Option<Canvas> {
        if self.locked {
            return None;
        }
        let canvas = self.canvas.take()?;
        self.locked = true;
        Some(canvas)
    }

    fn release(&mut self, canvas: Canvas) {
        self.canvas = Some(canvas);
        self.locked = false;
        self.presented += 1;
    }
}
