//! tiny-skia based raster surface.

use crate::renderer::{
    Composite, GRID_COLOR, GRID_SPACING, GridStyle, RenderResult, Renderer, RendererError, ToolStyle,
};
use chalkline_core::stroke::{Brush, Rgba, parse_color};
use kurbo::{BezPath, PathEl};
use tiny_skia::{
    BlendMode, Color, ColorU8, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint, Rect,
    Stroke, Transform,
};

/// An RGBA pixel surface that strokes are composited onto.
///
/// Starts fully transparent; the background lives on a separate surface.
#[derive(Debug, Clone, PartialEq)]
pub struct PixmapSurface {
    pixmap: Pixmap,
}

impl PixmapSurface {
    pub fn new(width: u32, height: u32) -> RenderResult<Self> {
        let pixmap = Pixmap::new(width, height).ok_or(RendererError::InvalidSize { width, height })?;
        Ok(Self { pixmap })
    }

    /// Resize the surface. Contents are discarded; the caller repaints.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == self.width() && height == self.height() {
            return Ok(());
        }
        *self = Self::new(width, height)?;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Straight (non-premultiplied) RGBA of a pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        let color: ColorU8 = self.pixmap.pixel(x, y)?.demultiply();
        Some(Rgba::new(color.red(), color.green(), color.blue(), color.alpha()))
    }

    /// Check if every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.pixmap.pixels().iter().all(|p| p.alpha() == 0)
    }

    /// Premultiplied RGBA bytes, row-major.
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    pub fn encode_png(&self) -> RenderResult<Vec<u8>> {
        self.pixmap
            .encode_png()
            .map_err(|e| RendererError::Encode(e.to_string()))
    }

    fn fill_rect(&mut self, rect: Option<Rect>, color: Color) {
        let Some(rect) = rect else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(color);
        self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }
}

impl Renderer for PixmapSurface {
    fn clear(&mut self) {
        self.pixmap.fill(Color::TRANSPARENT);
    }

    fn render_path(&mut self, path: &BezPath, brush: &Brush) {
        let Some(path) = to_skia_path(path) else {
            return;
        };
        let style = ToolStyle::for_tool(brush.tool);

        let mut color = if style.uses_color {
            let rgba = parse_color(&brush.color).unwrap_or_else(|| {
                log::debug!("Unparseable color {:?}, drawing black", brush.color);
                Rgba::black()
            });
            Color::from_rgba8(rgba.r, rgba.g, rgba.b, rgba.a)
        } else {
            Color::BLACK
        };
        color.apply_opacity(style.opacity);

        let mut paint = Paint::default();
        paint.set_color(color);
        paint.anti_alias = true;
        paint.blend_mode = match style.composite {
            Composite::SourceOver => BlendMode::SourceOver,
            Composite::Multiply => BlendMode::Multiply,
            Composite::DestinationOut => BlendMode::DestinationOut,
        };

        let stroke = Stroke {
            width: brush.size() as f32,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }
}

/// Convert a kurbo path into a tiny-skia path.
///
/// Returns `None` for paths without any drawable segment.
fn to_skia_path(path: &BezPath) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();
    for el in path.elements() {
        match *el {
            PathEl::MoveTo(p) => builder.move_to(p.x as f32, p.y as f32),
            PathEl::LineTo(p) => builder.line_to(p.x as f32, p.y as f32),
            PathEl::QuadTo(c, p) => builder.quad_to(c.x as f32, c.y as f32, p.x as f32, p.y as f32),
            PathEl::CurveTo(c1, c2, p) => builder.cubic_to(
                c1.x as f32,
                c1.y as f32,
                c2.x as f32,
                c2.y as f32,
                p.x as f32,
                p.y as f32,
            ),
            PathEl::ClosePath => builder.close(),
        }
    }
    builder.finish()
}

/// Paint the whiteboard background: white, with optional grid lines.
pub fn paint_background(surface: &mut PixmapSurface, style: GridStyle) {
    surface.pixmap.fill(Color::WHITE);
    if style == GridStyle::None {
        return;
    }

    let [r, g, b] = GRID_COLOR;
    let grid = Color::from_rgba8(r, g, b, 255);
    let (width, height) = (surface.width() as f32, surface.height() as f32);

    for x in (0..surface.width()).step_by(GRID_SPACING as usize) {
        surface.fill_rect(Rect::from_xywh(x as f32, 0.0, 1.0, height), grid);
    }
    for y in (0..surface.height()).step_by(GRID_SPACING as usize) {
        surface.fill_rect(Rect::from_xywh(0.0, y as f32, width, 1.0), grid);
    }
}

/// Composite `drawing` over `background` for export.
pub fn flatten(background: &PixmapSurface, drawing: &PixmapSurface) -> PixmapSurface {
    let mut flat = background.clone();
    flat.pixmap.draw_pixmap(
        0,
        0,
        drawing.pixmap.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
    flat
}
