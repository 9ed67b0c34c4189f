//! Overlay drawing on RGBA frames: boxes via tiny-skia, text via ab_glyph.

use crate::frame::{PixelFormat, VideoFrame};
use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use anyhow::{anyhow, Result};
use fontdb::{Database, Family, Query};
use tiny_skia::{Color, LineCap, Paint, PathBuilder, PixmapMut, Stroke, Transform};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb8(pub u8, pub u8, pub u8);

pub const GREEN: Rgb8 = Rgb8(0, 255, 0);
pub const BLUE: Rgb8 = Rgb8(0, 0, 255);
pub const WHITE: Rgb8 = Rgb8(255, 255, 255);

/// A font loaded from the system font database.
pub struct TextFont {
    font: FontVec,
}

impl TextFont {
    /// Load `family`, falling back to any sans-serif face.
    pub fn system(family: Option<&str>) -> Result<Self> {
        let mut db = Database::new();
        db.load_system_fonts();
        info!("Loaded {} system fonts", db.len());

        let mut families = Vec::new();
        if let Some(name) = family {
            families.push(Family::Name(name));
        }
        families.push(Family::SansSerif);
        let query = Query {
            families: &families,
            ..Query::default()
        };
        let id = db
            .query(&query)
            .or_else(|| db.faces().next().map(|f| f.id))
            .ok_or_else(|| anyhow!("no system font available"))?;

        let font = db
            .with_face_data(id, |data, index| FontVec::try_from_vec_and_index(data.to_vec(), index))
            .ok_or_else(|| anyhow!("font face {:?} has no data", id))?
            .map_err(|e| anyhow!("invalid font: {}", e))?;
        debug!("Using font face {:?}", id);
        Ok(Self { font })
    }

    /// Advance width of `text` at `size` pixels.
    pub fn measure(&self, text: &str, size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(size));
        text.chars().map(|c| scaled.h_advance(scaled.glyph_id(c))).sum()
    }
}

/// Drawing surface borrowing an RGBA frame.
pub struct Canvas<'a> {
    pixmap: PixmapMut<'a>,
}

impl<'a> Canvas<'a> {
    pub fn new(frame: &'a mut VideoFrame) -> Result<Self> {
        if frame.format != PixelFormat::Rgba {
            return Err(anyhow!("canvas needs an RGBA frame, got {:?}", frame.format));
        }
        let (width, height) = (frame.width, frame.height);
        let pixmap = PixmapMut::from_bytes(&mut frame.data, width, height)
            .ok_or_else(|| anyhow!("cannot draw on a {}x{} frame", width, height))?;
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    fn stroke(&mut self, path: Option<tiny_skia::Path>, color: Rgb8, thickness: f32) {
        let Some(path) = path else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(Color::from_rgba8(color.0, color.1, color.2, 255));
        paint.anti_alias = true;
        let stroke = Stroke {
            width: thickness.max(1.0),
            line_cap: LineCap::Round,
            ..Stroke::default()
        };
        self.pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }

    /// Plain rectangle outline.
    pub fn rect(&mut self, [x1, y1, x2, y2]: [f32; 4], color: Rgb8, thickness: f32) {
        let path = tiny_skia::Rect::from_ltrb(x1, y1, x2, y2).map(PathBuilder::from_rect);
        self.stroke(path, color, thickness);
    }

    /// Box with rounded corner brackets joined by thin edges.
    pub fn corner_box(&mut self, [x1, y1, x2, y2]: [f32; 4], color: Rgb8, thickness: f32, radius: f32, corner_len: f32) {
        let (r, d) = (radius, corner_len);
        let mut pb = PathBuilder::new();
        for (cx, cy, sx, sy) in [(x1, y1, 1.0, 1.0), (x2, y1, -1.0, 1.0), (x1, y2, 1.0, -1.0), (x2, y2, -1.0, -1.0)] {
            pb.move_to(cx + sx * (r + d), cy);
            pb.line_to(cx + sx * r, cy);
            pb.quad_to(cx, cy, cx, cy + sy * r);
            pb.line_to(cx, cy + sy * (r + d));
        }
        self.stroke(pb.finish(), color, thickness);
        self.rect([x1, y1, x2, y2], color, 1.0);
    }

    /// Draw `text` with its baseline starting at (`x`, `y`).
    pub fn text(&mut self, font: &TextFont, text: &str, x: f32, y: f32, size: f32, color: Rgb8) {
        let (width, height) = (self.width() as i32, self.height() as i32);
        let data = self.pixmap.data_mut();
        let scale = PxScale::from(size);
        let scaled = font.font.as_scaled(scale);

        let mut caret = x;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            let glyph = id.with_scale_and_position(scale, point(caret, y));
            caret += scaled.h_advance(id);
            let Some(outlined) = scaled.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                if px < 0 || py < 0 || px >= width || py >= height {
                    return;
                }
                let i = ((py * width + px) * 4) as usize;
                let a = coverage.clamp(0.0, 1.0);
                for (channel, value) in [color.0, color.1, color.2].into_iter().enumerate() {
                    let dst = data[i + channel] as f32;
                    data[i + channel] = (dst + (value as f32 - dst) * a).round() as u8;
                }
                data[i + 3] = 255;
            });
        }
    }
}
