use crate::error::HalftoneError;
use crate::types::Color;
use image::RgbaImage;
use rustybuzz::{Face as HbFace, UnicodeBuffer};
use tiny_skia::{
    FillRule, LineCap, LineJoin, Paint, Path, PathBuilder, Pixmap, Stroke, Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

/// Decodes encoded image bytes into a premultiplied pixmap. Any decode
/// problem is a `None`, never an error; detection and compositing treat
/// undecodable panels as absent.
pub(crate) fn decode_pixmap(data: &[u8]) -> Option<Pixmap> {
    let decoded = match image::guess_format(data).ok() {
        Some(format) => image::load_from_memory_with_format(data, format).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    rgba_to_pixmap(&decoded.to_rgba8())
}

pub(crate) fn rgba_to_pixmap(rgba: &RgbaImage) -> Option<Pixmap> {
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let r = src_px[0];
        let g = src_px[1];
        let b = src_px[2];
        let a = src_px[3];
        dst_px[0] = premul_u8(r, a);
        dst_px[1] = premul_u8(g, a);
        dst_px[2] = premul_u8(b, a);
        dst_px[3] = a;
    }
    Some(pixmap)
}

pub(crate) fn pixmap_to_rgba(pixmap: &Pixmap) -> RgbaImage {
    let mut out = RgbaImage::new(pixmap.width(), pixmap.height());
    for (px, dst) in pixmap.pixels().iter().zip(out.pixels_mut()) {
        let c = px.demultiply();
        dst.0 = [c.red(), c.green(), c.blue(), c.alpha()];
    }
    out
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

pub(crate) fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, HalftoneError> {
    let mut bytes = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .map_err(|e| HalftoneError::Encode(format!("png encode failed: {e}")))?;
    Ok(bytes)
}

pub(crate) fn fill_paint(color: Color, opacity: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color, opacity));
    paint.anti_alias = true;
    paint
}

pub(crate) fn to_sk_color(color: Color, opacity: f32) -> tiny_skia::Color {
    let r = color.r.clamp(0.0, 1.0);
    let g = color.g.clamp(0.0, 1.0);
    let b = color.b.clamp(0.0, 1.0);
    let a = opacity.clamp(0.0, 1.0);
    tiny_skia::Color::from_rgba(r, g, b, a)
        .unwrap_or_else(|| tiny_skia::Color::from_rgba8(0, 0, 0, 255))
}

pub(crate) fn round_stroke(width: f32) -> Stroke {
    let mut stroke = Stroke::default();
    stroke.width = width.max(0.0);
    stroke.line_cap = LineCap::Round;
    stroke.line_join = LineJoin::Round;
    stroke
}

pub(crate) fn fill_path(pixmap: &mut Pixmap, path: &Path, color: Color) {
    pixmap.fill_path(
        path,
        &fill_paint(color, 1.0),
        FillRule::Winding,
        Transform::identity(),
        None,
    );
}

pub(crate) fn stroke_path(pixmap: &mut Pixmap, path: &Path, color: Color, width: f32) {
    pixmap.stroke_path(
        path,
        &fill_paint(color, 1.0),
        &round_stroke(width),
        Transform::identity(),
        None,
    );
}

pub(crate) fn fill_rect(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, color: Color) {
    if let Some(rect) = tiny_skia::Rect::from_xywh(x, y, w, h) {
        let path = PathBuilder::from_rect(rect);
        fill_path(pixmap, &path, color);
    }
}

/// Ascent in pixels at the given size; used to convert a line's top edge to
/// the rasterization baseline.
pub(crate) fn ascent_px(font_data: &[u8], font_size: f32) -> f32 {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return font_size * 0.8;
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    (face.ascender() as f32 / units_per_em) * font_size
}

struct GlyphPlacement {
    glyph_id: u16,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

fn layout_text_glyphs(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> Vec<GlyphPlacement> {
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    };
    let hb_units = face.units_per_em().max(1) as f32;
    let scale = font_size / hb_units;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(crate::font::detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid == 0 {
            pen_x += (pos.x_advance as f32 / hb_units) * font_size;
            continue;
        }
        let x_off = (pos.x_offset as f32 / hb_units) * font_size;
        let y_off = (pos.y_offset as f32 / hb_units) * font_size;
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: baseline_x + pen_x + x_off,
            origin_y: baseline_y - y_off,
            scale,
        });
        pen_x += (pos.x_advance as f32 / hb_units) * font_size;
    }
    out
}

fn layout_text_glyphs_unshaped(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> Vec<GlyphPlacement> {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return Vec::new();
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;

    let mut out = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            pen_x += font_size * 0.5;
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: baseline_x + pen_x,
            origin_y: baseline_y,
            scale,
        });
        let advance_units = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32;
        let mut adv = (advance_units / units_per_em) * font_size;
        if adv <= 0.0 {
            adv = font_size * 0.5;
        }
        pen_x += adv;
    }
    out
}

/// Accumulates every glyph outline of a line into one path so an outline
/// stroke can be painted under the whole line before the fill goes on top.
struct LinePathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl LinePathBuilder {
    fn new() -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x: 0.0,
            origin_y: 0.0,
            scale: 1.0,
        }
    }

    fn set_glyph(&mut self, origin_x: f32, origin_y: f32, scale: f32) {
        self.origin_x = origin_x;
        self.origin_y = origin_y;
        self.scale = scale;
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

// Glyph outlines are y-up; pixmap space is y-down, hence the flip.
impl OutlineBuilder for LinePathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            self.origin_x + x1 * self.scale,
            self.origin_y - y1 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            self.origin_x + x1 * self.scale,
            self.origin_y - y1 * self.scale,
            self.origin_x + x2 * self.scale,
            self.origin_y - y2 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Draws one line of text at a baseline. A missing or unparsable font skips
/// the draw silently; the layout contract stays total either way.
pub(crate) fn draw_text_line(
    pixmap: &mut Pixmap,
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
    fill: Color,
    outline: Option<(Color, f32)>,
) {
    if text.is_empty() || font_size <= 0.0 {
        return;
    }
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return;
    };

    let placements = layout_text_glyphs(font_data, text, font_size, baseline_x, baseline_y);
    if placements.is_empty() {
        return;
    }

    let mut line = LinePathBuilder::new();
    for placement in &placements {
        line.set_glyph(placement.origin_x, placement.origin_y, placement.scale);
        let _ = face.outline_glyph(GlyphId(placement.glyph_id), &mut line);
    }
    let Some(path) = line.finish() else {
        return;
    };

    if let Some((outline_color, outline_width)) = outline {
        stroke_path(pixmap, &path, outline_color, outline_width);
    }
    fill_path(pixmap, &path, fill);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(width: u32, height: u32) -> RgbaImage {
        let mut img = RgbaImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            px.0 = if (x + y) % 2 == 0 {
                [255, 0, 0, 255]
            } else {
                [0, 0, 255, 128]
            };
        }
        img
    }

    #[test]
    fn decode_pixmap_handles_png_bytes() {
        let src = checker(3, 2);
        let mut bytes = Vec::new();
        src.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        let pixmap = decode_pixmap(&bytes).unwrap();
        assert_eq!(pixmap.width(), 3);
        assert_eq!(pixmap.height(), 2);
    }

    #[test]
    fn decode_pixmap_rejects_garbage() {
        assert!(decode_pixmap(b"not an image").is_none());
        assert!(decode_pixmap(&[]).is_none());
    }

    #[test]
    fn pixmap_round_trip_preserves_opaque_pixels() {
        let src = checker(4, 4);
        let pixmap = rgba_to_pixmap(&src).unwrap();
        let back = pixmap_to_rgba(&pixmap);
        assert_eq!(back.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(back.get_pixel(2, 2), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn fill_rect_paints_requested_area() {
        let mut pixmap = Pixmap::new(10, 10).unwrap();
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));
        fill_rect(&mut pixmap, 2.0, 2.0, 6.0, 6.0, Color::BLACK);
        let img = pixmap_to_rgba(&pixmap);
        assert_eq!(img.get_pixel(5, 5), &Rgba([0, 0, 0, 255]));
        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn encode_png_round_trips() {
        let src = checker(5, 5);
        let bytes = encode_png(&src).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (5, 5));
    }

    #[test]
    fn draw_text_line_without_font_is_a_noop() {
        let mut pixmap = Pixmap::new(40, 20).unwrap();
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));
        draw_text_line(
            &mut pixmap,
            b"definitely not a font",
            "Hi",
            12.0,
            2.0,
            14.0,
            Color::BLACK,
            None,
        );
        let img = pixmap_to_rgba(&pixmap);
        assert!(img.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }
}
