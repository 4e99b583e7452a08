use crate::detect::{Region, RegionShape};
use crate::layout::TextLayoutEngine;
use crate::raster;
use crate::types::palette;
use crate::types::{Element, ElementKind};
use tiny_skia::{Path, PathBuilder, Pixmap};

/// Geometry for synthesized bubbles, in canonical-resolution pixels.
#[derive(Debug, Clone)]
pub struct BubbleStyle {
    /// Distance from the panel edge for anchored placements.
    pub margin: f32,
    /// Extra space reserved below bottom placements for the tail.
    pub tail_room: f32,
    pub corner_radius: f32,
    pub stroke_width: f32,
}

impl Default for BubbleStyle {
    fn default() -> Self {
        Self {
            margin: 24.0,
            tail_room: 28.0,
            corner_radius: 28.0,
            stroke_width: 5.0,
        }
    }
}

/// Draws a bubble, box, or SFX burst for an element that has no detected
/// region, then hands the synthetic region to the layout engine. The shapes
/// follow comic conventions: speech gets a tail, thought gets trailing dots,
/// narration is a plain caption box, SFX is bare text.
pub struct ProgrammaticBubbleRenderer {
    style: BubbleStyle,
}

impl ProgrammaticBubbleRenderer {
    pub(crate) fn new(style: BubbleStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &BubbleStyle {
        &self.style
    }

    /// Renders `element` with `text` onto a copy of `image`.
    pub fn render(
        &self,
        image: &Pixmap,
        element: &Element,
        text: &str,
        layout: &TextLayoutEngine,
    ) -> Pixmap {
        let mut out = image.clone();
        let text = text.trim();
        if text.is_empty() {
            return out;
        }

        let region = self.synthesize_region(out.width(), out.height(), element);
        match element.kind {
            ElementKind::Speech => {
                self.draw_speech_bubble(&mut out, &region);
            }
            ElementKind::Thought => {
                self.draw_thought_bubble(&mut out, &region);
            }
            ElementKind::Narration => {
                self.draw_narration_box(&mut out, &region);
            }
            // SFX draws no shape at all; the layout engine's SFX path does
            // the large outlined text directly.
            ElementKind::Sfx => {}
        }
        layout.render(
            &out,
            &region,
            text,
            element.kind,
            element.character_name.as_deref(),
        )
    }

    /// A rectangle a third of the panel wide and a fifth tall, placed from
    /// the element's compass anchor with a fixed edge margin.
    pub fn synthesize_region(&self, width: u32, height: u32, element: &Element) -> Region {
        let bw = (width / 3).max(1);
        let bh = (height / 5).max(1);
        let margin = self.style.margin as i64;
        let tail_room = self.style.tail_room as i64;
        let anchor = element.position;

        let x = if anchor.is_left() {
            margin
        } else if anchor.is_right() {
            width as i64 - bw as i64 - margin
        } else {
            (width as i64 - bw as i64) / 2
        };
        let y = if anchor.is_top() {
            margin
        } else if anchor.is_bottom() {
            height as i64 - bh as i64 - margin - tail_room
        } else {
            (height as i64 - bh as i64) / 2
        };

        let shape = if element.kind == ElementKind::Narration {
            RegionShape::Box
        } else {
            RegionShape::Bubble
        };
        Region::synthetic(x.max(0) as u32, y.max(0) as u32, bw, bh, shape)
    }

    fn draw_speech_bubble(&self, out: &mut Pixmap, region: &Region) {
        let x = region.x as f32;
        let y = region.y as f32;
        let w = region.width as f32;
        let h = region.height as f32;
        let stroke = self.style.stroke_width;

        // Tail first so the body covers the joint.
        let tail_x = x + w * 0.15;
        let tail_y = y + h;
        let mut tail = PathBuilder::new();
        tail.move_to(tail_x, tail_y - 2.0);
        tail.line_to(tail_x + w * 0.12, tail_y - 2.0);
        tail.line_to(tail_x - w * 0.04, tail_y + self.style.tail_room * 0.8);
        tail.close();
        if let Some(tail) = tail.finish() {
            raster::fill_path(out, &tail, palette::BUBBLE_FILL);
            raster::stroke_path(out, &tail, palette::INK, stroke * 0.7);
        }

        if let Some(body) = rounded_rect_path(x, y, w, h, self.style.corner_radius) {
            raster::fill_path(out, &body, palette::BUBBLE_FILL);
            raster::stroke_path(out, &body, palette::INK, stroke);
        }
        // White out the seam where the tail meets the body outline.
        raster::fill_rect(
            out,
            tail_x + 2.0,
            y + h - stroke,
            w * 0.12 - 4.0,
            stroke + 1.0,
            palette::BUBBLE_FILL,
        );
    }

    fn draw_thought_bubble(&self, out: &mut Pixmap, region: &Region) {
        let x = region.x as f32;
        let y = region.y as f32;
        let w = region.width as f32;
        let h = region.height as f32;
        let stroke = self.style.stroke_width;

        if let Some(body) = rounded_rect_path(x, y, w, h, self.style.corner_radius * 1.3) {
            raster::fill_path(out, &body, palette::BUBBLE_FILL);
            raster::stroke_path(out, &body, palette::INK, stroke);
        }

        // Two shrinking dots trailing toward the thinker.
        let dot_x = x + w * 0.15;
        let dot_y = y + h + self.style.tail_room * 0.35;
        for (dx, dy, r) in [
            (0.0, 0.0, h * 0.055),
            (-h * 0.08, h * 0.12, h * 0.032),
        ] {
            if let Some(dot) = PathBuilder::from_circle(dot_x + dx, dot_y + dy, r.max(2.0)) {
                raster::fill_path(out, &dot, palette::BUBBLE_FILL);
                raster::stroke_path(out, &dot, palette::INK, stroke * 0.6);
            }
        }
    }

    fn draw_narration_box(&self, out: &mut Pixmap, region: &Region) {
        let x = region.x as f32;
        let y = region.y as f32;
        let w = region.width as f32;
        let h = region.height as f32;

        if let Some(rect) = tiny_skia::Rect::from_xywh(x, y, w, h) {
            let body = PathBuilder::from_rect(rect);
            raster::fill_path(out, &body, palette::NARRATION_FILL);
            raster::stroke_path(out, &body, palette::INK, self.style.stroke_width);
        }
    }
}

/// Rounded rectangle outline with cubic corner arcs.
fn rounded_rect_path(x: f32, y: f32, width: f32, height: f32, radius: f32) -> Option<Path> {
    let max_r = (width / 2.0).min(height / 2.0);
    let r = radius.clamp(0.0, max_r);
    if r <= 0.0 {
        return tiny_skia::Rect::from_xywh(x, y, width, height).map(PathBuilder::from_rect);
    }
    let k = 0.55228475;
    let c = r * k;
    let right = x + width;
    let bottom = y + height;

    let mut path = PathBuilder::new();
    path.move_to(x + r, y);
    path.line_to(right - r, y);
    path.cubic_to(right - r + c, y, right, y + r - c, right, y + r);
    path.line_to(right, bottom - r);
    path.cubic_to(right, bottom - r + c, right - r + c, bottom, right - r, bottom);
    path.line_to(x + r, bottom);
    path.cubic_to(x + r - c, bottom, x, bottom - r + c, x, bottom - r);
    path.line_to(x, y + r);
    path.cubic_to(x, y + r - c, x + r - c, y, x + r, y);
    path.close();
    path.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontRegistry;
    use crate::layout::LayoutConfig;
    use crate::raster::pixmap_to_rgba;
    use crate::types::Anchor;
    use std::sync::Arc;

    fn renderer() -> ProgrammaticBubbleRenderer {
        ProgrammaticBubbleRenderer::new(BubbleStyle::default())
    }

    fn layout() -> TextLayoutEngine {
        TextLayoutEngine::new(Arc::new(FontRegistry::new()), LayoutConfig::default())
    }

    fn dark_pixmap(w: u32, h: u32) -> Pixmap {
        let mut pixmap = Pixmap::new(w, h).unwrap();
        pixmap.fill(tiny_skia::Color::from_rgba8(40, 40, 40, 255));
        pixmap
    }

    fn element(kind: ElementKind, anchor: Anchor) -> Element {
        Element::new(kind, "Hi!").with_position(anchor)
    }

    #[test]
    fn synthetic_region_tracks_every_anchor() {
        let renderer = renderer();
        let (w, h) = (1024u32, 1024u32);
        let margin = renderer.style().margin as u32;
        let bw = w / 3;
        let bh = h / 5;

        let cases = [
            (Anchor::TopLeft, margin, margin),
            (Anchor::Top, (w - bw) / 2, margin),
            (Anchor::TopRight, w - bw - margin, margin),
            (Anchor::Left, margin, (h - bh) / 2),
            (Anchor::Center, (w - bw) / 2, (h - bh) / 2),
            (Anchor::Right, w - bw - margin, (h - bh) / 2),
        ];
        for (anchor, x, y) in cases {
            let r = renderer.synthesize_region(w, h, &element(ElementKind::Speech, anchor));
            assert_eq!((r.x, r.y), (x, y), "anchor {anchor:?}");
            assert_eq!((r.width, r.height), (bw, bh));
        }

        // Bottom placements reserve tail room.
        let tail_room = renderer.style().tail_room as u32;
        let r = renderer.synthesize_region(w, h, &element(ElementKind::Speech, Anchor::Bottom));
        assert_eq!(r.y, h - bh - margin - tail_room);
    }

    #[test]
    fn narration_region_is_box_shaped() {
        let renderer = renderer();
        let r = renderer.synthesize_region(1024, 1024, &element(ElementKind::Narration, Anchor::Top));
        assert_eq!(r.shape, RegionShape::Box);
        let r = renderer.synthesize_region(1024, 1024, &element(ElementKind::Thought, Anchor::Top));
        assert_eq!(r.shape, RegionShape::Bubble);
    }

    #[test]
    fn speech_bubble_paints_a_white_body() {
        let renderer = renderer();
        let layout = layout();
        let pixmap = dark_pixmap(600, 600);
        let el = element(ElementKind::Speech, Anchor::TopLeft);
        let out = renderer.render(&pixmap, &el, "Hi!", &layout);
        assert_eq!((out.width(), out.height()), (600, 600));

        let region = renderer.synthesize_region(600, 600, &el);
        let img = pixmap_to_rgba(&out);
        // Top-edge center sits inside the fill, clear of the rounded corners
        // and the stroke.
        let probe = img.get_pixel(region.x + region.width / 2, region.y + 8);
        assert_eq!(probe.0, [255, 255, 255, 255]);
    }

    #[test]
    fn sfx_draws_no_bubble_shape() {
        let renderer = renderer();
        let layout = layout();
        let pixmap = dark_pixmap(600, 600);
        let el = element(ElementKind::Sfx, Anchor::TopLeft);
        let out = renderer.render(&pixmap, &el, "Pow", &layout);

        let region = renderer.synthesize_region(600, 600, &el);
        let img = pixmap_to_rgba(&out);
        // Without a bubble body the region's top edge stays artwork-colored.
        let probe = img.get_pixel(region.x + region.width / 2, region.y + 8);
        assert_eq!(probe.0, [40, 40, 40, 255]);
    }

    #[test]
    fn empty_text_returns_untouched_copy() {
        let renderer = renderer();
        let layout = layout();
        let pixmap = dark_pixmap(200, 200);
        let el = element(ElementKind::Speech, Anchor::Center);
        let out = renderer.render(&pixmap, &el, "  ", &layout);
        assert_eq!(out.data(), pixmap.data());
    }
}
