use crate::bubble::ProgrammaticBubbleRenderer;
use crate::debug::DebugLogger;
use crate::detect::RegionDetector;
use crate::layout::TextLayoutEngine;
use crate::raster;
use crate::types::palette;
use crate::types::{Color, Panel};
use image::{Rgba, RgbaImage, imageops};
use std::sync::Arc;

/// Pixel constants of the finished strip page. These are a visual-design
/// contract with the surrounding UI, not incidental choices; change them
/// only together with the host styling.
#[derive(Debug, Clone)]
pub struct StripStyle {
    /// Edge length of each resized panel tile.
    pub tile_size: u32,
    /// Paper margin around the whole page.
    pub outer_border: u32,
    /// Ink frame drawn around each tile.
    pub tile_border: u32,
    /// Paper-colored gap between neighboring tiles.
    pub gutter: u32,
    pub paper: Color,
    pub ink: Color,
}

impl Default for StripStyle {
    fn default() -> Self {
        Self {
            tile_size: 512,
            outer_border: 16,
            tile_border: 3,
            gutter: 12,
            paper: palette::PAPER,
            ink: palette::INK,
        }
    }
}

impl StripStyle {
    fn cell_size(&self) -> u32 {
        self.tile_size + 2 * self.tile_border
    }

    pub fn strip_width(&self, columns: u32) -> u32 {
        let columns = columns.max(1);
        2 * self.outer_border + columns * self.cell_size() + (columns - 1) * self.gutter
    }

    pub fn strip_height(&self, rows: u32) -> u32 {
        let rows = rows.max(1);
        2 * self.outer_border + rows * self.cell_size() + (rows - 1) * self.gutter
    }
}

/// Pairs each panel's elements with its regions in reading order, renders
/// the text, and arranges the finished tiles on one paper-styled page.
/// The only failure mode is the explicit "nothing to render" `None`.
pub struct PanelCompositor {
    detector: RegionDetector,
    layout: TextLayoutEngine,
    bubbles: ProgrammaticBubbleRenderer,
    style: StripStyle,
    debug: Option<Arc<DebugLogger>>,
}

impl PanelCompositor {
    pub(crate) fn new(
        detector: RegionDetector,
        layout: TextLayoutEngine,
        bubbles: ProgrammaticBubbleRenderer,
        style: StripStyle,
        debug: Option<Arc<DebugLogger>>,
    ) -> Self {
        Self {
            detector,
            layout,
            bubbles,
            style,
            debug,
        }
    }

    pub fn detector(&self) -> &RegionDetector {
        &self.detector
    }

    pub fn layout(&self) -> &TextLayoutEngine {
        &self.layout
    }

    pub fn bubbles(&self) -> &ProgrammaticBubbleRenderer {
        &self.bubbles
    }

    pub fn style(&self) -> &StripStyle {
        &self.style
    }

    /// Full-resolution finished panel: cached or fresh detection, element
    /// pairing, text and fallback rendering. `None` when the panel has no
    /// decodable image.
    pub fn render_panel(&self, panel: &Panel) -> Option<RgbaImage> {
        let bytes = panel.image.as_deref()?;
        let pixmap = raster::decode_pixmap(bytes)?;

        let detected;
        let regions = match &panel.regions {
            Some(cached) => {
                if let Some(debug) = self.debug.as_deref() {
                    debug.increment("compose.regions_replayed", 1);
                }
                cached.as_slice()
            }
            None => {
                detected = self.detector.detect_regions(bytes);
                detected.as_slice()
            }
        };

        // Strict element-order pairing: speech/thought/narration consume
        // regions as they come; anything past the region count, and every
        // SFX element, falls back to a programmatic shape.
        let mut out = pixmap;
        let mut region_idx = 0usize;
        for element in &panel.elements {
            let Some(text) = element.resolved_text(panel.user_text.as_deref()) else {
                continue;
            };
            if element.kind.consumes_region() && region_idx < regions.len() {
                out = self.layout.render(
                    &out,
                    &regions[region_idx],
                    text,
                    element.kind,
                    element.character_name.as_deref(),
                );
                region_idx += 1;
            } else {
                if let Some(debug) = self.debug.as_deref() {
                    debug.increment("compose.programmatic_fallbacks", 1);
                }
                out = self.bubbles.render(&out, element, text, &self.layout);
            }
        }

        Some(raster::pixmap_to_rgba(&out))
    }

    /// Composites every usable panel into the bordered strip page. `None`
    /// means there was nothing to render; there is no other failure path.
    pub fn generate_strip(&self, panels: &[Panel], max_columns: usize) -> Option<RgbaImage> {
        let tile = self.style.tile_size;
        let tiles: Vec<RgbaImage> = panels
            .iter()
            .filter_map(|panel| self.render_panel(panel))
            .map(|img| imageops::resize(&img, tile, tile, imageops::FilterType::Lanczos3))
            .collect();

        if tiles.is_empty() {
            if let Some(debug) = self.debug.as_deref() {
                debug.increment("compose.empty_strip", 1);
                debug.emit_summary("generate_strip");
                debug.flush();
            }
            return None;
        }

        let columns = (tiles.len().min(max_columns.max(1))) as u32;
        let rows = (tiles.len() as u32).div_ceil(columns);
        let width = self.style.strip_width(columns);
        let height = self.style.strip_height(rows);

        let mut strip = RgbaImage::from_pixel(width, height, to_rgba(self.style.paper));
        let cell = self.style.cell_size();
        let pitch = cell + self.style.gutter;
        for (index, tile_img) in tiles.iter().enumerate() {
            let col = index as u32 % columns;
            let row = index as u32 / columns;
            let cell_x = self.style.outer_border + col * pitch;
            let cell_y = self.style.outer_border + row * pitch;
            fill_rect_rgba(&mut strip, cell_x, cell_y, cell, cell, to_rgba(self.style.ink));
            imageops::replace(
                &mut strip,
                tile_img,
                (cell_x + self.style.tile_border) as i64,
                (cell_y + self.style.tile_border) as i64,
            );
        }

        if let Some(debug) = self.debug.as_deref() {
            debug.log_json(&format!(
                "{{\"type\":\"compose.strip\",\"panels\":{},\"columns\":{columns},\"rows\":{rows},\"width\":{width},\"height\":{height}}}",
                tiles.len()
            ));
            debug.emit_summary("generate_strip");
            debug.flush();
        }
        Some(strip)
    }
}

fn to_rgba(color: Color) -> Rgba<u8> {
    Rgba([
        (color.r.clamp(0.0, 1.0) * 255.0).round() as u8,
        (color.g.clamp(0.0, 1.0) * 255.0).round() as u8,
        (color.b.clamp(0.0, 1.0) * 255.0).round() as u8,
        255,
    ])
}

fn fill_rect_rgba(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let (img_w, img_h) = img.dimensions();
    for py in y..(y + h).min(img_h) {
        for px in x..(x + w).min(img_w) {
            img.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bubble::BubbleStyle;
    use crate::detect::{DetectorConfig, Region, RegionShape};
    use crate::font::FontRegistry;
    use crate::layout::LayoutConfig;
    use crate::types::{Anchor, Element, ElementKind};

    fn compositor() -> PanelCompositor {
        PanelCompositor::new(
            RegionDetector::new(DetectorConfig::default()),
            TextLayoutEngine::new(Arc::new(FontRegistry::new()), LayoutConfig::default()),
            ProgrammaticBubbleRenderer::new(BubbleStyle::default()),
            StripStyle::default(),
            None,
        )
    }

    fn dark_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([40, 40, 40, 255]));
        raster::encode_png(&img).unwrap()
    }

    #[test]
    fn empty_input_yields_nothing_to_render() {
        let compositor = compositor();
        assert!(compositor.generate_strip(&[], 3).is_none());

        let no_image = Panel::new(None, vec![Element::new(ElementKind::Speech, "Hi")]);
        let bad_bytes = Panel::new(
            Some(b"not an image".to_vec()),
            vec![Element::new(ElementKind::Speech, "Hi")],
        );
        assert!(compositor.generate_strip(&[no_image, bad_bytes], 3).is_none());
    }

    #[test]
    fn strip_dimensions_follow_the_layout_contract() {
        let compositor = compositor();
        let style = compositor.style().clone();

        let panel = || Panel::new(Some(dark_png(300, 300)), Vec::new()).with_regions(Vec::new());
        let strip = compositor.generate_strip(&[panel(), panel()], 3).unwrap();
        assert_eq!(strip.dimensions(), (style.strip_width(2), style.strip_height(1)));

        // Three panels capped at two columns wrap to a second row.
        let strip = compositor
            .generate_strip(&[panel(), panel(), panel()], 2)
            .unwrap();
        assert_eq!(strip.dimensions(), (style.strip_width(2), style.strip_height(2)));
    }

    #[test]
    fn strip_paints_paper_and_tile_frames() {
        let compositor = compositor();
        let style = compositor.style().clone();
        let panel = Panel::new(Some(dark_png(300, 300)), Vec::new()).with_regions(Vec::new());
        let strip = compositor.generate_strip(&[panel], 3).unwrap();

        assert_eq!(strip.get_pixel(1, 1), &to_rgba(style.paper));
        assert_eq!(
            strip.get_pixel(style.outer_border + 1, style.outer_border + 1),
            &to_rgba(style.ink)
        );
        // Inside the frame sits the panel artwork.
        let inner = style.outer_border + style.tile_border + 10;
        assert_eq!(strip.get_pixel(inner, inner), &Rgba([40, 40, 40, 255]));
    }

    #[test]
    fn elements_beyond_region_count_get_programmatic_bubbles() {
        let compositor = compositor();
        // No detected regions cached: the speech element must fall back.
        let panel = Panel::new(
            Some(dark_png(600, 600)),
            vec![Element::new(ElementKind::Speech, "Hi!").with_position(Anchor::Center)],
        )
        .with_regions(Vec::new());

        let out = compositor.render_panel(&panel).unwrap();
        let region = compositor.bubbles().synthesize_region(
            600,
            600,
            &panel.elements[0],
        );
        let probe = out.get_pixel(region.x + region.width / 2, region.y + 8);
        assert_eq!(probe.0, [255, 255, 255, 255]);
    }

    #[test]
    fn sfx_never_consumes_a_detected_region() {
        let compositor = compositor();
        let cached = Region::synthetic(20, 20, 150, 90, RegionShape::Bubble);
        let elements = vec![
            Element::new(ElementKind::Sfx, "Pow").with_position(Anchor::Center),
            Element::new(ElementKind::Speech, "Hi!").with_position(Anchor::Center),
        ];
        let panel = Panel::new(Some(dark_png(600, 600)), elements.clone())
            .with_regions(vec![cached.clone()]);

        // The speech element takes the cached region, so no fallback bubble
        // appears at the speech element's center anchor.
        let out = compositor.render_panel(&panel).unwrap();
        let synth = compositor
            .bubbles()
            .synthesize_region(600, 600, &elements[1]);
        let probe = out.get_pixel(synth.x + synth.width / 2, synth.y + 8);
        assert_eq!(probe.0, [40, 40, 40, 255]);

        // Control: two speech elements against one region do need a fallback.
        let elements = vec![
            Element::new(ElementKind::Speech, "One").with_position(Anchor::TopRight),
            Element::new(ElementKind::Speech, "Two").with_position(Anchor::Center),
        ];
        let panel =
            Panel::new(Some(dark_png(600, 600)), elements.clone()).with_regions(vec![cached]);
        let out = compositor.render_panel(&panel).unwrap();
        let synth = compositor
            .bubbles()
            .synthesize_region(600, 600, &elements[1]);
        let probe = out.get_pixel(synth.x + synth.width / 2, synth.y + 8);
        assert_eq!(probe.0, [255, 255, 255, 255]);
    }

    #[test]
    fn user_input_element_waits_for_resolved_text() {
        let compositor = compositor();
        let element = Element::new(ElementKind::Speech, "type here...")
            .with_position(Anchor::Center)
            .user_input();

        let unresolved = Panel::new(Some(dark_png(600, 600)), vec![element.clone()])
            .with_regions(Vec::new());
        let out = compositor.render_panel(&unresolved).unwrap();
        let synth = compositor.bubbles().synthesize_region(600, 600, &element);
        let probe = out.get_pixel(synth.x + synth.width / 2, synth.y + 8);
        assert_eq!(probe.0, [40, 40, 40, 255]);

        let resolved = Panel::new(Some(dark_png(600, 600)), vec![element.clone()])
            .with_regions(Vec::new())
            .with_user_text("Hello!");
        let out = compositor.render_panel(&resolved).unwrap();
        let probe = out.get_pixel(synth.x + synth.width / 2, synth.y + 8);
        assert_eq!(probe.0, [255, 255, 255, 255]);
    }

    #[test]
    fn render_panel_preserves_input_resolution() {
        let compositor = compositor();
        let panel = Panel::new(Some(dark_png(640, 480)), Vec::new()).with_regions(Vec::new());
        let out = compositor.render_panel(&panel).unwrap();
        assert_eq!(out.dimensions(), (640, 480));
    }
}
