use crate::detect::Region;
use crate::font::FontRegistry;
use crate::raster;
use crate::types::palette;
use crate::types::{ElementKind, Px};
use std::sync::Arc;
use tiny_skia::Pixmap;

/// Layout tuning. The size buckets are calibrated to the canonical
/// 1024x1024 panel resolution; retune them together with the detector if the
/// upstream generator's resolution changes.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Registered font to measure and draw with. `None` means "whatever the
    /// registry resolves", falling back to a system face.
    pub font: Option<String>,
    /// Fit search floor; below this we truncate instead of shrinking.
    pub min_font_size: f32,
    /// Interior padding per side, as a fraction of the region width.
    pub padding_ratio: f32,
    pub line_spacing: f32,
    /// Boxes are wider than bubbles, so narration starts bigger.
    pub narration_boost: f32,
    pub sfx_font_size: f32,
    pub sfx_outline_width: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            font: None,
            min_font_size: 12.0,
            padding_ratio: 0.15,
            line_spacing: 1.2,
            narration_boost: 12.0,
            sfx_font_size: 56.0,
            sfx_outline_width: 6.0,
        }
    }
}

/// Fits text into a region at the largest font size whose word-wrapped block
/// stays inside the padded interior, truncating as a last resort, and draws
/// it centered. Total by contract: any text and any region produce a
/// same-sized output image, never an error.
pub struct TextLayoutEngine {
    registry: Arc<FontRegistry>,
    config: LayoutConfig,
}

struct NamePlan {
    text: String,
    font_size: f32,
    width: Px,
    height: Px,
}

struct FitPlan {
    font_size: f32,
    lines: Vec<String>,
    name: Option<NamePlan>,
    body_height: Px,
    line_advance: Px,
}

impl TextLayoutEngine {
    pub(crate) fn new(registry: Arc<FontRegistry>, config: LayoutConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &FontRegistry {
        &self.registry
    }

    /// Renders `text` into `region` on a copy of `image`.
    pub fn render(
        &self,
        image: &Pixmap,
        region: &Region,
        text: &str,
        kind: ElementKind,
        character_name: Option<&str>,
    ) -> Pixmap {
        let mut out = image.clone();
        let text = text.trim();
        if text.is_empty() {
            return out;
        }

        if kind == ElementKind::Sfx {
            self.draw_sfx(&mut out, region, text);
            return out;
        }

        let pad_x = region.width as f32 * self.config.padding_ratio;
        let pad_y = region.height as f32 * self.config.padding_ratio;
        let interior_w = region.width as f32 - 2.0 * pad_x;
        let interior_h = region.height as f32 - 2.0 * pad_y;
        if interior_w < 1.0 || interior_h < 1.0 {
            return out;
        }

        let name = match kind {
            ElementKind::Speech | ElementKind::Thought => character_name,
            _ => None,
        };
        let plan = self.fit(
            text,
            kind,
            name,
            Px::from_f32(interior_w),
            Px::from_f32(interior_h),
        );

        let Some(font_data) = self.registry.render_data(self.config.font.as_deref()) else {
            return out;
        };

        let name_height = plan.name.as_ref().map(|n| n.height).unwrap_or(Px::ZERO);
        let total_height = (name_height + plan.body_height).to_f32();
        let mut cursor_y =
            region.y as f32 + pad_y + ((interior_h - total_height) / 2.0).max(0.0);

        if let Some(name) = &plan.name {
            let name_x = region.x as f32 + (region.width as f32 - name.width.to_f32()) / 2.0;
            let color = match kind {
                ElementKind::Thought => palette::THOUGHT_ACCENT,
                _ => palette::SPEECH_ACCENT,
            };
            let baseline = cursor_y + raster::ascent_px(&font_data, name.font_size);
            raster::draw_text_line(
                &mut out,
                &font_data,
                &name.text,
                name.font_size,
                name_x,
                baseline,
                color,
                None,
            );
            cursor_y += name.height.to_f32();
        }

        let ascent = raster::ascent_px(&font_data, plan.font_size);
        let size_px = Px::from_f32(plan.font_size);
        for line in &plan.lines {
            let line_width = self.measure(line, size_px).to_f32();
            let x = region.x as f32 + (region.width as f32 - line_width) / 2.0;
            raster::draw_text_line(
                &mut out,
                &font_data,
                line,
                plan.font_size,
                x,
                cursor_y + ascent,
                palette::INK,
                None,
            );
            cursor_y += plan.line_advance.to_f32();
        }

        out
    }

    /// SFX never wraps: one loud line, accent fill, contrasting outline so it
    /// reads over busy artwork.
    fn draw_sfx(&self, out: &mut Pixmap, region: &Region, text: &str) {
        let Some(font_data) = self.registry.render_data(self.config.font.as_deref()) else {
            return;
        };
        let text = text.to_uppercase();
        let size = self.config.sfx_font_size;
        let width = self.measure(&text, Px::from_f32(size)).to_f32();
        let line_height = self
            .registry
            .line_height(
                self.config.font.as_deref(),
                Px::from_f32(size),
                Px::from_f32(size),
            )
            .to_f32();
        let x = region.center_x as f32 - width / 2.0;
        let top = region.center_y as f32 - line_height / 2.0;
        raster::draw_text_line(
            out,
            &font_data,
            &text,
            size,
            x,
            top + raster::ascent_px(&font_data, size),
            palette::SPEECH_ACCENT,
            Some((palette::SFX_OUTLINE, self.config.sfx_outline_width)),
        );
    }

    fn measure(&self, text: &str, size: Px) -> Px {
        self.registry
            .measure_text_width(self.config.font.as_deref(), size, text)
    }

    fn line_advance(&self, size: Px) -> Px {
        let line_height = self
            .registry
            .line_height(self.config.font.as_deref(), size, size);
        line_height * self.config.line_spacing
    }

    fn starting_size(&self, text: &str, kind: ElementKind) -> f32 {
        let length = text.chars().count();
        let base = if length < 15 {
            46.0
        } else if length < 30 {
            40.0
        } else if length < 50 {
            36.0
        } else {
            32.0
        };
        if kind == ElementKind::Narration {
            base + self.config.narration_boost
        } else {
            base
        }
    }

    fn name_plan(&self, name: &str, body_size: f32) -> NamePlan {
        let font_size = (body_size - 4.0).max(10.0);
        let size_px = Px::from_f32(font_size);
        let text = name.to_uppercase();
        let width = self.measure(&text, size_px);
        let height = self
            .registry
            .line_height(self.config.font.as_deref(), size_px, size_px)
            * 1.5;
        NamePlan {
            text,
            font_size,
            width,
            height,
        }
    }

    /// Largest size whose wrapped block fits; otherwise truncated lines at
    /// the floor size.
    fn fit(
        &self,
        text: &str,
        kind: ElementKind,
        character_name: Option<&str>,
        interior_w: Px,
        interior_h: Px,
    ) -> FitPlan {
        let floor = self.config.min_font_size.max(1.0);
        let start = self.starting_size(text, kind).max(floor);

        let mut size = start;
        while size >= floor {
            let size_px = Px::from_f32(size);
            let name = character_name.map(|n| self.name_plan(n, size));
            let name_height = name.as_ref().map(|n| n.height).unwrap_or(Px::ZERO);
            let available_h = interior_h - name_height;

            let lines = self.wrap(text, size_px, interior_w);
            let (block_w, block_h) = self.block_bounds(&lines, size_px);
            if block_w <= interior_w && block_h <= available_h {
                return FitPlan {
                    font_size: size,
                    lines,
                    name,
                    body_height: block_h,
                    line_advance: self.line_advance(size_px),
                };
            }
            size -= 1.0;
        }

        let size_px = Px::from_f32(floor);
        let name = character_name.map(|n| self.name_plan(n, floor));
        let name_height = name.as_ref().map(|n| n.height).unwrap_or(Px::ZERO);
        let lines = self.truncate_to_fit(text, size_px, interior_w, interior_h - name_height);
        let (_, block_h) = self.block_bounds(&lines, size_px);
        FitPlan {
            font_size: floor,
            lines,
            name,
            body_height: block_h,
            line_advance: self.line_advance(size_px),
        }
    }

    /// Greedy line filling: append a word while the line still fits, else
    /// break. A single word wider than the interior gets its own overlong
    /// line; the fit loop or truncation deals with it.
    fn wrap(&self, text: &str, size: Px, max_width: Px) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        let mut current = String::new();

        for word in text.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if self.measure(&candidate, size) <= max_width {
                current = candidate;
            } else {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                current = word.to_string();
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        if lines.is_empty() {
            lines.push(text.to_string());
        }
        lines
    }

    fn block_bounds(&self, lines: &[String], size: Px) -> (Px, Px) {
        let mut max_width = Px::ZERO;
        for line in lines {
            max_width = max_width.max(self.measure(line, size));
        }
        let height = self.line_advance(size) * (lines.len() as i32);
        (max_width, height)
    }

    /// Keeps the oldest words and drops from the end until the wrapped block
    /// fits the floor-size height. Even a lone overflowing word is rendered
    /// (with its ellipsis) rather than nothing.
    fn truncate_to_fit(&self, text: &str, size: Px, max_width: Px, max_height: Px) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return vec!["...".to_string()];
        }

        for count in (1..=words.len()).rev() {
            let mut candidate = words[..count].join(" ");
            if count < words.len() {
                candidate.push_str("...");
            }
            let lines = self.wrap(&candidate, size, max_width);
            let (_, height) = self.block_bounds(&lines, size);
            if height <= max_height {
                return lines;
            }
        }

        if words.len() > 1 {
            vec![format!("{}...", words[0])]
        } else {
            vec![words[0].to_string()]
        }
    }
}
