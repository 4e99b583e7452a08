mod bubble;
mod compose;
mod debug;
mod detect;
mod error;
mod font;
mod layout;
mod raster;
mod types;

pub use bubble::{BubbleStyle, ProgrammaticBubbleRenderer};
pub use compose::{PanelCompositor, StripStyle};
use debug::DebugLogger;
pub use detect::{DetectorConfig, Region, RegionDetector, RegionShape};
pub use error::HalftoneError;
pub use layout::{LayoutConfig, TextLayoutEngine};
pub use types::{Anchor, Color, Element, ElementKind, Panel, Px};

use font::FontRegistry;
use image::RgbaImage;
use std::sync::Arc;

/// Encodes a finished panel or strip as PNG bytes for the caller's
/// transport. Serialization is the one edge allowed to fail.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, HalftoneError> {
    raster::encode_png(image)
}

/// The imaging core of a comic generator session: detects empty bubbles and
/// boxes in generated panels, fits narrative text into them, falls back to
/// programmatic shapes, and composites the final strip.
///
/// Everything is tuned through the builder; the built value is immutable and
/// every pipeline call works on owned copies, so one `Halftone` can serve
/// concurrent panels from plain worker threads without locking.
pub struct Halftone {
    compositor: PanelCompositor,
}

#[derive(Clone)]
pub struct HalftoneBuilder {
    detector: DetectorConfig,
    layout: LayoutConfig,
    bubble_style: BubbleStyle,
    strip: StripStyle,
    font_dirs: Vec<std::path::PathBuf>,
    font_files: Vec<std::path::PathBuf>,
    font_bytes: Vec<(Vec<u8>, Option<String>)>,
    debug_path: Option<std::path::PathBuf>,
}

impl Halftone {
    pub fn builder() -> HalftoneBuilder {
        HalftoneBuilder::new()
    }

    pub fn detector(&self) -> &RegionDetector {
        self.compositor.detector()
    }

    pub fn compositor(&self) -> &PanelCompositor {
        &self.compositor
    }

    /// Primary names of the registered fonts, usable with
    /// [`HalftoneBuilder::font`].
    pub fn registered_fonts(&self) -> Vec<String> {
        self.compositor
            .layout()
            .registry()
            .registered_names()
            .map(str::to_string)
            .collect()
    }

    /// Ordered bubble-shaped regions; empty on undecodable bytes or no match.
    pub fn detect_bubbles(&self, image_bytes: &[u8]) -> Vec<Region> {
        self.compositor.detector().detect_bubbles(image_bytes)
    }

    /// Ordered box-shaped regions; empty on undecodable bytes or no match.
    pub fn detect_narration_boxes(&self, image_bytes: &[u8]) -> Vec<Region> {
        self.compositor
            .detector()
            .detect_narration_boxes(image_bytes)
    }

    /// Both shape classes in one reading-order list, as used for pairing.
    pub fn detect_regions(&self, image_bytes: &[u8]) -> Vec<Region> {
        self.compositor.detector().detect_regions(image_bytes)
    }

    /// The finished full-resolution panel, or `None` when the panel has no
    /// decodable image.
    pub fn render_panel(&self, panel: &Panel) -> Option<RgbaImage> {
        self.compositor.render_panel(panel)
    }

    /// The composited strip page, or `None` when nothing is renderable.
    pub fn generate_strip(&self, panels: &[Panel], max_columns: usize) -> Option<RgbaImage> {
        self.compositor.generate_strip(panels, max_columns)
    }

    pub fn generate_strip_png(
        &self,
        panels: &[Panel],
        max_columns: usize,
    ) -> Result<Option<Vec<u8>>, HalftoneError> {
        match self.compositor.generate_strip(panels, max_columns) {
            Some(strip) => raster::encode_png(&strip).map(Some),
            None => Ok(None),
        }
    }
}

impl HalftoneBuilder {
    pub fn new() -> Self {
        Self {
            detector: DetectorConfig::default(),
            layout: LayoutConfig::default(),
            bubble_style: BubbleStyle::default(),
            strip: StripStyle::default(),
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            debug_path: None,
        }
    }

    pub fn detector_config(mut self, config: DetectorConfig) -> Self {
        self.detector = config;
        self
    }

    pub fn white_threshold(mut self, threshold: u8) -> Self {
        self.detector.white_threshold = threshold;
        self
    }

    pub fn area_bounds(mut self, min_area: u32, max_area: u32) -> Self {
        self.detector.min_area = min_area;
        self.detector.max_area = max_area;
        self
    }

    pub fn min_circularity(mut self, value: f32) -> Self {
        self.detector.min_circularity = value;
        self
    }

    pub fn min_rectangularity(mut self, value: f32) -> Self {
        self.detector.min_rectangularity = value;
        self
    }

    pub fn layout_config(mut self, config: LayoutConfig) -> Self {
        self.layout = config;
        self
    }

    /// Registered font name used for measurement and drawing.
    pub fn font(mut self, name: impl Into<String>) -> Self {
        self.layout.font = Some(name.into());
        self
    }

    pub fn bubble_style(mut self, style: BubbleStyle) -> Self {
        self.bubble_style = style;
        self
    }

    pub fn strip_style(mut self, style: StripStyle) -> Self {
        self.strip = style;
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, data: Vec<u8>, source_name: Option<String>) -> Self {
        self.font_bytes.push((data, source_name));
        self
    }

    /// JSON-lines detection/compositing event log for threshold tuning.
    pub fn debug_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Halftone, HalftoneError> {
        self.validate()?;

        let mut registry = FontRegistry::new();
        for dir in &self.font_dirs {
            registry.register_dir(dir);
        }
        for file in &self.font_files {
            registry.register_file(file);
        }
        for (data, source_name) in self.font_bytes {
            registry.register_bytes(data, source_name.as_deref())?;
        }

        let debug = match self.debug_path {
            Some(path) => Some(Arc::new(DebugLogger::new(path)?)),
            None => None,
        };

        let detector = RegionDetector::new(self.detector).with_debug(debug.clone());
        let layout = TextLayoutEngine::new(Arc::new(registry), self.layout);
        let bubbles = ProgrammaticBubbleRenderer::new(self.bubble_style);
        let compositor = PanelCompositor::new(detector, layout, bubbles, self.strip, debug);

        Ok(Halftone { compositor })
    }

    fn validate(&self) -> Result<(), HalftoneError> {
        let d = &self.detector;
        if d.min_area == 0 || d.min_area >= d.max_area {
            return Err(HalftoneError::InvalidConfiguration(format!(
                "area bounds must satisfy 0 < min_area < max_area (got {}..{})",
                d.min_area, d.max_area
            )));
        }
        if d.kernel_size == 0 || d.kernel_size % 2 == 0 {
            return Err(HalftoneError::InvalidConfiguration(format!(
                "kernel_size must be odd and non-zero (got {})",
                d.kernel_size
            )));
        }
        if !(0.0..=2.0).contains(&d.min_circularity) || d.min_circularity <= 0.0 {
            return Err(HalftoneError::InvalidConfiguration(format!(
                "min_circularity must be in (0, 2] (got {})",
                d.min_circularity
            )));
        }
        if !(0.0..=1.0).contains(&d.min_rectangularity) || d.min_rectangularity <= 0.0 {
            return Err(HalftoneError::InvalidConfiguration(format!(
                "min_rectangularity must be in (0, 1] (got {})",
                d.min_rectangularity
            )));
        }
        if !(0.0..1.0).contains(&d.row_band_ratio) || d.row_band_ratio <= 0.0 {
            return Err(HalftoneError::InvalidConfiguration(format!(
                "row_band_ratio must be in (0, 1) (got {})",
                d.row_band_ratio
            )));
        }

        let l = &self.layout;
        if l.min_font_size < 1.0 {
            return Err(HalftoneError::InvalidConfiguration(format!(
                "min_font_size must be >= 1 (got {})",
                l.min_font_size
            )));
        }
        if !(0.0..0.5).contains(&l.padding_ratio) {
            return Err(HalftoneError::InvalidConfiguration(format!(
                "padding_ratio must be in [0, 0.5) (got {})",
                l.padding_ratio
            )));
        }
        if l.line_spacing <= 0.0 {
            return Err(HalftoneError::InvalidConfiguration(format!(
                "line_spacing must be positive (got {})",
                l.line_spacing
            )));
        }

        if self.strip.tile_size == 0 {
            return Err(HalftoneError::InvalidConfiguration(
                "tile_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for HalftoneBuilder {
    fn default() -> Self {
        Self::new()
    }
}
