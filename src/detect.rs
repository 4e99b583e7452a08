use crate::debug::DebugLogger;
use image::GrayImage;
use std::f32::consts::PI;
use std::sync::Arc;

/// Shape class assigned by the detector's geometry tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionShape {
    Bubble,
    Box,
}

/// A detected (or synthesized) empty area a text element can be rendered
/// into. Coordinates are clamped to the source image frame; `mask` and
/// `contour` are populated by detection only.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub center_x: u32,
    pub center_y: u32,
    /// Filled pixel count of the detected component; synthesized regions use
    /// their bounding-box area.
    pub area: u32,
    pub shape: RegionShape,
    pub mask: Option<GrayImage>,
    pub contour: Option<Vec<(u32, u32)>>,
}

impl Region {
    /// A synthesized region with no detection metadata.
    pub fn synthetic(x: u32, y: u32, width: u32, height: u32, shape: RegionShape) -> Self {
        Self {
            x,
            y,
            width,
            height,
            center_x: x + width / 2,
            center_y: y + height / 2,
            area: width.saturating_mul(height),
            shape,
            mask: None,
            contour: None,
        }
    }
}

/// Detection thresholds, tuned against one image generator's visual
/// conventions at the canonical 1024x1024 resolution. A different upstream
/// generator will need retuning; nothing here is a guaranteed-correct
/// heuristic.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Luminance above which a pixel counts as near-white (bubble interior).
    pub white_threshold: u8,
    /// Accepted component area range, in pixels.
    pub min_area: u32,
    pub max_area: u32,
    /// Square morphology kernel edge; 3 bridges anti-aliasing gaps in line
    /// art without merging neighboring bubbles.
    pub kernel_size: u32,
    pub close_iterations: u32,
    /// `4*pi*area / perimeter^2` floor for bubble-shaped components.
    pub min_circularity: f32,
    /// `area / bbox_area` floor for box-shaped components.
    pub min_rectangularity: f32,
    /// Dark padding around the frame so shapes cut by the edge still close.
    pub border_pad: u32,
    /// Bounding boxes this close to a border are background-checked.
    pub edge_margin: u32,
    /// Fraction of image height within which candidates share a reading row.
    pub row_band_ratio: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            white_threshold: 180,
            min_area: 70_000,
            max_area: 250_000,
            kernel_size: 3,
            close_iterations: 2,
            min_circularity: 0.52,
            min_rectangularity: 0.7,
            border_pad: 20,
            edge_margin: 10,
            row_band_ratio: 0.15,
        }
    }
}

/// Finds empty speech bubbles and narration boxes in a rendered panel.
/// Both entry points are pure: identical bytes yield an identical ordered
/// region list, and nothing in here can fail — undecodable input is an
/// empty result.
pub struct RegionDetector {
    config: DetectorConfig,
    debug: Option<Arc<DebugLogger>>,
}

impl RegionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            debug: None,
        }
    }

    pub(crate) fn with_debug(mut self, debug: Option<Arc<DebugLogger>>) -> Self {
        self.debug = debug;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Rounded, near-white regions in reading order.
    pub fn detect_bubbles(&self, image_bytes: &[u8]) -> Vec<Region> {
        self.detect_filtered(image_bytes, |c| c.is_bubble)
    }

    /// Rectangular, near-white caption regions in reading order.
    pub fn detect_narration_boxes(&self, image_bytes: &[u8]) -> Vec<Region> {
        self.detect_filtered(image_bytes, |c| c.is_box)
    }

    /// Bubbles and boxes together, in reading order. Both shape tests run on
    /// the same component set, so a candidate passing both appears once,
    /// classified as a bubble.
    pub fn detect_regions(&self, image_bytes: &[u8]) -> Vec<Region> {
        self.detect_filtered(image_bytes, |c| c.is_bubble || c.is_box)
    }

    /// Tuning aid: the decoded panel with each region's bounding box and
    /// traced contour drawn over it. `None` when the bytes don't decode.
    pub fn annotate(&self, image_bytes: &[u8], regions: &[Region]) -> Option<image::RgbaImage> {
        let mut pixmap = crate::raster::decode_pixmap(image_bytes)?;
        for region in regions {
            if let Some(rect) = tiny_skia::Rect::from_xywh(
                region.x as f32,
                region.y as f32,
                region.width as f32,
                region.height as f32,
            ) {
                let path = tiny_skia::PathBuilder::from_rect(rect);
                crate::raster::stroke_path(
                    &mut pixmap,
                    &path,
                    crate::types::palette::SPEECH_ACCENT,
                    2.0,
                );
            }
            if let Some(contour) = &region.contour {
                for &(x, y) in contour {
                    crate::raster::fill_rect(
                        &mut pixmap,
                        x as f32 - 0.5,
                        y as f32 - 0.5,
                        1.5,
                        1.5,
                        crate::types::palette::THOUGHT_ACCENT,
                    );
                }
            }
        }
        Some(crate::raster::pixmap_to_rgba(&pixmap))
    }

    fn detect_filtered(&self, image_bytes: &[u8], keep: impl Fn(&Candidate) -> bool) -> Vec<Region> {
        let Some(scan) = self.scan(image_bytes) else {
            return Vec::new();
        };
        let mut regions: Vec<Region> = scan
            .candidates
            .iter()
            .filter(|c| keep(c))
            .map(|c| c.to_region(&scan))
            .collect();
        sort_reading_order(&mut regions, scan.height, self.config.row_band_ratio);
        if let Some(debug) = self.debug.as_deref() {
            debug.increment("detect.regions_returned", regions.len() as u64);
        }
        regions
    }

    /// Decode, threshold, clean up, label, and geometry-test in one pass.
    fn scan(&self, image_bytes: &[u8]) -> Option<Scan> {
        let gray = match image::load_from_memory(image_bytes) {
            Ok(decoded) => decoded.to_luma8(),
            Err(_) => {
                if let Some(debug) = self.debug.as_deref() {
                    debug.increment("detect.decode_failed", 1);
                }
                return None;
            }
        };
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let pad = self.config.border_pad as usize;
        let mut mask = BitGrid::from_threshold(&gray, self.config.white_threshold, pad);

        // The original pipeline closes the inverted (ink) mask; on the white
        // mask that is an opening, which severs thin white leaks through
        // gaps in the line art before components are labeled.
        let radius = (self.config.kernel_size / 2) as usize;
        if radius > 0 {
            for _ in 0..self.config.close_iterations {
                mask = mask.erode(radius);
            }
            for _ in 0..self.config.close_iterations {
                mask = mask.dilate(radius);
            }
        }

        let (labels, components) = label_components(&mask);
        let mut candidates = Vec::new();
        for component in components {
            if let Some(candidate) = self.evaluate(&component, &labels, width, height, pad) {
                candidates.push(candidate);
            }
        }
        Some(Scan {
            width,
            height,
            pad,
            labels,
            candidates,
        })
    }

    fn evaluate(
        &self,
        component: &RawComponent,
        labels: &LabelGrid,
        width: u32,
        height: u32,
        pad: usize,
    ) -> Option<Candidate> {
        let area = component.pixel_count;
        if area < self.config.min_area || area > self.config.max_area {
            return None;
        }

        // Bounding box back in the unpadded frame, clamped.
        let x0 = (component.min_x.saturating_sub(pad)).min(width as usize - 1) as u32;
        let y0 = (component.min_y.saturating_sub(pad)).min(height as usize - 1) as u32;
        let x1 = (component.max_x.saturating_sub(pad)).min(width as usize - 1) as u32;
        let y1 = (component.max_y.saturating_sub(pad)).min(height as usize - 1) as u32;
        let w = x1 - x0 + 1;
        let h = y1 - y0 + 1;

        if self.is_edge_background(x0, y0, w, h, width, height) {
            if let Some(debug) = self.debug.as_deref() {
                debug.increment("detect.rejected_edge_background", 1);
                debug.log_json(&format!(
                    "{{\"type\":\"detect.reject\",\"reason\":\"edge_background\",\"x\":{x0},\"y\":{y0},\"w\":{w},\"h\":{h}}}"
                ));
            }
            return None;
        }

        let contour = trace_boundary(labels, component);
        let perimeter = contour.perimeter;
        if perimeter <= 0.0 {
            return None;
        }
        let circularity = 4.0 * PI * area as f32 / (perimeter * perimeter);
        let bbox_area = (w as f32) * (h as f32);
        let rectangularity = if bbox_area > 0.0 {
            area as f32 / bbox_area
        } else {
            0.0
        };

        let is_bubble = circularity >= self.config.min_circularity;
        let is_box = rectangularity >= self.config.min_rectangularity;
        if let Some(debug) = self.debug.as_deref() {
            debug.log_json(&format!(
                "{{\"type\":\"detect.candidate\",\"x\":{x0},\"y\":{y0},\"w\":{w},\"h\":{h},\"area\":{area},\"circularity\":{circularity:.4},\"rectangularity\":{rectangularity:.4},\"bubble\":{is_bubble},\"box\":{is_box}}}"
            ));
            if is_bubble {
                debug.increment("detect.bubbles", 1);
            }
            if is_box {
                debug.increment("detect.boxes", 1);
            }
        }
        if !is_bubble && !is_box {
            return None;
        }

        Some(Candidate {
            label: component.id,
            x: x0,
            y: y0,
            width: w,
            height: h,
            area,
            is_bubble,
            is_box,
            contour: contour.points,
        })
    }

    /// A box that hugs an image border and runs along more than half of it is
    /// page background showing through, not a bubble.
    fn is_edge_background(&self, x: u32, y: u32, w: u32, h: u32, width: u32, height: u32) -> bool {
        let margin = self.config.edge_margin;
        let near_left = x < margin;
        let near_top = y < margin;
        let near_right = x + w > width.saturating_sub(margin);
        let near_bottom = y + h > height.saturating_sub(margin);
        if !(near_left || near_top || near_right || near_bottom) {
            return false;
        }

        let mut edge_ratio = 0.0f32;
        let h_ratio = h as f32 / height as f32;
        let w_ratio = w as f32 / width as f32;
        if near_left {
            edge_ratio = edge_ratio.max(h_ratio);
        }
        if near_right {
            edge_ratio = edge_ratio.max(h_ratio);
        }
        if near_top {
            edge_ratio = edge_ratio.max(w_ratio);
        }
        if near_bottom {
            edge_ratio = edge_ratio.max(w_ratio);
        }
        edge_ratio > 0.5
    }
}

struct Scan {
    width: u32,
    height: u32,
    pad: usize,
    labels: LabelGrid,
    candidates: Vec<Candidate>,
}

struct Candidate {
    label: u32,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    area: u32,
    is_bubble: bool,
    is_box: bool,
    contour: Vec<(usize, usize)>,
}

impl Candidate {
    fn to_region(&self, scan: &Scan) -> Region {
        let mut mask = GrayImage::new(scan.width, scan.height);
        let pad = scan.pad;
        for py in (self.y as usize + pad)..=(self.y as usize + self.height as usize - 1 + pad) {
            for px in (self.x as usize + pad)..=(self.x as usize + self.width as usize - 1 + pad) {
                if scan.labels.get(px, py) == self.label {
                    mask.put_pixel((px - pad) as u32, (py - pad) as u32, image::Luma([255]));
                }
            }
        }
        let contour = self
            .contour
            .iter()
            .map(|&(px, py)| {
                (
                    (px.saturating_sub(pad) as u32).min(scan.width - 1),
                    (py.saturating_sub(pad) as u32).min(scan.height - 1),
                )
            })
            .collect();

        let shape = if self.is_bubble {
            RegionShape::Bubble
        } else {
            RegionShape::Box
        };
        Region {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            center_x: self.x + self.width / 2,
            center_y: self.y + self.height / 2,
            area: self.area,
            shape,
            mask: Some(mask),
            contour: Some(contour),
        }
    }
}

/// Binary candidate mask over the padded frame.
struct BitGrid {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl BitGrid {
    fn from_threshold(gray: &GrayImage, threshold: u8, pad: usize) -> Self {
        let (w, h) = gray.dimensions();
        let width = w as usize + 2 * pad;
        let height = h as usize + 2 * pad;
        let mut data = vec![0u8; width * height];
        for y in 0..h as usize {
            let row = (y + pad) * width + pad;
            for x in 0..w as usize {
                if gray.get_pixel(x as u32, y as u32).0[0] > threshold {
                    data[row + x] = 1;
                }
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    fn erode(&self, radius: usize) -> BitGrid {
        self.morph(radius, false)
    }

    fn dilate(&self, radius: usize) -> BitGrid {
        self.morph(radius, true)
    }

    fn morph(&self, radius: usize, grow: bool) -> BitGrid {
        let mut data = vec![0u8; self.width * self.height];
        let r = radius as isize;
        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                let center = self.get(x as usize, y as usize);
                // Erosion can only keep set pixels; dilation always keeps them.
                if !grow && center == 0 {
                    continue;
                }
                if grow && center == 1 {
                    data[y as usize * self.width + x as usize] = 1;
                    continue;
                }
                let mut hit = !grow;
                'window: for dy in -r..=r {
                    for dx in -r..=r {
                        let nx = x + dx;
                        let ny = y + dy;
                        let set = nx >= 0
                            && ny >= 0
                            && nx < self.width as isize
                            && ny < self.height as isize
                            && self.get(nx as usize, ny as usize) == 1;
                        if grow && set {
                            hit = true;
                            break 'window;
                        }
                        if !grow && !set {
                            hit = false;
                            break 'window;
                        }
                    }
                }
                if hit {
                    data[y as usize * self.width + x as usize] = 1;
                }
            }
        }
        BitGrid {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

struct LabelGrid {
    width: usize,
    height: usize,
    labels: Vec<u32>,
}

impl LabelGrid {
    #[inline]
    fn get(&self, x: usize, y: usize) -> u32 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.labels[y * self.width + x]
    }
}

struct RawComponent {
    id: u32,
    start: (usize, usize),
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    pixel_count: u32,
}

/// Eight-connected component labeling in row-major order. The scan order is
/// what makes detection deterministic: labels, and therefore candidate
/// ordering before the reading-order sort, never depend on hash state.
fn label_components(mask: &BitGrid) -> (LabelGrid, Vec<RawComponent>) {
    let mut labels = vec![0u32; mask.width * mask.height];
    let mut components = Vec::new();
    let mut next_label = 0u32;
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for y in 0..mask.height {
        for x in 0..mask.width {
            let idx = y * mask.width + x;
            if mask.data[idx] == 0 || labels[idx] != 0 {
                continue;
            }
            next_label += 1;
            let id = next_label;
            let mut component = RawComponent {
                id,
                start: (x, y),
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixel_count: 0,
            };
            labels[idx] = id;
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                component.pixel_count += 1;
                component.min_x = component.min_x.min(cx);
                component.min_y = component.min_y.min(cy);
                component.max_x = component.max_x.max(cx);
                component.max_y = component.max_y.max(cy);
                for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = cx as isize + dx;
                        let ny = cy as isize + dy;
                        if nx < 0
                            || ny < 0
                            || nx >= mask.width as isize
                            || ny >= mask.height as isize
                        {
                            continue;
                        }
                        let nidx = ny as usize * mask.width + nx as usize;
                        if mask.data[nidx] == 1 && labels[nidx] == 0 {
                            labels[nidx] = id;
                            stack.push((nx as usize, ny as usize));
                        }
                    }
                }
            }
            components.push(component);
        }
    }

    (
        LabelGrid {
            width: mask.width,
            height: mask.height,
            labels,
        },
        components,
    )
}

struct Boundary {
    points: Vec<(usize, usize)>,
    perimeter: f32,
}

// Clockwise neighbor order starting east, y pointing down.
const DIRS: [(isize, isize); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Moore-neighbor boundary tracing around one labeled component, starting at
/// its topmost-leftmost pixel. Orthogonal steps count 1, diagonal steps √2,
/// which is close enough to the true outline length for the circularity
/// ratio this feeds.
fn trace_boundary(labels: &LabelGrid, component: &RawComponent) -> Boundary {
    let diag = libm::sqrtf(2.0);
    let start = component.start;
    let mut points = vec![start];
    let mut perimeter = 0.0f32;

    let mut current = start;
    // The pixel west of a row-major-first pixel is always background, so the
    // clockwise sweep begins just after west.
    let mut backtrack = 4usize;
    let step_cap = component.pixel_count.saturating_mul(8).max(16);
    let mut steps = 0u32;

    loop {
        let mut found = None;
        for i in 1..=8 {
            let dir = (backtrack + i) % 8;
            let (dx, dy) = DIRS[dir];
            let nx = current.0 as isize + dx;
            let ny = current.1 as isize + dy;
            if nx < 0 || ny < 0 {
                continue;
            }
            if labels.get(nx as usize, ny as usize) == component.id {
                found = Some((dir, (nx as usize, ny as usize)));
                break;
            }
        }
        let Some((dir, next)) = found else {
            // Isolated pixel; call it a unit square.
            return Boundary {
                points,
                perimeter: 4.0,
            };
        };

        perimeter += if dir % 2 == 0 { 1.0 } else { diag };
        current = next;
        backtrack = (dir + 5) % 8;
        steps += 1;
        if current == start || steps >= step_cap {
            break;
        }
        points.push(current);
    }

    Boundary { points, perimeter }
}

/// Reading order: rows grouped by vertical center (the first member anchors
/// the row), rows stacked top to bottom, members sorted left to right.
fn sort_reading_order(regions: &mut Vec<Region>, image_height: u32, row_band_ratio: f32) {
    if regions.len() < 2 {
        return;
    }
    let row_threshold = image_height as f32 * row_band_ratio;

    let mut sorted = std::mem::take(regions);
    sorted.sort_by_key(|r| r.center_y);

    let mut rows: Vec<Vec<Region>> = Vec::new();
    let mut current_row: Vec<Region> = Vec::new();
    let mut current_row_y = 0u32;

    for region in sorted {
        if current_row.is_empty() {
            current_row_y = region.center_y;
            current_row.push(region);
            continue;
        }
        if (region.center_y as f32 - current_row_y as f32).abs() < row_threshold {
            current_row.push(region);
        } else {
            rows.push(std::mem::take(&mut current_row));
            current_row_y = region.center_y;
            current_row.push(region);
        }
    }
    if !current_row.is_empty() {
        rows.push(current_row);
    }

    for mut row in rows {
        row.sort_by_key(|r| r.center_x);
        regions.append(&mut row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn dark_canvas(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([40]))
    }

    fn png_bytes(img: &GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    fn fill_circle(img: &mut GrayImage, cx: i64, cy: i64, r: i64, value: u8) {
        let (w, h) = img.dimensions();
        for y in 0..h as i64 {
            for x in 0..w as i64 {
                let dx = x - cx;
                let dy = y - cy;
                if dx * dx + dy * dy <= r * r {
                    img.put_pixel(x as u32, y as u32, Luma([value]));
                }
            }
        }
    }

    fn fill_rounded_rect(img: &mut GrayImage, x0: i64, y0: i64, w: i64, h: i64, r: i64, value: u8) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                let inside_x = x >= x0 + r && x < x0 + w - r;
                let inside_y = y >= y0 + r && y < y0 + h - r;
                let inside = if inside_x || inside_y {
                    true
                } else {
                    let cx = if x < x0 + r { x0 + r } else { x0 + w - 1 - r };
                    let cy = if y < y0 + r { y0 + r } else { y0 + h - 1 - r };
                    let dx = x - cx;
                    let dy = y - cy;
                    dx * dx + dy * dy <= r * r
                };
                if inside {
                    img.put_pixel(x as u32, y as u32, Luma([value]));
                }
            }
        }
    }

    fn detector() -> RegionDetector {
        RegionDetector::new(DetectorConfig::default())
    }

    #[test]
    fn all_dark_image_detects_nothing() {
        let bytes = png_bytes(&dark_canvas(256, 256));
        let detector = detector();
        assert!(detector.detect_bubbles(&bytes).is_empty());
        assert!(detector.detect_narration_boxes(&bytes).is_empty());
    }

    #[test]
    fn undecodable_bytes_detect_nothing() {
        let detector = detector();
        assert!(detector.detect_bubbles(b"not an image").is_empty());
        assert!(detector.detect_narration_boxes(&[]).is_empty());
    }

    #[test]
    fn single_rounded_rect_is_one_bubble_with_matching_bbox() {
        let mut img = dark_canvas(1024, 1024);
        // Near-white, not pure white, to exercise the threshold.
        fill_rounded_rect(&mut img, 300, 300, 400, 250, 40, 250);
        let bytes = png_bytes(&img);

        let bubbles = detector().detect_bubbles(&bytes);
        assert_eq!(bubbles.len(), 1);
        let b = &bubbles[0];
        let tolerance = 3i64;
        assert!((b.x as i64 - 300).abs() <= tolerance, "x = {}", b.x);
        assert!((b.y as i64 - 300).abs() <= tolerance, "y = {}", b.y);
        assert!((b.width as i64 - 400).abs() <= 2 * tolerance, "w = {}", b.width);
        assert!((b.height as i64 - 250).abs() <= 2 * tolerance, "h = {}", b.height);
        assert!(b.mask.is_some());
        assert!(b.contour.as_ref().is_some_and(|c| !c.is_empty()));
    }

    #[test]
    fn white_circle_center_is_located_within_tolerance() {
        let mut img = dark_canvas(1024, 1024);
        fill_circle(&mut img, 512, 300, 180, 255);
        let bytes = png_bytes(&img);

        let bubbles = detector().detect_bubbles(&bytes);
        assert_eq!(bubbles.len(), 1);
        let b = &bubbles[0];
        assert!((b.center_x as i64 - 512).abs() <= 5, "cx = {}", b.center_x);
        assert!((b.center_y as i64 - 300).abs() <= 5, "cy = {}", b.center_y);
        assert_eq!(b.shape, RegionShape::Bubble);
    }

    #[test]
    fn detection_is_deterministic() {
        let mut img = dark_canvas(1024, 1024);
        fill_circle(&mut img, 512, 300, 180, 255);
        fill_rounded_rect(&mut img, 100, 650, 400, 250, 40, 255);
        let bytes = png_bytes(&img);

        let detector = detector();
        let first = detector.detect_bubbles(&bytes);
        let second = detector.detect_bubbles(&bytes);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn regions_come_back_in_reading_order() {
        let mut img = dark_canvas(1024, 1024);
        // Top-left, top-right, bottom-center.
        fill_circle(&mut img, 250, 220, 160, 255);
        fill_circle(&mut img, 750, 230, 160, 255);
        fill_circle(&mut img, 512, 750, 160, 255);
        let bytes = png_bytes(&img);

        let bubbles = detector().detect_bubbles(&bytes);
        assert_eq!(bubbles.len(), 3);
        let centers: Vec<(u32, u32)> = bubbles.iter().map(|b| (b.center_x, b.center_y)).collect();
        assert!((centers[0].0 as i64 - 250).abs() <= 5);
        assert!((centers[1].0 as i64 - 750).abs() <= 5);
        assert!((centers[2].0 as i64 - 512).abs() <= 5);
        assert!(centers[2].1 > centers[0].1);
    }

    #[test]
    fn elongated_box_is_a_narration_box_not_a_bubble() {
        let mut img = dark_canvas(1024, 1024);
        fill_rounded_rect(&mut img, 192, 100, 640, 120, 0, 255);
        let bytes = png_bytes(&img);

        let detector = detector();
        assert!(detector.detect_bubbles(&bytes).is_empty());
        let boxes = detector.detect_narration_boxes(&bytes);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].shape, RegionShape::Box);
    }

    #[test]
    fn background_spanning_a_border_is_rejected() {
        let mut img = dark_canvas(1024, 1024);
        // A full-width band hugging the top border: page background, not a box.
        fill_rounded_rect(&mut img, 0, 0, 1024, 200, 0, 255);
        let bytes = png_bytes(&img);

        let detector = detector();
        assert!(detector.detect_bubbles(&bytes).is_empty());
        assert!(detector.detect_narration_boxes(&bytes).is_empty());
    }

    #[test]
    fn edge_clipped_bubble_is_kept_and_clamped() {
        let mut img = dark_canvas(1024, 1024);
        // Circle cut by the left border; spans well under half of it.
        fill_circle(&mut img, 120, 512, 160, 255);
        let bytes = png_bytes(&img);

        let bubbles = detector().detect_bubbles(&bytes);
        assert_eq!(bubbles.len(), 1);
        let b = &bubbles[0];
        assert_eq!(b.x, 0);
        assert!(b.width <= 282);
        let mask = b.mask.as_ref().unwrap();
        assert_eq!(mask.dimensions(), (1024, 1024));
    }

    #[test]
    fn combined_detection_reports_dual_class_shapes_once() {
        let mut img = dark_canvas(1024, 1024);
        // A fat rounded rectangle passes both the circularity and the
        // rectangularity tests.
        fill_rounded_rect(&mut img, 300, 300, 400, 250, 40, 255);
        let bytes = png_bytes(&img);

        let detector = detector();
        assert_eq!(detector.detect_bubbles(&bytes).len(), 1);
        assert_eq!(detector.detect_narration_boxes(&bytes).len(), 1);
        let combined = detector.detect_regions(&bytes);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].shape, RegionShape::Bubble);
    }

    #[test]
    fn area_bounds_filter_out_small_and_huge_shapes() {
        let mut img = dark_canvas(1024, 1024);
        fill_circle(&mut img, 200, 200, 60, 255); // ~11k px, too small
        fill_circle(&mut img, 650, 650, 300, 255); // ~283k px, too big
        let bytes = png_bytes(&img);
        assert!(detector().detect_bubbles(&bytes).is_empty());
    }

    #[test]
    fn annotate_overlays_region_outlines() {
        let mut img = dark_canvas(1024, 1024);
        fill_circle(&mut img, 512, 300, 180, 255);
        let bytes = png_bytes(&img);

        let detector = detector();
        let regions = detector.detect_bubbles(&bytes);
        let annotated = detector.annotate(&bytes, &regions).unwrap();
        assert_eq!(annotated.dimensions(), (1024, 1024));
        // The bounding-box stroke introduces accent-colored pixels the
        // grayscale source cannot contain.
        let has_accent = annotated.pixels().any(|p| {
            let [r, g, b, _] = p.0;
            r > 150 && g < 100 && b < 100
        });
        assert!(has_accent);
        assert!(detector.annotate(b"garbage", &regions).is_none());
    }

    #[test]
    fn synthetic_region_computes_centers_and_area() {
        let r = Region::synthetic(10, 20, 100, 50, RegionShape::Box);
        assert_eq!(r.center_x, 60);
        assert_eq!(r.center_y, 45);
        assert_eq!(r.area, 5000);
        assert!(r.mask.is_none());
    }
}
