use crate::error::HalftoneError;
use crate::types::Px;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Px>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&mut self, key: &TextWidthKey) -> Option<Px> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Px) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            } else {
                break;
            }
        }
    }
}

/// Registered comic fonts plus cached measurement. The font-size search in
/// layout re-measures the same words at many sizes, so every width lookup is
/// memoized. Measurement stays total with zero registered fonts: unresolved
/// names fall back to a deterministic per-character approximation.
#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    text_width_cache: Mutex<TextWidthCache>,
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
    pub(crate) metrics: FontMetrics,
}

/// Advance widths in 1/1000 em for the Latin range, plus vertical metrics.
/// Enough for greedy word wrapping; anything outside the range goes through
/// rustybuzz shaping instead.
#[derive(Debug)]
pub(crate) struct FontMetrics {
    first_char: u8,
    last_char: u8,
    widths: Vec<u16>,
    ascent: i16,
    descent: i16,
    line_gap: i16,
    missing_width: u16,
}

impl FontRegistry {
    pub(crate) fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            text_width_cache: Mutex::new(TextWidthCache::new(20_000)),
        }
    }

    pub(crate) fn register_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Ok(entries) = fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                self.register_file(path);
            }
        }
    }

    pub(crate) fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return;
        }
        let Ok(data) = fs::read(path) else {
            return;
        };
        let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
            return;
        };

        let (name, aliases) = font_names(&face, path);
        let metrics = FontMetrics::from_face(&face);
        self.push_font(name, aliases, data, metrics);
    }

    pub(crate) fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, HalftoneError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
            return Err(HalftoneError::Asset(format!(
                "invalid font data for {source}"
            )));
        };

        let (name, aliases) = font_names(&face, Path::new(source));
        let metrics = FontMetrics::from_face(&face);
        self.push_font(name.clone(), aliases, data, metrics);
        Ok(name)
    }

    fn push_font(&mut self, name: String, aliases: Vec<String>, data: Vec<u8>, metrics: FontMetrics) {
        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data,
            metrics,
        });

        let mut all_aliases = Vec::new();
        all_aliases.push(name);
        all_aliases.extend(aliases);
        for alias in all_aliases {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
    }

    /// Primary names of every registered font, in registration order.
    pub(crate) fn registered_names(&self) -> impl Iterator<Item = &str> {
        self.fonts.iter().map(|font| font.name.as_str())
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<&RegisteredFont> {
        let key = normalize_name(name);
        self.lookup
            .get(&key)
            .and_then(|index| self.fonts.get(*index))
    }

    /// Font bytes to rasterize with: the named registered font, any
    /// registered font, or a system fallback.
    pub(crate) fn render_data(&self, name: Option<&str>) -> Option<Arc<Vec<u8>>> {
        if let Some(name) = name {
            if let Some(font) = self.resolve(name) {
                return Some(Arc::new(font.data.clone()));
            }
        }
        if let Some(font) = self.fonts.first() {
            return Some(Arc::new(font.data.clone()));
        }
        fallback_font_bytes()
    }

    pub(crate) fn measure_text_width(&self, name: Option<&str>, font_size: Px, text: &str) -> Px {
        let index = name
            .and_then(|name| self.lookup.get(&normalize_name(name)).copied())
            .or_else(|| if self.fonts.is_empty() { None } else { Some(0) });
        let Some(index) = index else {
            return approx_text_width(font_size, text);
        };
        let cache_key = TextWidthKey {
            font_index: index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(mut cache) = self.text_width_cache.lock() {
            if let Some(value) = cache.get(&cache_key) {
                return value;
            }
        }
        let Some(font) = self.fonts.get(index) else {
            return approx_text_width(font_size, text);
        };
        let value = if font.metrics.is_within_latin_range(text) {
            font.metrics.measure_text_width(font_size, text)
        } else {
            measure_text_width_shaped(font, font_size, text)
                .unwrap_or_else(|| font.metrics.measure_text_width(font_size, text))
        };
        if let Ok(mut cache) = self.text_width_cache.lock() {
            cache.insert(cache_key, value);
        }
        value
    }

    pub(crate) fn line_height(&self, name: Option<&str>, font_size: Px, fallback: Px) -> Px {
        let font = name
            .and_then(|name| self.resolve(name))
            .or_else(|| self.fonts.first());
        let Some(font) = font else {
            return fallback;
        };
        font.metrics.line_height(font_size).max(fallback)
    }
}

/// Unresolved-font approximation: 0.6 em per character, never below 1 px.
fn approx_text_width(font_size: Px, text: &str) -> Px {
    let char_width = (font_size * 0.6).max(Px::from_f32(1.0));
    char_width * (text.chars().count() as i32)
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let first_char = 32u8;
        let last_char = 255u8;
        let widths = build_widths(face, scale, first_char, last_char);
        let missing_width = widths
            .get((b' ' - first_char) as usize)
            .copied()
            .unwrap_or(0);

        Self {
            first_char,
            last_char,
            widths,
            ascent: scale_i16(face.ascender(), scale),
            descent: scale_i16(face.descender(), scale),
            line_gap: scale_i16(face.line_gap(), scale),
            missing_width,
        }
    }

    fn advance_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        let first = self.first_char as u32;
        let last = self.last_char as u32;
        if code < first || code > last {
            return self.missing_width;
        }
        let idx = (code - first) as usize;
        self.widths.get(idx).copied().unwrap_or(self.missing_width)
    }

    fn measure_text_width(&self, font_size: Px, text: &str) -> Px {
        let mut total_units: i32 = 0;
        for ch in text.chars() {
            total_units = total_units.saturating_add(self.advance_for_char(ch) as i32);
        }
        if total_units <= 0 {
            return Px::ZERO;
        }
        font_size.mul_ratio(total_units, 1000)
    }

    fn is_within_latin_range(&self, text: &str) -> bool {
        let first = self.first_char as u32;
        let last = self.last_char as u32;
        text.chars().all(|ch| {
            let code = ch as u32;
            code >= first && code <= last
        })
    }

    fn line_height(&self, font_size: Px) -> Px {
        let height_1000 = self.ascent as i32 - self.descent as i32 + self.line_gap as i32;
        if height_1000 <= 0 {
            return Px::ZERO;
        }
        font_size.mul_ratio(height_1000, 1000)
    }
}

fn build_widths(face: &ttf_parser::Face<'_>, scale: f32, first: u8, last: u8) -> Vec<u16> {
    let mut widths = Vec::with_capacity((last - first + 1) as usize);
    for code in first..=last {
        let width = char::from_u32(code as u32)
            .and_then(|ch| face.glyph_index(ch))
            .and_then(|id| face.glyph_hor_advance(id))
            .unwrap_or(0);
        let scaled = (width as f32 * scale).round() as i32;
        widths.push(scaled.clamp(0, u16::MAX as i32) as u16);
    }
    widths
}

fn measure_text_width_shaped(font: &RegisteredFont, font_size: Px, text: &str) -> Option<Px> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let units_per_em = face.units_per_em().max(1) as i64;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let mut total_units: i32 = 0;
    for pos in positions {
        let adv = (((pos.x_advance as i64) * 1000 + (units_per_em / 2)) / units_per_em) as i32;
        total_units = total_units.saturating_add(adv);
    }
    if total_units <= 0 {
        return Some(Px::ZERO);
    }
    Some(font_size.mul_ratio(total_units, 1000))
}

pub(crate) fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF
                | 0xFB1D..=0xFDFF
                | 0xFE70..=0xFEFF
                | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;

    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    let primary = post
        .clone()
        .or_else(|| full.clone())
        .or_else(|| family.clone())
        .or_else(|| stem.clone())
        .unwrap_or_else(|| "EmbeddedFont".to_string());

    let mut aliases = Vec::new();
    for candidate in [family, full, post, stem].into_iter().flatten() {
        if candidate != primary {
            aliases.push(candidate);
        }
    }

    (primary, aliases)
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

static FALLBACK_FONT_CACHE: OnceLock<Option<Arc<Vec<u8>>>> = OnceLock::new();

/// System font used when nothing is registered. Comic lettering wants a round
/// sans face; the candidates cover the stock Linux/macOS/Windows installs.
pub(crate) fn fallback_font_bytes() -> Option<Arc<Vec<u8>>> {
    FALLBACK_FONT_CACHE
        .get_or_init(|| {
            for dir in system_font_dirs() {
                for candidate in FALLBACK_FONT_FILES {
                    let path = dir.join(candidate);
                    if let Ok(data) = fs::read(&path) {
                        if ttf_parser::Face::parse(&data, 0).is_ok() {
                            return Some(Arc::new(data));
                        }
                    }
                }
            }
            None
        })
        .clone()
}

const FALLBACK_FONT_FILES: &[&str] = &[
    "Comic Sans MS.ttf",
    "comic.ttf",
    "DejaVuSans-Bold.ttf",
    "DejaVuSans.ttf",
    "LiberationSans-Bold.ttf",
    "LiberationSans-Regular.ttf",
    "Arial Bold.ttf",
    "Arial.ttf",
    "arialbd.ttf",
    "arial.ttf",
];

fn system_font_dirs() -> Vec<std::path::PathBuf> {
    let mut dirs = Vec::new();
    #[cfg(target_os = "windows")]
    {
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(std::path::PathBuf::from(windir).join("Fonts"));
        }
        dirs.push(std::path::PathBuf::from("C:\\Windows\\Fonts"));
    }
    #[cfg(target_os = "macos")]
    {
        dirs.push(std::path::PathBuf::from("/System/Library/Fonts"));
        dirs.push(std::path::PathBuf::from("/System/Library/Fonts/Supplemental"));
        dirs.push(std::path::PathBuf::from("/Library/Fonts"));
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        dirs.push(std::path::PathBuf::from(
            "/usr/share/fonts/truetype/msttcorefonts",
        ));
        dirs.push(std::path::PathBuf::from("/usr/share/fonts/truetype/dejavu"));
        dirs.push(std::path::PathBuf::from(
            "/usr/share/fonts/truetype/liberation",
        ));
        dirs.push(std::path::PathBuf::from("/usr/share/fonts/TTF"));
        dirs.push(std::path::PathBuf::from("/usr/share/fonts"));
    }
    dirs
}
