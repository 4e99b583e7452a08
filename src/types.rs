use fixed::types::I32F32;

/// Fixed-point pixel measure used for text metrics. Repeated measurement of
/// the same string at the same size must produce bit-identical results, so
/// all layout arithmetic runs on milli-pixel integers rather than floats.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Px(I32F32);

impl Px {
    pub const ZERO: Px = Px(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Px {
        if !value.is_finite() {
            return Px::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Px::from_milli_i64(milli)
    }

    pub fn from_u32(value: u32) -> Px {
        Px::from_milli_i64((value as i64) * 1000)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn max(self, other: Px) -> Px {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Px) -> Px {
        if self <= other { self } else { other }
    }

    pub fn mul_ratio(self, num: i32, denom: i32) -> Px {
        if denom == 0 {
            return Px::ZERO;
        }
        let milli = self.to_milli_i64() as i128;
        let value = div_round_i128(milli.saturating_mul(num as i128), denom as i128);
        Px::from_milli_i128(value)
    }

    pub fn from_milli_i64(milli: i64) -> Px {
        Px::from_milli_i128(milli as i128)
    }

    fn from_milli_i128(milli: i128) -> Px {
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Px(I32F32::from_bits(bits))
    }
}

impl std::ops::Add for Px {
    type Output = Px;
    fn add(self, rhs: Px) -> Px {
        Px::from_milli_i128(self.to_milli_i64() as i128 + rhs.to_milli_i64() as i128)
    }
}

impl std::ops::AddAssign for Px {
    fn add_assign(&mut self, rhs: Px) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Px {
    type Output = Px;
    fn sub(self, rhs: Px) -> Px {
        Px::from_milli_i128(self.to_milli_i64() as i128 - rhs.to_milli_i64() as i128)
    }
}

impl std::ops::Mul<i32> for Px {
    type Output = Px;
    fn mul(self, rhs: i32) -> Px {
        let milli = self.to_milli_i64() as i128;
        Px::from_milli_i128(milli.saturating_mul(rhs as i128))
    }
}

impl std::ops::Mul<f32> for Px {
    type Output = Px;
    fn mul(self, rhs: f32) -> Px {
        if !rhs.is_finite() {
            return Px::ZERO;
        }
        Px::from_f32(self.to_f32() * rhs)
    }
}

impl std::ops::Div<i32> for Px {
    type Output = Px;
    fn div(self, rhs: i32) -> Px {
        if rhs == 0 {
            Px::ZERO
        } else {
            let milli = self.to_milli_i64() as i128;
            Px::from_milli_i128(div_round_i128(milli, rhs as i128))
        }
    }
}

fn div_round_i128(num: i128, den: i128) -> i128 {
    if den == 0 {
        return 0;
    }
    let den_abs = den.abs();
    if num >= 0 {
        (num + (den_abs / 2)) / den
    } else {
        -(((-num) + (den_abs / 2)) / den)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }
}

/// Fixed comic palette. Ink and accents match the surrounding UI styling;
/// changing one side without the other breaks the visual contract.
pub(crate) mod palette {
    use super::Color;

    pub const INK: Color = Color {
        r: 17.0 / 255.0,
        g: 17.0 / 255.0,
        b: 17.0 / 255.0,
    };
    pub const SPEECH_ACCENT: Color = Color {
        r: 220.0 / 255.0,
        g: 38.0 / 255.0,
        b: 38.0 / 255.0,
    };
    pub const THOUGHT_ACCENT: Color = Color {
        r: 6.0 / 255.0,
        g: 182.0 / 255.0,
        b: 212.0 / 255.0,
    };
    pub const SFX_OUTLINE: Color = Color {
        r: 251.0 / 255.0,
        g: 191.0 / 255.0,
        b: 36.0 / 255.0,
    };
    pub const BUBBLE_FILL: Color = Color::WHITE;
    pub const NARRATION_FILL: Color = Color {
        r: 254.0 / 255.0,
        g: 243.0 / 255.0,
        b: 199.0 / 255.0,
    };
    pub const PAPER: Color = Color {
        r: 245.0 / 255.0,
        g: 240.0 / 255.0,
        b: 230.0 / 255.0,
    };
}

/// The four narrative element kinds a panel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Speech,
    Thought,
    Narration,
    Sfx,
}

impl ElementKind {
    /// Whether this kind is paired against a detected region. SFX always
    /// draws directly over the artwork.
    pub fn consumes_region(self) -> bool {
        !matches!(self, ElementKind::Sfx)
    }
}

/// Nine-point compass placement hint for programmatic bubbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl Anchor {
    /// Parses free-form hints like "top-left", "bottom", "middle right".
    /// Anything unrecognized lands on `Center` rather than failing.
    pub fn from_hint(hint: &str) -> Anchor {
        let hint = hint.to_ascii_lowercase();
        let vertical = if hint.contains("top") {
            -1
        } else if hint.contains("bottom") {
            1
        } else {
            0
        };
        let horizontal = if hint.contains("left") {
            -1
        } else if hint.contains("right") {
            1
        } else {
            0
        };
        match (vertical, horizontal) {
            (-1, -1) => Anchor::TopLeft,
            (-1, 0) => Anchor::Top,
            (-1, 1) => Anchor::TopRight,
            (0, -1) => Anchor::Left,
            (0, 1) => Anchor::Right,
            (1, -1) => Anchor::BottomLeft,
            (1, 0) => Anchor::Bottom,
            (1, 1) => Anchor::BottomRight,
            _ => Anchor::Center,
        }
    }

    pub(crate) fn is_top(self) -> bool {
        matches!(self, Anchor::TopLeft | Anchor::Top | Anchor::TopRight)
    }

    pub(crate) fn is_bottom(self) -> bool {
        matches!(
            self,
            Anchor::BottomLeft | Anchor::Bottom | Anchor::BottomRight
        )
    }

    pub(crate) fn is_left(self) -> bool {
        matches!(self, Anchor::TopLeft | Anchor::Left | Anchor::BottomLeft)
    }

    pub(crate) fn is_right(self) -> bool {
        matches!(self, Anchor::TopRight | Anchor::Right | Anchor::BottomRight)
    }
}

/// One narrative element supplied by the story collaborator. For the
/// user-input element, `text` holds the placeholder; the resolved text lives
/// on the owning [`Panel`].
#[derive(Debug, Clone)]
pub struct Element {
    pub kind: ElementKind,
    pub character_name: Option<String>,
    pub position: Anchor,
    pub is_user_input: bool,
    pub text: String,
}

impl Element {
    pub fn new(kind: ElementKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            character_name: None,
            position: Anchor::Center,
            is_user_input: false,
            text: text.into(),
        }
    }

    pub fn with_character(mut self, name: impl Into<String>) -> Self {
        self.character_name = Some(name.into());
        self
    }

    pub fn with_position(mut self, position: Anchor) -> Self {
        self.position = position;
        self
    }

    pub fn user_input(mut self) -> Self {
        self.is_user_input = true;
        self
    }

    /// The text that should actually be rendered for this element, given the
    /// panel's resolved user input. `None` means nothing to draw.
    pub(crate) fn resolved_text<'a>(&'a self, user_text: Option<&'a str>) -> Option<&'a str> {
        let text = if self.is_user_input {
            user_text?
        } else {
            self.text.as_str()
        };
        let text = text.trim();
        if text.is_empty() { None } else { Some(text) }
    }
}

/// One generated scene: encoded image bytes plus its ordered elements.
/// `regions` caches a previous detection pass so compositing can replay it
/// instead of re-running detection on the same bytes.
#[derive(Debug, Clone, Default)]
pub struct Panel {
    pub image: Option<Vec<u8>>,
    pub elements: Vec<Element>,
    pub regions: Option<Vec<crate::detect::Region>>,
    pub user_text: Option<String>,
}

impl Panel {
    pub fn new(image: Option<Vec<u8>>, elements: Vec<Element>) -> Self {
        Self {
            image,
            elements,
            regions: None,
            user_text: None,
        }
    }

    pub fn with_regions(mut self, regions: Vec<crate::detect::Region>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn with_user_text(mut self, text: impl Into<String>) -> Self {
        self.user_text = Some(text.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_round_trips_milli_units() {
        let v = Px::from_f32(12.345);
        assert_eq!(v.to_milli_i64(), 12_345);
        assert_eq!(Px::from_u32(46).to_milli_i64(), 46_000);
    }

    #[test]
    fn px_mul_ratio_rounds_half_away_from_zero() {
        let v = Px::from_milli_i64(1000);
        assert_eq!(v.mul_ratio(1, 3).to_milli_i64(), 333);
        assert_eq!(v.mul_ratio(1, 2).to_milli_i64(), 500);
        assert_eq!(v.mul_ratio(-1, 2).to_milli_i64(), -500);
    }

    #[test]
    fn anchor_hint_parsing_covers_compass_and_fallback() {
        assert_eq!(Anchor::from_hint("top-left"), Anchor::TopLeft);
        assert_eq!(Anchor::from_hint("Top Right"), Anchor::TopRight);
        assert_eq!(Anchor::from_hint("bottom"), Anchor::Bottom);
        assert_eq!(Anchor::from_hint("middle left"), Anchor::Left);
        assert_eq!(Anchor::from_hint("center"), Anchor::Center);
        assert_eq!(Anchor::from_hint("somewhere odd"), Anchor::Center);
    }

    #[test]
    fn user_input_element_resolves_from_panel_text() {
        let el = Element::new(ElementKind::Speech, "say something...").user_input();
        assert_eq!(el.resolved_text(Some("Hi!")), Some("Hi!"));
        assert_eq!(el.resolved_text(None), None);

        let fixed = Element::new(ElementKind::Narration, "  Meanwhile...  ");
        assert_eq!(fixed.resolved_text(None), Some("Meanwhile..."));
        let blank = Element::new(ElementKind::Speech, "   ");
        assert_eq!(blank.resolved_text(None), None);
    }
}
