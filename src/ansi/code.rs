//! SGR codes and the visual attributes they resolve to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the eight base terminal colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl BaseColor {
    const ALL: [Self; 8] = [
        Self::Black,
        Self::Red,
        Self::Green,
        Self::Yellow,
        Self::Blue,
        Self::Magenta,
        Self::Cyan,
        Self::White,
    ];

    fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    fn index(self) -> u8 {
        match self {
            Self::Black => 0,
            Self::Red => 1,
            Self::Green => 2,
            Self::Yellow => 3,
            Self::Blue => 4,
            Self::Magenta => 5,
            Self::Cyan => 6,
            Self::White => 7,
        }
    }

    /// Resolve to a concrete color, using the light palette when `bright`.
    #[must_use]
    pub fn color(self, bright: bool) -> Color {
        let saturation = if bright { 0.4 } else { 1.0 };
        match self {
            Self::Black if bright => Color::new(0.0, 0.0, 0.337),
            Self::Black => Color::new(0.0, 0.0, 0.0),
            Self::White => Color::new(0.0, 0.0, 1.0),
            Self::Red => Color::new(1.0, saturation, 1.0),
            Self::Yellow => Color::new(1.0 / 6.0, saturation, 1.0),
            Self::Green => Color::new(2.0 / 6.0, saturation, 1.0),
            Self::Cyan => Color::new(3.0 / 6.0, saturation, 1.0),
            Self::Blue => Color::new(4.0 / 6.0, saturation, 1.0),
            Self::Magenta => Color::new(5.0 / 6.0, saturation, 1.0),
        }
    }
}

/// A recognized SGR parameter.
///
/// Serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StyleCode {
    /// `0`
    AllReset,
    /// `1`
    Bold,
    /// `2`
    Faint,
    /// `3`
    Italic,
    /// `4`
    SingleUnderline,
    /// `21`
    DoubleUnderline,
    /// `22`
    NormalIntensity,
    /// `24`
    UnderlineOff,
    /// `30`-`37`
    Foreground(BaseColor),
    /// `39`
    ForegroundReset,
    /// `40`-`47`
    Background(BaseColor),
    /// `49`
    BackgroundReset,
    /// `90`-`97`
    BrightForeground(BaseColor),
    /// `100`-`107`
    BrightBackground(BaseColor),
}

impl StyleCode {
    /// Look up a numeric SGR parameter.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        let code = u8::try_from(code).ok()?;
        let color = |base: u8| BaseColor::from_index(code - base);
        Some(match code {
            0 => Self::AllReset,
            1 => Self::Bold,
            2 => Self::Faint,
            3 => Self::Italic,
            4 => Self::SingleUnderline,
            21 => Self::DoubleUnderline,
            22 => Self::NormalIntensity,
            24 => Self::UnderlineOff,
            30..=37 => Self::Foreground(color(30)?),
            39 => Self::ForegroundReset,
            40..=47 => Self::Background(color(40)?),
            49 => Self::BackgroundReset,
            90..=97 => Self::BrightForeground(color(90)?),
            100..=107 => Self::BrightBackground(color(100)?),
            _ => return None,
        })
    }

    /// Numeric SGR parameter.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::AllReset => 0,
            Self::Bold => 1,
            Self::Faint => 2,
            Self::Italic => 3,
            Self::SingleUnderline => 4,
            Self::DoubleUnderline => 21,
            Self::NormalIntensity => 22,
            Self::UnderlineOff => 24,
            Self::Foreground(c) => 30 + c.index(),
            Self::ForegroundReset => 39,
            Self::Background(c) => 40 + c.index(),
            Self::BackgroundReset => 49,
            Self::BrightForeground(c) => 90 + c.index(),
            Self::BrightBackground(c) => 100 + c.index(),
        }
    }

    #[must_use]
    pub fn is_reset(self) -> bool {
        matches!(
            self,
            Self::AllReset
                | Self::NormalIntensity
                | Self::UnderlineOff
                | Self::ForegroundReset
                | Self::BackgroundReset
        )
    }

    #[must_use]
    pub fn is_intensity(self) -> bool {
        matches!(self, Self::Bold | Self::Faint | Self::NormalIntensity)
    }

    #[must_use]
    pub fn is_underline(self) -> bool {
        matches!(
            self,
            Self::SingleUnderline | Self::DoubleUnderline | Self::UnderlineOff
        )
    }

    #[must_use]
    pub fn is_italic(self) -> bool {
        self == Self::Italic
    }

    #[must_use]
    pub fn is_fg_color(self) -> bool {
        matches!(self, Self::Foreground(_) | Self::BrightForeground(_))
    }

    #[must_use]
    pub fn is_bg_color(self) -> bool {
        matches!(self, Self::Background(_) | Self::BrightBackground(_))
    }

    #[must_use]
    pub fn is_color(self) -> bool {
        self.is_fg_color() || self.is_bg_color()
    }

    #[must_use]
    pub fn is_bright_color(self) -> bool {
        matches!(self, Self::BrightForeground(_) | Self::BrightBackground(_))
    }

    /// Whether this code, appearing later, closes a range opened by `start`.
    ///
    /// Reset codes never open a range, so nothing ends them.
    #[must_use]
    pub fn ends_range(self, start: Self) -> bool {
        if start.is_reset() {
            return false;
        }
        if self == Self::AllReset {
            return true;
        }
        if start.is_fg_color() {
            return self.is_fg_color() || self == Self::ForegroundReset;
        }
        if start.is_bg_color() {
            return self.is_bg_color() || self == Self::BackgroundReset;
        }
        if start.is_underline() {
            return self.is_underline();
        }
        if start.is_intensity() {
            return self.is_intensity();
        }
        false
    }

    /// Visual attribute applied by this code. Reset codes have none.
    #[must_use]
    pub fn attribute(self) -> Option<Attribute> {
        Some(match self {
            Self::Bold => Attribute::Weight(Weight::Bold),
            Self::Faint => Attribute::Weight(Weight::Light),
            Self::Italic => Attribute::Italic,
            Self::SingleUnderline => Attribute::Underline(Underline::Single),
            Self::DoubleUnderline => Attribute::Underline(Underline::Double),
            Self::Foreground(c) => Attribute::Foreground(c.color(false)),
            Self::BrightForeground(c) => Attribute::Foreground(c.color(true)),
            Self::Background(c) => Attribute::Background(c.color(false)),
            Self::BrightBackground(c) => Attribute::Background(c.color(true)),
            Self::AllReset
            | Self::NormalIntensity
            | Self::UnderlineOff
            | Self::ForegroundReset
            | Self::BackgroundReset => return None,
        })
    }
}

impl From<StyleCode> for u8 {
    fn from(code: StyleCode) -> Self {
        code.code()
    }
}

impl TryFrom<u8> for StyleCode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(u16::from(code)).ok_or_else(|| format!("unsupported SGR code: {code}"))
    }
}

impl fmt::Display for StyleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Color in hue/saturation/brightness form, each component in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub hue: f64,
    pub saturation: f64,
    pub brightness: f64,
}

impl Color {
    #[must_use]
    pub const fn new(hue: f64, saturation: f64, brightness: f64) -> Self {
        Self {
            hue,
            saturation,
            brightness,
        }
    }

    /// Convert to 8-bit RGB.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_rgb(self) -> (u8, u8, u8) {
        let v = self.brightness.clamp(0.0, 1.0);
        let s = self.saturation.clamp(0.0, 1.0);
        let h = (self.hue.rem_euclid(1.0)) * 6.0;
        let sector = h.floor();
        let f = h - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        let (r, g, b) = match sector as u8 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };
        let byte = |x: f64| (x * 255.0).round() as u8;
        (byte(r), byte(g), byte(b))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    Bold,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Underline {
    Single,
    Double,
}

/// Resolved visual attribute of a style range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Attribute {
    Foreground(Color),
    Background(Color),
    Weight(Weight),
    Italic,
    Underline(Underline),
}
