use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{Error, Result};

/// RGB color representation, compatible with smart-leds RGB8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "ColorSpec")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` (the leading `#` is optional).
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Reduce every channel by `percent` of its value.
    pub fn dimmed(self, percent: u8) -> Self {
        let keep = 100u16.saturating_sub(percent.min(100) as u16);
        let dim = |c: u8| ((c as u16 * keep) / 100) as u8;
        Self::new(dim(self.r), dim(self.g), dim(self.b))
    }

    fn swap_red_green(self) -> Self {
        Self::new(self.g, self.r, self.b)
    }
}

/// Config representation of a color: `[r, g, b]` or `"#rrggbb"`.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
    Rgb([u8; 3]),
    Hex(String),
}

impl TryFrom<ColorSpec> for Color {
    type Error = String;

    fn try_from(spec: ColorSpec) -> std::result::Result<Self, Self::Error> {
        match spec {
            ColorSpec::Rgb([r, g, b]) => Ok(Color::new(r, g, b)),
            ColorSpec::Hex(s) => Color::from_hex(&s).ok_or_else(|| format!("invalid color {s:?}")),
        }
    }
}

/// Two-tone overlay used by precipitation and obscuration effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ColorPair(pub Color, pub Color);

pub const COLOR_BLACK: Color = Color::new(0, 0, 0);

// Flight category colors
pub const COLOR_VFR: Color = Color::new(0, 255, 0);
pub const COLOR_MVFR: Color = Color::new(0, 0, 255);
pub const COLOR_IFR: Color = Color::new(255, 0, 0);
pub const COLOR_LIFR: Color = Color::new(255, 0, 255);
pub const COLOR_NO_WEATHER: Color = Color::new(255, 255, 255);
pub const COLOR_LIGHTNING: Color = Color::new(255, 255, 255);
pub const COLOR_HOME: Color = Color::new(255, 255, 255);

// Reference phenomenon colors, also shown on legend slots
pub const PAIR_SNOW: ColorPair = ColorPair(Color::new(255, 255, 255), Color::new(100, 100, 100));
pub const PAIR_RAIN: ColorPair = ColorPair(Color::new(4, 0, 255), Color::new(0, 128, 255));
pub const PAIR_FREEZING_RAIN: ColorPair =
    ColorPair(Color::new(0, 150, 150), Color::new(255, 0, 128));
pub const PAIR_DUST: ColorPair = ColorPair(Color::new(173, 170, 3), Color::new(255, 180, 30));
pub const PAIR_FOG: ColorPair = ColorPair(Color::new(128, 128, 128), Color::new(60, 60, 60));

/// Channel order of the physical strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    #[default]
    Rgb,
    Grb,
}

impl ColorOrder {
    fn other(self) -> Self {
        match self {
            Self::Rgb => Self::Grb,
            Self::Grb => Self::Rgb,
        }
    }
}

/// Strip-wide channel order with per-index exceptions for mixed strips.
#[derive(Debug, Clone, Default)]
pub struct OrderCorrection {
    order: ColorOrder,
    overrides: HashSet<usize>,
}

impl OrderCorrection {
    pub fn new(order: ColorOrder, overrides: impl IntoIterator<Item = usize>) -> Self {
        Self {
            order,
            overrides: overrides.into_iter().collect(),
        }
    }

    pub fn order_for(&self, index: usize) -> ColorOrder {
        if self.overrides.contains(&index) {
            self.order.other()
        } else {
            self.order
        }
    }

    pub fn apply(&self, index: usize, color: Color) -> Color {
        match self.order_for(index) {
            ColorOrder::Rgb => color,
            ColorOrder::Grb => color.swap_red_green(),
        }
    }
}

/// Legend and placeholder codes that occupy a LED without being airports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialCode {
    Null,
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
    WindyVfr,
    Lightning,
    Snow,
    Rain,
    FreezingRain,
    Dust,
    Fog,
}

impl SpecialCode {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "NULL" => Some(Self::Null),
            "VFR" => Some(Self::Vfr),
            "MVFR" => Some(Self::Mvfr),
            "IFR" => Some(Self::Ifr),
            "LIFR" => Some(Self::Lifr),
            "WVFR" => Some(Self::WindyVfr),
            "LTNG" => Some(Self::Lightning),
            "SNOW" => Some(Self::Snow),
            "RAIN" => Some(Self::Rain),
            "FZRA" => Some(Self::FreezingRain),
            "DUST" => Some(Self::Dust),
            "FOG" => Some(Self::Fog),
            _ => None,
        }
    }

    /// Static demonstration color for this legend code on a sub-cycle.
    pub fn legend_color(self, cycle: usize) -> Color {
        let overlay = |pair: ColorPair| match cycle {
            3 | 5 => pair.0,
            4 => pair.1,
            _ => COLOR_VFR,
        };
        match self {
            Self::Null => COLOR_BLACK,
            Self::Vfr => COLOR_VFR,
            Self::Mvfr => COLOR_MVFR,
            Self::Ifr => COLOR_IFR,
            Self::Lifr => COLOR_LIFR,
            Self::WindyVfr if (3..=5).contains(&cycle) => COLOR_BLACK,
            Self::WindyVfr => COLOR_VFR,
            Self::Lightning if cycle == 2 || cycle == 4 => COLOR_LIGHTNING,
            Self::Lightning => COLOR_VFR,
            Self::Snow => overlay(PAIR_SNOW),
            Self::Rain => overlay(PAIR_RAIN),
            Self::FreezingRain => overlay(PAIR_FREEZING_RAIN),
            Self::Dust => overlay(PAIR_DUST),
            Self::Fog => overlay(PAIR_FOG),
        }
    }
}

/// One full strip of colors, indexed by LED position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFrame {
    leds: Vec<Color>,
}

impl RenderFrame {
    pub fn new(num_leds: usize) -> Self {
        Self {
            leds: vec![COLOR_BLACK; num_leds],
        }
    }

    pub fn num_leds(&self) -> usize {
        self.leds.len()
    }

    pub fn set(&mut self, index: usize, color: Color) -> Result<()> {
        if index >= self.leds.len() {
            return Err(Error::LedIndexOutOfBounds {
                index,
                num_leds: self.leds.len(),
            });
        }
        self.leds[index] = color;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<Color> {
        self.leds.get(index).copied().ok_or(Error::LedIndexOutOfBounds {
            index,
            num_leds: self.leds.len(),
        })
    }

    pub fn pixels(&self) -> &[Color] {
        &self.leds
    }
}
