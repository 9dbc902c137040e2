//! Flight-category decision table.
//!
//! Categories follow the FAA ceiling/visibility thresholds. A single bad
//! metric is enough to drag the category down, but VFR requires both
//! metrics to be good.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Ceiling value meaning "not reported / cannot be decoded".
pub const UNKNOWN_CEILING_FT: i32 = -1;

/// Visibility value meaning "not reported / cannot be decoded".
pub const UNKNOWN_VISIBILITY_MI: f64 = -1.0;

/// Ceiling used when the sky has no broken, overcast or obscured layer.
pub const UNLIMITED_CEILING_FT: i32 = 99_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
    #[default]
    Unknown,
}

impl FlightCategory {
    pub const ALL: [FlightCategory; 5] = [
        FlightCategory::Vfr,
        FlightCategory::Mvfr,
        FlightCategory::Ifr,
        FlightCategory::Lifr,
        FlightCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vfr => "VFR",
            Self::Mvfr => "MVFR",
            Self::Ifr => "IFR",
            Self::Lifr => "LIFR",
            Self::Unknown => "UNKNOWN",
        }
    }

    fn severity(self) -> Option<u8> {
        match self {
            Self::Vfr => Some(0),
            Self::Mvfr => Some(1),
            Self::Ifr => Some(2),
            Self::Lifr => Some(3),
            Self::Unknown => None,
        }
    }

    /// The more restrictive of two categories. `Unknown` never wins over a
    /// known category.
    pub fn worse(self, other: FlightCategory) -> FlightCategory {
        match (self.severity(), other.severity()) {
            (Some(a), Some(b)) if b > a => other,
            (Some(_), _) => self,
            (None, _) => other,
        }
    }

    /// Category implied by the ceiling alone.
    pub fn from_ceiling(ceiling_ft: i32) -> FlightCategory {
        match ceiling_ft {
            c if c < 0 => Self::Unknown,
            c if c < 500 => Self::Lifr,
            c if c < 1000 => Self::Ifr,
            c if c <= 3000 => Self::Mvfr,
            _ => Self::Vfr,
        }
    }

    /// Category implied by the visibility alone.
    pub fn from_visibility(visibility_mi: f64) -> FlightCategory {
        if visibility_mi.is_nan() || visibility_mi < 0.0 {
            Self::Unknown
        } else if visibility_mi < 1.0 {
            Self::Lifr
        } else if visibility_mi < 3.0 {
            Self::Ifr
        } else if visibility_mi <= 5.0 {
            Self::Mvfr
        } else {
            Self::Vfr
        }
    }
}

impl fmt::Display for FlightCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised flight category {0:?}")]
pub struct UnknownCategory(pub String);

impl FromStr for FlightCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VFR" => Ok(Self::Vfr),
            "MVFR" => Ok(Self::Mvfr),
            "IFR" => Ok(Self::Ifr),
            "LIFR" => Ok(Self::Lifr),
            "UNKNOWN" | "UNKN" => Ok(Self::Unknown),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

/// Derive the flight category from ceiling (ft AGL) and visibility (SM).
///
/// Rules are evaluated top to bottom and the first match wins. Negative
/// values mean the metric is unknown.
pub fn classify(ceiling_ft: i32, visibility_mi: f64) -> FlightCategory {
    let ceil = ceiling_ft;
    let vis = visibility_mi;

    if ceil < 0 || vis < 0.0 || vis.is_nan() {
        return FlightCategory::Unknown;
    }
    if vis < 1.0 || ceil < 500 {
        return FlightCategory::Lifr;
    }
    if (1.0..3.0).contains(&vis) || (500..1000).contains(&ceil) {
        return FlightCategory::Ifr;
    }
    if (3.0..=5.0).contains(&vis) || (1000..=3000).contains(&ceil) {
        return FlightCategory::Mvfr;
    }
    if vis > 5.0 && ceil > 3000 {
        return FlightCategory::Vfr;
    }
    FlightCategory::Unknown
}
