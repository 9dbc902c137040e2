use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use log::info;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;

pub const MAX_TAF_OFFSET_H: u8 = 11;
pub const MAX_MOS_OFFSET_H: u8 = 23;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("unknown mode {0:?}")]
    Unknown(String),
    #[error("expected +N offset, got {0:?}")]
    MissingSign(String),
    #[error("bad offset {0:?}")]
    BadOffset(String),
    #[error("offset {offset}h exceeds {max}h")]
    OffsetTooLarge { offset: u8, max: u8 },
}

/// Visual-only patterns that ignore weather data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationKind {
    Rainbow,
    Shuffle,
    Morse,
    RabbitChase,
    RadarSweep,
    Wipe,
}

/// What the map is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Mode {
    #[default]
    Metar,
    Taf {
        offset_h: u8,
    },
    Mos {
        offset_h: u8,
    },
    Off,
    Test,
    Animation(AnimationKind),
}

impl Mode {
    /// Whether this mode renders weather and therefore needs fresh data.
    pub fn uses_weather(self) -> bool {
        matches!(self, Self::Metar | Self::Taf { .. } | Self::Mos { .. })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metar => f.write_str("metar"),
            Self::Taf { offset_h } => write!(f, "taf+{offset_h}"),
            Self::Mos { offset_h } => write!(f, "mos+{offset_h}"),
            Self::Off => f.write_str("off"),
            Self::Test => f.write_str("test"),
            Self::Animation(kind) => f.write_str(match kind {
                AnimationKind::Rainbow => "rainbow",
                AnimationKind::Shuffle => "shuffle",
                AnimationKind::Morse => "morse",
                AnimationKind::RabbitChase => "rabbit",
                AnimationKind::RadarSweep => "radar",
                AnimationKind::Wipe => "wipe",
            }),
        }
    }
}

fn parse_offset(s: &str, max: u8) -> Result<u8, ModeError> {
    let offset = match s {
        "" => 0,
        _ => s
            .strip_prefix('+')
            .ok_or_else(|| ModeError::MissingSign(s.to_string()))?
            .parse::<u8>()
            .map_err(|_| ModeError::BadOffset(s.to_string()))?,
    };
    if offset > max {
        return Err(ModeError::OffsetTooLarge { offset, max });
    }
    Ok(offset)
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if let Some(rest) = s.strip_prefix("taf") {
            return Ok(Self::Taf {
                offset_h: parse_offset(rest, MAX_TAF_OFFSET_H)?,
            });
        }
        if let Some(rest) = s.strip_prefix("mos") {
            return Ok(Self::Mos {
                offset_h: parse_offset(rest, MAX_MOS_OFFSET_H)?,
            });
        }
        let kind = match s.as_str() {
            "metar" => return Ok(Self::Metar),
            "off" => return Ok(Self::Off),
            "test" => return Ok(Self::Test),
            "rainbow" => AnimationKind::Rainbow,
            "shuffle" => AnimationKind::Shuffle,
            "morse" => AnimationKind::Morse,
            "rabbit" | "rabbit-chase" => AnimationKind::RabbitChase,
            "radar" | "radar-sweep" => AnimationKind::RadarSweep,
            "wipe" => AnimationKind::Wipe,
            _ => return Err(ModeError::Unknown(s.to_string())),
        };
        Ok(Self::Animation(kind))
    }
}

impl TryFrom<String> for Mode {
    type Error = ModeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Shared control surface between input threads and the refresh loop.
///
/// Inputs (buttons, rotary switch, light sensor) write here; the refresh
/// loop polls. Every mode change bumps a generation counter so the loop can
/// notice a change even if the mode was switched away and back.
#[derive(Debug)]
pub struct Controls {
    mode: Mutex<Mode>,
    generation: AtomicU64,
    refresh: AtomicBool,
    wake: AtomicBool,
    brightness: AtomicU8,
    shutdown: AtomicBool,
}

impl Controls {
    pub fn new(mode: Mode, brightness: u8) -> Self {
        Self {
            mode: Mutex::new(mode),
            generation: AtomicU64::new(0),
            refresh: AtomicBool::new(false),
            wake: AtomicBool::new(false),
            brightness: AtomicU8::new(brightness),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Returns true when the mode actually changed.
    pub fn set_mode(&self, mode: Mode) -> bool {
        let mut current = self.mode.lock();
        if *current == mode {
            return false;
        }
        info!("Mode change: {} -> {}", *current, mode);
        *current = mode;
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn current_mode(&self) -> Mode {
        *self.mode.lock()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn request_refresh(&self) {
        self.refresh.store(true, Ordering::SeqCst);
    }

    pub fn take_refresh(&self) -> bool {
        self.refresh.swap(false, Ordering::SeqCst)
    }

    pub fn request_wake(&self) {
        self.wake.store(true, Ordering::SeqCst);
    }

    pub fn take_wake(&self) -> bool {
        self.wake.swap(false, Ordering::SeqCst)
    }

    pub fn set_brightness(&self, brightness: u8) {
        self.brightness.store(brightness, Ordering::Relaxed);
    }

    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
