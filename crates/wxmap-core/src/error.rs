use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("LED index {index} out of bounds (num_leds: {num_leds})")]
    LedIndexOutOfBounds { index: usize, num_leds: usize },

    #[error("cannot decode report for {icao}: {reason}")]
    Parse { icao: String, reason: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("hardware bus error: {0}")]
    Bus(String),

    #[error("weather fetch failed: {0}")]
    Fetch(String),

    #[error("airport {icao} already bound to LED {led}")]
    DuplicateAirport { icao: String, led: usize },
}

impl Error {
    pub(crate) fn parse(icao: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            icao: icao.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
