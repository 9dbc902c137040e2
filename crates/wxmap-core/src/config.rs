use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;

use crate::category::FlightCategory;
use crate::error::{Error, Result};
use crate::led::{self, Color, ColorOrder, ColorPair, OrderCorrection};
use crate::mode::Mode;
use crate::mos::DEFAULT_MOS_URL;
use crate::render::SUB_CYCLES;
use crate::schedule::SleepSchedule;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub colors: Colors,
    #[serde(default)]
    pub cycle: CycleTimings,
    #[serde(default)]
    pub home: HomeConfig,
    #[serde(default)]
    pub sleep: SleepConfig,
    #[serde(default)]
    pub mos: MosConfig,
    #[serde(default)]
    pub strip: StripConfig,
    #[serde(default)]
    pub light_sensor: LightSensorConfig,
    #[serde(default)]
    pub inputs: InputsConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
}

/// What to do when the same airport is bound to more than one LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Log it; only the first slot in file order receives updates.
    #[default]
    Warn,
    /// Refuse to start.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default = "default_update_interval")]
    pub update_interval_min: u64,
    #[serde(default = "default_data_expiry")]
    pub data_expiry_min: u64,
    #[serde(default = "default_wind_threshold")]
    pub wind_threshold_kt: u32,
    #[serde(default = "default_true")]
    pub do_winds: bool,
    #[serde(default)]
    pub blink_on_gusts: bool,
    #[serde(default = "default_true")]
    pub do_lightning: bool,
    #[serde(default = "default_true")]
    pub show_snow: bool,
    #[serde(default = "default_true")]
    pub show_rain: bool,
    #[serde(default = "default_true")]
    pub show_freezing_rain: bool,
    #[serde(default = "default_true")]
    pub show_dust: bool,
    #[serde(default = "default_true")]
    pub show_fog: bool,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Colors {
    #[serde(default = "default_vfr")]
    pub vfr: Color,
    #[serde(default = "default_mvfr")]
    pub mvfr: Color,
    #[serde(default = "default_ifr")]
    pub ifr: Color,
    #[serde(default = "default_lifr")]
    pub lifr: Color,
    #[serde(default = "default_no_weather")]
    pub no_weather: Color,
    #[serde(default = "default_lightning")]
    pub lightning: Color,
    #[serde(default = "default_snow")]
    pub snow: ColorPair,
    #[serde(default = "default_rain")]
    pub rain: ColorPair,
    #[serde(default = "default_freezing_rain")]
    pub freezing_rain: ColorPair,
    #[serde(default = "default_dust")]
    pub dust: ColorPair,
    #[serde(default = "default_fog")]
    pub fog: ColorPair,
    #[serde(default = "default_home")]
    pub home_marker: Color,
    /// Optional per-sub-cycle home marker colors; empty or six entries.
    #[serde(default)]
    pub home_sequence: Vec<Color>,
}

impl Colors {
    pub fn category(&self, category: FlightCategory) -> Color {
        match category {
            FlightCategory::Vfr => self.vfr,
            FlightCategory::Mvfr => self.mvfr,
            FlightCategory::Ifr => self.ifr,
            FlightCategory::Lifr => self.lifr,
            FlightCategory::Unknown => self.no_weather,
        }
    }
}

/// Wait after each of the six sub-cycles, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CycleTimings {
    #[serde(default = "default_waits")]
    pub waits_s: [f64; SUB_CYCLES],
}

impl CycleTimings {
    pub fn wait(&self, cycle: usize) -> Duration {
        Duration::from_secs_f64(self.waits_s[cycle % SUB_CYCLES])
    }

    pub fn total(&self) -> Duration {
        (0..SUB_CYCLES).map(|c| self.wait(c)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeportDisplay {
    /// Home marker on every other refresh tick, weather in between.
    #[default]
    Alternate,
    /// Home marker all the time.
    Solid,
    /// Weather like any other airport, just never dimmed.
    Weather,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub icao: Option<String>,
    #[serde(default)]
    pub display: HomeportDisplay,
    #[serde(default = "default_dim_percent")]
    pub dim_percent: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_off_at")]
    pub off_at: String,
    #[serde(default = "default_on_at")]
    pub on_at: String,
    #[serde(default = "default_wake_minutes")]
    pub wake_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MosConfig {
    #[serde(default = "default_mos_threshold")]
    pub threshold_percent: u8,
    #[serde(default = "default_mos_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripConfig {
    #[serde(default = "default_spi_device")]
    pub spi_device: String,
    #[serde(default)]
    pub color_order: ColorOrder,
    /// LED indices wired with the opposite channel order.
    #[serde(default)]
    pub order_overrides: Vec<usize>,
}

impl StripConfig {
    pub fn order_correction(&self) -> OrderCorrection {
        OrderCorrection::new(self.color_order, self.order_overrides.iter().copied())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightSensorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_i2c_device")]
    pub i2c_device: String,
    #[serde(default = "default_sensor_address")]
    pub address: u8,
    #[serde(default = "default_sensor_poll")]
    pub poll_secs: u64,
    #[serde(default = "default_min_brightness")]
    pub min_brightness: u8,
    #[serde(default = "default_max_brightness")]
    pub max_brightness: u8,
    /// Raw sensor count at which the strip reaches full brightness.
    #[serde(default = "default_full_scale")]
    pub full_scale: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotaryPosition {
    pub pin: u8,
    pub mode: Mode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub refresh_pin: Option<u8>,
    #[serde(default)]
    pub wake_pin: Option<u8>,
    #[serde(default)]
    pub rotary: Vec<RotaryPosition>,
    #[serde(default = "default_input_poll")]
    pub poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnimationConfig {
    #[serde(default = "default_morse_message")]
    pub morse_message: String,
    #[serde(default = "default_morse_unit")]
    pub morse_unit_ms: u64,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
}

fn default_brightness() -> u8 {
    40
}
fn default_update_interval() -> u64 {
    15
}
fn default_data_expiry() -> u64 {
    180
}
fn default_wind_threshold() -> u32 {
    25
}
fn default_true() -> bool {
    true
}
fn default_vfr() -> Color {
    led::COLOR_VFR
}
fn default_mvfr() -> Color {
    led::COLOR_MVFR
}
fn default_ifr() -> Color {
    led::COLOR_IFR
}
fn default_lifr() -> Color {
    led::COLOR_LIFR
}
fn default_no_weather() -> Color {
    led::COLOR_NO_WEATHER
}
fn default_lightning() -> Color {
    led::COLOR_LIGHTNING
}
fn default_snow() -> ColorPair {
    led::PAIR_SNOW
}
fn default_rain() -> ColorPair {
    led::PAIR_RAIN
}
fn default_freezing_rain() -> ColorPair {
    led::PAIR_FREEZING_RAIN
}
fn default_dust() -> ColorPair {
    led::PAIR_DUST
}
fn default_fog() -> ColorPair {
    led::PAIR_FOG
}
fn default_home() -> Color {
    led::COLOR_HOME
}
fn default_waits() -> [f64; SUB_CYCLES] {
    [0.9, 0.9, 0.08, 0.1, 0.08, 0.5]
}
fn default_dim_percent() -> u8 {
    60
}
fn default_off_at() -> String {
    "22:00".to_string()
}
fn default_on_at() -> String {
    "06:00".to_string()
}
fn default_wake_minutes() -> u64 {
    10
}
fn default_mos_threshold() -> u8 {
    50
}
fn default_mos_url() -> String {
    DEFAULT_MOS_URL.to_string()
}
fn default_spi_device() -> String {
    "/dev/spidev0.0".to_string()
}
fn default_i2c_device() -> String {
    "/dev/i2c-1".to_string()
}
fn default_sensor_address() -> u8 {
    0x39
}
fn default_sensor_poll() -> u64 {
    5
}
fn default_min_brightness() -> u8 {
    5
}
fn default_max_brightness() -> u8 {
    255
}
fn default_full_scale() -> u16 {
    1000
}
fn default_input_poll() -> u64 {
    100
}
fn default_morse_message() -> String {
    "LIVE SECTIONAL".to_string()
}
fn default_morse_unit() -> u64 {
    150
}
fn default_frame_ms() -> u64 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            brightness: default_brightness(),
            update_interval_min: default_update_interval(),
            data_expiry_min: default_data_expiry(),
            wind_threshold_kt: default_wind_threshold(),
            do_winds: default_true(),
            blink_on_gusts: false,
            do_lightning: default_true(),
            show_snow: default_true(),
            show_rain: default_true(),
            show_freezing_rain: default_true(),
            show_dust: default_true(),
            show_fog: default_true(),
            mode: Mode::default(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            vfr: default_vfr(),
            mvfr: default_mvfr(),
            ifr: default_ifr(),
            lifr: default_lifr(),
            no_weather: default_no_weather(),
            lightning: default_lightning(),
            snow: default_snow(),
            rain: default_rain(),
            freezing_rain: default_freezing_rain(),
            dust: default_dust(),
            fog: default_fog(),
            home_marker: default_home(),
            home_sequence: Vec::new(),
        }
    }
}

impl Default for CycleTimings {
    fn default() -> Self {
        Self {
            waits_s: default_waits(),
        }
    }
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            icao: None,
            display: HomeportDisplay::default(),
            dim_percent: default_dim_percent(),
        }
    }
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            off_at: default_off_at(),
            on_at: default_on_at(),
            wake_minutes: default_wake_minutes(),
        }
    }
}

impl Default for MosConfig {
    fn default() -> Self {
        Self {
            threshold_percent: default_mos_threshold(),
            url: default_mos_url(),
        }
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            spi_device: default_spi_device(),
            color_order: ColorOrder::default(),
            order_overrides: Vec::new(),
        }
    }
}

impl Default for LightSensorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            i2c_device: default_i2c_device(),
            address: default_sensor_address(),
            poll_secs: default_sensor_poll(),
            min_brightness: default_min_brightness(),
            max_brightness: default_max_brightness(),
            full_scale: default_full_scale(),
        }
    }
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_pin: None,
            wake_pin: None,
            rotary: Vec::new(),
            poll_ms: default_input_poll(),
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            morse_message: default_morse_message(),
            morse_unit_ms: default_morse_unit(),
            frame_ms: default_frame_ms(),
        }
    }
}

fn parse_clock(field: &str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| Error::config(format!("sleep.{field} {value:?} is not HH:MM ({e})")))
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.settings.update_interval_min * 60)
    }

    pub fn data_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.settings.data_expiry_min as i64)
    }

    /// The configured sleep window, if enabled.
    pub fn sleep_schedule(&self) -> Result<Option<SleepSchedule>> {
        if !self.sleep.enabled {
            return Ok(None);
        }
        let off_at = parse_clock("off_at", &self.sleep.off_at)?;
        let on_at = parse_clock("on_at", &self.sleep.on_at)?;
        let wake = Duration::from_secs(self.sleep.wake_minutes * 60);
        Ok(Some(SleepSchedule::new(off_at, on_at, wake)))
    }

    /// Clamp soft limits and reject values the render loop cannot run with.
    pub fn validate(&mut self) -> Result<()> {
        self.settings.update_interval_min = self.settings.update_interval_min.clamp(1, 60);
        self.settings.wind_threshold_kt = self.settings.wind_threshold_kt.clamp(0, 100);

        if self.settings.data_expiry_min == 0 {
            return Err(Error::config("settings.data_expiry_min must be positive"));
        }
        for (i, wait) in self.cycle.waits_s.iter().enumerate() {
            if !wait.is_finite() || *wait <= 0.0 || *wait > 60.0 {
                return Err(Error::config(format!(
                    "cycle.waits_s[{i}] = {wait} must be within (0, 60] seconds"
                )));
            }
        }
        let sequence = self.colors.home_sequence.len();
        if sequence != 0 && sequence != SUB_CYCLES {
            return Err(Error::config(format!(
                "colors.home_sequence needs 0 or {SUB_CYCLES} entries, got {sequence}"
            )));
        }
        if self.home.dim_percent > 100 {
            return Err(Error::config("home.dim_percent must be 0-100"));
        }
        if self.home.enabled && self.home.icao.as_deref().map_or(true, |s| s.trim().is_empty()) {
            return Err(Error::config("home.enabled requires home.icao"));
        }
        if self.mos.threshold_percent > 100 {
            return Err(Error::config("mos.threshold_percent must be 0-100"));
        }
        let sensor = &self.light_sensor;
        if sensor.min_brightness > sensor.max_brightness {
            return Err(Error::config(
                "light_sensor.min_brightness exceeds light_sensor.max_brightness",
            ));
        }
        if sensor.full_scale == 0 {
            return Err(Error::config("light_sensor.full_scale must be positive"));
        }
        self.sleep_schedule()?;
        Ok(())
    }
}
