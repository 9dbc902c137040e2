mod gpio;
mod led_driver;
mod light_sensor;
mod metar_client;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;
use wxmap_core::config::Config;
use wxmap_core::mode::{Controls, Mode};
use wxmap_core::registry::{load_slots_json, Registry, SharedRegistry};
use wxmap_core::schedule::{RefreshLoop, SystemClock};
use wxmap_core::strip::{bus_lock, BusLock, MemoryStrip, PixelStrip};

use crate::led_driver::Ws2812Strip;
use crate::metar_client::HttpWeatherSource;

#[derive(Debug, Parser)]
#[command(name = "wxmap", version, about = "Live aviation weather on an LED sectional map")]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, default_value = "/etc/wxmap/config.toml")]
    config: PathBuf,

    /// Airport slot list (JSON)
    #[arg(short, long, default_value = "/etc/wxmap/airports.json")]
    airports: PathBuf,

    /// Start in this mode instead of the configured one (e.g. taf+3, rainbow)
    #[arg(short, long)]
    mode: Option<String>,

    /// Render into memory; no SPI, i2c or GPIO access
    #[arg(long)]
    dry_run: bool,

    #[arg(short, long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(if cli.debug { "debug" } else { "info" }))
        .format_timestamp_secs()
        .init();

    info!("{} v{} starting", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let text = fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let mut config = Config::from_toml(&text).with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(mode) = &cli.mode {
        config.settings.mode = mode.parse::<Mode>().context("--mode")?;
    }

    let text = fs::read_to_string(&cli.airports)
        .with_context(|| format!("reading {}", cli.airports.display()))?;
    let slots = load_slots_json(&text).with_context(|| format!("loading {}", cli.airports.display()))?;
    let registry = Registry::new(slots, config.settings.duplicate_policy)?.into_shared();
    let num_leds = registry.read().num_leds();
    info!("{num_leds} LEDs, starting in {} mode", config.settings.mode);

    let controls = Arc::new(Controls::new(config.settings.mode, config.settings.brightness));
    let bus = bus_lock();
    let source = HttpWeatherSource::new(&config.mos.url)?;

    if cli.dry_run {
        info!("Dry run: frames stay in memory");
        return run(config, registry, controls, MemoryStrip::new(num_leds), source, bus);
    }

    if config.light_sensor.enabled {
        light_sensor::spawn(&config.light_sensor, controls.clone(), bus.clone())
            .context("starting light sensor")?;
    }
    if config.inputs.enabled {
        gpio::spawn(&config.inputs, controls.clone()).context("starting GPIO inputs")?;
    }
    let strip = Ws2812Strip::open(&config.strip.spi_device, num_leds).context("opening LED strip")?;
    run(config, registry, controls, strip, source, bus)
}

fn run<S: PixelStrip>(
    config: Config,
    registry: SharedRegistry,
    controls: Arc<Controls>,
    strip: S,
    source: HttpWeatherSource,
    bus: BusLock,
) -> anyhow::Result<()> {
    let mut refresh = RefreshLoop::new(config, registry, controls, strip, source, SystemClock, bus)?;
    refresh.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_files_load() {
        let config = Config::from_toml(include_str!("../conf/config.toml")).unwrap();
        assert_eq!(config.inputs.rotary.len(), 4);
        let slots = load_slots_json(include_str!("../conf/airports.json")).unwrap();
        let registry = Registry::new(slots, config.settings.duplicate_policy).unwrap();
        assert_eq!(registry.num_leds(), 13);
        assert!(registry.owner_slot(config.home.icao.as_deref().unwrap()).is_some());
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from(["wxmap", "--dry-run", "-m", "taf+2", "--debug"]);
        assert!(cli.dry_run);
        assert!(cli.debug);
        assert_eq!(cli.mode.as_deref(), Some("taf+2"));
        assert_eq!(cli.config, PathBuf::from("/etc/wxmap/config.toml"));
    }
}
