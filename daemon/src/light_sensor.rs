use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;
use log::{debug, info, warn};
use wxmap_core::config::LightSensorConfig;
use wxmap_core::mode::Controls;
use wxmap_core::strip::BusLock;
use wxmap_core::{Error, Result};

// TSL2561 registers, accessed with the command bit set.
const CMD: u8 = 0x80;
const WORD: u8 = 0x20;
const REG_CONTROL: u8 = 0x00;
const REG_DATA0_LOW: u8 = 0x0C;
const POWER_ON: u8 = 0x03;

/// TSL2561 ambient light sensor.
pub struct Tsl2561<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Tsl2561<I> {
    pub fn new(mut i2c: I, address: u8) -> Result<Self> {
        i2c.write(address, &[CMD | REG_CONTROL, POWER_ON])
            .map_err(|e| Error::Bus(format!("TSL2561 power on: {e:?}")))?;
        Ok(Self { i2c, address })
    }

    /// Raw broadband (visible + IR) channel count.
    pub fn broadband(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[CMD | WORD | REG_DATA0_LOW], &mut buf)
            .map_err(|e| Error::Bus(format!("TSL2561 read: {e:?}")))?;
        Ok(u16::from_le_bytes(buf))
    }
}

/// Map a raw reading linearly onto the configured brightness range.
pub fn brightness_for(raw: u16, config: &LightSensorConfig) -> u8 {
    let full = config.full_scale.max(1) as u32;
    let raw = (raw as u32).min(full);
    let lo = config.min_brightness as u32;
    let hi = config.max_brightness.max(config.min_brightness) as u32;
    (lo + (hi - lo) * raw / full) as u8
}

/// Poll the sensor on its own thread and publish strip brightness.
pub fn spawn(config: &LightSensorConfig, controls: Arc<Controls>, bus: BusLock) -> Result<JoinHandle<()>> {
    let i2c = I2cdev::new(&config.i2c_device)
        .map_err(|e| Error::Bus(format!("{}: {e}", config.i2c_device)))?;
    let mut sensor = {
        let _guard = bus.lock();
        Tsl2561::new(i2c, config.address)?
    };
    info!("Light sensor at {:#04x} on {}", config.address, config.i2c_device);

    let config = config.clone();
    let poll = Duration::from_secs(config.poll_secs.max(1));
    thread::Builder::new()
        .name("light-sensor".into())
        .spawn(move || {
            while !controls.shutdown_requested() {
                let reading = {
                    let _guard = bus.lock();
                    sensor.broadband()
                };
                match reading {
                    Ok(raw) => {
                        let level = brightness_for(raw, &config);
                        debug!("Light sensor raw {raw} -> brightness {level}");
                        controls.set_brightness(level);
                    }
                    Err(e) => warn!("{e}"),
                }
                thread::sleep(poll);
            }
        })
        .map_err(|e| Error::Bus(format!("light sensor thread: {e}")))
}
