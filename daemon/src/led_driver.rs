use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::SpidevBus;
use log::info;
use smart_leds::{brightness, SmartLedsWrite, RGB8};
use ws2812_spi::Ws2812;
use wxmap_core::led::Color;
use wxmap_core::strip::PixelStrip;
use wxmap_core::{Error, Result};

/// ws2812-spi wants roughly 3 MHz so each SPI bit lands on a WS2812 sub-bit.
const SPI_HZ: u32 = 3_800_000;

/// WS2812 strip driven from the Pi's SPI MOSI pin.
pub struct Ws2812Strip {
    driver: Ws2812<SpidevBus>,
    buffer: Vec<RGB8>,
    level: u8,
}

impl Ws2812Strip {
    pub fn open(device: &str, num_leds: usize) -> Result<Self> {
        let mut spi = SpidevBus::open(device).map_err(|e| Error::Bus(format!("{device}: {e}")))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options)
            .map_err(|e| Error::Bus(format!("{device}: {e}")))?;
        info!("WS2812 strip on {device}, {num_leds} LEDs");
        Ok(Self {
            driver: Ws2812::new(spi),
            buffer: vec![RGB8::default(); num_leds],
            level: 255,
        })
    }
}

impl PixelStrip for Ws2812Strip {
    fn pixel_count(&self) -> usize {
        self.buffer.len()
    }

    fn set_pixel(&mut self, index: usize, color: Color) -> Result<()> {
        let num_leds = self.buffer.len();
        let px = self
            .buffer
            .get_mut(index)
            .ok_or(Error::LedIndexOutOfBounds { index, num_leds })?;
        *px = to_rgb8(color);
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        self.driver
            .write(brightness(self.buffer.iter().copied(), self.level))
            .map_err(|e| Error::Bus(format!("SPI write failed: {e:?}")))
    }

    fn set_brightness(&mut self, level: u8) {
        self.level = level;
    }
}

fn to_rgb8(c: Color) -> RGB8 {
    RGB8 {
        r: c.r,
        g: c.g,
        b: c.b,
    }
}
