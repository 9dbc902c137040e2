use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::led::{Color, RenderFrame, COLOR_BLACK};

/// Addressable pixel strip driver.
pub trait PixelStrip {
    fn pixel_count(&self) -> usize;
    fn set_pixel(&mut self, index: usize, color: Color) -> Result<()>;
    /// Latch the buffered pixels onto the strip.
    fn show(&mut self) -> Result<()>;
    /// Global brightness, 0-255, applied on the next `show`.
    fn set_brightness(&mut self, level: u8);
}

/// Serializes access to the physical bus shared by the strip and sensors.
pub type BusLock = Arc<Mutex<()>>;

pub fn bus_lock() -> BusLock {
    Arc::new(Mutex::new(()))
}

/// Write a full frame and latch it. The bus is held only for the push.
pub fn push_frame<S: PixelStrip + ?Sized>(strip: &mut S, frame: &RenderFrame, bus: &BusLock) -> Result<()> {
    let _guard = bus.lock();
    for (i, color) in frame.pixels().iter().enumerate().take(strip.pixel_count()) {
        strip.set_pixel(i, *color)?;
    }
    strip.show()
}

pub fn blank<S: PixelStrip + ?Sized>(strip: &mut S, bus: &BusLock) -> Result<()> {
    let _guard = bus.lock();
    for i in 0..strip.pixel_count() {
        strip.set_pixel(i, COLOR_BLACK)?;
    }
    strip.show()
}

/// In-memory strip for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStrip {
    buffer: Vec<Color>,
    shown: Vec<Color>,
    brightness: u8,
    shows: usize,
    history: Option<Vec<Vec<Color>>>,
    failures: usize,
}

impl MemoryStrip {
    pub fn new(num_leds: usize) -> Self {
        Self {
            buffer: vec![COLOR_BLACK; num_leds],
            shown: vec![COLOR_BLACK; num_leds],
            brightness: 255,
            ..Self::default()
        }
    }

    /// Keep every latched frame.
    pub fn recording(num_leds: usize) -> Self {
        Self {
            history: Some(Vec::new()),
            ..Self::new(num_leds)
        }
    }

    /// Make the next `n` calls to `show` fail like a bus error.
    pub fn fail_next_shows(&mut self, n: usize) {
        self.failures = n;
    }

    /// Pixels as last latched, before brightness.
    pub fn shown(&self) -> &[Color] {
        &self.shown
    }

    pub fn show_count(&self) -> usize {
        self.shows
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn history(&self) -> &[Vec<Color>] {
        self.history.as_deref().unwrap_or_default()
    }
}

impl PixelStrip for MemoryStrip {
    fn pixel_count(&self) -> usize {
        self.buffer.len()
    }

    fn set_pixel(&mut self, index: usize, color: Color) -> Result<()> {
        let num_leds = self.buffer.len();
        let slot = self
            .buffer
            .get_mut(index)
            .ok_or(Error::LedIndexOutOfBounds { index, num_leds })?;
        *slot = color;
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(Error::Bus("simulated write failure".into()));
        }
        self.shown.clone_from(&self.buffer);
        self.shows += 1;
        if let Some(history) = self.history.as_mut() {
            history.push(self.shown.clone());
        }
        Ok(())
    }

    fn set_brightness(&mut self, level: u8) {
        self.brightness = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led::{COLOR_IFR, COLOR_VFR};

    #[test]
    fn push_and_blank() {
        let bus = bus_lock();
        let mut strip = MemoryStrip::recording(3);
        let mut frame = RenderFrame::new(3);
        frame.set(1, COLOR_IFR).unwrap();
        push_frame(&mut strip, &frame, &bus).unwrap();
        assert_eq!(strip.shown(), &[COLOR_BLACK, COLOR_IFR, COLOR_BLACK]);

        blank(&mut strip, &bus).unwrap();
        assert!(strip.shown().iter().all(|c| *c == COLOR_BLACK));
        assert_eq!(strip.history().len(), 2);
        assert!(!bus.is_locked());
    }

    #[test]
    fn longer_frame_is_truncated_to_strip() {
        let mut strip = MemoryStrip::new(2);
        let mut frame = RenderFrame::new(4);
        for i in 0..4 {
            frame.set(i, COLOR_VFR).unwrap();
        }
        push_frame(&mut strip, &frame, &bus_lock()).unwrap();
        assert_eq!(strip.shown(), &[COLOR_VFR, COLOR_VFR]);
    }

    #[test]
    fn simulated_bus_failure() {
        let mut strip = MemoryStrip::new(1);
        strip.fail_next_shows(1);
        let frame = RenderFrame::new(1);
        assert!(matches!(push_frame(&mut strip, &frame, &bus_lock()), Err(Error::Bus(_))));
        assert!(push_frame(&mut strip, &frame, &bus_lock()).is_ok());
        assert_eq!(strip.show_count(), 1);
        assert!(strip.set_pixel(5, COLOR_VFR).is_err());
    }
}
