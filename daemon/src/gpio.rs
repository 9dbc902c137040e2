use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::info;
use rppal::gpio::{Gpio, InputPin};
use wxmap_core::config::InputsConfig;
use wxmap_core::mode::{Controls, Mode};
use wxmap_core::{Error, Result};

/// Momentary button wired to ground; fires once per press.
struct Button {
    pin: InputPin,
    was_down: bool,
}

impl Button {
    fn pressed(&mut self) -> bool {
        let down = self.pin.is_low();
        let edge = down && !self.was_down;
        self.was_down = down;
        edge
    }
}

/// Mode selected by a rotary switch: the first position pulled low.
pub fn selected_mode(positions: impl IntoIterator<Item = (bool, Mode)>) -> Option<Mode> {
    positions.into_iter().find(|(low, _)| *low).map(|(_, mode)| mode)
}

fn input(gpio: &Gpio, pin: u8) -> Result<InputPin> {
    gpio.get(pin)
        .map(|p| p.into_input_pullup())
        .map_err(|e| Error::Bus(format!("GPIO {pin}: {e}")))
}

/// Watch the refresh/wake buttons and rotary switch on their own thread.
pub fn spawn(config: &InputsConfig, controls: Arc<Controls>) -> Result<JoinHandle<()>> {
    let gpio = Gpio::new().map_err(|e| Error::Bus(format!("GPIO: {e}")))?;
    let button = |pin: Option<u8>| -> Result<Option<Button>> {
        pin.map(|p| input(&gpio, p).map(|pin| Button { pin, was_down: false }))
            .transpose()
    };
    let mut refresh = button(config.refresh_pin)?;
    let mut wake = button(config.wake_pin)?;
    let rotary = config
        .rotary
        .iter()
        .map(|pos| Ok((input(&gpio, pos.pin)?, pos.mode)))
        .collect::<Result<Vec<(InputPin, Mode)>>>()?;
    info!("Watching inputs: {} rotary positions", rotary.len());

    let poll = Duration::from_millis(config.poll_ms.max(10));
    thread::Builder::new()
        .name("gpio".into())
        .spawn(move || {
            while !controls.shutdown_requested() {
                if refresh.as_mut().is_some_and(Button::pressed) {
                    info!("Refresh button pressed");
                    controls.request_refresh();
                }
                if wake.as_mut().is_some_and(Button::pressed) {
                    info!("Wake button pressed");
                    controls.request_wake();
                }
                if let Some(mode) = selected_mode(rotary.iter().map(|(pin, mode)| (pin.is_low(), *mode))) {
                    controls.set_mode(mode);
                }
                thread::sleep(poll);
            }
        })
        .map_err(|e| Error::Bus(format!("gpio thread: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxmap_core::mode::AnimationKind;

    #[test]
    fn first_low_position_wins() {
        let positions = [
            (false, Mode::Metar),
            (true, Mode::Taf { offset_h: 3 }),
            (true, Mode::Animation(AnimationKind::Rainbow)),
        ];
        assert_eq!(selected_mode(positions), Some(Mode::Taf { offset_h: 3 }));
        assert_eq!(selected_mode([(false, Mode::Metar)]), None);
    }
}
