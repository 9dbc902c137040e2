//! Visual-only patterns shown when the mode switch is off the weather modes.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::AnimationConfig;
use crate::error::Result;
use crate::led::{self, Color, OrderCorrection, RenderFrame, COLOR_BLACK};
use crate::mode::AnimationKind;
use crate::registry::Registry;

const SWEEP_DEG_PER_STEP: f64 = 6.0;
const SWEEP_BEAM_DEG: f64 = 40.0;
const WIPE_STEPS: u64 = 40;
const TEST_STEP: Duration = Duration::from_secs(1);

const TEST_COLORS: [Color; 5] = [
    led::COLOR_VFR,
    led::COLOR_MVFR,
    led::COLOR_IFR,
    led::COLOR_LIFR,
    led::COLOR_NO_WEATHER,
];

pub struct Animator {
    rng: StdRng,
    step: u64,
    frame_time: Duration,
    morse: Vec<bool>,
    morse_unit: Duration,
    correction: OrderCorrection,
}

impl Animator {
    pub fn new(config: &AnimationConfig, correction: OrderCorrection) -> Self {
        Self::with_rng(config, correction, StdRng::from_os_rng())
    }

    /// Deterministic shuffle for tests.
    pub fn seeded(config: &AnimationConfig, correction: OrderCorrection, seed: u64) -> Self {
        Self::with_rng(config, correction, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &AnimationConfig, correction: OrderCorrection, rng: StdRng) -> Self {
        Self {
            rng,
            step: 0,
            frame_time: Duration::from_millis(config.frame_ms.max(1)),
            morse: morse_units(&config.morse_message),
            morse_unit: Duration::from_millis(config.morse_unit_ms.max(1)),
            correction,
        }
    }

    /// Restart patterns from their first frame.
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Next frame of `kind` and how long to hold it.
    pub fn next_frame(&mut self, kind: AnimationKind, registry: &Registry) -> Result<(RenderFrame, Duration)> {
        let n = registry.num_leds();
        let step = self.step;
        self.step = self.step.wrapping_add(1);

        let mut colors = vec![COLOR_BLACK; n];
        let hold = match kind {
            AnimationKind::Rainbow => {
                for (i, c) in colors.iter_mut().enumerate() {
                    let pos = (i * 256 / n.max(1)) as u64 + step * 4;
                    *c = wheel((pos % 256) as u8);
                }
                self.frame_time
            }
            AnimationKind::Shuffle => {
                for c in colors.iter_mut() {
                    *c = TEST_COLORS[self.rng.random_range(0..TEST_COLORS.len() - 1)];
                }
                self.frame_time * 5
            }
            AnimationKind::Morse => {
                let on = !self.morse.is_empty() && self.morse[(step as usize) % self.morse.len()];
                if on {
                    colors.fill(led::COLOR_VFR);
                }
                self.morse_unit
            }
            AnimationKind::RabbitChase => {
                if n > 0 {
                    let head = (step as usize) % n;
                    for (tail, level) in [(0, 100u8), (1, 40), (2, 15)] {
                        let i = (head + n - tail % n) % n;
                        colors[i] = led::COLOR_IFR.dimmed(100 - level);
                    }
                }
                self.frame_time
            }
            AnimationKind::RadarSweep => {
                let sweep = (step as f64 * SWEEP_DEG_PER_STEP) % 360.0;
                for (i, bearing) in bearings(registry) {
                    let behind = (sweep - bearing).rem_euclid(360.0);
                    if behind < SWEEP_BEAM_DEG {
                        let fade = (100.0 * behind / SWEEP_BEAM_DEG) as u8;
                        colors[i] = led::COLOR_VFR.dimmed(fade);
                    }
                }
                self.frame_time
            }
            AnimationKind::Wipe => {
                let pass = step / WIPE_STEPS;
                let progress = (step % WIPE_STEPS) as f64 / (WIPE_STEPS - 1) as f64;
                let color = TEST_COLORS[(pass as usize) % 4];
                for (i, fraction) in longitudes(registry) {
                    if fraction <= progress {
                        colors[i] = color;
                    }
                }
                self.frame_time
            }
        };
        Ok((self.finish(colors)?, hold))
    }

    /// Every LED steps through the category colors together.
    pub fn test_frame(&mut self, num_leds: usize) -> Result<(RenderFrame, Duration)> {
        let color = TEST_COLORS[(self.step as usize) % TEST_COLORS.len()];
        self.step = self.step.wrapping_add(1);
        Ok((self.finish(vec![color; num_leds])?, TEST_STEP))
    }

    fn finish(&self, colors: Vec<Color>) -> Result<RenderFrame> {
        let mut frame = RenderFrame::new(colors.len());
        for (i, c) in colors.into_iter().enumerate() {
            frame.set(i, self.correction.apply(i, c))?;
        }
        Ok(frame)
    }
}

/// Classic 0-255 color wheel: red to green to blue and back.
fn wheel(pos: u8) -> Color {
    match pos {
        0..=84 => Color::new(255 - pos * 3, pos * 3, 0),
        85..=169 => {
            let p = pos - 85;
            Color::new(0, 255 - p * 3, p * 3)
        }
        _ => {
            let p = pos - 170;
            Color::new(p * 3, 0, 255 - p * 3)
        }
    }
}

/// Bearing in degrees from the centroid of all positioned slots.
fn bearings(registry: &Registry) -> Vec<(usize, f64)> {
    let placed: Vec<(usize, f64, f64)> = registry
        .active_led_slots()
        .filter_map(|s| Some((s.led_index?, s.latitude?, s.longitude?)))
        .collect();
    if placed.is_empty() {
        return Vec::new();
    }
    let count = placed.len() as f64;
    let lat0 = placed.iter().map(|p| p.1).sum::<f64>() / count;
    let lon0 = placed.iter().map(|p| p.2).sum::<f64>() / count;
    placed
        .into_iter()
        .map(|(i, lat, lon)| {
            let east = (lon - lon0) * lat0.to_radians().cos();
            let north = lat - lat0;
            (i, east.atan2(north).to_degrees().rem_euclid(360.0))
        })
        .collect()
}

/// Position of each slot between the westernmost (0.0) and easternmost (1.0).
fn longitudes(registry: &Registry) -> Vec<(usize, f64)> {
    let placed: Vec<(usize, f64)> = registry
        .active_led_slots()
        .filter_map(|s| Some((s.led_index?, s.longitude?)))
        .collect();
    let west = placed.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let east = placed.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let span = east - west;
    placed
        .into_iter()
        .map(|(i, lon)| (i, if span > 0.0 { (lon - west) / span } else { 0.0 }))
        .collect()
}

fn morse_code(c: char) -> Option<&'static str> {
    Some(match c.to_ascii_uppercase() {
        'A' => ".-",
        'B' => "-...",
        'C' => "-.-.",
        'D' => "-..",
        'E' => ".",
        'F' => "..-.",
        'G' => "--.",
        'H' => "....",
        'I' => "..",
        'J' => ".---",
        'K' => "-.-",
        'L' => ".-..",
        'M' => "--",
        'N' => "-.",
        'O' => "---",
        'P' => ".--.",
        'Q' => "--.-",
        'R' => ".-.",
        'S' => "...",
        'T' => "-",
        'U' => "..-",
        'V' => "...-",
        'W' => ".--",
        'X' => "-..-",
        'Y' => "-.--",
        'Z' => "--..",
        '0' => "-----",
        '1' => ".----",
        '2' => "..---",
        '3' => "...--",
        '4' => "....-",
        '5' => ".....",
        '6' => "-....",
        '7' => "--...",
        '8' => "---..",
        '9' => "----.",
        _ => return None,
    })
}

/// On/off timeline in Morse units: dot 1, dash 3, gaps 1/3/7.
fn morse_units(message: &str) -> Vec<bool> {
    let mut units = Vec::new();
    for word in message.split_whitespace() {
        for code in word.chars().filter_map(morse_code) {
            for symbol in code.chars() {
                let len = if symbol == '-' { 3 } else { 1 };
                units.extend(std::iter::repeat(true).take(len));
                units.push(false);
            }
            units.extend([false, false]);
        }
        units.extend([false; 4]);
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::led::ColorOrder;
    use crate::registry::load_slots_json;

    const SAMPLE_SLOTS: &str = r#"[
        {"icao": "KSEA", "led": 0, "lat": 47.45, "lon": -122.31},
        {"icao": "KPAE", "led": 1, "lat": 47.91, "lon": -122.28},
        {"icao": "KOLM", "led": 2, "lat": 46.97, "lon": -122.90},
        {"icao": "KBLI", "led": 3, "lat": 48.79, "lon": -122.54},
        {"icao": "NULL", "led": 4}
    ]"#;

    fn registry() -> Registry {
        Registry::new(load_slots_json(SAMPLE_SLOTS).unwrap(), DuplicatePolicy::Warn).unwrap()
    }

    fn animator() -> Animator {
        Animator::seeded(&AnimationConfig::default(), OrderCorrection::default(), 7)
    }

    #[test]
    fn morse_timeline() {
        // "E T": dot, letter gap, word gap, dash, letter gap, word gap
        let units = morse_units("E T");
        let lit: Vec<u8> = units.iter().map(|&on| on as u8).collect();
        assert_eq!(&lit[..8], &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&lit[8..12], &[1, 1, 1, 0]);
        assert!(morse_units("").is_empty());
    }

    #[test]
    fn morse_lights_whole_strip() {
        let reg = registry();
        let mut a = animator();
        let (frame, hold) = a.next_frame(AnimationKind::Morse, &reg).unwrap();
        assert_eq!(hold, Duration::from_millis(150));
        // default message starts with "L" = .-..
        assert!(frame.pixels().iter().all(|c| *c == led::COLOR_VFR));
        let (frame, _) = a.next_frame(AnimationKind::Morse, &reg).unwrap();
        assert!(frame.pixels().iter().all(|c| *c == COLOR_BLACK));
    }

    #[test]
    fn rainbow_moves() {
        let reg = registry();
        let mut a = animator();
        let (first, _) = a.next_frame(AnimationKind::Rainbow, &reg).unwrap();
        let (second, _) = a.next_frame(AnimationKind::Rainbow, &reg).unwrap();
        assert_eq!(first.num_leds(), 5);
        assert_eq!(first.get(0).unwrap(), Color::new(255, 0, 0));
        assert_ne!(first, second);
    }

    #[test]
    fn rabbit_head_advances() {
        let reg = registry();
        let mut a = animator();
        let (frame, _) = a.next_frame(AnimationKind::RabbitChase, &reg).unwrap();
        assert_eq!(frame.get(0).unwrap(), led::COLOR_IFR);
        assert_ne!(frame.get(4).unwrap(), COLOR_BLACK);
        let (frame, _) = a.next_frame(AnimationKind::RabbitChase, &reg).unwrap();
        assert_eq!(frame.get(1).unwrap(), led::COLOR_IFR);
        assert_eq!(frame.get(2).unwrap(), COLOR_BLACK);
    }

    #[test]
    fn radar_bearings_from_centroid() {
        let reg = registry();
        let b: std::collections::HashMap<_, _> = bearings(&reg).into_iter().collect();
        assert_eq!(b.len(), 4);
        // KBLI is north of the centroid, KOLM south-west
        assert!(b[&3] < 30.0 || b[&3] > 330.0);
        assert!(b[&2] > 180.0 && b[&2] < 270.0);
    }

    #[test]
    fn wipe_runs_west_to_east() {
        let reg = registry();
        let mut a = animator();
        let (frame, _) = a.next_frame(AnimationKind::Wipe, &reg).unwrap();
        // only the westernmost slot is lit on the first frame
        assert_ne!(frame.get(2).unwrap(), COLOR_BLACK);
        assert_eq!(frame.get(1).unwrap(), COLOR_BLACK);
        assert_eq!(frame.get(4).unwrap(), COLOR_BLACK);
    }

    #[test]
    fn shuffle_uses_category_colors() {
        let reg = registry();
        let mut a = animator();
        let (frame, _) = a.next_frame(AnimationKind::Shuffle, &reg).unwrap();
        assert!(frame.pixels().iter().all(|c| TEST_COLORS[..4].contains(c)));
    }

    #[test]
    fn test_pattern_cycles_categories_with_order_fix() {
        let mut a = Animator::seeded(
            &AnimationConfig::default(),
            OrderCorrection::new(ColorOrder::Grb, []),
            1,
        );
        let (frame, hold) = a.test_frame(3).unwrap();
        assert_eq!(hold, Duration::from_secs(1));
        assert_eq!(frame.get(0).unwrap(), Color::new(255, 0, 0));
        let (frame, _) = a.test_frame(3).unwrap();
        assert_eq!(frame.get(2).unwrap(), led::COLOR_MVFR);
    }
}
