use chrono::{DateTime, Utc};

use crate::config::{Colors, Config, HomeportDisplay, Settings};
use crate::error::{Error, Result};
use crate::led::{Color, ColorPair, OrderCorrection, RenderFrame, SpecialCode, COLOR_BLACK};
use crate::observation::{Observation, Phenomena, Phenomenon};
use crate::registry::{AirportSlot, Registry, SlotKind};

/// Phases per refresh tick.
pub const SUB_CYCLES: usize = 6;

const WIND_BLINK_CYCLES: [usize; 3] = [3, 4, 5];
const LIGHTNING_CYCLES: [usize; 2] = [2, 4];

/// Computes the color of every LED for one sub-cycle.
#[derive(Debug, Clone)]
pub struct Renderer {
    settings: Settings,
    colors: Colors,
    home_display: HomeportDisplay,
    home_enabled: bool,
    home_led: Option<usize>,
    dim_percent: u8,
    correction: OrderCorrection,
    expiry: chrono::Duration,
    toggle: bool,
}

impl Renderer {
    /// Fails when the home airport is enabled but has no LED.
    pub fn new(config: &Config, registry: &Registry) -> Result<Self> {
        let home = &config.home;
        let home_led = match (&home.icao, home.enabled) {
            (Some(icao), true) => {
                let led = registry
                    .owner_slot(icao)
                    .and_then(|s| s.led_index)
                    .ok_or_else(|| Error::config(format!("home airport {icao} has no LED slot")))?;
                Some(led)
            }
            _ => None,
        };
        Ok(Self {
            settings: config.settings.clone(),
            colors: config.colors.clone(),
            home_display: home.display,
            home_enabled: home.enabled,
            home_led,
            dim_percent: home.dim_percent,
            correction: config.strip.order_correction(),
            expiry: config.data_expiry(),
            toggle: true,
        })
    }

    pub fn home_led(&self) -> Option<usize> {
        self.home_led
    }

    pub fn toggle(&self) -> bool {
        self.toggle
    }

    pub fn set_toggle(&mut self, toggle: bool) {
        self.toggle = toggle;
    }

    /// Called once per completed flicker loop.
    pub fn advance_tick(&mut self) {
        self.toggle = !self.toggle;
    }

    pub fn frame(&self, cycle: usize, registry: &Registry, now: DateTime<Utc>) -> Result<RenderFrame> {
        let mut frame = RenderFrame::new(registry.num_leds());
        for slot in registry.active_led_slots() {
            let Some(index) = slot.led_index else {
                continue;
            };
            let color = self.pixel(slot, registry.slot_observation(slot), cycle, now);
            frame.set(index, self.correction.apply(index, color))?;
        }
        Ok(frame)
    }

    /// Color for one slot before channel-order correction.
    pub fn pixel(
        &self,
        slot: &AirportSlot,
        observation: Option<&Observation>,
        cycle: usize,
        now: DateTime<Utc>,
    ) -> Color {
        let cycle = cycle % SUB_CYCLES;
        match slot.kind() {
            SlotKind::Special(SpecialCode::Null) => return COLOR_BLACK,
            SlotKind::Special(code) => return code.legend_color(cycle),
            SlotKind::Airport => {}
        }

        let is_home = slot.led_index.is_some() && slot.led_index == self.home_led;
        let mut color = self.weather_color(observation, cycle, now);
        if is_home {
            let marker = match self.home_display {
                HomeportDisplay::Solid => true,
                HomeportDisplay::Alternate => self.toggle,
                HomeportDisplay::Weather => false,
            };
            if marker {
                color = self.home_marker(cycle);
            }
        } else if self.home_enabled {
            color = color.dimmed(self.dim_percent);
        }
        color
    }

    fn home_marker(&self, cycle: usize) -> Color {
        self.colors
            .home_sequence
            .get(cycle)
            .copied()
            .unwrap_or(self.colors.home_marker)
    }

    fn weather_color(&self, observation: Option<&Observation>, cycle: usize, now: DateTime<Utc>) -> Color {
        let Some(obs) = observation.filter(|o| !o.is_stale(now, self.expiry)) else {
            return self.colors.no_weather;
        };
        let s = &self.settings;
        let mut color = self.colors.category(obs.category());

        let wind = if s.blink_on_gusts {
            obs.max_wind()
        } else {
            obs.wind_speed_kt()
        };
        if s.do_winds && wind >= s.wind_threshold_kt && WIND_BLINK_CYCLES.contains(&cycle) {
            color = COLOR_BLACK;
        }

        let phenomena = obs.phenomena();
        if s.do_lightning && phenomena.contains(Phenomenon::Lightning) && LIGHTNING_CYCLES.contains(&cycle) {
            color = self.colors.lightning;
        }

        if let Some(pair) = self.precipitation(phenomena) {
            match cycle {
                3 | 5 => color = pair.0,
                4 => color = pair.1,
                _ => {}
            }
        }
        color
    }

    /// Overlay for the most significant enabled phenomenon.
    fn precipitation(&self, phenomena: Phenomena) -> Option<ColorPair> {
        let s = &self.settings;
        let c = &self.colors;
        [
            (Phenomenon::FreezingRain, s.show_freezing_rain, c.freezing_rain),
            (Phenomenon::Snow, s.show_snow, c.snow),
            (Phenomenon::Rain, s.show_rain, c.rain),
            (Phenomenon::DustSandAsh, s.show_dust, c.dust),
            (Phenomenon::Fog, s.show_fog, c.fog),
        ]
        .into_iter()
        .find(|(p, shown, _)| *shown && phenomena.contains(*p))
        .map(|(_, _, pair)| pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::led::{self, ColorOrder};
    use crate::metar::parse_raw;
    use crate::observation::{Measurements, WxSource};
    use crate::registry::load_slots_json;
    use chrono::{Duration, TimeZone};

    const SAMPLE_SLOTS: &str = r#"[
        {"icao": "KPAE", "led": 0},
        {"icao": "KSEA", "led": 1},
        {"icao": "NULL", "led": 2},
        {"icao": "SNOW", "led": 3},
        {"icao": "KBFI", "led": 4}
    ]"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 15, 0, 0).unwrap()
    }

    fn registry() -> Registry {
        Registry::new(load_slots_json(SAMPLE_SLOTS).unwrap(), DuplicatePolicy::Warn).unwrap()
    }

    fn with_wx(icao: &str, ceiling: i32, vis: f64, wx: &str) -> Observation {
        let mut m = Measurements::new(icao, WxSource::AddsBulk, now());
        m.ceiling_ft = ceiling;
        m.visibility_mi = vis;
        m.phenomena = Phenomena::from_wx_string(wx);
        Observation::classified(m)
    }

    fn colors_at(renderer: &Renderer, reg: &Registry, led: usize) -> Vec<Color> {
        (0..SUB_CYCLES)
            .map(|c| renderer.frame(c, reg, now()).unwrap().get(led).unwrap())
            .collect()
    }

    #[test]
    fn ifr_with_high_wind_blinks_on_late_cycles() {
        let mut reg = registry();
        let obs = parse_raw("KPAE 181453Z 18025KT 2SM BKN008 OVC015 12/11 A2992", now()).unwrap();
        reg.upsert_observation("KPAE", obs);
        let renderer = Renderer::new(&Config::default(), &reg).unwrap();

        let ifr = led::COLOR_IFR;
        assert_eq!(
            colors_at(&renderer, &reg, 0),
            vec![ifr, ifr, ifr, COLOR_BLACK, COLOR_BLACK, COLOR_BLACK]
        );
    }

    #[test]
    fn wind_blink_can_use_gusts() {
        let mut reg = registry();
        let obs = parse_raw("KPAE 181453Z 18012G30KT 10SM FEW050 12/11 A2992", now()).unwrap();
        reg.upsert_observation("KPAE", obs);

        let calm = Renderer::new(&Config::default(), &reg).unwrap();
        assert_eq!(colors_at(&calm, &reg, 0)[4], led::COLOR_VFR);

        let mut config = Config::default();
        config.settings.blink_on_gusts = true;
        let gusty = Renderer::new(&config, &reg).unwrap();
        assert_eq!(colors_at(&gusty, &reg, 0)[4], COLOR_BLACK);
    }

    #[test]
    fn solid_home_always_shows_marker() {
        let mut reg = registry();
        reg.upsert_observation("KPAE", with_wx("KPAE", 300, 0.5, "TSRA"));
        let config = Config::from_toml(
            "[home]\nenabled = true\nicao = \"KPAE\"\ndisplay = \"solid\"\n[colors]\nhome_marker = \"#ffa500\"",
        )
        .unwrap();
        let mut renderer = Renderer::new(&config, &reg).unwrap();
        renderer.set_toggle(true);
        assert_eq!(renderer.home_led(), Some(0));
        let marker = Color::new(255, 165, 0);
        assert_eq!(colors_at(&renderer, &reg, 0), vec![marker; SUB_CYCLES]);
        renderer.advance_tick();
        assert_eq!(colors_at(&renderer, &reg, 0), vec![marker; SUB_CYCLES]);
    }

    #[test]
    fn alternate_home_follows_toggle_and_others_dim() {
        let mut reg = registry();
        reg.upsert_observation("KPAE", with_wx("KPAE", 5000, 10.0, ""));
        reg.upsert_observation("KSEA", with_wx("KSEA", 5000, 10.0, ""));
        let config = Config::from_toml("[home]\nenabled = true\nicao = \"KPAE\"\ndim_percent = 50").unwrap();
        let mut renderer = Renderer::new(&config, &reg).unwrap();

        renderer.set_toggle(true);
        assert_eq!(colors_at(&renderer, &reg, 0)[0], led::COLOR_HOME);
        renderer.advance_tick();
        assert_eq!(colors_at(&renderer, &reg, 0)[0], led::COLOR_VFR);
        assert_eq!(colors_at(&renderer, &reg, 1)[0], Color::new(0, 127, 0));
    }

    #[test]
    fn repeated_identical_upsert_leaves_render_state_alone() {
        let mut reg = registry();
        let obs = with_wx("KPAE", 800, 2.0, "RA");
        reg.upsert_observation("KPAE", obs.clone());
        let config = Config::from_toml("[home]\nenabled = true\nicao = \"KPAE\"").unwrap();
        let mut renderer = Renderer::new(&config, &reg).unwrap();
        renderer.set_toggle(true);
        let before: Vec<Vec<Color>> = (0..SUB_CYCLES)
            .map(|c| renderer.frame(c, &reg, now()).unwrap().pixels().to_vec())
            .collect();

        assert!(!reg.upsert_observation("KPAE", obs.clone()));
        assert!(!reg.upsert_observation("KPAE", obs));

        assert!(renderer.toggle());
        let after: Vec<Vec<Color>> = (0..SUB_CYCLES)
            .map(|c| renderer.frame(c, &reg, now()).unwrap().pixels().to_vec())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn home_sequence_per_sub_cycle() {
        let mut reg = registry();
        reg.upsert_observation("KPAE", with_wx("KPAE", 5000, 10.0, ""));
        let config = Config::from_toml(
            "[home]\nenabled = true\nicao = \"KPAE\"\ndisplay = \"solid\"\n\
             [colors]\nhome_sequence = [\"#010101\", \"#020202\", \"#030303\", \"#040404\", \"#050505\", \"#060606\"]",
        )
        .unwrap();
        let renderer = Renderer::new(&config, &reg).unwrap();
        assert_eq!(colors_at(&renderer, &reg, 0)[2], Color::new(3, 3, 3));
    }

    #[test]
    fn lightning_flashes_on_cycles_two_and_four() {
        let mut reg = registry();
        reg.upsert_observation("KSEA", with_wx("KSEA", 5000, 10.0, "TS"));
        let renderer = Renderer::new(&Config::default(), &reg).unwrap();
        let vfr = led::COLOR_VFR;
        let ltg = led::COLOR_LIGHTNING;
        assert_eq!(colors_at(&renderer, &reg, 1), vec![vfr, vfr, ltg, vfr, ltg, vfr]);
    }

    #[test]
    fn precipitation_overlays_and_flags() {
        let mut reg = registry();
        reg.upsert_observation("KSEA", with_wx("KSEA", 700, 10.0, "-SN"));
        let renderer = Renderer::new(&Config::default(), &reg).unwrap();
        let ifr = led::COLOR_IFR;
        let ColorPair(a, b) = led::PAIR_SNOW;
        assert_eq!(colors_at(&renderer, &reg, 1), vec![ifr, ifr, ifr, a, b, a]);

        let mut config = Config::default();
        config.settings.show_snow = false;
        let renderer = Renderer::new(&config, &reg).unwrap();
        assert_eq!(colors_at(&renderer, &reg, 1), vec![ifr; SUB_CYCLES]);
    }

    #[test]
    fn freezing_rain_outranks_rain() {
        let mut reg = registry();
        reg.upsert_observation("KSEA", with_wx("KSEA", 5000, 10.0, "FZRA"));
        let renderer = Renderer::new(&Config::default(), &reg).unwrap();
        assert_eq!(colors_at(&renderer, &reg, 1)[4], led::PAIR_FREEZING_RAIN.1);
    }

    #[test]
    fn placeholders_legends_and_missing_data() {
        let reg = registry();
        let renderer = Renderer::new(&Config::default(), &reg).unwrap();
        assert_eq!(colors_at(&renderer, &reg, 2), vec![COLOR_BLACK; SUB_CYCLES]);
        assert_eq!(colors_at(&renderer, &reg, 3)[3], led::PAIR_SNOW.0);
        assert_eq!(colors_at(&renderer, &reg, 4), vec![led::COLOR_NO_WEATHER; SUB_CYCLES]);
    }

    #[test]
    fn stale_observation_falls_back_to_no_weather() {
        let mut reg = registry();
        let mut m = Measurements::new("KSEA", WxSource::AddsBulk, now() - Duration::hours(5));
        m.ceiling_ft = 700;
        m.visibility_mi = 10.0;
        reg.upsert_observation("KSEA", Observation::classified(m));
        let renderer = Renderer::new(&Config::default(), &reg).unwrap();
        assert_eq!(colors_at(&renderer, &reg, 1)[0], led::COLOR_NO_WEATHER);
    }

    #[test]
    fn order_correction_applies_per_index() {
        let mut reg = registry();
        reg.upsert_observation("KPAE", with_wx("KPAE", 700, 10.0, ""));
        reg.upsert_observation("KSEA", with_wx("KSEA", 700, 10.0, ""));
        let mut config = Config::default();
        config.strip.color_order = ColorOrder::Grb;
        config.strip.order_overrides = vec![1];
        let renderer = Renderer::new(&config, &reg).unwrap();
        let frame = renderer.frame(0, &reg, now()).unwrap();
        assert_eq!(frame.get(0).unwrap(), Color::new(0, 255, 0));
        assert_eq!(frame.get(1).unwrap(), led::COLOR_IFR);
    }

    #[test]
    fn home_airport_must_have_led() {
        let reg = registry();
        let config = Config::from_toml("[home]\nenabled = true\nicao = \"KJFK\"").unwrap();
        assert!(matches!(Renderer::new(&config, &reg), Err(Error::Configuration(_))));
    }
}
