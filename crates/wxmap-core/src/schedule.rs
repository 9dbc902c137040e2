//! Fetch/render orchestration: the refresh loop, its interrupts and the
//! nightly sleep window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, Utc};
use log::{debug, error, info, warn};

use crate::animation::Animator;
use crate::config::Config;
use crate::error::Result;
use crate::extract::{Extractor, FetchPlan, WeatherSource};
use crate::led::RenderFrame;
use crate::mode::{Controls, Mode};
use crate::registry::SharedRegistry;
use crate::render::{Renderer, SUB_CYCLES};
use crate::strip::{self, BusLock, PixelStrip};

/// Longest uninterrupted sleep; bounds interrupt latency.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    /// Wall-clock time of day used by the sleep window.
    fn local_time(&self) -> NaiveTime;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_time(&self) -> NaiveTime {
        Local::now().time()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Daily off/on window; may wrap past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepSchedule {
    off_at: NaiveTime,
    on_at: NaiveTime,
    wake: Duration,
}

impl SleepSchedule {
    pub fn new(off_at: NaiveTime, on_at: NaiveTime, wake: Duration) -> Self {
        Self { off_at, on_at, wake }
    }

    pub fn is_asleep(&self, t: NaiveTime) -> bool {
        if self.off_at == self.on_at {
            false
        } else if self.off_at < self.on_at {
            self.off_at <= t && t < self.on_at
        } else {
            t >= self.off_at || t < self.on_at
        }
    }

    /// How long a wake press keeps the map on.
    pub fn wake_duration(&self) -> Duration {
        self.wake
    }
}

/// Why the render loop handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    RefreshDue,
    ManualRefresh,
    ModeChanged,
    SleepWindow,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Fetching,
    Rendering,
    Sleeping,
}

pub struct RefreshLoop<S, W, C> {
    config: Config,
    registry: SharedRegistry,
    controls: Arc<Controls>,
    strip: S,
    source: W,
    clock: C,
    bus: BusLock,
    extractor: Extractor,
    renderer: Renderer,
    animator: Animator,
    schedule: Option<SleepSchedule>,
    state: LoopState,
    generation: u64,
    wake_until: Option<DateTime<Utc>>,
    brightness: Option<u8>,
    dropped_frames: u64,
}

impl<S: PixelStrip, W: WeatherSource, C: Clock> RefreshLoop<S, W, C> {
    pub fn new(
        config: Config,
        registry: SharedRegistry,
        controls: Arc<Controls>,
        strip: S,
        source: W,
        clock: C,
        bus: BusLock,
    ) -> Result<Self> {
        let renderer = Renderer::new(&config, &registry.read())?;
        let animator = Animator::new(&config.animation, config.strip.order_correction());
        let schedule = config.sleep_schedule()?;
        Ok(Self {
            extractor: Extractor::new(&config),
            renderer,
            animator,
            schedule,
            config,
            registry,
            controls,
            strip,
            source,
            clock,
            bus,
            state: LoopState::Fetching,
            generation: 0,
            wake_until: None,
            brightness: None,
            dropped_frames: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn strip(&self) -> &S {
        &self.strip
    }

    pub fn source(&self) -> &W {
        &self.source
    }

    /// Run until shutdown is requested, then blank the strip.
    pub fn run(&mut self) -> Result<()> {
        info!("Refresh loop started in {} mode", self.controls.current_mode());
        loop {
            let interrupt = self.run_once()?;
            debug!("Refresh loop interrupted: {interrupt:?}");
            if interrupt == Interrupt::Shutdown {
                break;
            }
        }
        info!("Refresh loop stopping");
        if let Err(e) = strip::blank(&mut self.strip, &self.bus) {
            warn!("Could not blank strip on shutdown: {e}");
        }
        Ok(())
    }

    /// One pass: fetch for the current mode, then display until interrupted.
    pub fn run_once(&mut self) -> Result<Interrupt> {
        if self.controls.shutdown_requested() {
            return Ok(Interrupt::Shutdown);
        }
        if self.asleep() {
            return Ok(self.sleep_until_wake());
        }

        self.generation = self.controls.generation();
        let mode = self.controls.current_mode();
        match mode {
            Mode::Metar | Mode::Taf { .. } | Mode::Mos { .. } => {
                self.state = LoopState::Fetching;
                self.refresh_data(mode);
                self.state = LoopState::Rendering;
                let interval = chrono::Duration::minutes(self.config.settings.update_interval_min as i64);
                let deadline = self.clock.now() + interval;
                loop {
                    if let Some(interrupt) = self.flicker(deadline)? {
                        return Ok(interrupt);
                    }
                }
            }
            Mode::Off => {
                self.state = LoopState::Rendering;
                self.blank();
                loop {
                    if let Some(interrupt) = self.wait(POLL_INTERVAL, None) {
                        return Ok(interrupt);
                    }
                }
            }
            Mode::Test | Mode::Animation(_) => {
                self.state = LoopState::Rendering;
                self.animator.reset();
                loop {
                    self.apply_brightness();
                    let (frame, hold) = {
                        let registry = self.registry.read();
                        match mode {
                            Mode::Animation(kind) => self.animator.next_frame(kind, &registry)?,
                            _ => self.animator.test_frame(registry.num_leds())?,
                        }
                    };
                    self.push(&frame);
                    if let Some(interrupt) = self.wait(hold, None) {
                        return Ok(interrupt);
                    }
                }
            }
        }
    }

    /// Fetch and store observations. A failed fetch keeps the previous data.
    pub fn refresh_data(&mut self, mode: Mode) {
        let plan = FetchPlan::for_mode(mode, &self.registry.read());
        if plan.is_empty() {
            debug!("Nothing to fetch in {mode} mode");
            return;
        }
        info!("Fetching weather for {} airports ({mode})", plan.len());
        let reports = match self.source.fetch(&plan) {
            Ok(reports) => reports,
            Err(e) => {
                error!("Weather fetch failed, keeping previous observations: {e}");
                return;
            }
        };
        let observations = self.extractor.normalize(&plan, reports, self.clock.now());
        let total = observations.len();
        let mut changed = 0;
        let mut registry = self.registry.write();
        for obs in observations {
            let icao = obs.icao().to_string();
            if registry.upsert_observation(&icao, obs) {
                changed += 1;
            }
        }
        info!("Stored {total} observations, {changed} changed");
    }

    /// Six timed sub-cycles of the weather display.
    fn flicker(&mut self, deadline: DateTime<Utc>) -> Result<Option<Interrupt>> {
        self.apply_brightness();
        for cycle in 0..SUB_CYCLES {
            let frame = {
                let registry = self.registry.read();
                self.renderer.frame(cycle, &registry, self.clock.now())?
            };
            self.push(&frame);
            if let Some(interrupt) = self.wait(self.config.cycle.wait(cycle), Some(deadline)) {
                return Ok(Some(interrupt));
            }
        }
        self.renderer.advance_tick();
        Ok(None)
    }

    fn push(&mut self, frame: &RenderFrame) {
        if let Err(e) = strip::push_frame(&mut self.strip, frame, &self.bus) {
            self.dropped_frames += 1;
            warn!("Dropped frame ({} so far): {e}", self.dropped_frames);
        }
    }

    fn blank(&mut self) {
        if let Err(e) = strip::blank(&mut self.strip, &self.bus) {
            warn!("Could not blank strip: {e}");
        }
    }

    fn apply_brightness(&mut self) {
        let level = self.controls.brightness();
        if self.brightness != Some(level) {
            debug!("Strip brightness -> {level}");
            self.strip.set_brightness(level);
            self.brightness = Some(level);
        }
    }

    fn asleep(&self) -> bool {
        let Some(schedule) = self.schedule else {
            return false;
        };
        if self.wake_until.is_some_and(|until| self.clock.now() < until) {
            return false;
        }
        schedule.is_asleep(self.clock.local_time())
    }

    fn poll(&self, deadline: Option<DateTime<Utc>>) -> Option<Interrupt> {
        if self.controls.shutdown_requested() {
            Some(Interrupt::Shutdown)
        } else if self.controls.generation() != self.generation {
            Some(Interrupt::ModeChanged)
        } else if self.controls.take_refresh() {
            Some(Interrupt::ManualRefresh)
        } else if self.asleep() {
            Some(Interrupt::SleepWindow)
        } else if deadline.is_some_and(|d| self.clock.now() >= d) {
            Some(Interrupt::RefreshDue)
        } else {
            None
        }
    }

    /// Sleep for `duration` in short chunks, returning early on an interrupt.
    fn wait(&self, duration: Duration, deadline: Option<DateTime<Utc>>) -> Option<Interrupt> {
        let mut remaining = duration;
        loop {
            if let Some(interrupt) = self.poll(deadline) {
                return Some(interrupt);
            }
            if remaining.is_zero() {
                return None;
            }
            let chunk = remaining.min(POLL_INTERVAL);
            self.clock.sleep(chunk);
            remaining -= chunk;
        }
    }

    /// Blank the strip and block until the window ends or wake is pressed.
    fn sleep_until_wake(&mut self) -> Interrupt {
        info!("Sleep window reached, strip off");
        self.state = LoopState::Sleeping;
        self.blank();
        // a press while awake does not carry over
        self.controls.take_wake();
        loop {
            if self.controls.shutdown_requested() {
                return Interrupt::Shutdown;
            }
            if self.controls.take_wake() {
                let wake = self.schedule.map(|s| s.wake_duration()).unwrap_or_default();
                self.wake_until = Some(self.clock.now() + chrono::Duration::seconds(wake.as_secs() as i64));
                info!("Woken for {} minutes", wake.as_secs() / 60);
                return Interrupt::SleepWindow;
            }
            if !self.asleep() {
                info!("Sleep window over, resuming");
                return Interrupt::SleepWindow;
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::error::Error;
    use crate::extract::RawReport;
    use crate::led::{self, COLOR_BLACK};
    use crate::metar::{bulk_dataset, parse_metars};
    use crate::registry::{load_slots_json, Registry};
    use crate::strip::{bus_lock, MemoryStrip};
    use chrono::TimeZone;
    use parking_lot::Mutex;

    const SAMPLE_SLOTS: &str = r#"[
        {"icao": "KPAE", "led": 0},
        {"icao": "KSEA", "led": 1}
    ]"#;

    const SAMPLE_BULK: &str = r#"[
        {"icaoId": "KPAE", "visib": 2, "clouds": [{"cover": "BKN", "base": 800}]},
        {"icaoId": "KSEA", "visib": 10, "clouds": [{"cover": "FEW", "base": 5000}]}
    ]"#;

    type Hook = Box<dyn Fn(DateTime<Utc>)>;

    /// Time only moves when the loop sleeps; `hook` sees every new time.
    struct FakeClock {
        now: Mutex<DateTime<Utc>>,
        hook: Hook,
    }

    impl FakeClock {
        fn new(start: DateTime<Utc>, hook: impl Fn(DateTime<Utc>) + 'static) -> Self {
            Self {
                now: Mutex::new(start),
                hook: Box::new(hook),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }

        fn local_time(&self) -> NaiveTime {
            self.now().time()
        }

        fn sleep(&self, duration: Duration) {
            let now = {
                let mut now = self.now.lock();
                *now += chrono::Duration::from_std(duration).unwrap();
                *now
            };
            (self.hook)(now);
        }
    }

    #[derive(Default)]
    struct StubSource {
        plans: Vec<FetchPlan>,
        fail: bool,
    }

    impl WeatherSource for StubSource {
        fn fetch(&mut self, plan: &FetchPlan) -> Result<Vec<RawReport>> {
            self.plans.push(plan.clone());
            if self.fail {
                return Err(Error::Fetch("connection refused".into()));
            }
            Ok(vec![RawReport::Bulk(bulk_dataset(parse_metars(SAMPLE_BULK).unwrap()))])
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn registry() -> SharedRegistry {
        Registry::new(load_slots_json(SAMPLE_SLOTS).unwrap(), DuplicatePolicy::Warn)
            .unwrap()
            .into_shared()
    }

    fn build(
        config: Config,
        controls: &Arc<Controls>,
        strip: MemoryStrip,
        source: StubSource,
        clock: FakeClock,
    ) -> (RefreshLoop<MemoryStrip, StubSource, FakeClock>, SharedRegistry) {
        let registry = registry();
        let lp = RefreshLoop::new(
            config,
            registry.clone(),
            controls.clone(),
            strip,
            source,
            clock,
            bus_lock(),
        )
        .unwrap();
        (lp, registry)
    }

    fn shutdown_after(controls: &Arc<Controls>, secs: i64) -> impl Fn(DateTime<Utc>) + 'static {
        let controls = controls.clone();
        let stop = start() + chrono::Duration::seconds(secs);
        move |now| {
            if now >= stop {
                controls.request_shutdown();
            }
        }
    }

    #[test]
    fn sleep_window_wraps_midnight() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        let night = SleepSchedule::new(t(22, 0), t(6, 0), Duration::from_secs(600));
        assert!(night.is_asleep(t(23, 0)));
        assert!(night.is_asleep(t(2, 0)));
        assert!(!night.is_asleep(t(6, 0)));
        assert!(!night.is_asleep(t(12, 0)));

        let nap = SleepSchedule::new(t(13, 0), t(14, 0), Duration::ZERO);
        assert!(nap.is_asleep(t(13, 30)));
        assert!(!nap.is_asleep(t(14, 30)));
        assert!(!SleepSchedule::new(t(1, 0), t(1, 0), Duration::ZERO).is_asleep(t(1, 0)));
    }

    #[test]
    fn fetches_renders_and_blanks_on_shutdown() {
        let controls = Arc::new(Controls::new(Mode::Metar, 90));
        let clock = FakeClock::new(start(), shutdown_after(&controls, 10));
        let (mut lp, registry) = build(
            Config::default(),
            &controls,
            MemoryStrip::recording(2),
            StubSource::default(),
            clock,
        );
        lp.run().unwrap();

        assert_eq!(registry.read().current_category("KPAE"), crate::category::FlightCategory::Ifr);
        let history = lp.strip().history();
        assert_eq!(history[0], vec![led::COLOR_IFR, led::COLOR_VFR]);
        assert_eq!(history.last().unwrap(), &vec![COLOR_BLACK; 2]);
        assert_eq!(lp.strip().brightness(), 90);
        assert_eq!(lp.source().plans.len(), 1);
    }

    #[test]
    fn refetches_when_interval_elapses() {
        let controls = Arc::new(Controls::new(Mode::Metar, 40));
        let clock = FakeClock::new(start(), shutdown_after(&controls, 150));
        let config = Config::from_toml("[settings]\nupdate_interval_min = 1").unwrap();
        let (mut lp, _) = build(config, &controls, MemoryStrip::new(2), StubSource::default(), clock);
        lp.run().unwrap();
        assert_eq!(lp.source().plans.len(), 3);
    }

    #[test]
    fn manual_refresh_interrupts_render() {
        let controls = Arc::new(Controls::new(Mode::Metar, 40));
        let stop = shutdown_after(&controls, 20);
        let c = controls.clone();
        let pressed = std::cell::Cell::new(false);
        let clock = FakeClock::new(start(), move |now| {
            if now >= start() + chrono::Duration::seconds(5) && !pressed.get() {
                pressed.set(true);
                c.request_refresh();
            }
            stop(now);
        });
        let (mut lp, _) = build(Config::default(), &controls, MemoryStrip::new(2), StubSource::default(), clock);
        lp.run().unwrap();
        assert_eq!(lp.source().plans.len(), 2);
    }

    #[test]
    fn mode_change_refetches_with_new_source() {
        let controls = Arc::new(Controls::new(Mode::Metar, 40));
        let stop = shutdown_after(&controls, 20);
        let c = controls.clone();
        let clock = FakeClock::new(start(), move |now| {
            if now >= start() + chrono::Duration::seconds(5) {
                c.set_mode(Mode::Taf { offset_h: 3 });
            }
            stop(now);
        });
        let (mut lp, _) = build(Config::default(), &controls, MemoryStrip::new(2), StubSource::default(), clock);
        lp.run().unwrap();

        let plans = &lp.source().plans;
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].bulk, vec!["KPAE", "KSEA"]);
        assert_eq!(plans[1].taf, vec!["KPAE", "KSEA"]);
        assert_eq!(plans[1].offset_h, 3);
    }

    #[test]
    fn animation_modes_skip_fetching() {
        let controls = Arc::new(Controls::new("rainbow".parse().unwrap(), 40));
        let clock = FakeClock::new(start(), shutdown_after(&controls, 5));
        let (mut lp, _) = build(
            Config::default(),
            &controls,
            MemoryStrip::recording(2),
            StubSource::default(),
            clock,
        );
        lp.run().unwrap();
        assert!(lp.source().plans.is_empty());
        assert!(lp.strip().history().len() > 10);
    }

    #[test]
    fn failed_fetch_keeps_rendering() {
        let controls = Arc::new(Controls::new(Mode::Metar, 40));
        let clock = FakeClock::new(start(), shutdown_after(&controls, 5));
        let source = StubSource {
            fail: true,
            ..StubSource::default()
        };
        let (mut lp, registry) = build(Config::default(), &controls, MemoryStrip::recording(2), source, clock);
        lp.run().unwrap();
        assert!(registry.read().get_observation("KPAE").is_none());
        assert_eq!(lp.strip().history()[0], vec![led::COLOR_NO_WEATHER; 2]);
    }

    #[test]
    fn dropped_frames_do_not_stop_the_loop() {
        let controls = Arc::new(Controls::new(Mode::Metar, 40));
        let clock = FakeClock::new(start(), shutdown_after(&controls, 10));
        let mut strip = MemoryStrip::new(2);
        strip.fail_next_shows(2);
        let (mut lp, _) = build(Config::default(), &controls, strip, StubSource::default(), clock);
        lp.run().unwrap();
        assert_eq!(lp.dropped_frames(), 2);
        assert!(lp.strip().show_count() > 10);
    }

    #[test]
    fn sleep_window_blanks_until_wake_pressed() {
        let t0 = Utc.with_ymd_and_hms(2026, 10, 18, 21, 59, 50).unwrap();
        let controls = Arc::new(Controls::new(Mode::Metar, 40));
        let c = controls.clone();
        let pressed = std::cell::Cell::new(false);
        let clock = FakeClock::new(t0, move |now| {
            let elapsed = (now - t0).num_seconds();
            if elapsed >= 30 && !pressed.get() {
                pressed.set(true);
                c.request_wake();
            }
            if elapsed >= 60 {
                c.request_shutdown();
            }
        });
        let config = Config::from_toml("[sleep]\nenabled = true\noff_at = \"22:00\"\non_at = \"06:00\"").unwrap();
        let (mut lp, _) = build(config, &controls, MemoryStrip::recording(2), StubSource::default(), clock);
        lp.run().unwrap();

        // fetched before the window and again after the wake press
        assert_eq!(lp.source().plans.len(), 2);
        assert!(lp.strip().history().contains(&vec![COLOR_BLACK; 2]));
        assert_eq!(lp.state(), LoopState::Rendering);
    }
}
