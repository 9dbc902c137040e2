//! Normalizes every feed (bulk METAR, raw point METAR, TAF, MOS) into
//! [`Observation`]s with a single failure policy.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::metar::{self, BulkDataset};
use crate::mode::Mode;
use crate::mos::MosBulletin;
use crate::observation::{Observation, WxSource};
use crate::registry::Registry;
use crate::taf::TafReport;

/// A payload as delivered by a [`WeatherSource`], not yet decoded.
#[derive(Debug, Clone)]
pub enum RawReport {
    Bulk(BulkDataset),
    Point { icao: String, text: String },
    Taf(TafReport),
    Mos(String),
}

/// Which airports go to which feed for one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPlan {
    pub bulk: Vec<String>,
    pub point: Vec<String>,
    pub taf: Vec<String>,
    pub mos: Vec<String>,
    /// Forecast offset applied to TAF and MOS lookups.
    pub offset_h: u8,
}

impl FetchPlan {
    /// In METAR mode each slot uses its own feed; forecast modes route every
    /// airport to that forecast. Visual-only modes fetch nothing.
    pub fn for_mode(mode: Mode, registry: &Registry) -> Self {
        let mut plan = Self::default();
        let codes = registry.weather_slots().map(|s| (s.icao.clone(), s.wx_source));
        match mode {
            Mode::Metar => {
                for (icao, source) in codes {
                    match source {
                        WxSource::AddsBulk => plan.bulk.push(icao),
                        WxSource::PointQuery => plan.point.push(icao),
                        WxSource::TafForecast => plan.taf.push(icao),
                        WxSource::MosForecast => plan.mos.push(icao),
                    }
                }
            }
            Mode::Taf { offset_h } => {
                plan.taf = codes.map(|(icao, _)| icao).collect();
                plan.offset_h = offset_h;
            }
            Mode::Mos { offset_h } => {
                plan.mos = codes.map(|(icao, _)| icao).collect();
                plan.offset_h = offset_h;
            }
            Mode::Off | Mode::Test | Mode::Animation(_) => {}
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.bulk.len() + self.point.len() + self.taf.len() + self.mos.len()
    }

    pub fn forecast_target(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::hours(self.offset_h as i64)
    }
}

/// Collaborator that downloads the payloads a plan asks for.
pub trait WeatherSource {
    fn fetch(&mut self, plan: &FetchPlan) -> Result<Vec<RawReport>>;
}

pub struct Extractor {
    mos_threshold: u8,
}

impl Extractor {
    pub fn new(config: &Config) -> Self {
        Self {
            mos_threshold: config.mos.threshold_percent,
        }
    }

    /// Decode `reports` for every airport in `plan`.
    ///
    /// A report that fails to decode yields an UNKNOWN observation for that
    /// airport only. Airports with no report at all are skipped so the
    /// registry keeps (and eventually ages out) their previous observation.
    pub fn normalize(
        &self,
        plan: &FetchPlan,
        reports: Vec<RawReport>,
        now: DateTime<Utc>,
    ) -> Vec<Observation> {
        let mut bulk = BulkDataset::new();
        let mut points = HashMap::new();
        let mut tafs = HashMap::new();
        let mut bulletins = Vec::new();
        for report in reports {
            match report {
                RawReport::Bulk(data) => bulk.extend(data),
                RawReport::Point { icao, text } => {
                    points.insert(icao.trim().to_ascii_uppercase(), text);
                }
                RawReport::Taf(taf) => {
                    tafs.insert(taf.icao_id.trim().to_ascii_uppercase(), taf);
                }
                RawReport::Mos(text) => bulletins.push(MosBulletin::parse(&text)),
            }
        }

        let mut out = Vec::with_capacity(plan.len());
        let mut missing = Vec::new();

        for icao in &plan.bulk {
            match bulk.get(&icao.to_ascii_lowercase()) {
                Some(report) => out.push(settle(
                    icao,
                    report.raw_ob.as_deref(),
                    WxSource::AddsBulk,
                    now,
                    report.to_observation(now),
                )),
                None => missing.push(icao.as_str()),
            }
        }

        for icao in &plan.point {
            match points.get(icao.as_str()) {
                Some(text) => out.push(settle(
                    icao,
                    Some(text.as_str()),
                    WxSource::PointQuery,
                    now,
                    metar::parse_raw(text, now),
                )),
                None => missing.push(icao.as_str()),
            }
        }

        let target = plan.forecast_target(now);
        for icao in &plan.taf {
            match tafs.get(icao.as_str()) {
                Some(taf) => out.push(settle(
                    icao,
                    taf.raw_taf.as_deref(),
                    WxSource::TafForecast,
                    now,
                    taf.observation_at(target, now),
                )),
                None => missing.push(icao.as_str()),
            }
        }

        for icao in &plan.mos {
            let found = bulletins
                .iter()
                .map(|b| b.observation(icao, target, now, self.mos_threshold))
                .find(|r| !matches!(r, Ok(None)));
            match found {
                Some(Ok(Some(obs))) => out.push(obs),
                Some(Err(e)) => {
                    warn!("{icao}: {e}");
                    out.push(Observation::failed(icao, None, WxSource::MosForecast, now));
                }
                _ => missing.push(icao.as_str()),
            }
        }

        if !missing.is_empty() {
            warn!("No data this cycle for {} airports: {}", missing.len(), missing.join(","));
        }
        debug!("Normalized {} of {} airports", out.len(), plan.len());
        out
    }
}

fn settle(
    icao: &str,
    raw: Option<&str>,
    source: WxSource,
    now: DateTime<Utc>,
    decoded: Result<Observation>,
) -> Observation {
    decoded.unwrap_or_else(|e| {
        warn!("{icao}: {e}; raw input: {:?}", raw.unwrap_or(""));
        Observation::failed(icao, raw, source, now)
    })
}
