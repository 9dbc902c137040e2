use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::category::UNKNOWN_VISIBILITY_MI;
use crate::error::{Error, Result};
use crate::metar::{SkyCondition, Visibility};
use crate::observation::{
    ceiling_from_layers, CloudLayer, Measurements, Observation, Phenomena, WxSource,
};

const TAF_BASE_URL: &str = "https://aviationweather.gov/api/data/taf?format=json&ids=";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TafReport {
    pub icao_id: String,
    #[serde(default, rename = "rawTAF")]
    pub raw_taf: Option<String>,
    #[serde(default)]
    pub fcsts: Vec<TafPeriod>,
}

/// One forecast period, valid over `[time_from, time_to)` (unix seconds).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TafPeriod {
    pub time_from: i64,
    pub time_to: i64,
    #[serde(default)]
    pub fcst_change: Option<String>,
    #[serde(default)]
    pub wspd: Option<u32>,
    #[serde(default)]
    pub wgst: Option<u32>,
    #[serde(default)]
    pub visib: Option<Visibility>,
    #[serde(default)]
    pub wx_string: Option<String>,
    #[serde(default)]
    pub clouds: Vec<SkyCondition>,
}

impl TafPeriod {
    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        let t = t.timestamp();
        self.time_from <= t && t < self.time_to
    }

    /// TEMPO and PROB groups describe temporary conditions layered over the
    /// prevailing forecast.
    fn is_temporary(&self) -> bool {
        self.fcst_change
            .as_deref()
            .is_some_and(|c| c.starts_with("TEMPO") || c.starts_with("PROB"))
    }
}

impl TafReport {
    /// The prevailing period covering `target`; a temporary group is used
    /// only when nothing else covers it.
    pub fn period_at(&self, target: DateTime<Utc>) -> Option<&TafPeriod> {
        let covering = || self.fcsts.iter().filter(|p| p.covers(target));
        covering()
            .filter(|p| !p.is_temporary())
            .last()
            .or_else(|| covering().next())
    }

    /// Normalize the period valid at `target` into an [`Observation`].
    pub fn observation_at(&self, target: DateTime<Utc>, now: DateTime<Utc>) -> Result<Observation> {
        let icao = self.icao_id.trim();
        let period = self
            .period_at(target)
            .ok_or_else(|| Error::parse(icao, format!("no forecast period covers {target}")))?;

        let layers: Vec<CloudLayer> = period
            .clouds
            .iter()
            .map(|c| CloudLayer::new(&c.cover, c.base))
            .collect();

        let mut fields = Measurements::new(icao, WxSource::TafForecast, now);
        fields.raw_text = self.raw_taf.clone();
        fields.ceiling_ft = ceiling_from_layers(&layers);
        fields.visibility_mi = period
            .visib
            .as_ref()
            .and_then(Visibility::statute_miles)
            .unwrap_or(UNKNOWN_VISIBILITY_MI);
        fields.wind_speed_kt = period.wspd.unwrap_or(0);
        fields.wind_gust_kt = period.wgst.unwrap_or(0);
        fields.phenomena = Phenomena::from_wx_string(period.wx_string.as_deref().unwrap_or(""));
        Ok(Observation::forecast(fields))
    }
}

pub fn parse_tafs(json: &str) -> Result<Vec<TafReport>> {
    let reports: Vec<TafReport> = serde_json::from_str(json)?;
    Ok(reports)
}

pub fn build_taf_url(codes: &[&str]) -> String {
    let mut url = String::from(TAF_BASE_URL);
    url.push_str(&codes.join(","));
    url
}
