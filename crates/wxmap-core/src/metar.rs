use std::collections::HashMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Deserialize;

use crate::category::{FlightCategory, UNKNOWN_VISIBILITY_MI};
use crate::error::{Error, Result};
use crate::observation::{
    ceiling_from_layers, CloudLayer, Measurements, Observation, Phenomena, Phenomenon, WxSource,
};

const METAR_BASE_URL: &str = "https://aviationweather.gov/api/data/metar?format=json&ids=";
const METAR_RAW_URL: &str = "https://aviationweather.gov/api/data/metar?format=raw&ids=";

const METERS_PER_MILE: f64 = 1609.344;
const MPS_TO_KT: f64 = 1.943_844;

/// One record of the bulk METAR dataset. Every field except the station id
/// may be missing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetarReport {
    pub icao_id: String,
    #[serde(default)]
    pub raw_ob: Option<String>,
    #[serde(default)]
    pub flt_cat: Option<String>,
    #[serde(default)]
    pub wspd: Option<u32>,
    #[serde(default)]
    pub wgst: Option<u32>,
    #[serde(default)]
    pub visib: Option<Visibility>,
    #[serde(default)]
    pub clouds: Vec<SkyCondition>,
    #[serde(default)]
    pub wx_string: Option<String>,
    #[serde(default)]
    pub obs_time: Option<i64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkyCondition {
    pub cover: String,
    #[serde(default)]
    pub base: Option<i32>,
}

/// Visibility is sent either as a number or as text such as `"10+"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Visibility {
    Miles(f64),
    Text(String),
}

impl Visibility {
    pub fn statute_miles(&self) -> Option<f64> {
        match self {
            Self::Miles(v) => Some(*v),
            Self::Text(s) => parse_miles(s.trim().trim_end_matches('+')),
        }
    }
}

impl MetarReport {
    pub fn cloud_layers(&self) -> Vec<CloudLayer> {
        self.clouds
            .iter()
            .map(|c| CloudLayer::new(&c.cover, c.base))
            .collect()
    }

    /// Normalize into an [`Observation`]. A reported flight category is
    /// trusted as-is; otherwise it is derived from ceiling and visibility.
    pub fn to_observation(&self, now: DateTime<Utc>) -> Result<Observation> {
        let icao = self.icao_id.trim();
        if icao.is_empty() {
            return Err(Error::parse("????", "report without station id"));
        }

        let observed_at = self
            .obs_time
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .unwrap_or(now);
        let mut fields = Measurements::new(icao, WxSource::AddsBulk, observed_at);
        fields.raw_text = self.raw_ob.clone();
        fields.wind_speed_kt = self.wspd.unwrap_or(0);
        fields.wind_gust_kt = self.wgst.unwrap_or(0);
        fields.ceiling_ft = ceiling_from_layers(&self.cloud_layers());
        fields.visibility_mi = self
            .visib
            .as_ref()
            .and_then(Visibility::statute_miles)
            .unwrap_or(UNKNOWN_VISIBILITY_MI);
        fields.phenomena = Phenomena::from_wx_string(self.wx_string.as_deref().unwrap_or(""));
        if self.raw_ob.as_deref().is_some_and(remarks_report_lightning) {
            fields.phenomena.insert(Phenomenon::Lightning);
        }

        let reported = self
            .flt_cat
            .as_deref()
            .and_then(|c| c.parse::<FlightCategory>().ok());
        Ok(match reported {
            Some(category) => Observation::reported(fields, category),
            None => Observation::classified(fields),
        })
    }
}

/// Bulk dataset keyed by lowercase ICAO id.
pub type BulkDataset = HashMap<String, MetarReport>;

/// Parse a JSON string containing an array of METAR reports.
pub fn parse_metars(json: &str) -> Result<Vec<MetarReport>> {
    let reports: Vec<MetarReport> = serde_json::from_str(json)?;
    Ok(reports)
}

/// Build the METAR API URL for the given airport codes.
pub fn build_metar_url(codes: &[&str]) -> String {
    let mut url = String::from(METAR_BASE_URL);
    url.push_str(&codes.join(","));
    url
}

/// Build the raw-text METAR URL for a single airport.
pub fn build_point_url(code: &str) -> String {
    format!("{METAR_RAW_URL}{code}")
}

/// Key reports by lowercase ICAO id. Later duplicates replace earlier ones.
pub fn bulk_dataset(reports: Vec<MetarReport>) -> BulkDataset {
    reports
        .into_iter()
        .map(|r| (r.icao_id.trim().to_ascii_lowercase(), r))
        .collect()
}

fn remarks_report_lightning(raw: &str) -> bool {
    raw.split_once(" RMK ")
        .is_some_and(|(_, rmk)| rmk.split_whitespace().any(|t| t.starts_with("LTG")))
}

/// Parse `"10"`, `"1/2"`, `"1 1/2"` style statute-mile figures.
fn parse_miles(s: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut any = false;
    for part in s.split_whitespace() {
        let value = match part.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().ok()?;
                let den: f64 = den.parse().ok()?;
                if den == 0.0 {
                    return None;
                }
                num / den
            }
            None => part.parse().ok()?,
        };
        total += value;
        any = true;
    }
    any.then_some(total)
}

/// Decode a raw METAR text report (point query).
pub fn parse_raw(text: &str, now: DateTime<Utc>) -> Result<Observation> {
    let mut tokens = text
        .split_whitespace()
        .skip_while(|t| matches!(*t, "METAR" | "SPECI"))
        .peekable();

    let station = tokens.next().ok_or_else(|| Error::parse("????", "empty report"))?;
    if !(3..=4).contains(&station.len()) || !station.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::parse(station, "malformed station id"));
    }
    if !text.is_ascii() {
        return Err(Error::parse(station, "non-ASCII characters in report"));
    }

    let mut observed_at = now;
    if let Some(t) = tokens.peek() {
        if let Some(at) = parse_report_time(t, now) {
            observed_at = at;
            tokens.next();
        }
    }

    let mut fields = Measurements::new(station, WxSource::PointQuery, observed_at);
    fields.raw_text = Some(text.trim().to_string());
    let mut layers = Vec::new();
    let mut visibility: Option<f64> = None;
    let mut seen_wind = false;
    let mut pending_whole: Option<f64> = None;

    while let Some(token) = tokens.next() {
        if token == "RMK" {
            break;
        }
        if let Some((speed, gust)) = parse_wind(token) {
            fields.wind_speed_kt = speed;
            fields.wind_gust_kt = gust;
            seen_wind = true;
            continue;
        }
        if token == "CAVOK" {
            visibility = Some(10.0);
            layers.push(CloudLayer::new("CAVOK", None));
            continue;
        }
        if let Some(sm) = token.strip_suffix("SM") {
            let sm = sm.trim_start_matches(['M', 'P']);
            let miles = parse_miles(sm)
                .ok_or_else(|| Error::parse(station, format!("bad visibility {token:?}")))?;
            visibility = Some(pending_whole.take().unwrap_or(0.0) + miles);
            continue;
        }
        if token.len() <= 2 && token.chars().all(|c| c.is_ascii_digit()) {
            // Whole part of a split visibility such as "1 1/2SM".
            if tokens.peek().is_some_and(|n| n.ends_with("SM") && n.contains('/')) {
                pending_whole = token.parse().ok();
                continue;
            }
        }
        if seen_wind
            && visibility.is_none()
            && token.len() == 4
            && token.chars().all(|c| c.is_ascii_digit())
        {
            let meters: f64 = token
                .parse()
                .map_err(|_| Error::parse(station, format!("bad visibility {token:?}")))?;
            visibility = Some(if meters >= 9999.0 { 10.0 } else { meters / METERS_PER_MILE });
            continue;
        }
        if let Some(layer) = parse_cloud(token) {
            layers.push(layer);
            continue;
        }
        fields.phenomena.merge(Phenomena::from_wx_group(token));
    }

    if remarks_report_lightning(text) {
        fields.phenomena.insert(Phenomenon::Lightning);
    }
    fields.ceiling_ft = ceiling_from_layers(&layers);
    fields.visibility_mi = visibility.unwrap_or(UNKNOWN_VISIBILITY_MI);
    Ok(Observation::classified(fields))
}

fn parse_wind(token: &str) -> Option<(u32, u32)> {
    if !token.is_ascii() {
        return None;
    }
    let (body, factor) = if let Some(b) = token.strip_suffix("KT") {
        (b, 1.0)
    } else if let Some(b) = token.strip_suffix("MPS") {
        (b, MPS_TO_KT)
    } else {
        return None;
    };
    if body.len() < 5 {
        return None;
    }
    let (dir, rest) = body.split_at(3);
    if dir != "VRB" && !dir.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (speed, gust) = match rest.split_once('G') {
        Some((s, g)) => (s.parse::<u32>().ok()?, g.parse::<u32>().ok()?),
        None => (rest.parse::<u32>().ok()?, 0),
    };
    let convert = |v: u32| (v as f64 * factor).round() as u32;
    Some((convert(speed), convert(gust)))
}

fn parse_cloud(token: &str) -> Option<CloudLayer> {
    if !token.is_ascii() {
        return None;
    }
    for cover in ["CLR", "SKC", "NSC", "NCD"] {
        if token == cover {
            return Some(CloudLayer::new(cover, None));
        }
    }
    let (cover, rest) = ["FEW", "SCT", "BKN", "OVC", "VV"]
        .iter()
        .find_map(|c| token.strip_prefix(c).map(|rest| (*c, rest)))?;
    if rest.len() < 3 {
        return None;
    }
    let height = &rest[..3];
    if height == "///" {
        return Some(CloudLayer::new(cover, None));
    }
    let hundreds: i32 = height.parse().ok()?;
    Some(CloudLayer::new(cover, Some(hundreds * 100)))
}

/// `DDHHMMZ` resolved against `now`; a day in the future means last month.
fn parse_report_time(token: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let digits = token.strip_suffix('Z')?;
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let day: u32 = digits[0..2].parse().ok()?;
    let hour: u32 = digits[2..4].parse().ok()?;
    let minute: u32 = digits[4..6].parse().ok()?;

    let this_month = Utc
        .with_ymd_and_hms(now.year(), now.month(), day, hour, minute, 0)
        .single();
    match this_month {
        Some(t) if t <= now + chrono::Duration::hours(1) => Some(t),
        _ => {
            let (year, month) = if now.month() == 1 {
                (now.year() - 1, 12)
            } else {
                (now.year(), now.month() - 1)
            };
            Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).single()
        }
    }
}
