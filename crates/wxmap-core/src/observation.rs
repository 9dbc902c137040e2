use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::category::{
    classify, FlightCategory, UNKNOWN_CEILING_FT, UNKNOWN_VISIBILITY_MI, UNLIMITED_CEILING_FT,
};

/// Which feed produced an observation (and which feed a slot asks for).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WxSource {
    #[default]
    #[serde(rename = "adds", alias = "metar", alias = "ADDS")]
    AddsBulk,
    #[serde(rename = "point", alias = "POINT")]
    PointQuery,
    #[serde(rename = "mos", alias = "MOS")]
    MosForecast,
    #[serde(rename = "taf", alias = "TAF")]
    TafForecast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phenomenon {
    Lightning,
    Snow,
    Rain,
    FreezingRain,
    DustSandAsh,
    Fog,
}

impl Phenomenon {
    pub const ALL: [Phenomenon; 6] = [
        Phenomenon::Lightning,
        Phenomenon::Snow,
        Phenomenon::Rain,
        Phenomenon::FreezingRain,
        Phenomenon::DustSandAsh,
        Phenomenon::Fog,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Small set of weather phenomena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Phenomena(u8);

impl Phenomena {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, p: Phenomenon) {
        self.0 |= p.bit();
    }

    pub fn contains(&self, p: Phenomenon) -> bool {
        self.0 & p.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Phenomenon> + '_ {
        Phenomenon::ALL.into_iter().filter(|p| self.contains(*p))
    }

    /// Decode a space-separated METAR weather string (e.g. `"-FZRA BR"`).
    pub fn from_wx_string(wx: &str) -> Self {
        let mut set = Self::empty();
        for group in wx.split_whitespace() {
            set.merge(Self::from_wx_group(group));
        }
        set
    }

    /// Decode one present-weather group such as `+TSRA` or `VCSH`.
    pub fn from_wx_group(group: &str) -> Self {
        let mut set = Self::empty();
        let body = group.trim_start_matches(['+', '-']);
        let body = body.strip_prefix("VC").unwrap_or(body);
        if body.len() < 2 || body.len() % 2 != 0 || !body.chars().all(|c| c.is_ascii_uppercase()) {
            return set;
        }

        let codes: Vec<&str> = (0..body.len()).step_by(2).map(|i| &body[i..i + 2]).collect();
        let freezing = codes.contains(&"FZ");
        for code in codes {
            match code {
                "TS" => set.insert(Phenomenon::Lightning),
                "RA" | "DZ" if freezing => set.insert(Phenomenon::FreezingRain),
                "RA" | "DZ" => set.insert(Phenomenon::Rain),
                "SN" | "SG" | "PL" => set.insert(Phenomenon::Snow),
                "DU" | "SA" | "VA" | "DS" | "SS" | "PO" => set.insert(Phenomenon::DustSandAsh),
                "FG" | "BR" => set.insert(Phenomenon::Fog),
                _ => {}
            }
        }
        set
    }

    pub fn merge(&mut self, other: Phenomena) {
        self.0 |= other.0;
    }
}

impl fmt::Debug for Phenomena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for Phenomena {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl FromIterator<Phenomenon> for Phenomena {
    fn from_iter<I: IntoIterator<Item = Phenomenon>>(iter: I) -> Self {
        let mut set = Self::empty();
        for p in iter {
            set.insert(p);
        }
        set
    }
}

/// One reported sky layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudLayer {
    pub cover: String,
    pub base_ft: Option<i32>,
}

impl CloudLayer {
    pub fn new(cover: &str, base_ft: Option<i32>) -> Self {
        Self {
            cover: cover.to_ascii_uppercase(),
            base_ft,
        }
    }
}

const CLEAR_SKY: &[&str] = &["CLR", "SKC", "NSC", "NCD", "CAVOK"];
const CEILING_COVERS: &[&str] = &["BKN", "OVC", "VV", "OVX"];

/// Lowest broken/overcast/obscured layer, [`UNLIMITED_CEILING_FT`] when there
/// is none, and [`UNKNOWN_CEILING_FT`] as soon as a layer lacks its altitude.
pub fn ceiling_from_layers(layers: &[CloudLayer]) -> i32 {
    let mut ceiling = UNLIMITED_CEILING_FT;
    for layer in layers {
        if CLEAR_SKY.contains(&layer.cover.as_str()) {
            continue;
        }
        let Some(base) = layer.base_ft else {
            return UNKNOWN_CEILING_FT;
        };
        if CEILING_COVERS.contains(&layer.cover.as_str()) {
            ceiling = ceiling.min(base);
        }
    }
    ceiling
}

/// Decoded fields of a report before a category is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurements {
    pub icao: String,
    pub raw_text: Option<String>,
    pub ceiling_ft: i32,
    pub visibility_mi: f64,
    pub wind_speed_kt: u32,
    pub wind_gust_kt: u32,
    pub phenomena: Phenomena,
    pub observed_at: DateTime<Utc>,
    pub source: WxSource,
}

impl Measurements {
    pub fn new(icao: &str, source: WxSource, observed_at: DateTime<Utc>) -> Self {
        Self {
            icao: icao.trim().to_ascii_uppercase(),
            raw_text: None,
            ceiling_ft: UNKNOWN_CEILING_FT,
            visibility_mi: UNKNOWN_VISIBILITY_MI,
            wind_speed_kt: 0,
            wind_gust_kt: 0,
            phenomena: Phenomena::empty(),
            observed_at,
            source,
        }
    }
}

/// How the category of an observation was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryBasis {
    /// Ceiling/visibility decision table.
    Classified,
    /// Category reported by the source and trusted as-is.
    Reported,
    /// Forecast rule: ceiling category, downgraded by visibility only.
    ForecastDowngrade,
    /// Report could not be decoded.
    Failed,
}

/// One airport's current weather snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    fields: Measurements,
    category: FlightCategory,
    basis: CategoryBasis,
}

impl Observation {
    pub fn classified(mut fields: Measurements) -> Self {
        fields.icao = fields.icao.trim().to_ascii_uppercase();
        let category = classify(fields.ceiling_ft, fields.visibility_mi);
        Self {
            fields,
            category,
            basis: CategoryBasis::Classified,
        }
    }

    pub fn reported(mut fields: Measurements, category: FlightCategory) -> Self {
        fields.icao = fields.icao.trim().to_ascii_uppercase();
        Self {
            fields,
            category,
            basis: CategoryBasis::Reported,
        }
    }

    /// Forecast periods: category from the ceiling, then only a worse
    /// visibility category may replace it.
    pub fn forecast(mut fields: Measurements) -> Self {
        fields.icao = fields.icao.trim().to_ascii_uppercase();
        let mut category = FlightCategory::from_ceiling(fields.ceiling_ft);
        if category != FlightCategory::Lifr {
            let by_vis = FlightCategory::from_visibility(fields.visibility_mi);
            category = category.worse(by_vis);
        }
        Self {
            fields,
            category,
            basis: CategoryBasis::ForecastDowngrade,
        }
    }

    pub fn failed(icao: &str, raw_text: Option<&str>, source: WxSource, at: DateTime<Utc>) -> Self {
        let mut fields = Measurements::new(icao, source, at);
        fields.raw_text = raw_text.map(str::to_string);
        Self {
            fields,
            category: FlightCategory::Unknown,
            basis: CategoryBasis::Failed,
        }
    }

    pub fn icao(&self) -> &str {
        &self.fields.icao
    }

    pub fn raw_text(&self) -> Option<&str> {
        self.fields.raw_text.as_deref()
    }

    pub fn ceiling_ft(&self) -> i32 {
        self.fields.ceiling_ft
    }

    pub fn visibility_mi(&self) -> f64 {
        self.fields.visibility_mi
    }

    pub fn wind_speed_kt(&self) -> u32 {
        self.fields.wind_speed_kt
    }

    pub fn wind_gust_kt(&self) -> u32 {
        self.fields.wind_gust_kt
    }

    pub fn max_wind(&self) -> u32 {
        self.fields.wind_speed_kt.max(self.fields.wind_gust_kt)
    }

    pub fn phenomena(&self) -> Phenomena {
        self.fields.phenomena
    }

    pub fn category(&self) -> FlightCategory {
        self.category
    }

    pub fn basis(&self) -> CategoryBasis {
        self.basis
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.fields.observed_at
    }

    pub fn source(&self) -> WxSource {
        self.fields.source
    }

    pub fn measurements(&self) -> &Measurements {
        &self.fields
    }

    pub fn is_stale(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
        now - self.fields.observed_at > expiry
    }
}
