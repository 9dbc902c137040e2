//! GFS MOS (MAV) bulletin decoding.
//!
//! The bulletin is a positional text table: one block per station, one row
//! per element, one column per 3-hour forecast bucket. Columns are located
//! by the right edge of the `HR` row's cells; 6-hour elements (`P06`,
//! `T06`) sit under the column that closes their window.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use log::debug;

use crate::category::{UNKNOWN_CEILING_FT, UNKNOWN_VISIBILITY_MI, UNLIMITED_CEILING_FT};
use crate::error::{Error, Result};
use crate::observation::{Measurements, Observation, Phenomena, Phenomenon, WxSource};

pub const DEFAULT_MOS_URL: &str = "https://www.nws.noaa.gov/mdl/forecast/text/avnmav.txt";

/// Forecast hour bucket (UTC): 00, 03, ... 21.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourBucket(u8);

impl HourBucket {
    pub fn new(hour: u8) -> Option<Self> {
        (hour < 24 && hour % 3 == 0).then_some(Self(hour))
    }

    /// Bucket whose 3-hour span contains `hour`.
    pub fn containing(hour: u32) -> Self {
        Self(((hour % 24) / 3 * 3) as u8)
    }

    pub fn hour(self) -> u8 {
        self.0
    }
}

impl fmt::Display for HourBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudCover {
    Clear,
    Few,
    Scattered,
    Broken,
    Overcast,
}

impl CloudCover {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "CL" => Some(Self::Clear),
            "FW" => Some(Self::Few),
            "SC" => Some(Self::Scattered),
            "BK" => Some(Self::Broken),
            "OV" => Some(Self::Overcast),
            _ => None,
        }
    }

    fn is_ceiling(self) -> bool {
        matches!(self, Self::Broken | Self::Overcast)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecipType {
    Rain,
    Snow,
    Freezing,
}

/// Decoded elements of one forecast bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastFields {
    pub cloud_cover: Option<CloudCover>,
    pub ceiling_code: Option<u8>,
    pub visibility_code: Option<u8>,
    pub wind_speed_kt: Option<u32>,
    pub precip_type: Option<PrecipType>,
    pub precip_chance: Option<u8>,
    pub thunder_chance: Option<u8>,
    pub obstruction: Option<String>,
}

/// Representative ceiling (ft) for MOS ceiling categories 1-8.
const CEILING_PROXY_FT: [i32; 10] = [
    UNKNOWN_CEILING_FT,
    100,
    300,
    700,
    1500,
    2500,
    4800,
    9300,
    UNLIMITED_CEILING_FT,
    UNKNOWN_CEILING_FT,
];

/// Representative visibility (SM) for MOS visibility categories 1-7.
const VISIBILITY_PROXY_MI: [f64; 10] = [
    UNKNOWN_VISIBILITY_MI,
    0.25,
    0.75,
    1.5,
    2.5,
    4.0,
    6.0,
    10.0,
    UNKNOWN_VISIBILITY_MI,
    UNKNOWN_VISIBILITY_MI,
];

impl ForecastFields {
    pub fn ceiling_ft(&self) -> i32 {
        if self.cloud_cover.is_some_and(|c| !c.is_ceiling()) {
            return UNLIMITED_CEILING_FT;
        }
        self.ceiling_code
            .and_then(|c| CEILING_PROXY_FT.get(c as usize).copied())
            .unwrap_or(UNKNOWN_CEILING_FT)
    }

    pub fn visibility_mi(&self) -> f64 {
        self.visibility_code
            .and_then(|c| VISIBILITY_PROXY_MI.get(c as usize).copied())
            .unwrap_or(UNKNOWN_VISIBILITY_MI)
    }

    /// Phenomena whose forecast probability reaches `threshold` percent.
    pub fn phenomena(&self, threshold: u8) -> Phenomena {
        let mut set = Phenomena::empty();
        if self.precip_chance.is_some_and(|p| p >= threshold) {
            match self.precip_type {
                Some(PrecipType::Rain) => set.insert(Phenomenon::Rain),
                Some(PrecipType::Snow) => set.insert(Phenomenon::Snow),
                Some(PrecipType::Freezing) => set.insert(Phenomenon::FreezingRain),
                None => {}
            }
        }
        if self.thunder_chance.is_some_and(|p| p >= threshold) {
            set.insert(Phenomenon::Lightning);
        }
        if matches!(self.obstruction.as_deref(), Some("FG") | Some("BR")) {
            set.insert(Phenomenon::Fog);
        }
        set
    }
}

pub type StationForecast = BTreeMap<HourBucket, ForecastFields>;

#[derive(Debug, Default)]
pub struct MosBulletin {
    stations: HashMap<String, StationForecast>,
    failures: HashMap<String, String>,
}

impl MosBulletin {
    /// Decode every station block. A malformed block is recorded as a
    /// failure for that station only.
    pub fn parse(text: &str) -> Self {
        let mut bulletin = Self::default();
        for (icao, lines) in station_blocks(text) {
            match parse_station(&lines) {
                Ok(forecast) => {
                    bulletin.failures.remove(&icao);
                    bulletin.stations.entry(icao).or_insert(forecast);
                }
                Err(reason) => {
                    debug!("MOS block for {icao} rejected: {reason}");
                    if !bulletin.stations.contains_key(&icao) {
                        bulletin.failures.insert(icao, reason);
                    }
                }
            }
        }
        bulletin
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn station(&self, icao: &str) -> Option<&StationForecast> {
        self.stations.get(&icao.to_ascii_uppercase())
    }

    pub fn failure(&self, icao: &str) -> Option<&str> {
        self.failures.get(&icao.to_ascii_uppercase()).map(String::as_str)
    }

    /// Observation for the bucket containing `target`. `Ok(None)` when the
    /// station is absent from the bulletin.
    pub fn observation(
        &self,
        icao: &str,
        target: DateTime<Utc>,
        now: DateTime<Utc>,
        threshold: u8,
    ) -> Result<Option<Observation>> {
        if let Some(reason) = self.failure(icao) {
            return Err(Error::parse(icao, reason));
        }
        let Some(station) = self.station(icao) else {
            return Ok(None);
        };
        let bucket = HourBucket::containing(target.hour());
        let fields = station
            .get(&bucket)
            .ok_or_else(|| Error::parse(icao, format!("no MOS column for hour {bucket}")))?;

        let mut m = Measurements::new(icao, WxSource::MosForecast, now);
        m.ceiling_ft = fields.ceiling_ft();
        m.visibility_mi = fields.visibility_mi();
        m.wind_speed_kt = fields.wind_speed_kt.unwrap_or(0);
        m.phenomena = fields.phenomena(threshold);
        Ok(Some(Observation::classified(m)))
    }
}

fn is_station_header(line: &str) -> bool {
    line.contains("MOS GUIDANCE")
}

fn station_blocks(text: &str) -> Vec<(String, Vec<&str>)> {
    let mut blocks: Vec<(String, Vec<&str>)> = Vec::new();
    for line in text.lines() {
        if is_station_header(line) {
            if let Some(icao) = line.split_whitespace().next() {
                blocks.push((icao.to_ascii_uppercase(), Vec::new()));
            }
        } else if let Some((_, lines)) = blocks.last_mut() {
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
    }
    blocks
}

/// Tokens after the row label with their exclusive end offsets.
fn cells(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices().chain(std::iter::once((line.len(), ' '))) {
        match (c.is_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                out.push((i, &line[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    out.into_iter().skip(1).collect()
}

/// `T06` cells look like `12/ 4`: thunder chance before the slash,
/// severe chance after it. Returns (end offset, thunder chance).
fn thunder_cells(line: &str) -> std::result::Result<Vec<(usize, u8)>, String> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    for (i, b) in bytes.iter().enumerate() {
        if *b != b'/' {
            continue;
        }
        let start = (0..i)
            .rev()
            .take_while(|&j| bytes[j].is_ascii_digit())
            .last()
            .unwrap_or(i);
        let chance: u8 = line[start..i]
            .parse()
            .map_err(|_| format!("bad T06 cell near offset {i}"))?;
        let mut end = i + 1;
        while end < bytes.len() && bytes[end] == b' ' {
            end += 1;
        }
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        out.push((end, chance));
    }
    Ok(out)
}

fn numeric<T: std::str::FromStr>(row: &str, cell: &str) -> std::result::Result<T, String> {
    cell.parse()
        .map_err(|_| format!("non-numeric {row} value {cell:?}"))
}

fn parse_station(lines: &[&str]) -> std::result::Result<StationForecast, String> {
    let hr_line = lines
        .iter()
        .find(|l| l.split_whitespace().next() == Some("HR"))
        .ok_or("missing HR row")?;

    let mut ends = Vec::new();
    let mut buckets = Vec::new();
    for (end, cell) in cells(hr_line) {
        let hour: u8 = numeric("HR", cell)?;
        let bucket = HourBucket::new(hour).ok_or(format!("invalid hour bucket {cell:?}"))?;
        ends.push(end);
        buckets.push(bucket);
    }
    if buckets.is_empty() {
        return Err("empty HR row".to_string());
    }

    let column = |end: usize| ends.iter().position(|e| *e == end);
    let mut columns = vec![ForecastFields::default(); buckets.len()];
    let mut p06 = vec![None; buckets.len()];
    let mut t06 = vec![None; buckets.len()];

    for line in lines {
        let Some(label) = line.split_whitespace().next() else {
            continue;
        };
        if label == "T06" {
            for (end, chance) in thunder_cells(line)? {
                if let Some(k) = column(end) {
                    t06[k] = Some(chance);
                }
            }
            continue;
        }
        for (end, cell) in cells(line) {
            let Some(k) = column(end) else {
                continue;
            };
            let fields = &mut columns[k];
            match label {
                "CLD" => fields.cloud_cover = CloudCover::from_code(cell),
                "CIG" => fields.ceiling_code = Some(numeric(label, cell)?),
                "VIS" => fields.visibility_code = Some(numeric(label, cell)?),
                "WSP" => fields.wind_speed_kt = Some(numeric(label, cell)?),
                "P06" => p06[k] = Some(numeric(label, cell)?),
                "TYP" => {
                    fields.precip_type = match cell {
                        "R" => Some(PrecipType::Rain),
                        "S" => Some(PrecipType::Snow),
                        "Z" => Some(PrecipType::Freezing),
                        _ => None,
                    }
                }
                "OBV" => fields.obstruction = (cell != "N").then(|| cell.to_string()),
                _ => {}
            }
        }
    }

    // A 6-hour value belongs to its closing column and the one before it.
    let spread = |values: &[Option<u8>], k: usize| values[k].or(values.get(k + 1).copied().flatten());
    let mut forecast = StationForecast::new();
    for (k, mut fields) in columns.into_iter().enumerate() {
        fields.precip_chance = spread(&p06, k);
        fields.thunder_chance = spread(&t06, k);
        forecast.entry(buckets[k]).or_insert(fields);
    }
    Ok(forecast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::FlightCategory;
    use chrono::TimeZone;

    /// Lay cells out the way the bulletin does: a 5-character label field,
    /// then 3-character right-aligned columns.
    fn row(label: &str, cells: &[(usize, &str)]) -> String {
        let mut line: Vec<char> = format!(" {label:<4}").chars().collect();
        for (col, text) in cells {
            let end = 8 + 3 * col;
            if line.len() < end {
                line.resize(end, ' ');
            }
            let start = end - text.len();
            for (i, c) in text.chars().enumerate() {
                line[start + i] = c;
            }
        }
        line.into_iter().collect()
    }

    fn full(label: &str, values: &[&str]) -> String {
        let cells: Vec<(usize, &str)> = values.iter().copied().enumerate().collect();
        row(label, &cells)
    }

    fn bulletin() -> String {
        let hours = ["18", "21", "00", "03", "06", "09", "12", "15", "18", "21"];
        let block = |icao: &str, cig: &[&str], cld: &[&str]| {
            [
                format!(" {icao}   GFS MOS GUIDANCE    10/18/2026  1200 UTC"),
                " DT /OCT  18/OCT  19                /OCT  20".to_string(),
                full("HR", &hours),
                full("CLD", cld),
                full("WSP", &["05", "12", "22", "08", "03", "03", "02", "05", "06", "07"]),
                row("P06", &[(2, "9"), (4, "45"), (6, "80"), (8, "10")]),
                row("T06", &[(2, "0/ 0"), (4, "35/ 2"), (6, "2/ 0"), (8, "0/ 0")]),
                full("POZ", &["0"; 10]),
                full("POS", &["0"; 10]),
                full("TYP", &["R", "R", "R", "R", "S", "S", "Z", "Z", "R", "R"]),
                full("CIG", cig),
                full("VIS", &["7", "7", "5", "3", "7", "7", "2", "7", "7", "7"]),
                full("OBV", &["N", "N", "BR", "N", "N", "N", "FG", "N", "N", "N"]),
                String::new(),
            ]
            .join("\n")
        };
        let cld = ["OV", "BK", "OV", "OV", "SC", "CL", "OV", "OV", "FW", "OV"];
        let cig = ["7", "4", "3", "5", "8", "8", "1", "6", "8", "8"];
        let mut text = block("KSEA", &cig, &cld);
        text.push_str(&block("KPAE", &["8"; 10], &["CL"; 10]));
        // Garbled ceiling row for one station only.
        text.push_str(&block("KBLI", &["7", "X", "3", "5", "8", "8", "1", "6", "8", "8"], &cld));
        text
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 17, 0, 0).unwrap()
    }

    #[test]
    fn hour_buckets_are_validated() {
        assert!(HourBucket::new(3).is_some());
        assert!(HourBucket::new(4).is_none());
        assert!(HourBucket::new(24).is_none());
        assert_eq!(HourBucket::containing(23).hour(), 21);
        assert_eq!(HourBucket::containing(0).to_string(), "00");
    }

    #[test]
    fn parses_station_blocks() {
        let mos = MosBulletin::parse(&bulletin());
        assert_eq!(mos.len(), 2);
        let sea = mos.station("ksea").unwrap();
        assert_eq!(sea.len(), 8);
        let b21 = &sea[&HourBucket::new(21).unwrap()];
        assert_eq!(b21.cloud_cover, Some(CloudCover::Broken));
        assert_eq!(b21.ceiling_code, Some(4));
        assert_eq!(b21.wind_speed_kt, Some(12));
    }

    #[test]
    fn first_occurrence_of_a_bucket_wins() {
        let mos = MosBulletin::parse(&bulletin());
        let b18 = &mos.station("KSEA").unwrap()[&HourBucket::new(18).unwrap()];
        assert_eq!(b18.ceiling_code, Some(7));
    }

    #[test]
    fn six_hour_values_cover_two_columns() {
        let mos = MosBulletin::parse(&bulletin());
        let sea = mos.station("KSEA").unwrap();
        let b03 = &sea[&HourBucket::new(3).unwrap()];
        let b06 = &sea[&HourBucket::new(6).unwrap()];
        assert_eq!(b03.precip_chance, Some(45));
        assert_eq!(b06.precip_chance, Some(45));
        assert_eq!(b03.thunder_chance, Some(35));
    }

    #[test]
    fn observation_for_target_hour() {
        let mos = MosBulletin::parse(&bulletin());
        // 21Z: broken ceiling code 4 (1000-1900 ft) -> MVFR.
        let target = Utc.with_ymd_and_hms(2026, 10, 18, 22, 0, 0).unwrap();
        let obs = mos.observation("KSEA", target, now(), 30).unwrap().unwrap();
        assert_eq!(obs.category(), FlightCategory::Mvfr);
        assert_eq!(obs.wind_speed_kt(), 12);
        assert_eq!(obs.source(), WxSource::MosForecast);

        // 12Z: ceiling code 1, visibility code 2 -> LIFR with freezing rain and fog.
        let target = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let obs = mos.observation("KSEA", target, now(), 30).unwrap().unwrap();
        assert_eq!(obs.category(), FlightCategory::Lifr);
        assert!(obs.phenomena().contains(Phenomenon::FreezingRain));
        assert!(obs.phenomena().contains(Phenomenon::Fog));
    }

    #[test]
    fn precipitation_below_threshold_is_not_tagged() {
        let mos = MosBulletin::parse(&bulletin());
        let target = Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap();
        let obs = mos.observation("KSEA", target, now(), 30).unwrap().unwrap();
        assert!(obs.phenomena().contains(Phenomenon::Rain));
        assert!(obs.phenomena().contains(Phenomenon::Lightning));

        let obs = mos.observation("KSEA", target, now(), 50).unwrap().unwrap();
        assert!(!obs.phenomena().contains(Phenomenon::Rain));
        assert!(!obs.phenomena().contains(Phenomenon::Lightning));
    }

    #[test]
    fn clear_sky_ignores_ceiling_code() {
        let mos = MosBulletin::parse(&bulletin());
        let target = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let obs = mos.observation("KSEA", target, now(), 30).unwrap().unwrap();
        assert_eq!(obs.ceiling_ft(), UNLIMITED_CEILING_FT);
        assert_eq!(obs.category(), FlightCategory::Vfr);
    }

    #[test]
    fn malformed_station_fails_alone() {
        let mos = MosBulletin::parse(&bulletin());
        assert!(mos.failure("KBLI").is_some());
        assert!(mos.observation("KBLI", now(), now(), 30).is_err());
        assert!(mos.observation("KPAE", now(), now(), 30).unwrap().is_some());
        assert!(mos.observation("KXYZ", now(), now(), 30).unwrap().is_none());
    }

    #[test]
    fn later_good_block_clears_earlier_failure() {
        let text = bulletin();
        let start = text.find(" KPAE ").unwrap();
        let end = text.find(" KBLI ").unwrap();
        let good = text[start..end].replace("KPAE", "KBLI");

        let mos = MosBulletin::parse(&format!("{text}{good}"));
        assert!(mos.failure("KBLI").is_none());
        assert!(mos.observation("KBLI", now(), now(), 30).unwrap().is_some());

        let mos = MosBulletin::parse(&format!("{good}{text}"));
        assert!(mos.failure("KBLI").is_none());
        assert_eq!(mos.len(), 3);
    }

    #[test]
    fn thunder_cells_locate_closing_column() {
        let line = row("T06", &[(2, "0/ 0"), (4, "35/12")]);
        let cells = thunder_cells(&line).unwrap();
        assert_eq!(cells, vec![(14, 0), (20, 35)]);
    }
}
