use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use reqwest::blocking::Client;
use reqwest::header;
use wxmap_core::extract::{FetchPlan, RawReport, WeatherSource};
use wxmap_core::metar::{self, BulkDataset};
use wxmap_core::taf;
use wxmap_core::{Error, Result};

const USER_AGENT: &str = concat!("wxmap/", env!("CARGO_PKG_VERSION"));
const READ_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u8 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
/// Station ids per request; the data API rejects very long id lists.
const BATCH_SIZE: usize = 100;

/// Downloads METAR, TAF and MOS products over HTTPS.
pub struct HttpWeatherSource {
    client: Client,
    mos_url: String,
}

impl HttpWeatherSource {
    pub fn new(mos_url: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Fetch(format!("HTTP client setup: {e}")))?;
        Ok(Self {
            client,
            mos_url: mos_url.to_string(),
        })
    }

    fn get_with_retries(&self, url: &str) -> std::result::Result<String, reqwest::Error> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .get(url)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.text());
            match result {
                Ok(body) => {
                    debug!("GET {url}: {} bytes", body.len());
                    return Ok(body);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    warn!("GET {url} failed (attempt {attempt}/{MAX_RETRIES}): {e}");
                    thread::sleep(RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fetch_bulk(&self, codes: &[String], out: &mut Vec<RawReport>) -> usize {
        let mut failures = 0;
        let mut dataset = BulkDataset::new();
        for batch in codes.chunks(BATCH_SIZE) {
            let ids: Vec<&str> = batch.iter().map(String::as_str).collect();
            let parsed = self
                .get_with_retries(&metar::build_metar_url(&ids))
                .map_err(|e| Error::Fetch(e.to_string()))
                .and_then(|body| metar::parse_metars(&body));
            match parsed {
                Ok(reports) => dataset.extend(metar::bulk_dataset(reports)),
                Err(e) => {
                    error!("METAR batch of {} failed: {e}", batch.len());
                    failures += 1;
                }
            }
        }
        if !dataset.is_empty() {
            out.push(RawReport::Bulk(dataset));
        }
        failures
    }

    fn fetch_points(&self, codes: &[String], out: &mut Vec<RawReport>) -> usize {
        let mut failures = 0;
        for icao in codes {
            match self.get_with_retries(&metar::build_point_url(icao)) {
                Ok(body) => {
                    let text = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                    out.push(RawReport::Point {
                        icao: icao.clone(),
                        text: text.trim().to_string(),
                    });
                }
                Err(e) => {
                    error!("METAR for {icao} failed: {e}");
                    failures += 1;
                }
            }
        }
        failures
    }

    fn fetch_tafs(&self, codes: &[String], out: &mut Vec<RawReport>) -> usize {
        let mut failures = 0;
        for batch in codes.chunks(BATCH_SIZE) {
            let ids: Vec<&str> = batch.iter().map(String::as_str).collect();
            let parsed = self
                .get_with_retries(&taf::build_taf_url(&ids))
                .map_err(|e| Error::Fetch(e.to_string()))
                .and_then(|body| taf::parse_tafs(&body));
            match parsed {
                Ok(reports) => out.extend(reports.into_iter().map(RawReport::Taf)),
                Err(e) => {
                    error!("TAF batch of {} failed: {e}", batch.len());
                    failures += 1;
                }
            }
        }
        failures
    }
}

impl WeatherSource for HttpWeatherSource {
    fn fetch(&mut self, plan: &FetchPlan) -> Result<Vec<RawReport>> {
        let mut out = Vec::new();
        let mut failures = 0;
        failures += self.fetch_bulk(&plan.bulk, &mut out);
        failures += self.fetch_points(&plan.point, &mut out);
        failures += self.fetch_tafs(&plan.taf, &mut out);
        if !plan.mos.is_empty() {
            match self.get_with_retries(&self.mos_url) {
                Ok(body) => out.push(RawReport::Mos(body)),
                Err(e) => {
                    error!("MOS bulletin failed: {e}");
                    failures += 1;
                }
            }
        }

        if out.is_empty() && failures > 0 {
            return Err(Error::Fetch(format!("all {failures} requests failed")));
        }
        info!("Fetched {} reports ({failures} failed requests)", out.len());
        Ok(out)
    }
}
