use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::category::FlightCategory;
use crate::config::DuplicatePolicy;
use crate::error::{Error, Result};
use crate::led::SpecialCode;
use crate::observation::{Observation, Phenomena, WxSource};

/// Which list a slot appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Led,
    Web,
    #[default]
    All,
}

impl Purpose {
    pub fn on_strip(self) -> bool {
        matches!(self, Self::Led | Self::All)
    }

    pub fn on_web(self) -> bool {
        matches!(self, Self::Web | Self::All)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Airport,
    /// Placeholder or legend position, never fetched.
    Special(SpecialCode),
}

/// Record shape of the airport slot file.
#[derive(Debug, Deserialize)]
struct SlotRecord {
    icao: String,
    #[serde(default)]
    led: Option<usize>,
    #[serde(default)]
    wxsrc: WxSource,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    purpose: Purpose,
    #[serde(default, alias = "latitude")]
    lat: Option<f64>,
    #[serde(default, alias = "longitude")]
    lon: Option<f64>,
}

fn default_active() -> bool {
    true
}

/// Static binding of an airport (or legend code) to a strip position.
#[derive(Debug, Clone, PartialEq)]
pub struct AirportSlot {
    pub icao: String,
    pub led_index: Option<usize>,
    pub purpose: Purpose,
    pub active: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub wx_source: WxSource,
    kind: SlotKind,
    owner: bool,
}

impl AirportSlot {
    pub fn new(icao: &str, led_index: Option<usize>) -> Self {
        let icao = icao.trim().to_ascii_uppercase();
        let kind = match SpecialCode::from_code(&icao) {
            Some(code) => SlotKind::Special(code),
            None => SlotKind::Airport,
        };
        Self {
            icao,
            led_index,
            purpose: Purpose::default(),
            active: true,
            latitude: None,
            longitude: None,
            wx_source: WxSource::default(),
            kind,
            owner: false,
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn is_airport(&self) -> bool {
        self.kind == SlotKind::Airport
    }

    /// Whether this slot receives observation writes for its ICAO code.
    /// Only the first active slot per code (in file order) does.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

impl From<SlotRecord> for AirportSlot {
    fn from(r: SlotRecord) -> Self {
        let mut slot = AirportSlot::new(&r.icao, r.led);
        slot.purpose = r.purpose;
        slot.active = r.active;
        slot.latitude = r.lat;
        slot.longitude = r.lon;
        slot.wx_source = r.wxsrc;
        slot
    }
}

/// Parse the JSON airport slot list.
pub fn load_slots_json(json: &str) -> Result<Vec<AirportSlot>> {
    let records: Vec<SlotRecord> = serde_json::from_str(json)?;
    Ok(records.into_iter().map(AirportSlot::from).collect())
}

/// Airport slots plus the latest observation per ICAO code.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Vec<AirportSlot>,
    /// slot indices ordered by LED position
    led_order: Vec<usize>,
    owners: HashMap<String, usize>,
    observations: HashMap<String, Observation>,
}

pub type SharedRegistry = Arc<RwLock<Registry>>;

impl Registry {
    /// Validate LED positions and resolve which slot owns each ICAO code.
    pub fn new(mut slots: Vec<AirportSlot>, policy: DuplicatePolicy) -> Result<Self> {
        let mut by_led: BTreeMap<usize, usize> = BTreeMap::new();
        for (i, slot) in slots.iter().enumerate() {
            match slot.led_index {
                Some(led) => {
                    if let Some(prev) = by_led.insert(led, i) {
                        return Err(Error::config(format!(
                            "LED {led} assigned to both {} and {}",
                            slots[prev].icao, slot.icao
                        )));
                    }
                }
                None if slot.purpose.on_strip() => {
                    return Err(Error::config(format!("{} is on the strip but has no LED", slot.icao)));
                }
                None => {}
            }
        }
        if let Some((&last, _)) = by_led.last_key_value() {
            if last + 1 != by_led.len() {
                return Err(Error::config(format!(
                    "LED positions must be contiguous from 0, got {} slots up to {last}",
                    by_led.len()
                )));
            }
        }

        let mut owners: HashMap<String, usize> = HashMap::new();
        for i in 0..slots.len() {
            let slot = &slots[i];
            if !slot.is_airport() || !slot.active {
                continue;
            }
            if let Some(&first) = owners.get(&slot.icao) {
                let led = slots[first].led_index.unwrap_or_default();
                match policy {
                    DuplicatePolicy::Warn => {
                        warn!(
                            "{} listed again at LED {:?}; only LED {led} receives updates",
                            slot.icao, slot.led_index
                        );
                        continue;
                    }
                    DuplicatePolicy::Reject => {
                        return Err(Error::DuplicateAirport {
                            icao: slot.icao.clone(),
                            led,
                        });
                    }
                }
            }
            owners.insert(slot.icao.clone(), i);
            slots[i].owner = true;
        }

        debug!("Registry: {} slots, {} LEDs, {} airports", slots.len(), by_led.len(), owners.len());
        Ok(Self {
            slots,
            led_order: by_led.into_values().collect(),
            owners,
            observations: HashMap::new(),
        })
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn num_leds(&self) -> usize {
        self.led_order.len()
    }

    pub fn slots(&self) -> &[AirportSlot] {
        &self.slots
    }

    /// Replace the observation for `icao`. Returns false when the stored
    /// record was already identical.
    pub fn upsert_observation(&mut self, icao: &str, observation: Observation) -> bool {
        let key = icao.trim().to_ascii_uppercase();
        if self.observations.get(&key) == Some(&observation) {
            return false;
        }
        self.observations.insert(key, observation);
        true
    }

    pub fn get_observation(&self, icao: &str) -> Option<&Observation> {
        self.observations.get(&icao.trim().to_ascii_uppercase())
    }

    /// Owned copy for readers on other threads.
    pub fn get_airport(&self, icao: &str) -> Option<Observation> {
        self.get_observation(icao).cloned()
    }

    /// Slot that owns `icao`, if any.
    pub fn owner_slot(&self, icao: &str) -> Option<&AirportSlot> {
        self.owners
            .get(&icao.trim().to_ascii_uppercase())
            .map(|&i| &self.slots[i])
    }

    /// Active strip slots, legend and NULL placeholders included, by LED.
    pub fn active_led_slots(&self) -> impl Iterator<Item = &AirportSlot> + '_ {
        self.led_order
            .iter()
            .map(|&i| &self.slots[i])
            .filter(|s| s.active || !s.is_airport())
    }

    /// Observation shown by this slot. Non-owning duplicates see none.
    pub fn slot_observation(&self, slot: &AirportSlot) -> Option<&Observation> {
        if !slot.owner {
            return None;
        }
        self.observations.get(&slot.icao)
    }

    /// Owning airport slots keyed by ICAO code.
    pub fn get_airport_dict_led(&self) -> HashMap<String, AirportSlot> {
        self.owners
            .iter()
            .map(|(icao, &i)| (icao.clone(), self.slots[i].clone()))
            .collect()
    }

    pub fn current_category(&self, icao: &str) -> FlightCategory {
        self.get_observation(icao)
            .map(Observation::category)
            .unwrap_or_default()
    }

    pub fn current_phenomena(&self, icao: &str) -> Phenomena {
        self.get_observation(icao)
            .map(Observation::phenomena)
            .unwrap_or_default()
    }

    /// Owning airport slots in file order; these are the ones fetched.
    pub fn weather_slots(&self) -> impl Iterator<Item = &AirportSlot> + '_ {
        self.slots.iter().filter(|s| s.owner)
    }
}
