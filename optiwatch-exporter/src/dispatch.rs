//! Pattern-matched dispatch of flattened updates to decoders.
//!
//! The table is ordered and non-exclusive: every entry whose pattern matches
//! a path fires, so one update can feed several decoders. The bare
//! `.../state` pattern appears twice, feeding both the temperature and
//! memory decoders; each tolerates the fields it does not own.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalogue::MetricStore;
use crate::decode::{
    DecodeError, DecodeFn, Reading, decode_cpu, decode_fan, decode_laser, decode_memory,
    decode_optical_channel, decode_power_supply, decode_temperature,
};

/// One (compiled pattern, decoder) table entry. Capture group 1 is the
/// component name; capture group 2, where present, is a channel index.
#[derive(Clone)]
pub struct Matcher {
    pattern: Regex,
    decode: DecodeFn,
}

impl Matcher {
    fn new(pattern: &str, decode: DecodeFn) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("invalid matcher pattern"),
            decode,
        }
    }
}

static STANDARD_MATCHERS: Lazy<Vec<Matcher>> = Lazy::new(|| {
    vec![
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/fan/state",
            decode_fan,
        ),
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/state",
            decode_temperature,
        ),
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/state",
            decode_memory,
        ),
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/cpu/openconfig-platform-cpu:utilization",
            decode_cpu,
        ),
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/power-supply/state",
            decode_power_supply,
        ),
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/openconfig-platform-transceiver:transceiver/physical-channels/channel\[index=([^,\]]+)\]/state",
            decode_laser,
        ),
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/openconfig-platform-transceiver:transceiver/state",
            decode_laser,
        ),
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/openconfig-terminal-device:optical-channel/state",
            decode_laser,
        ),
        Matcher::new(
            r"/openconfig-platform:components/component\[name=([^,\]]+)\]/openconfig-terminal-device:optical-channel/state",
            decode_optical_channel,
        ),
    ]
});

/// The ordered matcher table. Stateless; one instance is shared by every
/// receive loop.
pub struct Dispatcher {
    entries: Vec<Matcher>,
}

impl Dispatcher {
    /// The standard catalogue table.
    pub fn standard() -> Self {
        Self {
            entries: STANDARD_MATCHERS.clone(),
        }
    }

    /// Number of table entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run one flattened update through the table, writing every decodable
    /// reading into `store`. Returns the decode errors encountered; a
    /// failing entry never prevents later entries from running.
    pub fn dispatch(&self, store: &MetricStore, fqn: &str, payload: &[u8]) -> Vec<DecodeError> {
        let mut errors = Vec::new();
        for entry in &self.entries {
            let captures = match entry.pattern.captures(fqn) {
                Some(captures) => captures,
                None => continue,
            };
            let device = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let index = captures.get(2).map(|m| m.as_str());

            match (entry.decode)(payload) {
                Ok(reading) => apply(store, &reading, device, index),
                Err(e) => errors.push(e),
            }
        }
        errors
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::standard()
    }
}

/// Write a decoded reading into the store under its label tuple. The
/// `device` label is always the component name; laser channel metrics carry
/// an `index` label that defaults to "" when the path had no channel index.
fn apply(store: &MetricStore, reading: &Reading, device: &str, index: Option<&str>) {
    match reading {
        Reading::Fan { rpm } => {
            if let Some(v) = rpm {
                store.fan_rpm.set(&[device], *v);
            }
        }
        Reading::Temperature { celsius } => {
            if let Some(v) = celsius {
                store.temperature.set(&[device], *v);
            }
        }
        Reading::Memory { utilized_bytes } => {
            if let Some(v) = utilized_bytes {
                store.memory_utilized.set(&[device], *v);
            }
        }
        Reading::Cpu { utilization_ratio } => {
            if let Some(v) = utilization_ratio {
                store.cpu_utilization.set(&[device], *v);
            }
        }
        Reading::PowerSupply {
            input_current,
            input_voltage,
            output_current,
            output_voltage,
        } => {
            store.power_supply_input_current.set(&[device], *input_current);
            store.power_supply_input_voltage.set(&[device], *input_voltage);
            store
                .power_supply_output_current
                .set(&[device], *output_current);
            store
                .power_supply_output_voltage
                .set(&[device], *output_voltage);
        }
        Reading::Laser {
            input_power_dbm,
            output_power_dbm,
            bias_current_ampere,
        } => {
            let labels = [device, index.unwrap_or("")];
            if let Some(v) = input_power_dbm {
                store.laser_input_power.set(&labels, *v);
            }
            if let Some(v) = output_power_dbm {
                store.laser_output_power.set(&labels, *v);
            }
            if let Some(v) = bias_current_ampere {
                store.laser_bias_current.set(&labels, *v);
            }
        }
        Reading::OpticalChannel {
            chromatic_dispersion_ps_nm,
            polarization_dependent_loss_db,
            polarization_mode_dispersion_ps,
            frequency_offset_hertz,
        } => {
            if let Some(v) = chromatic_dispersion_ps_nm {
                store.laser_chromatic_dispersion.set(&[device], *v);
            }
            if let Some(v) = polarization_dependent_loss_db {
                store.laser_polarization_dependent_loss.set(&[device], *v);
            }
            if let Some(v) = polarization_mode_dispersion_ps {
                store.laser_polarization_mode_dispersion.set(&[device], *v);
            }
            if let Some(v) = frequency_offset_hertz {
                store.laser_frequency_offset.set(&[device], *v);
            }
        }
    }
}
