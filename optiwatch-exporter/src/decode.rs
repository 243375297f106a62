//! Typed decoders for device payload encodings.
//!
//! Each decoder parses one metric family's JSON-IETF payload into a tagged
//! [`Reading`]. Decoding rules:
//!
//! - absent optional sub-fields are skipped silently (the field stays
//!   `None` and no series is written);
//! - a present field that cannot be converted to a number is a hard
//!   [`DecodeError`];
//! - power-supply analog rails carry raw big-endian IEEE-754 32-bit floats
//!   (base64 binary in JSON-IETF) and decode best-effort: anything
//!   malformed or absent yields NaN instead of an error.
//!
//! Unit conversions are part of the decode contract: CPU utilization is
//! scaled from percent to a ratio, laser bias current from milliamperes to
//! amperes, and the laser frequency offset from megahertz to hertz.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use thiserror::Error;

/// A per-update decode failure. Local to one metric update on one
/// notification; never fatal to the stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("non-numeric value {value:?} in field {field:?}")]
    NonNumeric { field: &'static str, value: String },
}

/// One decoded measurement, tagged by metric family.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Fan {
        rpm: Option<f64>,
    },
    Temperature {
        celsius: Option<f64>,
    },
    Memory {
        utilized_bytes: Option<f64>,
    },
    Cpu {
        utilization_ratio: Option<f64>,
    },
    PowerSupply {
        input_current: f64,
        input_voltage: f64,
        output_current: f64,
        output_voltage: f64,
    },
    Laser {
        input_power_dbm: Option<f64>,
        output_power_dbm: Option<f64>,
        bias_current_ampere: Option<f64>,
    },
    OpticalChannel {
        chromatic_dispersion_ps_nm: Option<f64>,
        polarization_dependent_loss_db: Option<f64>,
        polarization_mode_dispersion_ps: Option<f64>,
        frequency_offset_hertz: Option<f64>,
    },
}

/// A decoder for one metric family's payload encoding.
pub type DecodeFn = fn(&[u8]) -> Result<Reading, DecodeError>;

/// A scalar that devices emit either as a JSON number or as a
/// string-wrapped number (JSON-IETF renders 64-bit integers as strings).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    fn value(&self, field: &'static str) -> Result<f64, DecodeError> {
        match self {
            Scalar::Number(v) => Ok(*v),
            Scalar::Text(s) => s.trim().parse().map_err(|_| DecodeError::NonNumeric {
                field,
                value: s.clone(),
            }),
        }
    }
}

/// The `{"instant": <n>}` statistic container used by openconfig leaves.
#[derive(Debug, Deserialize)]
struct Statistic {
    instant: Option<Scalar>,
}

impl Statistic {
    fn instant(stat: &Option<Statistic>, field: &'static str) -> Result<Option<f64>, DecodeError> {
        match stat {
            Some(Statistic {
                instant: Some(scalar),
            }) => Ok(Some(scalar.value(field)?)),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FanState {
    speed: Option<Scalar>,
}

/// Decode `.../fan/state`: `{"speed": 11820}`.
pub fn decode_fan(payload: &[u8]) -> Result<Reading, DecodeError> {
    let state: FanState = serde_json::from_slice(payload)?;
    Ok(Reading::Fan {
        rpm: state.speed.map(|s| s.value("speed")).transpose()?,
    })
}

#[derive(Debug, Deserialize)]
struct TemperatureState {
    temperature: Option<Statistic>,
}

/// Decode the temperature statistic out of a generic `.../state` payload.
pub fn decode_temperature(payload: &[u8]) -> Result<Reading, DecodeError> {
    let state: TemperatureState = serde_json::from_slice(payload)?;
    Ok(Reading::Temperature {
        celsius: Statistic::instant(&state.temperature, "temperature.instant")?,
    })
}

#[derive(Debug, Deserialize)]
struct MemoryState {
    memory: Option<MemoryCounters>,
}

#[derive(Debug, Deserialize)]
struct MemoryCounters {
    utilized: Option<Scalar>,
}

/// Decode the memory statistic out of a generic `.../state` payload.
/// `utilized` is a 64-bit counter, string-wrapped on the wire.
pub fn decode_memory(payload: &[u8]) -> Result<Reading, DecodeError> {
    let state: MemoryState = serde_json::from_slice(payload)?;
    let utilized = match state.memory {
        Some(MemoryCounters {
            utilized: Some(scalar),
        }) => Some(scalar.value("memory.utilized")?),
        _ => None,
    };
    Ok(Reading::Memory {
        utilized_bytes: utilized,
    })
}

#[derive(Debug, Deserialize)]
struct CpuUtilization {
    state: Option<Statistic>,
}

/// Decode `.../cpu/utilization`: `{"state": {"instant": 16}}`. The device
/// reports percent; the catalogue carries a 0.0 - 1.0 ratio.
pub fn decode_cpu(payload: &[u8]) -> Result<Reading, DecodeError> {
    let util: CpuUtilization = serde_json::from_slice(payload)?;
    Ok(Reading::Cpu {
        utilization_ratio: Statistic::instant(&util.state, "state.instant")?.map(|v| v / 100.0),
    })
}

#[derive(Debug, Deserialize)]
struct PowerSupplyState {
    #[serde(rename = "input-current")]
    input_current: Option<String>,
    #[serde(rename = "input-voltage")]
    input_voltage: Option<String>,
    #[serde(rename = "output-current")]
    output_current: Option<String>,
    #[serde(rename = "output-voltage")]
    output_voltage: Option<String>,
}

/// Decode `.../power-supply/state`. The four analog rails are raw
/// big-endian IEEE-754 32-bit floats, base64-encoded by JSON-IETF;
/// unparseable rails become NaN, never an error.
pub fn decode_power_supply(payload: &[u8]) -> Result<Reading, DecodeError> {
    let state: PowerSupplyState = serde_json::from_slice(payload)?;
    Ok(Reading::PowerSupply {
        input_current: binary_float32(state.input_current.as_deref()),
        input_voltage: binary_float32(state.input_voltage.as_deref()),
        output_current: binary_float32(state.output_current.as_deref()),
        output_voltage: binary_float32(state.output_voltage.as_deref()),
    })
}

/// Best-effort decode of a base64-encoded big-endian f32.
fn binary_float32(encoded: Option<&str>) -> f64 {
    let bytes = match encoded.map(|e| BASE64.decode(e)) {
        Some(Ok(bytes)) => bytes,
        _ => return f64::NAN,
    };
    match <[u8; 4]>::try_from(bytes.as_slice()) {
        Ok(raw) => f32::from_be_bytes(raw) as f64,
        Err(_) => f64::NAN,
    }
}

#[derive(Debug, Deserialize)]
struct LaserState {
    #[serde(rename = "input-power")]
    input_power: Option<Statistic>,
    #[serde(rename = "laser-bias-current")]
    laser_bias_current: Option<Statistic>,
    #[serde(rename = "output-power")]
    output_power: Option<Statistic>,
}

/// Decode transceiver/optical-channel laser statistics. Bias current is
/// reported in milliamperes and stored in amperes.
pub fn decode_laser(payload: &[u8]) -> Result<Reading, DecodeError> {
    let state: LaserState = serde_json::from_slice(payload)?;
    Ok(Reading::Laser {
        input_power_dbm: Statistic::instant(&state.input_power, "input-power.instant")?,
        output_power_dbm: Statistic::instant(&state.output_power, "output-power.instant")?,
        bias_current_ampere: Statistic::instant(
            &state.laser_bias_current,
            "laser-bias-current.instant",
        )?
        .map(|v| v / 1000.0),
    })
}

#[derive(Debug, Deserialize)]
struct OpticalChannelState {
    #[serde(rename = "chromatic-dispersion")]
    chromatic_dispersion: Option<Statistic>,
    #[serde(rename = "polarization-dependent-loss")]
    polarization_dependent_loss: Option<Statistic>,
    #[serde(rename = "polarization-mode-dispersion")]
    polarization_mode_dispersion: Option<Statistic>,
    #[serde(rename = "laser-freq-offset")]
    laser_freq_offset: Option<Scalar>,
}

/// Decode terminal-device optical-channel statistics. The frequency offset
/// is reported in megahertz and stored in hertz.
pub fn decode_optical_channel(payload: &[u8]) -> Result<Reading, DecodeError> {
    let state: OpticalChannelState = serde_json::from_slice(payload)?;
    Ok(Reading::OpticalChannel {
        chromatic_dispersion_ps_nm: Statistic::instant(
            &state.chromatic_dispersion,
            "chromatic-dispersion.instant",
        )?,
        polarization_dependent_loss_db: Statistic::instant(
            &state.polarization_dependent_loss,
            "polarization-dependent-loss.instant",
        )?,
        polarization_mode_dispersion_ps: Statistic::instant(
            &state.polarization_mode_dispersion,
            "polarization-mode-dispersion.instant",
        )?,
        frequency_offset_hertz: state
            .laser_freq_offset
            .map(|s| s.value("laser-freq-offset"))
            .transpose()?
            .map(|v| v * 1_000_000.0),
    })
}
