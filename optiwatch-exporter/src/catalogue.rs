//! The fixed per-device metric catalogue and its exposition rendering.
//!
//! Every dial-out session owns one [`MetricStore`] holding the full gauge
//! catalogue. Series are written by the session's receive loop and read by
//! concurrent probe requests; each gauge family guards its series map with
//! its own reader/writer lock.

use std::collections::HashMap;
use std::fmt::Write;

use parking_lot::RwLock;

/// A named gauge family with a fixed label schema, holding one value per
/// label tuple. Last write wins.
#[derive(Debug)]
pub struct GaugeVec {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    series: RwLock<HashMap<Vec<String>, f64>>,
}

impl GaugeVec {
    fn new(name: &'static str, help: &'static str, label_names: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            label_names,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// The metric name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Set the series identified by `labels` (one value per label name, in
    /// schema order) to `value`.
    pub fn set(&self, labels: &[&str], value: f64) {
        debug_assert_eq!(labels.len(), self.label_names.len());
        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        self.series.write().insert(key, value);
    }

    /// Current value of the series identified by `labels`, if set.
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        self.series.read().get(&key).copied()
    }

    /// Whether no series have been written yet.
    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    fn write_header(&self, out: &mut String) {
        writeln!(out, "# HELP {} {}", self.name, self.help).ok();
        writeln!(out, "# TYPE {} gauge", self.name).ok();
    }

    /// Write one line per series, sorted by label values for stable output.
    /// `extra` is appended after the schema labels.
    fn write_series(&self, out: &mut String, extra: Option<(&str, &str)>) {
        let series = self.series.read();
        let mut ordered: Vec<(&Vec<String>, f64)> = series.iter().map(|(k, v)| (k, *v)).collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));

        for (values, value) in ordered {
            let mut labels: Vec<(&str, &str)> = self
                .label_names
                .iter()
                .copied()
                .zip(values.iter().map(String::as_str))
                .collect();
            if let Some((k, v)) = extra {
                labels.push((k, v));
            }
            writeln!(
                out,
                "{}{} {}",
                self.name,
                format_labels(&labels),
                format_value(value)
            )
            .ok();
        }
    }
}

/// One device session's metric state: the full catalogue, declared once and
/// registered into every new store.
#[derive(Debug)]
pub struct MetricStore {
    pub fan_rpm: GaugeVec,
    pub temperature: GaugeVec,
    pub memory_utilized: GaugeVec,
    pub cpu_utilization: GaugeVec,
    pub power_supply_input_current: GaugeVec,
    pub power_supply_input_voltage: GaugeVec,
    pub power_supply_output_current: GaugeVec,
    pub power_supply_output_voltage: GaugeVec,
    pub laser_input_power: GaugeVec,
    pub laser_bias_current: GaugeVec,
    pub laser_output_power: GaugeVec,
    pub laser_chromatic_dispersion: GaugeVec,
    pub laser_polarization_dependent_loss: GaugeVec,
    pub laser_polarization_mode_dispersion: GaugeVec,
    pub laser_frequency_offset: GaugeVec,
}

impl MetricStore {
    pub fn new() -> Self {
        Self {
            fan_rpm: GaugeVec::new(
                "optiwatch_fan_rpm",
                "Current fan speed in RPM.",
                &["device"],
            ),
            temperature: GaugeVec::new(
                "optiwatch_temperature_celsius",
                "Current temperature of a component in degrees Celsius.",
                &["device"],
            ),
            memory_utilized: GaugeVec::new(
                "optiwatch_memory_utilized_bytes",
                "Bytes of memory currently in use by processes running on the component, not counting reserved memory.",
                &["device"],
            ),
            cpu_utilization: GaugeVec::new(
                "optiwatch_cpu_utilization_ratio",
                "Ratio (0.0 - 1.0) of CPU utilization.",
                &["device"],
            ),
            power_supply_input_current: GaugeVec::new(
                "optiwatch_power_supply_input_current_ampere",
                "Input current drawn by a power supply.",
                &["device"],
            ),
            power_supply_input_voltage: GaugeVec::new(
                "optiwatch_power_supply_input_voltage",
                "Input voltage of a power supply.",
                &["device"],
            ),
            power_supply_output_current: GaugeVec::new(
                "optiwatch_power_supply_output_current_ampere",
                "Output current delivered by a power supply.",
                &["device"],
            ),
            power_supply_output_voltage: GaugeVec::new(
                "optiwatch_power_supply_output_voltage",
                "Output voltage of a power supply.",
                &["device"],
            ),
            laser_input_power: GaugeVec::new(
                "optiwatch_laser_input_power_dbm",
                "Input optical power of a physical channel in dBm.",
                &["device", "index"],
            ),
            laser_bias_current: GaugeVec::new(
                "optiwatch_laser_bias_current_ampere",
                "Current applied by the system to the transmit laser to achieve the output power.",
                &["device", "index"],
            ),
            laser_output_power: GaugeVec::new(
                "optiwatch_laser_output_power_dbm",
                "Output optical power of a physical channel in dBm.",
                &["device", "index"],
            ),
            laser_chromatic_dispersion: GaugeVec::new(
                "optiwatch_laser_chromatic_dispersion_ps_nm",
                "Chromatic dispersion of an optical channel in picoseconds per nanometer (ps/nm).",
                &["device"],
            ),
            laser_polarization_dependent_loss: GaugeVec::new(
                "optiwatch_laser_polarization_dependent_loss_db",
                "Polarization dependent loss of an optical channel in dB.",
                &["device"],
            ),
            laser_polarization_mode_dispersion: GaugeVec::new(
                "optiwatch_laser_polarization_mode_dispersion_ps",
                "Polarization mode dispersion of an optical channel in picoseconds (ps).",
                &["device"],
            ),
            laser_frequency_offset: GaugeVec::new(
                "optiwatch_laser_frequency_offset_hertz",
                "Laser frequency offset from the reference frequency.",
                &["device"],
            ),
        }
    }

    /// The catalogue families in declaration order.
    pub fn families(&self) -> [&GaugeVec; 15] {
        [
            &self.fan_rpm,
            &self.temperature,
            &self.memory_utilized,
            &self.cpu_utilization,
            &self.power_supply_input_current,
            &self.power_supply_input_voltage,
            &self.power_supply_output_current,
            &self.power_supply_output_voltage,
            &self.laser_input_power,
            &self.laser_bias_current,
            &self.laser_output_power,
            &self.laser_chromatic_dispersion,
            &self.laser_polarization_dependent_loss,
            &self.laser_polarization_mode_dispersion,
            &self.laser_frequency_offset,
        ]
    }

    /// Render this store in Prometheus text exposition format. Families with
    /// no series yet are omitted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for family in self.families() {
            if family.is_empty() {
                continue;
            }
            family.write_header(&mut out);
            family.write_series(&mut out, None);
        }
        out
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the merged catalogue of every live session, each series tagged
/// with a `target` label naming the session it belongs to. Headers are
/// emitted once per family across all sessions.
pub fn render_catalogue(stores: &[(String, std::sync::Arc<MetricStore>)]) -> String {
    let mut out = String::new();
    let Some((_, first)) = stores.first() else {
        return out;
    };

    for (i, family) in first.families().iter().enumerate() {
        if stores.iter().all(|(_, store)| store.families()[i].is_empty()) {
            continue;
        }
        family.write_header(&mut out);
        for (target, store) in stores {
            store.families()[i].write_series(&mut out, Some(("target", target)));
        }
    }
    out
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
