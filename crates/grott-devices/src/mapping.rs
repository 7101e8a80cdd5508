//! Field mapping from Grott telemetry values to device capabilities.
//!
//! The mapping is a fixed, ordered table of [`MappingEntry`] records:
//!
//! ```text
//! values.pvserial       ──→ inverter_serial          (raw)
//! values.pvpowerout     ──→ measure_power            (÷10)
//! values.pvgridvoltage2 ──→ measure_voltage.grid2    (÷10)
//! values.pvenergytoday  ──→ meter_power.today        (÷10)
//! ```
//!
//! Growatt inverters report power, voltage, current and energy in tenths of
//! their unit, so every measurement field is scaled. Identifiers are copied
//! unchanged.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::capability::{CapabilitySink, CapabilityValue};
use crate::error::DriverResult;
use crate::packet::TelemetryPacket;

/// One telemetry field -> capability translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    /// Target capability, e.g. `measure_voltage.grid1`
    pub capability: &'static str,
    /// Key in the packet's `values` object
    pub source_field: &'static str,
    /// Divide the raw reading by ten before storing
    pub scale: bool,
}

impl MappingEntry {
    pub const fn raw(capability: &'static str, source_field: &'static str) -> Self {
        Self {
            capability,
            source_field,
            scale: false,
        }
    }

    pub const fn scaled(capability: &'static str, source_field: &'static str) -> Self {
        Self {
            capability,
            source_field,
            scale: true,
        }
    }
}

const GROTT_MAPPINGS: &[MappingEntry] = &[
    MappingEntry::raw("datalogger_serial", "datalogserial"),
    MappingEntry::raw("inverter_serial", "pvserial"),
    MappingEntry::scaled("measure_power", "pvpowerout"),
    MappingEntry::scaled("measure_voltage.grid1", "pvgridvoltage"),
    MappingEntry::scaled("measure_voltage.grid2", "pvgridvoltage2"),
    MappingEntry::scaled("measure_voltage.grid3", "pvgridvoltage3"),
    MappingEntry::scaled("measure_current.grid1", "pvgridcurrent"),
    MappingEntry::scaled("measure_current.grid2", "pvgridcurrent2"),
    MappingEntry::scaled("measure_current.grid3", "pvgridcurrent3"),
    MappingEntry::scaled("measure_power.grid1", "pvgridpower"),
    MappingEntry::scaled("measure_power.grid2", "pvgridpower2"),
    MappingEntry::scaled("measure_power.grid3", "pvgridpower3"),
    MappingEntry::scaled("measure_voltage.pv1", "pv1voltage"),
    MappingEntry::scaled("measure_current.pv1", "pv1current"),
    MappingEntry::scaled("measure_power.pv1", "pv1watt"),
    MappingEntry::scaled("measure_voltage.pv2", "pv2voltage"),
    MappingEntry::scaled("measure_current.pv2", "pv2current"),
    MappingEntry::scaled("measure_power.pv2", "pv2watt"),
    MappingEntry::scaled("meter_power.today", "pvenergytoday"),
    MappingEntry::scaled("meter_power", "pvenergytotal"),
];

/// The built-in Grott mapping table, in application order.
pub fn grott_mappings() -> Vec<MappingEntry> {
    GROTT_MAPPINGS.to_vec()
}

/// A scaled field whose value is not a number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub capability: String,
    pub value: Value,
}

/// Outcome of one mapping pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingReport {
    /// Capabilities written, in application order
    pub written: Vec<String>,
    /// Source fields absent from the packet
    pub skipped: Vec<String>,
    pub errors: Vec<FieldError>,
}

impl MappingReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Translates telemetry packets into capability writes.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    entries: Vec<MappingEntry>,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new(grott_mappings())
    }
}

impl FieldMapper {
    /// Create a mapper over a custom table.
    ///
    /// Entries targeting a capability that already appeared earlier in the
    /// table are dropped.
    pub fn new(entries: Vec<MappingEntry>) -> Self {
        let mut unique: Vec<MappingEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if unique.iter().any(|e| e.capability == entry.capability) {
                debug!("Ignoring duplicate mapping for {}", entry.capability);
                continue;
            }
            unique.push(entry);
        }
        Self { entries: unique }
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Make sure every mapped capability exists on the device.
    ///
    /// Only adds; capabilities the device already has are left alone.
    pub async fn configure_mappings(&self, sink: &dyn CapabilitySink) -> DriverResult<()> {
        for entry in &self.entries {
            ensure_capability(sink, entry.capability).await?;
        }
        Ok(())
    }

    /// Apply one packet to `sink`.
    ///
    /// A bad field never aborts the pass: it is logged, reported and the next
    /// entry is processed.
    pub async fn parse_data(
        &self,
        packet: &TelemetryPacket,
        sink: &dyn CapabilitySink,
    ) -> DriverResult<MappingReport> {
        let mut report = MappingReport::default();

        let Some(values) = packet.values() else {
            debug!("Packet has no values object, nothing to map");
            return Ok(report);
        };

        for entry in &self.entries {
            let Some(raw) = values.get(entry.source_field) else {
                report.skipped.push(entry.source_field.to_string());
                continue;
            };

            let value = if entry.scale {
                match coerce_number(raw) {
                    Some(number) => CapabilityValue::Number(number / 10.0),
                    None => {
                        error!(
                            "Value of field {} is not a number: {}",
                            entry.source_field, raw
                        );
                        report.errors.push(FieldError {
                            field: entry.source_field.to_string(),
                            capability: entry.capability.to_string(),
                            value: raw.clone(),
                        });
                        continue;
                    }
                }
            } else {
                CapabilityValue::from(raw)
            };

            ensure_capability(sink, entry.capability).await?;
            sink.set_capability_value(entry.capability, value).await?;
            report.written.push(entry.capability.to_string());
        }

        Ok(report)
    }
}

async fn ensure_capability(sink: &dyn CapabilitySink, capability: &str) -> DriverResult<()> {
    if !sink.has_capability(capability).await {
        debug!("Adding capability {}", capability);
        sink.add_capability(capability).await?;
    }
    Ok(())
}

/// Loose numeric coercion of a telemetry reading.
///
/// Zero is always a number. Strings are trimmed; an empty string is zero.
/// Decimal, exponent, `0x`/`0o`/`0b` and `Infinity` literals are accepted.
/// Booleans are 1/0 and `null` is 0. Arrays go through their text form: `[]`
/// is 0, `[7]` and `["7"]` are 7, longer arrays are not numbers. Objects are
/// not numbers.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) => parse_numeric_str(s),
        Value::Array(items) => match items.as_slice() {
            [] => Some(0.0),
            [item] => coerce_array_item(item),
            _ => None,
        },
        Value::Object(_) => None,
    }
}

/// Coerce the text form of a single array element.
fn coerce_array_item(item: &Value) -> Option<f64> {
    match item {
        // null renders as an empty string
        Value::Null => Some(0.0),
        // "true" / "false" are not numeric text
        Value::Bool(_) => None,
        other => coerce_number(other),
    }
}

fn parse_numeric_str(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Some(0.0);
    }

    match s {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }

    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = s.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix).ok().map(|v| v as f64);
        }
    }

    // Rust also accepts "inf" and "nan"; loose number syntax does not.
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'))
    {
        return None;
    }

    s.parse::<f64>().ok().filter(|v| !v.is_nan())
}
