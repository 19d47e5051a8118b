//! Normalized view over a raw energy reading.
//!
//! Device families disagree on native units: some report volts, amperes,
//! watts, and kilowatt-hours, others the milli-scaled siblings (mV, mA,
//! mW, Wh). [`EmeterStatus`] keeps the raw record untouched and derives
//! the missing half of each unit pair on demand, multiplying or dividing
//! by exactly 1000.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use casalink_core::{DeviceError, DeviceResult};

/// Canonical unit key paired with its milli-scaled sibling.
const UNIT_PAIRS: [(&str, &str); 4] = [
    ("voltage", "voltage_mv"),
    ("current", "current_ma"),
    ("power", "power_mw"),
    ("total", "total_wh"),
];

/// One raw realtime reading with unit derivation.
///
/// A recognized key that is absent from the record and not derivable reads
/// as `None`; an unrecognized key is an error, never a silent default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmeterStatus {
    record: Map<String, Value>,
}

impl EmeterStatus {
    pub fn new(record: Map<String, Value>) -> Self {
        Self { record }
    }

    /// Wraps a raw realtime response section.
    pub fn from_value(value: &Value) -> DeviceResult<Self> {
        value
            .as_object()
            .cloned()
            .map(Self::new)
            .ok_or_else(|| DeviceError::missing_data("realtime record"))
    }

    /// The untouched raw record.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.record
    }

    /// Generic lookup by key.
    ///
    /// Returns the stored value for a recognized key, derives it from the
    /// paired unit when only the sibling is present, and fails with
    /// [`DeviceError::UnknownField`] for keys outside the vocabulary.
    pub fn get(&self, key: &str) -> DeviceResult<Option<f64>> {
        for (canonical, milli) in UNIT_PAIRS {
            if key == canonical {
                return Ok(self.lookup(canonical, milli, false));
            }
            if key == milli {
                return Ok(self.lookup(canonical, milli, true));
            }
        }
        if key == "slot_id" {
            return Ok(self.number(key));
        }
        Err(DeviceError::UnknownField(key.to_string()))
    }

    pub fn voltage(&self) -> Option<f64> {
        self.lookup("voltage", "voltage_mv", false)
    }

    pub fn voltage_mv(&self) -> Option<f64> {
        self.lookup("voltage", "voltage_mv", true)
    }

    pub fn current(&self) -> Option<f64> {
        self.lookup("current", "current_ma", false)
    }

    pub fn current_ma(&self) -> Option<f64> {
        self.lookup("current", "current_ma", true)
    }

    /// Instantaneous power in watts.
    pub fn power(&self) -> Option<f64> {
        self.lookup("power", "power_mw", false)
    }

    pub fn power_mw(&self) -> Option<f64> {
        self.lookup("power", "power_mw", true)
    }

    /// Cumulative energy in kilowatt-hours.
    pub fn total(&self) -> Option<f64> {
        self.lookup("total", "total_wh", false)
    }

    pub fn total_wh(&self) -> Option<f64> {
        self.lookup("total", "total_wh", true)
    }

    /// Outlet slot on multi-outlet devices.
    pub fn slot_id(&self) -> Option<i64> {
        self.record.get("slot_id").and_then(Value::as_i64)
    }

    fn lookup(&self, canonical: &str, milli: &str, want_milli: bool) -> Option<f64> {
        if want_milli {
            self.number(milli)
                .or_else(|| self.number(canonical).map(|v| v * 1000.0))
        } else {
            self.number(canonical)
                .or_else(|| self.number(milli).map(|v| v / 1000.0))
        }
    }

    // JSON null reads as absent, so derivation still applies.
    fn number(&self, key: &str) -> Option<f64> {
        self.record.get(key).and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(value: Value) -> EmeterStatus {
        EmeterStatus::from_value(&value).unwrap()
    }

    #[test]
    fn test_derives_canonical_from_milli() {
        let status = status(json!({"current_ma": 123}));
        assert_eq!(status.current(), Some(0.123));
        assert_eq!(status.current_ma(), Some(123.0));
    }

    #[test]
    fn test_derives_milli_from_canonical() {
        let status = status(json!({"power": 0.5, "voltage": 230.0}));
        assert_eq!(status.power_mw(), Some(500.0));
        assert_eq!(status.voltage_mv(), Some(230_000.0));
    }

    #[test]
    fn test_native_value_is_preferred() {
        // Both halves present: no derivation, raw values win.
        let status = status(json!({"power": 2.0, "power_mw": 1999.0}));
        assert_eq!(status.power(), Some(2.0));
        assert_eq!(status.power_mw(), Some(1999.0));
    }

    #[test]
    fn test_unit_identities_hold() {
        let status = status(json!({
            "voltage_mv": 231_423,
            "current_ma": 251,
            "power_mw": 5812,
            "total_wh": 14_370,
        }));
        let power = status.power().unwrap();
        let voltage = status.voltage().unwrap();
        let current = status.current().unwrap();
        let total = status.total().unwrap();
        assert!((status.power_mw().unwrap() - power * 1000.0).abs() < 1e-9);
        assert!((status.voltage_mv().unwrap() - voltage * 1000.0).abs() < 1e-9);
        assert!((status.current_ma().unwrap() - current * 1000.0).abs() < 1e-9);
        assert!((status.total_wh().unwrap() - total * 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_key_fails() {
        let status = status(json!({"power": 1.0}));
        let err = status.get("invalid_key").unwrap_err();
        assert_eq!(err.to_string(), "Unknown field: invalid_key");
    }

    #[test]
    fn test_recognized_absent_key_is_none() {
        // Bulbs report power only; voltage stays absent without erroring.
        let status = status(json!({"power_mw": 800}));
        assert_eq!(status.voltage(), None);
        assert_eq!(status.voltage_mv(), None);
        assert_eq!(status.get("voltage").unwrap(), None);
        assert_eq!(status.power(), Some(0.8));
    }

    #[test]
    fn test_null_reads_as_absent() {
        let status = status(json!({"power": null, "power_mw": 500}));
        assert_eq!(status.power(), Some(0.5));
    }

    #[test]
    fn test_slot_id() {
        let status = status(json!({"power": 1.0, "slot_id": 2}));
        assert_eq!(status.slot_id(), Some(2));
        assert_eq!(status.get("slot_id").unwrap(), Some(2.0));
    }

    #[test]
    fn test_non_object_record_fails() {
        assert!(EmeterStatus::from_value(&json!([1, 2, 3])).is_err());
    }
}
