//! Cached device state.
//!
//! A [`DeviceData`] is one immutable snapshot of everything the device
//! reported during an update cycle, keyed by the wire operation that
//! produced each section. Consumers read snapshots through an `Arc` and
//! never observe a partially refreshed state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeviceError, DeviceResult};

/// Wire operation names shared across the device layer.
pub mod ops {
    /// Fetches the shared device-info section.
    pub const GET_DEVICE_INFO: &str = "get_device_info";
    /// Writes one or more device-info fields.
    pub const SET_DEVICE_INFO: &str = "set_device_info";
}

fn default_component_version() -> u32 {
    1
}

/// One capability advertised by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Component identifier, matched against module requirements
    pub id: String,
    /// Negotiated component version
    #[serde(default = "default_component_version")]
    pub ver: u32,
}

/// Immutable snapshot of the device state, one section per wire operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    sections: BTreeMap<String, Value>,
}

impl DeviceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_section(&mut self, operation: impl Into<String>, response: Value) {
        self.sections.insert(operation.into(), response);
    }

    /// Returns the raw response section for a wire operation, if present.
    pub fn section(&self, operation: &str) -> Option<&Value> {
        self.sections.get(operation)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Returns the shared device-info section.
    pub fn device_info(&self) -> DeviceResult<&Value> {
        self.section(ops::GET_DEVICE_INFO)
            .ok_or_else(|| DeviceError::missing_data(ops::GET_DEVICE_INFO))
    }

    /// Looks up a single key inside the device-info section.
    pub fn info_field(&self, key: &str) -> Option<&Value> {
        self.section(ops::GET_DEVICE_INFO)?.get(key)
    }

    /// Parses the component list advertised in the device-info section.
    /// Entries without a version default to version 1.
    pub fn components(&self) -> Vec<Component> {
        self.info_field("components")
            .cloned()
            .and_then(|raw| serde_json::from_value(raw).ok())
            .unwrap_or_default()
    }

    pub fn has_component(&self, id: &str) -> bool {
        self.components().iter().any(|c| c.id == id)
    }

    pub fn component_version(&self, id: &str) -> Option<u32> {
        self.components().into_iter().find(|c| c.id == id).map(|c| c.ver)
    }
}
