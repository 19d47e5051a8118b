//! Transport seam between the device layer and the wire.
//!
//! The device layer never talks to a socket directly. It issues named
//! operations through a [`DeviceTransport`] and stores the JSON responses
//! in the snapshot. This keeps protocol plumbing out of the capability
//! modules and makes the whole layer testable against [`MockTransport`].

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::data::ops;
use crate::error::DeviceResult;

/// Wire access for one device.
///
/// Implementations resolve an operation name and its parameters to a JSON
/// response. Errors must surface as [`crate::DeviceError::Transport`] so
/// callers can keep serving the previous snapshot.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Issue a single operation against the device.
    async fn call(&self, operation: &str, params: Value) -> DeviceResult<Value>;
}

/// In-memory transport for tests and demos.
///
/// Responses are canned per operation name. Every call is recorded so tests
/// can assert what went over the wire, and `set_device_info` writes can
/// optionally be echoed back into the `get_device_info` response so a
/// write-then-update round trip behaves like a real device.
#[derive(Default)]
pub struct MockTransport {
    responses: RwLock<HashMap<String, Value>>,
    calls: RwLock<Vec<(String, Value)>>,
    failure: RwLock<Option<String>>,
    echo_device_info: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a canned response for an operation.
    pub fn with_response(self, operation: impl Into<String>, response: Value) -> Self {
        self.responses.write().insert(operation.into(), response);
        self
    }

    /// Make `set_device_info` writes visible in subsequent `get_device_info`
    /// responses, mimicking a device that persists state between calls.
    pub fn with_device_info_echo(mut self) -> Self {
        self.echo_device_info = true;
        self
    }

    /// Replace the canned response for an operation mid-test.
    pub fn set_response(&self, operation: impl Into<String>, response: Value) {
        self.responses.write().insert(operation.into(), response);
    }

    /// Make every subsequent call fail with the given message until cleared
    /// with [`MockTransport::clear_failure`].
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.write() = None;
    }

    /// All recorded calls in issue order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.read().clone()
    }

    /// Parameters of every recorded call to one operation.
    pub fn calls_for(&self, operation: &str) -> Vec<Value> {
        self.calls
            .read()
            .iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    fn apply_device_info_echo(&self, params: &Value) {
        let mut responses = self.responses.write();
        let info = responses
            .entry(ops::GET_DEVICE_INFO.to_string())
            .or_insert_with(|| json!({}));
        if let (Some(info), Some(params)) = (info.as_object_mut(), params.as_object()) {
            for (key, value) in params {
                info.insert(key.clone(), value.clone());
            }
        }
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn call(&self, operation: &str, params: Value) -> DeviceResult<Value> {
        self.calls
            .write()
            .push((operation.to_string(), params.clone()));

        if let Some(message) = self.failure.read().clone() {
            return Err(anyhow!(message).into());
        }

        if self.echo_device_info && operation == ops::SET_DEVICE_INFO {
            self.apply_device_info_echo(&params);
            return Ok(json!({"err_code": 0}));
        }

        if let Some(response) = self.responses.read().get(operation) {
            return Ok(response.clone());
        }

        // Writes without a canned response get a bare acknowledgment.
        Ok(json!({"err_code": 0}))
    }
}
