//! Error types shared across the device layer.

use crate::module::ModuleKind;

/// Convenience alias for fallible device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur during device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A value failed validation before being sent to the device
    #[error("Invalid {what} value: {value} ({expected})")]
    InvalidValue {
        what: String,
        value: String,
        expected: String,
    },

    /// A metric key is outside the recognized vocabulary
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// An expected section or key is absent from the cached snapshot
    #[error("Missing data: {0}")]
    MissingData(String),

    /// A write was attempted on a feature without a write accessor
    #[error("Feature is read-only: {0}")]
    ReadOnly(String),

    /// A module outlived the device it was registered on
    #[error("Module {0} is detached from its device")]
    Detached(ModuleKind),

    /// Transport-level failure while talking to the device
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl DeviceError {
    /// Builds a [`DeviceError::InvalidValue`] with a rejected value and a
    /// human-readable expectation.
    pub fn invalid_value(
        what: impl Into<String>,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            what: what.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    /// Builds a [`DeviceError::MissingData`] naming the absent section or key.
    pub fn missing_data(what: impl Into<String>) -> Self {
        Self::MissingData(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_message() {
        let err = DeviceError::invalid_value("brightness", 150, "valid range: 0-100%");
        assert_eq!(
            err.to_string(),
            "Invalid brightness value: 150 (valid range: 0-100%)"
        );
    }

    #[test]
    fn test_missing_data_message() {
        let err = DeviceError::missing_data("day_list");
        assert_eq!(err.to_string(), "Missing data: day_list");
    }

    #[test]
    fn test_transport_wraps_anyhow() {
        let err: DeviceError = anyhow::anyhow!("connection reset").into();
        assert!(matches!(err, DeviceError::Transport(_)));
        assert_eq!(err.to_string(), "Transport error: connection reset");
    }
}
