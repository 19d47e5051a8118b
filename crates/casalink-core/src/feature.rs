//! Feature descriptors.
//!
//! A [`Feature`] is a uniform, introspectable handle over one controllable
//! or observable device attribute. Accessors are closures captured when the
//! owning module initializes, so consumers read and write by descriptor
//! without knowing which module backs it. Writes validate against the
//! declared type, range, and choices before anything goes over the wire.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeviceError, DeviceResult};
use crate::value::FeatureValue;

/// Read accessor bound to the owning module.
pub type ReadHandler = Arc<dyn Fn() -> DeviceResult<FeatureValue> + Send + Sync>;
/// Write accessor bound to the owning module. Returns the raw remote-call
/// acknowledgment; the next update cycle reconciles the cached value.
pub type WriteHandler =
    Arc<dyn Fn(FeatureValue) -> BoxFuture<'static, DeviceResult<Value>> + Send + Sync>;
/// Range accessor, consulted lazily because the range may depend on live
/// state such as a currently active effect.
pub type RangeHandler = Arc<dyn Fn() -> Option<(i64, i64)> + Send + Sync>;
/// Choice-set accessor for [`FeatureKind::Choice`] features.
pub type ChoicesHandler = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Value type of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Bool,
    Number,
    Choice,
    Action,
    String,
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Number => write!(f, "number"),
            Self::Choice => write!(f, "choice"),
            Self::Action => write!(f, "action"),
            Self::String => write!(f, "string"),
        }
    }
}

/// Consumer-facing grouping. Filtering only, no behavioral meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureCategory {
    Primary,
    Config,
    Info,
    Debug,
}

impl std::fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Config => write!(f, "config"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

/// One controllable or observable device attribute.
#[derive(Clone)]
pub struct Feature {
    id: String,
    name: String,
    kind: FeatureKind,
    category: FeatureCategory,
    unit: Option<&'static str>,
    precision_hint: Option<u8>,
    read: ReadHandler,
    write: Option<WriteHandler>,
    range: Option<RangeHandler>,
    choices: Option<ChoicesHandler>,
}

impl Feature {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: FeatureKind,
        read: impl Fn() -> DeviceResult<FeatureValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            category: FeatureCategory::Info,
            unit: None,
            precision_hint: None,
            read: Arc::new(read),
            write: None,
            range: None,
            choices: None,
        }
    }

    pub fn with_category(mut self, category: FeatureCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Suggested number of decimal places for display.
    pub fn with_precision_hint(mut self, digits: u8) -> Self {
        self.precision_hint = Some(digits);
        self
    }

    /// Bind a write accessor. The future is boxed here so module code can
    /// hand over a plain async closure.
    pub fn with_write<F, Fut>(mut self, write: F) -> Self
    where
        F: Fn(FeatureValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DeviceResult<Value>> + Send + 'static,
    {
        self.write = Some(Arc::new(move |value| Box::pin(write(value))));
        self
    }

    /// Fixed numeric range.
    pub fn with_range(self, min: i64, max: i64) -> Self {
        self.with_range_fn(move || Some((min, max)))
    }

    /// Range computed at read time from live state.
    pub fn with_range_fn(
        mut self,
        range: impl Fn() -> Option<(i64, i64)> + Send + Sync + 'static,
    ) -> Self {
        self.range = Some(Arc::new(range));
        self
    }

    /// Fixed choice set.
    pub fn with_choices(self, choices: Vec<String>) -> Self {
        self.with_choices_fn(move || choices.clone())
    }

    /// Choice set computed at read time from live state.
    pub fn with_choices_fn(
        mut self,
        choices: impl Fn() -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.choices = Some(Arc::new(choices));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    pub fn category(&self) -> FeatureCategory {
        self.category
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.unit
    }

    pub fn precision_hint(&self) -> Option<u8> {
        self.precision_hint
    }

    pub fn is_writable(&self) -> bool {
        self.write.is_some()
    }

    /// Current numeric range, if any.
    pub fn range(&self) -> Option<(i64, i64)> {
        self.range.as_ref().and_then(|f| f())
    }

    /// Current choice set, if any.
    pub fn choices(&self) -> Option<Vec<String>> {
        self.choices.as_ref().map(|f| f())
    }

    /// Read the current value through the bound accessor.
    pub fn value(&self) -> DeviceResult<FeatureValue> {
        (self.read)()
    }

    /// Write a new value through the bound accessor.
    ///
    /// Validation happens before the accessor is invoked: a type mismatch,
    /// an out-of-range number, or an unknown choice fails without issuing
    /// any remote call. Returns the raw acknowledgment on success.
    pub async fn set_value(&self, value: FeatureValue) -> DeviceResult<Value> {
        let write = self
            .write
            .as_ref()
            .ok_or_else(|| DeviceError::ReadOnly(self.id.clone()))?;
        self.validate(&value)?;
        write(value).await
    }

    fn validate(&self, value: &FeatureValue) -> DeviceResult<()> {
        match self.kind {
            FeatureKind::Bool => {
                if value.as_bool().is_none() {
                    return Err(self.type_error(value, "expected a boolean"));
                }
            }
            FeatureKind::Number => {
                let Some(n) = value.as_int() else {
                    return Err(self.type_error(value, "expected an integer"));
                };
                if let Some((min, max)) = self.range() {
                    if n < min || n > max {
                        return Err(DeviceError::invalid_value(
                            &self.id,
                            n,
                            format!("valid range: {}-{}", min, max),
                        ));
                    }
                }
            }
            FeatureKind::Choice => {
                let Some(s) = value.as_str() else {
                    return Err(self.type_error(value, "expected a choice string"));
                };
                if let Some(choices) = self.choices() {
                    if !choices.iter().any(|c| c == s) {
                        return Err(DeviceError::invalid_value(
                            &self.id,
                            s,
                            format!("valid choices: {}", choices.join(", ")),
                        ));
                    }
                }
            }
            FeatureKind::String => {
                if value.as_str().is_none() {
                    return Err(self.type_error(value, "expected a string"));
                }
            }
            // Actions ignore their payload.
            FeatureKind::Action => {}
        }
        Ok(())
    }

    fn type_error(&self, value: &FeatureValue, expected: &str) -> DeviceError {
        DeviceError::invalid_value(&self.id, value, expected)
    }
}

impl std::fmt::Debug for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feature")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn brightness_feature(store: Arc<Mutex<i64>>) -> Feature {
        let read_store = store.clone();
        let write_store = store.clone();
        Feature::new(
            "brightness",
            "Brightness",
            FeatureKind::Number,
            move || Ok(FeatureValue::Int(*read_store.lock())),
        )
        .with_category(FeatureCategory::Primary)
        .with_unit("%")
        .with_range(0, 100)
        .with_write(move |value| {
            let store = write_store.clone();
            async move {
                // Validation has already run; treat the payload as trusted.
                *store.lock() = value.as_int().unwrap_or_default();
                Ok(json!({"err_code": 0}))
            }
        })
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let store = Arc::new(Mutex::new(50));
        let feature = brightness_feature(store);

        assert_eq!(feature.value().unwrap(), FeatureValue::Int(50));
        feature.set_value(FeatureValue::Int(80)).await.unwrap();
        assert_eq!(feature.value().unwrap(), FeatureValue::Int(80));
    }

    #[tokio::test]
    async fn test_out_of_range_write_has_no_side_effect() {
        let store = Arc::new(Mutex::new(50));
        let feature = brightness_feature(store.clone());

        let err = feature.set_value(FeatureValue::Int(150)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid brightness value: 150 (valid range: 0-100)"
        );
        assert_eq!(*store.lock(), 50);
    }

    #[tokio::test]
    async fn test_float_is_rejected_for_number_feature() {
        let store = Arc::new(Mutex::new(50));
        let feature = brightness_feature(store.clone());

        let err = feature
            .set_value(FeatureValue::Float(42.5))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidValue { .. }));
        assert_eq!(*store.lock(), 50);
    }

    #[tokio::test]
    async fn test_read_only_feature_rejects_write() {
        let feature = Feature::new("rssi", "Signal strength", FeatureKind::Number, || {
            Ok(FeatureValue::Int(-61))
        });

        assert!(!feature.is_writable());
        let err = feature.set_value(FeatureValue::Int(0)).await.unwrap_err();
        assert!(matches!(err, DeviceError::ReadOnly(_)));
    }

    #[tokio::test]
    async fn test_choice_validation() {
        let feature = Feature::new("light_effect", "Light effect", FeatureKind::Choice, || {
            Ok(FeatureValue::String("Off".into()))
        })
        .with_choices(vec!["Off".into(), "Aurora".into(), "Bubbles".into()])
        .with_write(|_| async { Ok(json!({"err_code": 0})) });

        feature
            .set_value(FeatureValue::String("Aurora".into()))
            .await
            .unwrap();

        let err = feature
            .set_value(FeatureValue::String("Disco".into()))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid light_effect value: Disco (valid choices: Off, Aurora, Bubbles)"
        );
    }

    #[test]
    fn test_dynamic_range() {
        let limit = Arc::new(Mutex::new(100i64));
        let range_limit = limit.clone();
        let feature = Feature::new("level", "Level", FeatureKind::Number, || {
            Ok(FeatureValue::Int(1))
        })
        .with_range_fn(move || Some((1, *range_limit.lock())));

        assert_eq!(feature.range(), Some((1, 100)));
        *limit.lock() = 50;
        assert_eq!(feature.range(), Some((1, 50)));
    }
}
