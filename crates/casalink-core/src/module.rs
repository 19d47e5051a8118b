//! Capability modules and the per-device module registry.
//!
//! A module is a named unit of device behavior (brightness, energy, ...)
//! gated by a support check against the device's advertised capabilities.
//! Modules hold a weak link to their device: the device owns its modules,
//! never the other way around, so cross-module delegation cannot create
//! reference cycles.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::data::DeviceData;
use crate::device::{Device, DeviceInner};
use crate::error::{DeviceError, DeviceResult};
use crate::feature::Feature;

/// Identity of a capability module, one instance per kind per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Brightness,
    LightEffect,
    Energy,
}

impl ModuleKind {
    /// Component identifier the device must advertise for this module.
    pub fn component(&self) -> &'static str {
        match self {
            Self::Brightness => "brightness",
            Self::LightEffect => "light_effect",
            Self::Energy => "energy_monitoring",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.component())
    }
}

/// Request descriptor a module contributes to the batched update cycle.
///
/// Operations are keyed by wire name with their parameters. An empty
/// request means the module's data rides on the shared device-info
/// response and needs no dedicated fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    ops: BTreeMap<String, Value>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_op(mut self, operation: impl Into<String>, params: Value) -> Self {
        self.ops.insert(operation.into(), params);
        self
    }

    pub fn merge(&mut self, other: QueryRequest) {
        self.ops.extend(other.ops);
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.ops.contains_key(operation)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.ops.iter()
    }

    fn single_op(&self) -> Option<&str> {
        if self.ops.len() == 1 {
            self.ops.keys().next().map(String::as_str)
        } else {
            None
        }
    }
}

/// Non-owning back-reference from a module to its device.
///
/// Carries the memoized support flag: computed once per initialization
/// pass and discarded with the module when the device re-initializes.
pub struct DeviceLink {
    kind: ModuleKind,
    device: Weak<DeviceInner>,
    supported: OnceLock<bool>,
}

impl DeviceLink {
    pub(crate) fn new(kind: ModuleKind, device: Weak<DeviceInner>) -> Self {
        Self {
            kind,
            device,
            supported: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Upgrade to the owning device.
    pub fn device(&self) -> DeviceResult<Device> {
        self.device
            .upgrade()
            .map(Device::from_inner)
            .ok_or(DeviceError::Detached(self.kind))
    }

    /// Current state snapshot of the owning device.
    pub fn snapshot(&self) -> DeviceResult<Arc<DeviceData>> {
        Ok(self.device()?.snapshot())
    }
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("kind", &self.kind)
            .field("supported", &self.supported.get())
            .finish()
    }
}

/// A named unit of device behavior.
///
/// Implementations provide identity, the device link, and optionally a
/// dedicated query, a support check, and feature descriptors. Reads are
/// synchronous against the cached snapshot; only remote calls suspend.
pub trait Module: Send + Sync + 'static {
    fn kind(&self) -> ModuleKind;

    /// Back-reference to the owning device.
    fn link(&self) -> &DeviceLink;

    /// Request contributed to the next batched update. Defaults to empty,
    /// meaning the module reads from the shared device-info section.
    fn query(&self) -> QueryRequest {
        QueryRequest::new()
    }

    /// Support check against a snapshot. The default accepts any device
    /// advertising the module's component.
    fn check_supported(&self, data: &DeviceData) -> bool {
        data.has_component(self.kind().component())
    }

    /// Feature descriptors exposed by this module, collected by the device
    /// once the first full update has landed.
    fn features(self: Arc<Self>) -> Vec<Feature> {
        Vec::new()
    }

    /// Downcast hook for typed cross-module delegation.
    fn as_any(&self) -> &dyn Any;

    /// Whether this module is active on its device. Computed once from the
    /// snapshot and memoized for the lifetime of the module instance.
    fn is_supported(&self) -> bool {
        let link = self.link();
        *link.supported.get_or_init(|| match link.snapshot() {
            Ok(data) => self.check_supported(&data),
            Err(_) => false,
        })
    }

    /// Negotiated version of the module's component, defaulting to 1.
    fn supported_version(&self) -> u32 {
        self.link()
            .snapshot()
            .ok()
            .and_then(|data| data.component_version(self.kind().component()))
            .unwrap_or(1)
    }

    /// The module's view of the cached snapshot: the device-info section
    /// for modules with an empty query, the dedicated section for a single
    /// query, and a map of present sections otherwise.
    fn data(&self) -> DeviceResult<Value> {
        let snapshot = self.link().snapshot()?;
        let query = self.query();
        if query.is_empty() {
            return snapshot.device_info().cloned();
        }
        if let Some(op) = query.single_op() {
            return snapshot
                .section(op)
                .cloned()
                .ok_or_else(|| DeviceError::missing_data(op));
        }
        let mut sections = serde_json::Map::new();
        for (op, _) in query.iter() {
            if let Some(section) = snapshot.section(op) {
                sections.insert(op.clone(), section.clone());
            }
        }
        Ok(Value::Object(sections))
    }
}

/// Hands probe functions what they need to wire a module to its device.
pub struct ModuleInit {
    pub(crate) device: Weak<DeviceInner>,
}

impl ModuleInit {
    /// Mint a device link for a module of the given kind.
    pub fn link(&self, kind: ModuleKind) -> DeviceLink {
        DeviceLink::new(kind, self.device.clone())
    }
}

/// Factory that instantiates a module when the device supports it.
pub type ModuleProbe = fn(&ModuleInit) -> Option<Arc<dyn Module>>;

/// Per-device mapping from module kind to module instance.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleKind, Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. At most one instance per kind: a duplicate is
    /// dropped and the first registration kept.
    pub fn insert(&mut self, module: Arc<dyn Module>) {
        let kind = module.kind();
        if self.modules.contains_key(&kind) {
            warn!(module = %kind, "duplicate module registration ignored");
            return;
        }
        self.modules.insert(kind, module);
    }

    pub fn get(&self, kind: ModuleKind) -> Option<Arc<dyn Module>> {
        self.modules.get(&kind).cloned()
    }

    /// Typed lookup for delegation between cooperating modules.
    pub fn get_as<M: Module>(&self, kind: ModuleKind) -> Option<&M> {
        self.modules.get(&kind)?.as_any().downcast_ref()
    }

    pub fn contains(&self, kind: ModuleKind) -> bool {
        self.modules.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ModuleKind> {
        let mut kinds: Vec<_> = self.modules.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::data::ops;
    use crate::transport::MockTransport;
    use serde_json::json;

    struct TestModule {
        link: DeviceLink,
    }

    impl TestModule {
        fn probe(init: &ModuleInit) -> Option<Arc<dyn Module>> {
            let module = Arc::new(Self {
                link: init.link(ModuleKind::Brightness),
            });
            if module.is_supported() {
                Some(module)
            } else {
                None
            }
        }
    }

    impl Module for TestModule {
        fn kind(&self) -> ModuleKind {
            ModuleKind::Brightness
        }

        fn link(&self) -> &DeviceLink {
            &self.link
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn device_info() -> Value {
        json!({
            "device_on": true,
            "brightness": 50,
            "components": [{"id": "brightness", "ver": 3}],
        })
    }

    async fn test_device() -> (Device, Arc<MockTransport>) {
        let transport = Arc::new(
            MockTransport::new().with_response(ops::GET_DEVICE_INFO, device_info()),
        );
        let device = Device::builder(transport.clone())
            .with_config(DeviceConfig::new("127.0.0.1"))
            .with_module(TestModule::probe)
            .build();
        device.update().await.unwrap();
        (device, transport)
    }

    #[test]
    fn test_query_request_merge() {
        let mut request = QueryRequest::new().with_op(ops::GET_DEVICE_INFO, Value::Null);
        request.merge(QueryRequest::new().with_op("get_realtime", Value::Null));

        assert_eq!(request.len(), 2);
        assert!(request.contains("get_realtime"));
        assert_eq!(request.single_op(), None);
    }

    #[test]
    fn test_module_kind_component() {
        assert_eq!(ModuleKind::Energy.component(), "energy_monitoring");
        assert_eq!(ModuleKind::LightEffect.to_string(), "light_effect");
    }

    #[tokio::test]
    async fn test_support_is_memoized_until_reinit() {
        let (device, transport) = test_device().await;
        let module = device.module(ModuleKind::Brightness).unwrap();
        assert!(module.is_supported());
        assert_eq!(module.supported_version(), 3);

        // A later snapshot without the component does not flip the memoized
        // flag; only re-initialization rebuilds the module.
        transport.set_response(ops::GET_DEVICE_INFO, json!({"components": []}));
        device.update().await.unwrap();
        assert!(module.is_supported());
    }

    #[tokio::test]
    async fn test_data_defaults_to_device_info_view() {
        let (device, _transport) = test_device().await;
        let module = device.module(ModuleKind::Brightness).unwrap();

        let data = module.data().unwrap();
        assert_eq!(data.get("brightness").and_then(Value::as_i64), Some(50));
    }

    #[tokio::test]
    async fn test_registry_keeps_first_registration() {
        let (device, _transport) = test_device().await;
        let first = device.module(ModuleKind::Brightness).unwrap();

        let init = ModuleInit {
            device: device.downgrade(),
        };
        let mut registry = ModuleRegistry::new();
        registry.insert(first.clone());
        let duplicate = TestModule::probe(&init).unwrap();
        registry.insert(duplicate);

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(ModuleKind::Brightness).unwrap(), &first));
    }

    #[tokio::test]
    async fn test_detached_link_errors() {
        let (device, _transport) = test_device().await;
        let module = device.module(ModuleKind::Brightness).unwrap();
        drop(device);

        let err = module.link().device().unwrap_err();
        assert!(matches!(err, DeviceError::Detached(ModuleKind::Brightness)));
    }
}
