//! Device handle and update cycle.
//!
//! A [`Device`] is a cheaply cloneable handle over shared state: the
//! transport, the current snapshot, the module registry, and the feature
//! map. The update cycle is the sole writer of the snapshot. It fetches
//! every section of the batched query first and swaps the snapshot in one
//! step, so readers never observe a partially refreshed state and a failed
//! update leaves the previous snapshot untouched.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::config::DeviceConfig;
use crate::data::{ops, DeviceData};
use crate::error::{DeviceError, DeviceResult};
use crate::feature::{Feature, FeatureCategory};
use crate::module::{Module, ModuleInit, ModuleKind, ModuleProbe, ModuleRegistry, QueryRequest};
use crate::transport::DeviceTransport;

pub(crate) struct DeviceInner {
    transport: Arc<dyn DeviceTransport>,
    config: DeviceConfig,
    data: RwLock<Arc<DeviceData>>,
    registry: RwLock<ModuleRegistry>,
    features: RwLock<BTreeMap<String, Feature>>,
    probes: Vec<ModuleProbe>,
    initialized: AtomicBool,
}

/// Builder for [`Device`].
pub struct DeviceBuilder {
    transport: Arc<dyn DeviceTransport>,
    config: DeviceConfig,
    probes: Vec<ModuleProbe>,
}

impl DeviceBuilder {
    pub fn with_config(mut self, config: DeviceConfig) -> Self {
        self.config = config;
        self
    }

    /// Add one module probe, tried at initialization.
    pub fn with_module(mut self, probe: ModuleProbe) -> Self {
        self.probes.push(probe);
        self
    }

    /// Add a set of module probes.
    pub fn with_modules(mut self, probes: impl IntoIterator<Item = ModuleProbe>) -> Self {
        self.probes.extend(probes);
        self
    }

    pub fn build(self) -> Device {
        Device {
            inner: Arc::new(DeviceInner {
                transport: self.transport,
                config: self.config,
                data: RwLock::new(Arc::new(DeviceData::new())),
                registry: RwLock::new(ModuleRegistry::new()),
                features: RwLock::new(BTreeMap::new()),
                probes: self.probes,
                initialized: AtomicBool::new(false),
            }),
        }
    }
}

/// Handle to one smart-home device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn builder(transport: Arc<dyn DeviceTransport>) -> DeviceBuilder {
        DeviceBuilder {
            transport,
            config: DeviceConfig::default(),
            probes: Vec::new(),
        }
    }

    pub(crate) fn from_inner(inner: Arc<DeviceInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<DeviceInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Current state snapshot. Empty until the first update lands.
    pub fn snapshot(&self) -> Arc<DeviceData> {
        self.inner.data.read().clone()
    }

    /// Whether the first update has completed and modules are initialized.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Relaxed)
    }

    /// Refresh the device state.
    ///
    /// The first update runs in two phases: a bootstrap device-info fetch
    /// drives module probing, then the full batched query (device-info plus
    /// every registered module's query) is fetched and features are
    /// collected. Later updates refresh the full query only. On transport
    /// failure the previous snapshot stays in place.
    pub async fn update(&self) -> DeviceResult<()> {
        let first = !self.is_initialized();
        if first {
            let bootstrap = QueryRequest::new().with_op(ops::GET_DEVICE_INFO, Value::Null);
            let snapshot = self.fetch(&bootstrap).await?;
            self.swap_snapshot(snapshot);
            self.probe_modules();
        }

        let request = self.full_query();
        let snapshot = self.fetch(&request).await?;
        self.swap_snapshot(snapshot);

        if first {
            self.collect_features();
            self.inner.initialized.store(true, Ordering::Relaxed);
            debug!(
                host = %self.inner.config.host,
                modules = self.inner.registry.read().len(),
                features = self.inner.features.read().len(),
                "device initialized"
            );
        }
        Ok(())
    }

    /// Drop all modules and features so the next update re-probes them.
    ///
    /// Memoized support checks live in the module instances, so rebuilding
    /// the registry is what invalidates them.
    pub fn reinitialize(&self) {
        debug!(host = %self.inner.config.host, "device reinitialization requested");
        self.inner.initialized.store(false, Ordering::Relaxed);
        *self.inner.registry.write() = ModuleRegistry::new();
        self.inner.features.write().clear();
    }

    /// Issue a single operation against the device.
    pub async fn call(&self, operation: &str, params: Value) -> DeviceResult<Value> {
        trace!(operation, "issuing device call");
        self.inner.transport.call(operation, params).await
    }

    pub fn is_on(&self) -> DeviceResult<bool> {
        self.snapshot()
            .info_field("device_on")
            .and_then(Value::as_bool)
            .ok_or_else(|| DeviceError::missing_data("device_on"))
    }

    pub async fn turn_on(&self) -> DeviceResult<Value> {
        self.set_power_state(true).await
    }

    pub async fn turn_off(&self) -> DeviceResult<Value> {
        self.set_power_state(false).await
    }

    async fn set_power_state(&self, on: bool) -> DeviceResult<Value> {
        self.call(ops::SET_DEVICE_INFO, json!({"device_on": on})).await
    }

    /// Device-reported alias, falling back to the configured one.
    pub fn alias(&self) -> Option<String> {
        self.snapshot()
            .info_field("alias")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.inner.config.alias.clone())
    }

    /// Look up one registered module.
    pub fn module(&self, kind: ModuleKind) -> Option<Arc<dyn Module>> {
        self.inner.registry.read().get(kind)
    }

    /// Snapshot of the module registry.
    pub fn modules(&self) -> ModuleRegistry {
        self.inner.registry.read().clone()
    }

    /// Look up one feature by id.
    pub fn feature(&self, id: &str) -> Option<Feature> {
        self.inner.features.read().get(id).cloned()
    }

    /// All features keyed by id.
    pub fn features(&self) -> BTreeMap<String, Feature> {
        self.inner.features.read().clone()
    }

    pub fn features_by_category(&self, category: FeatureCategory) -> Vec<Feature> {
        self.inner
            .features
            .read()
            .values()
            .filter(|feature| feature.category() == category)
            .cloned()
            .collect()
    }

    fn swap_snapshot(&self, snapshot: DeviceData) {
        *self.inner.data.write() = Arc::new(snapshot);
    }

    /// Fetch every section of a request, failing wholesale on the first
    /// transport error.
    async fn fetch(&self, request: &QueryRequest) -> DeviceResult<DeviceData> {
        let mut data = DeviceData::new();
        for (operation, params) in request.iter() {
            let response = self.call(operation, params.clone()).await?;
            data.insert_section(operation.clone(), response);
        }
        Ok(data)
    }

    /// Device-info plus every registered module's query.
    fn full_query(&self) -> QueryRequest {
        let mut request = QueryRequest::new().with_op(ops::GET_DEVICE_INFO, Value::Null);
        for module in self.inner.registry.read().iter() {
            request.merge(module.query());
        }
        request
    }

    fn probe_modules(&self) {
        let init = ModuleInit {
            device: Arc::downgrade(&self.inner),
        };
        let mut registry = ModuleRegistry::new();
        for probe in &self.inner.probes {
            if let Some(module) = probe(&init) {
                debug!(module = %module.kind(), "module registered");
                registry.insert(module);
            }
        }
        *self.inner.registry.write() = registry;
    }

    fn collect_features(&self) {
        let registry = self.inner.registry.read().clone();
        let mut features = BTreeMap::new();
        for module in registry.iter() {
            for feature in Arc::clone(module).features() {
                features.insert(feature.id().to_string(), feature);
            }
        }
        *self.inner.features.write() = features;
    }
}

impl DeviceInner {
    pub(crate) fn snapshot(&self) -> Arc<DeviceData> {
        self.data.read().clone()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("host", &self.inner.config.host)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureKind;
    use crate::module::DeviceLink;
    use crate::transport::MockTransport;
    use crate::value::FeatureValue;

    const GET_REALTIME: &str = "get_realtime";

    struct MeterModule {
        link: DeviceLink,
    }

    impl MeterModule {
        fn probe(init: &ModuleInit) -> Option<Arc<dyn Module>> {
            let module = Arc::new(Self {
                link: init.link(ModuleKind::Energy),
            });
            if module.is_supported() {
                Some(module)
            } else {
                None
            }
        }

        fn power(&self) -> DeviceResult<i64> {
            self.data()?
                .get("power")
                .and_then(Value::as_i64)
                .ok_or_else(|| DeviceError::missing_data("power"))
        }
    }

    impl Module for MeterModule {
        fn kind(&self) -> ModuleKind {
            ModuleKind::Energy
        }

        fn link(&self) -> &DeviceLink {
            &self.link
        }

        fn query(&self) -> QueryRequest {
            QueryRequest::new().with_op(GET_REALTIME, Value::Null)
        }

        fn features(self: Arc<Self>) -> Vec<Feature> {
            let weak = Arc::downgrade(&self);
            vec![Feature::new(
                "meter_power",
                "Meter power",
                FeatureKind::Number,
                move || {
                    let module = weak
                        .upgrade()
                        .ok_or(DeviceError::Detached(ModuleKind::Energy))?;
                    module.power().map(FeatureValue::Int)
                },
            )
            .with_category(FeatureCategory::Primary)]
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn device_info(with_meter: bool) -> Value {
        let components = if with_meter {
            json!([{"id": "energy_monitoring", "ver": 1}])
        } else {
            json!([])
        };
        json!({
            "device_on": true,
            "components": components,
        })
    }

    fn meter_device() -> (Device, Arc<MockTransport>) {
        let transport = Arc::new(
            MockTransport::new()
                .with_device_info_echo()
                .with_response(ops::GET_DEVICE_INFO, device_info(true))
                .with_response(GET_REALTIME, json!({"power": 36})),
        );
        let device = Device::builder(transport.clone())
            .with_config(DeviceConfig::new("192.168.0.23"))
            .with_module(MeterModule::probe)
            .build();
        (device, transport)
    }

    #[tokio::test]
    async fn test_first_update_is_two_phase() {
        let (device, transport) = meter_device();
        assert!(!device.is_initialized());

        device.update().await.unwrap();
        assert!(device.is_initialized());

        let ops_issued: Vec<String> =
            transport.calls().into_iter().map(|(op, _)| op).collect();
        // Bootstrap device-info fetch, then the full batched query.
        assert_eq!(
            ops_issued,
            vec![
                ops::GET_DEVICE_INFO.to_string(),
                ops::GET_DEVICE_INFO.to_string(),
                GET_REALTIME.to_string(),
            ]
        );

        transport.clear_calls();
        device.update().await.unwrap();
        let ops_issued: Vec<String> =
            transport.calls().into_iter().map(|(op, _)| op).collect();
        assert_eq!(
            ops_issued,
            vec![ops::GET_DEVICE_INFO.to_string(), GET_REALTIME.to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_snapshot() {
        let (device, transport) = meter_device();
        device.update().await.unwrap();
        assert!(device.is_on().unwrap());

        transport.set_response(ops::GET_DEVICE_INFO, json!({"device_on": false}));
        transport.fail_with("connection reset");
        assert!(device.update().await.is_err());

        // The old snapshot is still served.
        assert!(device.is_on().unwrap());
        assert_eq!(device.snapshot().section(GET_REALTIME).unwrap()["power"], 36);
    }

    #[tokio::test]
    async fn test_failed_first_update_leaves_device_uninitialized() {
        let (device, transport) = meter_device();
        transport.fail_with("no route to host");

        assert!(device.update().await.is_err());
        assert!(!device.is_initialized());
        assert!(device.modules().is_empty());

        transport.clear_failure();
        device.update().await.unwrap();
        assert!(device.is_initialized());
        assert!(device.modules().contains(ModuleKind::Energy));
    }

    #[tokio::test]
    async fn test_unsupported_module_is_not_registered() {
        let transport = Arc::new(
            MockTransport::new().with_response(ops::GET_DEVICE_INFO, device_info(false)),
        );
        let device = Device::builder(transport)
            .with_module(MeterModule::probe)
            .build();
        device.update().await.unwrap();

        assert!(device.modules().is_empty());
        assert!(device.feature("meter_power").is_none());
    }

    #[tokio::test]
    async fn test_reinitialize_rebuilds_modules() {
        let (device, transport) = meter_device();
        device.update().await.unwrap();
        let before = device.module(ModuleKind::Energy).unwrap();

        device.reinitialize();
        assert!(!device.is_initialized());
        assert!(device.modules().is_empty());

        device.update().await.unwrap();
        let after = device.module(ModuleKind::Energy).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));

        // Dropping the advertised component makes the rebuilt registry skip
        // the module entirely.
        transport.set_response(ops::GET_DEVICE_INFO, device_info(false));
        device.reinitialize();
        device.update().await.unwrap();
        assert!(device.module(ModuleKind::Energy).is_none());
    }

    #[tokio::test]
    async fn test_power_state_wire_format() {
        let (device, transport) = meter_device();
        device.update().await.unwrap();

        device.turn_off().await.unwrap();
        assert_eq!(
            transport.calls_for(ops::SET_DEVICE_INFO),
            vec![json!({"device_on": false})]
        );

        device.update().await.unwrap();
        assert!(!device.is_on().unwrap());

        device.turn_on().await.unwrap();
        device.update().await.unwrap();
        assert!(device.is_on().unwrap());
    }

    #[tokio::test]
    async fn test_alias_prefers_device_report() {
        let (_, transport) = meter_device();
        let device = Device::builder(transport.clone())
            .with_config(DeviceConfig::new("192.168.0.23").with_alias("Configured"))
            .build();
        assert_eq!(device.alias().as_deref(), Some("Configured"));

        transport.set_response(
            ops::GET_DEVICE_INFO,
            json!({"device_on": true, "alias": "Living room plug", "components": []}),
        );
        device.update().await.unwrap();
        assert_eq!(device.alias().as_deref(), Some("Living room plug"));
    }

    #[tokio::test]
    async fn test_features_read_through_module() {
        let (device, _transport) = meter_device();
        device.update().await.unwrap();

        let feature = device.feature("meter_power").unwrap();
        assert_eq!(feature.value().unwrap(), FeatureValue::Int(36));
        assert_eq!(device.features_by_category(FeatureCategory::Primary).len(), 1);
        assert!(device.features_by_category(FeatureCategory::Debug).is_empty());
    }
}
