//! Brightness module.
//!
//! Brightness is the same abstract feature whether the output is a plain
//! dimmable light or a light currently driven by an effect program. Reads
//! and writes recheck delegation on every call: when a light effect is
//! active it owns the physical output and this module defers to it.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use casalink_core::{
    ops, DeviceData, DeviceError, DeviceLink, DeviceResult, Feature, FeatureCategory, FeatureKind,
    FeatureValue, Module, ModuleInit, ModuleKind,
};

use crate::light_effect::LightEffect;
use crate::upgrade_module;

pub const BRIGHTNESS_MIN: i64 = 0;
pub const BRIGHTNESS_MAX: i64 = 100;

/// Brightness control for devices advertising the `brightness` component.
pub struct Brightness {
    link: DeviceLink,
}

impl Brightness {
    pub fn probe(init: &ModuleInit) -> Option<Arc<dyn Module>> {
        let module = Arc::new(Self {
            link: init.link(ModuleKind::Brightness),
        });
        if module.is_supported() {
            Some(module)
        } else {
            None
        }
    }

    /// Current brightness in percent.
    ///
    /// When an effect is active its brightness is returned instead of this
    /// module's own cached field, which would be stale while the effect
    /// drives the output.
    pub fn brightness(&self) -> DeviceResult<i64> {
        let device = self.link.device()?;
        let registry = device.modules();
        if let Some(effect) = registry.get_as::<LightEffect>(ModuleKind::LightEffect) {
            if effect.is_active() {
                return effect.brightness();
            }
        }
        self.link
            .snapshot()?
            .info_field("brightness")
            .and_then(Value::as_i64)
            .ok_or_else(|| DeviceError::missing_data("brightness"))
    }

    /// Set the brightness. A value of 0 turns the device off.
    ///
    /// `transition` is accepted for interface symmetry with other lighting
    /// controls and ignored.
    pub async fn set_brightness(
        &self,
        brightness: i64,
        transition: Option<u64>,
    ) -> DeviceResult<Value> {
        if !(BRIGHTNESS_MIN..=BRIGHTNESS_MAX).contains(&brightness) {
            return Err(DeviceError::invalid_value(
                "brightness",
                brightness,
                format!("valid range: {}-{}%", BRIGHTNESS_MIN, BRIGHTNESS_MAX),
            ));
        }
        if let Some(transition) = transition {
            debug!(transition, "brightness transitions are not supported, ignoring");
        }

        let device = self.link.device()?;
        if brightness == 0 {
            return device.turn_off().await;
        }

        let registry = device.modules();
        if let Some(effect) = registry.get_as::<LightEffect>(ModuleKind::LightEffect) {
            if effect.is_active() {
                return effect.set_brightness(brightness).await;
            }
        }
        device
            .call(ops::SET_DEVICE_INFO, json!({"brightness": brightness}))
            .await
    }
}

impl Module for Brightness {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Brightness
    }

    fn link(&self) -> &DeviceLink {
        &self.link
    }

    fn check_supported(&self, data: &DeviceData) -> bool {
        // Some devices advertise the component without reporting the field.
        data.has_component(self.kind().component()) && data.info_field("brightness").is_some()
    }

    fn features(self: Arc<Self>) -> Vec<Feature> {
        let read_module = Arc::downgrade(&self);
        let write_module = Arc::downgrade(&self);
        vec![Feature::new(
            "brightness",
            "Brightness",
            FeatureKind::Number,
            move || {
                let module = upgrade_module(&read_module, ModuleKind::Brightness)?;
                module.brightness().map(FeatureValue::Int)
            },
        )
        .with_category(FeatureCategory::Primary)
        .with_unit("%")
        .with_range(BRIGHTNESS_MIN, BRIGHTNESS_MAX)
        .with_write(move |value| {
            let module = write_module.clone();
            async move {
                // Validation has already run; treat the payload as trusted.
                let brightness = value.as_int().unwrap_or(BRIGHTNESS_MIN);
                upgrade_module(&module, ModuleKind::Brightness)?
                    .set_brightness(brightness, None)
                    .await
            }
        })]
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
