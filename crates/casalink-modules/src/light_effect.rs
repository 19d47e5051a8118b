//! Dynamic light effect module.
//!
//! While an effect program runs it owns the physical light output, so the
//! brightness module defers to this one. State rides on the shared
//! device-info response; activation, deactivation, and per-effect
//! brightness go through a dedicated write operation.

use std::sync::Arc;

use serde_json::{json, Value};

use casalink_core::{
    DeviceError, DeviceLink, DeviceResult, Feature, FeatureCategory, FeatureKind, FeatureValue,
    Module, ModuleInit, ModuleKind,
};

use crate::upgrade_module;

pub const SET_DYNAMIC_LIGHT_EFFECT: &str = "set_dynamic_light_effect";

/// Sentinel effect name meaning "no effect running".
pub const EFFECT_OFF: &str = "Off";

const ENABLE_KEY: &str = "dynamic_light_effect_enable";
const ID_KEY: &str = "dynamic_light_effect_id";
const BRIGHTNESS_KEY: &str = "dynamic_light_effect_brightness";
const LIST_KEY: &str = "dynamic_light_effect_list";

/// Effect program control for devices advertising the `light_effect`
/// component.
pub struct LightEffect {
    link: DeviceLink,
}

impl LightEffect {
    pub fn probe(init: &ModuleInit) -> Option<Arc<dyn Module>> {
        let module = Arc::new(Self {
            link: init.link(ModuleKind::LightEffect),
        });
        if module.is_supported() {
            Some(module)
        } else {
            None
        }
    }

    /// Whether an effect currently owns the light output.
    pub fn is_active(&self) -> bool {
        self.active_effect().map(|id| id.is_some()).unwrap_or(false)
    }

    /// Identifier of the running effect, `None` when no effect runs.
    pub fn effect(&self) -> DeviceResult<Option<String>> {
        self.active_effect()
    }

    /// Effect identifiers the device advertises, possibly empty.
    pub fn effect_list(&self) -> DeviceResult<Vec<String>> {
        let snapshot = self.link.snapshot()?;
        Ok(snapshot
            .info_field(LIST_KEY)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// The running effect's own brightness.
    pub fn brightness(&self) -> DeviceResult<i64> {
        self.link
            .snapshot()?
            .info_field(BRIGHTNESS_KEY)
            .and_then(Value::as_i64)
            .ok_or_else(|| DeviceError::missing_data(BRIGHTNESS_KEY))
    }

    /// Adjust the running effect's brightness.
    pub async fn set_brightness(&self, brightness: i64) -> DeviceResult<Value> {
        if !(1..=100).contains(&brightness) {
            return Err(DeviceError::invalid_value(
                "brightness",
                brightness,
                "valid range: 1-100",
            ));
        }
        let Some(id) = self.active_effect()? else {
            return Err(DeviceError::missing_data("active light effect"));
        };
        let device = self.link.device()?;
        device
            .call(
                SET_DYNAMIC_LIGHT_EFFECT,
                json!({"id": id, "brightness": brightness}),
            )
            .await
    }

    /// Activate an effect by identifier. [`EFFECT_OFF`] deactivates instead.
    pub async fn set_effect(&self, id: &str) -> DeviceResult<Value> {
        if id == EFFECT_OFF {
            return self.deactivate().await;
        }
        let advertised = self.effect_list()?;
        if !advertised.iter().any(|candidate| candidate == id) {
            let mut valid = vec![EFFECT_OFF.to_string()];
            valid.extend(advertised);
            return Err(DeviceError::invalid_value(
                "light_effect",
                id,
                format!("valid choices: {}", valid.join(", ")),
            ));
        }
        let device = self.link.device()?;
        device
            .call(SET_DYNAMIC_LIGHT_EFFECT, json!({"enable": 1, "id": id}))
            .await
    }

    /// Stop the running effect and hand the output back to direct control.
    pub async fn deactivate(&self) -> DeviceResult<Value> {
        let device = self.link.device()?;
        device
            .call(SET_DYNAMIC_LIGHT_EFFECT, json!({"enable": 0}))
            .await
    }

    fn active_effect(&self) -> DeviceResult<Option<String>> {
        let snapshot = self.link.snapshot()?;
        let enabled = snapshot
            .info_field(ENABLE_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(0)
            != 0;
        if !enabled {
            return Ok(None);
        }
        Ok(snapshot
            .info_field(ID_KEY)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }
}

impl Module for LightEffect {
    fn kind(&self) -> ModuleKind {
        ModuleKind::LightEffect
    }

    fn link(&self) -> &DeviceLink {
        &self.link
    }

    fn features(self: Arc<Self>) -> Vec<Feature> {
        let read_module = Arc::downgrade(&self);
        let choices_module = Arc::downgrade(&self);
        let write_module = Arc::downgrade(&self);
        vec![Feature::new(
            "light_effect",
            "Light effect",
            FeatureKind::Choice,
            move || {
                let module = upgrade_module(&read_module, ModuleKind::LightEffect)?;
                let effect = module.effect()?.unwrap_or_else(|| EFFECT_OFF.to_string());
                Ok(FeatureValue::String(effect))
            },
        )
        .with_category(FeatureCategory::Primary)
        .with_choices_fn(move || {
            let mut choices = vec![EFFECT_OFF.to_string()];
            if let Some(module) = choices_module.upgrade() {
                choices.extend(module.effect_list().unwrap_or_default());
            }
            choices
        })
        .with_write(move |value| {
            let module = write_module.clone();
            async move {
                let effect = value.as_str().unwrap_or(EFFECT_OFF).to_string();
                upgrade_module(&module, ModuleKind::LightEffect)?
                    .set_effect(&effect)
                    .await
            }
        })]
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
