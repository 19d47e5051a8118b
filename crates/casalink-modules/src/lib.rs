//! CasaLink Modules
//!
//! Capability modules built on [`casalink_core`]:
//! - **Brightness**: percent dimming with power-off at zero and delegation
//!   to a running light effect
//! - **LightEffect**: dynamic effect programs that own the light output
//!   while active
//! - **Energy**: realtime metering with unit normalization and calendar
//!   statistics
//!
//! [`default_modules`] returns the probe set for a standard device; each
//! probe registers its module only on devices advertising the matching
//! component.

use std::sync::{Arc, Weak};

use casalink_core::{DeviceError, DeviceResult, Module, ModuleKind, ModuleProbe};

pub mod brightness;
pub mod emeter;
pub mod energy;
pub mod light_effect;

// Re-exports for convenience
pub use brightness::{Brightness, BRIGHTNESS_MAX, BRIGHTNESS_MIN};
pub use emeter::EmeterStatus;
pub use energy::{Energy, EnergyCapability};
pub use light_effect::{LightEffect, EFFECT_OFF};

/// Probe set covering every module in this crate.
pub fn default_modules() -> Vec<ModuleProbe> {
    vec![Brightness::probe, LightEffect::probe, Energy::probe]
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upgrade a feature closure's weak module handle. A dangling handle means
/// the owning device has been dropped.
pub(crate) fn upgrade_module<M: Module>(
    module: &Weak<M>,
    kind: ModuleKind,
) -> DeviceResult<Arc<M>> {
    module.upgrade().ok_or(DeviceError::Detached(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_modules_cover_all_kinds() {
        assert_eq!(default_modules().len(), 3);
    }
}
