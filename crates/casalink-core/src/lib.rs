//! CasaLink Core
//!
//! Capability composition layer for smart-home devices. Heterogeneous
//! capabilities (dimmable lights, energy-metering plugs) are presented
//! through a uniform, introspectable model: consumers read and write named
//! features without knowing device-specific wire formats.
//!
//! ## Architecture
//!
//! - **Device**: cloneable handle owning the snapshot, modules, and features
//! - **Module**: named unit of device behavior, gated by a support check
//! - **ModuleRegistry**: per-device module map, consulted for delegation
//! - **Feature**: typed, range-validated handle over one device attribute
//! - **DeviceTransport**: seam to the wire, mocked in tests
//!
//! The update cycle is the sole writer of the snapshot: every section of
//! the batched query is fetched first, then swapped in atomically. Feature
//! reads are synchronous against the current snapshot; only writes and
//! explicit fetches suspend.

pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod feature;
pub mod module;
pub mod transport;
pub mod value;

// Re-exports for convenience
pub use config::DeviceConfig;
pub use data::{ops, Component, DeviceData};
pub use device::{Device, DeviceBuilder};
pub use error::{DeviceError, DeviceResult};
pub use feature::{
    ChoicesHandler, Feature, FeatureCategory, FeatureKind, RangeHandler, ReadHandler, WriteHandler,
};
pub use module::{
    DeviceLink, Module, ModuleInit, ModuleKind, ModuleProbe, ModuleRegistry, QueryRequest,
};
pub use transport::{DeviceTransport, MockTransport};
pub use value::FeatureValue;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
