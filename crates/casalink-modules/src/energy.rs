//! Energy monitoring module.
//!
//! Wraps the realtime reading in [`EmeterStatus`] and aggregates the
//! device's retained per-day and per-month energy totals into calendar
//! maps. Which sensors a device actually carries varies within the same
//! protocol (plugs report voltage and current, bulbs power only), so
//! capabilities are detected from live data rather than static metadata.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;
use chrono::{Datelike, Local};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use casalink_core::{
    DeviceError, DeviceLink, DeviceResult, Feature, FeatureCategory, FeatureKind, FeatureValue,
    Module, ModuleInit, ModuleKind, QueryRequest,
};

use crate::emeter::EmeterStatus;
use crate::upgrade_module;

pub const GET_REALTIME: &str = "get_realtime";
pub const GET_DAYSTAT: &str = "get_daystat";
pub const GET_MONTHSTAT: &str = "get_monthstat";
pub const ERASE_EMETER_STAT: &str = "erase_emeter_stat";

bitflags! {
    /// Independent sensor capabilities, derived from live readings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnergyCapability: u8 {
        /// Cumulative consumption counter present
        const CONSUMPTION_TOTAL = 1 << 0;
        /// Voltage and current sensing present
        const VOLTAGE_CURRENT = 1 << 1;
        /// Retained per-day and per-month statistics present
        const PERIODIC_STATS = 1 << 2;
    }
}

/// One retained statistics entry as reported by the device.
///
/// Newer firmware reports `energy_wh` (watt-hours), older firmware
/// `energy` (kilowatt-hours). Calendar fields are optional so a malformed
/// entry is skipped instead of failing the whole list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StatEntry {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    energy_wh: Option<f64>,
    energy: Option<f64>,
}

impl StatEntry {
    /// Energy value in kWh or raw Wh.
    fn value(&self, kwh: bool) -> Option<f64> {
        if let Some(wh) = self.energy_wh {
            return Some(if kwh { wh / 1000.0 } else { wh });
        }
        self.energy
            .map(|kwh_value| if kwh { kwh_value } else { kwh_value * 1000.0 })
    }
}

enum StatKey {
    Day,
    Month,
}

fn parse_entries(section: &Value, list_key: &str) -> DeviceResult<Vec<StatEntry>> {
    let list = section
        .get(list_key)
        .cloned()
        .ok_or_else(|| DeviceError::missing_data(list_key))?;
    serde_json::from_value(list).map_err(|_| DeviceError::missing_data(list_key))
}

fn aggregate(entries: &[StatEntry], key: StatKey, kwh: bool) -> BTreeMap<u32, f64> {
    let mut stats = BTreeMap::new();
    for entry in entries {
        let bucket = match key {
            StatKey::Day => entry.day,
            StatKey::Month => entry.month,
        };
        let Some(bucket) = bucket else {
            warn!("stat entry without calendar key skipped");
            continue;
        };
        let Some(value) = entry.value(kwh) else {
            warn!(bucket, "stat entry without energy value skipped");
            continue;
        };
        stats.insert(bucket, value);
    }
    stats
}

/// Energy statistics engine for metering devices.
pub struct Energy {
    link: DeviceLink,
}

impl Energy {
    pub fn probe(init: &ModuleInit) -> Option<Arc<dyn Module>> {
        let module = Arc::new(Self {
            link: init.link(ModuleKind::Energy),
        });
        if module.is_supported() {
            Some(module)
        } else {
            None
        }
    }

    /// The cached realtime reading.
    pub fn status(&self) -> DeviceResult<EmeterStatus> {
        let snapshot = self.link.snapshot()?;
        let section = snapshot
            .section(GET_REALTIME)
            .ok_or_else(|| DeviceError::missing_data(GET_REALTIME))?;
        EmeterStatus::from_value(section)
    }

    /// Fetch a fresh realtime reading, bypassing the snapshot.
    pub async fn realtime(&self) -> DeviceResult<EmeterStatus> {
        let device = self.link.device()?;
        let response = device.call(GET_REALTIME, Value::Null).await?;
        EmeterStatus::from_value(&response)
    }

    /// Instantaneous power draw in watts.
    pub fn current_consumption(&self) -> DeviceResult<f64> {
        self.status()?
            .power()
            .ok_or_else(|| DeviceError::missing_data("power"))
    }

    /// Cumulative consumption in kWh, if the device counts it.
    pub fn consumption_total(&self) -> DeviceResult<Option<f64>> {
        Ok(self.status()?.total())
    }

    /// Today's consumption in kWh from the cached daily list.
    ///
    /// The retained list is authoritative: if it has not been refreshed to
    /// cover today there is no entry and the result is `None`, never a
    /// fabricated zero.
    pub fn consumption_today(&self) -> DeviceResult<Option<f64>> {
        let now = Local::now();
        Ok(self
            .cached_entries(GET_DAYSTAT, "day_list")?
            .iter()
            .find(|entry| {
                entry.year == Some(now.year())
                    && entry.month == Some(now.month())
                    && entry.day == Some(now.day())
            })
            .and_then(|entry| entry.value(true)))
    }

    /// This month's consumption in kWh from the cached monthly list.
    pub fn consumption_this_month(&self) -> DeviceResult<Option<f64>> {
        let now = Local::now();
        Ok(self
            .cached_entries(GET_MONTHSTAT, "month_list")?
            .iter()
            .find(|entry| entry.year == Some(now.year()) && entry.month == Some(now.month()))
            .and_then(|entry| entry.value(true)))
    }

    /// Fetch per-day totals for one month, keyed by day-of-month.
    ///
    /// Defaults to the current year and month. A period with no retained
    /// data yields an empty map, not an error. Values are kWh unless `kwh`
    /// is false, in which case the raw Wh values are returned.
    pub async fn daily_stats(
        &self,
        year: Option<i32>,
        month: Option<u32>,
        kwh: bool,
    ) -> DeviceResult<BTreeMap<u32, f64>> {
        let now = Local::now();
        let year = year.unwrap_or_else(|| now.year());
        let month = month.unwrap_or_else(|| now.month());

        let device = self.link.device()?;
        let response = device
            .call(GET_DAYSTAT, json!({"year": year, "month": month}))
            .await?;
        let entries: Vec<StatEntry> = parse_entries(&response, "day_list")?
            .into_iter()
            .filter(|entry| entry.year == Some(year) && entry.month == Some(month))
            .collect();
        Ok(aggregate(&entries, StatKey::Day, kwh))
    }

    /// Fetch per-month totals for one year, keyed by month-of-year.
    pub async fn monthly_stats(
        &self,
        year: Option<i32>,
        kwh: bool,
    ) -> DeviceResult<BTreeMap<u32, f64>> {
        let now = Local::now();
        let year = year.unwrap_or_else(|| now.year());

        let device = self.link.device()?;
        let response = device.call(GET_MONTHSTAT, json!({"year": year})).await?;
        let entries: Vec<StatEntry> = parse_entries(&response, "month_list")?
            .into_iter()
            .filter(|entry| entry.year == Some(year))
            .collect();
        Ok(aggregate(&entries, StatKey::Month, kwh))
    }

    /// Erase the device's retained statistics.
    pub async fn erase_stats(&self) -> DeviceResult<Value> {
        let device = self.link.device()?;
        device.call(ERASE_EMETER_STAT, Value::Null).await
    }

    /// Whether the device retains per-day and per-month history. Version 1
    /// of the metering component reports realtime values only.
    pub fn has_periodic_stats(&self) -> bool {
        self.supported_version() >= 2
    }

    /// Capability flags recomputed from the live snapshot.
    pub fn capabilities(&self) -> EnergyCapability {
        let mut caps = EnergyCapability::empty();
        if let Ok(status) = self.status() {
            if status.total().is_some() {
                caps |= EnergyCapability::CONSUMPTION_TOTAL;
            }
            if status.voltage().is_some() {
                caps |= EnergyCapability::VOLTAGE_CURRENT;
            }
        }
        if self.has_periodic_stats() {
            caps |= EnergyCapability::PERIODIC_STATS;
        }
        caps
    }

    pub fn supports(&self, capability: EnergyCapability) -> bool {
        self.capabilities().contains(capability)
    }

    fn cached_entries(&self, operation: &str, list_key: &str) -> DeviceResult<Vec<StatEntry>> {
        let snapshot = self.link.snapshot()?;
        match snapshot.section(operation) {
            Some(section) => parse_entries(section, list_key),
            None => Ok(Vec::new()),
        }
    }
}

impl Module for Energy {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Energy
    }

    fn link(&self) -> &DeviceLink {
        &self.link
    }

    fn query(&self) -> QueryRequest {
        let mut request = QueryRequest::new().with_op(GET_REALTIME, Value::Null);
        if self.has_periodic_stats() {
            let now = Local::now();
            request = request
                .with_op(GET_DAYSTAT, json!({"year": now.year(), "month": now.month()}))
                .with_op(GET_MONTHSTAT, json!({"year": now.year()}));
        }
        request
    }

    fn features(self: Arc<Self>) -> Vec<Feature> {
        let caps = self.capabilities();
        let mut features = Vec::new();

        let module = Arc::downgrade(&self);
        features.push(
            Feature::new(
                "current_consumption",
                "Current consumption",
                FeatureKind::Number,
                move || {
                    let module = upgrade_module(&module, ModuleKind::Energy)?;
                    module.current_consumption().map(FeatureValue::Float)
                },
            )
            .with_category(FeatureCategory::Primary)
            .with_unit("W")
            .with_precision_hint(1),
        );

        if caps.contains(EnergyCapability::PERIODIC_STATS) {
            let module = Arc::downgrade(&self);
            features.push(
                Feature::new(
                    "consumption_today",
                    "Today's consumption",
                    FeatureKind::Number,
                    move || {
                        let module = upgrade_module(&module, ModuleKind::Energy)?;
                        module.consumption_today().map(FeatureValue::from)
                    },
                )
                .with_category(FeatureCategory::Info)
                .with_unit("kWh")
                .with_precision_hint(3),
            );

            let module = Arc::downgrade(&self);
            features.push(
                Feature::new(
                    "consumption_this_month",
                    "This month's consumption",
                    FeatureKind::Number,
                    move || {
                        let module = upgrade_module(&module, ModuleKind::Energy)?;
                        module.consumption_this_month().map(FeatureValue::from)
                    },
                )
                .with_category(FeatureCategory::Info)
                .with_unit("kWh")
                .with_precision_hint(3),
            );
        }

        if caps.contains(EnergyCapability::CONSUMPTION_TOTAL) {
            let module = Arc::downgrade(&self);
            features.push(
                Feature::new(
                    "consumption_total",
                    "Total consumption since reboot",
                    FeatureKind::Number,
                    move || {
                        let module = upgrade_module(&module, ModuleKind::Energy)?;
                        module.consumption_total().map(FeatureValue::from)
                    },
                )
                .with_category(FeatureCategory::Info)
                .with_unit("kWh")
                .with_precision_hint(3),
            );
        }

        if caps.contains(EnergyCapability::VOLTAGE_CURRENT) {
            let module = Arc::downgrade(&self);
            features.push(
                Feature::new("voltage", "Voltage", FeatureKind::Number, move || {
                    let module = upgrade_module(&module, ModuleKind::Energy)?;
                    Ok(FeatureValue::from(module.status()?.voltage()))
                })
                .with_category(FeatureCategory::Primary)
                .with_unit("V")
                .with_precision_hint(1),
            );

            let module = Arc::downgrade(&self);
            features.push(
                Feature::new("current", "Current", FeatureKind::Number, move || {
                    let module = upgrade_module(&module, ModuleKind::Energy)?;
                    Ok(FeatureValue::from(module.status()?.current()))
                })
                .with_category(FeatureCategory::Primary)
                .with_unit("A")
                .with_precision_hint(2),
            );
        }

        if caps.contains(EnergyCapability::PERIODIC_STATS) {
            let module = Arc::downgrade(&self);
            features.push(
                Feature::new(
                    "erase_emeter_stats",
                    "Erase emeter statistics",
                    FeatureKind::Action,
                    || Ok(FeatureValue::Null),
                )
                .with_category(FeatureCategory::Debug)
                .with_write(move |_| {
                    let module = module.clone();
                    async move {
                        upgrade_module(&module, ModuleKind::Energy)?
                            .erase_stats()
                            .await
                    }
                }),
            );
        }

        features
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
