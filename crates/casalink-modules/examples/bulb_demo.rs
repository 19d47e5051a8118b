//! Metering Bulb Example
//!
//! Demonstrates the capability composition layer:
//! 1. Device update cycle with module probing and batched queries
//! 2. Feature descriptors as a uniform read/write surface
//! 3. Brightness delegation to a running light effect
//! 4. Energy statistics with unit normalization and calendar maps

use std::sync::Arc;

use serde_json::json;

use casalink_core::{ops, Device, DeviceConfig, MockTransport, ModuleKind};
use casalink_modules::energy::{GET_DAYSTAT, GET_MONTHSTAT, GET_REALTIME};
use casalink_modules::{default_modules, Brightness, Energy, EnergyCapability};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("casalink=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();

    println!("=== CasaLink Metering Bulb Demo ===\n");

    // A canned metering bulb: dimmable, effect-capable, energy version 2.
    let transport = Arc::new(
        MockTransport::new()
            .with_device_info_echo()
            .with_response(
                ops::GET_DEVICE_INFO,
                json!({
                    "alias": "Living room bulb",
                    "device_on": true,
                    "brightness": 60,
                    "dynamic_light_effect_enable": 1,
                    "dynamic_light_effect_id": "Aurora",
                    "dynamic_light_effect_brightness": 35,
                    "dynamic_light_effect_list": ["Aurora", "Bubbles", "Candy Cane"],
                    "components": [
                        {"id": "brightness"},
                        {"id": "light_effect"},
                        {"id": "energy_monitoring", "ver": 2},
                    ],
                }),
            )
            .with_response(GET_REALTIME, json!({"power_mw": 8200, "total_wh": 1470}))
            .with_response(
                GET_DAYSTAT,
                json!({"day_list": [
                    {"year": 2026, "month": 8, "day": 24, "energy_wh": 112.0},
                    {"year": 2026, "month": 8, "day": 25, "energy_wh": 96.0},
                ]}),
            )
            .with_response(
                GET_MONTHSTAT,
                json!({"month_list": [
                    {"year": 2026, "month": 7, "energy_wh": 3120.0},
                    {"year": 2026, "month": 8, "energy_wh": 2210.0},
                ]}),
            ),
    );

    let device = Device::builder(transport.clone())
        .with_config(DeviceConfig::new("192.168.0.40").with_alias("Fallback name"))
        .with_modules(default_modules())
        .build();
    device.update().await?;

    // === Example 1: Device overview ===
    println!("--- Example 1: Device Overview ---");
    println!("Alias: {}", device.alias().unwrap_or_default());
    println!("Powered on: {}", device.is_on()?);
    println!("Modules: {:?}\n", device.modules().kinds());

    // === Example 2: Feature surface ===
    println!("--- Example 2: Features ---");
    for (id, feature) in device.features() {
        let value = feature.value()?;
        match feature.unit() {
            Some(unit) => println!("  {:<24} {} {}", id, value, unit),
            None => println!("  {:<24} {}", id, value),
        }
    }
    println!();

    // === Example 3: Brightness delegation ===
    println!("--- Example 3: Brightness Delegation ---");
    let registry = device.modules();
    let brightness = registry
        .get_as::<Brightness>(ModuleKind::Brightness)
        .ok_or("brightness module missing")?;
    println!(
        "Effect active, brightness reads the effect's value: {}",
        brightness.brightness()?
    );
    brightness.set_brightness(25, None).await?;
    println!("Wrote 25 through the effect program");

    // Simulate the effect being switched off by the device.
    let mut info = device.snapshot().device_info()?.clone();
    info["dynamic_light_effect_enable"] = json!(0);
    transport.set_response(ops::GET_DEVICE_INFO, info);
    device.update().await?;
    println!(
        "Effect off, brightness reads its own field: {}",
        brightness.brightness()?
    );
    brightness.set_brightness(80, None).await?;
    device.update().await?;
    println!("Wrote 80 directly, reconciled to: {}\n", brightness.brightness()?);

    // === Example 4: Energy statistics ===
    println!("--- Example 4: Energy Statistics ---");
    let energy = registry
        .get_as::<Energy>(ModuleKind::Energy)
        .ok_or("energy module missing")?;
    println!("Current draw: {:.1} W", energy.current_consumption()?);
    println!(
        "Supports voltage/current: {}",
        energy.supports(EnergyCapability::VOLTAGE_CURRENT)
    );
    println!(
        "Consumed this month: {:?} kWh",
        energy.consumption_this_month()?
    );
    println!(
        "Daily stats (kWh): {:?}",
        energy.daily_stats(Some(2026), Some(8), true).await?
    );
    println!(
        "Monthly stats (Wh): {:?}",
        energy.monthly_stats(Some(2026), false).await?
    );

    println!("\n=== Demo Complete ===");
    println!("Calls issued over the wire: {}", transport.calls().len());

    Ok(())
}
