//! Drives the use case with a mock transport and randomized traffic over a
//! small fixed device fleet, then prints what the optimizer did about it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use btmux_application::{DeviceUseCase, FixedLoadEstimator, TransportCommand};
use btmux_core::config::ConfigService;
use btmux_engine::optimizer::Optimizer;
use btmux_types::{iot_command, DeviceClass, TransportKind};
use rand::Rng;
use tracing::debug;

struct Device {
    address: &'static str,
    name: &'static str,
    class: DeviceClass,
    transport: TransportKind,
}

const FLEET: &[Device] = &[
    Device {
        address: "AA:BB:CC:DD:EE:01",
        name: "Living Room AC",
        class: DeviceClass::AirConditioner,
        transport: TransportKind::Ble,
    },
    Device {
        address: "AA:BB:CC:DD:EE:02",
        name: "Kitchen Fridge",
        class: DeviceClass::Refrigerator,
        transport: TransportKind::Ble,
    },
    Device {
        address: "AA:BB:CC:DD:EE:03",
        name: "Sony WH-1000XM4",
        class: DeviceClass::Audio,
        transport: TransportKind::Classic,
    },
    Device {
        address: "AA:BB:CC:DD:EE:04",
        name: "Samsung Galaxy S23",
        class: DeviceClass::Phone,
        transport: TransportKind::Classic,
    },
    Device {
        address: "AA:BB:CC:DD:EE:05",
        name: "Sony Bravia TV",
        class: DeviceClass::SmartTv,
        transport: TransportKind::Classic,
    },
];

/// Transport that only logs. Commands go nowhere.
struct MockTransport;

#[async_trait]
impl TransportCommand for MockTransport {
    async fn send(&self, address: &str, payload: &[u8]) -> btmux_core::Result<()> {
        debug!(target: "simulate", address, ?payload, "mock transport send");
        Ok(())
    }
}

pub async fn run(cycles: u32, interval_ms: u64, config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(|| PathBuf::from("btmux.toml"));
    let config = ConfigService::new(path).get_config();

    let usecase = Arc::new(DeviceUseCase::new(
        config.clone(),
        Optimizer::rule_based(),
        Arc::new(FixedLoadEstimator(config.default_system_load)),
        Arc::new(MockTransport),
    ));

    println!("🔌 Connecting {} simulated devices...", FLEET.len());
    for device in FLEET {
        usecase
            .on_connected(device.address, device.class, device.transport)
            .await?;
        usecase.on_name_resolved(device.address, device.name).await;
        println!("  ✓ {} ({})", device.name, device.address);
    }

    for cycle in 1..=cycles {
        // Traffic and signal flux since the previous cycle.
        for device in FLEET {
            let (bytes, dbm) = {
                let mut rng = rand::thread_rng();
                let bytes: u64 = match device.class {
                    DeviceClass::Audio => rng.gen_range(100_000..400_000),
                    DeviceClass::Phone => rng.gen_range(50_000..200_000),
                    DeviceClass::SmartTv => rng.gen_range(10_000..100_000),
                    _ => rng.gen_range(100..5_000),
                };
                (bytes, rng.gen_range(-85..=-40))
            };
            usecase.on_data_transferred(device.address, bytes).await;
            usecase.on_signal_sample(device.address, dbm).await;

            if device.class.is_iot() && cycle % 2 == 0 {
                usecase
                    .send_command(device.address, &[iot_command::GET_STATUS])
                    .await?;
            }
        }

        tokio::time::sleep(Duration::from_millis(interval_ms)).await;

        let report = usecase.run_cycle().await;
        println!(
            "🔄 Cycle {}/{}: optimized {} sessions, {} anomalies, {:.0} B/s total",
            cycle,
            cycles,
            report.sessions_optimized,
            report.anomalies.len(),
            report.total_bandwidth
        );
        for anomaly in &report.anomalies {
            println!(
                "  ⚠ {} anomaly on {}: {:.0} B/s vs mean {:.0} B/s",
                anomaly.severity, anomaly.address, anomaly.current_rate, anomaly.mean_rate
            );
        }
    }

    print_status(&usecase).await;
    Ok(())
}

async fn print_status(usecase: &DeviceUseCase) {
    println!("\n📋 Active sessions:");
    println!(
        "  {:<18} {:<20} {:<10} {:<9} {:>7} {:>12} {:>6}  flags",
        "address", "name", "class", "priority", "signal", "bytes", "share"
    );
    for session in usecase.active_sessions().await {
        let mut flags = String::new();
        if session.aggressive_power_saving {
            flags.push_str("pwr ");
        }
        if session.low_latency {
            flags.push_str("lat");
        }
        println!(
            "  {:<18} {:<20} {:<10} {:<9} {:>7} {:>12} {:>6.2}  {}",
            session.address,
            session.device_name.as_deref().unwrap_or("-"),
            session.device_class.to_string(),
            session.priority.to_string(),
            session.signal_strength,
            session.bytes_transferred,
            session.bandwidth_share,
            flags
        );
    }

    let stats = usecase.stats().await;
    println!("\n📊 Stats:");
    println!("  connections:     {}", stats.total_connections);
    println!("  active:          {}", stats.active_connections);
    println!("  bytes total:     {}", stats.total_bytes_transferred);
    println!(
        "  optimizations:   {} ({:.0}% success)",
        stats.optimizations_applied,
        stats.success_rate() * 100.0
    );
    println!("  rejected:        {}", stats.connection_failures);

    let predictions = usecase.predicted_connections().await;
    if !predictions.is_empty() {
        println!("\n🔮 Predicted reconnects:");
        for p in predictions {
            println!(
                "  {} at {} (p={:.2})",
                p.address,
                p.predicted_at.format("%H:%M:%S"),
                p.probability
            );
        }
    }
}
