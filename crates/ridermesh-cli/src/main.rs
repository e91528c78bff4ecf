//! RiderMesh Command-Line Interface
//!
//! Tools for exercising the safety core without hardware:
//! - Simulating multi-rider mesh relay (flood, dedup, TTL, delivery)
//! - Replaying recorded sensor traces through the hazard classifier
//! - Demonstrating the crash countdown-and-escalate workflow

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ridermesh_core::bridge::{BridgeConfig, BridgeEvent, BridgePhase, SosBridge};
use ridermesh_core::external::{FixedLocation, FixedProbe};
use ridermesh_core::mesh::{
    LinkBus, LinkTransport, MeshSimulator, RelayConfig, RelayEngine, SimConfig, TransportKind,
};
use ridermesh_core::sensors::{AccelSample, ClassifierConfig, GpsFix, HazardClassifier};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "ridermesh")]
#[command(author, version, about = "RiderMesh safety core CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate an SOS flooding through a multi-rider mesh
    Simulate {
        /// Number of riders in the mesh
        #[arg(long, default_value = "4")]
        riders: usize,

        /// Hop budget for the alert
        #[arg(long, default_value = "5")]
        ttl: u8,

        /// Simulation steps to run
        #[arg(long, default_value = "20")]
        steps: usize,

        /// Per-send loss probability (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        loss: f64,

        /// Which rider has internet connectivity (omit for nobody)
        #[arg(long)]
        online: Option<usize>,
    },

    /// Replay a recorded sensor trace through the hazard classifier
    Replay {
        /// JSON trace file (array of accel/gyro/gps samples)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Demonstrate the crash countdown-and-escalate workflow
    Sos {
        /// Countdown length in seconds
        #[arg(long, default_value = "5")]
        countdown: u64,

        /// Cancel this many seconds in (omit to let it escalate)
        #[arg(long)]
        cancel_after: Option<u64>,
    },
}

/// One entry of a recorded sensor trace.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TraceSample {
    Accel {
        x: f64,
        y: f64,
        z: f64,
        timestamp_ms: u64,
    },
    Gyro {
        magnitude: f64,
    },
    Gps {
        lat: f64,
        lng: f64,
        speed_kmh: f64,
        accuracy_m: f64,
        timestamp_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate {
            riders,
            ttl,
            steps,
            loss,
            online,
        } => cmd_simulate(riders, ttl, steps, loss, online),

        Commands::Replay { input } => cmd_replay(input),

        Commands::Sos {
            countdown,
            cancel_after,
        } => cmd_sos(countdown, cancel_after),
    }
}

fn cmd_simulate(
    riders: usize,
    ttl: u8,
    steps: usize,
    loss: f64,
    online: Option<usize>,
) -> Result<()> {
    anyhow::ensure!(riders >= 2, "a mesh needs at least two riders");
    anyhow::ensure!(ttl > 0, "ttl must be greater than zero");

    let mut sim = MeshSimulator::new(SimConfig {
        riders,
        ttl,
        loss,
        online_rider: online,
        step: Duration::from_millis(100),
    });

    println!(
        "Mesh of {} riders, ttl {}, loss {:.0}%, online rider: {}",
        riders,
        ttl,
        loss * 100.0,
        online.map_or("none".to_string(), |r| format!("rider-{}", r))
    );

    sim.originate_from(0, 12.9716, 77.5946);
    for step in 0..steps {
        sim.step();
        for rider in 0..riders {
            for event in sim.engine_mut(rider).poll_events() {
                println!(
                    "  step {:>3}  rider-{}  {:<16} hop {}/{}  {}",
                    step,
                    rider,
                    event.status.to_string(),
                    event.packet.hop,
                    event.packet.ttl,
                    event.message
                );
            }
        }
    }

    let stats = sim.stats();
    println!();
    println!("Originated:         {}", stats.originated);
    println!("Relay transmissions: {}", stats.relayed);
    println!("Duplicates dropped: {}", stats.duplicates_dropped);
    println!("Expired:            {}", stats.expired);
    println!("Delivered:          {}", stats.delivered);
    println!("Still pending:      {}", stats.pending);
    println!("Delivery rate:      {:.1}%", stats.delivery_rate() * 100.0);
    Ok(())
}

fn cmd_replay(input: PathBuf) -> Result<()> {
    let file = File::open(&input)
        .with_context(|| format!("failed to open trace file {}", input.display()))?;
    let samples: Vec<TraceSample> =
        serde_json::from_reader(BufReader::new(file)).context("failed to parse trace file")?;
    info!(samples = samples.len(), "trace loaded");

    let mut classifier =
        HazardClassifier::new(ClassifierConfig::default(), Box::new(FixedLocation(None)));

    let mut hazards = 0usize;
    for sample in &samples {
        let events = match sample {
            TraceSample::Accel {
                x,
                y,
                z,
                timestamp_ms,
            } => classifier.push_accel(&AccelSample::new(*x, *y, *z, *timestamp_ms)),
            TraceSample::Gyro { magnitude } => {
                classifier.push_rotation(*magnitude);
                Vec::new()
            }
            TraceSample::Gps {
                lat,
                lng,
                speed_kmh,
                accuracy_m,
                timestamp_ms,
            } => classifier.push_gps(&GpsFix {
                lat: *lat,
                lng: *lng,
                speed_kmh: *speed_kmh,
                accuracy_m: *accuracy_m,
                timestamp_ms: *timestamp_ms,
            }),
        };
        for event in events {
            hazards += 1;
            println!(
                "{:>10} ms  {:<10}  severity {:.2}  ({:.5}, {:.5})  {}",
                event.timestamp_ms,
                event.kind.label(),
                event.severity,
                event.lat,
                event.lng,
                event.description
            );
        }
    }

    println!();
    println!(
        "{} samples replayed, {} hazard(s) detected",
        samples.len(),
        hazards
    );
    Ok(())
}

fn cmd_sos(countdown: u64, cancel_after: Option<u64>) -> Result<()> {
    // Two riders in radio range; only the helper has internet
    let bus = LinkBus::with_conditions(0.0, Duration::ZERO);
    let rider_radio =
        LinkTransport::new(TransportKind::ShortRange, "rider-1", "rider-1", bus.clone());
    let helper_radio =
        LinkTransport::new(TransportKind::ShortRange, "rider-2", "rider-2", bus);

    let mut relay = RelayEngine::new(
        vec![Box::new(rider_radio)],
        Box::new(FixedProbe(false)),
        RelayConfig::default(),
    );
    let mut helper = RelayEngine::new(
        vec![Box::new(helper_radio)],
        Box::new(FixedProbe(true)),
        RelayConfig::default(),
    );
    relay.start_discovery();
    helper.start_discovery();

    let mut bridge = SosBridge::new(
        "rider-1",
        BridgeConfig {
            countdown: Duration::from_secs(countdown),
        },
    );

    println!("Crash detected. SOS in {}s unless cancelled...", countdown);
    bridge.arm(12.9716, 77.5946);

    let tick = Duration::from_secs(1);
    let mut elapsed = 0u64;
    while bridge.phase() == BridgePhase::Counting {
        std::thread::sleep(tick);
        elapsed += 1;
        if cancel_after == Some(elapsed) {
            bridge.cancel();
            break;
        }
        bridge.tick(tick, &mut relay);
        for event in bridge.poll_events() {
            match event {
                BridgeEvent::Tick { remaining_ms } => {
                    println!("  ... {}s", remaining_ms.div_ceil(1000));
                }
                BridgeEvent::Escalated { packet_id } => {
                    println!("SOS broadcast, packet {}", packet_id);
                }
                _ => {}
            }
        }
    }

    match bridge.phase() {
        BridgePhase::Idle => println!("Cancelled. Glad you're okay."),
        BridgePhase::Escalated => {
            helper.tick(Duration::from_millis(100));
            for event in relay.poll_events() {
                println!("  rider-1: {:<12} {}", event.status.to_string(), event.message);
            }
            for event in helper.poll_events() {
                println!("  rider-2: {:<12} {}", event.status.to_string(), event.message);
            }
        }
        BridgePhase::Counting => {}
    }
    Ok(())
}
