//! # rtls
//!
//! ```bash
//! # Locate tags from scan messages on stdin, one JSON object per line
//! rtls locate --anchors anchors.json < scans.jsonl
//!
//! # Simulate a tag standing at (3, 4) for 20 s, pressing its button at 8 s
//! rtls simulate --anchors anchors.json --x 3 --y 4 --duration-s 20 --emergency-at-s 8
//! ```

use clap::{Parser, Subcommand};
use rtls::api::{AnchorPipeline, JsonLinesSink, LocatorService};
use rtls::core::now_ms;
use rtls::hardware::{
    AdvertiserConfig, LinkSupervisor, MockLink, MockRadio, MockSensors, RawAdvertisement,
    ReconnectPolicy, ScanObserver, TagAdvertiser,
};
use rtls::utils::{AnchorRegistry, LocatorConfig};
use rtls::{Anchor, PathLossModel, RtlsError};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Wearable tag locator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read scan messages from stdin and write position fixes to stdout
    Locate {
        /// Anchors file
        #[arg(short, long)]
        anchors: PathBuf,
    },
    /// Drive a simulated tag past the anchors and print what they forward
    Simulate {
        /// Anchors file
        #[arg(short, long)]
        anchors: PathBuf,

        /// Tag uid, must start with "W-"
        #[arg(long, default_value = "W-0001")]
        uid: String,

        /// Tag position (m)
        #[arg(long, default_value = "0.0")]
        x: f64,
        #[arg(long, default_value = "0.0")]
        y: f64,

        /// Simulated duration (s)
        #[arg(long, default_value = "10")]
        duration_s: u64,

        /// Press the emergency button at this time (s)
        #[arg(long)]
        emergency_at_s: Option<u64>,

        /// How long the button is held (s)
        #[arg(long, default_value = "3")]
        emergency_hold_s: u64,

        /// Connection attempts the simulated transport fails before connecting
        #[arg(long, default_value = "0")]
        link_failures: u32,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    // stdout carries the JSON records
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("rtls v{}", env!("CARGO_PKG_VERSION"));

    let result = match args.command {
        Command::Locate { anchors } => locate(&anchors),
        Command::Simulate {
            anchors,
            uid,
            x,
            y,
            duration_s,
            emergency_at_s,
            emergency_hold_s,
            link_failures,
        } => simulate(SimulationParams {
            anchors_path: anchors,
            uid,
            position: (x, y),
            duration_ms: duration_s * 1000,
            emergency_window_ms: emergency_at_s
                .map(|at| (at * 1000, (at + emergency_hold_s) * 1000)),
            link_failures,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

fn locate(anchors_path: &PathBuf) -> Result<(), RtlsError> {
    let config = LocatorConfig::from_env()?;
    let anchors = AnchorRegistry::from_file(anchors_path)?;
    let tick_interval = Duration::from_millis(config.tick_interval_ms);

    let sink = Arc::new(JsonLinesSink::new("fixes", io::stdout()));
    let service = Arc::new(LocatorService::new(config, anchors, sink)?);
    let running = Arc::new(AtomicBool::new(true));

    let ticker = {
        let service = Arc::clone(&service);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                thread::sleep(tick_interval);
                service.tick(now_ms());
            }
        })
    };

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // Rejected messages are logged by the service
        let _ = service.ingest_json(&line, now_ms());
    }

    info!("input closed, stopping");
    running.store(false, Ordering::Relaxed);
    if ticker.join().is_err() {
        error!("tick thread panicked");
    }
    service.tick(now_ms());
    Ok(())
}

struct SimulationParams {
    anchors_path: PathBuf,
    uid: String,
    position: (f64, f64),
    duration_ms: u64,
    emergency_window_ms: Option<(u64, u64)>,
    link_failures: u32,
}

const SIM_STEP_MS: u64 = 50;
const SIM_JITTER_DB: f64 = 3.0;

fn simulate(params: SimulationParams) -> Result<(), RtlsError> {
    let config = LocatorConfig::from_env()?;
    let anchors = AnchorRegistry::from_file(&params.anchors_path)?;
    let model = PathLossModel::new(config.tx_power_dbm_at_1m, config.path_loss_exponent);

    let out = Arc::new(JsonLinesSink::new("scans", io::stdout()));
    let pipelines: Vec<(Anchor, AnchorPipeline)> = anchors
        .iter()
        .map(|anchor| {
            let link = if params.link_failures > 0 {
                MockLink::failing_for(params.link_failures)
            } else {
                MockLink::connected()
            };
            let pipeline = AnchorPipeline::new(anchor.id.as_str(), out.clone(), out.clone())
                .with_link(Box::new(link), LinkSupervisor::new(ReconnectPolicy::default()));
            (anchor.clone(), pipeline)
        })
        .collect();
    for (_, pipeline) in &pipelines {
        pipeline.connect()?;
    }

    let mut tag = TagAdvertiser::new(
        AdvertiserConfig::new(params.uid.as_str()),
        MockRadio::new(),
        MockSensors::new(Some(3.9), Some(22.5)),
    )?;

    let epoch_ms = now_ms();
    let mut next_tx_ms = 0u64;
    let mut packets = 0u64;

    info!(uid = %params.uid, anchors = pipelines.len(), duration_ms = params.duration_ms, "simulation started");

    for t in (0..params.duration_ms).step_by(SIM_STEP_MS as usize) {
        let pressed = params
            .emergency_window_ms
            .is_some_and(|(from, to)| t >= from && t < to);
        tag.sensors_mut().set_emergency(pressed);
        if tag.poll(t)?.is_some() {
            next_tx_ms = t;
        }

        let Some(broadcast) = tag.radio().current() else {
            continue;
        };
        if t < next_tx_ms {
            continue;
        }
        next_tx_ms = t + u64::from(broadcast.params.min_interval_ms);
        packets += 1;

        for (index, (anchor, pipeline)) in pipelines.iter().enumerate() {
            let rssi = simulated_rssi(&model, anchor, params.position, packets, index);
            pipeline.on_advertisement(
                RawAdvertisement::new(broadcast.name.as_str(), rssi)
                    .with_timestamp(epoch_ms + t as i64)
                    .with_manufacturer_data(broadcast.data.clone()),
            );
            if let Some(e) = pipeline.restart_required() {
                return Err(e.into());
            }
        }
    }

    info!(packets, last_seq = tag.seq(), "simulation finished");
    Ok(())
}

/// Log-distance RSSI at `anchor` for a tag at `position`, with a
/// deterministic jitter so repeated runs are comparable
fn simulated_rssi(
    model: &PathLossModel,
    anchor: &Anchor,
    position: (f64, f64),
    packet: u64,
    anchor_index: usize,
) -> f64 {
    let dx = anchor.x - position.0;
    let dy = anchor.y - position.1;
    let distance_m = (dx * dx + dy * dy + anchor.z * anchor.z).sqrt().max(0.1);

    let model = model.for_anchor(anchor);
    let mean = model.tx_power_dbm_at_1m - 10.0 * model.path_loss_exponent * distance_m.log10();

    let phase = packet as f64 * 12.9898 + anchor_index as f64 * 78.233;
    let noise = ((phase.sin() * 43_758.545).fract() * 2.0 - 1.0) * SIM_JITTER_DB;
    mean + noise
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_rssi_follows_path_loss() {
        let model = PathLossModel::new(-59.0, 2.2);
        let anchor = Anchor::new("A1", 0.0, 0.0, 0.0);

        let near = simulated_rssi(&model, &anchor, (1.0, 0.0), 1, 0);
        let far = simulated_rssi(&model, &anchor, (20.0, 0.0), 1, 0);

        assert!((near + 59.0).abs() <= SIM_JITTER_DB);
        assert!(near > far);
    }

    #[test]
    fn test_cli_parses_simulate() {
        let args = Args::try_parse_from([
            "rtls", "simulate", "--anchors", "a.json", "--x", "3", "--emergency-at-s", "5",
        ])
        .unwrap();
        match args.command {
            Command::Simulate { x, emergency_at_s, uid, .. } => {
                assert_eq!(x, 3.0);
                assert_eq!(emergency_at_s, Some(5));
                assert_eq!(uid, "W-0001");
            }
            _ => panic!("expected simulate"),
        }
    }
}
