//! Music Therapy Box CLI
//!
//! Host controller for the sensor-driven music therapy box.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use music_therapy_box::{
    clock::{Clock, SystemClock},
    config::{Config, MusicConfig},
    core::{extract_features, Classifier, RuleBasedClassifier, SensorSample, SensorWindow},
    link::{DeviceLink, DeviceMessage, LineWriter},
    peripherals::{AbsentHrSensor, ConsoleDisplay, LibraryPlayer},
    session::{Collaborators, RunExit, SessionMachine},
    telemetry::{create_shared_stats, SharedStats},
    VERSION,
};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Wait between reconnect attempts after the link drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "therapy-box")]
#[command(version = VERSION)]
#[command(about = "Host controller for the music therapy box", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller against the device
    Run {
        /// Serial device (overrides the configured port)
        #[arg(long)]
        port: Option<String>,

        /// Folder holding `stress_relief/` and `calming/` subfolders
        #[arg(long)]
        music_dir: Option<PathBuf>,
    },

    /// Print parsed device messages
    Monitor {
        /// Serial device (overrides the configured port)
        #[arg(long)]
        port: Option<String>,
    },

    /// Compute features from a captured device log
    Features {
        /// File with one device line per row
        file: PathBuf,
    },

    /// Show configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run { port, music_dir } => cmd_run(port, music_dir),
        Commands::Monitor { port } => cmd_monitor(port),
        Commands::Features { file } => cmd_features(&file),
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn load_config(port: Option<String>) -> Config {
    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Could not load configuration, using defaults: {e}");
            Config::default()
        }
    };
    if let Some(port) = port {
        config.serial_port = port;
    }
    config
}

fn cmd_run(port: Option<String>, music_dir: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Music Therapy Box v{VERSION}");
    println!();

    let mut config = load_config(port);
    if let Some(dir) = music_dir {
        config.music = MusicConfig::under(dir);
    }

    println!("  Serial port: {} ({} baud)", config.serial_port, config.baud_rate);
    println!("  Calibration: {}s", config.calibration.duration.as_secs());
    println!(
        "  Windows: {}s / {}s at {} Hz",
        config.windows.long.as_secs(),
        config.windows.short.as_secs(),
        config.windows.sampling_rate_hz
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stats = create_shared_stats();

    let (mut link, writer) = open_link(&config, clock.clone(), stats.clone())?;

    let devices = Collaborators {
        hr_sensor: Box::new(AbsentHrSensor),
        classifier: Box::new(RuleBasedClassifier::default()),
        player: Box::new(LibraryPlayer::scan(&config.music, clock.clone())),
        display: Box::new(ConsoleDisplay),
        indicators: Box::new(writer),
    };

    let mut machine =
        SessionMachine::new(&config, link.subscribe(), devices, clock.clone(), stats.clone())
            .with_shutdown_flag(running.clone());

    while machine.run() == RunExit::LinkLost {
        tracing::warn!("Device link lost, reconnecting");
        link.stop();

        let reconnected = loop {
            if !running.load(Ordering::SeqCst) {
                break None;
            }
            clock.sleep(RECONNECT_DELAY);
            match open_link(&config, clock.clone(), stats.clone()) {
                Ok(connection) => break Some(connection),
                Err(e) => tracing::warn!("Reconnect failed: {e:#}"),
            }
        };

        match reconnected {
            Some((new_link, writer)) => {
                tracing::info!("Device link restored");
                machine.attach(new_link.subscribe(), Box::new(writer));
                link = new_link;
            }
            None => break,
        }
    }

    link.stop();
    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// Open the serial device and start reading it.
///
/// The port must already be configured for the expected line speed.
fn open_link(
    config: &Config,
    clock: Arc<dyn Clock>,
    stats: SharedStats,
) -> anyhow::Result<(DeviceLink, LineWriter<File>)> {
    let port = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.serial_port)
        .with_context(|| format!("Failed to open serial port {}", config.serial_port))?;
    let writer = port
        .try_clone()
        .context("Failed to clone serial port handle")?;

    let mut link = DeviceLink::new();
    link.start(port, clock, stats)?;
    tracing::info!("Connected to {}", config.serial_port);

    Ok((link, LineWriter::new(writer)))
}

fn cmd_monitor(port: Option<String>) -> anyhow::Result<()> {
    let config = load_config(port);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let stats = create_shared_stats();
    let (mut link, _writer) = open_link(&config, Arc::new(SystemClock), stats.clone())?;
    let receiver = link.subscribe();

    println!("Monitoring {} (Ctrl+C to stop)", config.serial_port);
    println!();

    while running.load(Ordering::SeqCst) {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(message) => println!("{}  {:?}", Utc::now().format("%H:%M:%S%.3f"), message),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                eprintln!("Device link closed");
                break;
            }
        }
    }

    link.stop();
    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_features(path: &Path) -> anyhow::Result<()> {
    let config = load_config(None);
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let start = Utc::now();
    let interval = chrono::Duration::from_std(config.sample_interval())?;
    let samples: Vec<SensorSample> = content
        .lines()
        .filter_map(|line| match DeviceMessage::parse(line, start) {
            DeviceMessage::Conductance(value) => Some(value),
            _ => None,
        })
        .enumerate()
        .map(|(i, conductance)| SensorSample {
            conductance,
            heart_rate: None,
            timestamp: start + interval * i as i32,
        })
        .collect();

    if samples.is_empty() {
        anyhow::bail!("No GSR_CONDUCTANCE lines in {}", path.display());
    }

    let span = config.sample_interval() * samples.len() as u32;
    let window = SensorWindow::from_samples(start, span, samples);
    let features = extract_features(&window, None);
    let prediction = RuleBasedClassifier::default().predict(&features)?;

    let named: serde_json::Map<String, serde_json::Value> = features
        .named()
        .into_iter()
        .map(|(name, value)| (name.to_string(), serde_json::json!(value)))
        .collect();

    let report = serde_json::json!({
        "samples": window.len(),
        "features": named,
        "prediction": prediction,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_config() {
    let config = load_config(None);

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_flag_overrides_loaded_config() {
        let config = load_config(Some("/dev/ttyTEST0".to_string()));
        assert_eq!(config.serial_port, "/dev/ttyTEST0");
    }
}
