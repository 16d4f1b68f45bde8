// src/main.rs
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};

use ainspike::config::AppConfig;
use ainspike::drivers::{SimulatedSource, SimulationSettings, StreamSource};
use ainspike::engine::{run_session, stop_flag};
use ainspike::ljm::open_stream;
use ainspike::recorder::output_sinks;

/// Stream analog inputs and report threshold events with wall-clock timestamps.
#[derive(Parser, Debug)]
#[command(name = "ainspike", version)]
struct Cli {
    /// JSON configuration file; built-in defaults are used without one.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Use the synthetic source instead of a LabJack device.
    #[arg(long)]
    simulate: bool,
    /// Write closed events to this CSV file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Archive every converted sample to this CSV file.
    #[arg(long)]
    samples: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration: Option<f64>,
    #[arg(short, long)]
    verbose: bool,
}

// 入口函数
fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if cli.events.is_some() {
        config.events_path = cli.events.clone();
    }
    if cli.samples.is_some() {
        config.samples_path = cli.samples.clone();
    }
    config.validate()?;

    let stop = stop_flag();
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }
    if let Some(seconds) = cli.duration {
        let stop = Arc::clone(&stop);
        let wait = Duration::try_from_secs_f64(seconds).context("invalid --duration")?;
        thread::spawn(move || {
            thread::sleep(wait);
            stop.store(true, Ordering::SeqCst);
        });
    }

    let source: Box<dyn StreamSource> = if cli.simulate {
        info!("⚙️ Using simulated source");
        Box::new(SimulatedSource::new(SimulationSettings {
            num_channels: config.num_channels,
            scan_rate_hz: config.scan_rate_hz,
            scans_per_read: config.scans_per_read(),
            ..Default::default()
        })?)
    } else {
        Box::new(open_stream(&config.ljm_settings())?)
    };

    let sink = output_sinks(&config)?;

    let summary = run_session(source, config.session_settings(), sink, &stop)?;
    info!(
        "Session summary: {} events over {} scans, peak device backlog {}",
        summary.events, summary.scans, summary.peak_device_backlog
    );
    Ok(())
}
