//! deauth-watch: WiFi deauthentication flood detector.
//!
//! Puts a wireless adapter into monitor mode, counts deauthentication frames
//! per claimed source address over fixed windows, and raises one alert per
//! address per window once its count exceeds the threshold.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │   Capture   │────>│ DetectionWindow  │<────│  Dashboard  │
//! │  (pcap)     │     │ (counts, alerts) │     │  (ratatui)  │
//! └─────────────┘     └──────────────────┘     └─────────────┘
//!     Thread                  ^                 capture thread
//!                             │ clear
//!                     ┌──────────────┐
//!                     │ResetScheduler│
//!                     └──────────────┘
//!                          Async
//! ```
//!
//! - **Capture**: background thread polling libpcap on the monitor interface
//! - **ResetScheduler**: tokio task clearing the window every interval
//! - **Dashboard**: TUI or plain redraw, refreshed from the capture loop
//! - **Controller**: ordered start/stop, including the adapter's monitor mode

mod adapter;
mod capture;
mod config;
mod controller;
mod dashboard;
mod error;
mod frame;
mod logging;
mod replay;
mod scheduler;
mod ui;
mod window;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

use crate::adapter::Airmon;
use crate::capture::{list_devices, CaptureExit, PcapSource};
use crate::config::Config;
use crate::controller::{Controller, SessionSettings};
use crate::dashboard::{DisplaySink, PlainSink};
use crate::logging::{Console, LogBuffer};
use crate::replay::{analyze_file, render_report, OutputFormat};
use crate::ui::TerminalSink;

/// Console lines kept for the dashboard's log pane.
const LOG_BUFFER_LINES: usize = 200;

/// deauth-watch: detect WiFi deauthentication floods.
#[derive(Parser, Debug)]
#[command(name = "deauth-watch")]
#[command(version)]
#[command(about = "Detect WiFi deauthentication floods from a monitor-mode adapter")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enable monitor mode and watch for deauthentication floods.
    Monitor {
        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Wireless interface to put into monitor mode.
        #[arg(short, long)]
        interface: Option<String>,

        /// Monitor interface created by the adapter tool (default: <interface>mon).
        #[arg(short, long)]
        monitor_interface: Option<String>,

        /// Alert when an address exceeds this many frames in one window.
        #[arg(short, long)]
        threshold: Option<u64>,

        /// Window length in seconds.
        #[arg(short, long)]
        window: Option<u64>,

        /// Log file (appended).
        #[arg(short, long)]
        log_file: Option<PathBuf>,

        /// Enable verbose logging.
        #[arg(short, long)]
        verbose: bool,

        /// Disable TUI and redraw a plain table on stdout instead.
        #[arg(long)]
        no_ui: bool,
    },

    /// Run detection over a PCAP file (offline mode).
    Analyze {
        /// Path to the PCAP file.
        #[arg(short, long)]
        file: PathBuf,

        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Alert threshold (frames per window).
        #[arg(short, long)]
        threshold: Option<u64>,

        /// Window length in seconds.
        #[arg(short, long)]
        window: Option<u64>,

        /// Output format: text, json.
        #[arg(short, long)]
        output: Option<OutputFormat>,
    },

    /// List available capture interfaces.
    ListInterfaces,

    /// Print a default configuration file.
    GenerateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor {
            config,
            interface,
            monitor_interface,
            threshold,
            window,
            log_file,
            verbose,
            no_ui,
        } => {
            let mut config = Config::load_or_default(config.as_deref())?;
            if let Some(interface) = interface {
                config.capture.interface = interface;
            }
            if monitor_interface.is_some() {
                config.capture.monitor_interface = monitor_interface;
            }
            if let Some(threshold) = threshold {
                config.detection.threshold = threshold;
            }
            if let Some(window) = window {
                config.detection.window_secs = window;
            }
            if let Some(log_file) = log_file {
                config.output.log_file = log_file;
            }
            config.output.verbose |= verbose;
            config.validate()?;

            // The TUI owns the terminal, so console lines go to its log pane.
            let logs = LogBuffer::new(LOG_BUFFER_LINES);
            let console = if no_ui {
                Console::Stderr
            } else {
                Console::Buffer(logs.clone())
            };
            logging::init(Some(config.output.log_file.as_path()), console, config.output.verbose)?;

            run_monitor(config, no_ui, logs).await
        }

        Commands::Analyze {
            file,
            config,
            threshold,
            window,
            output,
        } => {
            let mut config = Config::load_or_default(config.as_deref())?;
            if let Some(threshold) = threshold {
                config.detection.threshold = threshold;
            }
            if let Some(window) = window {
                config.detection.window_secs = window;
            }
            if let Some(output) = output {
                config.output.format = output;
            }
            config.validate()?;

            // Report goes to stdout, logs to stderr.
            logging::init(None, Console::Stderr, config.output.verbose)?;

            run_offline_analysis(&file, &config)
        }

        Commands::ListInterfaces => {
            let devices = list_devices().context("Failed to list capture devices")?;
            println!("Available network interfaces:\n");
            for device in devices {
                let desc = device
                    .desc
                    .as_ref()
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default();
                println!("  {}{}", device.name, desc);
            }
            Ok(())
        }

        Commands::GenerateConfig => {
            println!("{}", Config::generate_default());
            Ok(())
        }
    }
}

async fn run_monitor(config: Config, no_ui: bool, logs: LogBuffer) -> Result<()> {
    let adapter = Airmon::new(config.capture.adapter_tool.clone(), config.capture.use_sudo);
    let settings = SessionSettings::from_config(&config);
    let promiscuous = config.capture.promiscuous;
    let poll_timeout = settings.poll_timeout;

    if no_ui {
        println!(
            "Monitoring {} (threshold {} frames per {}s). Press Ctrl+C to stop.",
            settings.monitor_interface,
            settings.threshold,
            settings.window_interval.as_secs()
        );
    }

    let pane_logs = logs.clone();
    let mut controller = Controller::new(adapter, settings);
    controller
        .start(
            |device| PcapSource::open(device, promiscuous, poll_timeout),
            |stop| {
                if no_ui {
                    Ok(Box::new(PlainSink::stdout()) as Box<dyn DisplaySink>)
                } else {
                    Ok(Box::new(TerminalSink::new(stop, pane_logs)?) as Box<dyn DisplaySink>)
                }
            },
        )
        .await?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Stopped by user.");
        }
        _ = controller.wait() => {}
    }

    let exit = controller.stop().await;
    if matches!(exit, Some(CaptureExit::Failed(_) | CaptureExit::Panicked)) {
        info!("Session ended by a capture failure");
    }

    if !no_ui {
        // The log pane is gone; repeat its errors on the restored terminal.
        for line in logs
            .tail(LOG_BUFFER_LINES)
            .iter()
            .filter(|line| line.contains(" - ERROR - "))
        {
            eprintln!("{}", line);
        }
    }

    let last = controller.window().snapshot();
    info!(
        "Last window #{}: {} sources, {} over threshold, {} alerted",
        last.window,
        last.counts.len(),
        last.attacking(),
        last.alerted.len()
    );

    println!("Exiting.");
    Ok(())
}

fn run_offline_analysis(file: &Path, config: &Config) -> Result<()> {
    let report = analyze_file(file, config.detection.threshold, config.window_interval())?;
    println!("{}", render_report(&report, config.output.format)?);
    Ok(())
}
