//! Ratesync - bit-perfect sample rate synchronization
//!
//! Entry point for the command line tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ratesync::config::AppConfig;
use ratesync::device::host::CpalDeviceProvider;
use ratesync::device::{matches_device_name, DeviceProvider, DeviceSnapshot, OutputDevice};
use ratesync::evidence::parser::best_evidence;
use ratesync::evidence::source::CommandLogSource;
use ratesync::evidence::EntryKind;
use ratesync::now_playing::{CommandNowPlaying, NoNowPlaying, NowPlayingSource};
use ratesync::observer::{
    spawn_device_observer, spawn_now_playing_observer, DEFAULT_NOW_PLAYING_POLL_INTERVAL,
};
use ratesync::resolver::status::ResolverStatus;
use ratesync::resolver::Collaborators;
use ratesync::script::{NoScript, PostSwitchScript, ShellScript};
use ratesync::{EvidenceParser, FormatCatalog, ResolverHandle};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ratesync", version = ratesync::VERSION)]
#[command(about = "Keep the output device sample rate in step with the playing track")]
struct Cli {
    /// Config file (default: <data_dir>/ratesync/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the playing track until Ctrl+C
    Run {
        /// Output device name (substring, case-insensitive)
        #[arg(short, long)]
        device: Option<String>,

        /// Detect bit depth and apply full physical formats
        #[arg(long)]
        bit_depth: bool,

        /// Script run with the new rate in Hz after each switch
        #[arg(long)]
        script: Option<PathBuf>,

        /// Write the effective settings back to the config file
        #[arg(long)]
        save: bool,
    },

    /// List output devices and their sample rates
    ListDevices,

    /// Show which device format a rate and bit depth would resolve to
    Resolve {
        /// Requested sample rate in Hz
        #[arg(short, long)]
        rate: f64,

        /// Requested bit depth
        #[arg(short, long, default_value_t = ratesync::UNKNOWN_BIT_DEPTH)]
        bits: u32,

        /// Output device name (default: system default)
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Parse diagnostic log lines from a file (or stdin)
    Parse {
        /// Entry kind: music, core-audio or core-media
        kind: EntryKind,

        /// Input file; stdin when omitted
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ratesync=info".parse()?)
                .add_directive("ratesync_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::path);

    match cli.command {
        Command::Run {
            device,
            bit_depth,
            script,
            save,
        } => {
            let mut config = match &cli.config {
                Some(path) => AppConfig::load_from(path),
                None => AppConfig::load(),
            };
            if device.is_some() {
                config.device = device;
            }
            if bit_depth {
                config.prefer_bit_depth_detection = true;
            }
            if script.is_some() {
                config.post_switch_script = script;
            }
            if save {
                config.save(&config_path)?;
            }
            run(config)
        }
        Command::ListDevices => list_devices(),
        Command::Resolve { rate, bits, device } => resolve(rate, bits, device.as_deref()),
        Command::Parse { kind, file } => parse(kind, file),
    }
}

fn run(config: AppConfig) -> Result<()> {
    println!("Ratesync v{} (built {})", ratesync::VERSION, ratesync::BUILD_DATE);
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let devices: Arc<dyn DeviceProvider> = Arc::new(CpalDeviceProvider);
        let now_playing: Arc<dyn NowPlayingSource> = match config
            .now_playing_command
            .as_deref()
            .and_then(CommandNowPlaying::from_argv)
        {
            Some(command) => Arc::new(command),
            None => {
                info!("No now-playing command configured, track changes will not be seen");
                Arc::new(NoNowPlaying)
            }
        };
        let script: Arc<dyn PostSwitchScript> = match &config.post_switch_script {
            Some(path) => Arc::new(ShellScript::new(path)),
            None => Arc::new(NoScript),
        };

        let collaborators = Collaborators {
            devices: Arc::clone(&devices),
            evidence: Arc::new(CommandLogSource::default()),
            now_playing: Arc::clone(&now_playing),
            script,
        };
        let (handle, mut task) = ResolverHandle::spawn(config.resolver_settings(), collaborators);

        let device_observer =
            spawn_device_observer(devices, handle.clone(), config.device_poll_interval());
        let now_playing_observer = spawn_now_playing_observer(
            now_playing,
            handle.clone(),
            DEFAULT_NOW_PLAYING_POLL_INTERVAL,
        );

        // Set up Ctrl+C handler
        let ctrlc_handle = handle.clone();
        ctrlc::set_handler(move || {
            let _ = ctrlc_handle.shutdown();
        })
        .context("Failed to install Ctrl+C handler")?;

        println!("Following playback. Press Ctrl+C to stop.");
        println!();

        let mut status = handle.subscribe();
        let mut last_line = String::new();
        loop {
            tokio::select! {
                result = &mut task => {
                    if let Err(e) = result {
                        error!("Resolver task failed: {}", e);
                    }
                    break;
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let line = status_line(&status.borrow_and_update());
                    // Only print if changed (reduce spam)
                    if line != last_line {
                        println!("{}", line);
                        last_line = line;
                    }
                }
            }
        }

        device_observer.abort();
        now_playing_observer.abort();
        println!();
        println!("Done.");
        Ok(())
    })
}

fn status_line(status: &ResolverStatus) -> String {
    let rate = status
        .sample_rate_khz()
        .unwrap_or_else(|| "-".to_string());
    let bits = status
        .bit_depth
        .map(|b| format!("{b}-bit"))
        .unwrap_or_else(|| "-".to_string());
    let device = status.active_device.as_deref().unwrap_or("(none)");
    let track = status
        .current_track
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "(nothing playing)".to_string());
    format!(
        "Rate: {:>10} | Bits: {:>6} | Switches: {:>3} | Device: {} | Track: {}",
        rate, bits, status.switch_count, device, track
    )
}

fn list_devices() -> Result<()> {
    println!("Scanning for output devices...");
    println!();

    let provider = CpalDeviceProvider;
    let devices = match provider.output_devices() {
        Ok(devices) => devices,
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("Error: {}", e);
            return Ok(());
        }
    };
    if devices.is_empty() {
        println!("No output devices found.");
        return Ok(());
    }

    let default_id = provider.default_output_device().map(|d| d.id().to_string());
    println!("Found {} device(s):", devices.len());
    println!();
    for (i, device) in devices.iter().enumerate() {
        let default_marker = if default_id.as_deref() == Some(device.id()) {
            " [DEFAULT]"
        } else {
            ""
        };
        println!("  {}. {}{}", i + 1, device.name(), default_marker);
        if let Ok(rate) = device.nominal_sample_rate() {
            println!("     Current rate: {}", ratesync::resolver::status::format_khz(rate));
        }
        if let Some(formats) = device.output_stream_formats() {
            let listed: Vec<String> = formats.iter().map(|f| f.to_string()).collect();
            println!("     Formats: {}", listed.join(", "));
        }
        println!();
    }
    Ok(())
}

fn pick_device(
    provider: &dyn DeviceProvider,
    name: Option<&str>,
) -> Result<Arc<dyn OutputDevice>> {
    match name {
        Some(needle) => provider
            .output_devices()?
            .into_iter()
            .find(|d| matches_device_name(d.name(), needle))
            .with_context(|| format!("Could not find device '{needle}'")),
        None => provider
            .default_output_device()
            .context("No default output device"),
    }
}

fn resolve(rate: f64, bits: u32, device: Option<&str>) -> Result<()> {
    let device = pick_device(&CpalDeviceProvider, device)?;
    let snapshot = DeviceSnapshot::read(device.as_ref());

    println!("Device: {}", device.name());
    let Some(formats) = snapshot.formats else {
        println!("Device formats could not be read.");
        return Ok(());
    };

    let catalog = FormatCatalog::new(&formats, &snapshot.supported_rates);
    match catalog.resolve(rate, bits) {
        Some(format) => println!("{} Hz / {}-bit -> {}", rate, bits, format),
        None => println!("{} Hz / {}-bit -> no matching device format", rate, bits),
    }
    Ok(())
}

fn parse(kind: EntryKind, file: Option<PathBuf>) -> Result<()> {
    let mut input = String::new();
    match file {
        Some(path) => {
            input = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
        }
        None => {
            std::io::stdin().read_to_string(&mut input)?;
        }
    }

    let entries: Vec<String> = input.lines().map(str::to_string).collect();
    let evidence = EvidenceParser.parse(kind, &entries);
    for ev in &evidence {
        println!(
            "{:>8} Hz  {:>2}-bit  priority {}",
            ev.sample_rate, ev.bit_depth, ev.priority
        );
    }

    match best_evidence(evidence) {
        Some(best) => println!("Best: {} Hz / {}-bit", best.sample_rate, best.bit_depth),
        None => println!("No evidence in {} lines", entries.len()),
    }
    Ok(())
}
