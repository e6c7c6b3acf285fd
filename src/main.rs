//! Watchpost CLI
//!
//! Runs the monitoring agent and reviews the alerts it records.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use watchpost_agent::{
    alerts::{Alert, AlertFilter, AlertKind, AlertStore},
    config::Config,
    stats::AgentStats,
    Agent, VERSION,
};

#[derive(Parser)]
#[command(name = "watchpost")]
#[command(version = VERSION)]
#[command(about = "Camera and microphone monitoring agent", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long = "config", global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring until Ctrl+C
    Start {
        /// Capture and buffer only; skip detection
        #[arg(long)]
        safe_mode: bool,
    },

    /// Review recorded alerts
    #[command(subcommand)]
    Alerts(AlertCommands),

    /// Show configuration summary and cumulative statistics
    Status,

    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum AlertCommands {
    /// List alerts, newest first
    List {
        /// Only this kind (contact, theft, speech or the full name)
        #[arg(long)]
        kind: Option<AlertKind>,

        /// Only alerts raised on this day (YYYY-MM-DD, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Hide alerts marked as false positives
        #[arg(long)]
        hide_false_positives: bool,
    },

    /// Show one alert
    Show { id: String },

    /// Mark an alert as a false positive
    Mark {
        id: String,

        /// Why the alert was wrong
        #[arg(long, default_value = "")]
        feedback: String,
    },

    /// Delete an alert and its evidence
    Delete { id: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_file.as_deref())?;

    match cli.command {
        Commands::Start { safe_mode } => cmd_start(config, safe_mode),
        Commands::Alerts(command) => cmd_alerts(&config, command),
        Commands::Status => cmd_status(&config),
        Commands::Config => cmd_config(&config, cli.config_file.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(Config::config_path);
    Config::load_from(&path).with_context(|| format!("loading configuration from {path:?}"))
}

fn cmd_start(mut config: Config, safe_mode: bool) -> anyhow::Result<()> {
    config.safe_mode |= safe_mode;

    println!("Watchpost Agent v{VERSION}");
    println!();

    let mut agent = Agent::from_config(config).context("setting up agent")?;

    println!("Starting monitoring...");
    println!("  Video sources: {}", agent.config().video_sources.len());
    println!(
        "  Audio: {}",
        if agent.config().audio.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Detection: {}", agent.mode());
    println!("  Alerts: {:?}", agent.config().alerts_path());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    agent.start().context("starting agent")?;

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    println!();
    agent.stop();

    println!("{}", agent.stats().summary());
    Ok(())
}

fn cmd_alerts(config: &Config, command: AlertCommands) -> anyhow::Result<()> {
    let store = AlertStore::open(config.alerts_path());

    match command {
        AlertCommands::List {
            kind,
            date,
            hide_false_positives,
        } => {
            let filter = AlertFilter {
                kind,
                date,
                include_false_positives: !hide_false_positives,
            };
            let alerts = store.query(&filter);
            if alerts.is_empty() {
                println!("No alerts found.");
                return Ok(());
            }
            for alert in &alerts {
                println!(
                    "{}  {}  {:<22} {}{}",
                    alert.id,
                    alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    alert.kind.title(),
                    alert.description,
                    if alert.is_false_positive {
                        "  [false positive]"
                    } else {
                        ""
                    }
                );
            }
            println!();
            println!("{} alert(s)", alerts.len());
        }
        AlertCommands::Show { id } => {
            let Some(alert) = store.get_by_id(&id) else {
                bail!("no alert with id {id}");
            };
            print_alert(&alert);
        }
        AlertCommands::Mark { id, feedback } => {
            if !store.mark_false_positive(&id, &feedback)? {
                bail!("no alert with id {id}");
            }
            println!("Alert {id} marked as false positive.");
        }
        AlertCommands::Delete { id } => {
            if !store.delete(&id)? {
                bail!("no alert with id {id}");
            }
            println!("Alert {id} deleted.");
        }
    }
    Ok(())
}

fn print_alert(alert: &Alert) {
    let path_or_none = |path: &Option<PathBuf>| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    };

    println!("Alert {}", alert.id);
    println!("  Type: {}", alert.kind.title());
    println!("  Time: {}", alert.timestamp.to_rfc3339());
    println!("  Description: {}", alert.description);
    println!("  Video evidence: {}", path_or_none(&alert.video_path));
    println!("  Audio evidence: {}", path_or_none(&alert.audio_path));
    println!("  False positive: {}", alert.is_false_positive);
    if !alert.feedback.is_empty() {
        println!("  Feedback: {}", alert.feedback);
    }
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    println!("Watchpost Agent Status");
    println!("======================");
    println!();

    println!("Configuration:");
    for (i, source) in config.video_sources.iter().enumerate() {
        println!("  Video source {i}: {}", source.label());
    }
    println!(
        "  Audio: {}",
        if config.audio.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  Bindings: contact={} theft={} speech-video={}",
        config.detection.contact_source,
        config.detection.theft_source,
        config.detection.speech_video_source
    );
    println!("  Safe mode: {}", config.safe_mode);
    println!("  Data path: {:?}", config.data_path);
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let stats = AgentStats::with_persistence(stats_path).snapshot();
        println!("Cumulative Statistics:");
        println!("  Samples captured: {}", stats.samples_captured);
        println!("  Detection iterations: {}", stats.detections_run);
        println!("  Failed iterations: {}", stats.iteration_failures);
        println!("  Alerts raised: {}", stats.alerts_raised);
        println!("  Evidence clips exported: {}", stats.evidence_exported);
        println!("  Alerts lost to store failures: {}", stats.store_failures);
    } else {
        println!("No previous session data found.");
    }
    println!();

    let alerts = AlertStore::open(config.alerts_path()).get_all();
    println!("Alerts: {}", alerts.len());
    for kind in AlertKind::ALL {
        let total = alerts.iter().filter(|a| a.kind == kind).count();
        let dismissed = alerts
            .iter()
            .filter(|a| a.kind == kind && a.is_false_positive)
            .count();
        println!("  {}: {total} ({dismissed} false positive)", kind.title());
    }
    Ok(())
}

fn cmd_config(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {:?}",
        path.map(Path::to_path_buf).unwrap_or_else(Config::config_path)
    );
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
