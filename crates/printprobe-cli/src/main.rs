//! Command-line interface for PrintProbe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use printprobe_client::{CommandOutcome, ResilientClient, ValidationOptions};
use printprobe_core::cancel::CancelToken;
use printprobe_core::catalog::CommandCatalog;
use printprobe_core::config::{ProbeConfig, env_vars};
use printprobe_core::message_log::MessageLog;
use printprobe_core::payload::Payload;
use printprobe_core::transport::{WebSocketConfig, WebSocketTransport};
use printprobe_discovery::{Analyzer, DiscoveryOrchestrator, RAW_LOG_FILE, REPORT_FILE};

/// PrintProbe - discover and drive an undocumented printer control socket.
#[derive(Parser, Debug)]
#[command(name = "printprobe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML). Missing file means defaults.
    #[arg(short, long, global = true, default_value = "printprobe.toml")]
    config: PathBuf,

    /// Device URI, overriding the configured host and port.
    #[arg(long, global = true)]
    uri: Option<String>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Capture traffic through the passive, active and fuzzing phases.
    Discover {
        /// Total duration split evenly across the three phases.
        #[arg(long)]
        duration_minutes: Option<u64>,
        /// Output directory for the report and the raw log.
        #[arg(short, long, default_value = "discovery_output")]
        out: PathBuf,
    },
    /// Build a command catalog from a captured raw log.
    Analyze {
        /// Raw message log written by `discover`.
        #[arg(long)]
        raw: PathBuf,
        /// Output directory for the catalog and the analysis report.
        #[arg(short, long, default_value = "analysis_output")]
        out: PathBuf,
    },
    /// Send one catalog command.
    Send {
        #[arg(long, default_value = "catalog.json")]
        catalog: PathBuf,
        /// Catalog command id.
        id: String,
        /// Payload override, `key=value`; values are parsed as JSON when possible.
        #[arg(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, Value)>,
    },
    /// Print the derived printer status.
    Status {
        #[arg(long, default_value = "catalog.json")]
        catalog: PathBuf,
    },
    /// Send the first N catalog commands repeatedly and report success rates.
    Validate {
        #[arg(long, default_value = "catalog.json")]
        catalog: PathBuf,
        /// Number of catalog commands to exercise.
        #[arg(long, default_value_t = 5)]
        commands: usize,
        /// Sends per command.
        #[arg(long, default_value_t = 3)]
        runs: u32,
    },
    /// List catalog entries with their derived timeouts.
    Catalog {
        #[arg(long, default_value = "catalog.json")]
        catalog: PathBuf,
    },
}

fn parse_override(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = ProbeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(minutes) = match &args.command {
        Command::Discover { duration_minutes, .. } => *duration_minutes,
        _ => None,
    } {
        config.discovery = config.discovery.with_total_duration(Duration::from_secs(minutes * 60));
    }
    let uri = args.uri.clone().unwrap_or_else(|| config.device_uri());

    match args.command {
        Command::Discover { out, .. } => run_discover(&config, uri, &out).await,
        Command::Analyze { raw, out } => run_analyze(&config, &raw, &out),
        Command::Send {
            catalog,
            id,
            overrides,
        } => run_send(&config, uri, &catalog, &id, overrides).await,
        Command::Status { catalog } => run_status(&config, uri, &catalog).await,
        Command::Validate {
            catalog,
            commands,
            runs,
        } => run_validate(&config, uri, &catalog, commands, runs).await,
        Command::Catalog { catalog } => list_catalog(&config, &catalog),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "printprobe=debug"
    } else {
        "printprobe=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn cancel_on_signal(token: CancelToken) {
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::warn!("Shutdown requested, finishing current operation");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::debug!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

fn transport() -> WebSocketTransport {
    WebSocketTransport::new(WebSocketConfig::default())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_discover(config: &ProbeConfig, uri: String, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let cancel = CancelToken::new();
    cancel_on_signal(cancel.clone());

    tracing::info!(
        uri = %uri,
        minutes = config.discovery.total_duration_secs / 60,
        "Starting discovery"
    );
    let outcome = DiscoveryOrchestrator::new(transport(), uri, config.discovery.clone())
        .with_indicators(config.indicators.clone())
        .with_cancel_token(cancel)
        .run(Some(out))
        .await?;

    let report = &outcome.report;
    println!("Discovery {:?}", report.completion);
    println!(
        "  messages: {} ({} sent, {} received)",
        report.total_messages, report.sent_messages, report.received_messages
    );
    for phase in &report.phases {
        println!(
            "  {:<8} sent {:>3}  responded {:>3}  timed out {:>3}  working {:>3}",
            phase.phase.to_string(),
            phase.sent,
            phase.responded,
            phase.timed_out,
            phase.successful_commands.len()
        );
    }
    println!("  report: {}", out.join(REPORT_FILE).display());
    println!("  raw log: {}", out.join(RAW_LOG_FILE).display());
    Ok(())
}

fn run_analyze(config: &ProbeConfig, raw: &Path, out: &Path) -> Result<()> {
    let log = MessageLog::load(raw).with_context(|| format!("loading {}", raw.display()))?;
    let analyzer = Analyzer::new(config.discovery.correlation_window(), config.indicators.clone());
    let report = analyzer.analyze(&log);

    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    report.save(out)?;

    let summary = &report.summary;
    println!(
        "Analyzed {} messages: {} pairs, {:.1}% successful, mean latency {:.0}ms",
        summary.total_messages, summary.pairs, summary.success_rate_percent, summary.mean_latency_ms
    );
    println!(
        "Catalog: {} commands, {} rejected shapes, {} unpaired commands",
        summary.catalog_commands, summary.rejected_shapes, summary.unpaired_commands
    );
    for recommendation in &report.recommendations {
        println!("  - {}", recommendation);
    }
    Ok(())
}

fn client_for(
    config: &ProbeConfig,
    uri: String,
    catalog: &Path,
) -> Result<ResilientClient<WebSocketTransport>> {
    let catalog = CommandCatalog::load_or_fallback(catalog)
        .with_context(|| format!("loading {}", catalog.display()))?;
    let cancel = CancelToken::new();
    cancel_on_signal(cancel.clone());
    Ok(ResilientClient::new(transport(), uri, catalog)
        .with_config(config.client.clone())
        .with_cancel_token(cancel))
}

async fn run_send(
    config: &ProbeConfig,
    uri: String,
    catalog: &Path,
    id: &str,
    overrides: Vec<(String, Value)>,
) -> Result<()> {
    let mut client = client_for(config, uri, catalog)?;
    let overrides: Payload = overrides.into_iter().collect();

    let report = client.execute(id, &overrides).await;
    client.disconnect().await;
    let report = report?;

    print_json(&json!({
        "command": report.command_id,
        "outcome": report.outcome.kind(),
        "attempts": report.attempts,
        "elapsed_ms": report.elapsed.as_millis() as u64,
        "response": report.outcome.response(),
        "error": report.outcome.error().map(ToString::to_string),
    }))?;

    if matches!(report.outcome, CommandOutcome::Failure(_) | CommandOutcome::Timeout) {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_status(config: &ProbeConfig, uri: String, catalog: &Path) -> Result<()> {
    let mut client = client_for(config, uri, catalog)?;
    let snapshot = client.get_status().await;
    client.disconnect().await;
    print_json(&snapshot?)
}

async fn run_validate(
    config: &ProbeConfig,
    uri: String,
    catalog: &Path,
    commands: usize,
    runs: u32,
) -> Result<()> {
    let mut client = client_for(config, uri, catalog)?;
    let options = ValidationOptions {
        commands,
        runs,
        pause: config.client.validation_pause(),
    };
    let report = printprobe_client::validate(&mut client, &options).await;
    client.disconnect().await;
    let report = report?;

    print_json(&report)?;
    print_json(&client.stats())
}

fn list_catalog(config: &ProbeConfig, path: &Path) -> Result<()> {
    let catalog =
        CommandCatalog::load_or_fallback(path).with_context(|| format!("loading {}", path.display()))?;
    if !path.exists() {
        println!("{} not found, showing built-in fallback commands", path.display());
    }

    println!(
        "{:<28} {:<10} {:>8} {:>10}  {}",
        "ID", "CATEGORY", "SUCCESS", "TIMEOUT", "PAYLOAD"
    );
    for entry in catalog.iter() {
        let timeout = entry.derive_timeout(config.client.timeout_floor(), config.client.timeout_multiplier);
        println!(
            "{:<28} {:<10} {:>7.0}% {:>9.1}s  {}{}",
            entry.id,
            entry.category.to_string(),
            entry.success_rate * 100.0,
            timeout.as_secs_f64(),
            entry.template,
            if entry.status_class { "  [status]" } else { "" }
        );
    }
    Ok(())
}
