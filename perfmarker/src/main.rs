//! perfmarker command line entry point
//!
//! Runs the working set and CPU frequency monitors alongside a trace capture
//! and writes their markers to the configured sink.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use perfmarker::config::{LogFormat, MonitorConfig};
use perfmarker::sink::build_sink;
use perfmarker::{
    CaptureSession, CpuFrequencyMonitor, MonitorError, NullSink, ProcessFilter, WorkingSetSampler,
};

/// perfmarker command line interface
#[derive(Parser)]
#[command(name = "perfmarker")]
#[command(about = "Working set and CPU frequency markers for performance traces")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level; overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both monitors until Ctrl-C or the duration elapses
    Run {
        /// Processes to sample: `*` or a `;`-separated list of executable names
        #[arg(short, long)]
        processes: Option<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Write markers to this file instead of the configured sink
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not run the CPU frequency monitor
        #[arg(long)]
        no_cpu: bool,

        /// Print Prometheus metrics when the capture ends
        #[cfg(feature = "metrics")]
        #[arg(long)]
        metrics: bool,
    },

    /// Take one working set sample and exit
    Sample {
        #[arg(short, long, default_value = "*")]
        processes: String,
    },

    /// Measure CPU frequencies for a number of rounds and exit
    Frequency {
        #[arg(short, long, default_value_t = 1)]
        rounds: u64,
    },

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Write the effective configuration to the default config path
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            process::exit(1);
        }
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }

    if let Err(e) = initialize_logging(&config) {
        eprintln!("Failed to initialize logging: {e:#}");
        process::exit(1);
    }

    let result = match cli.command {
        Some(Commands::Run {
            processes,
            duration,
            output,
            no_cpu,
            #[cfg(feature = "metrics")]
            metrics,
        }) => {
            if let Some(processes) = processes {
                config.working_set.process_filter = processes;
            }
            if let Some(output) = output {
                config.sink.path = Some(output);
            }
            if no_cpu {
                config.cpu_frequency.enabled = false;
            }
            #[cfg(not(feature = "metrics"))]
            let metrics = false;
            run_capture(config, duration.map(Duration::from_secs), metrics).await
        }
        Some(Commands::Sample { processes }) => sample_once(&config, &processes),
        Some(Commands::Frequency { rounds }) => measure_frequency(&config, rounds),
        Some(Commands::Config { show, init }) => handle_config(&config, show, init),
        None => run_capture(config, None, false).await,
    };

    if let Err(e) = result {
        let category = e.downcast_ref::<MonitorError>().map_or("cli", MonitorError::category);
        error!(category, "Command failed: {e:#}");
        process::exit(1);
    }
}

/// Initialize logging; logs go to stderr so stdout stays free for markers
fn initialize_logging(config: &MonitorConfig) -> anyhow::Result<()> {
    let level: Level = config
        .logging
        .level
        .parse()
        .with_context(|| format!("invalid log level '{}'", config.logging.level))?;

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("perfmarker={level}").parse()?)
        .add_directive(format!("marker={level}").parse()?)
        .add_directive("tokio=warn".parse()?);

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    Ok(())
}

/// Load configuration: explicit file, then default location, then env
fn load_configuration(cli: &Cli) -> anyhow::Result<MonitorConfig> {
    let path = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("configuration file not found: {}", path.display());
            }
            Some(path.clone())
        }
        None => match MonitorConfig::default_config_path() {
            Ok(path) if path.exists() => Some(path),
            _ => return Ok(MonitorConfig::from_env()?),
        },
    };

    Ok(MonitorConfig::load_with_fallback(path)?)
}

async fn run_capture(
    config: MonitorConfig,
    duration: Option<Duration>,
    print_metrics: bool,
) -> anyhow::Result<()> {
    let sink = build_sink(&config.sink)?;
    let session = CaptureSession::start(&config, sink)?;
    info!("Capture running, press Ctrl-C to stop");

    match duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
                _ = tokio::time::sleep(duration) => info!("Capture duration elapsed"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
    }

    if print_metrics {
        print_session_metrics(&session)?;
    }

    // Joining monitor threads blocks
    tokio::task::spawn_blocking(move || session.stop())
        .await
        .context("capture shutdown failed")?;

    info!("Capture stopped");
    Ok(())
}

#[cfg(feature = "metrics")]
fn print_session_metrics(session: &CaptureSession) -> anyhow::Result<()> {
    let exporter = perfmarker::MetricsExporter::new()?;
    if let Some(stats) = session.working_set_stats() {
        exporter.update_working_set(&stats);
    }
    if let Some(stats) = session.cpu_frequency_stats() {
        exporter.update_cpu_frequency(&stats, session.latest_frequency().as_ref());
    }
    eprint!("{}", exporter.render()?);
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn print_session_metrics(_session: &CaptureSession) -> anyhow::Result<()> {
    Ok(())
}

fn sample_once(config: &MonitorConfig, processes: &str) -> anyhow::Result<()> {
    let sink = build_sink(&config.sink)?;
    let mut sampler = WorkingSetSampler::with_platform_defaults(config.working_set.initial_page_capacity);

    match sampler.sample(&ProcessFilter::parse(processes), sink.as_ref()) {
        Some(aggregate) => {
            info!(
                processes = aggregate.processes,
                pss_bytes = aggregate.bytes.pss_bytes,
                "Sampled working sets"
            );
            Ok(())
        }
        None => bail!("no working set sample taken (empty filter or process enumeration failed)"),
    }
}

/// Results go to stdout only, so they never interleave with JSON markers
fn measure_frequency(config: &MonitorConfig, rounds: u64) -> anyhow::Result<()> {
    let mut cpu_config = config.cpu_frequency.clone();
    cpu_config.round_interval_ms = cpu_config.measurement_window_ms.max(1) * 4;

    let monitor = CpuFrequencyMonitor::new(&cpu_config, Arc::new(NullSink))?;
    info!(
        start_ghz = monitor.start_frequency_ghz(),
        cpus = monitor.active_cpus().len(),
        "Frequency monitor started"
    );

    let deadline = rounds_deadline(Instant::now(), cpu_config.round_interval(), rounds)
        .context("--rounds is too large")?;
    while monitor.stats().rounds < rounds {
        if Instant::now() > deadline {
            bail!("timed out waiting for frequency rounds");
        }
        std::thread::sleep(cpu_config.round_interval() / 2);
    }

    if let Some(latest) = monitor.latest() {
        for sample in &latest.samples {
            println!("cpu {:>3}: {:.2} GHz", sample.cpu, sample.frequency_ghz);
        }
    }
    monitor.stop();
    Ok(())
}

/// When waiting for `rounds` frequency rounds gives up, with ten rounds of
/// slack; `None` if that lies beyond what `Instant` can represent
fn rounds_deadline(now: Instant, round_interval: Duration, rounds: u64) -> Option<Instant> {
    let slack_rounds = u32::try_from(rounds).unwrap_or(u32::MAX).saturating_add(10);
    round_interval
        .checked_mul(slack_rounds)
        .and_then(|wait| now.checked_add(wait))
}

fn handle_config(config: &MonitorConfig, show: bool, init: bool) -> anyhow::Result<()> {
    config.validate()?;
    info!("Configuration is valid");

    if init {
        let path = MonitorConfig::default_config_path()?;
        config.save_to_file(&path)?;
        info!(path = %path.display(), "Configuration written");
    }

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    Ok(())
}
