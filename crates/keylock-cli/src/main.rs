//! keylock CLI - exercise and configure the keyed lock manager

use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use keylock_core::config::Config;
use keylock_core::locking::{AcquireOptions, KeyedLockManager, LockConfig, Task};
use keylock_core::{LockError, LockResult};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::info;


#[derive(Parser)]
#[command(name = "keylock")]
#[command(author, version, about = "Keyed mutual exclusion for async tasks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tasks against a shared lock manager and report the outcomes
    Simulate(SimulateArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Clone, Debug)]
struct SimulateArgs {
    /// Number of tasks to submit
    #[arg(short = 'n', long, default_value_t = 32)]
    tasks: usize,

    /// Number of distinct keys the tasks contend for
    #[arg(short, long, default_value_t = 4)]
    keys: usize,

    /// Keys each task holds at once (acquired as a batch)
    #[arg(short, long, default_value_t = 1)]
    batch: usize,

    /// How long each task holds its keys, in milliseconds
    #[arg(long, default_value_t = 5)]
    hold_ms: u64,

    /// Queue timeout in milliseconds (overrides config; 0 disables)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum waiters per key (overrides config)
    #[arg(long)]
    max_pending: Option<usize>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show configuration file path
    Path,
}

/// Outcome counts for a simulation run
#[derive(Debug, Default, Serialize)]
struct SimulationReport {
    tasks: usize,
    keys: usize,
    batch: usize,
    completed: usize,
    timed_out: usize,
    rejected: usize,
    failed: usize,
    /// Times a task found one of its keys already in use
    overlaps: usize,
    elapsed_ms: u64,
}

impl SimulationReport {
    fn record(&mut self, outcome: &LockResult<()>) {
        match outcome {
            Ok(()) => self.completed += 1,
            Err(LockError::TimedOut { .. }) => self.timed_out += 1,
            Err(LockError::TooManyPending { .. }) => self.rejected += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keylock=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => cmd_simulate(args, cli.format, cli.quiet).await,
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

/// Keys held by task `index`: `batch` consecutive keys starting at
/// `index`, wrapping around, in ascending order so that every task
/// acquires overlapping keys in the same relative order.
fn task_keys(index: usize, batch: usize, keys: usize) -> Vec<usize> {
    (0..batch.clamp(1, keys))
        .map(|offset| (index + offset) % keys)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn simulation_config(args: &SimulateArgs, base: LockConfig) -> LockConfig {
    let mut config = base;
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_timeout_ms(timeout_ms);
    }
    if let Some(max_pending) = args.max_pending {
        config = config.with_max_pending(max_pending);
    }
    config
}

async fn run_simulation(args: &SimulateArgs, config: LockConfig) -> anyhow::Result<SimulationReport> {
    if args.tasks == 0 || args.keys == 0 {
        anyhow::bail!("--tasks and --keys must both be at least 1");
    }

    let manager = KeyedLockManager::new(config);
    let in_use: Arc<Vec<AtomicBool>> = Arc::new((0..args.keys).map(|_| AtomicBool::new(false)).collect());
    let overlaps = Arc::new(AtomicUsize::new(0));
    let hold = Duration::from_millis(args.hold_ms);
    let started = Instant::now();

    let acquisitions = (0..args.tasks)
        .map(|index| {
            let held = task_keys(index, args.batch, args.keys);
            let names: Vec<String> = held.iter().map(|k| format!("key-{k}")).collect();
            let in_use = Arc::clone(&in_use);
            let overlaps = Arc::clone(&overlaps);

            let task = Task::value(move || async move {
                for &k in &held {
                    if in_use[k].swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                }
                tokio::time::sleep(hold).await;
                for &k in &held {
                    in_use[k].store(false, Ordering::SeqCst);
                }
                Ok(())
            });

            manager.acquire_many(names, task, AcquireOptions::default())
        })
        .collect::<LockResult<Vec<_>>>()?;

    let mut report = SimulationReport {
        tasks: args.tasks,
        keys: args.keys,
        batch: args.batch.clamp(1, args.keys),
        ..SimulationReport::default()
    };
    for outcome in join_all(acquisitions).await {
        report.record(&outcome);
    }
    report.overlaps = overlaps.load(Ordering::SeqCst);
    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    Ok(report)
}

async fn cmd_simulate(args: SimulateArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let config = simulation_config(&args, Config::load()?.lock_config());
    info!(
        tasks = args.tasks,
        keys = args.keys,
        timeout_ms = u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
        max_pending = config.max_pending,
        "Starting simulation"
    );

    let report = run_simulation(&args, config).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text if quiet => {
            println!("{}/{} completed", report.completed, report.tasks);
        }
        OutputFormat::Text => {
            println!(
                "Simulated {} tasks over {} keys in {}ms",
                report.tasks, report.keys, report.elapsed_ms
            );
            println!("  completed: {}", report.completed);
            println!("  timed out: {}", report.timed_out);
            println!("  rejected:  {}", report.rejected);
            println!("  failed:    {}", report.failed);
            println!("  overlaps:  {}", report.overlaps);
        }
    }

    if report.overlaps > 0 {
        anyhow::bail!("mutual exclusion violated {} time(s)", report.overlaps);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
