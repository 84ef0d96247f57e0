//! scan-fsm daemon entry point.
//!
//! Loads the engine configuration and machine definitions, then drives
//! every controller at the configured cycle period until the input scripts
//! run out, the cycle limit is hit, or a shutdown signal arrives.

mod signals;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fsm_common::config::{ControllerEntry, EngineConfig, MachineConfig};
use fsm_engine::{CycleDriver, MachineDefinition};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::signals::SignalHandler;

/// Cycles between periodic status lines.
const STATUS_INTERVAL: u64 = 10_000;

/// scan-fsm daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "fsm-daemon",
    about = "scan-fsm daemon - cyclic state-machine controllers",
    version,
    long_about = None
)]
struct Args {
    /// Path to an engine configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run a single machine definition instead of the configured controllers.
    #[arg(long, short = 'm', value_name = "FILE")]
    machine: Option<PathBuf>,

    /// Input script for `--machine`.
    #[arg(long, short = 's', value_name = "FILE", requires = "machine")]
    script: Option<PathBuf>,

    /// Maximum cycles to run (0 = until scripts run out or a signal).
    #[arg(long, default_value = "0")]
    max_cycles: u64,

    /// Do not sleep between cycles.
    #[arg(long)]
    free_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Validate the machine definitions and exit.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting scan-fsm daemon");

    let mut config = load_config(&args)?;
    apply_args(&args, &mut config);

    if config.controllers.is_empty() {
        bail!("no controllers configured; pass --machine or list controllers in the config file");
    }

    info!(
        cycle_time = %humantime::format_duration(config.cycle_time),
        controllers = config.controllers.len(),
        "Configuration loaded"
    );

    let mut driver = CycleDriver::from_config(&config).context("Failed to load controllers")?;
    driver.set_free_run(args.free_run);

    if args.check {
        for controller in driver.controllers() {
            let def = controller.definition();
            info!(
                controller = controller.name(),
                machine = def.name(),
                states = def.state_count(),
                transitions = def.table().len(),
                overrides = def.overrides().len(),
                fault_rules = def.fault_rules().len(),
                "Definition valid"
            );
        }
        return Ok(());
    }

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    run_daemon(&mut driver, &config, &signal_handler, args.max_cycles)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "fsm_daemon={level},fsm_engine={level},fsm_stdlib={level},fsm_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `SCAN_FSM_CONFIG` environment variable
/// 3. `/etc/scan-fsm/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<EngineConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return EngineConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("SCAN_FSM_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from SCAN_FSM_CONFIG");
            return EngineConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from SCAN_FSM_CONFIG={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "SCAN_FSM_CONFIG set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/scan-fsm/config.toml", "config/default.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            info!(config_path = ?path, "Loading config");
            return EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {candidate}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(EngineConfig::default())
}

/// Replace the configured controllers with `--machine` when given.
fn apply_args(args: &Args, config: &mut EngineConfig) {
    if let Some(machine) = &args.machine {
        let name = machine
            .file_stem()
            .map_or_else(|| "main".to_string(), |s| s.to_string_lossy().into_owned());
        config.controllers = vec![ControllerEntry {
            name,
            machine: machine.clone(),
            script: args.script.clone(),
        }];
    }
}

/// Re-read every machine file and swap definitions that validate.
/// Controllers whose file fails keep their current definition.
fn reload_definitions(driver: &mut CycleDriver, config: &EngineConfig) {
    for entry in &config.controllers {
        let loaded = MachineConfig::from_file(&entry.machine).and_then(|machine| {
            MachineDefinition::compile(&machine, config.fault_policy.max_retries)
        });
        match loaded {
            Ok(definition) => match driver.controller_mut(&entry.name) {
                Ok(controller) => controller.reconfigure(definition),
                Err(e) => warn!(error = %e, "Reload skipped"),
            },
            Err(e) => warn!(
                controller = %entry.name,
                error = %e,
                "Reload failed, keeping current definition"
            ),
        }
    }
}

/// Main daemon run loop.
fn run_daemon(
    driver: &mut CycleDriver,
    config: &EngineConfig,
    signal_handler: &SignalHandler,
    max_cycles: u64,
) -> Result<()> {
    driver.start();

    let mut cycles_run = 0u64;
    let mut failure = None;

    loop {
        signal_handler.poll();
        if signal_handler.shutdown_requested() {
            info!("Shutdown signal received, stopping driver");
            break;
        }

        if signal_handler.take_reload_request() {
            info!("Reloading machine definitions");
            reload_definitions(driver, config);
        }

        let cycle = match driver.run_cycle() {
            Ok(cycle) => cycle,
            Err(e) => {
                error!("Cycle execution failed: {e}");
                failure = Some(e);
                break;
            }
        };

        if cycle.exhausted {
            info!(cycles = cycles_run, "All input scripts exhausted");
            break;
        }
        cycles_run += 1;
        if max_cycles > 0 && cycles_run >= max_cycles {
            info!(cycles = cycles_run, "Maximum cycle count reached");
            break;
        }

        if cycles_run % STATUS_INTERVAL == 0 {
            let metrics = driver.metrics();
            info!(
                cycles = cycles_run,
                avg_us = metrics.mean().map_or(0, |d| d.as_micros()),
                max_us = metrics.max().map_or(0, |d| d.as_micros()),
                overruns = metrics.overrun_count(),
                "Periodic status"
            );
        }
    }

    info!("Shutting down...");
    log_summary(driver, config, signal_handler);

    match failure {
        Some(e) => Err(e).context("Driver stopped on a cycle error"),
        None => Ok(()),
    }
}

fn log_summary(driver: &CycleDriver, config: &EngineConfig, signal_handler: &SignalHandler) {
    for controller in driver.controllers() {
        let fault = controller.fault();
        info!(
            controller = controller.name(),
            state = controller.state_name(),
            fault = %fault.state(),
            fault_code = ?fault.code(),
            retries = fault.retries(),
            "Controller final state"
        );
    }

    let metrics = driver.metrics();
    if config.metrics.enabled {
        for (p, value) in metrics.percentiles(&config.metrics.percentiles) {
            info!(
                percentile = p,
                execution = %humantime::format_duration(value),
                "Cycle execution percentile"
            );
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        total_cycles = snapshot.total_cycles,
        overruns = snapshot.overrun_count,
        jitter_ns = ?snapshot.jitter_ns(),
        transitions = snapshot.transitions,
        overrides = snapshot.overrides,
        fault_raises = snapshot.fault_raises,
        signals = signal_handler.signal_count(),
        "Daemon shutdown complete"
    );
}
