//! # Fiscal Configuration Validator
//!
//! Command-line tool for validating orchestrator configuration files before a
//! deployment picks them up. Prints the resolved route table and the retry
//! schedule so operators can see what the file actually means.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fiscal_core::config::{ConfigManager, FiscalConfig};
use fiscal_core::models::{Operation, Priority};
use fiscal_core::orchestration::{BackoffCalculator, BackoffCalculatorConfig};
use fiscal_core::routing::QueueRouter;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate fiscal orchestrator configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: $FISCAL_CONFIG_PATH or config/fiscal.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the whole configuration
    All,

    /// Validate and describe one section
    Component {
        /// retry, priorities, queues, dispatcher, worker, sequence or logging
        name: String,
    },

    /// Print the (operation, priority) route table
    Routes,

    /// Print the backoff schedule for an operation, jitter excluded
    Backoff {
        #[arg(short, long, default_value = "emit")]
        operation: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|config| match &cli.command {
        Some(Commands::All) | None => validate_all(&config),
        Some(Commands::Component { name }) => describe_component(&config, name),
        Some(Commands::Routes) => show_routes(&config),
        Some(Commands::Backoff { operation }) => show_backoff(&config, operation),
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<FiscalConfig> {
    let manager = match &cli.config {
        Some(path) => {
            // An explicit path must exist; the default path may be absent
            ConfigManager::read_file(path)?;
            ConfigManager::load_from_path(path)
        }
        None => ConfigManager::load(),
    }
    .context("failed to load configuration")?;

    println!("🔧 Validating Fiscal Configuration");
    println!("Environment: {}", manager.environment());
    match manager.source_path() {
        Some(path) => println!("Source: {}", path.display()),
        None => println!("Source: built-in defaults and environment overrides"),
    }
    println!();

    Ok(manager.config().clone())
}

fn validate_all(config: &FiscalConfig) -> Result<()> {
    for component in [
        "retry",
        "priorities",
        "queues",
        "dispatcher",
        "worker",
        "sequence",
        "logging",
    ] {
        describe_component(config, component)?;
    }
    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn describe_component(config: &FiscalConfig, name: &str) -> Result<()> {
    match name.to_lowercase().as_str() {
        "retry" => {
            println!("🔁 Retry");
            let retry = &config.retry;
            println!(
                "   ✅ base {}ms, cap {}ms, multiplier {}, jitter {}",
                retry.base_delay_ms, retry.max_delay_ms, retry.multiplier, retry.jitter_enabled
            );
            for operation in Operation::ALL {
                println!(
                    "   ✅ {operation}: {} attempts",
                    retry.max_retries.for_operation(operation)
                );
            }
            println!(
                "   ✅ retryable rejection codes: {:?}, business exhaustion: {:?}",
                retry.retryable_rejection_codes, retry.business_exhaustion
            );
        }
        "priorities" => {
            println!("🎚️  Priorities");
            for priority in Priority::ALL {
                let p = config.priorities.for_priority(priority);
                println!(
                    "   ✅ {priority}: weight {}, ttl {}ms, concurrency {}, prefetch {}, timeout {}ms",
                    p.weight, p.ttl_ms, p.max_concurrency, p.prefetch, p.invocation_timeout_ms
                );
            }
        }
        "queues" => {
            println!("📬 Queues");
            println!(
                "   ✅ prefix {}, exchange {}, dead-letter exchange {}, durable {}",
                config.queues.prefix,
                config.queues.exchange,
                config.queues.dead_letter_exchange,
                config.queues.durable
            );
        }
        "dispatcher" => {
            println!("📤 Dispatcher");
            println!(
                "   ✅ publish timeout {}ms",
                config.dispatcher.publish_timeout_ms
            );
        }
        "worker" => {
            println!("👷 Worker");
            println!(
                "   ✅ poll {}ms, visibility {}ms, shutdown {}ms",
                config.worker.poll_interval_ms,
                config.worker.visibility_timeout_ms,
                config.worker.shutdown_timeout_ms
            );
        }
        "sequence" => {
            println!("🔢 Sequence");
            println!(
                "   ✅ {} compare-and-set attempts",
                config.sequence.max_cas_attempts
            );
        }
        "logging" => {
            println!("📝 Logging");
            println!(
                "   ✅ level {}, json {}",
                config.logging.level, config.logging.json
            );
        }
        other => bail!("Unknown component: {other}"),
    }
    Ok(())
}

fn show_routes(config: &FiscalConfig) -> Result<()> {
    let router = QueueRouter::from_config(&config.queues, &config.priorities);
    println!("🗺️  Routes");
    for operation in Operation::ALL {
        let op = operation.as_str();
        for priority in Priority::ALL {
            let tier = priority.as_str();
            match router.resolve(operation, priority) {
                Ok(descriptor) => println!("   {op:<6} {tier:<7} -> {descriptor}"),
                Err(_) => println!("   {op:<6} {tier:<7} -> (unrouted)"),
            }
        }
        println!("   {op:<6} {:<7} -> {}", "dead", router.dead_letter_for(operation));
    }
    Ok(())
}

fn show_backoff(config: &FiscalConfig, operation: &str) -> Result<()> {
    let operation: Operation = operation.parse().map_err(anyhow::Error::msg)?;
    let attempts = config.retry.max_retries.for_operation(operation);
    let calculator = BackoffCalculator::new(BackoffCalculatorConfig::from(&config.retry));

    println!("⏱️  Backoff for {operation} ({attempts} attempts)");
    for retry in 0..attempts.saturating_sub(1) {
        println!(
            "   attempt {} fails -> wait {:?} (+ up to {:?} jitter)",
            retry + 1,
            calculator.base_delay_for(retry),
            calculator.max_jitter()
        );
    }
    println!("   attempt {attempts} fails -> exhausted");
    Ok(())
}
