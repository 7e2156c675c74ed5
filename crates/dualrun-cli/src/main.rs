//! `dualrun` - rehearse and inspect dual-execution migration policies

mod logging;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dualrun_core::simulator::PathProfile;
use dualrun_core::{run_simulation, DualOperationOptions, FacadeConfig, SimulatorConfig};
use logging::LogFormat;
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("dualrun")
        .version(dualrun_core::VERSION)
        .about("Dual-execution migration facade")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(value_parser!(LogFormat))
                .help("Log line format"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run seeded dual operations against two synthetic backends")
                .arg(
                    Arg::new("calls")
                        .long("calls")
                        .default_value("100")
                        .value_parser(value_parser!(u64))
                        .help("Number of dual operations to run"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .default_value("16")
                        .value_parser(value_parser!(usize))
                        .help("Maximum calls in flight"),
                )
                .arg(
                    Arg::new("operation")
                        .long("operation")
                        .default_value("lookup_price")
                        .help("Operation name; selects overrides from --config"),
                )
                .arg(
                    Arg::new("legacy-latency-ms")
                        .long("legacy-latency-ms")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Base latency of the legacy backend"),
                )
                .arg(
                    Arg::new("new-latency-ms")
                        .long("new-latency-ms")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Base latency of the new backend"),
                )
                .arg(
                    Arg::new("jitter-ms")
                        .long("jitter-ms")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Uniform jitter added to both backends"),
                )
                .arg(
                    Arg::new("legacy-failure-rate")
                        .long("legacy-failure-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a legacy call fails"),
                )
                .arg(
                    Arg::new("new-failure-rate")
                        .long("new-failure-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a new call fails"),
                )
                .arg(
                    Arg::new("timeout-ms")
                        .long("timeout-ms")
                        .value_parser(value_parser!(u64))
                        .help("Per-path deadline; overrides --config"),
                )
                .arg(
                    Arg::new("prefer-new")
                        .long("prefer-new")
                        .action(ArgAction::SetTrue)
                        .help("Return the new backend's result; overrides --config"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Facade config (.toml or .json) supplying the options"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a facade config")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Config file (.toml or .json)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    match run(&matches).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

async fn run(matches: &ArgMatches) -> Result<i32> {
    let format = matches
        .get_one::<LogFormat>("log-format")
        .copied()
        .unwrap_or(LogFormat::Text);
    logging::init(format);

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("check-config", args)) => check_config(args),
        _ => Ok(2),
    }
}

fn simulation_config(args: &ArgMatches) -> Result<SimulatorConfig> {
    let operation = args
        .get_one::<String>("operation")
        .cloned()
        .unwrap_or_else(|| "lookup_price".to_string());

    let mut options = match args.get_one::<PathBuf>("config") {
        Some(path) => {
            let config = FacadeConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            let options = config.options_for(&operation);
            tracing::info!(
                path = %path.display(),
                operation = %operation,
                primary = %options.primary(),
                timeout_ms = options.timeout_ms,
                "Using options from config"
            );
            options
        }
        None => DualOperationOptions::default(),
    };
    if let Some(timeout_ms) = args.get_one::<u64>("timeout-ms") {
        options = options.with_timeout_ms(*timeout_ms);
    }
    if args.get_flag("prefer-new") {
        options = options.with_prefer_legacy(false);
    }

    let value = |name: &str| args.get_one::<u64>(name).copied().unwrap_or_default();
    let rate = |name: &str| args.get_one::<f64>(name).copied().unwrap_or_default();
    let jitter_ms = value("jitter-ms");

    Ok(SimulatorConfig {
        seed: value("seed"),
        calls: value("calls"),
        concurrency: args.get_one::<usize>("concurrency").copied().unwrap_or(1),
        operation,
        legacy: PathProfile {
            latency_ms: value("legacy-latency-ms"),
            jitter_ms,
            failure_rate: rate("legacy-failure-rate"),
        },
        new: PathProfile {
            latency_ms: value("new-latency-ms"),
            jitter_ms,
            failure_rate: rate("new-failure-rate"),
        },
        options,
    })
}

async fn simulate(args: &ArgMatches) -> Result<i32> {
    let config = simulation_config(args)?;
    let report = run_simulation(config)
        .await
        .context("invalid simulation settings")?;
    if !report.complete() {
        tracing::warn!(
            expected = report.config.calls.saturating_mul(2),
            received = report.records,
            "Simulation finished with missing metrics records"
        );
    }

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }

    Ok(if report.complete() { 0 } else { 1 })
}

fn check_config(args: &ArgMatches) -> Result<i32> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("missing config path")?;
    let config = FacadeConfig::load(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        adapter = %config.adapter_name,
        overrides = config.operations.len(),
        "Config is valid"
    );

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(0);
    }

    println!("Adapter: {}", config.adapter_name);
    println!(
        "Defaults: primary={} timeout={}ms",
        config.defaults.primary(),
        config.defaults.timeout_ms
    );
    for operation in config.operations.keys() {
        let options = config.options_for(operation);
        println!(
            "  {operation}: primary={} timeout={}ms",
            options.primary(),
            options.timeout_ms
        );
    }
    println!("Status: VALID");
    Ok(0)
}
