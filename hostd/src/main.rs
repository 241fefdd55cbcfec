//! # Host Daemon
//!
//! Main entry point for the host runtime.

use hostd::{HostRuntime, HostRuntimeConfig, LOG_ENV};
use services_logger::LogLevel;
use std::env;
use std::path::Path;
use std::process;

/// Options that override the config file
#[derive(Debug, Default)]
struct Options {
    config: Option<String>,
    run_for_ms: Option<u64>,
    exit_on_idle: bool,
    log_level: Option<LogLevel>,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("hostd");

    let options = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(program);
        process::exit(1);
    });

    let config = load_config(&options).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });

    let level = options
        .log_level
        .or_else(|| services_logger::level_from_env(LOG_ENV))
        .or_else(|| config.log_level.as_deref().and_then(|l| l.parse().ok()))
        .unwrap_or(LogLevel::Info);
    if let Err(e) = services_logger::init(level) {
        eprintln!("Failed to install logger: {}", e);
    }

    let mut runtime = HostRuntime::new(config).unwrap_or_else(|e| {
        eprintln!("Failed to create runtime: {}", e);
        process::exit(1);
    });

    match runtime.run() {
        Ok(summary) => {
            log::info!(
                "launched {} children, {} restarts, {} exits",
                summary.launched,
                summary.restarts,
                summary.exits.len()
            );
        }
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    }
}

fn load_config(options: &Options) -> Result<HostRuntimeConfig, String> {
    let mut config = match &options.config {
        Some(path) => HostRuntimeConfig::from_file(Path::new(path)).map_err(|e| e.to_string())?,
        None => HostRuntimeConfig::default(),
    };
    if options.run_for_ms.is_some() {
        config.run_for_ms = options.run_for_ms;
    }
    if options.exit_on_idle {
        config.exit_on_idle = true;
    }
    Ok(config)
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --config".to_string());
                }
                options.config = Some(args[i].clone());
            }
            "--run-for-ms" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --run-for-ms".to_string());
                }
                options.run_for_ms = Some(
                    args[i]
                        .parse()
                        .map_err(|_| format!("Invalid run-for-ms value: {}", args[i]))?,
                );
            }
            "--exit-on-idle" => {
                options.exit_on_idle = true;
            }
            "--log-level" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --log-level".to_string());
                }
                options.log_level = Some(args[i].parse().map_err(|e| format!("{}", e))?);
            }
            "--help" | "-h" => {
                print_usage(args.first().map(String::as_str).unwrap_or("hostd"));
                process::exit(0);
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    Ok(options)
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>      JSON host configuration");
    eprintln!("  --run-for-ms <N>         Stop after N milliseconds");
    eprintln!("  --exit-on-idle           Exit when no children are running");
    eprintln!("  --log-level <LEVEL>      trace, debug, info, warn or error");
    eprintln!("                           (default: ${} or info)", LOG_ENV);
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --config hostd.json --exit-on-idle", program);
    eprintln!("  {} --config hostd.json --run-for-ms 5000", program);
}
