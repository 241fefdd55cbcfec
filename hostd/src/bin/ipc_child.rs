//! # IPC Child
//!
//! Child stub launched by `hostd` and its tests. Connects back over the
//! channel named by `--ipc-channel` and serves echo, shutdown and fault
//! injection traffic.

use hostd::{run_child, LOG_ENV};
use process_launcher::CommandLine;
use services_logger::LogLevel;
use std::process;

fn main() {
    let level = services_logger::level_from_env(LOG_ENV).unwrap_or(LogLevel::Warn);
    if let Err(e) = services_logger::init(level) {
        eprintln!("Failed to install logger: {}", e);
    }

    let Some(command_line) = CommandLine::current() else {
        eprintln!("Error: empty command line");
        process::exit(2);
    };

    let code = match run_child(&command_line) {
        Ok(code) => code,
        Err(e) => {
            log::error!("child failed: {}", e);
            1
        }
    };
    log::logger().flush();
    process::exit(code);
}
