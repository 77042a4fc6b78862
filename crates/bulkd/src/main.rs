//! Entry point for the `bulkd` batching service.
//!
//! Loads configuration from flags, `BULKD_*` variables, and an optional TOML
//! file, then runs the service until a termination signal arrives.

use std::io::{self, Write};
use std::process::ExitCode;

use bulk_config::{Config, ConfigError};
use bulkd::{StructuredHealthReporter, SystemShutdownSignal, run_service};

fn main() -> ExitCode {
    let mut stderr = io::stderr().lock();
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Cli(error)) => error.exit(),
        Err(error) => {
            let _ = writeln!(stderr, "bulkd: {error}");
            return ExitCode::FAILURE;
        }
    };
    let shutdown = match SystemShutdownSignal::install() {
        Ok(shutdown) => shutdown,
        Err(error) => {
            let _ = writeln!(stderr, "bulkd: {error}");
            return ExitCode::FAILURE;
        }
    };
    match run_service(&config, &StructuredHealthReporter::new(), &shutdown) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "bulkd: {error}");
            ExitCode::FAILURE
        }
    }
}
