use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use mcm::ops::{self, Operation};
use tracing::{error, info};

/// MySQL cluster manager
///
/// Supervises the local MySQL server, the Consul agent and ProxySQL,
/// and coordinates bootstrap, backup, restore and failover with the
/// other nodes of the fleet.
#[derive(Debug, Parser)]
#[command(name = "mcm", about = "MySQL cluster manager")]
struct Cli {
    /// Operation to be executed
    operation: String,

    /// Log verbosity
    #[arg(long = "log-level", value_enum)]
    log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
    #[value(name = "CRITICAL")]
    Critical,
}

impl LogLevel {
    /// Tracing filter directive for this level.
    ///
    /// Tracing has no level above `error`, so CRITICAL maps there too.
    fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

fn init_tracing(level: Option<LogLevel>) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level.directive()),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let Some(operation) = Operation::parse(&cli.operation) else {
        error!(operation = %cli.operation, "unknown operation");
        return ExitCode::FAILURE;
    };

    info!(operation = operation.name(), "starting mysql cluster manager");

    // Settings are loaded per operation inside ops::run; a missing
    // required variable surfaces here naming the variable.
    if let Err(error) = ops::run(operation).await {
        error!(error = ?error, "operation failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
