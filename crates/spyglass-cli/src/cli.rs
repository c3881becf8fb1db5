//! Argument parsing and command dispatch.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use spyglass_config::ConfigFormat;
use spyglass_sources::ConnectorRegistry;
use spyglass_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha};

use crate::commands::{handle_introspect, handle_validate};
use crate::error::{CliError, CliResult};

const DEFAULT_INTROSPECT_TIMEOUT_MS: u64 = 10_000;

/// Parses CLI arguments, executes the requested command and prints the
/// outcome. Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let result = match init_logging(&cli) {
        Ok(()) => dispatch(cli, ConnectorRegistry::default()).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(output) => {
            print!("{output}");
            0
        }
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

fn init_logging(cli: &Cli) -> CliResult<()> {
    spyglass_telemetry::init_logging(&LoggingConfig {
        level: &cli.log_level,
        format: LogFormat::Pretty,
        build_sha: build_sha(),
    })
    .map_err(CliError::failure)
}

pub(crate) async fn dispatch(cli: Cli, connectors: ConnectorRegistry) -> CliResult<String> {
    match cli.command {
        Command::Introspect(args) => handle_introspect(&args, connectors).await,
        Command::Validate(args) => handle_validate(&args).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "spyglass",
    about = "Introspect and validate Spyglass data source configuration"
)]
pub(crate) struct Cli {
    /// Fallback log level when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "SPYGLASS_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub(crate) log_level: String,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Reconcile the configuration once and print the introspected result.
    Introspect(IntrospectArgs),
    /// Load and validate the configuration without contacting any cluster.
    Validate(ValidateArgs),
}

#[derive(Args, Debug, Clone)]
pub(crate) struct IntrospectArgs {
    /// Configuration document (`.yaml`, `.yml` or `.json`).
    #[arg(long, env = "SPYGLASS_CONFIG")]
    pub(crate) config: PathBuf,
    /// How long to wait for introspection; 0 waits until every source settles.
    #[arg(long, default_value_t = DEFAULT_INTROSPECT_TIMEOUT_MS)]
    pub(crate) timeout_ms: u64,
    /// Output document format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub(crate) format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct ValidateArgs {
    /// Configuration document (`.yaml`, `.yml` or `.json`).
    #[arg(long, env = "SPYGLASS_CONFIG")]
    pub(crate) config: PathBuf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Yaml,
    Json,
}

impl From<OutputFormat> for ConfigFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Yaml => Self::Yaml,
            OutputFormat::Json => Self::Json,
        }
    }
}
