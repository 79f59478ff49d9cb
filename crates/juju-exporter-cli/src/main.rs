//! juju-exporter-operator: event-layer adapter for the Juju exporter unit.
//!
//! # Usage
//!
//! ```text
//! juju-exporter-operator validate --options options.yaml
//! juju-exporter-operator render --options options.yaml --output /tmp/config.yaml
//! juju-exporter-operator reconcile --event config-changed
//! juju-exporter-operator channel 3.1.6
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use juju_exporter_operator::{Event, RelationHandle};
use tracing_subscriber::EnvFilter;

mod commands;
mod file_host;
mod runtime;

#[derive(Parser)]
#[command(
    name = "juju-exporter-operator",
    about = "Configure and supervise the Juju exporter collector",
    version,
    propagate_version = true
)]
struct Cli {
    /// Runtime settings file (default: /etc/juju-exporter-operator/runtime.toml if present).
    #[arg(long, global = true)]
    runtime_config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an options file and print the field errors or the redacted settings.
    Validate {
        /// Options file (YAML, or TOML by extension). Defaults to the runtime options path.
        #[arg(short, long)]
        options: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Render the collector config without touching relations or the service.
    Render {
        #[arg(short, long)]
        options: Option<PathBuf>,
        /// Destination file. Defaults to the runtime agent config path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run one reconciliation pass and print the resulting unit status.
    Reconcile {
        /// Triggering event, e.g. config-changed or relation-joined.
        #[arg(short, long)]
        event: Event,
        #[arg(short, long)]
        options: Option<PathBuf>,
        /// Relation the event is about, as endpoint:id.
        #[arg(long, value_parser = RelationHandle::parse)]
        relation: Option<RelationHandle>,
        /// Record this unit's address, as supplied by the general-info relation.
        #[arg(long)]
        address: Option<String>,
        /// Record leadership state.
        #[arg(long)]
        leader: Option<bool>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the collector install channel for a controller version.
    Channel {
        /// Controller version, e.g. 2.9.44 or 3.1.6.
        version: String,
    },
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,juju_exporter=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let runtime = runtime::RuntimeConfig::load(cli.runtime_config.as_deref())?;

    match cli.command {
        Commands::Validate { options, format } => {
            commands::validate::run(&runtime, options.as_deref(), format == OutputFormat::Json)
        }
        Commands::Render { options, output } => {
            commands::render::run(&runtime, options.as_deref(), output.as_deref())
        }
        Commands::Reconcile {
            event,
            options,
            relation,
            address,
            leader,
            format,
        } => commands::reconcile::run(
            runtime,
            commands::reconcile::Invocation {
                event,
                options,
                relation,
                address,
                leader,
                json: format == OutputFormat::Json,
            },
        ),
        Commands::Channel { version } => commands::channel::run(&version),
    }
}
