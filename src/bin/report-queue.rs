//! # Report Queue CLI
//!
//! Operator tool for the report queue: declare topology, read depths and health,
//! purge queues, and inspect or retry dead-lettered jobs.

mod cli;

use clap::{Parser, Subcommand};
use report_queue::constants::env;
use report_queue::{QueueConfig, ReportQueueService};
use tracing::info;

use cli::{handle_dlq_command, handle_health, handle_purge, handle_stats, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "report-queue")]
#[command(about = "Operator interface for the report-generation job queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML); environment variables still take precedence
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Topology management
    #[command(subcommand)]
    Topology(TopologyCommands),

    /// Show queue depths and process counters
    Stats,

    /// Show queue health as reported to the service health check
    Health,

    /// Remove every ready message from a queue
    Purge {
        /// Purge the dead-letter queue instead of the work queue
        #[arg(long)]
        dead_letter: bool,
        /// Confirm the destructive operation
        #[arg(long)]
        yes: bool,
    },

    /// Dead-letter queue operations
    #[command(subcommand)]
    Dlq(DlqCommands),
}

#[derive(Debug, Subcommand)]
pub enum TopologyCommands {
    /// Declare exchanges, queues and bindings (idempotent)
    Declare,
}

#[derive(Debug, Subcommand)]
pub enum DlqCommands {
    /// Show dead-lettered jobs without removing them
    Peek {
        /// Maximum number of messages to inspect
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Move dead-lettered jobs back to the work queue
    Retry {
        /// Keep retrying until the dead-letter queue is empty or --limit is reached
        #[arg(long)]
        all: bool,
        /// Upper bound on jobs moved with --all
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    // --config behaves like REPORT_QUEUE_CONFIG; everything else comes from the environment.
    let config_path = cli.config.clone();
    let config = QueueConfig::load_with(|key| {
        if key == env::CONFIG_FILE {
            if let Some(path) = &config_path {
                return Some(path.clone());
            }
        }
        std::env::var(key).ok()
    })?;

    info!(url = %config.redacted_url(), queue = %config.queue_name, "Report queue CLI starting");

    // Health reports an unreachable broker instead of failing to connect.
    let service = match cli.command {
        Commands::Health => ReportQueueService::connect_lazy(config)?,
        _ => ReportQueueService::connect(config).await?,
    };

    let result = match cli.command {
        Commands::Topology(TopologyCommands::Declare) => {
            service.declare_topology().await?;
            println!(
                "✓ Topology declared: {} -> {}, {} -> {}",
                service.topology().exchange,
                service.topology().queue,
                service.topology().dead_letter_exchange,
                service.topology().dead_letter_queue
            );
            Ok(())
        }
        Commands::Stats => handle_stats(&service, cli.format).await,
        Commands::Health => handle_health(&service, cli.format).await,
        Commands::Purge { dead_letter, yes } => handle_purge(&service, dead_letter, yes).await,
        Commands::Dlq(dlq_cmd) => handle_dlq_command(dlq_cmd, &service, cli.format).await,
    };

    service.shutdown().await?;
    result
}
