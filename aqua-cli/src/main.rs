//! AQUA CLI - operator tool for the shared-memory load-balancer bridge.

mod commands;
mod observability;

use anyhow::Result;
use aqua_core::bridge::DEFAULT_SCHEMA_PATH;
use aqua_core::ground_truth::{DEFAULT_HOST_PREFIX, DEFAULT_PORT};
use clap::{Args, Parser, Subcommand};
use observability::{TracingConfig, init_tracing, verbosity_filter};
use std::path::PathBuf;

/// AQUA - attach to a load balancer's shared region, read telemetry and
/// publish server weights.
#[derive(Parser)]
#[command(name = "aqua")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the layout schema
    #[arg(short, long, global = true, env = "AQUA_SCHEMA", default_value = DEFAULT_SCHEMA_PATH)]
    schema: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Ground-truth side channel options.
#[derive(Args, Debug, Clone)]
pub struct GroundTruthArgs {
    /// Query ground truth from this many servers (hosts are numbered in
    /// reverse of server ids)
    #[arg(long = "gt-servers")]
    servers: Option<usize>,

    /// Address prefix of the server hosts
    #[arg(long = "gt-prefix", default_value = DEFAULT_HOST_PREFIX)]
    prefix: String,

    /// Ground-truth port on each server
    #[arg(long = "gt-port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Per-request timeout in milliseconds (waits forever when unset)
    #[arg(long = "gt-timeout-ms")]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to the region and process telemetry until interrupted
    Run {
        /// Region file (defaults to FILE_FMT formatted with VIP_ID)
        #[arg(short, long, env = "AQUA_REGION")]
        region: Option<PathBuf>,

        /// Poll period in milliseconds (defaults to SHM_UPT_DT)
        #[arg(long)]
        poll_ms: Option<u64>,

        /// Also compute the load balancer's own feature row
        #[arg(long)]
        lb_features: bool,

        /// Append every observation as a JSON line to this file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Print every observation as a JSON line on stdout
        #[arg(long)]
        echo: bool,

        #[command(flatten)]
        ground_truth: GroundTruthArgs,
    },

    /// Show the compiled layout, and region contents when attached
    Inspect {
        /// Region file to read (layout only when omitted)
        #[arg(short, long)]
        region: Option<PathBuf>,

        /// Servers whose reservoirs to dump
        #[arg(long, value_delimiter = ',')]
        servers: Vec<usize>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Publish one weight vector as the next control frame
    Publish {
        /// Comma-separated weights, one per server slot
        #[arg(value_delimiter = ',', required = true)]
        weights: Vec<f64>,

        /// Region file (defaults to FILE_FMT formatted with VIP_ID)
        #[arg(short, long, env = "AQUA_REGION")]
        region: Option<PathBuf>,
    },

    /// Render the C header the data plane compiles against
    Header {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Bare macros to define before the layout
        #[arg(long = "define", default_value = "LB_STATS")]
        defines: Vec<String>,
    },

    /// Check that every ground-truth endpoint accepts connections
    GtCheck {
        /// Number of servers to check
        #[arg(short = 'n', long)]
        servers: usize,

        /// Address prefix of the server hosts
        #[arg(long, default_value = DEFAULT_HOST_PREFIX)]
        prefix: String,

        /// Ground-truth port on each server
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Connect timeout in milliseconds
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,
    },
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let config = TracingConfig::from_env(verbosity_filter(verbosity));
    init_tracing(&config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Run {
            region,
            poll_ms,
            lb_features,
            record,
            echo,
            ground_truth,
        } => {
            let options = commands::run::RunOptions {
                schema: cli.schema,
                region,
                poll_ms,
                lb_features,
                record,
                echo,
                ground_truth,
            };
            commands::run::run(options).await
        }
        Commands::Inspect {
            region,
            servers,
            json,
        } => commands::inspect::run(&cli.schema, region.as_deref(), &servers, json).await,
        Commands::Publish { weights, region } => {
            commands::publish::run(&cli.schema, region.as_deref(), &weights).await
        }
        Commands::Header { output, defines } => {
            commands::header::run(&cli.schema, output.as_deref(), &defines).await
        }
        Commands::GtCheck {
            servers,
            prefix,
            port,
            timeout_ms,
        } => commands::gt_check::run(servers, &prefix, port, timeout_ms).await,
    }
}
