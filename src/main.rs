use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use inference_gateway::{
    config::{RouterConfig, WorkerConfig},
    observability::{init_logging, LoggingConfig},
    server,
};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "inference-gateway")]
#[command(about = "Distributed inference gateway - consistent-hash routing with dynamic batching")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the router in front of a set of workers
    Router(RouterArgs),
    /// Launch a worker node
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct RouterArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Worker endpoints, e.g. http://10.0.0.5:8001
    #[arg(long = "worker-urls", num_args = 0..)]
    worker_urls: Vec<String>,

    /// Consecutive failures before a worker's circuit opens
    #[arg(long, default_value_t = 5)]
    failure_threshold: u32,

    /// Half-open successes before a worker's circuit closes
    #[arg(long, default_value_t = 2)]
    success_threshold: u32,

    /// Circuit breaker cool-down in seconds
    #[arg(long, default_value_t = 30)]
    cooldown_secs: u64,

    /// Virtual nodes per worker on the hash ring
    #[arg(long, default_value_t = 150)]
    virtual_nodes: usize,

    #[arg(long, default_value_t = 5)]
    connect_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    read_timeout_secs: u64,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8001)]
    port: u16,

    /// Stable identity of this node, reported in every response
    #[arg(long)]
    node_id: String,

    /// Model weight file; falls back to the MODEL_PATH environment variable
    #[arg(long, env = "MODEL_PATH")]
    model_path: PathBuf,

    #[arg(long, default_value_t = 1000)]
    cache_capacity: usize,

    #[arg(long, default_value_t = 32)]
    max_batch_size: usize,

    /// How long a partial batch waits for more requests, in milliseconds
    #[arg(long, default_value_t = 20)]
    batch_timeout_ms: u64,
}

impl From<RouterArgs> for RouterConfig {
    fn from(args: RouterArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            worker_urls: args.worker_urls,
            failure_threshold: args.failure_threshold,
            success_threshold: args.success_threshold,
            cooldown: Duration::from_secs(args.cooldown_secs),
            virtual_nodes: args.virtual_nodes,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            read_timeout: Duration::from_secs(args.read_timeout_secs),
        }
    }
}

impl From<WorkerArgs> for WorkerConfig {
    fn from(args: WorkerArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            node_id: args.node_id,
            model_path: args.model_path,
            cache_capacity: args.cache_capacity,
            max_batch_size: args.max_batch_size,
            batch_timeout: Duration::from_millis(args.batch_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig {
        level: cli.log_level,
        json_format: cli.log_json,
        colorize: !cli.log_json,
    });

    match cli.command {
        Commands::Router(args) => server::run_router(args.into()).await,
        Commands::Worker(args) => server::run_worker(args.into()).await,
    }
}
