use mcall::batch::orchestrator;
use mcall::cluster;
use mcall::cluster::kube::KubeStore;
use mcall::config::{Config, Context};
use mcall::notify::LogNotifier;
use mcall::pipeline::types::{Batch, WorkKind};
use mcall::server;
use mcall::server::params;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

/// mcall - run commands and HTTP probes concurrently, validate the results
#[derive(Parser, Debug)]
#[command(name = "mcall")]
#[command(version, about, long_about = None)]
struct Args {
    /// Input: command or URL; comma-separated for multiple
    #[arg(short = 'i', long = "input", default_value = "")]
    input: String,

    /// Request type for URL inputs: cmd, get, or post
    #[arg(short = 't', long = "type", default_value = "cmd")]
    kind: String,

    /// Name label applied to every item
    #[arg(short = 'n', long = "name", default_value = "")]
    name: String,

    /// YAML configuration file path
    #[arg(short = 'c', long = "config", default_value = "")]
    config: String,

    /// Run the HTTP server instead of a one-shot batch
    #[arg(short = 'w', long = "web")]
    web: bool,

    /// HTTP server port
    #[arg(short = 'p', long = "port", default_value = "")]
    port: String,

    /// Output format: json or plain
    #[arg(short = 'f', long = "format", default_value = "")]
    format: String,

    /// Base64-encode result content: std or url
    #[arg(short = 'e', long = "encoding", default_value = "")]
    encoding: String,

    /// Worker pool size
    #[arg(long = "worker", default_value_t = 0)]
    worker: usize,

    /// Log level: error, warn, info, debug, trace
    #[arg(short = 'l', long = "log-level", default_value = "")]
    log_level: String,

    /// Print a bcrypt hash for a password (auth-file entries)
    #[arg(long = "encrypt")]
    encrypt: Option<String>,

    /// Verify a "bcrypt-hash,password" pair
    #[arg(long = "verify-hash")]
    verify_hash: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.is_empty() {
        let mut config = Config::default();
        config.apply_defaults();
        config
    } else {
        Config::load(&args.config)?
    };

    // command line flags win over the file
    if args.web {
        config.webserver.enable = true;
    }
    if !args.port.is_empty() {
        config.webserver.port = args.port.clone();
    }
    if !args.format.is_empty() {
        config.response.format = args.format.clone();
    }
    if !args.encoding.is_empty() {
        config.response.encoding.kind = args.encoding.clone();
    }
    if args.worker > 0 {
        config.worker.number = args.worker;
    }
    if !args.log_level.is_empty() {
        config.log.level = args.log_level.clone();
    }

    init_tracing(&config.log.level);

    if let Some(password) = &args.encrypt {
        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
        println!("{}: {}", password, hash);
        return Ok(());
    }
    if let Some(pair) = &args.verify_hash {
        let (hash, password) = pair
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("expected hash,password"))?;
        println!("{} ~ {} => {}", hash, password, bcrypt::verify(password, hash)?);
        return Ok(());
    }

    let ctx = Context::new(&config, Arc::new(LogNotifier))?;

    tracing::debug!("workers: {}", ctx.worker_num);
    tracing::debug!("webserver enabled: {}", config.webserver.enable);

    let leader_election = std::env::var("LEADER_ELECTION")
        .map(|v| v == "true")
        .unwrap_or(false);

    if config.webserver.enable {
        return server::serve(ctx, &config).await;
    }

    if leader_election {
        match KubeStore::from_cluster() {
            Ok(store) => return cluster::run_distributed(ctx, &config, store).await,
            Err(e) => {
                tracing::error!("coordination store unavailable: {}", e);
                tracing::info!("falling back to one-shot mode");
            }
        }
    }

    run_console(&args, &config, &ctx).await
}

/// One-shot mode: build the batch from `-i` (or the configured descriptor)
/// and print the rendered response.
async fn run_console(args: &Args, config: &Config, ctx: &Arc<Context>) -> Result<()> {
    let default_name = if !args.name.is_empty() {
        args.name.clone()
    } else if !config.request.name.is_empty() {
        config.request.name.clone()
    } else {
        config.request.subject.clone()
    };

    let items = if !args.input.is_empty() {
        params::parse_console_inputs(&args.input, &args.kind, &default_name)
    } else if !config.request.input.is_empty() {
        params::parse_descriptor(
            &config.request.input,
            WorkKind::from_flag(&config.request.kind),
            &default_name,
        )?
    } else {
        Vec::new()
    };

    if items.is_empty() {
        tracing::warn!("no inputs given, nothing to do");
        return Ok(());
    }

    let body = orchestrator::respond(ctx, Batch::new(items)).await?;
    println!("{}", body);
    Ok(())
}

fn init_tracing(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}
