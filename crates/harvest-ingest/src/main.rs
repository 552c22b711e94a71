//! Harvest - user action harvester

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use harvest_common::cipher::TokenCipher;
use harvest_common::logging::{init_logging, LogConfig, LogLevel};
use harvest_common::Watermark;
use harvest_ingest::{
    cache::{CacheStore, MemoryCacheStore, RedisCacheStore},
    checkpoint::{Checkpoint, S3CheckpointStore},
    config::{
        CacheConfig, CheckpointConfig, ControllerConfig, EngageConfig, DEFAULT_BATCH_SIZE,
        DEFAULT_DISPATCH_BATCH_SIZE, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_INTERVAL_MINUTES,
        DEFAULT_REGION, DEFAULT_WAIT_SECS, DEFAULT_WORKERS,
    },
    controller::{BatchHandler, HarvestController, RunSummary},
    dispatch::{CookieFactory, DispatchTarget, EventDispatcher},
    episode_cache::MetadataCache,
    pipeline::EnrichPipeline,
    publish::{Publisher, SqsQueueSink},
    upstream::EngageClient,
    IngestError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit status of a run stopped by SIGINT/SIGTERM
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(author, version, about = "Harvest user actions from the engage API")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest, enrich and publish user actions
    Useractions(UserActionsArgs),

    /// Send each user action as an HTTP event to a stream endpoint
    Dispatch(DispatchArgs),

    /// Encrypt or decrypt acid cookie tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Args, Debug)]
struct EngageArgs {
    /// Engage hostname
    #[arg(short = 'H', long, env = "MATTERHORN_ENGAGE_HOST")]
    engage_host: String,

    /// Admin hostname for workflow lookups
    #[arg(long, env = "MATTERHORN_ADMIN_HOST")]
    admin_host: Option<String>,

    /// REST user
    #[arg(short, long, env = "MATTERHORN_REST_USER")]
    user: String,

    /// REST password
    #[arg(short, long, env = "MATTERHORN_REST_PASS", hide_env_values = true)]
    password: String,

    /// Upstream request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    timeout: u64,
}

impl EngageArgs {
    fn config(&self) -> EngageConfig {
        let mut config = EngageConfig::new(&self.engage_host, &self.user, &self.password)
            .with_admin_host(self.admin_host.as_deref());
        config.timeout_secs = self.timeout;
        config
    }
}

#[derive(Args, Debug)]
struct WindowArgs {
    /// Window start, YYYYMMDDHHmmss
    #[arg(short, long)]
    start: Option<Watermark>,

    /// Window end, YYYYMMDDHHmmss; default=now
    #[arg(short, long)]
    end: Option<Watermark>,

    /// Seconds to wait between batch requests
    #[arg(short, long, default_value_t = DEFAULT_WAIT_SECS)]
    wait: u64,

    /// Harvest actions from this many minutes ago
    #[arg(short, long, env = "DEFAULT_INTERVAL", default_value_t = DEFAULT_INTERVAL_MINUTES)]
    interval: i64,
}

#[derive(Args, Debug)]
struct UserActionsArgs {
    #[command(flatten)]
    engage: EngageArgs,

    #[command(flatten)]
    window: WindowArgs,

    /// Where to send output; use "-" for JSON lines on stdout
    #[arg(short, long, default_value = "sqs")]
    output: String,

    /// SQS queue name
    #[arg(short, long, env = "SQS_QUEUE_NAME")]
    queue_name: Option<String>,

    /// Number of actions per request
    #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u32,

    /// Largest allowed start-end span in seconds
    #[arg(long, env = "MAX_START_END_SPAN")]
    max_start_end_span: Option<i64>,

    /// Don't abort on too-long start-end time spans
    #[arg(long)]
    disable_start_end_span_check: bool,

    /// Persist the watermark after every batch
    #[arg(long)]
    checkpoint_every_batch: bool,
}

#[derive(Args, Debug)]
struct DispatchArgs {
    #[command(flatten)]
    engage: EngageArgs,

    #[command(flatten)]
    window: WindowArgs,

    /// Endpoint to send events to; events are printed when unset
    #[arg(long)]
    stream_endpoint: Option<String>,

    /// Number of events per request
    #[arg(short, long, default_value_t = DEFAULT_DISPATCH_BATCH_SIZE)]
    batch_size: u32,

    /// Concurrent event requests
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Acid cookie secret (key followed by IV)
    #[arg(long, env = "ACID_COOKIE_KEY", hide_env_values = true)]
    acid_cookie_key: String,
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Encrypt key=value pairs into a token
    Encrypt {
        /// Pair in key=value form; repeat for more pairs
        #[arg(long = "pair", value_parser = parse_pair, required = true)]
        pairs: Vec<(String, String)>,

        #[arg(long, env = "ACID_COOKIE_KEY", hide_env_values = true)]
        key: String,
    },

    /// Decrypt a token into key=value pairs
    Decrypt {
        token: String,

        #[arg(long, env = "ACID_COOKIE_KEY", hide_env_values = true)]
        key: String,
    },
}

fn parse_pair(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("harvest")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let result = match cli.command {
        Command::Useractions(args) => useractions(args, cancel).await.map(|_| ()),
        Command::Dispatch(args) => dispatch(args, cancel).await.map(|_| ()),
        Command::Token { action } => token(action),
    };

    if let Err(e) = &result {
        if matches!(e.downcast_ref::<IngestError>(), Some(IngestError::Cancelled)) {
            warn!("Run cancelled");
            std::process::exit(EXIT_CANCELLED);
        }
        error!(error = %e, "Harvest failed");
    }

    result
}

fn controller_config(window: &WindowArgs, batch_size: u32) -> ControllerConfig {
    ControllerConfig {
        batch_size,
        wait: Duration::from_secs(window.wait),
        default_interval: chrono::Duration::minutes(window.interval),
        ..Default::default()
    }
}

async fn run_controller<H: BatchHandler>(
    controller: HarvestController,
    window: &WindowArgs,
    handler: &mut H,
) -> Result<RunSummary> {
    controller.config().validate()?;
    let window = controller.resolve_window(window.start, window.end).await?;
    Ok(controller.run(window, handler).await?)
}

async fn useractions(args: UserActionsArgs, cancel: CancellationToken) -> Result<RunSummary> {
    let client = Arc::new(EngageClient::new(args.engage.config())?);

    let publisher = if args.output == "-" {
        Publisher::stdout()
    } else if args.output == "sqs" {
        let name = args
            .queue_name
            .as_deref()
            .context("--queue-name (SQS_QUEUE_NAME) is required for sqs output")?;
        let sink = Arc::new(SqsQueueSink::connect(DEFAULT_REGION).await);
        Publisher::queue(sink, name).await?
    } else {
        bail!("Unknown output '{}'; use 'sqs' or '-'", args.output);
    };

    let cache_config = CacheConfig::from_env();
    let store: Arc<dyn CacheStore> = match &cache_config.redis_url {
        Some(url) => Arc::new(RedisCacheStore::connect(url, cache_config.key_prefix.clone()).await?),
        None => {
            info!("REDIS_URL not set; using in-process episode cache");
            Arc::new(MemoryCacheStore::new())
        }
    };
    let episodes = MetadataCache::new(store, client.clone(), cache_config.ttl());
    let mut pipeline = EnrichPipeline::new(episodes, publisher);

    let mut config = controller_config(&args.window, args.batch_size);
    config.max_window_span = args.max_start_end_span.map(chrono::Duration::seconds);
    config.disable_span_check = args.disable_start_end_span_check;
    config.checkpoint_every_batch = args.checkpoint_every_batch;

    let mut controller = HarvestController::new(client, config).with_cancellation(cancel);
    match CheckpointConfig::from_env() {
        Some(checkpoint_config) => {
            let store = S3CheckpointStore::connect(&checkpoint_config).await?;
            controller =
                controller.with_checkpoint(Checkpoint::new(Arc::new(store), checkpoint_config.key));
        }
        None => warn!("S3_HARVEST_TS_BUCKET not set; running without a checkpoint"),
    }

    run_controller(controller, &args.window, &mut pipeline).await
}

async fn dispatch(args: DispatchArgs, cancel: CancellationToken) -> Result<RunSummary> {
    let engage = args.engage.config();
    let timeout = engage.timeout();
    let client = Arc::new(EngageClient::new(engage)?);

    let target = match args.stream_endpoint {
        Some(endpoint) => DispatchTarget::Endpoint(endpoint),
        None => DispatchTarget::Stream(Publisher::stdout()),
    };
    let cookies = CookieFactory::new(&args.acid_cookie_key)?;
    let mut dispatcher = EventDispatcher::new(cookies, target, args.workers, timeout)?;

    let controller =
        HarvestController::new(client, controller_config(&args.window, args.batch_size))
            .with_cancellation(cancel);

    run_controller(controller, &args.window, &mut dispatcher).await
}

fn token(action: TokenAction) -> Result<()> {
    match action {
        TokenAction::Encrypt { pairs, key } => {
            let cipher = TokenCipher::new(&key)?;
            println!("{}", cipher.encrypt(&pairs)?);
        }
        TokenAction::Decrypt { token, key } => {
            let cipher = TokenCipher::new(&key)?;
            for (k, v) in cipher.decrypt(&token)? {
                println!("{}={}", k, v);
            }
        }
    }
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling run");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling run");
        },
    }

    cancel.cancel();
}
