use anyhow::Result;
use clap::Parser;
use rolewarden::backend::postgres::lazy_pool;
use rolewarden::{
    notification_channel, Client, CommonErrorStrategy, Component, ErrorChannel, FnProcessor,
    NotificationListener, PgPubSub, PgRoleDetector, PollingWatcher, SupervisorConfig,
    WatchTarget, WorkerError,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "rolewarden")]
#[command(about = "Keeps a listener/processor pair running while the database is primary")]
#[command(version)]
#[command(long_about = "Supervises a notification listener and a job processor for a \
PostgreSQL server. Both run while the server is primary and are stopped while it is \
in recovery. Marker files in the data directory trigger an immediate role check.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "rolewarden.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the supervisor")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting rolewarden v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SupervisorConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let client = build_client(&config)?;
    let handle = client.start().await.map_err(|e| {
        error!("Failed to start supervisor: {}", e);
        e
    })?;

    handle.join().await.map_err(|e| {
        error!("Supervisor error during execution: {}", e);
        e
    })?;

    info!("rolewarden exited");
    Ok(())
}

/// Wire the Postgres listener and processor into a client.
fn build_client(config: &SupervisorConfig) -> Result<Client> {
    let pool = lazy_pool(&config.backend.url)?;
    let strategy = Arc::new(CommonErrorStrategy::with_transient_messages(
        config.component.transient_messages.clone(),
    ));
    let errors = ErrorChannel::default();
    let (notifier, inbox) = notification_channel(config.component.notification_depth);

    let listener = Component::new(
        "listener",
        NotificationListener::new(PgPubSub::new(pool.clone()), &config.backend.channel, notifier)
            .with_fire_on_start(config.component.fire_on_start),
        strategy.clone(),
        errors.clone(),
    )
    .with_backoff_ceiling(config.component.backoff_ceiling_secs);

    let statement: Option<Arc<str>> = config.processor.statement.as_deref().map(Arc::from);
    let processor_pool = pool.clone();
    let processor = Component::new(
        "processor",
        FnProcessor::new(inbox, move || {
            let pool = processor_pool.clone();
            let statement = statement.clone();
            async move { run_statement(&pool, statement.as_deref()).await }
        }),
        strategy,
        errors,
    )
    .with_backoff_ceiling(config.component.backoff_ceiling_secs);

    let mut client = Client::new(Arc::new(PgRoleDetector::new(pool)))
        .with_retry_ceiling(config.client.retry_ceiling_secs);

    if let Some(path) = &config.watch.path {
        client = client
            .with_watch(WatchTarget::new(path, config.watch.marker_files.iter().cloned()))
            .with_watcher(Box::new(PollingWatcher::new(config.poll_interval())));
    }

    client.add_listener(listener);
    client.add_processor(processor);
    Ok(client)
}

async fn run_statement(pool: &PgPool, statement: Option<&str>) -> Result<(), WorkerError> {
    match statement {
        Some(sql) => {
            let result = sqlx::query(sql).execute(pool).await?;
            debug!("Statement affected {} rows", result.rows_affected());
        }
        None => info!("Work notification received"),
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rolewarden={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# rolewarden configuration file");
    println!("# Environment variables override any key, e.g. ROLEWARDEN_BACKEND__URL");
    println!("# Set [watch] path to enable marker file monitoring");
    println!("# Set [processor] statement to run SQL on every wake-up");
    println!();
    println!("{}", toml::to_string_pretty(&SupervisorConfig::default())?);
    Ok(())
}
