use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use etherscan_client::EtherscanClient;
use ingest_common::{AdapterKind, AppConfig, FileConfig, Network, Platform, WorkParam};
use ingest_engine::adapters::{EtherscanAdapter, EtherscanHeightSource, TokenMeta};
use ingest_engine::{Dispatcher, HeightResolver, PollingLoop, RecrawlQueue, RecrawlWorker, TtlCache};
use ingest_store::{PgCursorStore, PgRecordStore, PgVisitStore};

#[derive(Parser)]
#[command(name = "ingest-server", about = "Incremental activity crawler")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/ingest.toml")]
    config: PathBuf,

    /// Don't run database migrations on startup
    #[arg(long)]
    skip_migrations: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the polling loops and the recrawl worker until Ctrl-C (default)
    Run,
    /// Fetch one identity now and remember it for recrawling
    Lookup {
        identity: String,
        #[arg(long, default_value = "ethereum")]
        network: Network,
        #[arg(long)]
        platform: Option<Platform>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    tracing::info!(config = %cli.config.display(), "Loading config");
    let file_config = ingest_common::file_config::load_config(&cli.config)?;
    let config = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(file_config.database.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!(
        max_connections = file_config.database.max_connections,
        "Connected to database"
    );

    if cli.skip_migrations {
        tracing::info!("Skipping migrations");
    } else {
        ingest_store::migrate(&pool)
            .await
            .context("Failed to run migrations")?;
        tracing::info!("Migrations complete");
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let clients = explorer_clients(&file_config, &config, &http)?;

    let queue = Arc::new(RecrawlQueue::new(
        Arc::new(PgVisitStore::new(pool.clone())),
        file_config.recrawl.page_size,
        file_config.recrawl.retention(),
    ));

    let tokens: Arc<TtlCache<String, TokenMeta>> =
        Arc::new(TtlCache::new(Duration::from_secs(6 * 60 * 60)));
    let mut dispatcher = Dispatcher::new(Arc::new(PgRecordStore::new(pool.clone())))
        .with_recrawl_queue(queue.clone());
    for (network, client) in &clients {
        dispatcher = dispatcher.register(
            *network,
            None,
            Arc::new(EtherscanAdapter::with_token_cache(
                client.clone(),
                *network,
                tokens.clone(),
            )),
        );
    }
    let dispatcher = Arc::new(dispatcher);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(file_config, clients, dispatcher, queue, pool).await,
        Command::Lookup {
            identity,
            network,
            platform,
            limit,
        } => {
            let mut param = WorkParam::new(&identity, network);
            if let Some(platform) = platform {
                param = param.with_platform(platform);
            }
            if let Some(limit) = limit {
                param = param.with_limit(limit);
            }

            let dispatched = dispatcher.lookup(&param).await?;
            tracing::info!(
                identity = %param.identity,
                %network,
                records = dispatched.records.len(),
                skipped = dispatched.skipped,
                "Lookup complete"
            );
            Ok(())
        }
    }
}

/// One explorer client per network used by an enabled source. The first
/// source on a network decides its explorer URL.
fn explorer_clients(
    file_config: &FileConfig,
    config: &AppConfig,
    http: &reqwest::Client,
) -> Result<HashMap<Network, Arc<EtherscanClient>>> {
    let mut clients = HashMap::new();

    for source in file_config.enabled_sources() {
        match source.adapter {
            AdapterKind::Etherscan => {
                let api_key = config.etherscan_api_key.as_deref().with_context(|| {
                    format!(
                        "ETHERSCAN_API_KEY is required by source '{}' ({})",
                        source.key, source.network
                    )
                })?;
                clients.entry(source.network).or_insert_with(|| {
                    Arc::new(EtherscanClient::with_client(
                        http.clone(),
                        &source.explorer_url,
                        api_key,
                    ))
                });
            }
        }
    }

    Ok(clients)
}

async fn run(
    file_config: FileConfig,
    clients: HashMap<Network, Arc<EtherscanClient>>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<RecrawlQueue>,
    pool: sqlx::PgPool,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cursors = Arc::new(PgCursorStore::new(pool.clone()));
    let mut handles = Vec::new();

    for source in file_config.enabled_sources() {
        let client = clients
            .get(&source.network)
            .with_context(|| format!("No explorer client for {}", source.network))?;
        let resolver = HeightResolver::new(
            source.network,
            source.confirmations,
            Arc::new(EtherscanHeightSource::new(client.clone())),
        );
        let polling = PollingLoop::new(source.clone(), resolver, dispatcher.clone(), cursors.clone());
        handles.push(tokio::spawn(polling.run(shutdown_rx.clone())));
    }

    let worker = RecrawlWorker::new(queue, dispatcher, file_config.recrawl.interval());
    handles.push(tokio::spawn(worker.run(shutdown_rx)));

    tracing::info!(
        loops = handles.len() - 1,
        recrawl_interval_secs = file_config.recrawl.interval_secs,
        "Crawler running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested, waiting for in-flight cycles");
    shutdown_tx.send(true).ok();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Task ended abnormally");
        }
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
