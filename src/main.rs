use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;

use ordsync::{
    Engine, EngineConfig,
    client::HttpIndexerClient,
    queue::{KvSyncQueue, QUEUE_STORE_PREFIX, SqlSyncQueue, SyncQueue},
    sync::SyncConfig,
    wallet::MemoryWalletStore,
};

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a sync epoch against the configured indexer
    Sync(SyncArgs),
    /// Print per-status queue counts
    Stats(StatsArgs),
    /// Drop all queue rows and state
    Clear(ClearArgs),
}

#[derive(Debug, clap::Args)]
pub struct SyncArgs {}

#[derive(Debug, clap::Args)]
pub struct StatsArgs {}

#[derive(Debug, clap::Args)]
pub struct ClearArgs {}

#[derive(Debug, Parser)]
#[clap(name = "ordsync")]
#[clap(bin_name = "ordsync")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    config: Option<std::path::PathBuf>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub indexer_url: String,
    pub account: Option<String>,
    pub db_path: Option<String>,
    pub owners: Vec<String>,
    pub queue_backend: Option<QueueBackend>,
    pub sync: Option<SyncConfig>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Kv,
    Sql,
}

impl Config {
    pub fn new(config_path: &Option<std::path::PathBuf>) -> Result<Self, config::ConfigError> {
        let mut s = config::Config::builder();

        s = s.add_source(config::File::with_name("ordsync.toml").required(false));

        if let Some(explicit) = config_path.as_ref().and_then(|x| x.to_str()) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        s = s.add_source(config::Environment::with_prefix("ORDSYNC").separator("_"));

        s.build()?.try_deserialize()
    }
}

fn open_queue(config: &Config) -> Result<Arc<dyn SyncQueue>, ordsync::Error> {
    let db_path = config.db_path.clone().unwrap_or_else(|| "./tmp/ordsync".into());
    let account = config.account.clone().unwrap_or_else(|| "default".into());

    let db_path = std::path::PathBuf::from(db_path);
    std::fs::create_dir_all(&db_path).map_err(|e| ordsync::Error::config(e))?;

    let store_path = db_path.join(format!("{QUEUE_STORE_PREFIX}{account}"));

    info!("using queue store: '{}'", store_path.display());

    let queue: Arc<dyn SyncQueue> = match config.queue_backend.unwrap_or(QueueBackend::Kv) {
        QueueBackend::Kv => Arc::new(KvSyncQueue::open(&store_path)?),
        QueueBackend::Sql => Arc::new(SqlSyncQueue::open(&store_path.with_extension("db"))?),
    };

    Ok(queue)
}

#[tokio::main]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt::init();

    let args = Cli::parse();

    let config = Config::new(&args.config).unwrap();

    match args.command {
        Command::Sync(_) => {
            let queue = open_queue(&config).unwrap();

            let api = Arc::new(HttpIndexerClient::new(config.indexer_url.clone()).unwrap());

            let engine = Engine::new(EngineConfig {
                api,
                store: Arc::new(MemoryWalletStore::new()),
                queue: Some(queue),
                owners: config.owners.clone(),
                sync: config.sync.unwrap_or_default(),
            });

            engine.on_event(|event| info!("sync event: {event:?}"));

            info!("running ordsync in sync mode with config: {:?}", config);

            engine.sync().await.unwrap();
            engine.close().await.unwrap();
        }
        Command::Stats(_) => {
            let queue = open_queue(&config).unwrap();

            let stats = queue.stats().unwrap();

            info!(
                pending = stats.pending,
                processing = stats.processing,
                done = stats.done,
                failed = stats.failed,
                "queue stats"
            );
        }
        Command::Clear(_) => {
            let queue = open_queue(&config).unwrap();

            queue.clear().unwrap();

            info!("queue cleared; next sync restarts from score 0");
        }
    }

    Ok(())
}
