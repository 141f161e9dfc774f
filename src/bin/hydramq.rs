use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use dotenv::dotenv;
use hydramq::{
    setup_tracing, AppResult, ConsumedMessage, ConsumerEngine, ConsumerConfig, MessageSink,
    RocksOffsetStore, StaticDirectory, TcpConnector,
};
use tokio::{runtime, signal};
use tracing::info;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// directory for log files
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
}

/// Prints each consumed message; stands in for a real downstream writer.
struct StdoutSink;

#[async_trait]
impl MessageSink for StdoutSink {
    async fn process(&self, message: ConsumedMessage) -> AppResult<()> {
        info!(
            "{} [{} broker offset(s)] {}",
            message.topic_partition,
            message.offsets.len(),
            String::from_utf8_lossy(&message.payload)
        );
        Ok(())
    }
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let _log_guard = setup_tracing(&commandline.log_dir);

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = ConsumerConfig::from_file(config_path)?;

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run(config))
}

async fn run(config: ConsumerConfig) -> AppResult<()> {
    let directory = Arc::new(StaticDirectory::from_routes(&config.directory.routes)?);
    let connector = Arc::new(TcpConnector::new(config.connection.clone()));

    let mut engine = ConsumerEngine::new(config.clone(), directory, connector, Arc::new(StdoutSink));
    if !config.offset.store_path.is_empty() {
        let store = RocksOffsetStore::open(&config.offset.store_path)?;
        engine = engine.with_offset_store(Arc::new(store));
    }

    let handle = engine.start().await?;
    info!("hydramq consumer started");

    signal::ctrl_c().await?;
    info!("got shutdown signal");
    handle.shutdown().await?;
    Ok(())
}
