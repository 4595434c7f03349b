mod config;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use harvest_engine::{DirectoryStore, Harvester, HttpAdapterFactory, SourceSet};
use harvest_logging::{harvest_error, harvest_info, harvest_warn};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};

fn main() -> Result<()> {
    let path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AppConfig::load(&path)?;
    harvest_logging::initialize(config.log_target.into(), config.level()?);
    harvest_info!("loaded configuration from {}", path.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    let store = DirectoryStore::open(&config.store_dir)
        .with_context(|| format!("opening store at {}", config.store_dir.display()))?;

    let mut sources = SourceSet::new(Arc::new(HttpAdapterFactory::new(config.primary.clone())));
    if let Some(secondary) = &config.secondary {
        sources = sources.with_secondary(Arc::new(HttpAdapterFactory::new(secondary.clone())));
    }

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    harvest_warn!("interrupt received; finishing in-flight items");
                    cancel.cancel();
                }
                Err(err) => harvest_error!("could not listen for Ctrl+C: {}", err),
            }
        })
    };

    let result = Harvester::new(config.harvest, sources, Box::new(store))
        .run(cancel)
        .await;
    interrupt.abort();

    let summary = result.context("harvest failed")?;
    println!("{}", summary.format());
    Ok(())
}
