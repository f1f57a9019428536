use std::path::Path;
use std::sync::Arc;

use dredge::cli::{Cli, Commands};
use dredge::config::{self, Config};
use dredge::dedup::Deduplicator;
use dredge::fetcher::{Fetch, HttpFetcher};
use dredge::frontier::Frontier;
use dredge::indexer::Indexer;
use dredge::metrics::Metrics;
use dredge::parser::Parser;
use dredge::pipeline::Pipeline;
use dredge::storage::Storage;
use dredge::{api, logging};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Crawl {
            config: config_path,
            seeds,
            data_dir,
        } => {
            let mut config = match config_path {
                Some(path) => config::load_config(Path::new(&path))?,
                None => Config::default(),
            };
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }

            logging::init_logging(Path::new(&config.storage.data_dir).join("logs"))?;
            tracing::info!(seeds = seeds.len(), "starting crawl service");

            run_crawl(config, seeds).await?;
        }
    }

    Ok(())
}

async fn run_crawl(config: Config, seeds: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Arc::new(Metrics::new());

    let storage = Arc::new(Storage::new(&config.storage.data_dir)?);
    let indexer = Arc::new(Indexer::new(
        &config.index,
        &config.memory,
        storage.index_dir(),
    ));
    let parser = Arc::new(Parser::new());
    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(&config.fetcher)?);

    let dedup = Arc::new(if config.redis.enabled {
        Deduplicator::connect(&config.redis, metrics.clone()).await
    } else {
        Deduplicator::local_only(metrics.clone())
    });

    let frontier = Arc::new(Frontier::new(
        &config.scheduler,
        config.rate_limit.clone(),
        metrics.clone(),
    ));

    let seeded = frontier.add_seed_urls(&seeds);
    tracing::info!(seeded, "frontier seeded");
    if seeded == 0 {
        return Err("no valid seed urls".into());
    }

    let pipeline = Arc::new(Pipeline::new(
        &config.scheduler,
        frontier,
        dedup,
        fetcher,
        parser,
        indexer.clone(),
        storage,
        metrics.clone(),
    ));

    // Control plane runs for the lifetime of the process
    let api_config = config.api.clone();
    let api_indexer = indexer.clone();
    let api_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_config, api_indexer, api_metrics).await {
            tracing::error!(error = %e, "api server exited");
        }
    });

    // Ctrl-C stops the frontier; workers drain and join
    let signal_pipeline = pipeline.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_pipeline.shutdown();
        }
    });

    pipeline.run().await;

    tracing::info!(
        documents = indexer.total_documents(),
        terms = indexer.total_terms(),
        "crawl complete; api still serving, press ctrl-c to exit"
    );

    // Keep the search API up after the crawl finishes
    let _ = tokio::signal::ctrl_c().await;
    Ok(())
}
