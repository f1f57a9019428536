use clap::{Parser, Subcommand};

/// Web crawler with a built-in BM25 search index
#[derive(Parser)]
#[command(name = "dredge")]
#[command(about = "Crawl the web into a searchable inverted index")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl from seed URLs and serve the search API
    Crawl {
        /// Path to a TOML configuration file
        #[arg(short, long, help = "Configuration file; defaults apply when omitted")]
        config: Option<String>,

        /// Seed URLs to start crawling from
        #[arg(short, long = "seed", required = true, help = "Seed URL (repeatable)")]
        seeds: Vec<String>,

        /// Override the configured data directory
        #[arg(short, long, help = "Directory for documents, checkpoints and segments")]
        data_dir: Option<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
