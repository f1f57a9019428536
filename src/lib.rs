pub mod api;
pub mod backoff;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod fetcher;
pub mod frontier;
pub mod indexer;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod storage;
pub mod url_utils;

// Re-export main types for library usage
pub use config::{Config, ConfigError};
pub use dedup::Deduplicator;
pub use fetcher::{Fetch, FetchErrorKind, FetchResult, HttpFetcher};
pub use frontier::{CrawlTask, Frontier, FrontierStats, TaskPoll};
pub use indexer::{Indexer, SearchResult};
pub use metrics::{Metrics, SharedMetrics};
pub use parser::{ParsedDocument, Parser};
pub use pipeline::{Pipeline, StepOutcome};
pub use storage::Storage;
