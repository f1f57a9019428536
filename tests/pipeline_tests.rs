//! End-to-end pipeline scenarios driven through stub fetch transports.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use dredge::config::{IndexConfig, MemoryConfig, RateLimitConfig, SchedulerConfig};
use dredge::dedup::Deduplicator;
use dredge::fetcher::{Fetch, FetchResult};
use dredge::frontier::Frontier;
use dredge::indexer::Indexer;
use dredge::metrics::{Metrics, SharedMetrics};
use dredge::parser::Parser;
use dredge::pipeline::{Pipeline, StepOutcome};
use dredge::storage::Storage;

fn ok_html(url: &str, body: &str) -> FetchResult {
    FetchResult::ok(
        url.to_string(),
        200,
        "text/html".to_string(),
        body.as_bytes().to_vec(),
        Vec::new(),
        Duration::from_millis(1),
    )
}

/// Serves a fixed set of pages; anything else is a 404.
struct MapFetcher {
    pages: HashMap<String, String>,
}

impl MapFetcher {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl Fetch for MapFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        match self.pages.get(url) {
            Some(body) => ok_html(url, body),
            None => FetchResult::http_failure(
                url.to_string(),
                404,
                String::new(),
                Vec::new(),
                Duration::from_millis(1),
            ),
        }
    }
}

/// Returns 503 a fixed number of times, then succeeds.
struct FlakyFetcher {
    remaining_failures: AtomicU32,
    calls: AtomicU32,
    body: String,
}

impl FlakyFetcher {
    fn new(failures: u32, body: &str) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl Fetch for FlakyFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            FetchResult::http_failure(
                url.to_string(),
                503,
                String::new(),
                Vec::new(),
                Duration::from_millis(1),
            )
        } else {
            ok_html(url, &self.body)
        }
    }
}

struct Harness {
    pipeline: Arc<Pipeline>,
    frontier: Arc<Frontier>,
    indexer: Arc<Indexer>,
    metrics: SharedMetrics,
    _dir: TempDir,
}

fn harness(
    fetcher: Arc<dyn Fetch>,
    scheduler: SchedulerConfig,
    rate_limit: RateLimitConfig,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let metrics: SharedMetrics = Arc::new(Metrics::new());
    let storage = Arc::new(Storage::new(dir.path()).unwrap());
    let indexer = Arc::new(Indexer::new(
        &IndexConfig::default(),
        &MemoryConfig::default(),
        storage.index_dir(),
    ));
    let frontier = Arc::new(Frontier::new(&scheduler, rate_limit, metrics.clone()));
    let dedup = Arc::new(Deduplicator::local_only(metrics.clone()));

    let pipeline = Arc::new(Pipeline::new(
        &scheduler,
        frontier.clone(),
        dedup,
        fetcher,
        Arc::new(Parser::new()),
        indexer.clone(),
        storage,
        metrics.clone(),
    ));

    Harness {
        pipeline,
        frontier,
        indexer,
        metrics,
        _dir: dir,
    }
}

fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig {
        worker_threads: 1,
        max_retries: 3,
        retry_backoff_ms: 10,
        ..SchedulerConfig::default()
    }
}

fn no_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        enabled: false,
        ..RateLimitConfig::default()
    }
}

/// Drive the pipeline until `indexed` documents have been admitted.
async fn drive_until_indexed(harness: &Harness, indexed: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut count = 0;
    while count < indexed {
        assert!(Instant::now() < deadline, "pipeline did not converge");
        match harness.pipeline.process_next().await {
            StepOutcome::Indexed(_) => count += 1,
            StepOutcome::Idle => tokio::time::sleep(Duration::from_millis(5)).await,
            StepOutcome::Closed => panic!("frontier closed early"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_single_page_is_indexed_and_searchable() {
    let fetcher = Arc::new(MapFetcher::new(&[(
        "https://a.test/",
        "<html><title>A</title>hello world</html>",
    )]));
    let harness = harness(fetcher, fast_scheduler(), no_rate_limit());

    assert_eq!(harness.frontier.add_seed_urls(&["https://a.test/".to_string()]), 1);
    assert!(matches!(
        harness.pipeline.process_next().await,
        StepOutcome::Indexed(_)
    ));

    assert_eq!(harness.indexer.total_documents(), 1);
    let results = harness.indexer.search("hello", 10);
    assert_eq!(results[0].url, "https://a.test/");
    assert_eq!(results[0].title, "A");
}

#[tokio::test]
async fn test_identical_content_deduplicated() {
    let body = "<html><title>Same</title>identical body</html>";
    let fetcher = Arc::new(MapFetcher::new(&[
        ("https://a.test/", body),
        ("https://b.test/", body),
    ]));
    let harness = harness(fetcher, fast_scheduler(), no_rate_limit());

    harness.frontier.add_seed_urls(&[
        "https://a.test/".to_string(),
        "https://b.test/".to_string(),
    ]);

    let first = harness.pipeline.process_next().await;
    let second = harness.pipeline.process_next().await;

    assert!(matches!(first, StepOutcome::Indexed(_)));
    assert_eq!(second, StepOutcome::DuplicateContent);
    assert_eq!(harness.indexer.total_documents(), 1);
    assert_eq!(harness.metrics.counter("content_duplicates"), 1);
}

#[tokio::test]
async fn test_discovered_links_are_crawled_to_completion() {
    let fetcher = Arc::new(MapFetcher::new(&[
        (
            "https://a.test/",
            r#"<html>root <a href="/x">x</a> <a href="/y">y</a></html>"#,
        ),
        ("https://a.test/x", "<html>page x</html>"),
        ("https://a.test/y", "<html>page y</html>"),
    ]));
    let harness = harness(fetcher, fast_scheduler(), no_rate_limit());

    harness.frontier.add_seed_urls(&["https://a.test/".to_string()]);
    drive_until_indexed(&harness, 3).await;

    assert_eq!(harness.frontier.queue_size(), 0);
    assert_eq!(harness.indexer.total_documents(), 3);
    assert_eq!(harness.indexer.search("page", 10).len(), 2);
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let fetcher = Arc::new(FlakyFetcher::new(3, "<html>finally up</html>"));
    let fetcher_handle = fetcher.clone();
    let harness = harness(fetcher, fast_scheduler(), no_rate_limit());

    harness.frontier.add_seed_urls(&["https://a.test/".to_string()]);
    drive_until_indexed(&harness, 1).await;

    // Three 503s consumed three retries; the fourth attempt landed
    assert_eq!(fetcher_handle.calls.load(Ordering::SeqCst), 4);
    assert_eq!(harness.metrics.counter("successful_fetches"), 1);
    assert_eq!(harness.metrics.counter("failed_fetches"), 0);
    assert_eq!(harness.indexer.total_documents(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_drops_task() {
    let fetcher = Arc::new(FlakyFetcher::new(u32::MAX, "<html>never</html>"));
    let scheduler = SchedulerConfig {
        max_retries: 2,
        ..fast_scheduler()
    };
    let harness = harness(fetcher, scheduler, no_rate_limit());

    harness.frontier.add_seed_urls(&["https://a.test/".to_string()]);

    let deadline = Instant::now() + Duration::from_secs(10);
    while harness.metrics.counter("failed_fetches") == 0 {
        assert!(Instant::now() < deadline, "task was never dropped");
        match harness.pipeline.process_next().await {
            StepOutcome::Idle => tokio::time::sleep(Duration::from_millis(5)).await,
            StepOutcome::Indexed(_) => panic!("fetch should never succeed"),
            _ => {}
        }
    }

    assert_eq!(harness.frontier.queue_size(), 0);
    assert_eq!(harness.indexer.total_documents(), 0);
    assert_eq!(harness.metrics.counter("failed_fetches"), 1);
}

#[tokio::test]
async fn test_politeness_spaces_out_same_host_fetches() {
    let fetcher = Arc::new(MapFetcher::new(&[
        ("https://h.test/a", "<html>first</html>"),
        ("https://h.test/b", "<html>second</html>"),
    ]));
    let mut rate_limit = RateLimitConfig::default();
    rate_limit.per_domain.insert("h.test".to_string(), 10.0); // 100 ms window
    let harness = harness(fetcher, fast_scheduler(), rate_limit);

    harness.frontier.add_seed_urls(&[
        "https://h.test/a".to_string(),
        "https://h.test/b".to_string(),
    ]);

    assert!(matches!(
        harness.pipeline.process_next().await,
        StepOutcome::Indexed(_)
    ));
    let first_done = Instant::now();

    // The second fetch must wait out the politeness window
    assert_eq!(harness.pipeline.process_next().await, StepOutcome::Idle);

    drive_until_indexed(&harness, 1).await;
    assert!(first_done.elapsed() >= Duration::from_millis(100));
    assert_eq!(harness.indexer.total_documents(), 2);
}

#[tokio::test]
async fn test_bm25_ranks_full_match_highest() {
    let fetcher = Arc::new(MapFetcher::new(&[
        ("https://a.test/", "<html>cat dog</html>"),
        ("https://b.test/", "<html>cat</html>"),
        ("https://c.test/", "<html>dog dog</html>"),
    ]));
    let harness = harness(fetcher, fast_scheduler(), no_rate_limit());

    harness.frontier.add_seed_urls(&[
        "https://a.test/".to_string(),
        "https://b.test/".to_string(),
        "https://c.test/".to_string(),
    ]);
    drive_until_indexed(&harness, 3).await;

    let results = harness.indexer.search("cat dog", 10);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].url, "https://a.test/");
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn test_seen_url_skipped_before_fetch() {
    let fetcher = Arc::new(MapFetcher::new(&[(
        "https://a.test/",
        "<html>content</html>",
    )]));
    let harness = harness(fetcher, fast_scheduler(), no_rate_limit());

    harness.frontier.add_seed_urls(&["https://a.test/".to_string()]);
    assert!(matches!(
        harness.pipeline.process_next().await,
        StepOutcome::Indexed(_)
    ));

    // Re-admit the same URL: the dedup check short-circuits the fetch
    assert!(harness.frontier.add_url("https://a.test/", 0));
    assert_eq!(
        harness.pipeline.process_next().await,
        StepOutcome::DuplicateUrl
    );
    assert_eq!(harness.metrics.counter("url_duplicates"), 1);
    assert_eq!(harness.indexer.total_documents(), 1);
}

#[tokio::test]
async fn test_worker_run_drains_and_closes() {
    let fetcher = Arc::new(MapFetcher::new(&[
        (
            "https://a.test/",
            r#"<html><a href="/next">next</a></html>"#,
        ),
        ("https://a.test/next", "<html>leaf</html>"),
    ]));
    let scheduler = SchedulerConfig {
        worker_threads: 2,
        ..fast_scheduler()
    };
    let harness = harness(fetcher, scheduler, no_rate_limit());

    harness.frontier.add_seed_urls(&["https://a.test/".to_string()]);

    // run() stops on its own once the frontier drains
    tokio::time::timeout(Duration::from_secs(10), harness.pipeline.run())
        .await
        .expect("run did not stop after drain");

    assert_eq!(harness.indexer.total_documents(), 2);
    assert_eq!(harness.frontier.queue_size(), 0);
    assert!(!harness.frontier.is_running());
}
