//! Crawl orchestration: the glue loop between frontier, dedup, fetcher,
//! parser, indexer and storage.
//!
//! The step order in `process_next` is a contract. URL dedup runs before the
//! fetch to save bandwidth; content dedup runs after it to catch aliased
//! URLs; dedup marking happens only after indexing so a crash between fetch
//! and index never falsely marks a URL as processed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::dedup::Deduplicator;
use crate::fetcher::Fetch;
use crate::frontier::{Frontier, TaskPoll};
use crate::indexer::Indexer;
use crate::metrics::SharedMetrics;
use crate::parser::Parser;
use crate::storage::Storage;
use crate::url_utils;

/// How long an idle worker waits before polling the frontier again.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// What one pipeline iteration did.
#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// A document was fetched, parsed and indexed under this id
    Indexed(u64),
    DuplicateUrl,
    DuplicateContent,
    FetchFailed,
    /// No task was ready; callers should back off briefly
    Idle,
    /// The frontier is stopped and drained
    Closed,
}

pub struct Pipeline {
    frontier: Arc<Frontier>,
    dedup: Arc<Deduplicator>,
    fetcher: Arc<dyn Fetch>,
    parser: Arc<Parser>,
    indexer: Arc<Indexer>,
    storage: Arc<Storage>,
    metrics: SharedMetrics,
    max_retries: u32,
    worker_count: usize,
    in_flight: AtomicUsize,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: &SchedulerConfig,
        frontier: Arc<Frontier>,
        dedup: Arc<Deduplicator>,
        fetcher: Arc<dyn Fetch>,
        parser: Arc<Parser>,
        indexer: Arc<Indexer>,
        storage: Arc<Storage>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            frontier,
            dedup,
            fetcher,
            parser,
            indexer,
            storage,
            metrics,
            max_retries: scheduler.max_retries,
            worker_count: scheduler.worker_threads,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Run one pipeline iteration against the next ready task.
    pub async fn process_next(&self) -> StepOutcome {
        let task = match self.frontier.next_task() {
            TaskPoll::Ready(task) => task,
            TaskPoll::Pending => return StepOutcome::Idle,
            TaskPoll::Closed => return StepOutcome::Closed,
        };

        self.metrics.increment_counter("crawl_attempts");

        if self.dedup.is_url_seen(&task.url).await {
            self.frontier.mark_completed(&task.url);
            return StepOutcome::DuplicateUrl;
        }

        let result = self.fetcher.fetch(&task.url).await;

        // The host was contacted either way: open its politeness window
        if let Some(host) = url_utils::extract_host(&task.url) {
            self.frontier.record_fetch(&host);
        }
        self.metrics
            .record_histogram("fetch_latency_ms", result.latency.as_secs_f64() * 1000.0);

        if !result.success {
            let will_retry = result.is_transient() && task.retry_count < self.max_retries;
            tracing::warn!(
                url = %task.url,
                status = result.http_status,
                error = result.error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
                will_retry,
                "fetch failed"
            );
            self.frontier.mark_failed(&task, will_retry);
            return StepOutcome::FetchFailed;
        }

        self.metrics.increment_counter("successful_fetches");

        if self.dedup.is_content_seen(result.content_digest).await {
            self.frontier.mark_completed(&task.url);
            return StepOutcome::DuplicateContent;
        }

        let doc = self.parser.parse(&task.url, &result.body);

        let mut metadata = HashMap::new();
        if !result.content_type.is_empty() {
            metadata.insert("content_type".to_string(), result.content_type.clone());
        }

        let doc_id = self.indexer.index_document(&doc, metadata.clone());

        if let Err(e) = self
            .storage
            .save_document(doc_id, &task.url, &result.body, &metadata)
        {
            tracing::warn!(doc_id, error = %e, "failed to archive document");
        }

        self.dedup.mark_url_seen(&task.url).await;
        self.dedup
            .mark_content_seen(result.content_digest, doc_id)
            .await;

        let next_depth = task.depth + 1;
        for (link, _anchor) in &doc.outbound_links {
            self.frontier.add_discovered(link, next_depth);
        }

        self.frontier.mark_completed(&task.url);

        self.metrics
            .set_gauge("scheduler_queue_size", self.frontier.queue_size() as f64);
        self.metrics
            .set_gauge("indexer_total_docs", self.indexer.total_documents() as f64);

        tracing::debug!(url = %task.url, doc_id, links = doc.outbound_links.len(), "indexed");
        StepOutcome::Indexed(doc_id)
    }

    /// Run worker tasks against the frontier until it closes.
    ///
    /// The crawl stops on its own once the queue drains with nothing in
    /// flight; `shutdown` forces the same path from outside.
    pub async fn run(self: &Arc<Self>) {
        let mut workers = tokio::task::JoinSet::new();
        for worker_id in 0..self.worker_count {
            let pipeline = Arc::clone(self);
            workers.spawn(async move { pipeline.worker_loop(worker_id).await });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "crawl worker terminated abnormally");
            }
        }

        self.indexer.flush_segment();
        self.save_checkpoint();

        let stats = self.frontier.stats();
        tracing::info!(
            documents = self.indexer.total_documents(),
            %stats,
            "crawl finished"
        );
    }

    pub fn shutdown(&self) {
        self.frontier.shutdown();
    }

    async fn worker_loop(&self, worker_id: usize) {
        tracing::debug!(worker_id, "crawl worker started");
        loop {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let outcome = self.process_next().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match outcome {
                StepOutcome::Closed => break,
                StepOutcome::Idle => {
                    // Nothing queued and nothing in flight means no future
                    // work can appear: the crawl is complete
                    if self.frontier.is_running()
                        && self.frontier.queue_size() == 0
                        && self.in_flight.load(Ordering::SeqCst) == 0
                    {
                        tracing::info!("frontier drained, stopping crawl");
                        self.frontier.shutdown();
                        continue;
                    }
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
                _ => {}
            }
        }
        tracing::debug!(worker_id, "crawl worker stopped");
    }

    fn save_checkpoint(&self) {
        let stats = self.frontier.stats();
        let mut state = HashMap::new();
        state.insert(
            "total_documents".to_string(),
            self.indexer.total_documents().to_string(),
        );
        state.insert(
            "total_scheduled".to_string(),
            stats.total_scheduled.to_string(),
        );
        state.insert(
            "total_completed".to_string(),
            stats.total_completed.to_string(),
        );
        state.insert("total_failed".to_string(), stats.total_failed.to_string());
        state.insert(
            "segment_count".to_string(),
            self.indexer.segment_count().to_string(),
        );

        if let Err(e) = self.storage.save_checkpoint(&state) {
            tracing::warn!(error = %e, "failed to save checkpoint");
        }
    }
}
