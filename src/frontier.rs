//! Priority frontier with per-host politeness and retry scheduling.
//!
//! Tasks are ordered by priority (highest first), ties broken by admission
//! order. A task is handed out only once it is ready (`ready_at` reached) and
//! its host is outside the politeness window. Consumers that see `Pending`
//! are expected to sleep briefly and retry; `Closed` is the terminal signal
//! once the running flag is cleared and the queue has drained.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use crate::backoff::RetryBackoff;
use crate::config::{RateLimitConfig, SchedulerConfig};
use crate::metrics::SharedMetrics;
use crate::url_utils;

/// Upper bound on a single retry delay.
const RETRY_CAP: Duration = Duration::from_secs(60);

/// A unit of crawl work. Mutated only by the frontier.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    /// Canonical URL
    pub url: String,
    pub priority: i32,
    pub retry_count: u32,
    /// Monotonic-clock instant before which the task must not run
    pub ready_at: Instant,
    pub depth: u32,
}

/// Outcome of a dequeue attempt.
#[derive(Debug)]
pub enum TaskPoll {
    Ready(CrawlTask),
    /// Tasks exist but none may run right now; sleep briefly and retry
    Pending,
    /// The frontier is stopped and drained
    Closed,
}

struct HeapEntry {
    task: CrawlTask,
    seq: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority wins, earliest admission breaks ties
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Frontier {
    queue: Mutex<BinaryHeap<HeapEntry>>,
    /// Earliest instant each host may be contacted again; expired entries are
    /// dropped lazily at read time
    host_backoff: DashMap<String, Instant>,
    seq: AtomicU64,
    running: AtomicBool,
    queue_cap: usize,
    max_retries: u32,
    retry_backoff: RetryBackoff,
    rate_limit: RateLimitConfig,
    metrics: SharedMetrics,
    total_scheduled: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
}

impl Frontier {
    pub fn new(
        scheduler: &SchedulerConfig,
        rate_limit: RateLimitConfig,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            host_backoff: DashMap::new(),
            seq: AtomicU64::new(0),
            running: AtomicBool::new(true),
            queue_cap: scheduler.queue_size,
            max_retries: scheduler.max_retries,
            retry_backoff: RetryBackoff::new(
                Duration::from_millis(scheduler.retry_backoff_ms),
                RETRY_CAP,
            ),
            rate_limit,
            metrics,
            total_scheduled: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    /// Admit a URL at an explicit priority. Returns false when the URL is not
    /// crawlable or the queue is full.
    pub fn add_url(&self, url: &str, priority: i32) -> bool {
        self.admit(url, priority, 0)
    }

    /// Admit a discovered link; shallower discoveries rank higher.
    pub fn add_discovered(&self, url: &str, depth: u32) -> bool {
        self.admit(url, -(depth as i32), depth)
    }

    /// Admit seed URLs at priority 0. Returns the number accepted.
    pub fn add_seed_urls(&self, urls: &[String]) -> usize {
        urls.iter().filter(|url| self.add_url(url, 0)).count()
    }

    fn admit(&self, url: &str, priority: i32, depth: u32) -> bool {
        let Some(canonical) = url_utils::canonicalize(url) else {
            return false;
        };
        if !url_utils::should_crawl_url(&canonical) {
            return false;
        }

        let task = CrawlTask {
            url: canonical,
            priority,
            retry_count: 0,
            ready_at: Instant::now(),
            depth,
        };

        let mut queue = self.queue.lock();
        if queue.len() >= self.queue_cap {
            tracing::debug!(url = %task.url, "frontier full, dropping url");
            self.metrics.increment_counter("frontier_rejected");
            return false;
        }
        queue.push(HeapEntry {
            task,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        });
        drop(queue);

        self.total_scheduled.fetch_add(1, AtomicOrdering::Relaxed);
        true
    }

    /// Dequeue protocol: pop the top entry, then gate on task readiness and
    /// host politeness. A gated entry is pushed back (keeping its admission
    /// order) and the caller is told to come back later. The queue lock is
    /// never held across the host-backoff check.
    pub fn next_task(&self) -> TaskPoll {
        let entry = { self.queue.lock().pop() };

        let Some(entry) = entry else {
            return if self.running.load(AtomicOrdering::Acquire) {
                TaskPoll::Pending
            } else {
                TaskPoll::Closed
            };
        };

        let now = Instant::now();

        if entry.task.ready_at > now {
            self.requeue(entry);
            return TaskPoll::Pending;
        }

        if let Some(host) = url_utils::extract_host(&entry.task.url) {
            let blocked = self
                .host_backoff
                .get(&host)
                .map(|until| *until > now)
                .unwrap_or(false);
            if blocked {
                self.requeue(entry);
                return TaskPoll::Pending;
            }
            // Lazy expiry; remove_if re-checks under the shard lock
            self.host_backoff.remove_if(&host, |_, until| *until <= now);
        }

        TaskPoll::Ready(entry.task)
    }

    fn requeue(&self, entry: HeapEntry) {
        self.queue.lock().push(entry);
    }

    /// Record that the host was just contacted, opening its politeness window.
    /// Called after every completed fetch, successful or not.
    pub fn record_fetch(&self, host: &str) {
        let delay = self.rate_limit.politeness_delay(host);
        if delay.is_zero() {
            return;
        }
        self.host_backoff
            .insert(host.to_string(), Instant::now() + delay);
    }

    pub fn mark_completed(&self, _url: &str) {
        self.total_completed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Handle a failed task. When retries remain the task is re-queued with
    /// its prior retry count advanced and an exponentially delayed `ready_at`;
    /// otherwise it is dropped and counted as permanently failed.
    pub fn mark_failed(&self, task: &CrawlTask, will_retry: bool) {
        if will_retry && task.retry_count < self.max_retries {
            let delay = self.retry_backoff.delay(task.retry_count);
            let retried = CrawlTask {
                retry_count: task.retry_count + 1,
                ready_at: Instant::now() + delay,
                ..task.clone()
            };
            tracing::debug!(
                url = %retried.url,
                retry = retried.retry_count,
                delay_ms = delay.as_millis() as u64,
                "re-queueing failed task"
            );
            self.queue.lock().push(HeapEntry {
                task: retried,
                seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            });
        } else {
            self.total_failed.fetch_add(1, AtomicOrdering::Relaxed);
            self.metrics.increment_counter("failed_fetches");
            tracing::warn!(url = %task.url, retries = task.retry_count, "task permanently failed");
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn shutdown(&self) {
        self.running.store(false, AtomicOrdering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::Acquire)
    }

    pub fn stats(&self) -> FrontierStats {
        let now = Instant::now();
        FrontierStats {
            total_queued: self.queue_size(),
            total_scheduled: self.total_scheduled.load(AtomicOrdering::Relaxed),
            total_completed: self.total_completed.load(AtomicOrdering::Relaxed),
            total_failed: self.total_failed.load(AtomicOrdering::Relaxed),
            hosts_in_backoff: self
                .host_backoff
                .iter()
                .filter(|entry| *entry.value() > now)
                .count(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrontierStats {
    pub total_queued: usize,
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub hosts_in_backoff: usize,
}

impl std::fmt::Display for FrontierStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frontier: {} queued, {} scheduled, {} completed, {} failed, {} hosts in backoff",
            self.total_queued,
            self.total_scheduled,
            self.total_completed,
            self.total_failed,
            self.hosts_in_backoff
        )
    }
}
