//! Two-tier deduplication for URLs and fetched content.
//!
//! The remote tier (redis) is consulted first when available so multiple
//! crawler runs against the same keyspace share their seen-sets. Any remote
//! I/O error permanently degrades the deduplicator to the in-process tier for
//! the rest of the process; the crawl never stalls on remote availability.

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::RedisConfig;
use crate::metrics::SharedMetrics;
use crate::url_utils;

/// TTL on remote dedup keys, bounding cold-cache growth to one day.
const DEDUP_TTL_SECS: u64 = 86_400;

pub struct Deduplicator {
    remote: Option<ConnectionManager>,
    degraded: AtomicBool,
    seen_urls: Mutex<HashSet<u64>>,
    seen_content: Mutex<HashSet<u64>>,
    metrics: SharedMetrics,
}

impl Deduplicator {
    /// Connect the remote tier. A failed connection is not an error: the
    /// deduplicator comes up local-only, exactly as if it had degraded.
    pub async fn connect(config: &RedisConfig, metrics: SharedMetrics) -> Self {
        let remote = match Client::open(config.url().as_str()) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(manager) => {
                    tracing::info!(url = %config.url(), "remote dedup tier connected");
                    Some(manager)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "remote dedup unavailable, using local sets");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "invalid redis url, using local sets");
                None
            }
        };

        Self {
            remote,
            degraded: AtomicBool::new(false),
            seen_urls: Mutex::new(HashSet::new()),
            seen_content: Mutex::new(HashSet::new()),
            metrics,
        }
    }

    /// A deduplicator with no remote tier at all.
    pub fn local_only(metrics: SharedMetrics) -> Self {
        Self {
            remote: None,
            degraded: AtomicBool::new(false),
            seen_urls: Mutex::new(HashSet::new()),
            seen_content: Mutex::new(HashSet::new()),
            metrics,
        }
    }

    pub async fn is_url_seen(&self, url: &str) -> bool {
        let digest = url_utils::url_digest(url);
        let key = format!("dedup:url:{digest}");

        if let Some(hit) = self.remote_check(&key).await {
            if hit {
                self.metrics.increment_counter("remote_hits");
                self.metrics.increment_counter("url_duplicates");
                return true;
            }
            self.metrics.increment_counter("remote_misses");
        }

        let seen = self.seen_urls.lock().contains(&digest);
        if seen {
            self.metrics.increment_counter("url_duplicates");
        }
        seen
    }

    pub async fn mark_url_seen(&self, url: &str) {
        let digest = url_utils::url_digest(url);
        self.remote_mark(&format!("dedup:url:{digest}"), "1").await;
        // The local tier is always written so that, after degradation, the
        // seen-set is exactly what this process has observed.
        self.seen_urls.lock().insert(digest);
    }

    pub async fn is_content_seen(&self, content_digest: u64) -> bool {
        let key = format!("dedup:content:{content_digest}");

        if let Some(hit) = self.remote_check(&key).await {
            if hit {
                self.metrics.increment_counter("remote_hits");
                self.metrics.increment_counter("content_duplicates");
                return true;
            }
            self.metrics.increment_counter("remote_misses");
        }

        let seen = self.seen_content.lock().contains(&content_digest);
        if seen {
            self.metrics.increment_counter("content_duplicates");
        }
        seen
    }

    pub async fn mark_content_seen(&self, content_digest: u64, doc_id: u64) {
        self.remote_mark(
            &format!("dedup:content:{content_digest}"),
            &doc_id.to_string(),
        )
        .await;
        self.seen_content.lock().insert(content_digest);
    }

    /// Whether the remote tier has been abandoned for this process.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Query the remote tier. `None` means the tier is absent or degraded and
    /// the caller should fall through to the local sets.
    async fn remote_check(&self, key: &str) -> Option<bool> {
        if self.degraded.load(Ordering::Acquire) {
            return None;
        }
        let manager = self.remote.as_ref()?;
        let mut conn = manager.clone();

        let result: Result<bool, redis::RedisError> =
            redis::cmd("EXISTS").arg(key).query_async(&mut conn).await;

        match result {
            Ok(exists) => Some(exists),
            Err(e) => {
                self.degrade(&e);
                None
            }
        }
    }

    async fn remote_mark(&self, key: &str, value: &str) {
        if self.degraded.load(Ordering::Acquire) {
            return;
        }
        let Some(manager) = self.remote.as_ref() else {
            return;
        };
        let mut conn = manager.clone();

        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            self.degrade(&e);
        }
    }

    /// One-way transition to local-only operation, logged exactly once.
    fn degrade(&self, error: &redis::RedisError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                error = %error,
                "remote dedup error, degrading to local-only for the rest of this run"
            );
        }
    }
}
