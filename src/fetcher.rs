//! HTTP fetch adapter with manual redirect handling.
//!
//! Automatic redirects are disabled on the client so the adapter owns the
//! chain: each hop is recorded, bounded by `max_redirects`, and cycles are
//! broken by the depth bound alone. Failures are returned as values, never
//! propagated as errors; the orchestrator decides what to retry.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::Client;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::FetcherConfig;
use crate::url_utils;

#[derive(Error, Debug)]
pub enum FetcherError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// How a fetch failed, at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Connect,
    Read,
    TooManyRedirects,
    Tls,
    Other,
}

#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub kind: FetchErrorKind,
    pub message: String,
}

/// Outcome of a single fetch, immutable after production.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub success: bool,
    pub http_status: u16,
    pub final_url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub latency: Duration,
    pub redirect_chain: Vec<String>,
    pub content_digest: u64,
    pub error: Option<FetchFailure>,
}

impl FetchResult {
    pub fn ok(
        final_url: String,
        http_status: u16,
        content_type: String,
        body: Vec<u8>,
        redirect_chain: Vec<String>,
        latency: Duration,
    ) -> Self {
        let content_digest = url_utils::content_digest(&body);
        Self {
            success: true,
            http_status,
            final_url,
            content_type,
            body,
            latency,
            redirect_chain,
            content_digest,
            error: None,
        }
    }

    /// A non-2xx response: the status is the whole story.
    pub fn http_failure(
        final_url: String,
        http_status: u16,
        content_type: String,
        redirect_chain: Vec<String>,
        latency: Duration,
    ) -> Self {
        Self {
            success: false,
            http_status,
            final_url,
            content_type,
            body: Vec::new(),
            latency,
            redirect_chain,
            content_digest: 0,
            error: None,
        }
    }

    pub fn transport_failure(
        final_url: String,
        kind: FetchErrorKind,
        message: String,
        redirect_chain: Vec<String>,
        latency: Duration,
    ) -> Self {
        Self {
            success: false,
            http_status: 0,
            final_url,
            content_type: String::new(),
            body: Vec::new(),
            latency,
            redirect_chain,
            content_digest: 0,
            error: Some(FetchFailure { kind, message }),
        }
    }

    /// Whether a retry could plausibly succeed: server errors and transient
    /// transport failures qualify; client errors, redirect exhaustion and TLS
    /// failures do not.
    pub fn is_transient(&self) -> bool {
        if self.success {
            return false;
        }
        if (500..=599).contains(&self.http_status) {
            return true;
        }
        matches!(
            self.error.as_ref().map(|e| e.kind),
            Some(FetchErrorKind::Connect) | Some(FetchErrorKind::Read) | Some(FetchErrorKind::Other)
        )
    }
}

/// Transport seam for the pipeline; stubbed out in tests.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult;
}

pub struct HttpFetcher {
    client: Client,
    max_redirects: u32,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetcherError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            // The adapter walks the redirect chain itself
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetcherError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            max_redirects: config.max_redirects,
        })
    }

    fn classify(error: &reqwest::Error) -> FetchErrorKind {
        if error.is_timeout() {
            return FetchErrorKind::Read;
        }

        let message = error.to_string().to_lowercase();
        if message.contains("certificate") || message.contains("tls") || message.contains("ssl") {
            return FetchErrorKind::Tls;
        }

        if error.is_connect() {
            return FetchErrorKind::Connect;
        }
        if error.is_body() || error.is_decode() {
            return FetchErrorKind::Read;
        }

        FetchErrorKind::Other
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        let start = Instant::now();
        let mut redirect_chain: Vec<String> = Vec::new();
        let mut current = url.to_string();

        loop {
            let response = match self.client.get(&current).send().await {
                Ok(r) => r,
                Err(e) => {
                    return FetchResult::transport_failure(
                        current,
                        Self::classify(&e),
                        e.to_string(),
                        redirect_chain,
                        start.elapsed(),
                    );
                }
            };

            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                let Some(location) = location else {
                    return FetchResult::transport_failure(
                        current,
                        FetchErrorKind::Other,
                        format!("redirect {status} without Location header"),
                        redirect_chain,
                        start.elapsed(),
                    );
                };

                if redirect_chain.len() as u32 >= self.max_redirects {
                    return FetchResult::transport_failure(
                        current,
                        FetchErrorKind::TooManyRedirects,
                        format!("more than {} redirects", self.max_redirects),
                        redirect_chain,
                        start.elapsed(),
                    );
                }

                let next =
                    url_utils::resolve(&current, &location).unwrap_or_else(|| location.clone());
                redirect_chain.push(std::mem::replace(&mut current, next));
                continue;
            }

            if status.is_success() {
                return match response.bytes().await {
                    Ok(body) => FetchResult::ok(
                        current,
                        status.as_u16(),
                        content_type,
                        body.to_vec(),
                        redirect_chain,
                        start.elapsed(),
                    ),
                    Err(e) => FetchResult::transport_failure(
                        current,
                        FetchErrorKind::Read,
                        e.to_string(),
                        redirect_chain,
                        start.elapsed(),
                    ),
                };
            }

            return FetchResult::http_failure(
                current,
                status.as_u16(),
                content_type,
                redirect_chain,
                start.elapsed(),
            );
        }
    }
}
