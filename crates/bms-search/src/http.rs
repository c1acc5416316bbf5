use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bms_core::SearchResult;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info_span, warn, Instrument};

use crate::{
    finalize_results, DedupConfig, ExecutorError, RemoteResult, ResultDedup, SearchExecutor,
    SearchQuery, SourceMode, SourceRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetcher is shutting down")]
    Closed,
}

/// Rate-limited JSON client shared by every HTTP source.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    /// POST `body` as JSON, retrying 5xx/429 and connection failures with
    /// capped exponential backoff.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        source_id: &str,
        url: &str,
        body: &B,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source.acquire().await.map_err(|_| FetchError::Closed)?;

        let mut attempt = 0;
        loop {
            let retry = attempt < self.backoff.max_retries;
            match self.client.post(url).json(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }
                    if !(retry && classify_status(status) == RetryDisposition::Retryable) {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    warn!(source_id, status = status.as_u16(), attempt, "retrying search request");
                }
                Err(err) => {
                    if !(retry && classify_reqwest_error(&err) == RetryDisposition::Retryable) {
                        return Err(FetchError::Request(err));
                    }
                    warn!(source_id, error = %err, attempt, "retrying search request");
                }
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteQuery<'a> {
    keywords: &'a str,
    from: Option<chrono::DateTime<chrono::Utc>>,
    to: Option<chrono::DateTime<chrono::Utc>>,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteResponse {
    Wrapped { results: Vec<RemoteResult> },
    Bare(Vec<RemoteResult>),
}

impl RemoteResponse {
    fn into_results(self) -> Vec<RemoteResult> {
        match self {
            RemoteResponse::Wrapped { results } | RemoteResponse::Bare(results) => results,
        }
    }
}

#[derive(Debug, Clone)]
struct HttpSource {
    source_id: String,
    endpoint: String,
}

/// Queries every enabled `http` source in parallel. A failing source is
/// logged and skipped; the search fails only when all of them fail.
pub struct HttpSearchExecutor {
    fetcher: Arc<HttpFetcher>,
    sources: Vec<HttpSource>,
    dedup: ResultDedup,
}

impl HttpSearchExecutor {
    pub fn new(registry: &SourceRegistry, fetcher: HttpFetcher) -> Self {
        let sources = registry
            .enabled(SourceMode::Http)
            .filter_map(|s| {
                s.endpoint.as_ref().map(|endpoint| HttpSource {
                    source_id: s.source_id.clone(),
                    endpoint: endpoint.clone(),
                })
            })
            .collect();
        Self {
            fetcher: Arc::new(fetcher),
            sources,
            dedup: ResultDedup::new(DedupConfig::default()),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

async fn query_source(
    fetcher: &HttpFetcher,
    source: &HttpSource,
    query: &SearchQuery,
) -> anyhow::Result<Vec<SearchResult>> {
    let payload = RemoteQuery {
        keywords: &query.keywords,
        from: query.bounds.from,
        to: query.bounds.to,
        max_results: query.max_results,
    };
    let response = fetcher
        .post_json(&source.source_id, &source.endpoint, &payload)
        .await?;
    let parsed: RemoteResponse = serde_json::from_slice(&response.body)
        .with_context(|| format!("decoding results from {}", response.final_url))?;
    Ok(parsed
        .into_results()
        .into_iter()
        .map(|r| r.into_result(&source.source_id))
        .collect())
}

#[async_trait]
impl SearchExecutor for HttpSearchExecutor {
    async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ExecutorError> {
        if self.sources.is_empty() {
            return Err(ExecutorError::Unavailable("no http sources enabled".into()));
        }

        let mut tasks = JoinSet::new();
        for source in self.sources.clone() {
            let fetcher = Arc::clone(&self.fetcher);
            let query = query.clone();
            let span = info_span!("source_search", source_id = %source.source_id, keywords = %query.keywords);
            tasks.spawn(
                async move {
                    let outcome = query_source(&fetcher, &source, &query).await;
                    (source.source_id, outcome)
                }
                .instrument(span),
            );
        }

        let mut merged = Vec::new();
        let mut failures = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(results))) => merged.extend(results),
                Ok((source_id, Err(err))) => {
                    failures += 1;
                    warn!(%source_id, error = %format!("{err:#}"), "search source failed");
                }
                Err(err) => {
                    failures += 1;
                    warn!(error = %err, "search source task panicked");
                }
            }
        }

        if failures == self.sources.len() {
            return Err(ExecutorError::Unavailable(format!(
                "all {failures} search sources failed"
            )));
        }
        Ok(finalize_results(self.dedup.apply(merged), query))
    }
}
