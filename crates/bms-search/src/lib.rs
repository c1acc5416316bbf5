//! Search Executor contract and the executors behind it.

mod dedup;
mod fixture;
mod http;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bms_core::{PeriodBounds, SearchResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub use dedup::{DedupConfig, ResultDedup};
pub use fixture::FixtureSearchExecutor;
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, HttpSearchExecutor, RetryDisposition,
};
pub use registry::{SourceConfig, SourceMode, SourceRegistry};

pub const CRATE_NAME: &str = "bms-search";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub keywords: String,
    #[serde(default)]
    pub bounds: PeriodBounds,
    pub max_results: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("search executor unavailable: {0}")]
    Unavailable(String),
    #[error("search executor timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait SearchExecutor: Send + Sync {
    async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ExecutorError>;
}

/// Run `executor` under a deadline; an elapsed deadline is a `Timeout`.
pub async fn run_with_timeout(
    executor: &dyn SearchExecutor,
    query: &SearchQuery,
    timeout: Duration,
) -> Result<Vec<SearchResult>, ExecutorError> {
    match tokio::time::timeout(timeout, executor.execute(query)).await {
        Ok(result) => result,
        Err(_) => Err(ExecutorError::Timeout(timeout)),
    }
}

/// Fans a query out to several executors and merges what comes back. Fails
/// only when every executor failed.
pub struct FanOutExecutor {
    executors: Vec<Arc<dyn SearchExecutor>>,
    dedup: ResultDedup,
}

impl FanOutExecutor {
    pub fn new(executors: Vec<Arc<dyn SearchExecutor>>) -> Self {
        Self {
            executors,
            dedup: ResultDedup::new(DedupConfig::default()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[async_trait]
impl SearchExecutor for FanOutExecutor {
    async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ExecutorError> {
        if self.executors.is_empty() {
            return Err(ExecutorError::Unavailable("no search sources enabled".into()));
        }
        let mut merged = Vec::new();
        let mut failures = Vec::new();
        for executor in &self.executors {
            match executor.execute(query).await {
                Ok(results) => merged.extend(results),
                Err(err) => {
                    warn!(error = %err, keywords = %query.keywords, "search executor failed");
                    failures.push(err);
                }
            }
        }
        if failures.len() == self.executors.len() {
            return Err(failures.remove(0));
        }
        Ok(finalize_results(self.dedup.apply(merged), query))
    }
}

/// Result shape shared by remote sources and fixture files; the source id
/// is filled in from the registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteResult {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    url: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    estimated_value: Option<f64>,
    #[serde(default)]
    deadline: Option<NaiveDate>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl RemoteResult {
    pub(crate) fn into_result(self, source_id: &str) -> SearchResult {
        SearchResult {
            id: self.id,
            source: source_id.to_string(),
            title: self.title,
            description: self.description,
            url: self.url,
            published_at: self.published_at,
            score: self.score,
            estimated_value: self.estimated_value,
            deadline: self.deadline,
            location: self.location,
            category: self.category,
            validation_count: 0,
        }
    }
}

/// Drop results outside the period, newest first, cap at `max_results`.
pub(crate) fn finalize_results(mut results: Vec<SearchResult>, query: &SearchQuery) -> Vec<SearchResult> {
    results.retain(|r| query.bounds.contains(r.published_at));
    results.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    results.truncate(query.max_results as usize);
    results
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn query() -> SearchQuery {
        SearchQuery {
            keywords: "water".into(),
            bounds: PeriodBounds::default(),
            max_results: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_is_a_timeout() {
        let err = run_with_timeout(&Slow, &query(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn fan_out_survives_partial_failure() {
        let fan_out = FanOutExecutor::new(vec![
            Arc::new(Fixed(Err(ExecutorError::Unavailable("down".into())))),
            Arc::new(Fixed(Ok(vec![result("ungm", "1", "Water audit", "https://a/1")]))),
        ]);
        let results = fan_out.execute(&query()).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn fan_out_fails_when_everything_fails() {
        let fan_out = FanOutExecutor::new(vec![
            Arc::new(Fixed(Err(ExecutorError::Unavailable("a".into())))),
            Arc::new(Fixed(Err(ExecutorError::Unavailable("b".into())))),
        ]);
        assert!(matches!(
            fan_out.execute(&query()).await,
            Err(ExecutorError::Unavailable(_))
        ));
    }
}
