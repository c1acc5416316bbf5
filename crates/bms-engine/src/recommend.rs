//! Recommendation scoring over a user's validated results, the per-user
//! cache of recent search results, and ad-hoc searches.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bms_core::{
    normalize_keywords, similarity, DateRange, Features, PeriodFilter, ResultKey,
    ResultValidation, SearchResult, ValidationOutcome,
};
use bms_search::{run_with_timeout, SearchExecutor, SearchQuery};
use bms_storage::{StoreError, ValidationStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::EngineError;

/// Recent results per user, newest first, capped and keyed by result
/// identity.
#[derive(Debug, Clone)]
pub struct ResultCache {
    per_user: usize,
    inner: Arc<RwLock<HashMap<String, VecDeque<SearchResult>>>>,
}

impl ResultCache {
    pub fn new(per_user: usize) -> Self {
        Self {
            per_user: per_user.max(1),
            inner: Arc::default(),
        }
    }

    pub async fn push(&self, user_id: &str, results: &[SearchResult]) {
        if results.is_empty() {
            return;
        }
        let mut guard = self.inner.write().await;
        let entries = guard.entry(user_id.to_string()).or_default();
        for result in results.iter().rev() {
            let key = result.key();
            entries.retain(|existing| existing.key() != key);
            entries.push_front(result.clone());
        }
        entries.truncate(self.per_user);
    }

    pub async fn recent(&self, user_id: &str) -> Vec<SearchResult> {
        self.inner
            .read()
            .await
            .get(user_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Look a result up by id, optionally narrowed to one source.
    pub async fn find(&self, user_id: &str, id: &str, source: Option<&str>) -> Option<SearchResult> {
        self.inner.read().await.get(user_id).and_then(|entries| {
            entries
                .iter()
                .find(|r| r.id == id && source.map_or(true, |s| r.source == s))
                .cloned()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub user_id: String,
    pub outcome: ValidationOutcome,
    #[serde(default)]
    pub source: Option<String>,
    /// Full result body, for results the server has not cached.
    #[serde(default)]
    pub result: Option<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReceipt {
    pub result: SearchResult,
    pub outcome: ValidationOutcome,
    pub validation_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSearchRequest {
    pub user_id: String,
    pub keywords: String,
    #[serde(default)]
    pub period: Option<PeriodFilter>,
    #[serde(default)]
    pub custom_period: Option<DateRange>,
    #[serde(default)]
    pub max_results: Option<u32>,
}

#[derive(Clone)]
pub struct Recommender {
    validations: Arc<dyn ValidationStore>,
    executor: Arc<dyn SearchExecutor>,
    cache: ResultCache,
    executor_timeout: Duration,
    default_max_results: u32,
}

impl Recommender {
    pub fn new(
        validations: Arc<dyn ValidationStore>,
        executor: Arc<dyn SearchExecutor>,
        cache: ResultCache,
        executor_timeout: Duration,
        default_max_results: u32,
    ) -> Self {
        Self {
            validations,
            executor,
            cache,
            executor_timeout,
            default_max_results,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Each candidate scores its best match against the user's validated
    /// results; users with no history score everything 0.0.
    pub async fn score(
        &self,
        user_id: &str,
        candidates: Vec<SearchResult>,
    ) -> Result<Vec<ScoredResult>, EngineError> {
        let history: Vec<Features> = self
            .validations
            .list_for_user(user_id)
            .await?
            .iter()
            .map(|v| Features::of(&v.result))
            .collect();

        let mut scored: Vec<ScoredResult> = candidates
            .into_iter()
            .map(|result| {
                let features = Features::of(&result);
                let best = history
                    .iter()
                    .map(|validated| similarity(&features, validated))
                    .fold(0.0_f64, f64::max);
                ScoredResult {
                    result,
                    similarity: best,
                }
            })
            .collect();
        scored.sort_by(rank);
        Ok(scored)
    }

    pub async fn record_validation(
        &self,
        result_id: &str,
        request: ValidationRequest,
    ) -> Result<ValidationReceipt, EngineError> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(EngineError::validation("userId is required"));
        }
        let result = match request.result {
            Some(result) if result.id == result_id => result,
            Some(_) => {
                return Err(EngineError::validation(
                    "result.id does not match the validated id",
                ))
            }
            None => self
                .cache
                .find(user_id, result_id, request.source.as_deref())
                .await
                .ok_or_else(|| StoreError::not_found("search result", result_id))?,
        };

        let validation_count = self
            .validations
            .record(ResultValidation {
                user_id: user_id.to_string(),
                result: result.clone(),
                outcome: request.outcome,
                validated_at: Utc::now(),
            })
            .await?;
        info!(
            user_id,
            result = %result.key(),
            outcome = request.outcome.as_str(),
            validation_count,
            "search result validated"
        );
        Ok(ValidationReceipt {
            result: SearchResult {
                validation_count,
                ..result
            },
            outcome: request.outcome,
            validation_count,
        })
    }

    /// Score the user's cached recent results, skipping ones they already
    /// validated.
    pub async fn recommend(&self, user_id: &str, limit: usize) -> Result<Vec<ScoredResult>, EngineError> {
        let validated: HashSet<ResultKey> = self
            .validations
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|v| v.result.key())
            .collect();
        let candidates: Vec<SearchResult> = self
            .cache
            .recent(user_id)
            .await
            .into_iter()
            .filter(|r| !validated.contains(&r.key()))
            .collect();
        debug!(user_id, candidates = candidates.len(), "scoring recommendations");
        let mut scored = self.score(user_id, candidates).await?;
        scored.truncate(limit);
        Ok(scored)
    }

    /// Run the executor once outside any schedule; results land in the
    /// user's cache.
    pub async fn auto_search(&self, request: AutoSearchRequest) -> Result<Vec<SearchResult>, EngineError> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(EngineError::validation("userId is required"));
        }
        let keywords = normalize_keywords(&request.keywords);
        if keywords.is_empty() {
            return Err(EngineError::validation("keywords are required"));
        }
        let period = request.period.unwrap_or_default();
        if period == PeriodFilter::Custom && request.custom_period.is_none() {
            return Err(EngineError::validation("period 'custom' requires a customPeriod"));
        }
        let max_results = request.max_results.unwrap_or(self.default_max_results);
        if max_results == 0 {
            return Err(EngineError::validation("maxResults must be at least 1"));
        }

        let query = SearchQuery {
            keywords,
            bounds: period.bounds(request.custom_period.as_ref(), Utc::now()),
            max_results,
        };
        let mut results =
            run_with_timeout(self.executor.as_ref(), &query, self.executor_timeout).await?;
        for result in &mut results {
            result.validation_count = self.validations.count(&result.key()).await?;
        }
        self.cache.push(user_id, &results).await;
        info!(user_id, keywords = %query.keywords, results = results.len(), "ad-hoc search finished");
        Ok(results)
    }
}

/// Highest similarity first; ties go to the newer publication, undated last.
fn rank(a: &ScoredResult, b: &ScoredResult) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| match (a.result.published_at, b.result.published_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use bms_search::ExecutorError;
    use bms_storage::MemoryStore;
    use chrono::TimeZone;

    fn recommender(executor: Arc<dyn SearchExecutor>) -> (Recommender, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let recommender = Recommender::new(
            store.clone(),
            executor,
            ResultCache::new(10),
            Duration::from_secs(5),
            50,
        );
        (recommender, store)
    }

    fn solar() -> SearchResult {
        let mut r = result("afdb", "1", "Solar mini-grid feasibility study");
        r.description = "Rural electrification in Senegal".into();
        r.category = Some("Energy".into());
        r.location = Some("Senegal".into());
        r
    }

    #[tokio::test]
    async fn identical_scores_one_and_disjoint_scores_zero() {
        let (recommender, _store) = recommender(Arc::new(FixedExecutor(Ok(vec![]))));
        recommender.cache().push("amina", &[solar()]).await;
        recommender
            .record_validation(
                "1",
                ValidationRequest {
                    user_id: "amina".into(),
                    outcome: ValidationOutcome::Submitted,
                    source: None,
                    result: None,
                },
            )
            .await
            .unwrap();

        let mut twin = solar();
        twin.source = "ungm".into();
        let mut other = result("worldbank", "9", "Hospital payroll audit");
        other.description = "Finance controls".into();
        other.category = Some("Health".into());
        other.location = Some("Peru".into());

        let scored = recommender.score("amina", vec![other, twin]).await.unwrap();
        assert_eq!(scored[0].result.source, "ungm");
        assert!((scored[0].similarity - 1.0).abs() < 1e-9);
        assert_eq!(scored[1].similarity, 0.0);
    }

    #[tokio::test]
    async fn ties_prefer_newer_then_dated() {
        let (recommender, _store) = recommender(Arc::new(FixedExecutor(Ok(vec![]))));
        let mut old = result("a", "1", "Alpha");
        old.published_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single();
        let mut new = result("a", "2", "Beta");
        new.published_at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single();
        let undated = result("a", "3", "Gamma");

        let scored = recommender
            .score("nobody", vec![undated, old, new])
            .await
            .unwrap();
        let ids: Vec<&str> = scored.iter().map(|s| s.result.id.as_str()).collect();
        assert_eq!(ids, ["2", "1", "3"]);
    }

    #[tokio::test]
    async fn validating_an_unknown_result_is_not_found() {
        let (recommender, _store) = recommender(Arc::new(FixedExecutor(Ok(vec![]))));
        let err = recommender
            .record_validation(
                "404",
                ValidationRequest {
                    user_id: "amina".into(),
                    outcome: ValidationOutcome::Won,
                    source: None,
                    result: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn every_validation_increments_the_count() {
        let (recommender, _store) = recommender(Arc::new(FixedExecutor(Ok(vec![]))));
        for (user, expected) in [("amina", 1), ("amina", 2), ("yao", 3)] {
            let receipt = recommender
                .record_validation(
                    "1",
                    ValidationRequest {
                        user_id: user.into(),
                        outcome: ValidationOutcome::InProgress,
                        source: Some("afdb".into()),
                        result: Some(solar()),
                    },
                )
                .await
                .unwrap();
            assert_eq!(receipt.validation_count, expected);
            assert_eq!(receipt.result.validation_count, expected);
        }
    }

    #[tokio::test]
    async fn auto_search_caches_and_recommend_skips_validated() {
        let mut related = result("ungm", "2", "Solar mini-grid operations support");
        related.description = "Rural electrification".into();
        let executor = FixedExecutor(Ok(vec![solar(), related]));
        let (recommender, _store) = recommender(Arc::new(executor));

        let results = recommender
            .auto_search(AutoSearchRequest {
                user_id: "amina".into(),
                keywords: " solar   mini-grid ".into(),
                period: None,
                custom_period: None,
                max_results: None,
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        recommender
            .record_validation(
                "1",
                ValidationRequest {
                    user_id: "amina".into(),
                    outcome: ValidationOutcome::Won,
                    source: Some("afdb".into()),
                    result: None,
                },
            )
            .await
            .unwrap();

        let recommended = recommender.recommend("amina", 5).await.unwrap();
        assert_eq!(recommended.len(), 1);
        assert_eq!(recommended[0].result.id, "2");
        assert!(recommended[0].similarity > 0.0);
    }

    #[tokio::test]
    async fn auto_search_surfaces_executor_failure() {
        let executor = FixedExecutor(Err(ExecutorError::Unavailable("all sources down".into())));
        let (recommender, _store) = recommender(Arc::new(executor));
        let err = recommender
            .auto_search(AutoSearchRequest {
                user_id: "amina".into(),
                keywords: "solar".into(),
                period: None,
                custom_period: None,
                max_results: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ExecutorUnavailable);
    }

    #[tokio::test]
    async fn cache_is_capped_and_deduplicated() {
        let cache = ResultCache::new(2);
        cache
            .push("u", &[result("a", "1", "One"), result("a", "2", "Two")])
            .await;
        cache
            .push("u", &[result("a", "3", "Three"), result("a", "1", "One again")])
            .await;
        let ids: Vec<String> = cache.recent("u").await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["3", "1"]);
        assert!(cache.find("u", "1", Some("b")).await.is_none());
        assert_eq!(
            cache.find("u", "1", Some("a")).await.map(|r| r.title),
            Some("One again".to_string())
        );
    }
}
