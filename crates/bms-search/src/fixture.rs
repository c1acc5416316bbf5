use std::path::PathBuf;

use async_trait::async_trait;
use bms_core::similarity::tokenize;
use bms_core::SearchResult;
use tracing::{debug, warn};

use crate::{
    finalize_results, DedupConfig, ExecutorError, RemoteResult, ResultDedup, SearchExecutor,
    SearchQuery, SourceMode, SourceRegistry,
};

/// Offline executor over `fixtures/<source_id>/results.json`. A result
/// matches when every keyword token appears in its title or description.
pub struct FixtureSearchExecutor {
    fixtures_root: PathBuf,
    source_ids: Vec<String>,
    dedup: ResultDedup,
}

impl FixtureSearchExecutor {
    pub fn new(fixtures_root: impl Into<PathBuf>, source_ids: Vec<String>) -> Self {
        Self {
            fixtures_root: fixtures_root.into(),
            source_ids,
            dedup: ResultDedup::new(DedupConfig::default()),
        }
    }

    pub fn from_registry(registry: &SourceRegistry, fixtures_root: impl Into<PathBuf>) -> Self {
        let source_ids = registry
            .enabled(SourceMode::Fixture)
            .map(|s| s.source_id.clone())
            .collect();
        Self::new(fixtures_root, source_ids)
    }

    pub fn results_path(&self, source_id: &str) -> PathBuf {
        self.fixtures_root.join(source_id).join("results.json")
    }

    async fn load(&self, source_id: &str) -> anyhow::Result<Vec<SearchResult>> {
        let path = self.results_path(source_id);
        let text = tokio::fs::read_to_string(&path).await?;
        let records: Vec<RemoteResult> = serde_json::from_str(&text)?;
        debug!(source_id, path = %path.display(), count = records.len(), "loaded fixture results");
        Ok(records.into_iter().map(|r| r.into_result(source_id)).collect())
    }
}

fn matches_keywords(result: &SearchResult, keywords: &[String]) -> bool {
    let haystack = tokenize(&format!("{} {}", result.title, result.description));
    keywords.iter().all(|k| haystack.contains(k))
}

#[async_trait]
impl SearchExecutor for FixtureSearchExecutor {
    async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ExecutorError> {
        let keywords = tokenize(&query.keywords).into_iter().collect::<Vec<_>>();
        let mut merged = Vec::new();
        let mut failures = 0usize;
        for source_id in &self.source_ids {
            match self.load(source_id).await {
                Ok(results) => merged.extend(
                    results
                        .into_iter()
                        .filter(|r| matches_keywords(r, &keywords)),
                ),
                Err(err) => {
                    failures += 1;
                    warn!(source_id, error = %err, "fixture source unreadable");
                }
            }
        }
        if failures == self.source_ids.len() {
            return Err(ExecutorError::Unavailable(format!(
                "no readable fixture sources under {}",
                self.fixtures_root.display()
            )));
        }
        Ok(finalize_results(self.dedup.apply(merged), query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use bms_core::PeriodBounds;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    const RESULTS: &str = r#"[
      {"id": "a1", "title": "Solar mini-grid feasibility study", "url": "https://afdb.example/a1",
       "publishedAt": "2025-03-01T00:00:00Z", "category": "energy", "location": "Senegal"},
      {"id": "a2", "title": "Solar pumps procurement", "url": "https://afdb.example/a2",
       "publishedAt": "2024-01-10T00:00:00Z"},
      {"id": "a3", "title": "Hospital laundry services", "url": "https://afdb.example/a3"}
    ]"#;

    fn executor(dir: &Path) -> FixtureSearchExecutor {
        std::fs::create_dir_all(dir.join("afdb")).unwrap();
        std::fs::write(dir.join("afdb/results.json"), RESULTS).unwrap();
        FixtureSearchExecutor::new(dir, vec!["afdb".into()])
    }

    #[tokio::test]
    async fn keyword_and_period_filters_apply() {
        let dir = tempdir().unwrap();
        let executor = executor(dir.path());
        let all = executor
            .execute(&SearchQuery {
                keywords: "SOLAR".into(),
                bounds: PeriodBounds::default(),
                max_results: 10,
            })
            .await
            .unwrap();
        assert_eq!(
            all.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a1", "a2"]
        );
        assert!(all.iter().all(|r| r.source == "afdb"));

        let recent = executor
            .execute(&SearchQuery {
                keywords: "solar".into(),
                bounds: PeriodBounds {
                    from: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single(),
                    to: None,
                },
                max_results: 10,
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);

        let capped = executor
            .execute(&SearchQuery {
                keywords: "solar".into(),
                bounds: PeriodBounds::default(),
                max_results: 1,
            })
            .await
            .unwrap();
        assert_eq!(capped[0].id, "a1");
    }

    #[tokio::test]
    async fn missing_fixtures_are_unavailable() {
        let dir = tempdir().unwrap();
        let executor = FixtureSearchExecutor::new(dir.path(), vec!["nowhere".into()]);
        let err = executor
            .execute(&SearchQuery {
                keywords: "solar".into(),
                bounds: PeriodBounds::default(),
                max_results: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Unavailable(_)));
    }
}
