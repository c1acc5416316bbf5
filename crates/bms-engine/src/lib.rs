//! Services behind the BMS API: offer workflow, assignment, recurring
//! searches, recommendations and reports.

mod assignment;
mod config;
mod error;
mod recommend;
mod reports;
mod scheduler;
mod workflow;

use std::sync::Arc;

use anyhow::{Context, Result};
use bms_search::{
    FanOutExecutor, FixtureSearchExecutor, HttpClientConfig, HttpFetcher, HttpSearchExecutor,
    SearchExecutor, SourceRegistry,
};
use bms_storage::{
    ArtifactStore, ListOrder, MemoryStore, OfferFilter, OfferStore, PgStore, ScheduleStore,
    ValidationStore,
};
use chrono::Utc;
use tokio_cron_scheduler::JobScheduler;
use tracing::info;

pub use assignment::{AssignmentEngine, BulkAssignRequest, BulkItemError, BulkItemResult};
pub use config::{parse_api_keys, ApiKey, EngineConfig, Environment};
pub use error::{Action, Caller, EngineError, ErrorKind, Role};
pub use recommend::{
    AutoSearchRequest, Recommender, ResultCache, ScoredResult, ValidationReceipt,
    ValidationRequest,
};
pub use reports::{
    dashboard, export_snapshot, Dashboard, SnapshotManifest, SnapshotManifestFile, SnapshotReport,
    UpcomingDeadline, UPCOMING_DEADLINE_DAYS,
};
pub use scheduler::{build_job_scheduler, SearchScheduler, TickSummary};
pub use workflow::OfferService;

pub const CRATE_NAME: &str = "bms-engine";

/// Every service wired to one set of stores and one search executor.
#[derive(Clone)]
pub struct Engine {
    pub config: EngineConfig,
    pub offers: OfferService,
    pub assignments: AssignmentEngine,
    pub scheduler: Arc<SearchScheduler>,
    pub recommender: Recommender,
    offer_store: Arc<dyn OfferStore>,
    schedule_store: Arc<dyn ScheduleStore>,
}

impl Engine {
    /// Postgres when `DATABASE_URL` is set, in-memory otherwise.
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        let executor = build_executor(&config)?;
        match config.database_url.as_deref() {
            Some(url) => {
                let pool = bms_storage::connect(url)
                    .await
                    .context("connecting to postgres")?;
                let store = Arc::new(PgStore::new(pool));
                store.migrate().await.context("applying migrations")?;
                info!("using postgres stores");
                Ok(Self::with_stores(
                    config,
                    store.clone(),
                    store.clone(),
                    store,
                    executor,
                ))
            }
            None => {
                info!("DATABASE_URL not set; using in-memory stores");
                Ok(Self::in_memory(config, executor))
            }
        }
    }

    pub fn in_memory(config: EngineConfig, executor: Arc<dyn SearchExecutor>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(config, store.clone(), store.clone(), store, executor)
    }

    pub fn with_stores(
        config: EngineConfig,
        offer_store: Arc<dyn OfferStore>,
        schedule_store: Arc<dyn ScheduleStore>,
        validation_store: Arc<dyn ValidationStore>,
        executor: Arc<dyn SearchExecutor>,
    ) -> Self {
        let cache = ResultCache::new(config.result_cache_per_user);
        let artifacts = ArtifactStore::new(config.artifacts_dir.clone());
        Self {
            offers: OfferService::new(offer_store.clone(), artifacts),
            assignments: AssignmentEngine::new(offer_store.clone()),
            scheduler: Arc::new(SearchScheduler::new(
                schedule_store.clone(),
                executor.clone(),
                cache.clone(),
                config.executor_timeout,
            )),
            recommender: Recommender::new(
                validation_store,
                executor,
                cache,
                config.executor_timeout,
                config.max_results,
            ),
            config,
            offer_store,
            schedule_store,
        }
    }

    pub async fn dashboard(&self) -> Result<Dashboard, EngineError> {
        let offers = self
            .offer_store
            .list(&OfferFilter::default(), ListOrder::default())
            .await?;
        Ok(dashboard(&offers, Utc::now().date_naive()))
    }

    pub async fn export_snapshot(&self) -> Result<SnapshotReport> {
        let offers = self
            .offer_store
            .list(&OfferFilter::default(), ListOrder::default())
            .await
            .context("listing offers")?;
        let schedules = self
            .schedule_store
            .list_all()
            .await
            .context("listing scheduled searches")?;
        export_snapshot(&self.config.reports_root(), &offers, &schedules, Utc::now()).await
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }
        let sched = build_job_scheduler(self.scheduler.clone(), &self.config.scheduler_cron).await?;
        Ok(Some(sched))
    }
}

/// Fan-out over the enabled HTTP and fixture sources in `sources.yaml`.
pub fn build_executor(config: &EngineConfig) -> Result<Arc<dyn SearchExecutor>> {
    let registry = SourceRegistry::load(config.sources_path())?;
    let mut executors: Vec<Arc<dyn SearchExecutor>> = Vec::new();

    let fetcher = HttpFetcher::new(HttpClientConfig {
        timeout: std::time::Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..HttpClientConfig::default()
    })?;
    let http = HttpSearchExecutor::new(&registry, fetcher);
    if http.source_count() > 0 {
        info!(sources = http.source_count(), "http search sources enabled");
        executors.push(Arc::new(http));
    }

    let fixture = FixtureSearchExecutor::from_registry(&registry, config.fixtures_dir());
    executors.push(Arc::new(fixture));
    Ok(Arc::new(FanOutExecutor::new(executors)))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bms_core::{Offer, OfferDraft, OfferType, SearchResult};
    use bms_search::{ExecutorError, SearchExecutor, SearchQuery};
    use bms_storage::{ArtifactStore, MemoryStore, OfferStore, ScheduleStore};
    use chrono::NaiveDate;

    use crate::{Caller, OfferService, Role};

    pub fn contributor() -> Caller {
        Caller::new("carla", Role::Contributor)
    }

    pub fn validator() -> Caller {
        Caller::new("victor", Role::Validator)
    }

    pub fn dispatcher() -> Caller {
        Caller::new("dina", Role::Dispatcher)
    }

    pub fn sample_draft(title: &str) -> OfferDraft {
        OfferDraft {
            title: Some(title.into()),
            issuer: Some("World Bank".into()),
            countries: vec!["Senegal".into()],
            objectives: Some("Support the ministry".into()),
            deadline_date: NaiveDate::from_ymd_opt(2030, 1, 15),
            offer_type: Some(OfferType::Ao),
            ..OfferDraft::default()
        }
    }

    pub fn offer_service() -> (OfferService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let service = OfferService::new(
            Arc::new(MemoryStore::new()),
            ArtifactStore::new(dir.path()),
        );
        (service, dir)
    }

    pub fn service_store(service: &OfferService) -> Arc<dyn OfferStore> {
        service.store().clone()
    }

    pub async fn draft(service: &OfferService, title: &str) -> Offer {
        service.create(&contributor(), sample_draft(title)).await.unwrap()
    }

    pub async fn pending_offer(service: &OfferService, title: &str) -> Offer {
        let offer = draft(service, title).await;
        service.submit(&contributor(), offer.id).await.unwrap()
    }

    pub fn result(source: &str, id: &str, title: &str) -> SearchResult {
        SearchResult {
            id: id.into(),
            source: source.into(),
            title: title.into(),
            description: String::new(),
            url: format!("https://{source}.example.org/{id}"),
            published_at: None,
            score: None,
            estimated_value: None,
            deadline: None,
            location: None,
            category: None,
            validation_count: 0,
        }
    }

    pub struct FixedExecutor(pub Result<Vec<SearchResult>, ExecutorError>);

    #[async_trait]
    impl SearchExecutor for FixedExecutor {
        async fn execute(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, ExecutorError> {
            self.0.clone()
        }
    }

    pub struct SlowExecutor;

    #[async_trait]
    impl SearchExecutor for SlowExecutor {
        async fn execute(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    /// Deletes the schedule it is running for, mid-run.
    pub struct DeletingExecutor {
        pub store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl SearchExecutor for DeletingExecutor {
        async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ExecutorError> {
            ScheduleStore::delete(self.store.as_ref(), "amina", &query.keywords)
                .await
                .map_err(|err| ExecutorError::Unavailable(err.to_string()))?;
            Ok(Vec::new())
        }
    }
}
